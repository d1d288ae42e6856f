//! SMTP mail transport using lettre
//!
//! Builds the transport once at startup from the process configuration and
//! reuses its connection pool for every send. Send failures are classified
//! into the service's error taxonomy: permanent SMTP rejections become
//! `Error::Rejected`, everything else is `Error::ServiceUnavailable` and
//! eligible for retry.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::prelude::*;
use gradepost_core::config::{SmtpConfig, SmtpTlsMode};
use gradepost_types::mail_transport::{EmailMessage, MailTransport, SendOutcome};

pub struct SmtpMailTransport {
	mailer: AsyncSmtpTransport<Tokio1Executor>,
	from_address: String,
	from_name: Option<String>,
	message_counter: AtomicU64,
}

impl std::fmt::Debug for SmtpMailTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SmtpMailTransport")
			.field("from_address", &self.from_address)
			.finish_non_exhaustive()
	}
}

impl SmtpMailTransport {
	pub fn new(config: &SmtpConfig) -> GpResult<Self> {
		let tls = match config.tls_mode {
			SmtpTlsMode::Tls => {
				debug!("Using TLS mode");
				lettre::transport::smtp::client::Tls::Wrapper(
					lettre::transport::smtp::client::TlsParameters::builder(config.host.clone())
						.build()
						.map_err(|e| Error::ConfigError(format!("TLS configuration error: {}", e)))?,
				)
			}
			SmtpTlsMode::StartTls => {
				debug!("Using STARTTLS mode");
				lettre::transport::smtp::client::Tls::Opportunistic(
					lettre::transport::smtp::client::TlsParameters::builder(config.host.clone())
						.build()
						.map_err(|e| Error::ConfigError(format!("TLS configuration error: {}", e)))?,
				)
			}
			SmtpTlsMode::None => {
				debug!("No TLS mode");
				lettre::transport::smtp::client::Tls::None
			}
		};

		let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
			.port(config.port)
			.timeout(Some(Duration::from_secs(config.timeout_seconds)))
			.tls(tls);

		if let (Some(username), Some(password)) = (&config.username, &config.password) {
			builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
		}

		if !config.from_address.contains('@') {
			return Err(Error::ConfigError("Invalid from email address".into()));
		}

		Ok(Self {
			mailer: builder.build(),
			from_address: config.from_address.clone(),
			from_name: config.from_name.clone(),
			message_counter: AtomicU64::new(0),
		})
	}

	/// Provider-visible message id, set as the Message-ID header so webhook
	/// callbacks can be correlated back to the delivery log.
	fn next_message_id(&self) -> String {
		let counter = self.message_counter.fetch_add(1, Ordering::Relaxed);
		let domain = self.from_address.split('@').next_back().unwrap_or("localhost");
		format!("{}.{}@{}", Timestamp::now(), counter, domain)
	}

	fn from_mailbox(&self) -> GpResult<lettre::message::Mailbox> {
		let from = match &self.from_name {
			Some(name) => format!("{} <{}>", name, self.from_address),
			None => self.from_address.clone(),
		};
		from.parse().map_err(|_| Error::ValidationError("Invalid from email format".into()))
	}
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
	async fn send(&self, message: &EmailMessage) -> GpResult<SendOutcome> {
		if !message.to.contains('@') {
			return Err(Error::ValidationError("Invalid recipient email address".into()));
		}

		let message_id = self.next_message_id();

		let email_builder = Message::builder()
			.from(self.from_mailbox()?)
			.to(message
				.to
				.parse()
				.map_err(|_| Error::ValidationError("Invalid recipient email format".into()))?)
			.subject(&message.subject)
			.message_id(Some(format!("<{}>", message_id)));

		let email = if let Some(html_body) = &message.html_body {
			email_builder
				.multipart(
					lettre::message::MultiPart::alternative()
						.singlepart(lettre::message::SinglePart::plain(message.text_body.clone()))
						.singlepart(lettre::message::SinglePart::html(html_body.clone())),
				)
				.map_err(|e| Error::ValidationError(format!("Failed to build email: {}", e)))?
		} else {
			email_builder
				.singlepart(lettre::message::SinglePart::plain(message.text_body.clone()))
				.map_err(|e| Error::ValidationError(format!("Failed to build email: {}", e)))?
		};

		match self.mailer.send(email).await {
			Ok(response) => {
				info!("Email sent to {} (response: {:?})", message.to, response.code());
				Ok(SendOutcome { message_id: Some(message_id.into()) })
			}
			Err(e) if e.is_permanent() => {
				warn!("Email to {} rejected by server: {}", message.to, e);
				Err(Error::Rejected(format!("SMTP rejection: {}", e)))
			}
			Err(e) => {
				warn!("Failed to send email to {}: {}", message.to, e);
				Err(Error::ServiceUnavailable(format!("SMTP send failed: {}", e)))
			}
		}
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use gradepost_core::config::SmtpConfig;

	fn test_config() -> SmtpConfig {
		SmtpConfig {
			host: "smtp.example.com".into(),
			port: 587,
			username: Some("mailer".into()),
			password: Some("secret".into()),
			from_address: "reports@school.example.com".into(),
			from_name: Some("Gradepost".into()),
			tls_mode: SmtpTlsMode::StartTls,
			timeout_seconds: 30,
		}
	}

	#[test]
	fn test_transport_builds_from_config() {
		let transport = SmtpMailTransport::new(&test_config()).unwrap();
		assert_eq!(transport.from_address, "reports@school.example.com");
	}

	#[test]
	fn test_invalid_from_address_rejected() {
		let mut config = test_config();
		config.from_address = "not-an-address".into();
		assert!(SmtpMailTransport::new(&config).is_err());
	}

	#[test]
	fn test_message_ids_are_unique_and_carry_domain() {
		let transport = SmtpMailTransport::new(&test_config()).unwrap();
		let a = transport.next_message_id();
		let b = transport.next_message_id();
		assert_ne!(a, b);
		assert!(a.ends_with("@school.example.com"));
	}
}

// vim: ts=4
