//! Process configuration, read from the environment at startup.

use crate::prelude::*;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SmtpTlsMode {
	None,
	#[default]
	StartTls,
	Tls,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
	pub host: String,
	pub port: u16,
	pub username: Option<String>,
	pub password: Option<String>,
	pub from_address: String,
	pub from_name: Option<String>,
	pub tls_mode: SmtpTlsMode,
	pub timeout_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
	pub listen: String,
	pub db_dir: String,
	pub smtp: SmtpConfig,
	/// Backoff bounds in seconds for transient send failures.
	pub retry_wait_min_max: (u64, u64),
	/// Total attempt budget per delivery, first attempt included.
	pub max_attempts: u16,
}

fn env_opt(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> GpResult<T> {
	match env_opt(name) {
		Some(v) => {
			v.parse().map_err(|_| Error::ConfigError(format!("invalid value for {name}: {v}")))
		}
		None => Ok(default),
	}
}

impl Config {
	/// Read configuration from the environment. Only `SMTP_HOST` and
	/// `SMTP_FROM_ADDRESS` are mandatory; everything else has a default.
	pub fn from_env() -> GpResult<Self> {
		let tls_mode = match env_opt("SMTP_TLS").as_deref() {
			None | Some("starttls") => SmtpTlsMode::StartTls,
			Some("none") => SmtpTlsMode::None,
			Some("tls") => SmtpTlsMode::Tls,
			Some(other) => {
				return Err(Error::ConfigError(format!(
					"invalid value for SMTP_TLS: {other} (expected none, starttls or tls)"
				)));
			}
		};

		Ok(Self {
			listen: env_opt("LISTEN").unwrap_or_else(|| "0.0.0.0:1341".into()),
			db_dir: env_opt("DB_DIR").unwrap_or_else(|| "./data".into()),
			smtp: SmtpConfig {
				host: env_opt("SMTP_HOST")
					.ok_or(Error::ConfigError("SMTP_HOST is required".into()))?,
				port: env_parse("SMTP_PORT", 587)?,
				username: env_opt("SMTP_USERNAME"),
				password: env_opt("SMTP_PASSWORD"),
				from_address: env_opt("SMTP_FROM_ADDRESS")
					.ok_or(Error::ConfigError("SMTP_FROM_ADDRESS is required".into()))?,
				from_name: env_opt("SMTP_FROM_NAME"),
				tls_mode,
				timeout_seconds: env_parse("SMTP_TIMEOUT_SECONDS", 30)?,
			},
			retry_wait_min_max: (
				env_parse("RETRY_WAIT_MIN_SECONDS", 60)?,
				env_parse("RETRY_WAIT_MAX_SECONDS", 3600)?,
			),
			max_attempts: env_parse("MAX_SEND_ATTEMPTS", 3)?,
		})
	}
}


// vim: ts=4
