//! Delivery-status webhook
//!
//! Email providers post delivery and bounce events here. The endpoint is
//! deliberately forgiving: malformed payloads, unknown addresses and invalid
//! transitions are all answered with 200 and `{"status":"ignored"}` so the
//! provider never retries an event we can do nothing with.

use axum::{Json, body::Bytes, extract::State};
use serde_json::{Value, json};

use crate::prelude::*;
use gradepost_types::delivery_adapter::{DeliveryLog, DeliveryLogPatch, DeliveryStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
	Delivered,
	Bounced,
}

#[derive(Debug)]
struct ParsedEvent {
	event: WebhookEvent,
	address: String,
	message_id: Option<String>,
	reason: Option<String>,
}

fn str_field<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a str> {
	keys.iter().find_map(|k| payload.get(k).and_then(Value::as_str))
}

/// Providers disagree on field names, so we accept the common aliases and
/// normalize the event type by substring.
fn parse_event(payload: &Value) -> Option<ParsedEvent> {
	let kind = str_field(payload, &["event", "type", "event-type", "status"])?.to_lowercase();
	let event = if kind.contains("deliver") {
		WebhookEvent::Delivered
	} else if kind.contains("bounce") || kind.contains("dropped") {
		WebhookEvent::Bounced
	} else {
		return None;
	};

	let address = str_field(payload, &["email", "recipient", "address"])?.to_string();
	let message_id = str_field(payload, &["messageId", "message_id", "smtp-id", "sg_message_id"])
		.map(|id| id.trim_start_matches('<').trim_end_matches('>').to_string());
	let reason =
		str_field(payload, &["reason", "error", "description"]).map(|r| r.to_string());

	Some(ParsedEvent { event, address, message_id, reason })
}

/// POST /report-cards/email-webhook
pub async fn post_webhook(State(app): State<App>, body: Bytes) -> Json<Value> {
	match handle(&app, &body).await {
		Ok(true) => Json(json!({ "status": "updated" })),
		Ok(false) => Json(json!({ "status": "ignored" })),
		Err(e) => {
			warn!("Webhook processing failed: {}", e);
			Json(json!({ "status": "ignored" }))
		}
	}
}

async fn handle(app: &App, body: &[u8]) -> GpResult<bool> {
	let payload: Value = match serde_json::from_slice(body) {
		Ok(payload) => payload,
		Err(e) => {
			debug!("Ignoring malformed webhook payload: {}", e);
			return Ok(false);
		}
	};
	let Some(event) = parse_event(&payload) else {
		debug!("Ignoring unrecognized webhook event");
		return Ok(false);
	};

	let Some(log) = app
		.delivery_adapter
		.find_log_for_webhook(&event.address, event.message_id.as_deref())
		.await?
	else {
		debug!("No delivery log matches webhook for {}", event.address);
		return Ok(false);
	};

	apply(app, log, &event).await
}

async fn apply(app: &App, log: DeliveryLog, event: &ParsedEvent) -> GpResult<bool> {
	let target = match event.event {
		WebhookEvent::Delivered => DeliveryStatus::Delivered,
		WebhookEvent::Bounced => DeliveryStatus::Bounced,
	};

	let mut current = log;
	let mut conflicts = 0;
	let mut waits = 0;
	loop {
		// duplicate provider events are fine
		if current.status == target {
			return Ok(true);
		}
		if !current.status.can_transition_to(target) {
			// A fast provider can confirm before the worker's Sent write
			// lands; the row is mid-send, so wait for it briefly instead of
			// dropping an event that will not be redelivered.
			if current.status == DeliveryStatus::Queued && waits < 4 {
				waits += 1;
				tokio::time::sleep(std::time::Duration::from_millis(100)).await;
				current = app.delivery_adapter.read_log(current.log_id).await?;
				continue;
			}
			debug!(
				"Delivery log {} is {}, ignoring {} webhook",
				current.log_id, current.status, target
			);
			return Ok(false);
		}

		let patch = DeliveryLogPatch {
			status: Patch::Value(target),
			error: match (target, &event.reason) {
				(DeliveryStatus::Bounced, Some(reason)) => Patch::Value(reason.as_str().into()),
				_ => Patch::Undefined,
			},
			..Default::default()
		};
		if app
			.delivery_adapter
			.update_log(current.log_id, Some(current.updated_at), &patch)
			.await?
		{
			info!("Delivery log {} marked {} by webhook", current.log_id, target);
			return Ok(true);
		}
		conflicts += 1;
		if conflicts >= 3 {
			return Err(Error::Internal(format!(
				"delivery log {} kept changing concurrently",
				current.log_id
			)));
		}
		current = app.delivery_adapter.read_log(current.log_id).await?;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_sendgrid_style_event() {
		let payload = json!({
			"event": "delivered",
			"email": "kid@example.com",
			"sg_message_id": "<1700000000.1@school.example>",
		});
		let parsed = parse_event(&payload).unwrap();
		assert_eq!(parsed.event, WebhookEvent::Delivered);
		assert_eq!(parsed.address, "kid@example.com");
		assert_eq!(parsed.message_id.as_deref(), Some("1700000000.1@school.example"));
		assert!(parsed.reason.is_none());
	}

	#[test]
	fn test_parse_generic_bounce_event() {
		let payload = json!({
			"type": "hard_bounce",
			"recipient": "kid@example.com",
			"message_id": "abc@school.example",
			"reason": "mailbox does not exist",
		});
		let parsed = parse_event(&payload).unwrap();
		assert_eq!(parsed.event, WebhookEvent::Bounced);
		assert_eq!(parsed.message_id.as_deref(), Some("abc@school.example"));
		assert_eq!(parsed.reason.as_deref(), Some("mailbox does not exist"));
	}

	#[test]
	fn test_parse_rejects_unknown_events() {
		assert!(parse_event(&json!({ "event": "open", "email": "kid@example.com" })).is_none());
		assert!(parse_event(&json!({ "email": "kid@example.com" })).is_none());
		assert!(parse_event(&json!({ "event": "delivered" })).is_none());
		assert!(parse_event(&json!("not an object")).is_none());
	}
}

// vim: ts=4
