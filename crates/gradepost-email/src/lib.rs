//! Report-card email delivery with SMTP and Handlebars templates
//!
//! This crate provides:
//! - SMTP sending with lettre, mapped onto the service's transient /
//!   permanent error taxonomy
//! - Template rendering with variable substitution (Handlebars), with a
//!   built-in default template when a class has none stored

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod fake;
pub mod template;
pub mod transport;

pub use fake::FakeMailTransport;
pub use template::TemplateEngine;
pub use transport::SmtpMailTransport;

mod prelude;

// vim: ts=4
