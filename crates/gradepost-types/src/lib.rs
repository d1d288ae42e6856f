//! Shared types and adapter traits for the Gradepost delivery service.
//!
//! This crate contains the foundational types shared between the server
//! crate and the storage adapter implementations: the delivery-log row
//! types and state machine, the `DeliveryAdapter` trait, and the common
//! error type. Extracting these into a separate crate allows adapter
//! crates to compile in parallel with the server's feature modules.

pub mod delivery_adapter;
pub mod error;
pub mod mail_transport;
pub mod prelude;
pub mod template;
pub mod types;

// vim: ts=4
