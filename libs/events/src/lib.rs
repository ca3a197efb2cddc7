//! # drainhook-events
//!
//! Lifecycle hook notification types for the drainhook workspace.
//!
//! ## Design Principles
//!
//! - Notifications are immutable once decoded
//! - Only the terminating transition is actionable; every other transition
//!   (launching, hook test messages, unknown values) is informational
//! - Decoding is pure and repeatable, since the queue may deliver the same
//!   body more than once
//!
//! ## Decoding
//!
//! [`decode_notification`] accepts either the raw lifecycle payload or a
//! pub/sub envelope wrapping it, and rejects actionable payloads missing the
//! fields needed to complete the lifecycle action.

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
