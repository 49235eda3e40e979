//! # aim-types
//!
//! Shared domain types used across the AIM workspace: identity and trust
//! records, messages and their delivery state, signed wire payloads, and
//! notification events. Structures here are plain data with their canonical
//! signing payloads; all cryptographic verification lives in the owning
//! crates.

pub mod events;
pub mod identity;
pub mod message;
pub mod wire;

/// Identity id prefix, shared with `aim-crypto`.
pub const IDENTITY_PREFIX: &str = "aim1";

/// Device id prefix.
pub const DEVICE_PREFIX: &str = "dev1_";

/// Session id prefix.
pub const SESSION_PREFIX: &str = "sess1_";

/// Message id prefix.
pub const MESSAGE_PREFIX: &str = "msg_";

/// Receipt wire id prefix.
pub const RECEIPT_PREFIX: &str = "rcpt_";
