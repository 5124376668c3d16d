//! Outbound adapters implementing domain ports.
//!
//! - **memory**: in-process database and identity service used by tests and
//!   the walkthrough binary

pub mod memory;
