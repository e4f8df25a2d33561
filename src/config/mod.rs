//! # Configuration
//!
//! Process-level settings loaded from environment variables, optionally overridden
//! by command-line flags.
//!
//! - `controller`: settings shared by the reconcilers and the admission server

pub mod controller;

pub use controller::*;
