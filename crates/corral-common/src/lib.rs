//! # Corral Common
//!
//! Shared types, errors, and constants used across Corral components.
//!
//! ## Modules
//! - `types` - Node directory data model (KnownHost, Cluster, AuthIdentity, etc.)
//! - `error` - Common error taxonomy
//! - `constants` - Ports, endpoint names, and defaults

pub mod constants;
pub mod error;
pub mod types;

pub use error::CorralError;
pub use types::*;
