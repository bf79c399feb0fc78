//! Registry service module
//!
//! This module contains the service registry implementation split into logical components:
//! - `types`: Service record and key types
//! - `codec`: Key-space layout and record serialization
//! - `service`: Registration, deregistration and queries
//! - `watcher`: Change notification on top of store watches

pub mod codec;
pub mod error;
pub mod service;
pub mod types;
pub mod watcher;

// Re-export public types for easier access
pub use codec::{DEFAULT_KEY_PREFIX, KeyCodec};
pub use error::{KeyError, RegistryError};
pub use service::Registry;
pub use types::{ServiceKey, ServiceRecord, Services};
