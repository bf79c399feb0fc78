//! Client-side service registry on top of a coordination store.
//!
//! Processes announce themselves with [`Registry::register_service`] (bound to a
//! TTL lease), discover peers with the `get_services_*` queries and follow
//! membership changes with [`Registry::watch_service_change`]. The store is
//! reached only through [`CoordinationStore`]; [`EtcdStore`] talks to an etcd v3
//! cluster and [`MemoryStore`] is an in-process implementation.

pub mod config;
pub mod services;
pub mod telemetry;
pub mod utils;

pub use config::{
    Config, ConfigError, EtcdConfig, LogConfig, LogFormat, LogRotation, RegistryConfig,
};
pub use services::registry::{
    DEFAULT_KEY_PREFIX, KeyCodec, KeyError, Registry, RegistryError, ServiceKey, ServiceRecord,
    Services,
};
pub use services::store::{
    CoordinationStore, EtcdStore, EventKind, KeyValue, LeaseId, MemoryStore, StoreError, TxnOp,
    TxnResponse, WatchEvent, WatchResponse, WatchStream,
};
