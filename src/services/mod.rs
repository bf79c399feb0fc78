pub mod registry;
pub mod store;

pub use registry::{KeyCodec, Registry, RegistryError, ServiceKey, ServiceRecord, Services};
pub use store::{CoordinationStore, EtcdStore, MemoryStore, StoreError};
