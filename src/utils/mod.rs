//! Small stateless helpers used by host processes around the registry.

pub mod ip;
pub mod panic;
pub mod price;
pub mod request_id;
pub mod version;

pub use ip::{ClientIp, IpError, Ipv4Network, interface_addrs};
pub use panic::{PanicError, catch_panic, panic_to_error};
pub use price::{PriceCodec, PriceError};
pub use request_id::{REQUEST_ID_LEN, RequestIdError, RequestIdGenerator};
pub use version::version_to_number;
