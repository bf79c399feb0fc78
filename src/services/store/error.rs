use super::types::LeaseId;

/// 协调存储错误类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Lease not found: {0}")]
    LeaseNotFound(LeaseId),
    #[error("Store closed")]
    Closed,
}
