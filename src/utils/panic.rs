use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

/// 由 panic 转换而来的错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("panic recovered: {message}")]
pub struct PanicError {
    pub message: String,
}

/// 将 panic 负载转换为错误，并连同调用栈写入日志
pub fn panic_to_error(payload: Box<dyn Any + Send>) -> PanicError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };

    let stack = Backtrace::force_capture();
    tracing::error!(panic = %message, stack = %stack, "[Recovery] panic recovered");

    PanicError { message }
}

/// 执行 future，将其中的 panic 转换为 [`PanicError`]
pub async fn catch_panic<F>(fut: F) -> Result<F::Output, PanicError>
where
    F: Future,
{
    AssertUnwindSafe(fut).catch_unwind().await.map_err(panic_to_error)
}
