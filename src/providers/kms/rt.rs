use once_cell::sync::Lazy;
use tokio::runtime::{self, Handle, Runtime};

use crate::error::{Result, SealError};

static RUNTIME: Lazy<std::io::Result<Runtime>> = Lazy::new(|| {
    runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("sealvault-kms-rt")
        .build()
});

/// Runs a future to completion from synchronous code without nesting runtimes.
pub(crate) fn sync_await<F>(future: F) -> Result<F::Output>
where
    F: std::future::Future,
{
    if let Ok(handle) = Handle::try_current() {
        return Ok(tokio::task::block_in_place(|| handle.block_on(future)));
    }
    match RUNTIME.as_ref() {
        Ok(runtime) => Ok(runtime.block_on(future)),
        Err(error) => Err(SealError::RemoteUnavailable(format!(
            "failed to start KMS runtime: {error}"
        ))),
    }
}
