//! Tokio runtime helpers for driving the async stores from blocking code.
use std::future::Future;

use snafu::prelude::*;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{BlockingInRuntimeSnafu, RuntimeSnafu, StoreResult};

pub(crate) fn new_runtime() -> StoreResult<Runtime> {
    Builder::new_multi_thread()
        .thread_name("market-store")
        .enable_all()
        .build()
        .context(RuntimeSnafu)
}

/// Run `fut` to completion on `rt`, blocking the calling thread.
///
/// Fails instead of panicking when called from inside a Tokio runtime.
pub(crate) fn run_blocking<T, F>(rt: &Runtime, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    ensure!(Handle::try_current().is_err(), BlockingInRuntimeSnafu);
    rt.block_on(fut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn run_blocking_works() -> Result<(), StoreError> {
        let rt = new_runtime()?;
        let v = run_blocking(&rt, async { Ok(123) })?;
        assert_eq!(v, 123);
        Ok(())
    }

    #[test]
    fn nested_use_is_an_error() -> Result<(), StoreError> {
        let rt = new_runtime()?;
        let inner = new_runtime()?;
        let res = rt.block_on(async { run_blocking(&inner, async { Ok(1) }) });
        assert!(matches!(res, Err(StoreError::BlockingInRuntime)));
        // Dropping a runtime inside another one panics, so leave it here.
        drop(inner);
        Ok(())
    }
}
