use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::runtime::{Handle, Runtime};

use crate::error::RelayError;

static SHARED_RUNTIME: OnceCell<Arc<Runtime>> = OnceCell::new();

/// Resolve a runtime handle for spawning session tasks. Prefers the ambient
/// runtime when called from async code; otherwise lazily builds one shared
/// multi-thread runtime for the whole process.
pub(crate) fn handle() -> Result<Handle, RelayError> {
    if let Ok(handle) = Handle::try_current() {
        return Ok(handle);
    }

    let runtime = SHARED_RUNTIME.get_or_try_init(|| {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();
        builder.thread_name("relay-rt");
        match builder.build() {
            Ok(rt) => Ok(Arc::new(rt)),
            Err(e) => Err(RelayError::Runtime(format!(
                "Failed to create Tokio runtime: {}",
                e
            ))),
        }
    })?;

    Ok(runtime.handle().clone())
}
