//! Process-wide dispatcher instance.

use std::sync::{Arc, OnceLock};

use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, Result};

static INSTANCE: OnceLock<Arc<Dispatcher>> = OnceLock::new();

/// Install `dispatcher` as the process-wide instance.
///
/// # Errors
///
/// [`DispatchError::AlreadyInitialized`] if an instance is already set.
pub fn initialize(dispatcher: Arc<Dispatcher>) -> Result<Arc<Dispatcher>> {
    INSTANCE
        .set(Arc::clone(&dispatcher))
        .map_err(|_| DispatchError::AlreadyInitialized)?;
    tracing::info!("Dispatcher initialized");
    Ok(dispatcher)
}

/// The process-wide instance.
///
/// # Errors
///
/// [`DispatchError::NotInitialized`] before [`initialize`] has run.
pub fn instance() -> Result<Arc<Dispatcher>> {
    INSTANCE.get().cloned().ok_or(DispatchError::NotInitialized)
}
