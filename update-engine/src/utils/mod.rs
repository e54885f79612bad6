//! Utility modules for the update engine.

pub mod errors;
pub mod hash;
pub mod ini_file;
pub mod logger;

pub use errors::{Result, TransportError, UpdateError};
pub use hash::FileHash;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
