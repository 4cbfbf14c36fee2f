//! Extension trait to ignore mutex poisoning.
//!
//! Shared state in this crate is plain values (session slot, recorded events) that stay valid
//! after a panic elsewhere, so a poisoned lock is simply recovered.

use std::sync::{Mutex, MutexGuard};

pub trait IgnorePoison<T> {
    /// Locks the mutex, ignoring poison.
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> IgnorePoison<T> for Mutex<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| e.into_inner())
    }
}
