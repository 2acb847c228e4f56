//! Per-entity exclusivity lock.
//!
//! Acquiring the lock yields a guard, and every mutating test file operation
//! is a method on that guard, so "caller must hold the lock" is checked by the
//! compiler rather than at runtime. A poisoned mutex means a thread panicked
//! mid-operation; the entity state can no longer be trusted and the error is
//! fatal.

use std::sync::{Mutex, MutexGuard, TryLockError};

use crate::error::{Result, VerifyError};

/// Mutex around the mutable half of an entity, named for diagnostics.
#[derive(Debug)]
pub struct EntityLock<T> {
    name: String,
    inner: Mutex<T>,
}

impl<T> EntityLock<T> {
    pub fn new(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(value),
        }
    }

    /// Blocking acquire.
    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        self.inner.lock().map_err(|_| self.poisoned())
    }

    /// Non-blocking acquire. `Ok(None)` means someone else holds it.
    pub fn try_lock(&self) -> Result<Option<MutexGuard<'_, T>>> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(_)) => Err(self.poisoned()),
        }
    }

    /// Whether another guard is currently alive.
    pub fn is_locked(&self) -> Result<bool> {
        self.try_lock().map(|guard| guard.is_none())
    }

    fn poisoned(&self) -> VerifyError {
        VerifyError::LockPoisoned {
            name: self.name.clone(),
        }
    }
}
