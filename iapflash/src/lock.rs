//! Exclusive access to the serial hardware.
//!
//! A download holds the lock from opening the port until the session has
//! closed it. The port watcher only enumerates while it can take the lock
//! without waiting, so it never touches the device mid-transfer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

/// Cloneable handle to the single serial-port guard.
#[derive(Debug, Clone, Default)]
pub struct PortLock(Arc<Mutex<()>>);

/// Held while the port is in use. Dropping it releases the lock.
#[derive(Debug)]
pub struct PortGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

impl PortLock {
    /// Create a new, unlocked guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the port is free.
    pub fn acquire(&self) -> PortGuard<'_> {
        PortGuard(self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Take the port if it is free right now.
    pub fn try_acquire(&self) -> Option<PortGuard<'_>> {
        match self.0.try_lock() {
            Ok(guard) => Some(PortGuard(guard)),
            Err(TryLockError::Poisoned(poisoned)) => Some(PortGuard(poisoned.into_inner())),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}
