//! Lock types shared across the kernel. `parking_lot` locks do not poison.

pub use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use std::sync::Arc;
