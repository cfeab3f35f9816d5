// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Plumbing shared across the relying party crates.

pub mod log;

/// Acquire a `Mutex` guard, panicking with source context if the lock
/// was poisoned.
#[macro_export]
macro_rules! lock {
    ($mutex:expr) => {
        $mutex.lock().unwrap_or_else(|_| {
            panic!("poisoned mutex at {}:{}", file!(), line!())
        })
    };
}

/// Acquire an `RwLock` read guard, panicking with source context if the
/// lock was poisoned.
#[macro_export]
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock.read().unwrap_or_else(|_| {
            panic!("poisoned rwlock (read) at {}:{}", file!(), line!())
        })
    };
}

/// Acquire an `RwLock` write guard, panicking with source context if the
/// lock was poisoned.
#[macro_export]
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock.write().unwrap_or_else(|_| {
            panic!("poisoned rwlock (write) at {}:{}", file!(), line!())
        })
    };
}
