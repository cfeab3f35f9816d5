// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The validated-payload database (vdb).
//!
//! This is the in-memory database at the center of the relying party. The
//! validation pipeline installs a fresh table of validated ROA payloads and
//! router keys at the end of each successful cycle; RTR connection handlers
//! read the current snapshot and the retained delta history to answer router
//! queries. All state is volatile and rebuilt from scratch on process start.

pub mod db;
pub mod error;
pub mod types;

pub use db::{Db, DeltaStatus, InstallReport, Retention};
pub use types::*;

#[cfg(test)]
mod proptest;

/// Default upper bound on the number of retained deltas.
pub const DEFAULT_MAX_DELTAS: usize = 64;
