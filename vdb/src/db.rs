// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The versioned payload store.
//!
//! The store keeps exactly one current [`Snapshot`] plus a bounded history
//! of [`Delta`]s keyed by the serial number that produced them. The snapshot
//! is published through an atomically swapped `Arc`: a reader that has begun
//! streaming a snapshot keeps its handle and is unaffected by concurrent
//! installs. Only the validation driver writes; RTR connection handlers are
//! pure readers.

use crate::error::Error;
use crate::types::*;
use chrono::{DateTime, Utc};
use rand::Rng;
use rp_common::{lock, read_lock, write_lock};
use slog::{debug, Logger};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Bounds on the retained delta history. Deltas older than `max_age` or
/// beyond the newest `max_count` entries are dropped at install time.
#[derive(Debug, Copy, Clone)]
pub struct Retention {
    pub max_age: chrono::Duration,
    pub max_count: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            // The RFC 8210 default expire interval.
            max_age: chrono::Duration::seconds(7200),
            max_count: crate::DEFAULT_MAX_DELTAS,
        }
    }
}

/// A fully populated, immutable view of the validated data at one serial.
#[derive(Debug)]
pub struct Snapshot {
    serial: u32,
    origins: Vec<Vrp>,
    router_keys: Vec<RouterKey>,
}

impl Snapshot {
    fn from_table(serial: u32, table: DbTable) -> Self {
        let (origins, router_keys) = table.into_parts();
        Self {
            serial,
            origins,
            router_keys,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn origin_count(&self) -> usize {
        self.origins.len()
    }

    pub fn router_key_count(&self) -> usize {
        self.router_keys.len()
    }
}

/// The difference between two adjacent snapshots. Announcements and
/// withdrawals are disjoint by construction.
#[derive(Debug)]
pub struct Delta {
    serial: u32,
    created: DateTime<Utc>,
    announced: Vec<Payload>,
    withdrawn: Vec<Payload>,
}

impl Delta {
    /// Compute the delta that turns `prior` into `next`. A missing prior
    /// snapshot diffs against the empty set.
    fn between(prior: Option<&Snapshot>, next: &Snapshot) -> Self {
        static EMPTY_V: Vec<Vrp> = Vec::new();
        static EMPTY_K: Vec<RouterKey> = Vec::new();
        let (old_origins, old_keys) = match prior {
            Some(p) => (&p.origins, &p.router_keys),
            None => (&EMPTY_V, &EMPTY_K),
        };

        let mut announced = Vec::new();
        let mut withdrawn = Vec::new();
        diff_sorted(old_origins, &next.origins, &mut announced, &mut withdrawn);
        diff_sorted(
            old_keys,
            &next.router_keys,
            &mut announced,
            &mut withdrawn,
        );

        Self {
            serial: next.serial,
            created: Utc::now(),
            announced,
            withdrawn,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn is_empty(&self) -> bool {
        self.announced.is_empty() && self.withdrawn.is_empty()
    }
}

/// Walk two sorted, deduplicated slices and record what appeared and what
/// vanished.
fn diff_sorted<T>(
    old: &[T],
    new: &[T],
    announced: &mut Vec<Payload>,
    withdrawn: &mut Vec<Payload>,
) where
    T: Ord + Clone,
    Payload: From<T>,
{
    let mut i = 0;
    let mut j = 0;
    while i < old.len() && j < new.len() {
        match old[i].cmp(&new[j]) {
            CmpOrdering::Less => {
                withdrawn.push(old[i].clone().into());
                i += 1;
            }
            CmpOrdering::Greater => {
                announced.push(new[j].clone().into());
                j += 1;
            }
            CmpOrdering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    withdrawn.extend(old[i..].iter().cloned().map(Payload::from));
    announced.extend(new[j..].iter().cloned().map(Payload::from));
}

/// What the store can offer a router that last synchronized at a given
/// serial.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeltaStatus {
    /// Nothing has ever been installed.
    NoDataAvailable,
    /// The full span from the router's serial to the current serial is
    /// retained and composable.
    DiffAvailable,
    /// The router's serial is unknown to the retained history (too old, or
    /// from the future).
    DiffUndetermined,
    /// The router is already at the current serial.
    NoDiff,
}

/// The outcome of a successful install.
#[derive(Debug, Copy, Clone)]
pub struct InstallReport {
    pub serial: u32,

    /// True when the new snapshot is identical to its predecessor. Callers
    /// use this to decide whether routers need a Serial Notify.
    pub delta_is_empty: bool,
}

/// Per-protocol-version session ids, fixed for the process lifetime.
#[derive(Debug, Copy, Clone)]
struct SessionIds {
    v0: u16,
    v1: u16,
}

impl SessionIds {
    fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let v0: u16 = rng.gen();
        let mut v1: u16 = rng.gen();
        while v1 == v0 {
            v1 = rng.gen();
        }
        Self { v0, v1 }
    }
}

/// The central validated-payload store.
#[derive(Clone)]
pub struct Db {
    /// The current snapshot, atomically swapped on install. Readers clone
    /// the inner `Arc` and keep iterating their copy.
    current: Arc<RwLock<Option<Arc<Snapshot>>>>,

    /// Retained deltas keyed by the serial that produced them.
    history: Arc<Mutex<BTreeMap<u32, Arc<Delta>>>>,

    session: SessionIds,

    retention: Retention,

    shutdown: Arc<AtomicBool>,

    log: Logger,
}

impl Db {
    pub fn new(retention: Retention, log: Logger) -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            history: Arc::new(Mutex::new(BTreeMap::new())),
            session: SessionIds::generate(),
            retention,
            shutdown: Arc::new(AtomicBool::new(false)),
            log,
        }
    }

    /// The serial of the most recently installed snapshot, 0 if none.
    pub fn current_serial(&self) -> u32 {
        read_lock!(self.current)
            .as_ref()
            .map(|s| s.serial)
            .unwrap_or(0)
    }

    /// The session id handed to routers speaking the given protocol
    /// version. Constant for the process lifetime; the two versions carry
    /// independent ids.
    pub fn session_id(&self, version: ProtocolVersion) -> u16 {
        match version {
            ProtocolVersion::V0 => self.session.v0,
            ProtocolVersion::V1 => self.session.v1,
        }
    }

    /// A handle on the current snapshot, if any.
    pub fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        read_lock!(self.current).clone()
    }

    /// Flag shutdown. Subsequent installs fail; reads continue to work so
    /// in-flight RTR responses can complete.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Atomically replace the current snapshot with `table`, advancing the
    /// serial and recording the delta against the prior snapshot.
    pub fn install(&self, table: DbTable) -> Result<InstallReport, Error> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }

        let mut current = write_lock!(self.current);
        let prior = current.clone();
        let serial = match prior.as_ref() {
            Some(s) => s.serial.wrapping_add(1),
            None => 1,
        };

        let next = Arc::new(Snapshot::from_table(serial, table));
        let delta = Delta::between(prior.as_deref(), &next);
        let report = InstallReport {
            serial,
            delta_is_empty: delta.is_empty(),
        };

        let retained = {
            let mut history = lock!(self.history);
            history.insert(serial, Arc::new(delta));
            trim_history(&mut history, &self.retention);
            history.len()
        };

        *current = Some(next.clone());
        drop(current);

        debug!(self.log, "installed snapshot";
            "serial" => serial,
            "origins" => next.origin_count(),
            "router_keys" => next.router_key_count(),
            "retained_deltas" => retained,
        );

        Ok(report)
    }

    /// How many deltas the history currently retains.
    pub fn retained_deltas(&self) -> usize {
        lock!(self.history).len()
    }

    /// Classify what can be served to a router that last saw
    /// `client_serial` (`None` for a router with no state).
    pub fn delta_status(&self, client_serial: Option<u32>) -> DeltaStatus {
        let current = match self.current_snapshot() {
            Some(s) => s,
            None => return DeltaStatus::NoDataAvailable,
        };
        let client = match client_serial {
            Some(c) => c,
            None => return DeltaStatus::DiffAvailable,
        };
        if client == current.serial {
            return DeltaStatus::NoDiff;
        }

        let span = current.serial.wrapping_sub(client);
        let history = lock!(self.history);
        if span as usize > history.len() {
            return DeltaStatus::DiffUndetermined;
        }
        let mut serial = client;
        for _ in 0..span {
            serial = serial.wrapping_add(1);
            if !history.contains_key(&serial) {
                return DeltaStatus::DiffUndetermined;
            }
        }
        DeltaStatus::DiffAvailable
    }

    /// Stream the current snapshot as announce-flagged payloads, filtered
    /// to what `version` can carry. Empty when nothing is installed.
    pub fn snapshot_iter(&self, version: ProtocolVersion) -> SnapshotIter {
        SnapshotIter {
            snapshot: self.current_snapshot(),
            version,
            origin_idx: 0,
            key_idx: 0,
        }
    }

    /// Stream the composed difference from `from` (exclusive) to the
    /// current serial (inclusive). Requires that [`Db::delta_status`]
    /// would answer `DiffAvailable` (or `NoDiff`, yielding an empty
    /// stream) for the same serial.
    pub fn delta_iter(
        &self,
        from: u32,
        version: ProtocolVersion,
    ) -> Result<DeltaIter, Error> {
        let current = self.current_snapshot().ok_or(Error::NoData)?;
        let span = current.serial.wrapping_sub(from);
        if span == 0 {
            return Ok(DeltaIter::empty(current.serial));
        }

        let unavailable = Error::DiffUnavailable {
            from,
            current: current.serial,
        };

        let history = lock!(self.history);
        if span as usize > history.len() {
            return Err(unavailable);
        }

        // Fold the retained deltas into net announce/withdraw sets. A
        // record announced and later withdrawn (or vice versa) cancels
        // out, so the result is exactly snapshot(current) minus
        // snapshot(from) and the reverse.
        let mut announced: BTreeSet<Payload> = BTreeSet::new();
        let mut withdrawn: BTreeSet<Payload> = BTreeSet::new();
        let mut serial = from;
        for _ in 0..span {
            serial = serial.wrapping_add(1);
            let delta = match history.get(&serial) {
                Some(d) => d,
                None => return Err(unavailable),
            };
            for p in &delta.announced {
                if !withdrawn.remove(p) {
                    announced.insert(p.clone());
                }
            }
            for p in &delta.withdrawn {
                if !announced.remove(p) {
                    withdrawn.insert(p.clone());
                }
            }
        }

        let items: Vec<(Action, Payload)> = announced
            .into_iter()
            .filter(|p| p.supported_by(version))
            .map(|p| (Action::Announce, p))
            .chain(
                withdrawn
                    .into_iter()
                    .filter(|p| p.supported_by(version))
                    .map(|p| (Action::Withdraw, p)),
            )
            .collect();

        Ok(DeltaIter {
            serial: current.serial,
            items: items.into_iter(),
        })
    }
}

fn trim_history(history: &mut BTreeMap<u32, Arc<Delta>>, retention: &Retention) {
    let now = Utc::now();
    history
        .retain(|_, d| now.signed_duration_since(d.created) <= retention.max_age);
    while history.len() > retention.max_count {
        let oldest = history
            .iter()
            .min_by_key(|(_, d)| d.created)
            .map(|(serial, _)| *serial);
        match oldest {
            Some(serial) => {
                history.remove(&serial);
            }
            None => break,
        }
    }
}

/// Iterator over the current snapshot. Holds its own snapshot handle, so
/// concurrent installs do not disturb an in-progress stream.
pub struct SnapshotIter {
    snapshot: Option<Arc<Snapshot>>,
    version: ProtocolVersion,
    origin_idx: usize,
    key_idx: usize,
}

impl SnapshotIter {
    /// The serial of the snapshot being streamed, 0 when empty.
    pub fn serial(&self) -> u32 {
        self.snapshot.as_ref().map(|s| s.serial).unwrap_or(0)
    }
}

impl Iterator for SnapshotIter {
    type Item = (Action, Payload);

    fn next(&mut self) -> Option<Self::Item> {
        let snap = self.snapshot.as_ref()?;
        if self.origin_idx < snap.origins.len() {
            let vrp = snap.origins[self.origin_idx];
            self.origin_idx += 1;
            return Some((Action::Announce, vrp.into()));
        }
        if self.version.supports_router_keys()
            && self.key_idx < snap.router_keys.len()
        {
            let key = snap.router_keys[self.key_idx].clone();
            self.key_idx += 1;
            return Some((Action::Announce, key.into()));
        }
        None
    }
}

/// Iterator over a composed delta.
pub struct DeltaIter {
    serial: u32,
    items: std::vec::IntoIter<(Action, Payload)>,
}

impl DeltaIter {
    fn empty(serial: u32) -> Self {
        Self {
            serial,
            items: Vec::new().into_iter(),
        }
    }

    /// The serial this delta composes up to.
    pub fn serial(&self) -> u32 {
        self.serial
    }
}

impl Iterator for DeltaIter {
    type Item = (Action, Payload);

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}
