// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The periodic validation driver.
//!
//! One thread owns the validation schedule and the database's write side:
//! run a cycle, install the result, tell routers, sleep, repeat. A failed
//! cycle changes nothing; the previous snapshot stays current.

use crate::log::dlog;
use rtr::server::Server;
use slog::Logger;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tal::pipeline::PipelineConfig;
use tal::walk::TreeWalker;
use vdb::Db;

/// How often a sleeping driver checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(500);

pub struct DriverConfig {
    pub validation_interval: Duration,
    pub pipeline: PipelineConfig,
}

pub fn run<W: TreeWalker + 'static>(
    config: DriverConfig,
    db: Db,
    walker: Arc<W>,
    server: Arc<Server>,
    shutdown: Arc<AtomicBool>,
    started: Sender<()>,
    log: Logger,
) {
    let mut started = Some(started);
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        // Signal that the first cycle is underway so the RTR listener can
        // begin accepting.
        if let Some(tx) = started.take() {
            let _ = tx.send(());
        }

        let cycle_start = Instant::now();
        dlog!(log, info, "starting validation cycle");
        match tal::pipeline::run_cycle(&config.pipeline, &walker, &log) {
            Ok(table) => match db.install(table) {
                Ok(report) => {
                    dlog!(log, info, "validation cycle complete";
                        "serial" => report.serial,
                        "changed" => !report.delta_is_empty,
                        "elapsed_ms" =>
                            cycle_start.elapsed().as_millis() as u64
                    );
                    if !report.delta_is_empty {
                        server.notify(report.serial);
                    }
                }
                Err(e) => {
                    // Shutdown raced the install; the old snapshot stays.
                    dlog!(log, warn, "snapshot install failed: {e}");
                }
            },
            Err(e) => {
                dlog!(log, warn, "validation cycle discarded: {e}");
            }
        }

        if !sleep_polled(config.validation_interval, &shutdown) {
            break;
        }
    }

    db.shutdown();
    dlog!(log, info, "validation driver stopped");
}

/// Sleep for `total`, waking periodically to honor shutdown. Returns false
/// if shutdown was flagged.
fn sleep_polled(total: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        std::thread::sleep(SHUTDOWN_POLL.min(remaining));
    }
}
