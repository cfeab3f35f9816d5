// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One validation cycle: a worker thread per TAL, joined into one table.
//!
//! Workers share nothing; each owns its TAL parse, its cycle cache, and
//! the table it fills. The cycle either produces a complete merged table
//! or nothing: one failed TAL (no URI yielded a valid root certificate)
//! discards everything, and the caller keeps serving the previous
//! snapshot.

use crate::cache::{CacheConfig, CycleCache};
use crate::error::Error;
use crate::walk::TreeWalker;
use crate::{Tal, TalUri};
use rand::seq::SliceRandom;
use slog::{debug, info, warn, Logger};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::Builder;
use std::time::Instant;
use vdb::DbTable;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory holding the `*.tal` files.
    pub tal_dir: PathBuf,

    pub cache: CacheConfig,

    /// Try each TAL's URIs in random order instead of file order.
    pub shuffle_uris: bool,
}

/// Run one full validation cycle and return the merged table.
pub fn run_cycle<W: TreeWalker + 'static>(
    config: &PipelineConfig,
    walker: &Arc<W>,
    log: &Logger,
) -> Result<DbTable, Error> {
    let tal_files = enumerate_tals(&config.tal_dir)?;

    let mut workers = Vec::new();
    for file in tal_files {
        let name = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tal".into());
        let config = config.clone();
        let walker = walker.clone();
        let worker_log = log.clone();
        let handle = Builder::new()
            .name(format!("tal-{name}"))
            .spawn(move || {
                validate_tal(&file, &config, walker.as_ref(), &worker_log)
            })
            .map_err(Error::Io)?;
        workers.push((name, handle));
    }

    // Wait for all workers. If any tree failed the whole cycle is
    // discarded, but every worker still gets joined first.
    let mut merged = DbTable::new();
    let mut failure: Option<Error> = None;
    for (name, handle) in workers {
        match handle.join() {
            Ok(Ok(table)) => {
                if failure.is_none() {
                    merged.merge(table);
                }
            }
            Ok(Err(e)) => {
                warn!(
                    log,
                    "validation of TAL '{name}' failed: {e}; \
                     discarding this cycle's results"
                );
                if failure.is_none() {
                    failure = Some(e);
                }
            }
            Err(_) => {
                warn!(
                    log,
                    "validation worker for '{name}' panicked; \
                     discarding this cycle's results"
                );
                if failure.is_none() {
                    failure = Some(Error::WorkerPanicked(name));
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(merged),
    }
}

fn enumerate_tals(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "tal").unwrap_or(false)
            && path.is_file()
        {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(Error::NoTals(dir.to_path_buf()));
    }
    files.sort();
    Ok(files)
}

/// One worker: load the TAL, try its URIs until a tree validates, return
/// the filled table.
fn validate_tal<W: TreeWalker>(
    file: &Path,
    config: &PipelineConfig,
    walker: &W,
    log: &Logger,
) -> Result<DbTable, Error> {
    let start = Instant::now();
    let tal = Tal::load(file)?;
    let cache =
        CycleCache::new(tal.file_name(), config.cache.clone(), log.clone());

    let mut uris: Vec<&TalUri> = tal.uris().iter().collect();
    if config.shuffle_uris {
        uris.shuffle(&mut rand::thread_rng());
    }

    for uri in uris {
        let root = match cache.resolve(uri) {
            Ok(root) => root,
            Err(e) => {
                debug!(log, "skipping TAL URI {uri}: {e}");
                continue;
            }
        };

        let mut table = DbTable::new();
        match walker.walk(&root, &tal, &mut table) {
            Ok(()) => {
                info!(log, "TAL tree validated";
                    "tal" => tal.file_name(),
                    "uri" => uri.to_string(),
                    "payloads" => table.len(),
                    "elapsed_ms" => start.elapsed().as_millis() as u64,
                );
                return Ok(table);
            }
            Err(e) => {
                // Whatever the failed walk emitted dies with its table.
                warn!(log, "traversal from {uri} failed: {e}");
            }
        }
    }

    Err(Error::TalExhausted(tal.file_name().to_string()))
}
