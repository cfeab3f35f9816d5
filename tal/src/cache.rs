// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-cycle access to the local repository.
//!
//! The rsync/RRDP transport that populates the local repository is an
//! external collaborator; what the pipeline needs from it is only "give me
//! the local copy of this TAL URI". A [`CycleCache`] is created for one TAL
//! at cycle start and dropped with it at cycle end.

use crate::error::Error;
use crate::TalUri;
use slog::{debug, Logger};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root of the local repository the fetcher maintains. Each transport
    /// keeps its own subtree (`rsync/`, `https/`).
    pub local_repository: PathBuf,

    pub rsync_enabled: bool,
    pub rrdp_enabled: bool,

    /// Offline mode never asks the transport for anything; only the local
    /// copies are consulted. Since the transport runs outside this
    /// process, the flag is advisory here and recorded for logging.
    pub offline: bool,
}

/// The cache handle one validation worker holds for the duration of one
/// cycle.
pub struct CycleCache {
    tal_name: String,
    config: CacheConfig,
    log: Logger,
}

impl CycleCache {
    pub fn new(tal_name: &str, config: CacheConfig, log: Logger) -> Self {
        Self {
            tal_name: tal_name.to_string(),
            config,
            log,
        }
    }

    /// Resolve a TAL URI to its local copy. Fails if the URI's scheme is
    /// disabled by configuration or nothing has been fetched for it yet.
    pub fn resolve(&self, uri: &TalUri) -> Result<PathBuf, Error> {
        match uri {
            TalUri::Rsync(_) if !self.config.rsync_enabled => {
                return Err(Error::SchemeDisabled(uri.to_string()));
            }
            TalUri::Https(_) if !self.config.rrdp_enabled => {
                return Err(Error::SchemeDisabled(uri.to_string()));
            }
            _ => {}
        }

        let relative = uri_relative_path(uri)?;
        let path = self
            .config
            .local_repository
            .join(uri.scheme())
            .join(relative);
        if !path.is_file() {
            return Err(Error::NotCached(uri.to_string()));
        }

        debug!(self.log, "resolved TAL URI";
            "tal" => &self.tal_name,
            "uri" => uri.to_string(),
            "path" => path.display().to_string(),
            "offline" => self.config.offline,
        );
        Ok(path)
    }
}

/// Map `scheme://host/some/path` to `host/some/path`, refusing anything
/// that would escape the repository root.
fn uri_relative_path(uri: &TalUri) -> Result<PathBuf, Error> {
    let rest = uri
        .as_str()
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    if rest.is_empty() {
        return Err(Error::DubiousUri(uri.to_string()));
    }
    for component in Path::new(rest).components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(Error::DubiousUri(uri.to_string())),
        }
    }
    Ok(PathBuf::from(rest))
}
