// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io {0}")]
    Io(#[from] std::io::Error),

    #[error("TAL has non-rsync/https URI: {0}")]
    UnsupportedUriScheme(String),

    #[error("empty or blank line before the end of the URI section")]
    NoUris,

    #[error("the TAL ends prematurely at line '{0}'")]
    PrematureEnd(String),

    #[error("the TAL seems to be missing the public key")]
    MissingPublicKey,

    #[error("cannot decode the public key: {0}")]
    BadPublicKey(#[from] base64::DecodeError),

    #[error("URI scheme disabled by configuration: {0}")]
    SchemeDisabled(String),

    #[error("no cached copy of {0}")]
    NotCached(String),

    #[error("refusing dubious URI: {0}")]
    DubiousUri(String),

    #[error("no TAL files found in {0}")]
    NoTals(PathBuf),

    #[error("none of the URIs of TAL '{0}' yielded a successful traversal")]
    TalExhausted(String),

    #[error("validation worker for '{0}' panicked")]
    WorkerPanicked(String),

    #[error(transparent)]
    Walk(#[from] crate::walk::WalkError),
}
