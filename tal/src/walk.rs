// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The seam to the object validation engine.
//!
//! Walking a certificate tree means parsing and cryptographically
//! verifying X.509/CMS objects, which lives outside this crate. The
//! pipeline hands the engine a root certificate and a [`PayloadHandler`];
//! the engine reports every validated ROA and router key through the
//! callbacks. Once the root certificate has validated, descendant failures
//! are the engine's to log and isolate; only a rejected root (or an engine
//! breakdown) fails the walk.

use crate::Tal;
use std::path::Path;
use vdb::{DbTable, Prefix, Prefix4, Prefix6, Vrp};

/// Callbacks fed with validated payloads during a traversal.
pub trait PayloadHandler {
    fn handle_roa_v4(&mut self, asn: u32, prefix: Prefix4, max_length: u8);
    fn handle_roa_v6(&mut self, asn: u32, prefix: Prefix6, max_length: u8);
    fn handle_router_key(&mut self, asn: u32, ski: [u8; 20], spki: Vec<u8>);
}

impl PayloadHandler for DbTable {
    fn handle_roa_v4(&mut self, asn: u32, prefix: Prefix4, max_length: u8) {
        self.add_origin(Vrp {
            asn,
            prefix: Prefix::V4(prefix),
            max_length,
        });
    }

    fn handle_roa_v6(&mut self, asn: u32, prefix: Prefix6, max_length: u8) {
        self.add_origin(Vrp {
            asn,
            prefix: Prefix::V6(prefix),
            max_length,
        });
    }

    fn handle_router_key(&mut self, asn: u32, ski: [u8; 20], spki: Vec<u8>) {
        self.add_router_key(vdb::RouterKey { asn, ski, spki });
    }
}

#[derive(thiserror::Error, Debug)]
pub enum WalkError {
    /// The certificate at the TAL URI did not validate against the TAL's
    /// public key. The whole tree is untrusted.
    #[error("root certificate rejected: {0}")]
    RootInvalid(String),

    /// The engine itself failed before a verdict on the root.
    #[error("validation engine failure: {0}")]
    Engine(String),
}

/// One certificate-tree traversal, implemented by the object validation
/// engine.
pub trait TreeWalker: Send + Sync {
    /// Walk the tree rooted at the certificate `root` (the local copy of
    /// one of `tal`'s URIs), reporting validated payloads through
    /// `handler`.
    fn walk(
        &self,
        root: &Path,
        tal: &Tal,
        handler: &mut dyn PayloadHandler,
    ) -> Result<(), WalkError>;
}

#[cfg(test)]
pub mod test {
    //! A scripted walker standing in for the engine.

    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use vdb::RouterKey;

    #[derive(Default)]
    pub struct StaticWalker {
        /// ROAs to emit, keyed by TAL file name.
        pub roas: BTreeMap<String, Vec<(u32, Prefix, u8)>>,

        /// Router keys to emit, keyed by TAL file name.
        pub keys: BTreeMap<String, Vec<RouterKey>>,

        /// TAL file names whose root certificate is scripted to fail.
        pub fail: BTreeSet<String>,
    }

    impl TreeWalker for StaticWalker {
        fn walk(
            &self,
            _root: &Path,
            tal: &Tal,
            handler: &mut dyn PayloadHandler,
        ) -> Result<(), WalkError> {
            if self.fail.contains(tal.file_name()) {
                return Err(WalkError::RootInvalid(
                    "scripted failure".into(),
                ));
            }
            for (asn, prefix, max_length) in
                self.roas.get(tal.file_name()).into_iter().flatten()
            {
                match prefix {
                    Prefix::V4(p) => {
                        handler.handle_roa_v4(*asn, *p, *max_length)
                    }
                    Prefix::V6(p) => {
                        handler.handle_roa_v6(*asn, *p, *max_length)
                    }
                }
            }
            for key in self.keys.get(tal.file_name()).into_iter().flatten()
            {
                handler.handle_router_key(
                    key.asn,
                    key.ski,
                    key.spki.clone(),
                );
            }
            Ok(())
        }
    }
}
