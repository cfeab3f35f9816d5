// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trust Anchor Locators and the per-TAL validation pipeline.
//!
//! A TAL file names the fetch URIs and the public key of one trust anchor.
//! Each validation cycle loads every TAL in the configured directory,
//! walks the certificate tree rooted at the first URI that yields a valid
//! root certificate, and collects the validated payloads into one table
//! per TAL. The object validation engine itself sits behind the
//! [`walk::TreeWalker`] seam.

use base64::Engine;
use std::fmt;
use std::fs;
use std::path::Path;

pub mod cache;
pub mod error;
pub mod pipeline;
pub mod walk;

pub use error::Error;

/// One fetch URI from a TAL. Only rsync and https are meaningful in RPKI.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TalUri {
    Rsync(String),
    Https(String),
}

impl TalUri {
    pub fn parse(s: &str) -> Result<Self, Error> {
        if s.starts_with("rsync://") {
            Ok(TalUri::Rsync(s.to_string()))
        } else if s.starts_with("https://") {
            Ok(TalUri::Https(s.to_string()))
        } else {
            Err(Error::UnsupportedUriScheme(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TalUri::Rsync(s) | TalUri::Https(s) => s,
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            TalUri::Rsync(_) => "rsync",
            TalUri::Https(_) => "https",
        }
    }
}

impl fmt::Display for TalUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed Trust Anchor Locator.
///
/// The file format (RFC 8630): optional `#` comment lines, one or more
/// URI lines, a blank separator line, then the base64 of the trust
/// anchor's SubjectPublicKeyInfo. Both `\n` and `\r\n` line endings are
/// accepted, in any mix.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Tal {
    file_name: String,
    uris: Vec<TalUri>,
    spki: Vec<u8>,
}

impl Tal {
    pub fn load(path: &Path) -> Result<Tal, Error> {
        let content = fs::read_to_string(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::parse(file_name, &content)
    }

    pub fn parse(file_name: String, content: &str) -> Result<Tal, Error> {
        let mut rest = content;

        // Comment section.
        while rest.starts_with('#') {
            match rest.find('\n') {
                Some(nl) => rest = &rest[nl + 1..],
                None => {
                    return Err(Error::PrematureEnd(rest.to_string()));
                }
            }
        }

        // URI section, terminated by a blank line.
        let mut uris = Vec::new();
        let spki_section = loop {
            let Some(nl) = rest.find('\n') else {
                return Err(Error::PrematureEnd(
                    rest.trim_end().to_string(),
                ));
            };
            let line =
                rest[..nl].strip_suffix('\r').unwrap_or(&rest[..nl]);
            let tail = &rest[nl + 1..];
            if line.trim().is_empty() {
                break tail;
            }
            uris.push(TalUri::parse(line.trim())?);
            if tail.is_empty() {
                return Err(Error::MissingPublicKey);
            }
            rest = tail;
        };
        if uris.is_empty() {
            return Err(Error::NoUris);
        }

        // SubjectPublicKeyInfo section, whitespace-insensitive base64.
        let encoded: String = spki_section
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if encoded.is_empty() {
            return Err(Error::MissingPublicKey);
        }
        let spki =
            base64::engine::general_purpose::STANDARD.decode(encoded)?;

        Ok(Self {
            file_name,
            uris,
            spki,
        })
    }

    /// The final path component of the file this TAL was loaded from.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Fetch URIs in file order.
    pub fn uris(&self) -> &[TalUri] {
        &self.uris
    }

    /// The decoded SubjectPublicKeyInfo.
    pub fn spki(&self) -> &[u8] {
        &self.spki
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // "hello world"
    const KEY: &str = "aGVsbG8gd29ybGQ=";

    #[test]
    fn parses_plain_tal() {
        let content = format!(
            "rsync://rpki.example.net/repo/root.cer\n\n{KEY}\n"
        );
        let tal = Tal::parse("example.tal".into(), &content).unwrap();
        assert_eq!(tal.file_name(), "example.tal");
        assert_eq!(tal.uris().len(), 1);
        assert_eq!(tal.uris()[0].scheme(), "rsync");
        assert_eq!(tal.spki(), b"hello world");
    }

    #[test]
    fn parses_comments_and_multiple_uris() {
        let content = format!(
            "# Example registry trust anchor\n\
             # contact: noc@example.net\n\
             https://rpki.example.net/ta/root.cer\n\
             rsync://rpki.example.net/repo/root.cer\n\
             \n\
             {KEY}\n"
        );
        let tal = Tal::parse("example.tal".into(), &content).unwrap();
        assert_eq!(tal.uris().len(), 2);
        assert_eq!(tal.uris()[0].scheme(), "https");
        assert_eq!(tal.uris()[1].scheme(), "rsync");
    }

    #[test]
    fn accepts_crlf_and_mixed_line_endings() {
        let content = format!(
            "# comment\r\n\
             rsync://rpki.example.net/repo/root.cer\r\n\
             https://rpki.example.net/ta/root.cer\n\
             \r\n\
             {KEY}\r\n"
        );
        let tal = Tal::parse("example.tal".into(), &content).unwrap();
        assert_eq!(tal.uris().len(), 2);
        assert_eq!(tal.spki(), b"hello world");
    }

    #[test]
    fn spki_may_wrap_across_lines() {
        let content = "rsync://rpki.example.net/repo/root.cer\n\n\
                       aGVsbG8g\n  d29y\n\tbGQ=\n";
        let tal = Tal::parse("example.tal".into(), content).unwrap();
        assert_eq!(tal.spki(), b"hello world");
    }

    #[test]
    fn rejects_unknown_scheme() {
        let content = format!("ftp://rpki.example.net/root.cer\n\n{KEY}\n");
        assert!(matches!(
            Tal::parse("bad.tal".into(), &content),
            Err(Error::UnsupportedUriScheme(uri)) if uri.starts_with("ftp")
        ));
    }

    #[test]
    fn rejects_empty_uri_list() {
        let content = format!("\n{KEY}\n");
        assert!(matches!(
            Tal::parse("bad.tal".into(), &content),
            Err(Error::NoUris)
        ));
    }

    #[test]
    fn rejects_missing_separator() {
        let content = "rsync://rpki.example.net/repo/root.cer";
        assert!(matches!(
            Tal::parse("bad.tal".into(), content),
            Err(Error::PrematureEnd(_))
        ));
    }

    #[test]
    fn rejects_missing_key() {
        let content = "rsync://rpki.example.net/repo/root.cer\n\n   \n";
        assert!(matches!(
            Tal::parse("bad.tal".into(), content),
            Err(Error::MissingPublicKey)
        ));

        let content = "rsync://rpki.example.net/repo/root.cer\n";
        assert!(matches!(
            Tal::parse("bad.tal".into(), content),
            Err(Error::MissingPublicKey)
        ));
    }

    #[test]
    fn rejects_undecodable_key() {
        let content =
            "rsync://rpki.example.net/repo/root.cer\n\nnot!!base64??\n";
        assert!(matches!(
            Tal::parse("bad.tal".into(), content),
            Err(Error::BadPublicKey(_))
        ));
    }
}
