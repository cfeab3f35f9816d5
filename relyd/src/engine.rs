// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subprocess adapter for the object validation engine.
//!
//! Certificate parsing and signature verification run in an external
//! program, the same way the rsync transport does. For each TAL the engine
//! is invoked with the root certificate path, the TAL file name and the
//! trust anchor key (hex), and reports each validated payload as one line
//! on stdout:
//!
//! ```text
//! roa4 <asn> <prefix>/<len> <maxlen>
//! roa6 <asn> <prefix>/<len> <maxlen>
//! key  <asn> <ski-hex> <spki-base64>
//! ```
//!
//! A nonzero exit status means the root certificate did not validate and
//! fails the walk; sub-tree failures are the engine's to log and isolate.

use base64::Engine as _;
use slog::{debug, Logger};
use std::path::{Path, PathBuf};
use std::process::Command;
use tal::walk::{PayloadHandler, TreeWalker, WalkError};
use tal::Tal;
use vdb::{Prefix4, Prefix6};

pub struct CommandEngine {
    program: Option<PathBuf>,
    log: Logger,
}

impl CommandEngine {
    pub fn new(program: Option<PathBuf>, log: Logger) -> Self {
        Self { program, log }
    }
}

impl TreeWalker for CommandEngine {
    fn walk(
        &self,
        root: &Path,
        tal: &Tal,
        handler: &mut dyn PayloadHandler,
    ) -> Result<(), WalkError> {
        let program = self.program.as_ref().ok_or_else(|| {
            WalkError::Engine("no validator program configured".into())
        })?;

        let spki_hex: String =
            tal.spki().iter().map(|b| format!("{b:02x}")).collect();
        let output = Command::new(program)
            .arg(root)
            .arg(tal.file_name())
            .arg(spki_hex)
            .output()
            .map_err(|e| {
                WalkError::Engine(format!(
                    "cannot run {}: {e}",
                    program.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WalkError::RootInvalid(
                stderr.trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut count = 0usize;
        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            parse_payload_line(line, handler).map_err(|e| {
                WalkError::Engine(format!("bad payload line '{line}': {e}"))
            })?;
            count += 1;
        }

        debug!(self.log, "validation engine finished";
            "tal" => tal.file_name(),
            "payloads" => count,
        );
        Ok(())
    }
}

fn parse_payload_line(
    line: &str,
    handler: &mut dyn PayloadHandler,
) -> Result<(), String> {
    let mut fields = line.split_whitespace();
    let kind = fields.next().ok_or("empty record")?;
    match kind {
        "roa4" => {
            let asn = parse_asn(fields.next())?;
            let prefix: Prefix4 = fields
                .next()
                .ok_or("missing prefix")?
                .parse()
                .map_err(|e| format!("bad prefix: {e}"))?;
            let max_length = parse_u8(fields.next())?;
            expect_end(fields.next())?;
            handler.handle_roa_v4(asn, prefix, max_length);
        }
        "roa6" => {
            let asn = parse_asn(fields.next())?;
            let prefix: Prefix6 = fields
                .next()
                .ok_or("missing prefix")?
                .parse()
                .map_err(|e| format!("bad prefix: {e}"))?;
            let max_length = parse_u8(fields.next())?;
            expect_end(fields.next())?;
            handler.handle_roa_v6(asn, prefix, max_length);
        }
        "key" => {
            let asn = parse_asn(fields.next())?;
            let ski = parse_ski(fields.next())?;
            let spki = base64::engine::general_purpose::STANDARD
                .decode(fields.next().ok_or("missing key info")?)
                .map_err(|e| format!("bad key info: {e}"))?;
            expect_end(fields.next())?;
            handler.handle_router_key(asn, ski, spki);
        }
        other => return Err(format!("unknown record type '{other}'")),
    }
    Ok(())
}

fn parse_asn(field: Option<&str>) -> Result<u32, String> {
    field
        .ok_or("missing asn")?
        .parse()
        .map_err(|e| format!("bad asn: {e}"))
}

fn parse_u8(field: Option<&str>) -> Result<u8, String> {
    field
        .ok_or("missing max length")?
        .parse()
        .map_err(|e| format!("bad max length: {e}"))
}

fn parse_ski(field: Option<&str>) -> Result<[u8; 20], String> {
    let hex = field.ok_or("missing subject key identifier")?;
    if hex.len() != 40 {
        return Err("subject key identifier must be 40 hex digits".into());
    }
    let mut out = [0u8; 20];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        out[i] = (hex_digit(chunk[0])? << 4) | hex_digit(chunk[1])?;
    }
    Ok(out)
}

fn hex_digit(c: u8) -> Result<u8, String> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(format!("bad hex digit '{}'", c as char)),
    }
}

fn expect_end(field: Option<&str>) -> Result<(), String> {
    match field {
        None => Ok(()),
        Some(extra) => Err(format!("trailing field '{extra}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use vdb::DbTable;

    fn test_tal() -> Tal {
        Tal::parse(
            "example.tal".into(),
            "rsync://rpki.example.net/repo/root.cer\n\naGVsbG8=\n",
        )
        .unwrap()
    }

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("engine.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perm = fs::metadata(&path).unwrap().permissions();
        perm.set_mode(0o755);
        fs::set_permissions(&path, perm).unwrap();
        path
    }

    fn log() -> slog::Logger {
        rp_common::log::init_logger()
    }

    #[test]
    fn collects_engine_payloads() {
        let dir = TempDir::new().unwrap();
        let program = script(
            &dir,
            "echo 'roa4 64512 192.0.2.0/24 24'\n\
             echo 'roa6 64513 2001:db8::/32 48'\n\
             echo '# comment'\n\
             echo 'key 64496 \
             aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa MAA='",
        );

        let engine = CommandEngine::new(Some(program), log());
        let mut table = DbTable::new();
        engine
            .walk(Path::new("/nonexistent/root.cer"), &test_tal(), &mut table)
            .unwrap();

        assert_eq!(table.origins().len(), 2);
        assert_eq!(table.router_keys().len(), 1);
        let key = table.router_keys().iter().next().unwrap();
        assert_eq!(key.asn, 64496);
        assert_eq!(key.ski, [0xaa; 20]);
        assert_eq!(key.spki, vec![0x30, 0x00]);
    }

    #[test]
    fn nonzero_exit_fails_the_root() {
        let dir = TempDir::new().unwrap();
        let program =
            script(&dir, "echo 'bad signature on root' >&2\nexit 1");

        let engine = CommandEngine::new(Some(program), log());
        let mut table = DbTable::new();
        let err = engine
            .walk(Path::new("/nonexistent/root.cer"), &test_tal(), &mut table)
            .unwrap_err();
        assert!(matches!(err, WalkError::RootInvalid(msg) if msg.contains("bad signature")));
    }

    #[test]
    fn garbage_output_fails_the_walk() {
        let dir = TempDir::new().unwrap();
        let program = script(&dir, "echo 'roa4 not-a-number x y'");

        let engine = CommandEngine::new(Some(program), log());
        let mut table = DbTable::new();
        assert!(matches!(
            engine.walk(
                Path::new("/nonexistent/root.cer"),
                &test_tal(),
                &mut table
            ),
            Err(WalkError::Engine(_))
        ));
    }

    #[test]
    fn unconfigured_engine_fails_conservatively() {
        let engine = CommandEngine::new(None, log());
        let mut table = DbTable::new();
        assert!(matches!(
            engine.walk(
                Path::new("/nonexistent/root.cer"),
                &test_tal(),
                &mut table
            ),
            Err(WalkError::Engine(_))
        ));
        assert!(table.is_empty());
    }
}
