// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-connection PDU dispatch.
//!
//! One [`Connection`] runs on its own thread for the lifetime of a router's
//! TCP connection. It reads one PDU at a time, routes it by type, and emits
//! the full response under a single writer lock so a Serial Notify from the
//! validation driver can never interleave a response in progress.

use crate::error::Error;
use crate::messages::{
    CacheResponse, EndOfData, ErrorCode, ErrorReport, Header, Pdu, PduType,
    ResetQuery, SerialQuery, Timers, MAX_PDU_SIZE,
};
use crate::server::ClientRegistry;
use rp_common::lock;
use slog::{debug, error, info, trace, warn, Logger};
use std::io::Read;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use vdb::{Action, Db, DeltaStatus, Payload, ProtocolVersion};

/// How often an idle read wakes up to check the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Whether the connection survives the PDU that was just handled.
pub enum Flow {
    Continue,
    Close,
}

pub struct Connection {
    id: u64,
    peer: SocketAddr,
    reader: TcpStream,
    writer: Arc<Mutex<TcpStream>>,

    /// Protocol version pinned by the first PDU; shared with the client
    /// registry so notifies use the negotiated version.
    version: Arc<Mutex<Option<ProtocolVersion>>>,

    db: Db,
    timers: Timers,
    io_timeout: Duration,
    registry: ClientRegistry,
    shutdown: Arc<AtomicBool>,
    log: Logger,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        peer: SocketAddr,
        reader: TcpStream,
        writer: Arc<Mutex<TcpStream>>,
        version: Arc<Mutex<Option<ProtocolVersion>>>,
        db: Db,
        timers: Timers,
        io_timeout: Duration,
        registry: ClientRegistry,
        shutdown: Arc<AtomicBool>,
        log: Logger,
    ) -> Result<Self, Error> {
        reader.set_read_timeout(Some(POLL_INTERVAL))?;
        lock!(writer).set_write_timeout(Some(io_timeout))?;
        Ok(Self {
            id,
            peer,
            reader,
            writer,
            version,
            db,
            timers,
            io_timeout,
            registry,
            shutdown,
            log,
        })
    }

    pub fn run(mut self) {
        info!(self.log, "router connected");
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            let raw = match self.read_pdu() {
                Ok(raw) => raw,
                Err(Error::Disconnected) => {
                    debug!(self.log, "router disconnected");
                    break;
                }
                Err(Error::Timeout) => {
                    info!(self.log, "read stalled mid-pdu, closing");
                    break;
                }
                Err(e @ Error::LengthTooSmall(_))
                | Err(e @ Error::LengthTooLarge(_)) => {
                    warn!(self.log, "bad pdu framing: {e}");
                    self.send_error(
                        self.effective_version(),
                        ErrorCode::CorruptData,
                        &[],
                        "bad PDU length",
                    );
                    break;
                }
                Err(e) => {
                    warn!(self.log, "read failed: {e}");
                    break;
                }
            };
            match self.dispatch(&raw) {
                Flow::Continue => {}
                Flow::Close => break,
            }
        }
        self.registry.remove(self.id);
        debug!(self.log, "connection handler for {} exiting", self.peer);
    }

    /// Read one complete PDU off the wire, returning its raw bytes. Idle
    /// waits between PDUs are unbounded (routers poll on their own
    /// schedule); a stall in the middle of a PDU hits the io timeout.
    fn read_pdu(&mut self) -> Result<Vec<u8>, Error> {
        let mut hdr = [0u8; Header::WIRE_SIZE];
        self.read_exact_polled(&mut hdr, true)?;

        let length = u32::from_be_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]);
        if (length as usize) < Header::WIRE_SIZE {
            return Err(Error::LengthTooSmall(length));
        }
        if length > MAX_PDU_SIZE {
            return Err(Error::LengthTooLarge(length));
        }

        let mut raw = vec![0u8; length as usize];
        raw[..Header::WIRE_SIZE].copy_from_slice(&hdr);
        self.read_exact_polled(&mut raw[Header::WIRE_SIZE..], false)?;
        Ok(raw)
    }

    fn read_exact_polled(
        &mut self,
        buf: &mut [u8],
        idle_ok: bool,
    ) -> Result<(), Error> {
        let mut read = 0;
        let mut deadline = if idle_ok {
            None
        } else {
            Some(Instant::now() + self.io_timeout)
        };
        while read < buf.len() {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(Error::Disconnected);
            }
            match self.reader.read(&mut buf[read..]) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(n) => {
                    read += n;
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + self.io_timeout);
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    // The per-socket read timeout fired. Idle between
                    // PDUs just loops back to the shutdown check; a
                    // partially read PDU is held to the io timeout.
                    if let Some(d) = deadline {
                        if Instant::now() >= d {
                            return Err(Error::Timeout);
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, raw: &[u8]) -> Flow {
        let header = match Header::from_wire(raw) {
            Ok(h) => h,
            Err(Error::InvalidPduType(t)) => {
                warn!(self.log, "unrecognized pdu type {t}");
                self.send_error(
                    self.effective_version(),
                    ErrorCode::UnsupportedPduType,
                    raw,
                    "unrecognized PDU type",
                );
                return Flow::Close;
            }
            Err(e) => {
                warn!(self.log, "malformed pdu header: {e}");
                self.send_error(
                    self.effective_version(),
                    ErrorCode::CorruptData,
                    raw,
                    "malformed PDU header",
                );
                return Flow::Close;
            }
        };

        let version = match self.negotiate_version(&header, raw) {
            Ok(v) => v,
            Err(flow) => return flow,
        };

        let body = &raw[Header::WIRE_SIZE..];
        match header.typ {
            PduType::SerialQuery => {
                match SerialQuery::from_wire(&header, body) {
                    Ok(query) => self.serial_query(version, query, raw),
                    Err(e) => self.corrupt(version, raw, e),
                }
            }
            PduType::ResetQuery => {
                match ResetQuery::from_wire(&header, body) {
                    Ok(_) => self.reset_query(version),
                    Err(e) => self.corrupt(version, raw, e),
                }
            }
            PduType::ErrorReport => {
                match ErrorReport::from_wire(&header, body) {
                    Ok(report) => self.error_report(report),
                    Err(e) => self.corrupt(version, raw, e),
                }
            }
            typ => {
                // Everything else only ever travels cache → router.
                warn!(self.log, "unexpected {typ:?} pdu received");
                self.send_error(
                    version,
                    ErrorCode::UnsupportedPduType,
                    raw,
                    "unexpected PDU received",
                );
                Flow::Continue
            }
        }
    }

    /// The version every PDU of a connection must carry, pinned by the
    /// first one.
    fn negotiate_version(
        &self,
        header: &Header,
        raw: &[u8],
    ) -> Result<ProtocolVersion, Flow> {
        let parsed = ProtocolVersion::try_from(header.version);
        let mut slot = lock!(self.version);
        match parsed {
            Err(_) => {
                drop(slot);
                warn!(
                    self.log,
                    "unsupported protocol version {}", header.version
                );
                self.send_error(
                    self.effective_version(),
                    ErrorCode::UnsupportedProtocolVersion,
                    raw,
                    "unsupported protocol version",
                );
                Err(Flow::Close)
            }
            Ok(v) => match *slot {
                None => {
                    *slot = Some(v);
                    Ok(v)
                }
                Some(pinned) if pinned == v => Ok(v),
                Some(pinned) => {
                    drop(slot);
                    warn!(
                        self.log,
                        "protocol version changed from {pinned} to {v} \
                         within one connection"
                    );
                    self.send_error(
                        pinned,
                        ErrorCode::UnexpectedProtocolVersion,
                        raw,
                        "protocol version changed within session",
                    );
                    Err(Flow::Close)
                }
            },
        }
    }

    fn effective_version(&self) -> ProtocolVersion {
        lock!(self.version).unwrap_or(ProtocolVersion::V1)
    }

    fn serial_query(
        &self,
        version: ProtocolVersion,
        query: SerialQuery,
        raw: &[u8],
    ) -> Flow {
        let session_id = self.db.session_id(version);
        if query.session_id != session_id {
            // RFC 8210 §5.3: a session id mismatch must terminate the
            // session with Corrupt Data.
            warn!(self.log, "session id mismatch";
                "got" => query.session_id,
                "want" => session_id,
            );
            self.send_error(
                version,
                ErrorCode::CorruptData,
                raw,
                "session id mismatch",
            );
            return Flow::Close;
        }

        trace!(self.log, "serial query"; "serial" => query.serial);
        match self.db.delta_status(Some(query.serial)) {
            DeltaStatus::NoDataAvailable => {
                self.send_error(version, ErrorCode::NoDataAvailable, &[], "");
                Flow::Continue
            }
            DeltaStatus::DiffUndetermined => self.send_cache_reset(version),
            DeltaStatus::DiffAvailable => {
                match self.db.delta_iter(query.serial, version) {
                    Ok(iter) => {
                        let serial = iter.serial();
                        self.send_exchange(version, serial, iter)
                    }
                    // The history was trimmed between the status check
                    // and here; restart the router instead.
                    Err(_) => self.send_cache_reset(version),
                }
            }
            DeltaStatus::NoDiff => {
                self.send_exchange(version, query.serial, std::iter::empty())
            }
        }
    }

    fn reset_query(&self, version: ProtocolVersion) -> Flow {
        trace!(self.log, "reset query");
        match self.db.delta_status(None) {
            DeltaStatus::NoDataAvailable => {
                self.send_error(version, ErrorCode::NoDataAvailable, &[], "");
                Flow::Continue
            }
            _ => {
                let iter = self.db.snapshot_iter(version);
                let serial = iter.serial();
                self.send_exchange(version, serial, iter)
            }
        }
    }

    fn error_report(&self, report: ErrorReport) -> Flow {
        if report.code.is_fatal() {
            error!(
                self.log,
                "fatal error report from router [{:?}]: {}",
                report.code,
                report.text,
            );
            Flow::Close
        } else {
            warn!(
                self.log,
                "error report from router [{:?}]: {}",
                report.code,
                report.text,
            );
            Flow::Continue
        }
    }

    fn corrupt(
        &self,
        version: ProtocolVersion,
        raw: &[u8],
        e: Error,
    ) -> Flow {
        warn!(self.log, "malformed pdu: {e}");
        self.send_error(version, ErrorCode::CorruptData, raw, "malformed PDU");
        Flow::Close
    }

    /// Emit a full exchange: Cache Response, the payload PDUs, End of
    /// Data. The writer stays locked throughout so nothing interleaves.
    fn send_exchange(
        &self,
        version: ProtocolVersion,
        serial: u32,
        items: impl Iterator<Item = (Action, Payload)>,
    ) -> Flow {
        let session_id = self.db.session_id(version);
        let result = (|| -> Result<usize, Error> {
            let mut wr = lock!(self.writer);
            wr.write_all(&CacheResponse::new(version, session_id).to_wire())?;
            let mut count = 0;
            for (action, payload) in items {
                if let Some(pdu) = Pdu::payload(version, action, &payload) {
                    wr.write_all(&pdu.to_wire()?)?;
                    count += 1;
                }
            }
            wr.write_all(
                &EndOfData::new(version, session_id, serial, self.timers)
                    .to_wire()?,
            )?;
            Ok(count)
        })();
        match result {
            Ok(count) => {
                trace!(self.log, "sent exchange";
                    "serial" => serial,
                    "payload_pdus" => count,
                );
                Flow::Continue
            }
            Err(e) => {
                warn!(self.log, "failed to send exchange: {e}");
                Flow::Close
            }
        }
    }

    fn send_cache_reset(&self, version: ProtocolVersion) -> Flow {
        match self.send_pdu(&Pdu::CacheReset(crate::messages::CacheReset::new(
            version,
        ))) {
            Ok(()) => Flow::Continue,
            Err(e) => {
                warn!(self.log, "failed to send cache reset: {e}");
                Flow::Close
            }
        }
    }

    fn send_pdu(&self, pdu: &Pdu) -> Result<(), Error> {
        let buf = pdu.to_wire()?;
        lock!(self.writer).write_all(&buf)?;
        Ok(())
    }

    fn send_error(
        &self,
        version: ProtocolVersion,
        code: ErrorCode,
        pdu_echo: &[u8],
        text: &str,
    ) {
        let report =
            ErrorReport::new(version, code, pdu_echo.to_vec(), text);
        if let Err(e) = self.send_pdu(&Pdu::ErrorReport(report)) {
            warn!(self.log, "failed to send error report: {e}");
        }
    }
}
