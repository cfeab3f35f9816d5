// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use num_enum::TryFromPrimitive;
use std::net::{Ipv4Addr, Ipv6Addr};
use vdb::{Action, Payload, Prefix, ProtocolVersion};

/// RTR PDU types.
///
/// Ref: RFC 8210 §5
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Copy, Clone)]
#[repr(u8)]
pub enum PduType {
    /// The cache tells the router a new serial is available.
    ///
    /// RFC 8210 §5.2
    SerialNotify = 0,

    /// The router asks for the difference since the serial it holds.
    ///
    /// RFC 8210 §5.3
    SerialQuery = 1,

    /// The router asks for the complete data set.
    ///
    /// RFC 8210 §5.4
    ResetQuery = 2,

    /// Opens a cache → router payload exchange.
    ///
    /// RFC 8210 §5.5
    CacheResponse = 3,

    /// One IPv4 VRP, flagged announce or withdraw.
    ///
    /// RFC 8210 §5.6
    Ipv4Prefix = 4,

    /// One IPv6 VRP, flagged announce or withdraw.
    ///
    /// RFC 8210 §5.7
    Ipv6Prefix = 6,

    /// Closes a payload exchange, carrying the new serial.
    ///
    /// RFC 8210 §5.8
    EndOfData = 7,

    /// The cache cannot serve an incremental update; the router should
    /// fall back to a Reset Query.
    ///
    /// RFC 8210 §5.9
    CacheReset = 8,

    /// One BGPsec router key. Version 1 only.
    ///
    /// RFC 8210 §5.10
    RouterKey = 9,

    /// Diagnostic report, either direction.
    ///
    /// RFC 8210 §5.11
    ErrorReport = 10,
}

/// Error Report codes and their fatality.
///
/// Ref: RFC 8210 §10
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Copy, Clone)]
#[repr(u16)]
pub enum ErrorCode {
    CorruptData = 0,
    InternalError = 1,
    NoDataAvailable = 2,
    InvalidRequest = 3,
    UnsupportedProtocolVersion = 4,
    UnsupportedPduType = 5,
    WithdrawalOfUnknownRecord = 6,
    DuplicateAnnouncementReceived = 7,
    UnexpectedProtocolVersion = 8,
}

impl ErrorCode {
    /// Per RFC 8210 §10, every defined code except No Data Available
    /// terminates the session.
    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorCode::NoDataAvailable)
    }
}

/// Upper bound accepted for a single PDU. The largest PDUs a conformant
/// peer sends are Error Reports; anything beyond this is treated as corrupt
/// framing.
pub const MAX_PDU_SIZE: u32 = 65536;

/// Every RTR PDU begins with the same eight bytes.
///
/// ```text
/// 0          8          16         24        31
/// +----------+----------+----------+----------+
/// | Protocol |   PDU    |                     |
/// | Version  |   Type   |     (per type)      |
/// +----------+----------+----------+----------+
/// |                                           |
/// |                 Length                    |
/// |                                           |
/// +----------+----------+----------+----------+
/// ```
///
/// The 16-bit field at offset 2 is type dependent: a session id, an error
/// code, router-key flags, or zero. It is kept raw here as `tag`; the typed
/// PDU structs give it meaning. `length` covers the entire PDU including
/// this header.
///
/// Ref: RFC 8210 §5.1
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Header {
    pub version: u8,
    pub typ: PduType,
    pub tag: u16,
    pub length: u32,
}

impl Header {
    pub const WIRE_SIZE: usize = 8;

    pub fn new(version: u8, typ: PduType, tag: u16, length: u32) -> Self {
        Self {
            version,
            typ,
            tag,
            length,
        }
    }

    /// Serialize the header to wire format.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = vec![self.version, self.typ as u8];
        buf.extend_from_slice(&self.tag.to_be_bytes());
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Deserialize a header from wire format.
    pub fn from_wire(buf: &[u8]) -> Result<Header, Error> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(Error::TooSmall);
        }

        let typ = match PduType::try_from(buf[1]) {
            Ok(typ) => typ,
            Err(_) => return Err(Error::InvalidPduType(buf[1])),
        };

        let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if (length as usize) < Self::WIRE_SIZE {
            return Err(Error::LengthTooSmall(length));
        }

        Ok(Header {
            version: buf[0],
            typ,
            tag: u16::from_be_bytes([buf[2], buf[3]]),
            length,
        })
    }
}

fn expect_len(typ: PduType, header: &Header, want: u32) -> Result<(), Error> {
    if header.length != want {
        return Err(Error::BadLength {
            typ,
            found: header.length,
        });
    }
    Ok(())
}

fn parse_version(header: &Header) -> Result<ProtocolVersion, Error> {
    ProtocolVersion::try_from(header.version)
        .map_err(|_| Error::UnsupportedVersion(header.version))
}

/// The three interval timers a version 1 End of Data PDU carries, in
/// seconds.
///
/// Ref: RFC 8210 §6
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Timers {
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
}

impl Default for Timers {
    fn default() -> Self {
        Self {
            refresh: 3600,
            retry: 600,
            expire: 7200,
        }
    }
}

/// Cache → router notification that new data is available under the given
/// serial. Carries the session id in the header tag.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SerialNotify {
    pub version: ProtocolVersion,
    pub session_id: u16,
    pub serial: u32,
}

impl SerialNotify {
    pub const LEN: u32 = 12;

    pub fn new(version: ProtocolVersion, session_id: u16, serial: u32) -> Self {
        Self {
            version,
            session_id,
            serial,
        }
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Header::new(
            self.version as u8,
            PduType::SerialNotify,
            self.session_id,
            Self::LEN,
        )
        .to_wire();
        buf.extend_from_slice(&self.serial.to_be_bytes());
        buf
    }

    pub fn from_wire(header: &Header, body: &[u8]) -> Result<Self, Error> {
        expect_len(PduType::SerialNotify, header, Self::LEN)?;
        if body.len() != 4 {
            return Err(Error::Truncated);
        }
        Ok(Self {
            version: parse_version(header)?,
            session_id: header.tag,
            serial: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
        })
    }
}

/// Router → cache request for the changes since `serial`.
///
/// ```text
/// 0          8          16         24        31
/// +----------+----------+----------+----------+
/// | Protocol |   PDU    |                     |
/// | Version  |  Type 1  |     Session ID      |
/// +----------+----------+----------+----------+
/// |                Length = 12                |
/// +----------+----------+----------+----------+
/// |               Serial Number               |
/// +----------+----------+----------+----------+
/// ```
///
/// Ref: RFC 8210 §5.3
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SerialQuery {
    pub version: ProtocolVersion,
    pub session_id: u16,
    pub serial: u32,
}

impl SerialQuery {
    pub const LEN: u32 = 12;

    pub fn new(version: ProtocolVersion, session_id: u16, serial: u32) -> Self {
        Self {
            version,
            session_id,
            serial,
        }
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Header::new(
            self.version as u8,
            PduType::SerialQuery,
            self.session_id,
            Self::LEN,
        )
        .to_wire();
        buf.extend_from_slice(&self.serial.to_be_bytes());
        buf
    }

    pub fn from_wire(header: &Header, body: &[u8]) -> Result<Self, Error> {
        expect_len(PduType::SerialQuery, header, Self::LEN)?;
        if body.len() != 4 {
            return Err(Error::Truncated);
        }
        Ok(Self {
            version: parse_version(header)?,
            session_id: header.tag,
            serial: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
        })
    }
}

/// Router → cache request for the complete current data set. Header only,
/// tag is zero.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ResetQuery {
    pub version: ProtocolVersion,
}

impl ResetQuery {
    pub const LEN: u32 = 8;

    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }

    pub fn to_wire(&self) -> Vec<u8> {
        Header::new(self.version as u8, PduType::ResetQuery, 0, Self::LEN)
            .to_wire()
    }

    pub fn from_wire(header: &Header, _body: &[u8]) -> Result<Self, Error> {
        expect_len(PduType::ResetQuery, header, Self::LEN)?;
        Ok(Self {
            version: parse_version(header)?,
        })
    }
}

/// Cache → router: a payload exchange follows. Carries the session id.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CacheResponse {
    pub version: ProtocolVersion,
    pub session_id: u16,
}

impl CacheResponse {
    pub const LEN: u32 = 8;

    pub fn new(version: ProtocolVersion, session_id: u16) -> Self {
        Self {
            version,
            session_id,
        }
    }

    pub fn to_wire(&self) -> Vec<u8> {
        Header::new(
            self.version as u8,
            PduType::CacheResponse,
            self.session_id,
            Self::LEN,
        )
        .to_wire()
    }

    pub fn from_wire(header: &Header, _body: &[u8]) -> Result<Self, Error> {
        expect_len(PduType::CacheResponse, header, Self::LEN)?;
        Ok(Self {
            version: parse_version(header)?,
            session_id: header.tag,
        })
    }
}

/// One IPv4 VRP.
///
/// ```text
/// 0          8          16         24        31
/// +----------+----------+----------+----------+
/// | Protocol |   PDU    |                     |
/// | Version  |  Type 4  |         zero        |
/// +----------+----------+----------+----------+
/// |                Length = 20                |
/// +----------+----------+----------+----------+
/// |          |  Prefix  |   Max    |          |
/// |  Flags   |  Length  |  Length  |   zero   |
/// +----------+----------+----------+----------+
/// |                IPv4 Prefix                |
/// +----------+----------+----------+----------+
/// |         Autonomous System Number          |
/// +----------+----------+----------+----------+
/// ```
///
/// Ref: RFC 8210 §5.6
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Ipv4Prefix {
    pub version: ProtocolVersion,
    pub flags: u8,
    pub prefix_length: u8,
    pub max_length: u8,
    pub prefix: Ipv4Addr,
    pub asn: u32,
}

impl Ipv4Prefix {
    pub const LEN: u32 = 20;

    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf =
            Header::new(self.version as u8, PduType::Ipv4Prefix, 0, Self::LEN)
                .to_wire();
        buf.push(self.flags);
        buf.push(self.prefix_length);
        buf.push(self.max_length);
        buf.push(0);
        buf.extend_from_slice(&self.prefix.octets());
        buf.extend_from_slice(&self.asn.to_be_bytes());
        buf
    }

    pub fn from_wire(header: &Header, body: &[u8]) -> Result<Self, Error> {
        expect_len(PduType::Ipv4Prefix, header, Self::LEN)?;
        if body.len() != 12 {
            return Err(Error::Truncated);
        }
        Ok(Self {
            version: parse_version(header)?,
            flags: body[0],
            prefix_length: body[1],
            max_length: body[2],
            prefix: Ipv4Addr::new(body[4], body[5], body[6], body[7]),
            asn: u32::from_be_bytes([body[8], body[9], body[10], body[11]]),
        })
    }
}

/// One IPv6 VRP. Same layout as [`Ipv4Prefix`] with a 16-byte prefix.
///
/// Ref: RFC 8210 §5.7
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Ipv6Prefix {
    pub version: ProtocolVersion,
    pub flags: u8,
    pub prefix_length: u8,
    pub max_length: u8,
    pub prefix: Ipv6Addr,
    pub asn: u32,
}

impl Ipv6Prefix {
    pub const LEN: u32 = 32;

    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf =
            Header::new(self.version as u8, PduType::Ipv6Prefix, 0, Self::LEN)
                .to_wire();
        buf.push(self.flags);
        buf.push(self.prefix_length);
        buf.push(self.max_length);
        buf.push(0);
        buf.extend_from_slice(&self.prefix.octets());
        buf.extend_from_slice(&self.asn.to_be_bytes());
        buf
    }

    pub fn from_wire(header: &Header, body: &[u8]) -> Result<Self, Error> {
        expect_len(PduType::Ipv6Prefix, header, Self::LEN)?;
        if body.len() != 24 {
            return Err(Error::Truncated);
        }
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&body[4..20]);
        Ok(Self {
            version: parse_version(header)?,
            flags: body[0],
            prefix_length: body[1],
            max_length: body[2],
            prefix: Ipv6Addr::from(octets),
            asn: u32::from_be_bytes([body[20], body[21], body[22], body[23]]),
        })
    }
}

/// Cache → router: the exchange is complete and the router now holds
/// `serial`. Version 1 additionally carries the refresh, retry and expire
/// interval timers.
///
/// Ref: RFC 6810 §5.7, RFC 8210 §5.8
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EndOfData {
    pub version: ProtocolVersion,
    pub session_id: u16,
    pub serial: u32,

    /// Present iff `version` is 1 or later.
    pub timers: Option<Timers>,
}

impl EndOfData {
    pub const V0_LEN: u32 = 12;
    pub const V1_LEN: u32 = 24;

    pub fn new(
        version: ProtocolVersion,
        session_id: u16,
        serial: u32,
        timers: Timers,
    ) -> Self {
        let timers = match version {
            ProtocolVersion::V0 => None,
            ProtocolVersion::V1 => Some(timers),
        };
        Self {
            version,
            session_id,
            serial,
            timers,
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let length = match self.version {
            ProtocolVersion::V0 => Self::V0_LEN,
            ProtocolVersion::V1 => Self::V1_LEN,
        };
        let mut buf = Header::new(
            self.version as u8,
            PduType::EndOfData,
            self.session_id,
            length,
        )
        .to_wire();
        buf.extend_from_slice(&self.serial.to_be_bytes());
        if self.version >= ProtocolVersion::V1 {
            let timers = self.timers.ok_or(Error::MissingTimers)?;
            buf.extend_from_slice(&timers.refresh.to_be_bytes());
            buf.extend_from_slice(&timers.retry.to_be_bytes());
            buf.extend_from_slice(&timers.expire.to_be_bytes());
        }
        Ok(buf)
    }

    pub fn from_wire(header: &Header, body: &[u8]) -> Result<Self, Error> {
        let version = parse_version(header)?;
        let timers = match version {
            ProtocolVersion::V0 => {
                expect_len(PduType::EndOfData, header, Self::V0_LEN)?;
                if body.len() != 4 {
                    return Err(Error::Truncated);
                }
                None
            }
            ProtocolVersion::V1 => {
                expect_len(PduType::EndOfData, header, Self::V1_LEN)?;
                if body.len() != 16 {
                    return Err(Error::Truncated);
                }
                Some(Timers {
                    refresh: u32::from_be_bytes([
                        body[4], body[5], body[6], body[7],
                    ]),
                    retry: u32::from_be_bytes([
                        body[8], body[9], body[10], body[11],
                    ]),
                    expire: u32::from_be_bytes([
                        body[12], body[13], body[14], body[15],
                    ]),
                })
            }
        };
        Ok(Self {
            version,
            session_id: header.tag,
            serial: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
            timers,
        })
    }
}

/// Cache → router: no incremental update possible, start over with a Reset
/// Query. Header only.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CacheReset {
    pub version: ProtocolVersion,
}

impl CacheReset {
    pub const LEN: u32 = 8;

    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }

    pub fn to_wire(&self) -> Vec<u8> {
        Header::new(self.version as u8, PduType::CacheReset, 0, Self::LEN)
            .to_wire()
    }

    pub fn from_wire(header: &Header, _body: &[u8]) -> Result<Self, Error> {
        expect_len(PduType::CacheReset, header, Self::LEN)?;
        Ok(Self {
            version: parse_version(header)?,
        })
    }
}

/// One BGPsec router key. Only exists from protocol version 1 on; the
/// flags byte rides in the high half of the header tag.
///
/// ```text
/// 0          8          16         24        31
/// +----------+----------+----------+----------+
/// | Protocol |   PDU    |          |          |
/// | Version  |  Type 9  |  Flags   |   zero   |
/// +----------+----------+----------+----------+
/// |                  Length                   |
/// +----------+----------+----------+----------+
/// |       Subject Key Identifier (20)         |
/// +----------+----------+----------+----------+
/// |         Autonomous System Number          |
/// +----------+----------+----------+----------+
/// |     Subject Public Key Info (variable)    |
/// +----------+----------+----------+----------+
/// ```
///
/// Ref: RFC 8210 §5.10
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RouterKeyPdu {
    pub version: ProtocolVersion,
    pub flags: u8,
    pub ski: [u8; 20],
    pub asn: u32,
    pub spki: Vec<u8>,
}

impl RouterKeyPdu {
    pub const MIN_LEN: u32 = 32;

    pub fn to_wire(&self) -> Vec<u8> {
        let length = Self::MIN_LEN + self.spki.len() as u32;
        let mut buf = Header::new(
            self.version as u8,
            PduType::RouterKey,
            (self.flags as u16) << 8,
            length,
        )
        .to_wire();
        buf.extend_from_slice(&self.ski);
        buf.extend_from_slice(&self.asn.to_be_bytes());
        buf.extend_from_slice(&self.spki);
        buf
    }

    pub fn from_wire(header: &Header, body: &[u8]) -> Result<Self, Error> {
        let version = parse_version(header)?;
        if !version.supports_router_keys() {
            return Err(Error::RouterKeyVersion);
        }
        if header.length < Self::MIN_LEN {
            return Err(Error::BadLength {
                typ: PduType::RouterKey,
                found: header.length,
            });
        }
        if body.len() != header.length as usize - Header::WIRE_SIZE
            || body.len() < 24
        {
            return Err(Error::Truncated);
        }
        let mut ski = [0u8; 20];
        ski.copy_from_slice(&body[..20]);
        Ok(Self {
            version,
            flags: (header.tag >> 8) as u8,
            ski,
            asn: u32::from_be_bytes([body[20], body[21], body[22], body[23]]),
            spki: body[24..].to_vec(),
        })
    }
}

/// Diagnostic report. The header tag carries the error code; the body
/// holds a copy of the offending PDU and a human-readable explanation,
/// each preceded by its own 4-byte length.
///
/// Ref: RFC 8210 §5.11
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ErrorReport {
    pub version: ProtocolVersion,
    pub code: ErrorCode,

    /// Copy of the PDU that provoked the report. May be empty.
    pub pdu: Vec<u8>,

    /// Diagnostic text. May be empty.
    pub text: String,
}

impl ErrorReport {
    pub fn new(
        version: ProtocolVersion,
        code: ErrorCode,
        pdu: Vec<u8>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            version,
            code,
            pdu,
            text: text.into(),
        }
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let length =
            Header::WIRE_SIZE as u32 + 8 + self.pdu.len() as u32
                + self.text.len() as u32;
        let mut buf = Header::new(
            self.version as u8,
            PduType::ErrorReport,
            self.code as u16,
            length,
        )
        .to_wire();
        buf.extend_from_slice(&(self.pdu.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.pdu);
        buf.extend_from_slice(&(self.text.len() as u32).to_be_bytes());
        buf.extend_from_slice(self.text.as_bytes());
        buf
    }

    pub fn from_wire(header: &Header, body: &[u8]) -> Result<Self, Error> {
        let version = parse_version(header)?;
        let code = ErrorCode::try_from(header.tag)
            .map_err(|_| Error::InvalidErrorCode(header.tag))?;

        if body.len() < 4 {
            return Err(Error::Truncated);
        }
        let pdu_len =
            u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
        let rest = &body[4..];
        if rest.len() < pdu_len + 4 {
            return Err(Error::Truncated);
        }
        let pdu = rest[..pdu_len].to_vec();
        let rest = &rest[pdu_len..];
        let text_len =
            u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let rest = &rest[4..];
        if rest.len() != text_len {
            return Err(Error::Truncated);
        }
        let text = String::from_utf8_lossy(rest).into_owned();

        Ok(Self {
            version,
            code,
            pdu,
            text,
        })
    }
}

/// Any parsed PDU.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Pdu {
    SerialNotify(SerialNotify),
    SerialQuery(SerialQuery),
    ResetQuery(ResetQuery),
    CacheResponse(CacheResponse),
    Ipv4Prefix(Ipv4Prefix),
    Ipv6Prefix(Ipv6Prefix),
    EndOfData(EndOfData),
    CacheReset(CacheReset),
    RouterKey(RouterKeyPdu),
    ErrorReport(ErrorReport),
}

impl Pdu {
    pub fn typ(&self) -> PduType {
        match self {
            Pdu::SerialNotify(_) => PduType::SerialNotify,
            Pdu::SerialQuery(_) => PduType::SerialQuery,
            Pdu::ResetQuery(_) => PduType::ResetQuery,
            Pdu::CacheResponse(_) => PduType::CacheResponse,
            Pdu::Ipv4Prefix(_) => PduType::Ipv4Prefix,
            Pdu::Ipv6Prefix(_) => PduType::Ipv6Prefix,
            Pdu::EndOfData(_) => PduType::EndOfData,
            Pdu::CacheReset(_) => PduType::CacheReset,
            Pdu::RouterKey(_) => PduType::RouterKey,
            Pdu::ErrorReport(_) => PduType::ErrorReport,
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        Ok(match self {
            Pdu::SerialNotify(p) => p.to_wire(),
            Pdu::SerialQuery(p) => p.to_wire(),
            Pdu::ResetQuery(p) => p.to_wire(),
            Pdu::CacheResponse(p) => p.to_wire(),
            Pdu::Ipv4Prefix(p) => p.to_wire(),
            Pdu::Ipv6Prefix(p) => p.to_wire(),
            Pdu::EndOfData(p) => return p.to_wire(),
            Pdu::CacheReset(p) => p.to_wire(),
            Pdu::RouterKey(p) => p.to_wire(),
            Pdu::ErrorReport(p) => p.to_wire(),
        })
    }

    /// Parse a PDU from its already-read header and body.
    pub fn from_wire(header: &Header, body: &[u8]) -> Result<Pdu, Error> {
        Ok(match header.typ {
            PduType::SerialNotify => {
                Pdu::SerialNotify(SerialNotify::from_wire(header, body)?)
            }
            PduType::SerialQuery => {
                Pdu::SerialQuery(SerialQuery::from_wire(header, body)?)
            }
            PduType::ResetQuery => {
                Pdu::ResetQuery(ResetQuery::from_wire(header, body)?)
            }
            PduType::CacheResponse => {
                Pdu::CacheResponse(CacheResponse::from_wire(header, body)?)
            }
            PduType::Ipv4Prefix => {
                Pdu::Ipv4Prefix(Ipv4Prefix::from_wire(header, body)?)
            }
            PduType::Ipv6Prefix => {
                Pdu::Ipv6Prefix(Ipv6Prefix::from_wire(header, body)?)
            }
            PduType::EndOfData => {
                Pdu::EndOfData(EndOfData::from_wire(header, body)?)
            }
            PduType::CacheReset => {
                Pdu::CacheReset(CacheReset::from_wire(header, body)?)
            }
            PduType::RouterKey => {
                Pdu::RouterKey(RouterKeyPdu::from_wire(header, body)?)
            }
            PduType::ErrorReport => {
                Pdu::ErrorReport(ErrorReport::from_wire(header, body)?)
            }
        })
    }

    /// Turn a database payload into the PDU the given protocol version
    /// uses for it. Router keys have no version 0 representation and yield
    /// `None` there.
    pub fn payload(
        version: ProtocolVersion,
        action: Action,
        payload: &Payload,
    ) -> Option<Pdu> {
        match payload {
            Payload::Origin(vrp) => Some(match vrp.prefix {
                Prefix::V4(p) => Pdu::Ipv4Prefix(Ipv4Prefix {
                    version,
                    flags: action.flag(),
                    prefix_length: p.length,
                    max_length: vrp.max_length,
                    prefix: p.addr,
                    asn: vrp.asn,
                }),
                Prefix::V6(p) => Pdu::Ipv6Prefix(Ipv6Prefix {
                    version,
                    flags: action.flag(),
                    prefix_length: p.length,
                    max_length: vrp.max_length,
                    prefix: p.addr,
                    asn: vrp.asn,
                }),
            }),
            Payload::RouterKey(key) => {
                if !version.supports_router_keys() {
                    return None;
                }
                Some(Pdu::RouterKey(RouterKeyPdu {
                    version,
                    flags: action.flag(),
                    ski: key.ski,
                    asn: key.asn,
                    spki: key.spki.clone(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pretty_hex::*;
    use std::str::FromStr;
    use vdb::{Prefix4, RouterKey, Vrp};

    fn round_trip(pdu: &Pdu) {
        let buf = pdu.to_wire().expect("pdu to wire");
        println!("buf: {}", buf.hex_dump());
        let header = Header::from_wire(&buf).expect("header from wire");
        assert_eq!(header.length as usize, buf.len());
        let parsed = Pdu::from_wire(&header, &buf[Header::WIRE_SIZE..])
            .expect("pdu from wire");
        assert_eq!(*pdu, parsed);
    }

    #[test]
    fn header_round_trip() {
        let h0 = Header::new(1, PduType::SerialQuery, 0x1234, 12);
        let buf = h0.to_wire();
        assert_eq!(
            buf,
            vec![
                0x01, // version
                0x01, // type
                0x12, 0x34, // session id
                0x00, 0x00, 0x00, 0x0c, // length
            ]
        );

        let h1 = Header::from_wire(&buf).expect("header from wire");
        assert_eq!(h0, h1);
    }

    #[test]
    fn header_rejects_bad_type_and_length() {
        assert!(matches!(
            Header::from_wire(&[0x01, 0x05, 0, 0, 0, 0, 0, 8]),
            Err(Error::InvalidPduType(5))
        ));
        assert!(matches!(
            Header::from_wire(&[0x01, 0x02, 0, 0, 0, 0, 0, 7]),
            Err(Error::LengthTooSmall(7))
        ));
        assert!(matches!(
            Header::from_wire(&[0x01, 0x02, 0]),
            Err(Error::TooSmall)
        ));
    }

    #[test]
    fn serial_query_round_trip() {
        round_trip(&Pdu::SerialQuery(SerialQuery::new(
            ProtocolVersion::V1,
            0x1234,
            0x01020304,
        )));
    }

    #[test]
    fn reset_query_wire_format() {
        let buf = ResetQuery::new(ProtocolVersion::V1).to_wire();
        assert_eq!(buf, vec![0x01, 0x02, 0, 0, 0, 0, 0, 0x08]);
        round_trip(&Pdu::ResetQuery(ResetQuery::new(ProtocolVersion::V0)));
    }

    #[test]
    fn ipv4_prefix_wire_format() {
        let pdu = Ipv4Prefix {
            version: ProtocolVersion::V1,
            flags: 1,
            prefix_length: 24,
            max_length: 24,
            prefix: "192.0.2.0".parse().unwrap(),
            asn: 64512,
        };
        let buf = pdu.to_wire();
        assert_eq!(
            buf,
            vec![
                0x01, 0x04, 0x00, 0x00, // header
                0x00, 0x00, 0x00, 0x14, // length 20
                0x01, 0x18, 0x18, 0x00, // flags, len, maxlen, zero
                0xc0, 0x00, 0x02, 0x00, // 192.0.2.0
                0x00, 0x00, 0xfc, 0x00, // AS 64512
            ]
        );
        round_trip(&Pdu::Ipv4Prefix(pdu));
    }

    #[test]
    fn ipv6_prefix_round_trip() {
        round_trip(&Pdu::Ipv6Prefix(Ipv6Prefix {
            version: ProtocolVersion::V1,
            flags: 0,
            prefix_length: 32,
            max_length: 48,
            prefix: "2001:db8::".parse().unwrap(),
            asn: 4200000001,
        }));
    }

    #[test]
    fn end_of_data_lengths_differ_by_version() {
        let v0 = EndOfData::new(
            ProtocolVersion::V0,
            0xabcd,
            7,
            Timers::default(),
        );
        let buf = v0.to_wire().expect("end of data v0 to wire");
        assert_eq!(buf.len(), 12);
        round_trip(&Pdu::EndOfData(v0));

        let v1 = EndOfData::new(
            ProtocolVersion::V1,
            0xabcd,
            7,
            Timers {
                refresh: 1800,
                retry: 300,
                expire: 7200,
            },
        );
        let buf = v1.to_wire().expect("end of data v1 to wire");
        assert_eq!(buf.len(), 24);
        round_trip(&Pdu::EndOfData(v1));
    }

    #[test]
    fn router_key_round_trip_and_v0_rejection() {
        let pdu = RouterKeyPdu {
            version: ProtocolVersion::V1,
            flags: 1,
            ski: [0xaa; 20],
            asn: 64496,
            spki: vec![0x30, 0x13, 0x02, 0x01],
        };
        let buf = pdu.to_wire();
        // Flags live in the high byte of the tag field.
        assert_eq!(buf[2], 0x01);
        assert_eq!(buf[3], 0x00);
        round_trip(&Pdu::RouterKey(pdu.clone()));

        let mut v0 = buf.clone();
        v0[0] = 0;
        let header = Header::from_wire(&v0).unwrap();
        assert!(matches!(
            RouterKeyPdu::from_wire(&header, &v0[8..]),
            Err(Error::RouterKeyVersion)
        ));
    }

    #[test]
    fn error_report_round_trip() {
        let offending =
            SerialQuery::new(ProtocolVersion::V1, 0x9999, 42).to_wire();
        round_trip(&Pdu::ErrorReport(ErrorReport::new(
            ProtocolVersion::V1,
            ErrorCode::CorruptData,
            offending,
            "session id mismatch",
        )));
        round_trip(&Pdu::ErrorReport(ErrorReport::new(
            ProtocolVersion::V0,
            ErrorCode::NoDataAvailable,
            Vec::new(),
            "",
        )));
    }

    #[test]
    fn error_report_truncated_body() {
        let mut buf = ErrorReport::new(
            ProtocolVersion::V1,
            ErrorCode::CorruptData,
            vec![1, 2, 3],
            "oops",
        )
        .to_wire();
        buf.truncate(buf.len() - 2);
        let header = Header::from_wire(&buf).unwrap();
        assert!(matches!(
            ErrorReport::from_wire(&header, &buf[8..]),
            Err(Error::Truncated)
        ));
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut buf = ResetQuery::new(ProtocolVersion::V1).to_wire();
        buf[0] = 2;
        let header = Header::from_wire(&buf).unwrap();
        assert!(matches!(
            Pdu::from_wire(&header, &buf[8..]),
            Err(Error::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn fatality_classification() {
        assert!(ErrorCode::CorruptData.is_fatal());
        assert!(ErrorCode::InternalError.is_fatal());
        assert!(!ErrorCode::NoDataAvailable.is_fatal());
        assert!(ErrorCode::UnsupportedPduType.is_fatal());
        assert!(ErrorCode::UnexpectedProtocolVersion.is_fatal());
    }

    #[test]
    fn payload_conversion_filters_router_keys_on_v0() {
        let key = Payload::RouterKey(RouterKey {
            asn: 64496,
            ski: [1u8; 20],
            spki: vec![0x30],
        });
        assert!(
            Pdu::payload(ProtocolVersion::V0, Action::Announce, &key)
                .is_none()
        );
        assert!(
            Pdu::payload(ProtocolVersion::V1, Action::Announce, &key)
                .is_some()
        );

        let vrp = Payload::Origin(Vrp {
            asn: 64512,
            prefix: Prefix::V4(Prefix4::from_str("192.0.2.0/24").unwrap()),
            max_length: 24,
        });
        let pdu = Pdu::payload(ProtocolVersion::V0, Action::Withdraw, &vrp)
            .expect("v4 payload on v0");
        match pdu {
            Pdu::Ipv4Prefix(p) => {
                assert_eq!(p.flags, 0);
                assert_eq!(p.asn, 64512);
            }
            other => panic!("expected ipv4 prefix pdu, got {other:?}"),
        }
    }
}
