// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::messages::PduType;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("buffer too small")]
    TooSmall,

    #[error("unrecognized pdu type {0}")]
    InvalidPduType(u8),

    #[error("unrecognized error code {0}")]
    InvalidErrorCode(u16),

    #[error("declared length {0} below the header size")]
    LengthTooSmall(u32),

    #[error("declared length {0} exceeds the maximum pdu size")]
    LengthTooLarge(u32),

    #[error("bad length {found} for {typ:?} pdu")]
    BadLength { typ: PduType, found: u32 },

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("router key pdu not valid in protocol version 0")]
    RouterKeyVersion,

    #[error("end of data pdu for version 1 requires interval timers")]
    MissingTimers,

    #[error("truncated pdu body")]
    Truncated,

    #[error("io {0}")]
    Io(#[from] std::io::Error),

    #[error("connection timed out")]
    Timeout,

    #[error("connection closed by peer")]
    Disconnected,

    #[error("datastore error {0}")]
    Db(#[from] vdb::error::Error),

    #[error("invalid address {0}")]
    InvalidAddress(String),
}
