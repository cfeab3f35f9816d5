// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The RPKI-to-Router protocol.
//!
//! Wire codecs for both negotiated protocol versions (RFC 6810 version 0,
//! RFC 8210 version 1) and the TCP server that answers router queries from
//! a [`vdb::Db`].

pub mod error;
pub mod handler;
pub mod log;
pub mod messages;
pub mod server;

#[cfg(test)]
mod proptest;


/// The IANA-assigned RPKI-to-Router port.
pub const RTR_PORT: u16 = 323;
