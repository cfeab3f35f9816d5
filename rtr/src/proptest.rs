// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for the RTR wire format.
//!
//! These verify that serializing any PDU and parsing the bytes back is
//! the identity, and that the declared length always matches the bytes
//! produced.

use crate::messages::{
    CacheReset, CacheResponse, EndOfData, ErrorCode, ErrorReport, Header,
    Ipv4Prefix, Ipv6Prefix, Pdu, ResetQuery, RouterKeyPdu, SerialNotify,
    SerialQuery, Timers,
};
use proptest::prelude::*;
use std::net::{Ipv4Addr, Ipv6Addr};
use vdb::ProtocolVersion;

fn version_strategy() -> impl Strategy<Value = ProtocolVersion> {
    prop_oneof![
        Just(ProtocolVersion::V0),
        Just(ProtocolVersion::V1),
    ]
}

fn error_code_strategy() -> impl Strategy<Value = ErrorCode> {
    (0u16..=8).prop_map(|c| ErrorCode::try_from(c).unwrap())
}

fn timers_strategy() -> impl Strategy<Value = Timers> {
    (1u32..86400, 1u32..7200, 600u32..172800).prop_map(
        |(refresh, retry, expire)| Timers {
            refresh,
            retry,
            expire,
        },
    )
}

fn pdu_strategy() -> impl Strategy<Value = Pdu> {
    prop_oneof![
        (version_strategy(), any::<u16>(), any::<u32>()).prop_map(
            |(v, session, serial)| Pdu::SerialNotify(SerialNotify::new(
                v, session, serial
            ))
        ),
        (version_strategy(), any::<u16>(), any::<u32>()).prop_map(
            |(v, session, serial)| Pdu::SerialQuery(SerialQuery::new(
                v, session, serial
            ))
        ),
        version_strategy()
            .prop_map(|v| Pdu::ResetQuery(ResetQuery::new(v))),
        (version_strategy(), any::<u16>()).prop_map(|(v, session)| {
            Pdu::CacheResponse(CacheResponse::new(v, session))
        }),
        (
            version_strategy(),
            0u8..=1,
            0u8..=32,
            0u8..=32,
            any::<u32>(),
            any::<u32>(),
        )
            .prop_map(|(v, flags, len, max, addr, asn)| {
                Pdu::Ipv4Prefix(Ipv4Prefix {
                    version: v,
                    flags,
                    prefix_length: len,
                    max_length: max,
                    prefix: Ipv4Addr::from(addr),
                    asn,
                })
            }),
        (
            version_strategy(),
            0u8..=1,
            0u8..=128,
            0u8..=128,
            any::<u128>(),
            any::<u32>(),
        )
            .prop_map(|(v, flags, len, max, addr, asn)| {
                Pdu::Ipv6Prefix(Ipv6Prefix {
                    version: v,
                    flags,
                    prefix_length: len,
                    max_length: max,
                    prefix: Ipv6Addr::from(addr),
                    asn,
                })
            }),
        (
            version_strategy(),
            any::<u16>(),
            any::<u32>(),
            timers_strategy(),
        )
            .prop_map(|(v, session, serial, timers)| {
                Pdu::EndOfData(EndOfData::new(v, session, serial, timers))
            }),
        version_strategy()
            .prop_map(|v| Pdu::CacheReset(CacheReset::new(v))),
        (
            0u8..=1,
            proptest::collection::vec(any::<u8>(), 20),
            any::<u32>(),
            proptest::collection::vec(any::<u8>(), 0..64),
        )
            .prop_map(|(flags, ski, asn, spki)| {
                let mut ski_arr = [0u8; 20];
                ski_arr.copy_from_slice(&ski);
                Pdu::RouterKey(RouterKeyPdu {
                    version: ProtocolVersion::V1,
                    flags,
                    ski: ski_arr,
                    asn,
                    spki,
                })
            }),
        (
            version_strategy(),
            error_code_strategy(),
            proptest::collection::vec(any::<u8>(), 0..32),
            "[ -~]{0,40}",
        )
            .prop_map(|(v, code, pdu, text)| {
                Pdu::ErrorReport(ErrorReport::new(v, code, pdu, text))
            }),
    ]
}

proptest! {
    /// Property: serialize-then-parse is the identity for every PDU
    #[test]
    fn prop_pdu_wire_roundtrip(pdu in pdu_strategy()) {
        let buf = pdu.to_wire().expect("pdu to wire");
        let header = Header::from_wire(&buf).expect("header from wire");
        let parsed = Pdu::from_wire(&header, &buf[Header::WIRE_SIZE..])
            .expect("pdu from wire");
        prop_assert_eq!(pdu, parsed);
    }

    /// Property: the declared length always matches the emitted bytes
    #[test]
    fn prop_declared_length_matches(pdu in pdu_strategy()) {
        let buf = pdu.to_wire().expect("pdu to wire");
        let header = Header::from_wire(&buf).expect("header from wire");
        prop_assert_eq!(header.length as usize, buf.len());
        prop_assert_eq!(header.typ, pdu.typ());
    }
}
