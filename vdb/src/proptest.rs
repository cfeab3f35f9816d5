// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for prefix normalization and delta composition.

use crate::db::{Db, Retention};
use crate::types::*;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};

fn arb_prefix4() -> impl Strategy<Value = Prefix4> {
    (any::<u32>(), 0u8..=Prefix4::MAX_LENGTH)
        .prop_map(|(bits, length)| Prefix4::new(Ipv4Addr::from(bits), length))
}

fn arb_prefix6() -> impl Strategy<Value = Prefix6> {
    (any::<u128>(), 0u8..=Prefix6::MAX_LENGTH)
        .prop_map(|(bits, length)| Prefix6::new(Ipv6Addr::from(bits), length))
}

// Small VRP universe so that successive tables overlap and deltas carry
// both announcements and withdrawals.
fn vrp_strategy() -> impl Strategy<Value = Vrp> {
    (64512u32..64520, 0u8..8, 24u8..=26).prop_map(|(asn, net, max_length)| {
        Vrp {
            asn,
            prefix: Prefix::V4(Prefix4::new(
                Ipv4Addr::new(10, net, 0, 0),
                24,
            )),
            max_length,
        }
    })
}

fn table_strategy() -> impl Strategy<Value = Vec<Vrp>> {
    proptest::collection::vec(vrp_strategy(), 0..12)
}

proptest! {
    /// Property: construction always yields the canonical network
    /// address, and re-normalizing changes nothing
    #[test]
    fn prop_construction_canonical(
        p4 in arb_prefix4(),
        p6 in arb_prefix6(),
    ) {
        prop_assert!(p4.is_canonical(), "{p4} not canonical");
        prop_assert!(p6.is_canonical(), "{p6} not canonical");
        prop_assert_eq!(Prefix4::new(p4.addr, p4.length), p4);
        prop_assert_eq!(Prefix6::new(p6.addr, p6.length), p6);
    }

    /// Property: display/parse round-trip is identity for both families
    #[test]
    fn prop_prefix_display_parse_roundtrip(
        p4 in arb_prefix4(),
        p6 in arb_prefix6(),
    ) {
        let v4 = Prefix::V4(p4);
        let v6 = Prefix::V6(p6);
        prop_assert_eq!(v4.to_string().parse::<Prefix>().unwrap(), v4);
        prop_assert_eq!(v6.to_string().parse::<Prefix>().unwrap(), v6);
    }

    /// Property: for any install sequence, the delta composed from any
    /// intermediate serial to the current serial turns that intermediate
    /// snapshot into the current one, and announces/withdraws are
    /// disjoint.
    #[test]
    fn prop_delta_composition_is_exact(
        tables in proptest::collection::vec(table_strategy(), 1..6),
        from_idx in 0usize..6,
    ) {
        let db = Db::new(
            Retention::default(),
            rp_common::log::init_logger(),
        );

        let mut snapshots: Vec<BTreeSet<Vrp>> = vec![BTreeSet::new()];
        for t in &tables {
            let mut table = DbTable::new();
            for v in t {
                table.add_origin(*v);
            }
            snapshots.push(t.iter().copied().collect());
            db.install(table).unwrap();
        }

        let from = from_idx.min(tables.len()) as u32;
        let start = snapshots[from as usize].clone();
        let end = snapshots.last().unwrap().clone();

        let mut announced = BTreeSet::new();
        let mut withdrawn = BTreeSet::new();
        for (action, payload) in
            db.delta_iter(from, ProtocolVersion::V1).unwrap()
        {
            let Payload::Origin(vrp) = payload else {
                panic!("origin-only universe");
            };
            match action {
                Action::Announce => announced.insert(vrp),
                Action::Withdraw => withdrawn.insert(vrp),
            };
        }

        prop_assert!(announced.is_disjoint(&withdrawn));

        let mut composed = start;
        for v in &announced {
            composed.insert(*v);
        }
        for v in &withdrawn {
            composed.remove(v);
        }
        prop_assert_eq!(composed, end);
    }
}
