//! Static table of protocol events.
//!
//! Every log the protocol router emits shares one topic0,
//! `ProtocolEvent(bytes32 indexed eventType, bytes payload)`; topic1 carries
//! the per-event identifier, which is the keccak hash of the inner event
//! signature. This table maps those identifiers to a payload schema and a
//! handler kind. Identifiers outside the table are other contracts' traffic
//! and are ignored.

use alloy_primitives::{b256, B256};

use crate::chain::codec::FieldType;

/// topic0 of every router log: `ProtocolEvent(bytes32,bytes)`.
pub const PROTOCOL_EVENT_TOPIC: B256 =
    b256!("7e4f9249de71b93263beddf5fd5ce5d5494079d795889c02af2bd03520418b52");

/// Which projection a decoded event feeds. One variant per registered
/// event; the projector matches on this instead of re-hashing names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ContestCreated,
    SpeculationCreated,
    SpeculationLocked,
    SpeculationScored,
    PositionCreated,
    PositionMatched,
    WinningsClaimed,
    LeaderboardCreated,
    LeaderboardRuleUpdated,
    UserRegistered,
    NewHighestRoi,
    LeaderboardPositionCreated,
}

pub struct EventSpec {
    pub name: &'static str,
    /// topic1: keccak of the inner event signature.
    pub topic: B256,
    pub schema: &'static [FieldType],
    pub kind: EventKind,
}

use FieldType::{Address, Bool, Bytes32, Int64, Str, Uint256, Uint64};

pub static EVENTS: &[EventSpec] = &[
    EventSpec {
        name: "ContestCreated",
        // ContestCreated(uint256,string,address)
        topic: b256!("297e660ada0355e6b63fc0378917d19e93d2b3570669897eb8a6523b834290e4"),
        schema: &[Uint256, Str, Address],
        kind: EventKind::ContestCreated,
    },
    EventSpec {
        name: "SpeculationCreated",
        // SpeculationCreated(uint256,uint256,uint256,address,int64,address)
        topic: b256!("0e038a3a0b4f26fe49e9b303851a0fb25c2c7f891fc2a153bf46174d560e4962"),
        schema: &[Uint256, Uint256, Uint256, Address, Int64, Address],
        kind: EventKind::SpeculationCreated,
    },
    EventSpec {
        name: "SpeculationLocked",
        // SpeculationLocked(uint256)
        topic: b256!("51770df05871b85ea7f7593dd760bd6c8d9c43294c6119b8f915eb202fdd893c"),
        schema: &[Uint256],
        kind: EventKind::SpeculationLocked,
    },
    EventSpec {
        name: "SpeculationScored",
        // SpeculationScored(uint256,uint256,uint64)
        topic: b256!("fab32feb58d5b792a3dfc4869e6ac5193c453a2155861fd0466687deb465e32f"),
        schema: &[Uint256, Uint256, Uint64],
        kind: EventKind::SpeculationScored,
    },
    EventSpec {
        name: "PositionCreated",
        // PositionCreated(uint256,address,uint256,uint64,uint256,uint64,uint64,uint256)
        topic: b256!("5aaa19cf0facc37b7ae5f3483446f7bc29e6968f2948773f24718c1faab90332"),
        schema: &[Uint256, Address, Uint256, Uint64, Uint256, Uint64, Uint64, Uint256],
        kind: EventKind::PositionCreated,
    },
    EventSpec {
        name: "PositionMatched",
        // PositionMatched(uint256,address,address,uint256,uint64,uint256)
        topic: b256!("2cb9db43b64888da266ff6eb55d04b091ecc081a3681a9abc13df6f3b29c2892"),
        schema: &[Uint256, Address, Address, Uint256, Uint64, Uint256],
        kind: EventKind::PositionMatched,
    },
    EventSpec {
        name: "WinningsClaimed",
        // WinningsClaimed(uint256,address,uint256,uint64,uint256)
        topic: b256!("889f65f43a8c9089372ed93e5dced555259159d39dcdc67be52fb3b3d4c75410"),
        schema: &[Uint256, Address, Uint256, Uint64, Uint256],
        kind: EventKind::WinningsClaimed,
    },
    EventSpec {
        name: "LeaderboardCreated",
        // LeaderboardCreated(uint256,uint256,uint256)
        topic: b256!("fde91340963ee1fb2345cfcf256137198a30c81e01c47f32dca9fb9e3278bc2d"),
        schema: &[Uint256, Uint256, Uint256],
        kind: EventKind::LeaderboardCreated,
    },
    EventSpec {
        name: "LeaderboardRuleUpdated",
        // LeaderboardRuleUpdated(uint256,bytes32,uint256)
        topic: b256!("7d2e37083684a134af37e3d17266829781e8b8933c76181e744778af00598526"),
        schema: &[Uint256, Bytes32, Uint256],
        kind: EventKind::LeaderboardRuleUpdated,
    },
    EventSpec {
        name: "UserRegistered",
        // UserRegistered(uint256,address,uint256,bool)
        topic: b256!("6b132894b6420e7e58a9e5059cd3007f34a5d720f4fb5820aac604ea317f9787"),
        schema: &[Uint256, Address, Uint256, Bool],
        kind: EventKind::UserRegistered,
    },
    EventSpec {
        name: "NewHighestROI",
        // NewHighestROI(uint256,address,int64)
        topic: b256!("47f91d97843d429c358e100138a0a67ab561339e076f945c30f569ec8fe86660"),
        schema: &[Uint256, Address, Int64],
        kind: EventKind::NewHighestRoi,
    },
    EventSpec {
        name: "LeaderboardPositionCreated",
        // LeaderboardPositionCreated(uint256,uint256,address,uint256,uint64,uint256)
        topic: b256!("127663d40dbe2cfc3f6a1f32758f050779cdff177fbaddb1b2460c6f561025b9"),
        schema: &[Uint256, Uint256, Address, Uint256, Uint64, Uint256],
        kind: EventKind::LeaderboardPositionCreated,
    },
];

/// Runtime dispatch: topic1 -> event spec.
pub fn by_topic(topic: &B256) -> Option<&'static EventSpec> {
    EVENTS.iter().find(|e| &e.topic == topic)
}

/// Backfill tooling: event name -> event spec.
pub fn by_name(name: &str) -> Option<&'static EventSpec> {
    EVENTS.iter().find(|e| e.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_resolves_by_topic_and_name() {
        for spec in EVENTS {
            assert_eq!(by_topic(&spec.topic).unwrap().name, spec.name);
            assert_eq!(by_name(spec.name).unwrap().kind, spec.kind);
        }
    }

    #[test]
    fn topics_are_distinct() {
        for (i, a) in EVENTS.iter().enumerate() {
            for b in &EVENTS[i + 1..] {
                assert_ne!(a.topic, b.topic, "{} vs {}", a.name, b.name);
            }
        }
    }

    #[test]
    fn unknown_topic_is_not_registered() {
        assert!(by_topic(&B256::ZERO).is_none());
        assert!(by_topic(&PROTOCOL_EVENT_TOPIC).is_none());
    }
}
