//! Codec and roster invariants over generated inputs.

use std::collections::HashSet;
use std::net::SocketAddr;

use glam::DMat4;
use huddle::{EventKind, GameEvent, Packet, PacketKind, PlayerRoster, TransformPayload};
use proptest::prelude::*;

fn matrix() -> impl Strategy<Value = DMat4> {
    prop::array::uniform16(-1.0e9f64..1.0e9).prop_map(|cols| DMat4::from_cols_array(&cols))
}

fn plain_kind() -> impl Strategy<Value = EventKind> {
    prop::sample::select(vec![
        EventKind::Connect,
        EventKind::SelectCharacter,
        EventKind::LockCharacter,
        EventKind::GameStart,
        EventKind::PlayerTransform,
        EventKind::InitClientState,
    ])
}

fn addr() -> SocketAddr {
    "127.0.0.1:27015".parse().unwrap()
}

// Property: transform payloads survive the wire unchanged
proptest! {
    #[test]
    fn prop_transform_roundtrip(entity in any::<u32>(), m in matrix()) {
        let payload = TransformPayload::new(entity, m);
        let bytes = payload.to_bytes();
        prop_assert_eq!(bytes.len(), huddle::net::TRANSFORM_PAYLOAD_SIZE);
        prop_assert_eq!(TransformPayload::from_bytes(&bytes).unwrap(), payload);
    }
}

// Property: header-only events survive the wire unchanged
proptest! {
    #[test]
    fn prop_plain_event_roundtrip(kind in plain_kind(), player in any::<u8>(), detail in any::<u8>()) {
        let event = GameEvent::new(kind, player, detail).unwrap();
        prop_assert_eq!(GameEvent::from_bytes(&event.to_bytes()).unwrap(), event);
    }
}

// Property: movement events keep their transform through a GameData packet
proptest! {
    #[test]
    fn prop_movement_packet_roundtrip(player in any::<u8>(), entity in any::<u32>(), m in matrix()) {
        let event = GameEvent::movement(player, TransformPayload::new(entity, m));
        let data = Packet::game_data(addr(), &event).serialize().unwrap();

        let packet = Packet::deserialize(&data, addr()).unwrap();
        prop_assert_eq!(packet.kind, PacketKind::GameData);
        prop_assert_eq!(packet.game_event().unwrap().unwrap(), event);
    }
}

// Property: arbitrary datagrams decode or fail, never panic
proptest! {
    #[test]
    fn prop_deserialize_never_panics(data in prop::collection::vec(any::<u8>(), 0..300)) {
        let _ = Packet::deserialize(&data, addr());
    }
}

// Property: live player ids stay unique and inside the roster capacity
proptest! {
    #[test]
    fn prop_roster_ids_unique(ops in prop::collection::vec(any::<bool>(), 0..64)) {
        let mut roster = PlayerRoster::new(8);
        let mut live: Vec<u8> = Vec::new();

        for register in ops {
            if register {
                match roster.register(None) {
                    Ok(id) => live.push(id),
                    Err(_) => {
                        prop_assert_eq!(live.len(), 8);
                    }
                }
            } else if let Some(id) = live.pop() {
                roster.unregister(id).unwrap();
            }

            let unique: HashSet<_> = live.iter().copied().collect();
            prop_assert_eq!(unique.len(), live.len());
            prop_assert!(live.iter().all(|id| *id < 8));
            prop_assert_eq!(roster.len(), live.len());
        }
    }
}
