//! Fuzz-style property tests for the wire codec
//!
//! Decoders must reject arbitrary network input gracefully, and any message
//! the encoder produces must decode back to itself.

use deepmine_core::{BlockType, ChatKind, PlayerTeam, PlayerTool};
use deepmine_net::{
    decode_client_message, decode_handshake, decode_server_message, encode_client_message,
    encode_handshake, encode_server_message, BlockColumn, ClientMessage, Handshake, PlayerState,
    ServerMessage, COLUMN_CELLS,
};
use glam::Vec3;
use proptest::prelude::*;

fn vec3() -> impl Strategy<Value = Vec3> {
    (-1000.0f32..1000.0, -1000.0f32..1000.0, -1000.0f32..1000.0)
        .prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

fn block() -> impl Strategy<Value = BlockType> {
    prop::sample::select(BlockType::ALL.to_vec())
}

proptest! {
    /// Property: Arbitrary bytes don't crash the client-message decoder
    #[test]
    fn arbitrary_bytes_dont_crash_client(
        random_bytes in prop::collection::vec(any::<u8>(), 0..2000),
    ) {
        let _result = decode_client_message(&random_bytes);
    }

    /// Property: Arbitrary bytes don't crash the server-message decoder
    #[test]
    fn arbitrary_bytes_dont_crash_server(
        random_bytes in prop::collection::vec(any::<u8>(), 0..2000),
    ) {
        let _result = decode_server_message(&random_bytes);
    }

    /// Property: Handshakes roundtrip
    #[test]
    fn handshake_roundtrips(name in "\\PC{0,32}", version in "[a-z0-9.]{0,8}") {
        let handshake = Handshake { name, version };
        let encoded = encode_handshake(&handshake).unwrap();
        prop_assert_eq!(decode_handshake(&encoded).unwrap(), handshake);
    }

    /// Property: Chat lines roundtrip, including multi-byte text
    #[test]
    fn chat_roundtrips(text in "\\PC{0,200}", team in any::<bool>()) {
        let kind = if team { ChatKind::SayRedTeam } else { ChatKind::SayAll };
        let msg = ServerMessage::ChatMessage { kind, text };
        let encoded = encode_server_message(&msg).unwrap();
        prop_assert_eq!(decode_server_message(&encoded).unwrap(), msg);
    }

    /// Property: Player updates roundtrip in both directions
    #[test]
    fn player_update_roundtrips(
        position in vec3(),
        heading in vec3(),
        player_id in any::<u32>(),
        score in any::<u16>(),
        using_tool in any::<bool>(),
    ) {
        let state = PlayerState {
            position,
            heading,
            tool: PlayerTool::ConstructionGun,
            using_tool,
        };
        let up = ClientMessage::PlayerUpdate(state);
        let encoded = encode_client_message(&up).unwrap();
        prop_assert_eq!(decode_client_message(&encoded).unwrap(), up);

        let down = ServerMessage::PlayerUpdate { player_id, state, score_hundreds: score };
        let encoded = encode_server_message(&down).unwrap();
        prop_assert_eq!(decode_server_message(&encoded).unwrap(), down);
    }

    /// Property: Bulk columns keep every cell in place
    #[test]
    fn bulk_column_roundtrips(
        x in 0u8..64,
        band in 0u8..4,
        cells in prop::collection::vec(block(), COLUMN_CELLS),
    ) {
        let mut column = BlockColumn::empty(x, band * 16);
        column.blocks.copy_from_slice(&cells);
        let msg = ServerMessage::BlockBulkTransfer(column);
        let encoded = encode_server_message(&msg).unwrap();
        prop_assert_eq!(encoded.len(), 3 + COLUMN_CELLS);
        prop_assert_eq!(decode_server_message(&encoded).unwrap(), msg);
    }

    /// Property: Truncated frames fail without panicking
    #[test]
    fn truncated_frames_rejected(truncate_at in 0usize..40) {
        let msg = ServerMessage::SetBeacon {
            position: Vec3::new(1.0, 2.0, 3.0),
            text: "NORTH".into(),
            team: PlayerTeam::Blue,
        };
        let mut encoded = encode_server_message(&msg).unwrap();
        if truncate_at < encoded.len() {
            encoded.truncate(truncate_at);
            prop_assert!(decode_server_message(&encoded).is_err());
        }
    }

    /// Property: Oversized string length prefixes are rejected
    #[test]
    fn oversized_length_rejected(claimed_length in 100u16..5000u16) {
        let mut frame = vec![deepmine_net::MessageKind::ChatMessage as u8, 1];
        frame.extend_from_slice(&claimed_length.to_le_bytes());
        frame.extend_from_slice(b"short");
        prop_assert!(decode_server_message(&frame).is_err());
    }

    /// Property: Corrupted payloads don't crash
    #[test]
    fn corrupted_payload_handled(flip_pos in 0usize..30, flip_bit in 0u8..8) {
        let msg = ClientMessage::UseTool {
            position: Vec3::ONE,
            heading: Vec3::NEG_Z,
            tool: PlayerTool::Pickaxe,
            block: BlockType::Dirt,
        };
        let mut encoded = encode_client_message(&msg).unwrap();
        if flip_pos < encoded.len() {
            encoded[flip_pos] ^= 1 << flip_bit;
            let _result = decode_client_message(&encoded);
        }
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn empty_frame_fails() {
        assert!(decode_client_message(&[]).is_err());
        assert!(decode_server_message(&[]).is_err());
    }

    #[test]
    fn too_short_fails() {
        assert!(decode_client_message(&[0, 2, 3]).is_err());
    }

    #[test]
    fn valid_roundtrip() {
        let msg = ClientMessage::PlayerSetTeam {
            team: PlayerTeam::Red,
        };
        let encoded = encode_client_message(&msg).unwrap();
        assert_eq!(decode_client_message(&encoded).unwrap(), msg);
    }
}
