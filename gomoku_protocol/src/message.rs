// Protocol messages for client-relay communication.
//
// Two enums define the transport vocabulary:
// - `ClientMessage`: sent by game clients to the relay.
// - `ServerMessage`: sent by the relay to game clients.
//
// Application traffic between the two players travels inside `GameMessage`
// envelopes: the relay forwards the envelope verbatim to the other occupant
// of the sender's room, stamping it with the sender's handle and server time.
// The relay never interprets `GamePayload`; game semantics live entirely in
// the clients, which is what lets both sides re-derive win/draw themselves
// instead of trusting a transmitted board.
//
// All enums are exhaustively tagged; a payload with an unknown tag fails
// deserialization and the sender is disconnected, never silently ignored.

use serde::{Deserialize, Serialize};
use std::fmt;

use gomoku_rules::Player;

use crate::types::{PlayerId, RoomId};

/// Messages sent by a client to the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Open a new room; the requester becomes host (black, moves first).
    CreateRoom,
    /// Join an existing room; the requester becomes guest (white).
    JoinRoom { room_id: RoomId },
    /// Mark the sender ready; the game starts once both occupants are.
    PlayerReady,
    /// Application traffic for the other occupant of the sender's room.
    Game { message: GameMessage },
    /// Leave the current room but keep the connection.
    LeaveRoom,
    /// Graceful disconnect.
    Goodbye,
}

/// Messages sent by the relay to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Connection accepted; here is your ephemeral handle.
    Welcome { player_id: PlayerId },
    /// CreateRoom succeeded. The creator is host and plays black.
    RoomCreated {
        room_id: RoomId,
        player_id: PlayerId,
        role: Player,
    },
    /// JoinRoom succeeded. The joiner is guest and plays white.
    RoomJoined {
        room_id: RoomId,
        player_id: PlayerId,
        role: Player,
    },
    /// JoinRoom failed.
    JoinRejected { error: JoinError },
    /// Sent to the host when a guest joins their room.
    PlayerJoined { guest_id: PlayerId, room_id: RoomId },
    /// Ready flags changed; sent to both occupants.
    ReadyUpdate { host_ready: bool, guest_ready: bool },
    /// Both players ready, the game begins. Broadcast exactly once per room.
    GameStart,
    /// Relayed application traffic, stamped with sender and server time.
    Game {
        sender_id: PlayerId,
        timestamp: u64,
        message: GameMessage,
    },
    /// The host left; the room is gone. Terminal for the guest.
    HostDisconnected,
    /// The guest left; the room survives and can accept a new guest.
    GuestDisconnected,
}

/// Why a JoinRoom request was rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JoinError {
    /// No live room has this code.
    NotFound { room_id: RoomId },
    /// The room already has a guest.
    Full { room_id: RoomId },
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::NotFound { room_id } => write!(
                f,
                "room {room_id} does not exist; check the room number or ask \
                 the host to create the room again"
            ),
            JoinError::Full { room_id } => write!(
                f,
                "room {room_id} is full; only two players are allowed per room"
            ),
        }
    }
}

/// One application message, as emitted by a client. The relay adds the
/// sender handle and server timestamp when forwarding (`ServerMessage::Game`);
/// `timestamp` here is the sender's emission time and `player_id` the
/// sender's own handle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameMessage {
    pub payload: GamePayload,
    pub timestamp: u64,
    pub player_id: PlayerId,
}

/// Application message kinds carried between the two players.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GamePayload {
    /// A stone placed by the sender.
    Move {
        row: usize,
        col: usize,
        player: Player,
    },
    /// Reset to a fresh game.
    Restart,
    /// Pop the last two moves (one per player). Host-initiated only.
    Undo,
    /// Game begins (peer-direct topologies; the relay broadcasts
    /// `ServerMessage::GameStart` itself).
    StartGame,
    /// Room code announcement (peer-direct topologies only).
    RoomInfo { room_number: RoomId },
    /// Sender is ready (peer-direct topologies only).
    PlayerReady,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::framing::{read_message, write_message};

    /// Serialize, frame, unframe, deserialize; both enums share the path.
    fn roundtrip<T>(msg: &T)
    where
        T: Serialize + for<'de> Deserialize<'de> + PartialEq + fmt::Debug,
    {
        let json = serde_json::to_vec(msg).unwrap();
        let mut wire = Vec::new();
        write_message(&mut wire, &json).unwrap();

        let mut cursor = Cursor::new(&wire);
        let recovered_json = read_message(&mut cursor).unwrap();
        let recovered: T = serde_json::from_slice(&recovered_json).unwrap();
        assert_eq!(&recovered, msg);
    }

    #[test]
    fn roundtrip_join_room() {
        roundtrip(&ClientMessage::JoinRoom {
            room_id: RoomId::parse("482913").unwrap(),
        });
    }

    #[test]
    fn roundtrip_move_envelope() {
        roundtrip(&ClientMessage::Game {
            message: GameMessage {
                payload: GamePayload::Move {
                    row: 7,
                    col: 7,
                    player: Player::Black,
                },
                timestamp: 1_700_000_000_000,
                player_id: PlayerId(3),
            },
        });
    }

    #[test]
    fn roundtrip_relayed_game() {
        roundtrip(&ServerMessage::Game {
            sender_id: PlayerId(1),
            timestamp: 1_700_000_000_123,
            message: GameMessage {
                payload: GamePayload::Undo,
                timestamp: 1_700_000_000_100,
                player_id: PlayerId(1),
            },
        });
    }

    #[test]
    fn roundtrip_join_rejected() {
        roundtrip(&ServerMessage::JoinRejected {
            error: JoinError::Full {
                room_id: RoomId::parse("123456").unwrap(),
            },
        });
    }

    #[test]
    fn roundtrip_ready_update() {
        roundtrip(&ServerMessage::ReadyUpdate {
            host_ready: true,
            guest_ready: false,
        });
    }

    #[test]
    fn move_payload_uses_lowercase_colors() {
        let json = serde_json::to_string(&GamePayload::Move {
            row: 7,
            col: 8,
            player: Player::White,
        })
        .unwrap();
        assert!(json.contains("\"white\""), "got {json}");
    }

    #[test]
    fn unknown_payload_tag_is_rejected() {
        let err = serde_json::from_str::<GamePayload>(r#"{"Chat":{"text":"hi"}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn join_error_messages_are_human_readable() {
        let room_id = RoomId::parse("482913").unwrap();
        let not_found = JoinError::NotFound {
            room_id: room_id.clone(),
        };
        assert!(not_found.to_string().contains("482913"));
        assert!(not_found.to_string().contains("does not exist"));
        let full = JoinError::Full { room_id };
        assert!(full.to_string().contains("is full"));
    }
}
