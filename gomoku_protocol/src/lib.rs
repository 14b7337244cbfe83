// Wire protocol for the Gomoku room relay.
//
// This crate defines the message types, framing, and serialization used by
// the relay (`gomoku_relay`) and game clients to communicate over TCP. It is
// shared between both sides and has no dependency on networking code.
//
// Module overview:
// - `types.rs`:    `PlayerId` (ephemeral relay handle), `RoomId` (validated
//                  6-digit room code), `now_millis` timestamps.
// - `message.rs`:  Client-to-relay and relay-to-client message enums, plus
//                  the `GameMessage` envelope carrying application payloads
//                  between the two players.
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream:
//                  4-byte big-endian length prefix, then JSON payload.
//
// Design decisions:
// - **JSON serialization.** Human-debuggable; colors travel as
//   `"black"`/`"white"` strings and room codes as 6-digit strings.
// - **The relay never interprets `GamePayload`.** Room matching and message
//   forwarding are the relay's whole job; game rules live in the clients.
// - **No async runtime.** Uses `std::io::Read`/`Write` for framing,
//   compatible with blocking TCP streams and buffered wrappers.

pub mod framing;
pub mod message;
pub mod types;

pub use framing::{MAX_MESSAGE_SIZE, read_message, write_message};
pub use message::{ClientMessage, GameMessage, GamePayload, JoinError, ServerMessage};
pub use types::{PlayerId, ROOM_ID_LEN, RoomId, RoomIdError, now_millis};
