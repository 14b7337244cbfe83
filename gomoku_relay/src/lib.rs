// Room relay server and client session for networked Gomoku.
//
// The relay is a thin message broker: it matches two players into a room by
// 6-digit code, runs the ready handshake, and forwards game envelopes
// between them. It never interprets game payloads; rules and turn order
// live in the clients (`gomoku_sync`).
//
// Module overview:
// - `registry.rs`:  Room registry: connections, room table, host/guest
//                   occupancy, ready handshake, departure propagation. The
//                   core data structure that `server.rs` drives.
// - `server.rs`:    TCP listener, reader threads (one per client), and the
//                   main event loop. Uses `std::net` with a
//                   thread-per-reader architecture and an `mpsc` channel to
//                   funnel events into the single-threaded `Registry`.
// - `client.rs`:    Client-side `Session`: connection state machine,
//                   create/join with timeout and backoff retry, automatic
//                   reconnect on connection loss, non-blocking `poll()`.
//                   Purely std TCP + protocol framing + mpsc, so integration
//                   tests and any frontend can use it directly.
//
// Dependencies: `gomoku_protocol` (shared message types and framing),
// `gomoku_rules` (player colors for role assignment).
//
// The relay can run as a standalone binary (`main.rs`) or be embedded in a
// test or game process via the library API (`start_relay`).

pub mod client;
pub mod registry;
pub mod server;

pub use client::{Session, SessionError, SessionEvent, Status};
pub use server::{RelayConfig, RelayHandle, start_relay};
