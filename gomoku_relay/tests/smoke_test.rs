// Integration smoke test for the relay server.
//
// Starts a relay on localhost, connects raw TCP clients, and exercises the
// full protocol lifecycle: greeting, room create/join, ready handshake,
// game message forwarding, and departure propagation.
//
// Each client is a plain TCP socket using the protocol crate's framing and
// message types, no `Session` involved. This tests the relay end-to-end
// without any client-side state machine in the way.

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::time::Duration;

use gomoku_protocol::framing::{read_message, write_message};
use gomoku_protocol::message::{
    ClientMessage, GameMessage, GamePayload, JoinError, ServerMessage,
};
use gomoku_protocol::types::{PlayerId, RoomId};
use gomoku_relay::server::{RelayConfig, start_relay};
use gomoku_rules::Player;

/// Helper: send a ClientMessage over a framed TCP stream.
fn send(writer: &mut BufWriter<TcpStream>, msg: &ClientMessage) {
    let json = serde_json::to_vec(msg).unwrap();
    write_message(writer, &json).unwrap();
}

/// Helper: receive a ServerMessage from a framed TCP stream.
fn recv(reader: &mut BufReader<TcpStream>) -> ServerMessage {
    let bytes = read_message(reader).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Connect to the relay and read the Welcome greeting. Returns the
/// reader/writer pair and the assigned player ID.
fn connect_and_welcome(
    addr: std::net::SocketAddr,
) -> (BufReader<TcpStream>, BufWriter<TcpStream>, PlayerId) {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let reader_stream = stream.try_clone().unwrap();
    let writer = BufWriter::new(stream);
    let mut reader = BufReader::new(reader_stream);

    let msg = recv(&mut reader);
    let player_id = match msg {
        ServerMessage::Welcome { player_id } => player_id,
        other => panic!("expected Welcome, got {other:?}"),
    };

    (reader, writer, player_id)
}

/// Create a room through the given writer and return its code.
fn create_room(
    reader: &mut BufReader<TcpStream>,
    writer: &mut BufWriter<TcpStream>,
) -> RoomId {
    send(writer, &ClientMessage::CreateRoom);
    match recv(reader) {
        ServerMessage::RoomCreated { room_id, role, .. } => {
            assert_eq!(role, Player::Black);
            room_id
        }
        other => panic!("expected RoomCreated, got {other:?}"),
    }
}

#[test]
fn full_room_lifecycle() {
    let (handle, addr) = start_relay(RelayConfig { port: 0 }).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    // 1. Two clients connect and are greeted with distinct ids.
    let (mut reader_a, mut writer_a, id_a) = connect_and_welcome(addr);
    let (mut reader_b, mut writer_b, id_b) = connect_and_welcome(addr);
    assert_ne!(id_a, id_b);

    // 2. A creates a room and gets a 6-digit code with the black role.
    let room_id = create_room(&mut reader_a, &mut writer_a);
    assert_eq!(room_id.as_str().len(), 6);

    // 3. B joins. A is notified; B is seated as white.
    send(
        &mut writer_b,
        &ClientMessage::JoinRoom {
            room_id: room_id.clone(),
        },
    );
    match recv(&mut reader_a) {
        ServerMessage::PlayerJoined { guest_id, .. } => assert_eq!(guest_id, id_b),
        other => panic!("expected PlayerJoined, got {other:?}"),
    }
    match recv(&mut reader_b) {
        ServerMessage::RoomJoined {
            room_id: joined,
            role,
            ..
        } => {
            assert_eq!(joined, room_id);
            assert_eq!(role, Player::White);
        }
        other => panic!("expected RoomJoined, got {other:?}"),
    }

    // 4. Ready handshake: each ready is echoed to both; the second one
    //    triggers exactly one GameStart per client.
    send(&mut writer_a, &ClientMessage::PlayerReady);
    assert!(matches!(
        recv(&mut reader_a),
        ServerMessage::ReadyUpdate {
            host_ready: true,
            guest_ready: false
        }
    ));
    assert!(matches!(
        recv(&mut reader_b),
        ServerMessage::ReadyUpdate {
            host_ready: true,
            guest_ready: false
        }
    ));

    send(&mut writer_b, &ClientMessage::PlayerReady);
    assert!(matches!(
        recv(&mut reader_a),
        ServerMessage::ReadyUpdate {
            host_ready: true,
            guest_ready: true
        }
    ));
    assert!(matches!(recv(&mut reader_a), ServerMessage::GameStart));
    assert!(matches!(
        recv(&mut reader_b),
        ServerMessage::ReadyUpdate { .. }
    ));
    assert!(matches!(recv(&mut reader_b), ServerMessage::GameStart));

    // 5. A's move is forwarded to B, stamped with A's handle.
    send(
        &mut writer_a,
        &ClientMessage::Game {
            message: GameMessage {
                payload: GamePayload::Move {
                    row: 7,
                    col: 7,
                    player: Player::Black,
                },
                timestamp: 1,
                player_id: id_a,
            },
        },
    );
    match recv(&mut reader_b) {
        ServerMessage::Game {
            sender_id, message, ..
        } => {
            assert_eq!(sender_id, id_a);
            assert_eq!(
                message.payload,
                GamePayload::Move {
                    row: 7,
                    col: 7,
                    player: Player::Black
                }
            );
        }
        other => panic!("expected Game, got {other:?}"),
    }

    // 6. B leaves. A is notified and the room accepts a replacement guest
    //    on the same code.
    send(&mut writer_b, &ClientMessage::Goodbye);
    assert!(matches!(
        recv(&mut reader_a),
        ServerMessage::GuestDisconnected
    ));

    let (mut reader_c, mut writer_c, _id_c) = connect_and_welcome(addr);
    send(
        &mut writer_c,
        &ClientMessage::JoinRoom {
            room_id: room_id.clone(),
        },
    );
    assert!(matches!(recv(&mut reader_a), ServerMessage::PlayerJoined { .. }));
    assert!(matches!(recv(&mut reader_c), ServerMessage::RoomJoined { .. }));

    handle.stop();
}

#[test]
fn join_unknown_room_is_not_found() {
    let (handle, addr) = start_relay(RelayConfig { port: 0 }).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let (mut reader, mut writer, _id) = connect_and_welcome(addr);
    let bogus = RoomId::parse("000001").unwrap();
    send(
        &mut writer,
        &ClientMessage::JoinRoom {
            room_id: bogus.clone(),
        },
    );

    match recv(&mut reader) {
        ServerMessage::JoinRejected { error } => {
            assert_eq!(error, JoinError::NotFound { room_id: bogus });
        }
        other => panic!("expected JoinRejected, got {other:?}"),
    }

    handle.stop();
}

#[test]
fn third_player_is_rejected_full() {
    let (handle, addr) = start_relay(RelayConfig { port: 0 }).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let (mut reader_a, mut writer_a, _) = connect_and_welcome(addr);
    let (mut reader_b, mut writer_b, _) = connect_and_welcome(addr);
    let (mut reader_c, mut writer_c, _) = connect_and_welcome(addr);

    let room_id = create_room(&mut reader_a, &mut writer_a);
    send(
        &mut writer_b,
        &ClientMessage::JoinRoom {
            room_id: room_id.clone(),
        },
    );
    assert!(matches!(recv(&mut reader_b), ServerMessage::RoomJoined { .. }));

    send(
        &mut writer_c,
        &ClientMessage::JoinRoom {
            room_id: room_id.clone(),
        },
    );
    match recv(&mut reader_c) {
        ServerMessage::JoinRejected { error } => {
            assert_eq!(error, JoinError::Full { room_id });
        }
        other => panic!("expected JoinRejected, got {other:?}"),
    }

    handle.stop();
}

#[test]
fn stop_closes_client_connections() {
    let (handle, addr) = start_relay(RelayConfig { port: 0 }).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let (mut reader, _writer, _id) = connect_and_welcome(addr);
    handle.stop();

    // The relay shuts the socket down on its way out, so the next read
    // fails instead of blocking forever.
    assert!(read_message(&mut reader).is_err(), "client must see EOF");
}

#[test]
fn host_departure_closes_the_room() {
    let (handle, addr) = start_relay(RelayConfig { port: 0 }).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let (mut reader_a, mut writer_a, _) = connect_and_welcome(addr);
    let (mut reader_b, mut writer_b, _) = connect_and_welcome(addr);

    let room_id = create_room(&mut reader_a, &mut writer_a);
    send(
        &mut writer_b,
        &ClientMessage::JoinRoom {
            room_id: room_id.clone(),
        },
    );
    assert!(matches!(recv(&mut reader_b), ServerMessage::RoomJoined { .. }));

    // Host drops the connection entirely (no Goodbye); the reader thread
    // observes EOF and the registry still cleans up.
    drop(writer_a);
    drop(reader_a);

    assert!(matches!(
        recv(&mut reader_b),
        ServerMessage::HostDisconnected
    ));

    // The code now resolves to nothing.
    send(&mut writer_b, &ClientMessage::JoinRoom { room_id: room_id.clone() });
    match recv(&mut reader_b) {
        ServerMessage::JoinRejected { error } => {
            assert_eq!(error, JoinError::NotFound { room_id });
        }
        other => panic!("expected JoinRejected, got {other:?}"),
    }

    handle.stop();
}
