// Room registry for the relay server.
//
// `Registry` is the central data structure that `server.rs` drives. It owns
// every connection's write half, the live room table, and the player→room
// membership index. All mutation happens through methods called from the
// server's single-threaded main loop, with no internal locking.
//
// Key responsibilities:
// - Connection management: assign ephemeral `PlayerId`s, greet new
//   connections with `Welcome`, drop write halves on disconnect.
// - Room lifecycle: 6-digit code generation with collision avoidance,
//   host/guest occupancy, NOT_FOUND/FULL join rejection.
// - Ready handshake: track per-side ready flags, broadcast updates, and
//   emit exactly one `GameStart` per room once both sides are ready.
// - Message relay: forward `GameMessage` envelopes to the sender's peer,
//   stamped with sender handle and server time. Payloads are never
//   inspected.
// - Departure propagation: a host leaving deletes the room and terminates
//   the guest's session; a guest leaving resets the room to waiting state.
//
// Writing to client streams: `Registry` holds cloned `TcpStream` write
// halves wrapped in `BufWriter`. Write errors on a single client are logged
// but do not crash the relay; the reader thread for that client will
// detect the broken pipe and send a `Disconnected` event.

use std::collections::BTreeMap;
use std::io::BufWriter;
use std::net::{Shutdown, TcpStream};

use rand::Rng;

use gomoku_protocol::framing::write_message;
use gomoku_protocol::message::{GameMessage, JoinError, ServerMessage};
use gomoku_protocol::types::{PlayerId, RoomId, now_millis};
use gomoku_rules::Player;

/// One live room: a host, at most one guest, and the ready handshake state.
/// `created_at` is server time at creation and survives a guest reset.
pub struct Room {
    host: PlayerId,
    guest: Option<PlayerId>,
    host_ready: bool,
    guest_ready: bool,
    game_started: bool,
    created_at: u64,
}

impl Room {
    pub fn host(&self) -> PlayerId {
        self.host
    }

    /// Server time (epoch millis) when the room was opened.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn guest(&self) -> Option<PlayerId> {
        self.guest
    }

    pub fn is_full(&self) -> bool {
        self.guest.is_some()
    }

    pub fn is_game_started(&self) -> bool {
        self.game_started
    }

    /// The other occupant, if the given player is in this room and has one.
    fn peer_of(&self, player_id: PlayerId) -> Option<PlayerId> {
        if self.host == player_id {
            self.guest
        } else if self.guest == Some(player_id) {
            Some(self.host)
        } else {
            None
        }
    }

    fn occupants(&self) -> Vec<PlayerId> {
        std::iter::once(self.host).chain(self.guest).collect()
    }
}

/// Relay-wide registry of connections and rooms.
pub struct Registry {
    connections: BTreeMap<PlayerId, BufWriter<TcpStream>>,
    rooms: BTreeMap<RoomId, Room>,
    memberships: BTreeMap<PlayerId, RoomId>,
    next_player_id: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: BTreeMap::new(),
            rooms: BTreeMap::new(),
            memberships: BTreeMap::new(),
            next_player_id: 0,
        }
    }

    /// Register a new connection's write half and greet it with `Welcome`.
    ///
    /// The returned `PlayerId` should be used to tag the reader thread for
    /// this connection so that subsequent `InternalEvent::MessageFrom`
    /// events carry the correct ID.
    pub fn register(&mut self, stream: TcpStream) -> PlayerId {
        let id = PlayerId(self.next_player_id);
        self.next_player_id += 1;
        self.connections.insert(id, BufWriter::new(stream));
        self.send_to(id, &ServerMessage::Welcome { player_id: id });
        tracing::info!(player = %id, "client connected");
        id
    }

    /// Open a new room with the requester as host. The host always plays
    /// black and moves first. A requester already in a room vacates it
    /// first, so one connection never occupies two rooms.
    pub fn create_room(&mut self, requester: PlayerId) {
        self.vacate(requester);

        let room_id = self.fresh_room_id();
        self.rooms.insert(
            room_id.clone(),
            Room {
                host: requester,
                guest: None,
                host_ready: false,
                guest_ready: false,
                game_started: false,
                created_at: now_millis(),
            },
        );
        self.memberships.insert(requester, room_id.clone());
        tracing::info!(%room_id, host = %requester, "room created");

        self.send_to(
            requester,
            &ServerMessage::RoomCreated {
                room_id,
                player_id: requester,
                role: Player::Black,
            },
        );
    }

    /// Join an existing room as guest (white). Rejects with `NotFound` when
    /// no live room has the code and `Full` when a guest is already seated.
    pub fn join_room(&mut self, requester: PlayerId, room_id: RoomId) {
        self.vacate(requester);

        let seated = match self.rooms.get_mut(&room_id) {
            None => Err(JoinError::NotFound {
                room_id: room_id.clone(),
            }),
            Some(room) if room.is_full() => Err(JoinError::Full {
                room_id: room_id.clone(),
            }),
            Some(room) => {
                room.guest = Some(requester);
                Ok(room.host)
            }
        };

        match seated {
            Ok(host_id) => {
                self.memberships.insert(requester, room_id.clone());
                tracing::info!(%room_id, guest = %requester, "guest joined");
                self.send_to(
                    host_id,
                    &ServerMessage::PlayerJoined {
                        guest_id: requester,
                        room_id: room_id.clone(),
                    },
                );
                self.send_to(
                    requester,
                    &ServerMessage::RoomJoined {
                        room_id,
                        player_id: requester,
                        role: Player::White,
                    },
                );
            }
            Err(error) => {
                tracing::debug!(%room_id, player = %requester, %error, "join rejected");
                self.send_to(requester, &ServerMessage::JoinRejected { error });
            }
        }
    }

    /// Mark the requester ready and broadcast the new flags to the room.
    /// When both sides are ready, broadcast `GameStart` exactly once.
    pub fn set_ready(&mut self, requester: PlayerId) {
        let Some(room_id) = self.memberships.get(&requester).cloned() else {
            tracing::debug!(player = %requester, "ready outside a room, ignored");
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };

        if room.host == requester {
            room.host_ready = true;
        } else {
            room.guest_ready = true;
        }

        let update = ServerMessage::ReadyUpdate {
            host_ready: room.host_ready,
            guest_ready: room.guest_ready,
        };
        let starting =
            room.is_full() && room.host_ready && room.guest_ready && !room.game_started;
        if starting {
            room.game_started = true;
        }
        let occupants = room.occupants();

        for id in &occupants {
            self.send_to(*id, &update);
        }
        if starting {
            tracing::info!(%room_id, "both players ready, game starting");
            for id in &occupants {
                self.send_to(*id, &ServerMessage::GameStart);
            }
        }
    }

    /// Forward a game envelope to the sender's peer, stamped with the
    /// sender's handle and server time. The payload is never inspected.
    /// Dropped silently when the sender has no room or no opponent yet.
    pub fn relay_game(&mut self, requester: PlayerId, message: GameMessage) {
        let Some(room_id) = self.memberships.get(&requester) else {
            tracing::debug!(player = %requester, "game message outside a room, dropped");
            return;
        };
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        let Some(peer) = room.peer_of(requester) else {
            tracing::debug!(player = %requester, "no opponent yet, game message dropped");
            return;
        };

        self.send_to(
            peer,
            &ServerMessage::Game {
                sender_id: requester,
                timestamp: now_millis(),
                message,
            },
        );
    }

    /// Leave the current room but keep the connection.
    pub fn leave_room(&mut self, requester: PlayerId) {
        self.vacate(requester);
    }

    /// Full disconnect: vacate any room and drop the write half.
    pub fn remove_player(&mut self, player_id: PlayerId) {
        self.vacate(player_id);
        if self.connections.remove(&player_id).is_some() {
            tracing::info!(player = %player_id, "client disconnected");
        }
    }

    /// Remove a player from their room, if any, and propagate the
    /// departure. Host departure deletes the room and terminates the
    /// guest's occupancy; guest departure resets the room to waiting state
    /// so a new guest can join on the same code.
    fn vacate(&mut self, player_id: PlayerId) {
        let Some(room_id) = self.memberships.remove(&player_id) else {
            return;
        };
        let Some(mut room) = self.rooms.remove(&room_id) else {
            return;
        };

        if room.host == player_id {
            if let Some(guest_id) = room.guest {
                self.memberships.remove(&guest_id);
                self.send_to(guest_id, &ServerMessage::HostDisconnected);
            }
            tracing::info!(%room_id, player = %player_id, "host left, room closed");
        } else {
            room.guest = None;
            room.guest_ready = false;
            room.game_started = false;
            let host_id = room.host;
            self.rooms.insert(room_id.clone(), room);
            self.send_to(host_id, &ServerMessage::GuestDisconnected);
            tracing::info!(%room_id, player = %player_id, "guest left, room reset");
        }
    }

    /// Draw 6-digit codes uniformly from [100000, 999999] until one is
    /// free. With a practical room count the collision loop terminates
    /// almost immediately.
    fn fresh_room_id(&self) -> RoomId {
        let mut rng = rand::thread_rng();
        loop {
            let code: u32 = rng.gen_range(100_000..=999_999);
            let Ok(id) = RoomId::from_code(code) else {
                continue;
            };
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }

    /// Shut down every client socket. Reader threads blocked on these
    /// streams observe EOF and exit, and clients see the connection close.
    pub fn shutdown_all(&mut self) {
        for (player_id, writer) in &self.connections {
            if writer.get_ref().shutdown(Shutdown::Both).is_err() {
                tracing::debug!(player = %player_id, "socket already closed");
            }
        }
        self.connections.clear();
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn room_of(&self, player_id: PlayerId) -> Option<&RoomId> {
        self.memberships.get(&player_id)
    }

    /// Send a message to a specific player. Silently ignores write errors
    /// (the reader thread will detect the broken pipe).
    fn send_to(&mut self, player_id: PlayerId, msg: &ServerMessage) {
        if let Some(writer) = self.connections.get_mut(&player_id) {
            if send_message(writer, msg).is_err() {
                tracing::debug!(player = %player_id, "write failed, reader thread will reap");
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize a `ServerMessage` to JSON and write it with length-delimited
/// framing. Returns any error (caller decides whether to log or propagate).
fn send_message(
    writer: &mut BufWriter<TcpStream>,
    msg: &ServerMessage,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_vec(msg)?;
    write_message(writer, &json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;
    use std::net::TcpListener;

    use gomoku_protocol::framing::read_message;
    use gomoku_protocol::message::{GamePayload, JoinError};

    use super::*;

    /// Create a TCP pair: (client_stream, server_stream) on localhost.
    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    /// Read a ServerMessage from a TCP stream.
    fn recv_server_msg(stream: &mut BufReader<TcpStream>) -> ServerMessage {
        let bytes = read_message(stream).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Register one connection and return (client_reader, player_id) with
    /// the Welcome already drained.
    fn registered(registry: &mut Registry) -> (BufReader<TcpStream>, PlayerId) {
        let (client, server) = tcp_pair();
        let id = registry.register(server);
        let mut reader = BufReader::new(client);
        match recv_server_msg(&mut reader) {
            ServerMessage::Welcome { player_id } => assert_eq!(player_id, id),
            other => panic!("expected Welcome, got {other:?}"),
        }
        (reader, id)
    }

    /// Drain the host's RoomCreated and return the issued room id.
    fn created_room(reader: &mut BufReader<TcpStream>) -> RoomId {
        match recv_server_msg(reader) {
            ServerMessage::RoomCreated { room_id, role, .. } => {
                assert_eq!(role, Player::Black);
                room_id
            }
            other => panic!("expected RoomCreated, got {other:?}"),
        }
    }

    #[test]
    fn register_assigns_ids_and_greets() {
        let mut registry = Registry::new();
        let (_reader_a, id_a) = registered(&mut registry);
        let (_reader_b, id_b) = registered(&mut registry);
        assert_eq!(id_a, PlayerId(0));
        assert_eq!(id_b, PlayerId(1));
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn create_room_issues_six_digit_code_and_black_role() {
        let mut registry = Registry::new();
        let (mut reader, host) = registered(&mut registry);

        let before = now_millis();
        registry.create_room(host);
        assert_eq!(registry.room_count(), 1);

        let room_id = match recv_server_msg(&mut reader) {
            ServerMessage::RoomCreated {
                room_id,
                player_id,
                role,
            } => {
                assert_eq!(player_id, host);
                assert_eq!(role, Player::Black);
                room_id
            }
            other => panic!("expected RoomCreated, got {other:?}"),
        };
        assert_eq!(room_id.as_str().len(), 6);
        assert!(room_id.as_str().chars().all(|c| c.is_ascii_digit()));
        assert_eq!(registry.room_of(host), Some(&room_id));
        let room = registry.room(&room_id).unwrap();
        assert_eq!(room.host(), host);
        assert!(room.created_at() >= before);
        assert!(room.created_at() <= now_millis());
    }

    #[test]
    fn generated_codes_stay_unique_while_rooms_live() {
        let mut registry = Registry::new();
        let mut codes = std::collections::BTreeSet::new();
        let mut readers = Vec::new();
        for _ in 0..50 {
            let (mut reader, host) = registered(&mut registry);
            registry.create_room(host);
            let room_id = created_room(&mut reader);
            assert!(codes.insert(room_id), "duplicate live room code");
            readers.push(reader);
        }
        assert_eq!(registry.room_count(), 50);
    }

    #[test]
    fn fresh_room_ids_are_always_six_digit_codes() {
        let registry = Registry::new();
        for _ in 0..10_000 {
            let id = registry.fresh_room_id();
            assert_eq!(id.as_str().len(), 6);
            let code: u32 = id.as_str().parse().unwrap();
            assert!((100_000..=999_999).contains(&code), "{code}");
        }
    }

    #[test]
    fn join_unknown_room_rejected_not_found() {
        let mut registry = Registry::new();
        let (mut reader, joiner) = registered(&mut registry);

        let bogus = RoomId::parse("000000").unwrap();
        registry.join_room(joiner, bogus.clone());

        match recv_server_msg(&mut reader) {
            ServerMessage::JoinRejected { error } => {
                assert_eq!(error, JoinError::NotFound { room_id: bogus });
            }
            other => panic!("expected JoinRejected, got {other:?}"),
        }
        assert_eq!(registry.room_of(joiner), None);
    }

    #[test]
    fn join_notifies_host_and_seats_guest_as_white() {
        let mut registry = Registry::new();
        let (mut host_reader, host) = registered(&mut registry);
        let (mut guest_reader, guest) = registered(&mut registry);

        registry.create_room(host);
        let room_id = created_room(&mut host_reader);
        registry.join_room(guest, room_id.clone());

        match recv_server_msg(&mut host_reader) {
            ServerMessage::PlayerJoined {
                guest_id,
                room_id: joined,
            } => {
                assert_eq!(guest_id, guest);
                assert_eq!(joined, room_id);
            }
            other => panic!("expected PlayerJoined, got {other:?}"),
        }
        match recv_server_msg(&mut guest_reader) {
            ServerMessage::RoomJoined {
                room_id: joined,
                player_id,
                role,
            } => {
                assert_eq!(joined, room_id);
                assert_eq!(player_id, guest);
                assert_eq!(role, Player::White);
            }
            other => panic!("expected RoomJoined, got {other:?}"),
        }
        assert!(registry.room(&room_id).unwrap().is_full());
    }

    #[test]
    fn join_full_room_rejected() {
        let mut registry = Registry::new();
        let (mut host_reader, host) = registered(&mut registry);
        let (_guest_reader, guest) = registered(&mut registry);
        let (mut late_reader, late) = registered(&mut registry);

        registry.create_room(host);
        let room_id = created_room(&mut host_reader);
        registry.join_room(guest, room_id.clone());
        registry.join_room(late, room_id.clone());

        match recv_server_msg(&mut late_reader) {
            ServerMessage::JoinRejected { error } => {
                assert_eq!(error, JoinError::Full { room_id });
            }
            other => panic!("expected JoinRejected, got {other:?}"),
        }
    }

    #[test]
    fn ready_handshake_broadcasts_and_starts_once() {
        let mut registry = Registry::new();
        let (mut host_reader, host) = registered(&mut registry);
        let (mut guest_reader, guest) = registered(&mut registry);

        registry.create_room(host);
        let room_id = created_room(&mut host_reader);
        registry.join_room(guest, room_id.clone());
        let _player_joined = recv_server_msg(&mut host_reader);
        let _room_joined = recv_server_msg(&mut guest_reader);

        registry.set_ready(host);
        match recv_server_msg(&mut host_reader) {
            ServerMessage::ReadyUpdate {
                host_ready,
                guest_ready,
            } => {
                assert!(host_ready);
                assert!(!guest_ready);
            }
            other => panic!("expected ReadyUpdate, got {other:?}"),
        }
        let _guest_update = recv_server_msg(&mut guest_reader);
        assert!(!registry.room(&room_id).unwrap().is_game_started());

        registry.set_ready(guest);
        let _host_update = recv_server_msg(&mut host_reader);
        assert!(matches!(
            recv_server_msg(&mut host_reader),
            ServerMessage::GameStart
        ));
        let _guest_update = recv_server_msg(&mut guest_reader);
        assert!(matches!(
            recv_server_msg(&mut guest_reader),
            ServerMessage::GameStart
        ));
        assert!(registry.room(&room_id).unwrap().is_game_started());

        // A repeated ready does not re-broadcast GameStart.
        registry.set_ready(host);
        assert!(matches!(
            recv_server_msg(&mut host_reader),
            ServerMessage::ReadyUpdate { .. }
        ));
        registry.relay_game(
            host,
            GameMessage {
                payload: GamePayload::Restart,
                timestamp: 1,
                player_id: host,
            },
        );
        // The guest sees the ReadyUpdate then the relayed message, no
        // second GameStart in between.
        assert!(matches!(
            recv_server_msg(&mut guest_reader),
            ServerMessage::ReadyUpdate { .. }
        ));
        assert!(matches!(
            recv_server_msg(&mut guest_reader),
            ServerMessage::Game { .. }
        ));
    }

    #[test]
    fn game_message_forwarded_to_peer_with_stamp() {
        let mut registry = Registry::new();
        let (mut host_reader, host) = registered(&mut registry);
        let (mut guest_reader, guest) = registered(&mut registry);

        registry.create_room(host);
        let room_id = created_room(&mut host_reader);
        registry.join_room(guest, room_id);
        let _player_joined = recv_server_msg(&mut host_reader);
        let _room_joined = recv_server_msg(&mut guest_reader);

        let envelope = GameMessage {
            payload: GamePayload::Move {
                row: 7,
                col: 7,
                player: Player::Black,
            },
            timestamp: 123,
            player_id: host,
        };
        registry.relay_game(host, envelope.clone());

        match recv_server_msg(&mut guest_reader) {
            ServerMessage::Game {
                sender_id,
                timestamp,
                message,
            } => {
                assert_eq!(sender_id, host);
                assert!(timestamp > 1_500_000_000_000, "server stamp, not sender's");
                assert_eq!(message, envelope);
            }
            other => panic!("expected Game, got {other:?}"),
        }
    }

    #[test]
    fn game_message_without_opponent_is_dropped() {
        let mut registry = Registry::new();
        let (mut host_reader, host) = registered(&mut registry);

        registry.create_room(host);
        let _created = created_room(&mut host_reader);

        // No guest seated, nothing to forward, nothing crashes.
        registry.relay_game(
            host,
            GameMessage {
                payload: GamePayload::Restart,
                timestamp: 1,
                player_id: host,
            },
        );
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn host_departure_deletes_room_and_notifies_guest() {
        let mut registry = Registry::new();
        let (mut host_reader, host) = registered(&mut registry);
        let (mut guest_reader, guest) = registered(&mut registry);

        registry.create_room(host);
        let room_id = created_room(&mut host_reader);
        registry.join_room(guest, room_id.clone());
        let _room_joined = recv_server_msg(&mut guest_reader);

        registry.remove_player(host);

        assert!(matches!(
            recv_server_msg(&mut guest_reader),
            ServerMessage::HostDisconnected
        ));
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.room_of(guest), None);
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn guest_departure_resets_room_for_a_new_guest() {
        let mut registry = Registry::new();
        let (mut host_reader, host) = registered(&mut registry);
        let (mut guest_reader, guest) = registered(&mut registry);

        registry.create_room(host);
        let room_id = created_room(&mut host_reader);
        registry.join_room(guest, room_id.clone());
        let _player_joined = recv_server_msg(&mut host_reader);
        let _room_joined = recv_server_msg(&mut guest_reader);
        registry.set_ready(host);
        registry.set_ready(guest);

        registry.remove_player(guest);

        // Drain host's two ReadyUpdates and the GameStart, then the
        // departure notice.
        let _update = recv_server_msg(&mut host_reader);
        let _update = recv_server_msg(&mut host_reader);
        let _start = recv_server_msg(&mut host_reader);
        assert!(matches!(
            recv_server_msg(&mut host_reader),
            ServerMessage::GuestDisconnected
        ));

        let room = registry.room(&room_id).unwrap();
        assert_eq!(room.guest(), None);
        assert!(!room.is_game_started());

        // A replacement guest can join on the same code.
        let (mut next_reader, next_guest) = registered(&mut registry);
        registry.join_room(next_guest, room_id.clone());
        assert!(matches!(
            recv_server_msg(&mut next_reader),
            ServerMessage::RoomJoined { .. }
        ));
        assert!(registry.room(&room_id).unwrap().is_full());
    }

    #[test]
    fn guest_reset_keeps_room_creation_time() {
        let mut registry = Registry::new();
        let (mut host_reader, host) = registered(&mut registry);
        let (_guest_reader, guest) = registered(&mut registry);

        registry.create_room(host);
        let room_id = created_room(&mut host_reader);
        let created = registry.room(&room_id).unwrap().created_at();
        registry.join_room(guest, room_id.clone());
        registry.remove_player(guest);

        assert_eq!(registry.room(&room_id).unwrap().created_at(), created);
    }

    #[test]
    fn shutdown_all_closes_client_sockets() {
        let mut registry = Registry::new();
        let (mut reader, _id) = registered(&mut registry);

        registry.shutdown_all();

        assert_eq!(registry.connection_count(), 0);
        assert!(read_message(&mut reader).is_err(), "client must see EOF");
    }

    #[test]
    fn leave_room_keeps_connection() {
        let mut registry = Registry::new();
        let (mut host_reader, host) = registered(&mut registry);

        registry.create_room(host);
        let _created = created_room(&mut host_reader);
        registry.leave_room(host);

        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn creating_a_second_room_vacates_the_first() {
        let mut registry = Registry::new();
        let (mut host_reader, host) = registered(&mut registry);

        registry.create_room(host);
        let first = created_room(&mut host_reader);
        registry.create_room(host);
        let second = created_room(&mut host_reader);

        assert_ne!(first, second);
        assert_eq!(registry.room_count(), 1);
        assert!(registry.room(&first).is_none());
        assert_eq!(registry.room_of(host), Some(&second));
    }
}
