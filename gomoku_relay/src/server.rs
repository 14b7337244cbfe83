// TCP server and main event loop for the room relay.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts new TCP
//   connections and sends `InternalEvent::NewConnection` to the main thread.
// - **Reader threads** (one per client): call `framing::read_message()` in a
//   loop, deserialize `ClientMessage`, and send `InternalEvent::MessageFrom`
//   to the main thread. On error/EOF, send `InternalEvent::Disconnected`.
// - **Main thread**: owns the `Registry`, receives events from the channel,
//   and dispatches them. Uses `recv_timeout` with a short timeout solely so
//   the shutdown flag is checked even when no traffic arrives.
//
// The main thread is the only writer to client TCP streams (via the
// registry's send helpers). Reader threads only read from streams. This
// avoids concurrent read/write on the same `TcpStream`, which is safe on
// most platforms but fragile.
//
// Unlike handshake-first protocols there is nothing to negotiate on accept:
// the registry assigns a `PlayerId` and greets the client with `Welcome`
// immediately, and room membership is established later through ordinary
// `CreateRoom`/`JoinRoom` messages.
//
// Shutdown: the main thread checks a `keep_running` flag (set to false by
// `RelayHandle::stop`), breaks out of the event loop, and shuts down every
// client socket so reader threads unblock and clients observe EOF.

use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use gomoku_protocol::framing::read_message;
use gomoku_protocol::message::ClientMessage;
use gomoku_protocol::types::PlayerId;

use crate::registry::Registry;

/// Events sent from listener/reader threads to the main thread.
enum InternalEvent {
    NewConnection {
        stream: TcpStream,
    },
    MessageFrom {
        player_id: PlayerId,
        message: ClientMessage,
    },
    Disconnected {
        player_id: PlayerId,
    },
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread {
            let _ = handle.join();
        }
    }
}

/// Configuration for starting a relay server.
pub struct RelayConfig {
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { port: 7878 }
    }
}

/// Start the relay server on a background thread. Returns a handle for
/// stopping it and the actual bound address (useful when port 0 is used
/// to let the OS pick a free port).
pub fn start_relay(config: RelayConfig) -> std::io::Result<(RelayHandle, std::net::SocketAddr)> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", config.port))?;
    let addr = listener.local_addr()?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();

    tracing::info!(%addr, "relay listening");

    let thread = thread::spawn(move || {
        run_relay(listener, keep_running_clone);
    });

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main relay loop. Runs until `keep_running` is set to false.
fn run_relay(listener: TcpListener, keep_running: Arc<AtomicBool>) {
    let mut registry = Registry::new();

    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    // Set the listener to non-blocking so the accept thread can check
    // keep_running periodically.
    listener.set_nonblocking(true).ok();

    // Listener thread: accepts new connections.
    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false).ok();
                    let _ = tx_listener.send(InternalEvent::NewConnection { stream });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(_) => break,
            }
        }
    });

    // Main event loop. The timeout exists only to re-check keep_running.
    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                handle_event(&mut registry, event, &tx, &keep_running);
                // Drain any additional events that arrived during handling.
                while let Ok(event) = rx.try_recv() {
                    handle_event(&mut registry, event, &tx, &keep_running);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    // Event loop exited: close every client socket so reader threads
    // unblock on EOF and clients observe the relay going away.
    registry.shutdown_all();
    tracing::info!("relay stopped");
}

/// Dispatch a single event to the registry.
fn handle_event(
    registry: &mut Registry,
    event: InternalEvent,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    match event {
        InternalEvent::NewConnection { stream } => {
            handle_new_connection(registry, stream, tx, keep_running);
        }
        InternalEvent::MessageFrom { player_id, message } => {
            handle_message(registry, player_id, message);
        }
        InternalEvent::Disconnected { player_id } => {
            registry.remove_player(player_id);
        }
    }
}

/// Handle a new TCP connection: register it (which greets the client with
/// `Welcome`) and spawn a reader thread tagged with the assigned id.
fn handle_new_connection(
    registry: &mut Registry,
    stream: TcpStream,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    let read_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "could not clone accepted stream");
            return;
        }
    };

    let player_id = registry.register(stream);

    let reader = BufReader::new(read_stream);
    let tx_reader = tx.clone();
    let keep_running_reader = keep_running.clone();
    thread::spawn(move || {
        reader_loop(reader, player_id, tx_reader, keep_running_reader);
    });
}

/// Reader loop for a single client. Runs in its own thread.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    player_id: PlayerId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match read_message(&mut reader) {
            Ok(bytes) => match serde_json::from_slice::<ClientMessage>(&bytes) {
                Ok(ClientMessage::Goodbye) => {
                    let _ = tx.send(InternalEvent::Disconnected { player_id });
                    break;
                }
                Ok(message) => {
                    let _ = tx.send(InternalEvent::MessageFrom { player_id, message });
                }
                Err(_) => {
                    // Malformed message: disconnect.
                    let _ = tx.send(InternalEvent::Disconnected { player_id });
                    break;
                }
            },
            Err(_) => {
                // Read error or EOF: disconnect.
                let _ = tx.send(InternalEvent::Disconnected { player_id });
                break;
            }
        }
    }
}

/// Handle a client message other than Goodbye (handled in the reader loop).
fn handle_message(registry: &mut Registry, player_id: PlayerId, message: ClientMessage) {
    match message {
        ClientMessage::CreateRoom => {
            registry.create_room(player_id);
        }
        ClientMessage::JoinRoom { room_id } => {
            registry.join_room(player_id, room_id);
        }
        ClientMessage::PlayerReady => {
            registry.set_ready(player_id);
        }
        ClientMessage::Game { message } => {
            registry.relay_game(player_id, message);
        }
        ClientMessage::LeaveRoom => {
            registry.leave_room(player_id);
        }
        ClientMessage::Goodbye => {
            // Handled in the reader loop.
        }
    }
}
