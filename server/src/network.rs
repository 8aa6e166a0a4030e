//! UDP transport: the request-handling surface in front of the world
//! manager.
//!
//! One datagram carries one bincode-framed `Packet`. The transport owns
//! the connection table (peer address -> bound session) and a per-peer
//! writer task that forwards the session's frame stream back out; the
//! receive loop itself never blocks on a slow peer. Liveness is policed
//! here, not in the worlds: peers silent past the timeout are released.

use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::Packet;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant};

use crate::broadcast::FrameStream;
use crate::manager::{WorldHandle, WorldManager};

/// Peers silent longer than this are treated as gone and released.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest payload a single UDP datagram can carry.
const RECV_BUFFER_SIZE: usize = 65_507;

/// Decides whether a request token is acceptable. Swapped out at
/// construction; the transport itself has no opinion on auth policy.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> bool;
}

/// Accepts every token, including the empty one.
pub struct AcceptAll;

impl TokenValidator for AcceptAll {
    fn validate(&self, _token: &str) -> bool {
        true
    }
}

/// Accepts only the configured shared secret.
pub struct StaticToken(pub String);

impl TokenValidator for StaticToken {
    fn validate(&self, token: &str) -> bool {
        token == self.0
    }
}

/// One peer's binding: the world it joined and the task pushing that
/// world's frames back to it.
struct Connection {
    world: WorldHandle,
    session_id: u64,
    player_id: u64,
    last_seen: Instant,
    writer: JoinHandle<()>,
}

pub struct Transport {
    socket: Arc<UdpSocket>,
    manager: Arc<WorldManager>,
    validator: Arc<dyn TokenValidator>,
    connections: Arc<Mutex<HashMap<SocketAddr, Connection>>>,
}

impl Transport {
    pub async fn bind(
        addr: &str,
        manager: Arc<WorldManager>,
        validator: Arc<dyn TokenValidator>,
    ) -> std::io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("listening on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            manager,
            validator,
            connections: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive loop. Runs until the socket errors out fatally; malformed
    /// datagrams and per-peer failures are logged and skipped.
    pub async fn run(&self) {
        self.spawn_timeout_sweeper();

        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => match deserialize::<Packet>(&buffer[..len]) {
                    Ok(packet) => self.handle_packet(packet, addr).await,
                    Err(_) => warn!("undecodable datagram from {}", addr),
                },
                Err(e) => {
                    error!("receive error: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    async fn handle_packet(&self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Join {
                token,
                world_id,
                name,
            } => {
                if !self.validator.validate(&token) {
                    self.send_error(addr, "invalid token").await;
                    return;
                }
                self.handle_join(addr, world_id, name).await;
            }

            Packet::SetTarget { x, y } => {
                let mut connections = self.connections.lock().await;
                if let Some(connection) = connections.get_mut(&addr) {
                    connection.last_seen = Instant::now();
                    connection.world.set_intent(connection.session_id, x, y);
                } else {
                    debug!("target from unbound peer {}", addr);
                }
            }

            Packet::Leave => {
                let connection = self.connections.lock().await.remove(&addr);
                if let Some(connection) = connection {
                    info!("peer {} left (player {})", addr, connection.player_id);
                    release(connection).await;
                }
            }

            Packet::CreateWorld { token, name } => {
                if !self.validator.validate(&token) {
                    self.send_error(addr, "invalid token").await;
                    return;
                }
                let summary = self.manager.create_world(&name).await;
                self.send(addr, &Packet::WorldCreated(summary)).await;
            }

            Packet::ListWorlds { token } => {
                if !self.validator.validate(&token) {
                    self.send_error(addr, "invalid token").await;
                    return;
                }
                let worlds = self.manager.list_worlds().await;
                self.send(addr, &Packet::WorldList(worlds)).await;
            }

            // Server -> client packets arriving here are a confused or
            // hostile peer
            _ => warn!("unexpected packet type from {}", addr),
        }
    }

    async fn handle_join(&self, addr: SocketAddr, world_id: u64, name: String) {
        // A re-join from the same address replaces the old binding
        let previous = self.connections.lock().await.remove(&addr);
        if let Some(previous) = previous {
            info!("peer {} rejoining, releasing old session", addr);
            release(previous).await;
        }

        let Some(world) = self.manager.world(world_id).await else {
            self.send_error(addr, "unknown world").await;
            return;
        };
        let Some(ack) = world.join(&name).await else {
            self.send_error(addr, "world is shutting down").await;
            return;
        };

        let writer = self.spawn_writer(addr, ack.stream);
        let player_id = ack.player_id;
        self.connections.lock().await.insert(
            addr,
            Connection {
                world,
                session_id: ack.session_id,
                player_id,
                last_seen: Instant::now(),
                writer,
            },
        );

        info!(
            "peer {} joined world {} as player {}",
            addr, world_id, player_id
        );
        self.send(addr, &Packet::Joined { world_id, player_id }).await;
    }

    /// Forwards a session's frame stream to its peer until the stream
    /// ends (world destroyed) or the connection is released. A send
    /// failure tears down this session only.
    fn spawn_writer(&self, addr: SocketAddr, mut stream: FrameStream) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let data = match serialize(&Packet::Frame((*frame).clone())) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("frame serialization failed: {}", e);
                        break;
                    }
                };
                if let Err(e) = socket.send_to(&data, addr).await {
                    warn!("frame send to {} failed, releasing session: {}", addr, e);
                    let connection = connections.lock().await.remove(&addr);
                    if let Some(connection) = connection {
                        // Do not call release(): that would abort this
                        // very task mid-cleanup.
                        connection.world.leave(connection.session_id).await;
                    }
                    break;
                }
            }
            debug!(
                "frame stream for {} closed ({} frame(s) lost to lag)",
                addr,
                stream.frames_lost()
            );
        })
    }

    fn spawn_timeout_sweeper(&self) {
        let connections = Arc::clone(&self.connections);
        tokio::spawn(async move {
            let mut sweep = interval(Duration::from_secs(1));
            loop {
                sweep.tick().await;
                let expired: Vec<Connection> = {
                    let mut connections = connections.lock().await;
                    let gone: Vec<SocketAddr> = connections
                        .iter()
                        .filter(|(_, c)| c.last_seen.elapsed() > CLIENT_TIMEOUT)
                        .map(|(addr, _)| *addr)
                        .collect();
                    gone.iter()
                        .filter_map(|addr| {
                            info!("peer {} timed out", addr);
                            connections.remove(addr)
                        })
                        .collect()
                };
                for connection in expired {
                    release(connection).await;
                }
            }
        });
    }

    async fn send(&self, addr: SocketAddr, packet: &Packet) {
        match serialize(packet) {
            Ok(data) => {
                if let Err(e) = self.socket.send_to(&data, addr).await {
                    warn!("send to {} failed: {}", addr, e);
                }
            }
            Err(e) => error!("packet serialization failed: {}", e),
        }
    }

    async fn send_error(&self, addr: SocketAddr, message: &str) {
        warn!("rejecting {}: {}", addr, message);
        self.send(
            addr,
            &Packet::Error {
                message: message.to_string(),
            },
        )
        .await;
    }
}

async fn release(connection: Connection) {
    connection.writer.abort();
    connection.world.leave(connection.session_id).await;
}
