//! Quinn-based relay server.
//!
//! Accepts client connections, keeps the latest value per signaling bus key,
//! fans bus changes out to every other connection and hosts media rooms.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use quinn::{Connection, Endpoint, SendStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{ServerConfig, DEFAULT_SERVER_NAME};
use crate::domain::identity::PeerId;
use crate::domain::media::MediaKind;
use crate::domain::relay::RelayMsg;

use super::codec::{read_frame, write_frame};

// ---------------------------------------------------------------------------
// Relay state (pure bookkeeping, no I/O)
// ---------------------------------------------------------------------------

struct ConnState {
    outbound: mpsc::UnboundedSender<RelayMsg>,
    /// Channel and peer id this connection joined as.
    room: Option<(String, PeerId)>,
}

struct Member {
    conn: u64,
    published: Vec<MediaKind>,
}

#[derive(Default)]
struct RelayState {
    bus: HashMap<String, String>,
    conns: HashMap<u64, ConnState>,
    rooms: HashMap<String, HashMap<PeerId, Member>>,
}

impl RelayState {
    fn connect(&mut self, conn: u64, outbound: mpsc::UnboundedSender<RelayMsg>) {
        self.conns.insert(conn, ConnState { outbound, room: None });
    }

    /// A dropped connection leaves its room like an explicit leave.
    fn disconnect(&mut self, conn: u64) {
        self.leave_room(conn);
        self.conns.remove(&conn);
    }

    fn handle(&mut self, config: &ServerConfig, conn: u64, msg: RelayMsg) {
        match msg {
            RelayMsg::BusWrite { key, value } => self.bus_write(conn, key, value),
            RelayMsg::JoinRoom {
                request_id,
                app_id,
                channel,
                token,
                peer_id,
            } => {
                let result = self.join_room(config, conn, &app_id, &token, channel, peer_id);
                self.reply(conn, request_id, result);
            }
            RelayMsg::Publish { request_id, kinds } => {
                let result = self.publish(conn, &kinds);
                self.reply(conn, request_id, result);
            }
            RelayMsg::Subscribe {
                request_id,
                peer_id,
                kind,
            } => {
                let result = self.subscribe(conn, &peer_id, kind);
                self.reply(conn, request_id, result);
            }
            RelayMsg::LeaveRoom { request_id } => {
                self.leave_room(conn);
                self.reply(conn, request_id, Ok(()));
            }
            other => debug!(conn, ?other, "Ignoring relay message"),
        }
    }

    // -- Signaling bus --

    fn bus_write(&mut self, writer: u64, key: String, value: Option<String>) {
        let previous_value = match &value {
            Some(v) => self.bus.insert(key.clone(), v.clone()),
            None => self.bus.remove(&key),
        };
        debug!(writer, %key, "Bus value written");

        let msg = RelayMsg::BusChanged {
            key,
            new_value: value,
            previous_value,
        };
        for (id, conn) in &self.conns {
            if *id != writer {
                let _ = conn.outbound.send(msg.clone());
            }
        }
    }

    // -- Media rooms --

    fn join_room(
        &mut self,
        config: &ServerConfig,
        conn: u64,
        app_id: &str,
        token: &str,
        channel: String,
        peer_id: PeerId,
    ) -> Result<(), String> {
        if config.app_id.as_deref().is_some_and(|expected| expected != app_id) {
            return Err("invalid app id".into());
        }
        if config.token.as_deref().is_some_and(|expected| expected != token) {
            return Err("invalid token".into());
        }
        let Some(state) = self.conns.get(&conn) else {
            return Err("unknown connection".into());
        };
        if let Some((joined, _)) = &state.room {
            return Err(format!("already joined to channel {joined}"));
        }

        let room = self.rooms.entry(channel.clone()).or_default();
        if room.contains_key(&peer_id) {
            return Err(format!("peer {peer_id} is already in channel {channel}"));
        }

        // Replay what is already published so the newcomer can subscribe.
        for (id, member) in room.iter() {
            for kind in &member.published {
                let _ = state.outbound.send(RelayMsg::UserPublished {
                    peer_id: id.clone(),
                    kind: *kind,
                });
            }
        }
        room.insert(
            peer_id.clone(),
            Member {
                conn,
                published: Vec::new(),
            },
        );
        info!(conn, %channel, %peer_id, "Peer joined room");

        if let Some(state) = self.conns.get_mut(&conn) {
            state.room = Some((channel, peer_id));
        }
        Ok(())
    }

    fn publish(&mut self, conn: u64, kinds: &[MediaKind]) -> Result<(), String> {
        let (channel, peer_id) = self.membership(conn)?;
        let member = self
            .rooms
            .get_mut(&channel)
            .and_then(|room| room.get_mut(&peer_id))
            .ok_or("not joined to a room")?;

        let fresh: Vec<MediaKind> = kinds
            .iter()
            .copied()
            .filter(|k| !member.published.contains(k))
            .collect();
        member.published.extend(fresh.iter().copied());
        info!(conn, %channel, %peer_id, ?fresh, "Peer published");

        for kind in fresh {
            self.notify_room(
                &channel,
                &peer_id,
                RelayMsg::UserPublished {
                    peer_id: peer_id.clone(),
                    kind,
                },
            );
        }
        Ok(())
    }

    fn subscribe(&self, conn: u64, target: &PeerId, kind: MediaKind) -> Result<(), String> {
        let (channel, _) = self.membership(conn)?;
        let published = self
            .rooms
            .get(&channel)
            .and_then(|room| room.get(target))
            .is_some_and(|m| m.published.contains(&kind));
        if !published {
            return Err(format!("{target} has not published {kind}"));
        }
        Ok(())
    }

    fn leave_room(&mut self, conn: u64) {
        let Some((channel, peer_id)) = self.conns.get_mut(&conn).and_then(|c| c.room.take())
        else {
            return;
        };
        if let Some(room) = self.rooms.get_mut(&channel) {
            room.remove(&peer_id);
            if room.is_empty() {
                self.rooms.remove(&channel);
            }
        }
        self.notify_room(
            &channel,
            &peer_id,
            RelayMsg::UserLeft {
                peer_id: peer_id.clone(),
            },
        );
        info!(conn, %channel, %peer_id, "Peer left room");
    }

    fn membership(&self, conn: u64) -> Result<(String, PeerId), String> {
        self.conns
            .get(&conn)
            .and_then(|c| c.room.clone())
            .ok_or_else(|| "not joined to a room".to_owned())
    }

    fn notify_room(&self, channel: &str, except: &PeerId, msg: RelayMsg) {
        let Some(room) = self.rooms.get(channel) else {
            return;
        };
        for (id, member) in room {
            if id == except {
                continue;
            }
            if let Some(conn) = self.conns.get(&member.conn) {
                let _ = conn.outbound.send(msg.clone());
            }
        }
    }

    fn reply(&self, conn: u64, request_id: u32, result: Result<(), String>) {
        if let Err(error) = &result {
            warn!(conn, request_id, "Request refused: {error}");
        }
        if let Some(state) = self.conns.get(&conn) {
            let _ = state.outbound.send(RelayMsg::Reply {
                request_id,
                error: result.err(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Relay server
// ---------------------------------------------------------------------------

pub struct RelayServer {
    endpoint: Endpoint,
    config: ServerConfig,
    state: Mutex<RelayState>,
    next_conn: AtomicU64,
}

impl RelayServer {
    /// Create and bind the server.
    pub fn bind(config: ServerConfig) -> anyhow::Result<Arc<Self>> {
        let server_config = Self::generate_self_signed_config()?;
        let endpoint = Endpoint::server(server_config, config.bind_addr)?;
        info!(bind_addr = %endpoint.local_addr()?, "Relay server listening");

        Ok(Arc::new(Self {
            endpoint,
            config,
            state: Mutex::new(RelayState::default()),
            next_conn: AtomicU64::new(1),
        }))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Run the accept loop until the endpoint is closed.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        while let Some(incoming) = self.endpoint.accept().await {
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        if let Err(e) = server.handle_connection(conn).await {
                            warn!("Connection handler error: {e:#}");
                        }
                    }
                    Err(e) => warn!("Failed to accept connection: {e}"),
                }
            });
        }
        Ok(())
    }

    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"shutdown");
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, conn: u64, msg: RelayMsg) {
        self.state().handle(&self.config, conn, msg);
    }

    // -----------------------------------------------------------------------
    // Connection handling
    // -----------------------------------------------------------------------

    async fn handle_connection(self: &Arc<Self>, connection: Connection) -> anyhow::Result<()> {
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        info!(conn, remote = %connection.remote_address(), "New connection");

        let (send, mut recv) = connection.accept_bi().await?;
        match read_frame(&mut recv).await? {
            Some(RelayMsg::Hello { client_version }) => {
                info!(conn, %client_version, "Client hello");
            }
            Some(other) => anyhow::bail!("Expected Hello, got {other:?}"),
            None => return Ok(()),
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        self.state().connect(conn, outbound);
        let writer = tokio::spawn(write_loop(send, outbound_rx));

        loop {
            match read_frame(&mut recv).await {
                Ok(Some(msg)) => self.dispatch(conn, msg),
                Ok(None) => break,
                Err(e) => {
                    debug!(conn, "Control stream ended: {e:#}");
                    break;
                }
            }
        }

        self.state().disconnect(conn);
        let _ = writer.await;
        info!(conn, "Connection closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Self-signed TLS config (dev only)
    // -----------------------------------------------------------------------

    fn generate_self_signed_config() -> anyhow::Result<quinn::ServerConfig> {
        let cert = rcgen::generate_simple_self_signed(vec![DEFAULT_SERVER_NAME.into()])?;
        let cert_der = cert.cert.der().clone();
        let key_der = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let server_crypto = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], rustls::pki_types::PrivateKeyDer::Pkcs8(key_der))?;

        let mut transport_config = quinn::TransportConfig::default();
        transport_config.max_idle_timeout(Some(quinn::IdleTimeout::try_from(
            std::time::Duration::from_secs(30),
        )?));

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)?,
        ));
        server_config.transport_config(Arc::new(transport_config));
        Ok(server_config)
    }
}

/// Drain a connection's outbound queue onto its control stream.
async fn write_loop(mut send: SendStream, mut outbound: mpsc::UnboundedReceiver<RelayMsg>) {
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = write_frame(&mut send, &msg).await {
            debug!("Failed to write to control stream: {e:#}");
            return;
        }
    }
    let _ = send.finish();
}
