//! Quinn-based relay client.
//!
//! Wraps a single QUIC connection with one bidirectional control stream. A
//! reader task routes replies to their pending request, bus changes to the
//! signaling bus and room notifications to the media engine.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use quinn::{ClientConfig, Connection, Endpoint, RecvStream, SendStream};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::media::EngineEvent;
use crate::domain::relay::RelayMsg;
use crate::domain::signal::BusNotification;

use super::codec::{read_frame, write_frame};

const EVENT_CAPACITY: usize = 64;

/// Keeps an idle call connection under the relay's idle timeout.
const KEEP_ALIVE: Duration = Duration::from_secs(10);

/// State shared with the reader task.
struct Shared {
    pending: StdMutex<HashMap<u32, oneshot::Sender<Option<String>>>>,
    bus_tx: mpsc::UnboundedSender<BusNotification>,
    events: broadcast::Sender<EngineEvent>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u32, oneshot::Sender<Option<String>>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// RelayClient
// ---------------------------------------------------------------------------

pub struct RelayClient {
    endpoint: Endpoint,
    connection: Connection,
    control_send: Mutex<SendStream>,
    shared: Arc<Shared>,
    bus_rx: StdMutex<Option<mpsc::UnboundedReceiver<BusNotification>>>,
    next_request: AtomicU32,
    reader: JoinHandle<()>,
}

impl RelayClient {
    /// Connect to a relay and open the control stream.
    pub async fn connect(server_addr: SocketAddr, server_name: &str) -> anyhow::Result<Arc<Self>> {
        let bind: SocketAddr = if server_addr.is_ipv6() {
            "[::]:0".parse()?
        } else {
            "0.0.0.0:0".parse()?
        };
        let mut endpoint = Endpoint::client(bind)?;

        // Accept any server certificate (dev only; the relay is self-signed).
        let crypto = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();

        let mut client_config = ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)?,
        ));
        let mut transport_config = quinn::TransportConfig::default();
        transport_config.keep_alive_interval(Some(KEEP_ALIVE));
        client_config.transport_config(Arc::new(transport_config));
        endpoint.set_default_client_config(client_config);

        info!(%server_addr, "Connecting to relay");
        let connection = endpoint.connect(server_addr, server_name)?.await?;
        info!("Relay connection established");

        // The stream only reaches the server once something is written on it.
        let (mut send, recv) = connection.open_bi().await?;
        write_frame(
            &mut send,
            &RelayMsg::Hello {
                client_version: env!("CARGO_PKG_VERSION").to_owned(),
            },
        )
        .await?;
        debug!("Control stream opened");

        let (bus_tx, bus_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            pending: StdMutex::new(HashMap::new()),
            bus_tx,
            events,
        });
        let reader = tokio::spawn(read_loop(recv, Arc::clone(&shared)));

        Ok(Arc::new(Self {
            endpoint,
            connection,
            control_send: Mutex::new(send),
            shared,
            bus_rx: StdMutex::new(Some(bus_rx)),
            next_request: AtomicU32::new(1),
            reader,
        }))
    }

    pub async fn send(&self, msg: &RelayMsg) -> anyhow::Result<()> {
        let mut send = self.control_send.lock().await;
        write_frame(&mut *send, msg).await
    }

    /// Send a request built around a fresh request id and wait for its reply.
    pub async fn request(&self, make: impl FnOnce(u32) -> RelayMsg) -> anyhow::Result<()> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(request_id, tx);

        if let Err(e) = self.send(&make(request_id)).await {
            self.shared.pending().remove(&request_id);
            return Err(e);
        }

        match rx.await {
            Ok(None) => Ok(()),
            Ok(Some(error)) => anyhow::bail!("relay refused request: {error}"),
            Err(_) => anyhow::bail!("relay connection closed before reply"),
        }
    }

    /// Take the bus change stream. Can only be taken once.
    pub fn take_bus_notifications(&self) -> anyhow::Result<mpsc::UnboundedReceiver<BusNotification>> {
        self.bus_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| anyhow::anyhow!("bus notifications already taken"))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    pub fn close(&self) {
        self.connection.close(0u32.into(), b"bye");
    }

    /// Wait until the connection is fully closed.
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.connection.close(0u32.into(), b"dropped");
    }
}

async fn read_loop(mut recv: RecvStream, shared: Arc<Shared>) {
    loop {
        let msg = match read_frame(&mut recv).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(e) => {
                debug!("Relay control stream ended: {e:#}");
                break;
            }
        };

        match msg {
            RelayMsg::Reply { request_id, error } => {
                match shared.pending().remove(&request_id) {
                    Some(tx) => {
                        let _ = tx.send(error);
                    }
                    None => warn!(request_id, "Reply for unknown request"),
                }
            }
            RelayMsg::BusChanged {
                key,
                new_value,
                previous_value,
            } => {
                let _ = shared.bus_tx.send(BusNotification {
                    key,
                    new_value,
                    previous_value,
                });
            }
            RelayMsg::UserPublished { peer_id, kind } => {
                let _ = shared.events.send(EngineEvent::UserPublished {
                    user: peer_id,
                    kind,
                });
            }
            RelayMsg::UserLeft { peer_id } => {
                let _ = shared.events.send(EngineEvent::UserLeft { user: peer_id });
            }
            other => debug!(?other, "Ignoring relay message"),
        }
    }

    // Fail every request still waiting.
    shared.pending().clear();
    info!("Relay connection closed");
}

// ---------------------------------------------------------------------------
// Dev-only certificate verifier (skip verification)
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
