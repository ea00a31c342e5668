//! A man-in-the-middle proxy for a block-world game server.
//!
//! External players connect here; the proxy authenticates them itself,
//! opens an offline-mode connection to the local game server, and bridges
//! the two. It parses what it must, rewrites identities, publishes events
//! to plugins, and forwards everything else byte-identical.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use anyhow::Context as _;
use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, traits::PublicKeyParts};
use serde_json::Value;
use tokio::{net::TcpListener, sync::Semaphore};
use tracing::{debug, error, info, warn};

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod entity;
pub mod event;
pub mod server;
pub mod session;

pub use config::ProxyConfig;
use entity::EntityTable;
use event::{Decision, EventSink};
use session::{Roster, Session, SessionState};

/// Lifecycle operations serialized through the coordinator mailbox.
pub enum Command {
    /// Tear the session down. Any user-visible notice has already been
    /// queued by the requester.
    Close {
        session: Arc<Session>,
        reason: String,
    },
    /// Cross-server hook: detach the backend and attach a fresh one while
    /// the client half stays open.
    Rebind {
        session: Arc<Session>,
        backend: std::net::SocketAddr,
    },
}

/// Shared context of the whole proxy: configuration, the roster, the
/// entity table, login key material, and the coordinator mailbox.
pub struct Proxy {
    pub config: ProxyConfig,
    pub events: Arc<dyn EventSink>,
    pub roster: Roster,
    pub entities: EntityTable,

    pub(crate) http: reqwest::Client,
    pub(crate) rsa_key: RsaPrivateKey,
    /// Public half of `rsa_key` in DER, sent in EncryptionRequest.
    pub(crate) public_key_der: Box<[u8]>,

    next_stream_id: AtomicU64,
    commands: kanal::AsyncSender<Command>,
}

impl Proxy {
    /// Builds the shared context and spawns the coordinator task. Must run
    /// inside a tokio runtime.
    pub fn new(config: ProxyConfig, events: Arc<dyn EventSink>) -> anyhow::Result<Arc<Self>> {
        let rsa_key = RsaPrivateKey::new(&mut OsRng, config.encryption_key_size)
            .context("failed to generate the login keypair")?;
        let public_key_der = rsa_der::public_key_to_der(
            &rsa_key.n().to_bytes_be(),
            &rsa_key.e().to_bytes_be(),
        )
        .into_boxed_slice();

        let (commands, command_rx) = kanal::bounded_async(64);

        let proxy = Arc::new(Self {
            config,
            events,
            roster: Roster::new(),
            entities: EntityTable::new(),
            http: reqwest::Client::new(),
            rsa_key,
            public_key_der,
            next_stream_id: AtomicU64::new(0),
            commands,
        });

        tokio::spawn(Arc::clone(&proxy).run_coordinator(command_rx));

        Ok(proxy)
    }

    pub(crate) fn next_stream_id(&self) -> u64 {
        self.next_stream_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Publishes one event. Handler failures are contained: logged with
    /// context and demoted to pass-through for that event only.
    pub fn emit(&self, session: Option<&Session>, event: &str, payload: Value) -> Decision {
        match self.events.emit(event, payload) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    event,
                    session = session.map_or(u64::MAX, |s| s.id),
                    "event handler failed, passing packet through: {e:#}"
                );
                Decision::PassThrough
            }
        }
    }

    /// Queues a close on the coordinator. Safe to call from any task, any
    /// number of times.
    pub async fn request_close(&self, session: Arc<Session>, reason: impl Into<String>) {
        let reason = reason.into();
        if self
            .commands
            .send(Command::Close { session, reason })
            .await
            .is_err()
        {
            error!("coordinator mailbox is gone; session leaked until process exit");
        }
    }

    /// Queues a cross-server rebind on the coordinator.
    pub async fn request_rebind(&self, session: Arc<Session>, backend: std::net::SocketAddr) {
        if self
            .commands
            .send(Command::Rebind { session, backend })
            .await
            .is_err()
        {
            error!("coordinator mailbox is gone; rebind dropped");
        }
    }

    async fn run_coordinator(self: Arc<Self>, rx: kanal::AsyncReceiver<Command>) {
        while let Ok(command) = rx.recv().await {
            match command {
                Command::Close { session, reason } => self.teardown(&session, &reason).await,
                Command::Rebind { session, backend } => {
                    Arc::clone(&self).rebind(&session, backend).await;
                }
            }
        }
    }

    async fn teardown(&self, session: &Arc<Session>, reason: &str) {
        let Some(prior) = session.mark_closed() else {
            return;
        };

        debug!(
            session = session.id,
            username = %session.username,
            %reason,
            "closing session"
        );

        // server-half writes are dropped; the client queue drains so a
        // queued disconnect notice still reaches the player
        session.detach_server();
        session.shutdown_client().await;
        self.roster.remove(session.id);

        if prior == SessionState::Play {
            let player = session.player_ref();
            self.emit(
                Some(session),
                event::name::LOGOUT,
                serde_json::json!({ "player": player }),
            );
            self.emit(
                Some(session),
                event::name::LEAVE,
                serde_json::json!({ "player": player }),
            );
        }
    }

    async fn rebind(self: Arc<Self>, session: &Arc<Session>, backend: std::net::SocketAddr) {
        if session.state() != SessionState::Play {
            return;
        }

        info!(
            session = session.id,
            username = %session.username,
            %backend,
            "rebinding session to a new backend"
        );

        session.detach_server();
        session.clear_inventory();
        session.set_server_eid(-1);
        self.entities.clear();

        if let Err(e) = client::send_rebind_notice(session).await {
            debug!(session = session.id, "rebind notice failed: {e:#}");
        }

        match tokio::net::TcpStream::connect(backend).await {
            Ok(stream) => match server::join_backend(&self, session, stream).await {
                Ok(true) => {}
                Ok(false) => self.teardown(session, "rebind refused").await,
                Err(e) => {
                    warn!(session = session.id, "rebind failed: {e:#}");
                    if let Err(e) = client::send_backend_lost_notice(session, "rebind failed").await
                    {
                        debug!(session = session.id, "rebind notice failed: {e:#}");
                    }
                    self.teardown(session, "rebind failed").await;
                }
            },
            Err(e) => {
                warn!(session = session.id, "rebind connect failed: {e:#}");
                if let Err(e) = client::send_backend_lost_notice(session, "rebind failed").await {
                    debug!(session = session.id, "rebind notice failed: {e:#}");
                }
                self.teardown(session, "rebind failed").await;
            }
        }
    }
}

/// Binds the external listener and serves until the listener dies. One
/// semaphore permit per player caps the roster at `max-players`.
pub async fn run(proxy: Arc<Proxy>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&proxy.config.bind)
        .await
        .with_context(|| format!("failed to bind {}", proxy.config.bind))?;
    info!("listening on {}", proxy.config.bind);

    let permits = Arc::new(Semaphore::new(proxy.config.max_players as usize));

    loop {
        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .expect("permit semaphore never closes");

        let (stream, remote) = listener.accept().await.context("accept failed")?;
        debug!(%remote, "accepted connection");

        if let Err(e) = stream.set_nodelay(true) {
            warn!(%remote, "failed to set TCP_NODELAY: {e}");
        }

        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move {
            if let Err(e) = client::serve(proxy, stream).await {
                debug!(%remote, "connection ended: {e:#}");
            }
            drop(permit);
        });
    }
}

/// Helper used by the serve path and tests: server-half connections to the
/// backend always target loopback on the configured port.
pub(crate) fn backend_addr(config: &ProxyConfig) -> std::net::SocketAddr {
    std::net::SocketAddr::from(([127, 0, 0, 1], config.server_port))
}
