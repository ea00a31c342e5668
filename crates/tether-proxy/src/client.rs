//! Client half: the proxy impersonating an online-mode server toward the
//! external player.
//!
//! Handshake, status, and login run synchronously on the accepting task.
//! Once login succeeds the socket splits into the half's read loop (this
//! task) and writer task, the server half is opened, and the session
//! enters Play.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail, ensure};
use bytes::Bytes;
use rsa::Pkcs1v15Encrypt;
use serde_json::{Value, json};
use tether_protocol::{
    BodyReader, Clientbound, FrameDecoder, FrameEncoder, ProtocolVersion, Serverbound,
    packets::{
        handshake::{self, Handshake},
        login, play, status,
    },
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf},
    net::TcpStream,
    time::interval,
};
use tracing::{debug, info, trace, warn};

use crate::{
    Proxy, auth,
    connection::{self, PacketRing},
    event::{self, Decision},
    server,
    session::{Session, SessionState},
};

/// Version line reported on the status screen.
const STATUS_VERSION_NAME: &str = "1.8-1.9.4";

/// Cadence of proxy-generated keep-alives toward the client. The backend's
/// own keep-alives never cross the proxy, so client liveness is ours to
/// maintain.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Serves one accepted external socket end to end.
pub async fn serve(proxy: Arc<Proxy>, stream: TcpStream) -> anyhow::Result<()> {
    let backend = crate::backend_addr(&proxy.config);
    serve_with_backend(proxy, stream, move || async move {
        // one short retry; past the handshake stage failures are final
        match TcpStream::connect(backend).await {
            Ok(stream) => Ok(stream),
            Err(first) => {
                debug!("backend connect failed ({first}), retrying once");
                tokio::time::sleep(Duration::from_millis(250)).await;
                TcpStream::connect(backend)
                    .await
                    .with_context(|| format!("failed to connect to the game server at {backend}"))
            }
        }
    })
    .await
}

/// Same flow with an injectable backend transport; tests bridge in-memory
/// pipes through here.
pub async fn serve_with_backend<S, B, F, Fut>(
    proxy: Arc<Proxy>,
    stream: S,
    connect: F,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = anyhow::Result<B>> + Send,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut decoder = FrameDecoder::new();
    let mut encoder = FrameEncoder::new();
    let mut scratch = connection::read_scratch();

    let frame = connection::read_frame(&mut reader, &mut decoder, &mut scratch)
        .await?
        .context("connection closed before the handshake")?;
    ensure!(
        frame.id == handshake::HANDSHAKE,
        "expected a handshake, got packet 0x{:02X}",
        frame.id
    );

    // field layout of the handshake itself never changed
    let handshake = Handshake::read(&mut BodyReader::new(frame.body, ProtocolVersion(47)))?;
    let version = ProtocolVersion(handshake.protocol_version);
    trace!(
        version = version.0,
        next_state = handshake.next_state,
        "handshake received"
    );

    match handshake.next_state {
        handshake::NEXT_STATE_STATUS => {
            serve_status(&proxy, &mut reader, &mut writer, &mut decoder, &mut encoder, version)
                .await
        }
        handshake::NEXT_STATE_LOGIN => {
            serve_login(
                proxy, reader, writer, decoder, encoder, scratch, version, connect,
            )
            .await
        }
        other => bail!("handshake next-state {other} is not defined"),
    }
}

async fn serve_status<R, W>(
    proxy: &Proxy,
    reader: &mut R,
    writer: &mut W,
    decoder: &mut FrameDecoder,
    encoder: &mut FrameEncoder,
    version: ProtocolVersion,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut scratch = connection::read_scratch();

    loop {
        let Some(frame) = connection::read_frame(reader, decoder, &mut scratch).await? else {
            return Ok(());
        };

        match frame.id {
            status::sb::REQUEST => {
                let body = json!({
                    "version": {
                        "name": STATUS_VERSION_NAME,
                        "protocol": version.0,
                    },
                    "players": {
                        "online": proxy.roster.len(),
                        "max": proxy.config.max_players,
                    },
                    "description": { "text": "A tether proxy" },
                });
                let payload = connection::encode_fixed(version, status::cb::RESPONSE, |buf| {
                    status::StatusResponse {
                        json: body.to_string(),
                    }
                    .write(buf)
                })?;
                connection::write_now(writer, encoder, payload).await?;
            }
            status::sb::PING => {
                let ping = status::Ping::read(&mut BodyReader::new(frame.body, version))?;
                let payload = connection::encode_fixed(version, status::cb::PONG, |buf| {
                    ping.write(buf);
                    Ok(())
                })?;
                connection::write_now(writer, encoder, payload).await?;
                return Ok(());
            }
            other => bail!("packet 0x{other:02X} is not defined in the Status state"),
        }
    }
}

async fn serve_login<S, B, F, Fut>(
    proxy: Arc<Proxy>,
    mut reader: ReadHalf<S>,
    mut writer: tokio::io::WriteHalf<S>,
    mut decoder: FrameDecoder,
    mut encoder: FrameEncoder,
    mut scratch: bytes::BytesMut,
    version: ProtocolVersion,
    connect: F,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = anyhow::Result<B>> + Send,
{
    let frame = connection::read_frame(&mut reader, &mut decoder, &mut scratch)
        .await?
        .context("connection closed before login start")?;
    ensure!(
        frame.id == login::sb::LOGIN_START,
        "expected login start, got packet 0x{:02X}",
        frame.id
    );
    let login::LoginStart { username } =
        login::LoginStart::read(&mut BodyReader::new(frame.body, version))?;
    ensure!(
        !username.is_empty() && username.len() <= 16,
        "invalid username '{username}'"
    );

    let offline_uuid = auth::offline_uuid(&username);

    let (uuid, properties) = if proxy.config.online_mode {
        match authenticate(
            &proxy,
            &mut reader,
            &mut writer,
            &mut decoder,
            &mut encoder,
            &mut scratch,
            version,
            &username,
        )
        .await
        {
            Ok(profile) => profile,
            Err(e) => {
                info!(%username, "login rejected: {e:#}");
                let reason = json!({ "text": format!("Failed to verify username: {e}") });
                let payload = connection::encode_fixed(version, login::cb::DISCONNECT, |buf| {
                    login::LoginDisconnect {
                        reason: reason.to_string(),
                    }
                    .write(buf)
                })?;
                if let Err(e) = connection::write_now(&mut writer, &mut encoder, payload).await
                {
                    debug!("login disconnect never made it out: {e:#}");
                }
                return Ok(());
            }
        }
    } else {
        (offline_uuid, Vec::new())
    };

    let threshold = proxy.config.compression_threshold;
    if threshold >= 0 {
        let payload = connection::encode_fixed(version, login::cb::SET_COMPRESSION, |buf| {
            login::SetCompression { threshold }.write(buf);
            Ok(())
        })?;
        connection::write_now(&mut writer, &mut encoder, payload).await?;
        encoder.set_compression(threshold);
        decoder.set_compression(threshold);
    }

    let payload = connection::encode_fixed(version, login::cb::SUCCESS, |buf| {
        login::LoginSuccess {
            uuid,
            username: username.clone(),
        }
        .write(buf)
    })?;
    connection::write_now(&mut writer, &mut encoder, payload).await?;

    // the external half is live; spin up its writer and the session
    let stream_id = proxy.next_stream_id();
    let (client_out, _writer_task) = connection::spawn_writer(writer, encoder, "client");

    let session = Arc::new(Session::new(
        stream_id,
        version,
        username.clone(),
        uuid,
        offline_uuid,
        properties,
        threshold,
        client_out,
    ));
    proxy.roster.insert(Arc::clone(&session));

    info!(
        session = stream_id,
        %username,
        %uuid,
        online_mode = proxy.config.online_mode,
        "login complete"
    );
    proxy.emit(
        Some(&session),
        event::name::LOGIN,
        json!({ "player": session.player_ref() }),
    );

    // mirror the player into the offline backend
    let backend = match connect().await {
        Ok(backend) => backend,
        Err(e) => {
            warn!(session = stream_id, "backend connect failed: {e:#}");
            if let Err(e) = send_backend_lost_notice(&session, "could not reach the server").await {
                debug!(session = stream_id, "backend-lost notice failed: {e:#}");
            }
            proxy.request_close(Arc::clone(&session), "backend connect failed").await;
            return Ok(());
        }
    };
    match server::join_backend(&proxy, &session, backend).await {
        Ok(true) => {}
        Ok(false) => {
            // the backend refused and the client already has the reason
            proxy.request_close(Arc::clone(&session), "backend refused login").await;
            return Ok(());
        }
        Err(e) => {
            warn!(session = stream_id, "backend login failed: {e:#}");
            if let Err(e) = send_backend_lost_notice(&session, "could not join the server").await {
                debug!(session = stream_id, "backend-lost notice failed: {e:#}");
            }
            proxy.request_close(Arc::clone(&session), "backend login failed").await;
            return Ok(());
        }
    }

    spawn_keep_alive_ticker(Arc::clone(&session));

    let result = play_loop(&proxy, &session, &mut reader, &mut decoder, &mut scratch).await;
    let reason = match &result {
        Ok(()) => "client disconnected".to_owned(),
        Err(e) => {
            debug!(session = session.id, "client half failed: {e:#}");
            "protocol error".to_owned()
        }
    };
    proxy.request_close(Arc::clone(&session), reason).await;
    result
}

/// Online-mode login: key exchange, stream encryption, session-service
/// lookup.
async fn authenticate<R, W>(
    proxy: &Proxy,
    reader: &mut R,
    writer: &mut W,
    decoder: &mut FrameDecoder,
    encoder: &mut FrameEncoder,
    scratch: &mut bytes::BytesMut,
    version: ProtocolVersion,
    username: &str,
) -> anyhow::Result<(uuid::Uuid, Vec<auth::ProfileProperty>)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let server_id = format!("{:016x}", rand::random::<u64>());
    let verify_token: [u8; 4] = rand::random();

    let payload = connection::encode_fixed(version, login::cb::ENCRYPTION_REQUEST, |buf| {
        login::EncryptionRequest {
            server_id: server_id.clone(),
            public_key: Bytes::copy_from_slice(&proxy.public_key_der),
            verify_token: Bytes::copy_from_slice(&verify_token),
        }
        .write(buf)
    })?;
    connection::write_now(writer, encoder, payload).await?;

    let frame = connection::read_frame(reader, decoder, scratch)
        .await?
        .context("connection closed during the key exchange")?;
    ensure!(
        frame.id == login::sb::ENCRYPTION_RESPONSE,
        "expected encryption response, got packet 0x{:02X}",
        frame.id
    );
    let response = login::EncryptionResponse::read(&mut BodyReader::new(frame.body, version))?;

    let shared_secret = proxy
        .rsa_key
        .decrypt(Pkcs1v15Encrypt, &response.shared_secret)
        .context("failed to decrypt the shared secret")?;
    let echoed_token = proxy
        .rsa_key
        .decrypt(Pkcs1v15Encrypt, &response.verify_token)
        .context("failed to decrypt the verify token")?;
    ensure!(echoed_token == verify_token, "verify token mismatch");

    let secret: [u8; 16] = shared_secret
        .as_slice()
        .try_into()
        .context("shared secret has the wrong length")?;
    encoder.enable_encryption(&secret);
    decoder.enable_encryption(&secret);

    let hash = auth::server_hash(&server_id, &secret, &proxy.public_key_der);
    let profile = auth::has_joined(&proxy.http, username, &hash).await?;
    let uuid = profile.uuid()?;

    Ok((uuid, profile.properties))
}

/// Server-bound packet pump for one session.
async fn play_loop<R>(
    proxy: &Proxy,
    session: &Arc<Session>,
    reader: &mut R,
    decoder: &mut FrameDecoder,
    scratch: &mut bytes::BytesMut,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut ring = PacketRing::new();

    let result = loop {
        if session.state() == SessionState::Closed {
            break Ok(());
        }

        let frame = match connection::read_frame(reader, decoder, scratch).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        ring.push(frame.id, frame.raw.len());

        match session.revision.serverbound(frame.id) {
            Some(Serverbound::KeepAlive) => {
                // the response to one of ours; the backend never sees it
                trace!(session = session.id, "client keep-alive absorbed");
            }
            Some(Serverbound::ChatMessage) => {
                if let Err(e) = handle_client_chat(proxy, session, &frame).await {
                    break Err(e);
                }
            }
            Some(Serverbound::PlayerPosition) => {
                let mut body = BodyReader::new(frame.body.clone(), session.version);
                let packet = play::PlayerPositionSb::read(&mut body)?;
                if forward_move(proxy, session, packet.x, packet.y, packet.z).await? {
                    session.send_server(frame.raw).await?;
                }
            }
            Some(Serverbound::PlayerPosLook) => {
                let mut body = BodyReader::new(frame.body.clone(), session.version);
                let packet = play::PlayerPosLookSb::read(&mut body)?;
                if forward_move(proxy, session, packet.x, packet.y, packet.z).await? {
                    session.send_server(frame.raw).await?;
                }
            }
            _ => session.send_server(frame.raw).await?,
        }
    };

    debug!(
        session = session.id,
        username = %session.username,
        last_packets = %ring,
        "client half finished"
    );
    result
}

/// Updates shared position state, publishes `player.move`, and reports
/// whether the packet should still be forwarded.
async fn forward_move(
    proxy: &Proxy,
    session: &Arc<Session>,
    x: f64,
    y: f64,
    z: f64,
) -> anyhow::Result<bool> {
    session.set_position(x, y, z);
    let decision = proxy.emit(
        Some(session),
        event::name::MOVE,
        json!({
            "player": session.player_ref(),
            "position": [x, y, z],
        }),
    );
    match decision {
        Decision::Drop => Ok(false),
        Decision::PassThrough => Ok(true),
        Decision::Replace(_) => {
            debug!(session = session.id, "player.move does not support rewrite; passing through");
            Ok(true)
        }
    }
}

async fn handle_client_chat(
    proxy: &Proxy,
    session: &Arc<Session>,
    frame: &tether_protocol::Frame,
) -> anyhow::Result<()> {
    let mut body = BodyReader::new(frame.body.clone(), session.version);
    let play::ChatMessageSb { message } = play::ChatMessageSb::read(&mut body)?;

    let mut text = message;
    let mut rewritten = false;

    let decision = proxy.emit(
        Some(session),
        event::name::CHATBOX,
        json!({
            "player": session.player_ref(),
            "json": { "message": text },
        }),
    );
    match decision {
        Decision::Drop => return Ok(()),
        Decision::Replace(payload) => {
            if let Some(replacement) = replacement_text(&payload) {
                text = replacement;
                rewritten = true;
            }
        }
        Decision::PassThrough => {}
    }

    if let Some(stripped) = text.strip_prefix('/') {
        let mut words = stripped.split_whitespace();
        let command = words.next().unwrap_or_default().to_owned();
        let args: Vec<&str> = words.collect();

        let decision = proxy.emit(
            Some(session),
            event::name::RUN_COMMAND,
            json!({
                "player": session.player_ref(),
                "command": command,
                "args": args,
            }),
        );
        match decision {
            Decision::Drop => return Ok(()),
            Decision::Replace(payload) => {
                if let Some(replacement) = replacement_text(&payload) {
                    text = replacement;
                    rewritten = true;
                }
            }
            Decision::PassThrough => {}
        }
    }

    if rewritten {
        let payload = session.encode_serverbound(Serverbound::ChatMessage, |buf| {
            play::ChatMessageSb { message: text }.write(buf)
        })?;
        session.send_server(payload).await
    } else {
        session.send_server(frame.raw.clone()).await
    }
}

/// A replacement payload for client-origin chat is either a bare string or
/// a `{"message": …}` object.
fn replacement_text(payload: &Value) -> Option<String> {
    payload
        .as_str()
        .map(str::to_owned)
        .or_else(|| payload.get("message")?.as_str().map(str::to_owned))
}

/// Proxy-generated keep-alives toward the client, since the backend's own
/// never cross the bridge.
fn spawn_keep_alive_ticker(session: Arc<Session>) {
    tokio::spawn(async move {
        let mut ticker = interval(KEEP_ALIVE_INTERVAL);
        ticker.tick().await; // immediate first tick

        let mut counter: i64 = 0;
        loop {
            ticker.tick().await;
            if session.state() != SessionState::Play {
                return;
            }
            counter += 1;
            let payload = match session.encode_clientbound(Clientbound::KeepAlive, |buf| {
                play::KeepAlive { id: counter }.write(buf);
                Ok(())
            }) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(session = session.id, "keep-alive encode failed: {e}");
                    return;
                }
            };
            if session.send_client(payload).await.is_err() {
                return;
            }
        }
    });
}

/// Fake weather reset plus a red notice, sent before a rebind swaps
/// backends under a live client.
pub(crate) async fn send_rebind_notice(session: &Arc<Session>) -> anyhow::Result<()> {
    let end_raining = session.encode_clientbound(Clientbound::ChangeGameState, |buf| {
        play::ChangeGameState {
            reason: 1,
            value: 0.0,
        }
        .write(buf);
        Ok(())
    })?;
    session.send_client(end_raining).await?;

    let notice = json!({ "text": "Transferring to another server...", "color": "red" });
    let chat = session.encode_clientbound(Clientbound::ChatMessage, |buf| {
        play::ChatMessageCb {
            json: notice.to_string(),
            position: 0,
        }
        .write(buf)
    })?;
    session.send_client(chat).await
}

/// Red "Disconnected from server" chat plus a play disconnect; what the
/// client sees when the backend is lost and no fallback is configured.
pub(crate) async fn send_backend_lost_notice(
    session: &Arc<Session>,
    reason: &str,
) -> anyhow::Result<()> {
    let notice = json!({
        "text": format!("Disconnected from server: {reason}"),
        "color": "red",
    });

    let chat = session.encode_clientbound(Clientbound::ChatMessage, |buf| {
        play::ChatMessageCb {
            json: notice.to_string(),
            position: 0,
        }
        .write(buf)
    })?;
    session.send_client(chat).await?;

    let disconnect = session.encode_clientbound(Clientbound::Disconnect, |buf| {
        play::Disconnect {
            reason: notice.to_string(),
        }
        .write(buf)
    })?;
    session.send_client(disconnect).await
}

