//! Server half: the proxy impersonating a vanilla client toward the local
//! offline-mode game server.
//!
//! The login phase runs synchronously inside [`join_backend`]; the play
//! phase runs as a spawned read loop that parses client-bound packets,
//! maintains shared session and entity state, rewrites identities, and
//! forwards everything else untouched.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use serde_json::{Value, json};
use tether_protocol::{
    BodyReader, Clientbound, Frame, FrameDecoder, FrameEncoder, Serverbound, epoch,
    packets::{
        handshake::{self, Handshake},
        login, play,
    },
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::interval,
};
use tracing::{debug, info, trace, warn};

use crate::{
    Proxy,
    client::send_backend_lost_notice,
    connection::{self, PacketRing},
    entity::Entity,
    event::{self, Decision},
    session::{Session, SessionState},
};

/// The backend must keep-alive at least this often or the session closes.
const KEEP_ALIVE_DEADLINE: Duration = Duration::from_secs(30);

const WATCHDOG_PERIOD: Duration = Duration::from_secs(5);

/// Opens the backend side of a session over `stream`: fake-client
/// handshake, offline login, then the spawned play loop.
///
/// `Ok(true)` means the session is bridged. `Ok(false)` means the backend
/// refused the login and the client has already been told why. `Err` means
/// the exchange itself broke and the caller owes the client a notice.
pub async fn join_backend<B>(
    proxy: &Arc<Proxy>,
    session: &Arc<Session>,
    stream: B,
) -> anyhow::Result<bool>
where
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut decoder = FrameDecoder::new();
    let mut encoder = FrameEncoder::new();
    let mut scratch = connection::read_scratch();

    let payload = connection::encode_fixed(session.version, handshake::HANDSHAKE, |buf| {
        Handshake {
            protocol_version: session.version.0,
            server_address: "localhost".to_owned(),
            server_port: proxy.config.server_port,
            next_state: handshake::NEXT_STATE_LOGIN,
        }
        .write(buf)
    })?;
    connection::write_now(&mut writer, &mut encoder, payload).await?;

    let payload = connection::encode_fixed(session.version, login::sb::LOGIN_START, |buf| {
        login::LoginStart {
            username: session.username.clone(),
        }
        .write(buf)
    })?;
    connection::write_now(&mut writer, &mut encoder, payload).await?;

    // login phase; SET_COMPRESSION may arrive before LOGIN_SUCCESS
    loop {
        let frame = connection::read_frame(&mut reader, &mut decoder, &mut scratch)
            .await?
            .context("backend closed during login")?;

        match frame.id {
            login::cb::DISCONNECT => {
                let reason =
                    login::LoginDisconnect::read(&mut BodyReader::new(frame.body, session.version))?
                        .reason;
                info!(session = session.id, %reason, "backend refused the login");
                send_client_disconnect(session, &reason).await;
                return Ok(false);
            }
            login::cb::ENCRYPTION_REQUEST => {
                // the backend must be offline-mode behind the proxy
                let reason = "The game server is running in online mode. Disable it; the proxy \
                              authenticates players itself.";
                warn!(session = session.id, "backend requested encryption");
                send_client_disconnect(session, reason).await;
                return Ok(false);
            }
            login::cb::SET_COMPRESSION => {
                let threshold =
                    login::SetCompression::read(&mut BodyReader::new(frame.body, session.version))?
                        .threshold;
                trace!(session = session.id, threshold, "backend compression enabled");
                decoder.set_compression(threshold);
                encoder.set_compression(threshold);
            }
            login::cb::SUCCESS => break,
            other => bail!("packet 0x{other:02X} is not defined in the Login state"),
        }
    }

    let (outgoing, _writer_task) = connection::spawn_writer(writer, encoder, "server");
    let generation = session.attach_server(outgoing);
    session.touch_server_keep_alive();
    session.set_state(SessionState::Play);

    debug!(session = session.id, username = %session.username, "backend joined");

    tokio::spawn(play_loop(
        Arc::clone(proxy),
        Arc::clone(session),
        generation,
        reader,
        decoder,
        scratch,
    ));
    spawn_keep_alive_watchdog(Arc::clone(proxy), Arc::clone(session), generation);

    Ok(true)
}

/// Client-bound packet pump for one session.
async fn play_loop<R>(
    proxy: Arc<Proxy>,
    session: Arc<Session>,
    generation: u64,
    mut reader: R,
    mut decoder: FrameDecoder,
    mut scratch: bytes::BytesMut,
) where
    R: AsyncRead + Unpin,
{
    let mut ring = PacketRing::new();

    let exit: anyhow::Result<Exit> = loop {
        if session.state() == SessionState::Closed {
            break Ok(Exit::SessionClosed);
        }

        let frame = match connection::read_frame(&mut reader, &mut decoder, &mut scratch).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(Exit::BackendLost("backend closed the connection")),
            Err(e) => break Err(e),
        };
        ring.push(frame.id, frame.raw.len());

        match dispatch(&proxy, &session, &mut decoder, frame).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break Ok(Exit::CloseRequested),
            Err(e) => break Err(e),
        }
    };

    debug!(
        session = session.id,
        username = %session.username,
        last_packets = %ring,
        "server half finished"
    );

    // a rebind may have replaced this half already; if so the session is
    // no longer ours to close
    if session.server_generation() != generation {
        return;
    }

    match exit {
        Ok(Exit::SessionClosed | Exit::CloseRequested) => {}
        Ok(Exit::BackendLost(reason)) => {
            if session.state() == SessionState::Play {
                if let Err(e) = send_backend_lost_notice(&session, reason).await {
                    debug!(session = session.id, "backend-lost notice failed: {e:#}");
                }
            }
            proxy.request_close(Arc::clone(&session), reason).await;
        }
        Err(e) => {
            debug!(session = session.id, "server half failed: {e:#}");
            if session.state() == SessionState::Play {
                if let Err(e) = send_backend_lost_notice(&session, "protocol error").await {
                    debug!(session = session.id, "backend-lost notice failed: {e:#}");
                }
            }
            proxy
                .request_close(Arc::clone(&session), "protocol error")
                .await;
        }
    }
}

enum Exit {
    /// The coordinator already tore the session down.
    SessionClosed,
    /// The backend vanished; the client still needs a notice.
    BackendLost(&'static str),
    /// A handler initiated the close and notified the client itself.
    CloseRequested,
}

enum Flow {
    Continue,
    Stop,
}

async fn dispatch(
    proxy: &Arc<Proxy>,
    session: &Arc<Session>,
    decoder: &mut FrameDecoder,
    frame: Frame,
) -> anyhow::Result<Flow> {
    let version = session.version;

    match session.revision.clientbound(frame.id) {
        Some(Clientbound::KeepAlive) => {
            let ping = play::KeepAlive::read(&mut BodyReader::new(frame.body, version))?;
            session.touch_server_keep_alive();
            let echo = session
                .encode_serverbound(Serverbound::KeepAlive, |buf| {
                    ping.write(buf);
                    Ok(())
                })?;
            session.send_server(echo).await?;
            // absorbed: the external client never sees backend keep-alives
        }
        Some(Clientbound::ChatMessage) => return handle_chat(proxy, session, frame).await,
        Some(Clientbound::JoinGame) => {
            let join = play::JoinGame::read(&mut BodyReader::new(frame.body.clone(), version))?;
            session.set_server_eid(join.entity_id);
            session.set_gamemode(join.gamemode);
            session.set_dimension(join.dimension);
            proxy.emit(
                Some(session),
                event::name::JOIN,
                json!({ "player": session.player_ref() }),
            );
            session.send_client(frame.raw).await?;

            // re-assert the gamemode so a relog out of spectator does not
            // leave the client noclipped
            let refresh = session.encode_clientbound(Clientbound::ChangeGameState, |buf| {
                play::ChangeGameState {
                    reason: 3,
                    value: f32::from(join.gamemode),
                }
                .write(buf);
                Ok(())
            })?;
            session.send_client(refresh).await?;
        }
        Some(Clientbound::TimeUpdate) => {
            let time = play::TimeUpdate::read(&mut BodyReader::new(frame.body.clone(), version))?;
            proxy.roster.set_time_of_day(time.time_of_day);
            session.send_client(frame.raw).await?;
        }
        Some(Clientbound::SpawnPosition) => {
            let spawn =
                play::SpawnPosition::read(&mut BodyReader::new(frame.body.clone(), version))?;
            // the first spawn point is the moment the player is in-world
            if session.position() == (0.0, 0.0, 0.0) {
                session.set_position(
                    f64::from(spawn.location.x),
                    f64::from(spawn.location.y),
                    f64::from(spawn.location.z),
                );
                proxy.emit(
                    Some(session),
                    event::name::SPAWNED,
                    json!({ "player": session.player_ref() }),
                );
            }
            session.send_client(frame.raw).await?;
        }
        Some(Clientbound::Respawn) => {
            let respawn = play::Respawn::read(&mut BodyReader::new(frame.body.clone(), version))?;
            session.set_gamemode(respawn.gamemode);
            session.set_dimension(respawn.dimension);
            session.send_client(frame.raw).await?;
        }
        Some(Clientbound::PlayerPosLook) => {
            let look = play::PlayerPosLookCb::read(&mut BodyReader::new(frame.body.clone(), version))?;
            session.set_position(look.x, look.y, look.z);

            // acknowledge on the server's behalf so the correction sticks
            // even when the client's own answer races the bridge
            let confirm = if version.at_least(epoch::TELEPORT_CONFIRM) {
                let teleport_id = look.teleport_id.unwrap_or_default();
                session.encode_serverbound(Serverbound::TeleportConfirm, |buf| {
                    play::TeleportConfirm { teleport_id }.write(buf);
                    Ok(())
                })?
            } else {
                session.encode_serverbound(Serverbound::PlayerPosLook, |buf| {
                    play::PlayerPosLookSb {
                        x: look.x,
                        y: look.y,
                        z: look.z,
                        yaw: look.yaw,
                        pitch: look.pitch,
                        on_ground: true,
                    }
                    .write(buf);
                    Ok(())
                })?
            };
            session.send_server(confirm).await?;
            session.send_client(frame.raw).await?;
        }
        Some(Clientbound::UseBed) => {
            let bed = play::UseBed::read(&mut BodyReader::new(frame.body.clone(), version))?;
            if bed.entity_id == session.server_eid() {
                session.set_bed_position(bed.location);
                proxy.emit(
                    Some(session),
                    event::name::USE_BED,
                    json!({ "player": session.player_ref() }),
                );
            }
            session.send_client(frame.raw).await?;
        }
        Some(Clientbound::SpawnPlayer) => {
            let mut spawn =
                play::SpawnPlayer::read(&mut BodyReader::new(frame.body.clone(), version))?;
            match proxy.roster.lookup_by_offline_uuid(spawn.uuid) {
                Some(target) => {
                    // the backend only knows offline identities; the
                    // external client must see the authenticated one
                    spawn.uuid = target.uuid;
                    let payload =
                        session.encode_clientbound(Clientbound::SpawnPlayer, |buf| {
                            spawn.write(buf);
                            Ok(())
                        })?;
                    session.send_client(payload).await?;
                }
                None => session.send_client(frame.raw).await?,
            }
        }
        Some(Clientbound::SpawnObject) => {
            let spawn = play::SpawnObject::read(&mut BodyReader::new(frame.body.clone(), version))?;
            proxy.entities.insert(spawn.entity_id, Entity {
                uuid: spawn.uuid,
                kind: i32::from(spawn.kind),
                x: spawn.x,
                y: spawn.y,
                z: spawn.z,
                yaw: spawn.yaw,
                pitch: spawn.pitch,
                head_pitch: None,
                is_object: true,
            });
            session.send_client(frame.raw).await?;
        }
        Some(Clientbound::SpawnMob) => {
            let spawn = play::SpawnMob::read(&mut BodyReader::new(frame.body.clone(), version))?;
            proxy.entities.insert(spawn.entity_id, Entity {
                uuid: spawn.uuid,
                kind: i32::from(spawn.kind),
                x: spawn.x,
                y: spawn.y,
                z: spawn.z,
                yaw: spawn.yaw,
                pitch: spawn.pitch,
                head_pitch: Some(spawn.head_pitch),
                is_object: false,
            });
            session.send_client(frame.raw).await?;
        }
        Some(Clientbound::EntityRelativeMove) => {
            let pkt =
                play::EntityRelativeMove::read(&mut BodyReader::new(frame.body.clone(), version))?;
            proxy.entities.move_relative(pkt.entity_id, pkt.dx, pkt.dy, pkt.dz);
            session.send_client(frame.raw).await?;
        }
        Some(Clientbound::EntityTeleport) => {
            let pkt =
                play::EntityTeleport::read(&mut BodyReader::new(frame.body.clone(), version))?;
            proxy
                .entities
                .teleport(pkt.entity_id, pkt.x, pkt.y, pkt.z, pkt.yaw, pkt.pitch);
            session.send_client(frame.raw).await?;
        }
        Some(Clientbound::DestroyEntities) => {
            let pkt =
                play::DestroyEntities::read(&mut BodyReader::new(frame.body.clone(), version))?;
            for entity_id in pkt.entity_ids {
                proxy.entities.remove(entity_id);
            }
            session.send_client(frame.raw).await?;
        }
        Some(Clientbound::AttachEntity) => {
            let pkt = play::AttachEntity::read(&mut BodyReader::new(frame.body.clone(), version))?;
            if pkt.entity_id == session.server_eid() {
                if pkt.leash {
                    session.set_riding(Some(pkt.vehicle_id));
                    proxy.emit(
                        Some(session),
                        event::name::MOUNT,
                        json!({
                            "player": session.player_ref(),
                            "vehicle_id": pkt.vehicle_id,
                            "leash": pkt.leash,
                        }),
                    );
                } else {
                    session.set_riding(None);
                    proxy.emit(
                        Some(session),
                        event::name::UNMOUNT,
                        json!({ "player": session.player_ref() }),
                    );
                }
            }
            session.send_client(frame.raw).await?;
        }
        Some(Clientbound::ChangeGameState) => {
            let pkt =
                play::ChangeGameState::read(&mut BodyReader::new(frame.body.clone(), version))?;
            if pkt.reason == 3 {
                session.set_gamemode(pkt.value as u8);
            }
            session.send_client(frame.raw).await?;
        }
        Some(Clientbound::SetSlot) => {
            let pkt = play::SetSlot::read(&mut BodyReader::new(frame.body.clone(), version))?;
            if pkt.window_id == 0 {
                session.set_inventory_slot(pkt.slot, pkt.data);
            }
            session.send_client(frame.raw).await?;
        }
        Some(Clientbound::PlayerListItem) => {
            return handle_player_list(proxy, session, frame).await;
        }
        Some(Clientbound::Disconnect) => {
            let reason = play::Disconnect::read(&mut BodyReader::new(frame.body, version))?.reason;
            info!(session = session.id, %reason, "backend disconnected the player");
            send_client_disconnect(session, &reason).await;
            proxy
                .request_close(Arc::clone(session), format!("backend disconnect: {reason}"))
                .await;
            return Ok(Flow::Stop);
        }
        Some(Clientbound::SetCompression) => {
            // play-state toggle existed on the 1.8 wire only; takes effect
            // from the next frame in each direction
            let pkt = login::SetCompression::read(&mut BodyReader::new(frame.body, version))?;
            decoder.set_compression(pkt.threshold);
            session.set_server_compression(pkt.threshold).await?;
        }
        Some(Clientbound::MapChunkBulk) | None => {
            session.send_client(frame.raw).await?;
        }
    }

    Ok(Flow::Continue)
}

/// Chat toward the client: parse the JSON document, let plugins abort or
/// rewrite, forward the original bytes otherwise.
async fn handle_chat(
    proxy: &Arc<Proxy>,
    session: &Arc<Session>,
    frame: Frame,
) -> anyhow::Result<Flow> {
    let chat = play::ChatMessageCb::read(&mut BodyReader::new(frame.body.clone(), session.version))?;

    let Ok(parsed) = serde_json::from_str::<Value>(&chat.json) else {
        // not a document we can hand to plugins; keep the bridge honest
        session.send_client(frame.raw).await?;
        return Ok(Flow::Continue);
    };

    let decision = proxy.emit(
        Some(session),
        event::name::CHATBOX,
        json!({
            "player": session.player_ref(),
            "json": parsed,
        }),
    );

    match decision {
        Decision::Drop => {}
        Decision::Replace(replacement) => {
            let json = match replacement {
                Value::String(text) => {
                    warn!(
                        session = session.id,
                        "chatbox replacement sent as a bare string"
                    );
                    text
                }
                other => other.to_string(),
            };
            let payload = session.encode_clientbound(Clientbound::ChatMessage, |buf| {
                play::ChatMessageCb {
                    json,
                    position: chat.position,
                }
                .write(buf)
            })?;
            session.send_client(payload).await?;
        }
        Decision::PassThrough => session.send_client(frame.raw).await?,
    }

    Ok(Flow::Continue)
}

/// Rewrites tab-list identities: every entry whose uuid resolves through
/// the roster gets the authenticated uuid, and on add also the
/// authenticated name and profile properties. Untouched packets forward
/// byte-identical.
async fn handle_player_list(
    proxy: &Arc<Proxy>,
    session: &Arc<Session>,
    frame: Frame,
) -> anyhow::Result<Flow> {
    let mut list =
        play::PlayerListItem::read(&mut BodyReader::new(frame.body.clone(), session.version))?;

    let mut rewritten = false;
    for entry in &mut list.entries {
        let Some(target) = proxy.roster.lookup_by_offline_uuid(entry.uuid) else {
            continue;
        };
        entry.uuid = target.uuid;
        if let play::PlayerListAction::Add {
            name, properties, ..
        } = &mut entry.action
        {
            name.clone_from(&target.username);
            *properties = target
                .properties
                .iter()
                .map(|property| play::Property {
                    name: property.name.clone(),
                    value: property.value.clone(),
                    signature: property.signature.clone(),
                })
                .collect();
        }
        rewritten = true;
    }

    if rewritten {
        let payload = session
            .encode_clientbound(Clientbound::PlayerListItem, |buf| list.write(buf))?;
        session.send_client(payload).await?;
    } else {
        session.send_client(frame.raw).await?;
    }

    Ok(Flow::Continue)
}

/// Closes the session when the backend goes quiet for longer than the
/// keep-alive deadline.
fn spawn_keep_alive_watchdog(proxy: Arc<Proxy>, session: Arc<Session>, generation: u64) {
    tokio::spawn(async move {
        let mut ticker = interval(WATCHDOG_PERIOD);
        ticker.tick().await; // immediate first tick

        loop {
            ticker.tick().await;
            if session.server_generation() != generation {
                return;
            }
            match session.state() {
                SessionState::Play => {}
                _ => return,
            }
            if session.server_keep_alive_age() > KEEP_ALIVE_DEADLINE {
                warn!(
                    session = session.id,
                    username = %session.username,
                    "backend keep-alives stopped, closing the session"
                );
                if let Err(e) = send_backend_lost_notice(&session, "server timed out").await {
                    debug!(session = session.id, "backend-lost notice failed: {e:#}");
                }
                proxy
                    .request_close(Arc::clone(&session), "backend keep-alive timeout")
                    .await;
                return;
            }
        }
    });
}

/// Play-state disconnect toward the client carrying the backend's reason
/// verbatim.
async fn send_client_disconnect(session: &Arc<Session>, reason: &str) {
    let payload = session.encode_clientbound(Clientbound::Disconnect, |buf| {
        play::Disconnect {
            reason: reason.to_owned(),
        }
        .write(buf)
    });
    match payload {
        Ok(payload) => {
            if let Err(e) = session.send_client(payload).await {
                debug!(session = session.id, "disconnect notice failed: {e:#}");
            }
        }
        Err(e) => debug!(session = session.id, "disconnect encode failed: {e}"),
    }
}

