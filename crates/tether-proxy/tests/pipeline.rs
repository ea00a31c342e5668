//! End-to-end pipeline tests: a scripted player and a scripted backend on
//! in-memory pipes, the real proxy in between.

use std::collections::HashMap;
use std::io::Read as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use tether_protocol::{
    BodyReader, Frame, FrameDecoder, FrameEncoder, PacketBuf, ProtocolVersion, VarInt,
    packets::{
        handshake::{self, Handshake},
        login, play,
    },
};
use tether_proxy::{
    Proxy, ProxyConfig, auth, client, connection,
    event::{Decision, EventSink},
    session::Session,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

const V: ProtocolVersion = ProtocolVersion(47);
const RECV_DEADLINE: Duration = Duration::from_secs(5);

// play ids on the 1.8 wire, as the scripted endpoints speak it
const CB_KEEP_ALIVE: i32 = 0x00;
const CB_CHAT: i32 = 0x02;
const CB_TIME_UPDATE: i32 = 0x03;
const CB_SPAWN_PLAYER: i32 = 0x0C;
const CB_CHANGE_GAME_STATE: i32 = 0x2B;
const CB_DISCONNECT: i32 = 0x40;
const SB_KEEP_ALIVE: i32 = 0x00;
const SB_CHAT: i32 = 0x01;

/// One scripted endpoint of the bridge.
struct Peer<S> {
    stream: S,
    enc: FrameEncoder,
    dec: FrameDecoder,
}

impl<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin> Peer<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            enc: FrameEncoder::new(),
            dec: FrameDecoder::new(),
        }
    }

    async fn send(&mut self, payload: Bytes) {
        let wire = self.enc.encode_to_bytes(&payload).unwrap();
        self.stream.write_all(&wire).await.unwrap();
    }

    async fn recv(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.dec.try_next_frame().unwrap() {
                return Some(frame);
            }
            let mut buf = [0u8; 4096];
            let n = timeout(RECV_DEADLINE, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for a frame")
                .unwrap();
            if n == 0 {
                return None;
            }
            self.dec.queue_bytes(&buf[..n]);
        }
    }

    /// Reads one frame's post-length bytes without running them through
    /// the decoder; only valid while the decoder buffer is drained.
    async fn recv_wire(&mut self) -> Vec<u8> {
        let mut wire = Vec::new();
        loop {
            let mut view = &wire[..];
            if let Ok(length) = VarInt::decode(&mut view) {
                let length = length.0 as usize;
                if view.len() >= length {
                    return view[..length].to_vec();
                }
            }
            let mut buf = [0u8; 4096];
            let n = timeout(RECV_DEADLINE, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for wire bytes")
                .unwrap();
            assert_ne!(n, 0, "stream closed mid-frame");
            wire.extend_from_slice(&buf[..n]);
        }
    }

    fn body(&self, frame: &Frame) -> BodyReader {
        BodyReader::new(frame.body.clone(), V)
    }
}

fn payload(id: i32, write: impl FnOnce(&mut PacketBuf)) -> Bytes {
    let mut buf = PacketBuf::new(id, V);
    write(&mut buf);
    buf.finish()
}

/// Sink that records every event and answers with scripted decisions.
#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<(String, Value)>>,
    scripted: Mutex<HashMap<String, Decision>>,
}

impl RecordingSink {
    fn respond(&self, event: &str, decision: Decision) {
        self.scripted.lock().unwrap().insert(event.to_owned(), decision);
    }

    fn events_named(&self, event: &str) -> Vec<Value> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &str, payload: Value) -> anyhow::Result<Decision> {
        self.seen
            .lock()
            .unwrap()
            .push((event.to_owned(), payload));
        Ok(self
            .scripted
            .lock()
            .unwrap()
            .get(event)
            .cloned()
            .unwrap_or_default())
    }
}

fn test_config(compression_threshold: i32) -> ProxyConfig {
    ProxyConfig {
        online_mode: false,
        server_port: 25565,
        bind: "127.0.0.1:0".to_owned(),
        compression_threshold,
        max_players: 10,
        // small key; nothing in these tests encrypts
        encryption_key_size: 512,
        ..ProxyConfig::default()
    }
}

/// Runs an offline-mode login through the proxy and returns the two
/// scripted endpoints with the session fully in Play.
async fn bridge(
    proxy: &Arc<Proxy>,
    username: &str,
) -> (Peer<DuplexStream>, Peer<DuplexStream>) {
    let (player_io, proxy_client_io) = tokio::io::duplex(1 << 16);
    let (backend_io, proxy_backend_io) = tokio::io::duplex(1 << 16);

    tokio::spawn(client::serve_with_backend(
        Arc::clone(proxy),
        proxy_client_io,
        move || async move { Ok(proxy_backend_io) },
    ));

    let mut player = Peer::new(player_io);
    let mut backend = Peer::new(backend_io);

    player
        .send(payload(handshake::HANDSHAKE, |buf| {
            Handshake {
                protocol_version: V.0,
                server_address: "localhost".to_owned(),
                server_port: 25565,
                next_state: handshake::NEXT_STATE_LOGIN,
            }
            .write(buf)
            .unwrap();
        }))
        .await;
    player
        .send(payload(login::sb::LOGIN_START, |buf| {
            login::LoginStart {
                username: username.to_owned(),
            }
            .write(buf)
            .unwrap();
        }))
        .await;

    // the proxy answers the login itself, then logs into the backend
    let mut frame = player.recv().await.expect("login answer");
    if frame.id == login::cb::SET_COMPRESSION {
        let threshold = login::SetCompression::read(&mut player.body(&frame))
            .unwrap()
            .threshold;
        player.dec.set_compression(threshold);
        player.enc.set_compression(threshold);
        frame = player.recv().await.expect("login success");
    }
    assert_eq!(frame.id, login::cb::SUCCESS);
    let success = login::LoginSuccess::read(&mut player.body(&frame)).unwrap();
    assert_eq!(success.username, username);
    assert_eq!(success.uuid, auth::offline_uuid(username));

    let hs = backend.recv().await.expect("backend handshake");
    assert_eq!(hs.id, handshake::HANDSHAKE);
    let hs = Handshake::read(&mut backend.body(&hs)).unwrap();
    assert_eq!(hs.next_state, handshake::NEXT_STATE_LOGIN);

    let start = backend.recv().await.expect("backend login start");
    assert_eq!(start.id, login::sb::LOGIN_START);
    let start = login::LoginStart::read(&mut backend.body(&start)).unwrap();
    assert_eq!(start.username, username);

    backend
        .send(payload(login::cb::SUCCESS, |buf| {
            login::LoginSuccess {
                uuid: auth::offline_uuid(username),
                username: username.to_owned(),
            }
            .write(buf)
            .unwrap();
        }))
        .await;

    (player, backend)
}

fn chat_json(text: &str) -> String {
    json!({ "text": text }).to_string()
}

#[tokio::test]
async fn offline_handshake_bypass() {
    let sink = Arc::new(RecordingSink::default());
    let proxy = Proxy::new(test_config(-1), sink.clone()).unwrap();

    let (mut player, mut backend) = bridge(&proxy, "alice").await;

    // the halves mirror: a backend packet reaches the player untouched
    backend
        .send(payload(CB_TIME_UPDATE, |buf| {
            buf.write_i64(100);
            buf.write_i64(6000);
        }))
        .await;
    let frame = player.recv().await.unwrap();
    assert_eq!(frame.id, CB_TIME_UPDATE);

    let logins = sink.events_named("player.login");
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0]["player"]["username"], "alice");
}

#[tokio::test]
async fn compression_threshold_controls_the_envelope() {
    let proxy = Proxy::new(test_config(64), Arc::new(RecordingSink::default())).unwrap();
    let (mut player, mut backend) = bridge(&proxy, "alice").await;

    // under the threshold: varint(0) marker then the raw payload
    backend
        .send(payload(CB_CHAT, |buf| {
            buf.write_string("\"hi\"").unwrap();
            buf.write_i8(0);
        }))
        .await;
    let wire = player.recv_wire().await;
    assert_eq!(wire[0], 0, "expected the uncompressed marker");
    let mut view = &wire[1..];
    assert_eq!(VarInt::decode(&mut view).unwrap().0, CB_CHAT);

    // over the threshold: declared length then a zlib stream
    let long_line = "a".repeat(190);
    backend
        .send(payload(CB_CHAT, |buf| {
            buf.write_string(&format!("\"{long_line}\"")).unwrap();
            buf.write_i8(0);
        }))
        .await;
    let wire = player.recv_wire().await;
    let mut view = &wire[..];
    let declared = VarInt::decode(&mut view).unwrap().0;
    assert!(declared > 64, "declared uncompressed length {declared}");
    let mut inflated = Vec::new();
    flate2::read::ZlibDecoder::new(view)
        .read_to_end(&mut inflated)
        .unwrap();
    assert_eq!(inflated.len(), declared as usize);
    let mut view = &inflated[..];
    assert_eq!(VarInt::decode(&mut view).unwrap().0, CB_CHAT);
}

#[tokio::test]
async fn chatbox_replacement_rewrites_the_packet() {
    let sink = Arc::new(RecordingSink::default());
    sink.respond("player.chatbox", Decision::Replace(json!({ "text": "hi" })));
    let proxy = Proxy::new(test_config(-1), sink.clone()).unwrap();
    let (mut player, mut backend) = bridge(&proxy, "alice").await;

    backend
        .send(payload(CB_CHAT, |buf| {
            buf.write_string(&chat_json("original")).unwrap();
            buf.write_i8(1);
        }))
        .await;
    // marker packet proving nothing else was forwarded in between
    backend
        .send(payload(CB_TIME_UPDATE, |buf| {
            buf.write_i64(0);
            buf.write_i64(0);
        }))
        .await;

    let frame = player.recv().await.unwrap();
    assert_eq!(frame.id, CB_CHAT);
    let chat = play::ChatMessageCb::read(&mut player.body(&frame)).unwrap();
    let replaced: Value = serde_json::from_str(&chat.json).unwrap();
    assert_eq!(replaced, json!({ "text": "hi" }));
    assert_eq!(chat.position, 1);

    let frame = player.recv().await.unwrap();
    assert_eq!(frame.id, CB_TIME_UPDATE, "original chat leaked through");

    let published = sink.events_named("player.chatbox");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["json"], json!({ "text": "original" }));
}

#[tokio::test]
async fn spawn_player_uuids_are_rewritten() {
    let proxy = Proxy::new(test_config(-1), Arc::new(RecordingSink::default())).unwrap();

    // alice is already connected with a real authenticated identity that
    // differs from what the offline backend knows her by
    let alice_uuid = uuid::Uuid::from_u128(0xA11CE);
    let (alice_out, _task) =
        connection::spawn_writer(tokio::io::sink(), FrameEncoder::new(), "alice");
    proxy.roster.insert(Arc::new(Session::new(
        9000,
        V,
        "alice".to_owned(),
        alice_uuid,
        auth::offline_uuid("alice"),
        Vec::new(),
        -1,
        alice_out,
    )));

    let (mut player, mut backend) = bridge(&proxy, "bob").await;

    let tail = [7u8, 8, 9, 10, 11, 12, 13, 14, 15];
    backend
        .send(payload(CB_SPAWN_PLAYER, |buf| {
            play::SpawnPlayer {
                entity_id: 7,
                uuid: auth::offline_uuid("alice"),
                rest: Bytes::copy_from_slice(&tail),
            }
            .write(buf);
        }))
        .await;

    let frame = player.recv().await.unwrap();
    assert_eq!(frame.id, CB_SPAWN_PLAYER);
    let spawn = play::SpawnPlayer::read(&mut player.body(&frame)).unwrap();
    assert_eq!(spawn.entity_id, 7);
    assert_eq!(spawn.uuid, alice_uuid, "offline uuid leaked past the proxy");
    assert_eq!(&spawn.rest[..], &tail);
}

#[tokio::test]
async fn keep_alives_are_absorbed_and_echoed() {
    let proxy = Proxy::new(test_config(-1), Arc::new(RecordingSink::default())).unwrap();
    let (mut player, mut backend) = bridge(&proxy, "alice").await;

    for n in 1..=6i64 {
        backend
            .send(payload(CB_KEEP_ALIVE, |buf| buf.write_varint((n * 10) as i32)))
            .await;
    }

    for n in 1..=6i64 {
        let echo = backend.recv().await.expect("keep-alive echo");
        assert_eq!(echo.id, SB_KEEP_ALIVE);
        let ping = play::KeepAlive::read(&mut backend.body(&echo)).unwrap();
        assert_eq!(ping.id, n * 10);
    }

    // the external socket saw none of them
    backend
        .send(payload(CB_TIME_UPDATE, |buf| {
            buf.write_i64(1);
            buf.write_i64(2);
        }))
        .await;
    let frame = player.recv().await.unwrap();
    assert_eq!(frame.id, CB_TIME_UPDATE, "a keep-alive reached the client");
}

#[tokio::test]
async fn backend_disconnect_reaches_the_client_verbatim() {
    let sink = Arc::new(RecordingSink::default());
    let proxy = Proxy::new(test_config(-1), sink.clone()).unwrap();
    let (mut player, mut backend) = bridge(&proxy, "alice").await;

    backend
        .send(payload(CB_DISCONNECT, |buf| {
            buf.write_string("banned").unwrap();
        }))
        .await;

    let frame = player.recv().await.expect("disconnect frame");
    assert_eq!(frame.id, CB_DISCONNECT);
    let disconnect = play::Disconnect::read(&mut player.body(&frame)).unwrap();
    assert_eq!(disconnect.reason, "banned");

    // then the socket closes
    assert!(player.recv().await.is_none());

    // give the coordinator a beat, then the roster must be clean
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(proxy.roster.is_empty());
    assert_eq!(sink.events_named("player.logout").len(), 1);
    assert_eq!(sink.events_named("player.leave").len(), 1);
}

#[tokio::test]
async fn client_chat_publishes_commands_and_supports_drop() {
    let sink = Arc::new(RecordingSink::default());
    sink.respond("player.runCommand", Decision::Drop);
    let proxy = Proxy::new(test_config(-1), sink.clone()).unwrap();
    let (mut player, mut backend) = bridge(&proxy, "alice").await;

    // a dropped command never reaches the backend
    player
        .send(payload(SB_CHAT, |buf| {
            buf.write_string("/home set base").unwrap();
        }))
        .await;
    // plain chat passes through
    player
        .send(payload(SB_CHAT, |buf| {
            buf.write_string("hello world").unwrap();
        }))
        .await;

    let frame = backend.recv().await.unwrap();
    assert_eq!(frame.id, SB_CHAT);
    let chat = play::ChatMessageSb::read(&mut backend.body(&frame)).unwrap();
    assert_eq!(chat.message, "hello world", "the dropped command leaked");

    let commands = sink.events_named("player.runCommand");
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["command"], "home");
    assert_eq!(commands[0]["args"], json!(["set", "base"]));
    assert_eq!(sink.events_named("player.chatbox").len(), 2);
}

#[tokio::test]
async fn rebind_swaps_backends_under_a_live_client() {
    let sink = Arc::new(RecordingSink::default());
    let proxy = Proxy::new(test_config(-1), sink.clone()).unwrap();
    let (mut player, mut old_backend) = bridge(&proxy, "alice").await;

    // the replacement backend is a real loopback listener
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let session = proxy
        .roster
        .lookup_by_offline_uuid(auth::offline_uuid("alice"))
        .expect("alice is connected");
    proxy.request_rebind(Arc::clone(&session), addr).await;

    // the new backend sees a fresh offline login
    let (stream, _) = timeout(RECV_DEADLINE, listener.accept()).await.unwrap().unwrap();
    let mut new_backend = Peer::new(stream);
    let hs = new_backend.recv().await.expect("rebind handshake");
    assert_eq!(hs.id, handshake::HANDSHAKE);
    let start = new_backend.recv().await.expect("rebind login start");
    assert_eq!(start.id, login::sb::LOGIN_START);
    new_backend
        .send(payload(login::cb::SUCCESS, |buf| {
            login::LoginSuccess {
                uuid: auth::offline_uuid("alice"),
                username: "alice".to_owned(),
            }
            .write(buf)
            .unwrap();
        }))
        .await;

    // the client half stayed open and got the weather reset plus notice
    let frame = player.recv().await.unwrap();
    assert_eq!(frame.id, CB_CHANGE_GAME_STATE);
    let state = play::ChangeGameState::read(&mut player.body(&frame)).unwrap();
    assert_eq!(state.reason, 1);
    let frame = player.recv().await.unwrap();
    assert_eq!(frame.id, CB_CHAT);

    // and traffic flows from the new backend
    new_backend
        .send(payload(CB_TIME_UPDATE, |buf| {
            buf.write_i64(5);
            buf.write_i64(5);
        }))
        .await;
    let frame = player.recv().await.unwrap();
    assert_eq!(frame.id, CB_TIME_UPDATE);

    drop(old_backend);
}
