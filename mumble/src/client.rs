//! Connection lifecycle: handshake, the reader task, and the handle
//! returned to callers. State lives behind a shared `RwLock<Store>` rather
//! than being owned exclusively by the task that holds the socket, so a
//! caller can read it from any thread without routing through an actor
//! message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use mumble_protocol::control::msgs;
use msgtools::proxy;
use protobuf::RepeatedField;
use tokio::io::WriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::audio_frame::AudioFrame;
use crate::audio_in::{self, DrainOutcome, JitterBuffer};
use crate::audio_out::{AudioChunk, OutgoingAudio};
use crate::codec::{OpusAudioDecoder, OpusAudioEncoder};
use crate::config::{AudioInterval, MumbleConfig};
use crate::control::ControlMessage;
use crate::dispatch;
use crate::error::{Error, Result, TransportError};
use crate::event::{AudioData, DisconnectReason, Event};
use crate::eventmux::{EventMux, Handle as ListenerHandle};
use crate::state::Store;
use crate::transport::{self, ConnWriter, DEFAULT_MAX_PACKET_BYTES, DEFAULT_PING_INTERVAL};
use crate::version::Version;
use crate::voice_target::VoiceTarget;

type Stream = TlsStream<TcpStream>;

/// Lifecycle state. `Connected` is the brief internal window
/// between a completed TLS handshake and the server's `ServerSync` — it is
/// never externally observable as a stable value, but tracking it keeps
/// the state machine's transitions explicit.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum ClientState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Synced = 3,
}

impl ClientState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ClientState::Disconnected,
            1 => ClientState::Connecting,
            2 => ClientState::Connected,
            _ => ClientState::Synced,
        }
    }
}

/// Ping round-trip bookkeeping. `tcp_packets` is carried for API symmetry
/// with the UDP ping's counters but is never incremented here — nothing
/// downstream currently reads it.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingStats {
    pub tcp_packets: u64,
    pub last_round_trip: Option<std::time::Duration>,
}

proxy! {
    pub proxy Commands {
        pub async fn disconnect();
    }
}

struct Inner {
    store: RwLock<Store>,
    state: AtomicU8,
    listeners: EventMux<Event>,
    audio_listeners: EventMux<AudioData>,
    ping_stats: Mutex<PingStats>,
    voice_targets: Mutex<crate::voice_target::VoiceTargetRegistry>,
    audio_target: AtomicU8,
    audio_position: Mutex<Option<(f32, f32, f32)>>,
    audio_tx: Mutex<Option<mpsc::Sender<AudioChunk>>>,
}

/// A live connection. Cheap to clone — every clone shares the same reader
/// task, state store and listener lists.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
    writer: ConnWriter<WriteHalf<Stream>>,
    commands: Commands,
    audio_interval: AudioInterval,
    audio_data_bytes: usize,
}

impl Client {
    /// Runs the full handshake (TCP connect, TLS, `Version` + `Authenticate`,
    /// wait for `ServerSync`) and spawns the reader task.
    /// Returns once `Synced` is reached; a `Reject` anywhere in that window
    /// surfaces as `Err(Error::Rejected(..))` and no task is left running.
    pub async fn connect(config: MumbleConfig) -> Result<(Client, String)> {
        let (host, port) = config.host_port();
        let tcp = tokio::time::timeout(config.dialer_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::ReadTimeout)?
            .map_err(TransportError::Io)?;

        let tls_config = config.resolve_tls_config();
        let connector = TlsConnector::from(tls_config);
        let server_name = rustls::ServerName::try_from(host)
            .map_err(|e| Error::Config(format!("invalid server name {host}: {e}")))?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(TransportError::Io)?;

        if let Some(verify) = &config.tls_verify {
            let certs = stream
                .get_ref()
                .1
                .peer_certificates()
                .unwrap_or(&[])
                .to_vec();
            verify(&certs)?;
        }

        let (mut reader, writer) = transport::split(
            stream,
            DEFAULT_MAX_PACKET_BYTES,
            DEFAULT_PING_INTERVAL * 2,
        );

        send_control(&writer, ControlMessage::Version(Box::new(version_message()))).await?;
        send_control(
            &writer,
            ControlMessage::Authenticate(Box::new(authenticate_message(&config))),
        )
        .await?;

        let on_event = config.on_event.clone();
        let store = RwLock::new(Store::new());
        let welcome_message = loop {
            let (ptype, payload) = reader.read_packet().await?;
            if ptype == 1 {
                continue; // no speaker can exist before ServerSync
            }
            let msg = match ControlMessage::decode(ptype, &payload)? {
                Some(msg) => msg,
                None => continue,
            };

            let mut guard = store.write().unwrap();
            if let Some(welcome) = apply_handshake_message(&mut guard, msg, on_event.as_deref())? {
                break welcome;
            }
        };

        let inner = Arc::new(Inner {
            store,
            state: AtomicU8::new(ClientState::Synced as u8),
            listeners: EventMux::new(),
            audio_listeners: EventMux::new(),
            ping_stats: Mutex::new(PingStats::default()),
            voice_targets: Mutex::new(crate::voice_target::VoiceTargetRegistry::default()),
            audio_target: AtomicU8::new(0),
            audio_position: Mutex::new(None),
            audio_tx: Mutex::new(None),
        });

        let (commands, command_rx) = Commands::channel();

        tokio::spawn(run(inner.clone(), reader, writer.clone(), command_rx));

        let client = Client {
            inner,
            writer,
            commands,
            audio_interval: config.audio_interval,
            audio_data_bytes: config.audio_data_bytes,
        };
        Ok((client, welcome_message))
    }

    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn ping_stats(&self) -> PingStats {
        *self.inner.ping_stats.lock().unwrap()
    }

    /// Reads the replicated state store without racing the reader task's
    /// next mutation. Must not
    /// be held across an `.await` — `f` is a plain synchronous closure so
    /// that's enforced by the type signature, not convention.
    pub fn with_state<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Store) -> R,
    {
        let guard = self.inner.store.read().unwrap();
        f(&guard)
    }

    pub fn on_event<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.listeners.attach(listener)
    }

    pub fn remove_event_listener(&self, handle: ListenerHandle) {
        self.inner.listeners.detach(handle);
    }

    pub fn on_audio<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&AudioData) + Send + Sync + 'static,
    {
        self.inner.audio_listeners.attach(listener)
    }

    pub fn remove_audio_listener(&self, handle: ListenerHandle) {
        self.inner.audio_listeners.detach(handle);
    }

    pub async fn send_text_message(
        &self,
        channels: Vec<u32>,
        users: Vec<u32>,
        trees: Vec<u32>,
        message: String,
    ) -> Result<()> {
        if let Some(max) = self.with_state(|s| s.max_message_length) {
            if message.len() as u32 > max {
                return Err(Error::Protocol(format!(
                    "message of {} bytes exceeds the server's limit of {max}",
                    message.len()
                )));
            }
        }

        let mut msg = msgs::TextMessage::new();
        msg.set_channel_id(RepeatedField::from_vec(channels));
        msg.set_session(RepeatedField::from_vec(users));
        msg.set_tree_id(RepeatedField::from_vec(trees));
        msg.set_message(message);
        self.send(ControlMessage::TextMessage(Box::new(msg))).await
    }

    pub async fn set_comment(&self, comment: String) -> Result<()> {
        let mut msg = msgs::UserState::new();
        msg.set_comment(comment);
        self.send(ControlMessage::UserState(Box::new(msg))).await
    }

    pub async fn set_self_mute_deaf(&self, mute: bool, deaf: bool) -> Result<()> {
        let mut msg = msgs::UserState::new();
        msg.set_self_mute(mute);
        msg.set_self_deaf(deaf);
        self.send(ControlMessage::UserState(Box::new(msg))).await
    }

    pub async fn move_to_channel(&self, channel_id: u32) -> Result<()> {
        let mut msg = msgs::UserState::new();
        msg.set_channel_id(channel_id);
        self.send(ControlMessage::UserState(Box::new(msg))).await
    }

    /// Registers a voice target with the server; it must be registered
    /// before it can be activated. The target already carries
    /// the id the caller chose — the wire protocol has no ack opcode, so
    /// registration is optimistic, matching the fact that nothing short of
    /// a later `PermissionDenied` tells the client otherwise.
    pub async fn register_voice_target(&self, target: &VoiceTarget) -> Result<()> {
        self.send(ControlMessage::VoiceTarget(Box::new(target.to_message())))
            .await?;
        self.inner.voice_targets.lock().unwrap().mark_registered(target.id());
        Ok(())
    }

    pub fn select_voice_target(&self, id: u8) -> Result<()> {
        self.inner.voice_targets.lock().unwrap().activate(id)?;
        self.inner.audio_target.store(id, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_audio_position(&self, position: Option<(f32, f32, f32)>) {
        *self.inner.audio_position.lock().unwrap() = position;
    }

    /// Starts (or returns the already-running) outgoing audio pipeline.
    /// Calling this more than once is not an error — it just
    /// hands back the same sender, since "a single producer owns outgoing
    /// audio at any time" is a caller contract, not something this method
    /// can enforce from inside a channel.
    pub fn start_audio(&self) -> Result<mpsc::Sender<AudioChunk>> {
        let mut slot = self.inner.audio_tx.lock().unwrap();
        if let Some(tx) = &*slot {
            return Ok(tx.clone());
        }

        let encoder = Box::new(OpusAudioEncoder::new()?);
        let pipeline = OutgoingAudio::new(
            self.writer.clone(),
            encoder,
            self.audio_interval,
            self.audio_data_bytes,
        );

        let (tx, rx) = mpsc::channel(8);
        let target = Arc::new(AtomicU8::new(self.inner.audio_target.load(Ordering::Relaxed)));
        let position = Arc::new(Mutex::new(*self.inner.audio_position.lock().unwrap()));

        tokio::spawn(async move {
            if let Err(e) = pipeline.run(rx, target, position).await {
                log::warn!("outgoing audio pipeline stopped: {e}");
            }
        });

        *slot = Some(tx.clone());
        Ok(tx)
    }

    pub async fn disconnect(self) -> Result<()> {
        self.commands
            .disconnect()
            .await
            .map_err(|_| Error::State("client is already disconnected".into()))
    }

    async fn send(&self, msg: ControlMessage) -> Result<()> {
        send_control(&self.writer, msg).await
    }
}

async fn send_control(writer: &ConnWriter<WriteHalf<Stream>>, msg: ControlMessage) -> Result<()> {
    let opcode = msg.opcode();
    let payload = msg.encode()?;
    writer.write_packet(opcode, &payload).await
}

fn version_message() -> msgs::Version {
    let version = Version::local();
    let mut msg = msgs::Version::new();
    msg.set_version(version.packed);
    msg.set_release(version.release);
    msg.set_os(version.os);
    msg.set_os_version(version.os_version);
    msg
}

fn authenticate_message(config: &MumbleConfig) -> msgs::Authenticate {
    let mut msg = msgs::Authenticate::new();
    msg.set_username(config.username.clone());
    if !config.password.is_empty() {
        msg.set_password(config.password.clone());
    }
    msg.set_tokens(RepeatedField::from_vec(config.tokens.clone()));
    msg.set_opus(true);
    msg
}

/// Applies one handshake-window control message to `store`. Returns the
/// welcome message once `ServerSync` lands; a `Reject` is turned into an
/// error instead of an event. `on_event`, if given, is handed every event
/// this produces before the match below acts on it — the only one it will
/// ever see in practice is the `Disconnect { reason: Rejected(..) }` that a
/// `Reject` here also turns into `Err`, since that is the one handshake-window
/// event with no other way to reach a caller (there is no `Client` yet to
/// attach `on_event` listeners to).
fn apply_handshake_message(
    store: &mut Store,
    msg: ControlMessage,
    on_event: Option<&(dyn Fn(&Event) + Send + Sync)>,
) -> Result<Option<String>> {
    let events = dispatch::dispatch(store, msg)?;
    for event in &events {
        if let Some(on_event) = on_event {
            on_event(event);
        }
    }
    for event in events {
        match event {
            Event::Connect { welcome_message, .. } => return Ok(Some(welcome_message)),
            Event::Disconnect { reason } => return Err(reason_to_error(reason)),
            _ => {}
        }
    }
    Ok(None)
}

fn reason_to_error(reason: DisconnectReason) -> Error {
    match reason {
        DisconnectReason::Rejected(r) => Error::Rejected(r),
        DisconnectReason::Error(e) => {
            Arc::try_unwrap(e).unwrap_or_else(|e| Error::Protocol(e.to_string()))
        }
        DisconnectReason::User => Error::State("disconnected during handshake".into()),
    }
}

/// The reader task: owns the transport's read side, the ping
/// ticker, and demultiplexes incoming opcode-1 audio to a lazily-spawned
/// jitter buffer per speaker. Runs until the transport errors, the command
/// channel closes, or `disconnect()` is called.
async fn run(
    inner: Arc<Inner>,
    mut reader: transport::ConnReader<tokio::io::ReadHalf<Stream>>,
    writer: ConnWriter<WriteHalf<Stream>>,
    mut commands: CommandsReceiver,
) {
    let mut ping_ticker = tokio::time::interval(DEFAULT_PING_INTERVAL);
    ping_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut speakers: HashMap<u32, mpsc::Sender<AudioFrame>> = HashMap::new();

    let reason = loop {
        tokio::select! {
            _ = ping_ticker.tick() => {
                let utime = SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .unwrap()
                    .as_secs();
                let mut msg = msgs::Ping::new();
                msg.set_timestamp(utime);
                if let Err(e) = send_control(&writer, ControlMessage::Ping(Box::new(msg))).await {
                    break DisconnectReason::Error(Arc::new(e));
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(CommandsMessage::Disconnect { callback }) => {
                        let _ = callback.send(());
                        break DisconnectReason::User;
                    }
                    None => break DisconnectReason::User,
                }
            }
            packet = reader.read_packet() => {
                match packet {
                    Err(e) => break DisconnectReason::Error(Arc::new(e)),
                    Ok((1, payload)) => handle_audio_packet(&inner, &mut speakers, &payload),
                    Ok((ptype, payload)) => {
                        match handle_control_packet(&inner, ptype, &payload) {
                            Ok(Some(reason)) => break reason,
                            Ok(None) => {}
                            Err(e) => log::warn!("dropping malformed control packet (opcode {ptype}): {e}"),
                        }
                    }
                }
            }
        }
    };

    inner.state.store(ClientState::Disconnected as u8, Ordering::SeqCst);
    inner.listeners.dispatch(&Event::Disconnect { reason });
}

fn handle_audio_packet(
    inner: &Arc<Inner>,
    speakers: &mut HashMap<u32, mpsc::Sender<AudioFrame>>,
    payload: &[u8],
) {
    let (session, remainder) = match audio_in::split_session(payload) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("malformed incoming audio frame: {e}");
            return;
        }
    };
    let frame = match AudioFrame::decode(&remainder) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("malformed incoming audio frame from session {session}: {e}");
            return;
        }
    };

    let sender = speakers
        .entry(session)
        .or_insert_with(|| spawn_jitter(session, inner.clone()));
    let _ = sender.try_send(frame);
}

fn spawn_jitter(session: u32, inner: Arc<Inner>) -> mpsc::Sender<AudioFrame> {
    let (tx, rx) = mpsc::channel(64);
    match OpusAudioDecoder::new() {
        Ok(decoder) => {
            tokio::spawn(run_jitter(session, decoder, rx, inner));
        }
        Err(e) => log::error!("failed to start jitter buffer for session {session}: {e}"),
    }
    tx
}

async fn run_jitter(
    session: u32,
    decoder: OpusAudioDecoder,
    rx: mpsc::Receiver<AudioFrame>,
    inner: Arc<Inner>,
) {
    let buffer = JitterBuffer::new(decoder);
    audio_in::run(
        buffer,
        rx,
        move |outcome| {
            let event = match outcome {
                DrainOutcome::Decoded { pcm, position } => AudioData {
                    session,
                    pcm,
                    sample_rate: 48_000,
                    position,
                },
                DrainOutcome::Concealed { pcm } => AudioData {
                    session,
                    pcm,
                    sample_rate: 48_000,
                    position: None,
                },
            };
            inner.audio_listeners.dispatch(&event);
        },
        audio_in::DEFAULT_STARTUP_DELAY,
        audio_in::DEFAULT_IDLE_TIMEOUT,
    )
    .await;
}

/// Applies one post-handshake control packet. A `Disconnect` event (only
/// ever produced by a post-handshake `Reject`) is reported back to the
/// caller instead of being dispatched here, so `run`'s reader loop can tear
/// the session down and deliver that `Disconnect` exactly once, from the
/// same place every other termination reason goes through.
fn handle_control_packet(inner: &Arc<Inner>, ptype: u16, payload: &[u8]) -> Result<Option<DisconnectReason>> {
    let msg = match ControlMessage::decode(ptype, payload)? {
        Some(msg) => msg,
        None => return Ok(None),
    };

    let events = {
        let mut guard = inner.store.write().unwrap();
        dispatch::dispatch(&mut guard, msg)?
    };

    for event in events {
        if let Event::Disconnect { reason } = event {
            return Ok(Some(reason));
        }
        inner.listeners.dispatch(&event);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RejectKind;

    #[test]
    fn server_sync_completes_the_handshake_with_the_welcome_message() {
        let mut store = Store::new();

        let mut version = msgs::Version::new();
        version.set_version(crate::version::pack(1, 5, 0));
        let welcome =
            apply_handshake_message(&mut store, ControlMessage::Version(Box::new(version)), None).unwrap();
        assert!(welcome.is_none());

        let mut sync = msgs::ServerSync::new();
        sync.set_session(42);
        sync.set_max_bandwidth(72_000);
        sync.set_welcome_text("hello there".into());
        let welcome =
            apply_handshake_message(&mut store, ControlMessage::ServerSync(Box::new(sync)), None).unwrap();

        assert_eq!(welcome.as_deref(), Some("hello there"));
        assert_eq!(store.self_session, Some(42));
        assert_eq!(store.max_bandwidth, Some(72_000));
    }

    #[test]
    fn reject_during_handshake_surfaces_as_an_error() {
        let mut store = Store::new();

        let mut reject = msgs::Reject::new();
        reject.set_field_type(msgs::Reject_RejectType::WrongUserPW);
        reject.set_reason("bad password".into());

        let err =
            apply_handshake_message(&mut store, ControlMessage::Reject(Box::new(reject)), None).unwrap_err();
        match err {
            Error::Rejected(r) => {
                assert_eq!(r.kind, RejectKind::WrongUserPassword);
                assert_eq!(r.reason, "bad password");
            }
            other => panic!("wrong error variant: {other:?}"),
        }
    }

    #[test]
    fn reject_during_handshake_is_also_reported_through_on_event() {
        let mut store = Store::new();
        let seen = Arc::new(Mutex::new(None));

        let mut reject = msgs::Reject::new();
        reject.set_field_type(msgs::Reject_RejectType::ServerIsFull);
        reject.set_reason("server is full".into());

        let seen_clone = seen.clone();
        let callback: &(dyn Fn(&Event) + Send + Sync) = &move |event: &Event| {
            *seen_clone.lock().unwrap() = Some(format!("{event:?}"));
        };
        let err = apply_handshake_message(
            &mut store,
            ControlMessage::Reject(Box::new(reject)),
            Some(callback),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Rejected(_)));
        let seen = seen.lock().unwrap();
        assert!(seen.as_deref().unwrap().contains("Rejected"));
    }

    #[test]
    fn unrelated_messages_during_handshake_neither_complete_nor_fail_it() {
        let mut store = Store::new();

        let mut user_state = msgs::UserState::new();
        user_state.set_session(1);
        let welcome =
            apply_handshake_message(&mut store, ControlMessage::UserState(Box::new(user_state)), None).unwrap();

        assert!(welcome.is_none());
        assert!(store.user(1).is_some());
    }
}
