//! Gateway (WebSocket) transport.
//!
//! Owns the connection lifecycle: HELLO, IDENTIFY or RESUME, the heartbeat
//! task, sequence tracking and reconnects. Consumers only see a channel of
//! [`GatewayEvent`]s.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::events::{hello_interval, GatewayEvent};
use crate::types::{GatewayPayload, Intents, OutboundPayload, Opcode};

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Discord allows at most 120 gateway sends per 60 seconds.
const SEND_BUDGET_MAX: usize = 120;
const SEND_BUDGET_WINDOW: Duration = Duration::from_secs(60);

const MAX_RECONNECT_ATTEMPTS: u32 = 8;
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsConnection, WsMessage>;
type WsStream = SplitStream<WsConnection>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid gateway payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timed out waiting for HELLO")]
    HelloTimeout,
    #[error("connection closed before HELLO")]
    Closed,
    #[error("expected HELLO, got op {0}")]
    UnexpectedOpcode(u8),
    #[error("HELLO carried a zero heartbeat interval")]
    ZeroHeartbeat,
}

/// Sliding-window limiter for outbound gateway sends.
#[derive(Debug)]
struct SendRateLimiter {
    sent: VecDeque<Instant>,
    budget: usize,
    window: Duration,
}

impl SendRateLimiter {
    fn new(budget: usize, window: Duration) -> Self {
        Self {
            sent: VecDeque::with_capacity(budget),
            budget,
            window,
        }
    }

    /// How long to wait before the next send at `now`, if at all.
    fn delay(&mut self, now: Instant) -> Option<Duration> {
        while let Some(&oldest) = self.sent.front() {
            if now.duration_since(oldest) >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
        if self.sent.len() < self.budget {
            return None;
        }
        self.sent
            .front()
            .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
    }

    fn record(&mut self, now: Instant) {
        self.sent.push_back(now);
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: Intents,
}

#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    sequence: Option<u64>,
    /// Set when a heartbeat is sent, cleared by its ACK.
    awaiting_ack: bool,
}

impl SessionState {
    fn forget_session(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_gateway_url = None;
    }
}

pub fn identify_payload(token: &str, intents: Intents) -> OutboundPayload {
    OutboundPayload {
        op: Opcode::Identify,
        d: json!({
            "token": token,
            "intents": intents.bits(),
            "properties": {
                "os": std::env::consts::OS,
                "browser": env!("CARGO_PKG_NAME"),
                "device": env!("CARGO_PKG_NAME"),
            },
        }),
    }
}

pub fn resume_payload(token: &str, session_id: &str, seq: u64) -> OutboundPayload {
    OutboundPayload {
        op: Opcode::Resume,
        d: json!({
            "token": token,
            "session_id": session_id,
            "seq": seq,
        }),
    }
}

pub fn heartbeat_payload(seq: Option<u64>) -> OutboundPayload {
    OutboundPayload {
        op: Opcode::Heartbeat,
        d: json!(seq),
    }
}

/// What the driver does after a connection ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Resume,
    Reidentify,
    /// Authentication or configuration problem; reconnecting won't help.
    Fatal,
    ConsumerGone,
}

impl DisconnectReason {
    pub fn from_close_code(code: u16) -> Self {
        match code {
            4004 | 4010 | 4011 | 4012 | 4013 | 4014 => Self::Fatal,
            4007 | 4009 => Self::Reidentify,
            _ => Self::Resume,
        }
    }
}

/// Exponential backoff capped at 60s. `jitter` is in `[0, 1)`.
pub fn backoff_delay(attempt: u32, jitter: f64) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let scaled = (jitter.clamp(0.0, 1.0) * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(scaled.min(60_000.0) as u64)
}

pub struct GatewayHandle {
    pub events: mpsc::Receiver<GatewayEvent>,
    pub driver: tokio::task::JoinHandle<()>,
}

/// Spawn the gateway driver and return its event stream.
pub fn connect(config: GatewayConfig) -> GatewayHandle {
    let (event_tx, events) = mpsc::channel::<GatewayEvent>(256);
    let driver = tokio::spawn(gateway_driver(config, event_tx));
    GatewayHandle { events, driver }
}

#[derive(Clone)]
struct Connection {
    write: Arc<Mutex<WsSink>>,
    limiter: Arc<Mutex<SendRateLimiter>>,
}

impl Connection {
    async fn send(&self, payload: &OutboundPayload) -> Result<(), GatewayError> {
        loop {
            let delay = self.limiter.lock().await.delay(Instant::now());
            match delay {
                Some(d) if !d.is_zero() => {
                    debug!(delay_ms = d.as_millis() as u64, "gateway send rate-limited");
                    tokio::time::sleep(d).await;
                }
                _ => break,
            }
        }
        self.limiter.lock().await.record(Instant::now());

        let text = serde_json::to_string(payload)?;
        self.write.lock().await.send(WsMessage::Text(text)).await?;
        Ok(())
    }
}

async fn gateway_driver(config: GatewayConfig, event_tx: mpsc::Sender<GatewayEvent>) {
    let session = Arc::new(Mutex::new(SessionState::default()));
    let mut attempts: u32 = 0;

    loop {
        let url = {
            let s = session.lock().await;
            s.resume_gateway_url
                .as_deref()
                .map(gateway_url)
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string())
        };

        let reason = match run_connection(&url, &config, &session, &event_tx).await {
            Ok(reason) => {
                attempts = 0;
                reason
            }
            Err(e) => {
                error!(error = %e, "gateway connection failed");
                DisconnectReason::Resume
            }
        };

        match reason {
            DisconnectReason::Resume => info!("will attempt RESUME"),
            DisconnectReason::Reidentify => {
                info!("session invalidated, will re-IDENTIFY");
                session.lock().await.forget_session();
            }
            DisconnectReason::Fatal => {
                error!("fatal gateway error, shutting down");
                return;
            }
            DisconnectReason::ConsumerGone => {
                info!("event channel closed, stopping gateway driver");
                return;
            }
        }

        attempts += 1;
        if attempts > MAX_RECONNECT_ATTEMPTS {
            error!("exceeded max reconnect attempts, giving up");
            return;
        }
        let backoff = backoff_delay(attempts, rand::random::<f64>());
        warn!(
            delay_ms = backoff.as_millis() as u64,
            attempt = attempts,
            "reconnecting after backoff"
        );
        tokio::time::sleep(backoff).await;
    }
}

/// Append the version query to a resume URL if it lacks one.
fn gateway_url(base: &str) -> String {
    if base.contains("v=10") {
        base.to_string()
    } else if base.contains('?') {
        format!("{base}&v=10&encoding=json")
    } else {
        format!("{base}/?v=10&encoding=json")
    }
}

/// One connection from handshake to disconnect.
async fn run_connection(
    url: &str,
    config: &GatewayConfig,
    session: &Arc<Mutex<SessionState>>,
    event_tx: &mpsc::Sender<GatewayEvent>,
) -> Result<DisconnectReason, GatewayError> {
    info!(url = %url, "connecting to Discord gateway");
    let (ws, _) = tokio_tungstenite::connect_async(url).await?;
    let (write, mut read) = ws.split();
    let conn = Connection {
        write: Arc::new(Mutex::new(write)),
        limiter: Arc::new(Mutex::new(SendRateLimiter::new(
            SEND_BUDGET_MAX,
            SEND_BUDGET_WINDOW,
        ))),
    };

    let interval = read_hello(&mut read).await?;
    info!(interval_ms = interval, "received HELLO");

    let handshake = {
        let mut s = session.lock().await;
        s.awaiting_ack = false;
        match (&s.session_id, s.sequence) {
            (Some(id), Some(seq)) => {
                info!("sending RESUME");
                resume_payload(&config.token, id, seq)
            }
            _ => {
                info!("sending IDENTIFY");
                identify_payload(&config.token, config.intents)
            }
        }
    };
    conn.send(&handshake).await?;

    let (zombie_tx, mut zombie_rx) = mpsc::channel::<()>(1);
    let heartbeat = tokio::spawn(heartbeat_loop(
        interval,
        conn.clone(),
        Arc::clone(session),
        zombie_tx,
    ));

    let reason = tokio::select! {
        reason = read_loop(&mut read, &conn, session, event_tx) => reason,
        _ = zombie_rx.recv() => {
            warn!("no heartbeat ACK received, treating connection as dead");
            DisconnectReason::Resume
        }
    };

    heartbeat.abort();
    let _ = conn.write.lock().await.send(WsMessage::Close(None)).await;
    Ok(reason)
}

async fn heartbeat_loop(
    interval_ms: u64,
    conn: Connection,
    session: Arc<Mutex<SessionState>>,
    zombie_tx: mpsc::Sender<()>,
) {
    // First beat after `interval * jitter`.
    let first = Duration::from_millis((interval_ms as f64 * rand::random::<f64>()) as u64);
    tokio::time::sleep(first).await;

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        ticker.tick().await;
        let seq = {
            let mut s = session.lock().await;
            if s.awaiting_ack {
                let _ = zombie_tx.send(()).await;
                return;
            }
            s.awaiting_ack = true;
            s.sequence
        };
        if let Err(e) = conn.send(&heartbeat_payload(seq)).await {
            warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
            return;
        }
        debug!(?seq, "sent heartbeat");
    }
}

async fn read_loop(
    read: &mut WsStream,
    conn: &Connection,
    session: &Arc<Mutex<SessionState>>,
    event_tx: &mpsc::Sender<GatewayEvent>,
) -> DisconnectReason {
    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(frame)) => {
                let Some(frame) = frame else {
                    warn!("WebSocket closed without a frame");
                    return DisconnectReason::Resume;
                };
                let code = u16::from(frame.code);
                let reason = DisconnectReason::from_close_code(code);
                if reason == DisconnectReason::Fatal {
                    error!(code, reason = %frame.reason, "gateway closed the connection");
                } else {
                    warn!(code, reason = %frame.reason, "gateway closed the connection");
                }
                return reason;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "WebSocket read error");
                return DisconnectReason::Resume;
            }
        };

        let payload: GatewayPayload = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to parse gateway payload");
                continue;
            }
        };

        if let Some(seq) = payload.s {
            session.lock().await.sequence = Some(seq);
        }

        let event = GatewayEvent::from_payload(payload);
        match &event {
            GatewayEvent::Ready(ready) => {
                let mut s = session.lock().await;
                s.session_id = Some(ready.session_id.clone());
                s.resume_gateway_url = Some(ready.resume_gateway_url.clone());
                info!(session_id = %ready.session_id, user = %ready.user.tag(), "gateway READY");
            }
            GatewayEvent::Resumed => info!("session resumed"),
            GatewayEvent::HeartbeatRequest => {
                let seq = session.lock().await.sequence;
                if let Err(e) = conn.send(&heartbeat_payload(seq)).await {
                    warn!(error = %e, "failed to send requested heartbeat");
                }
                continue;
            }
            GatewayEvent::HeartbeatAck => {
                session.lock().await.awaiting_ack = false;
                debug!("heartbeat acknowledged");
                continue;
            }
            GatewayEvent::Reconnect => {
                info!("gateway requested reconnect");
                return DisconnectReason::Resume;
            }
            GatewayEvent::InvalidSession(resumable) => {
                warn!(resumable, "session invalidated");
                // Discord asks for a 1-5s pause before the next handshake.
                let pause = 1000 + (rand::random::<f64>() * 4000.0) as u64;
                tokio::time::sleep(Duration::from_millis(pause)).await;
                return if *resumable {
                    DisconnectReason::Resume
                } else {
                    DisconnectReason::Reidentify
                };
            }
            _ => {}
        }

        if event_tx.send(event).await.is_err() {
            return DisconnectReason::ConsumerGone;
        }
    }

    info!("WebSocket stream ended");
    DisconnectReason::Resume
}

async fn read_hello(read: &mut WsStream) -> Result<u64, GatewayError> {
    let msg = tokio::time::timeout(HELLO_TIMEOUT, read.next())
        .await
        .map_err(|_| GatewayError::HelloTimeout)?
        .ok_or(GatewayError::Closed)??;

    let WsMessage::Text(text) = msg else {
        return Err(GatewayError::Closed);
    };
    heartbeat_interval(&serde_json::from_str(&text)?)
}

/// The heartbeat period from a HELLO payload; zero is rejected.
fn heartbeat_interval(payload: &GatewayPayload) -> Result<u64, GatewayError> {
    match hello_interval(payload) {
        Some(0) => Err(GatewayError::ZeroHeartbeat),
        Some(ms) => Ok(ms),
        None => Err(GatewayError::UnexpectedOpcode(payload.op)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_allows_budget_then_waits() {
        let window = Duration::from_secs(60);
        let mut limiter = SendRateLimiter::new(3, window);
        let start = Instant::now();

        for i in 0..3 {
            let now = start + Duration::from_secs(i);
            assert_eq!(limiter.delay(now), None);
            limiter.record(now);
        }

        let now = start + Duration::from_secs(10);
        assert_eq!(limiter.delay(now), Some(Duration::from_secs(50)));

        // Oldest send has left the window.
        let later = start + Duration::from_secs(60);
        assert_eq!(limiter.delay(later), None);
        assert_eq!(limiter.sent.len(), 2);
    }

    #[test]
    fn hello_interval_must_be_positive() {
        let hello = |d: serde_json::Value| -> GatewayPayload {
            serde_json::from_value(json!({ "op": 10, "d": d })).unwrap()
        };
        assert_eq!(
            heartbeat_interval(&hello(json!({ "heartbeat_interval": 41250 }))).unwrap(),
            41250
        );
        assert!(matches!(
            heartbeat_interval(&hello(json!({ "heartbeat_interval": 0 }))),
            Err(GatewayError::ZeroHeartbeat)
        ));

        let ack: GatewayPayload = serde_json::from_value(json!({ "op": 11 })).unwrap();
        assert!(matches!(
            heartbeat_interval(&ack),
            Err(GatewayError::UnexpectedOpcode(11))
        ));
    }

    #[test]
    fn close_codes() {
        assert_eq!(DisconnectReason::from_close_code(4004), DisconnectReason::Fatal);
        assert_eq!(DisconnectReason::from_close_code(4014), DisconnectReason::Fatal);
        assert_eq!(DisconnectReason::from_close_code(4007), DisconnectReason::Reidentify);
        assert_eq!(DisconnectReason::from_close_code(4009), DisconnectReason::Reidentify);
        assert_eq!(DisconnectReason::from_close_code(1001), DisconnectReason::Resume);
        assert_eq!(DisconnectReason::from_close_code(4000), DisconnectReason::Resume);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1, 0.5), Duration::from_millis(2000));
        assert_eq!(backoff_delay(2, 0.5), Duration::from_millis(4000));
        assert_eq!(backoff_delay(3, 0.0), Duration::from_millis(6000));
        assert_eq!(backoff_delay(20, 0.99), Duration::from_secs(60));
    }

    #[test]
    fn identify_carries_token_and_intents() {
        let intents = Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT;
        let value = serde_json::to_value(identify_payload("tok", intents)).unwrap();
        assert_eq!(value["op"], 2);
        assert_eq!(value["d"]["token"], "tok");
        assert_eq!(value["d"]["intents"], (1 << 9) | (1 << 15));
        assert!(value["d"]["properties"]["os"].is_string());
    }

    #[test]
    fn resume_and_heartbeat_payloads() {
        let resume = serde_json::to_value(resume_payload("tok", "sess", 42)).unwrap();
        assert_eq!(resume, json!({ "op": 6, "d": { "token": "tok", "session_id": "sess", "seq": 42 } }));

        let beat = serde_json::to_value(heartbeat_payload(Some(7))).unwrap();
        assert_eq!(beat, json!({ "op": 1, "d": 7 }));
        let first = serde_json::to_value(heartbeat_payload(None)).unwrap();
        assert_eq!(first, json!({ "op": 1, "d": null }));
    }

    #[test]
    fn resume_url_gets_version_query() {
        assert_eq!(
            gateway_url("wss://resume.discord.gg"),
            "wss://resume.discord.gg/?v=10&encoding=json"
        );
        assert_eq!(
            gateway_url("wss://resume.discord.gg/?v=10&encoding=json"),
            "wss://resume.discord.gg/?v=10&encoding=json"
        );
    }

    #[test]
    fn session_forgets_on_reidentify() {
        let mut s = SessionState {
            session_id: Some("a".into()),
            resume_gateway_url: Some("wss://x".into()),
            sequence: Some(4),
            awaiting_ack: false,
        };
        s.forget_session();
        assert!(s.session_id.is_none());
        assert!(s.sequence.is_none());
        assert!(s.resume_gateway_url.is_none());
    }
}
