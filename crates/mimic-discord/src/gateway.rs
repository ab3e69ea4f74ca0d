//! Gateway WebSocket session: hello, identify, heartbeat, dispatch events,
//! reconnect with backoff.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use mimic_core::message::Message;
use mimic_core::status::RuntimeStatus;

use crate::error::{close_error, ChannelError};
use crate::types::{
    heartbeat_payload, identify_payload, opcode, GatewayPayload, MessageCreate, ReadyEvent,
};

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const INITIAL_RECONNECT_MS: u64 = 1_000;
const MAX_RECONNECT_MS: u64 = 300_000;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub url: String,
    pub token: SecretString,
    pub max_reconnect_attempts: u32,
}

impl GatewayConfig {
    pub fn new(token: SecretString) -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            token,
            max_reconnect_attempts: 8,
        }
    }
}

enum SessionEnd {
    Shutdown,
    Reconnect,
}

/// Feeds guild messages into `inbound` in arrival order and keeps
/// `status` in step with the connection.
pub struct Gateway {
    config: GatewayConfig,
    status: Arc<RuntimeStatus>,
    inbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        status: Arc<RuntimeStatus>,
        inbound: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            status,
            inbound,
            cancel,
        }
    }

    /// Run sessions until shutdown, a fatal close, or the reconnect budget
    /// is spent. A session that reaches READY resets the budget.
    pub async fn run(&self) -> Result<(), ChannelError> {
        let mut attempt: u32 = 0;
        loop {
            let result = self.session(&mut attempt).await;
            self.status.set_connected(false);
            match result {
                Ok(SessionEnd::Shutdown) => {
                    info!("gateway stopped");
                    return Ok(());
                }
                Ok(SessionEnd::Reconnect) => info!("gateway session ended, reconnecting"),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "gateway cannot continue without operator action");
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "gateway session failed"),
            }
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            attempt += 1;
            if attempt > self.config.max_reconnect_attempts {
                error!(
                    attempts = self.config.max_reconnect_attempts,
                    "reconnect budget exhausted"
                );
                return Err(ChannelError::ReconnectsExhausted(
                    self.config.max_reconnect_attempts,
                ));
            }
            let delay = reconnect_delay(attempt - 1);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting to gateway");
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    #[instrument(skip_all, fields(attempt = *attempt))]
    async fn session(&self, attempt: &mut u32) -> Result<SessionEnd, ChannelError> {
        let (ws, _) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        let (write, mut read) = ws.split();

        let hello = next_payload(&mut read).await?;
        if hello.op != opcode::HELLO {
            return Err(ChannelError::Protocol(format!(
                "expected HELLO, got op {}",
                hello.op
            )));
        }
        let interval = Duration::from_millis(hello.heartbeat_interval_ms());
        debug!(heartbeat_ms = interval.as_millis() as u64, "gateway hello");

        let write = Arc::new(Mutex::new(write));
        send_json(&write, &identify_payload(self.config.token.expose_secret())).await?;

        let (seq_tx, seq_rx) = watch::channel(None);
        let heartbeat = tokio::spawn(heartbeat_loop(Arc::clone(&write), interval, seq_rx));
        let result = self.event_loop(&mut read, &write, &seq_tx, attempt).await;
        heartbeat.abort();
        result
    }

    async fn event_loop(
        &self,
        read: &mut WsSource,
        write: &Arc<Mutex<WsSink>>,
        sequence: &watch::Sender<Option<u64>>,
        attempt: &mut u32,
    ) -> Result<SessionEnd, ChannelError> {
        loop {
            let frame = tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.lock().await.send(WsMessage::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
                frame = read.next() => frame,
            };
            let text = match frame {
                None => return Ok(SessionEnd::Reconnect),
                Some(Err(e)) => return Err(ChannelError::Connect(e.to_string())),
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1000, String::new()));
                    if code == 1000 {
                        return Ok(SessionEnd::Reconnect);
                    }
                    return Err(close_error(code, reason));
                }
                Some(Ok(_)) => continue,
            };

            let payload: GatewayPayload = match serde_json::from_str(&text) {
                Ok(p) => p,
                Err(e) => {
                    debug!(error = %e, "skipping undecodable gateway frame");
                    continue;
                }
            };
            if let Some(s) = payload.s {
                let _ = sequence.send(Some(s));
            }

            match payload.op {
                opcode::DISPATCH => {
                    if let Some(end) = self.dispatch(payload, attempt).await {
                        return Ok(end);
                    }
                }
                opcode::HEARTBEAT => {
                    let seq = *sequence.borrow();
                    send_json(write, &heartbeat_payload(seq)).await?;
                }
                opcode::HEARTBEAT_ACK => {}
                opcode::RECONNECT => return Ok(SessionEnd::Reconnect),
                opcode::INVALID_SESSION => return Err(ChannelError::InvalidSession),
                other => debug!(op = other, "ignoring gateway opcode"),
            }
        }
    }

    async fn dispatch(&self, payload: GatewayPayload, attempt: &mut u32) -> Option<SessionEnd> {
        let data = payload.d?;
        match payload.t.as_deref() {
            Some("READY") => match serde_json::from_value::<ReadyEvent>(data) {
                Ok(ready) => {
                    let account = ready.account();
                    info!(bot_id = %account.id, bot_name = %account.name, "gateway ready");
                    self.status.bind_account(account);
                    self.status.set_connected(true);
                    *attempt = 0;
                }
                Err(e) => warn!(error = %e, "unreadable READY payload"),
            },
            Some("MESSAGE_CREATE") => match serde_json::from_value::<MessageCreate>(data) {
                Ok(raw) => {
                    let Some(message) = raw.into_message() else {
                        return None;
                    };
                    if self.inbound.send(message).await.is_err() {
                        // Consumer is gone; nothing left to feed.
                        return Some(SessionEnd::Shutdown);
                    }
                }
                Err(e) => debug!(error = %e, "unreadable MESSAGE_CREATE payload"),
            },
            _ => {}
        }
        None
    }
}

async fn next_payload(read: &mut WsSource) -> Result<GatewayPayload, ChannelError> {
    loop {
        match read.next().await {
            None => return Err(ChannelError::Protocol("closed before HELLO".into())),
            Some(Err(e)) => return Err(ChannelError::Connect(e.to_string())),
            Some(Ok(WsMessage::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(WsMessage::Close(frame))) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                    .unwrap_or((1000, String::new()));
                return Err(close_error(code, reason));
            }
            Some(Ok(_)) => continue,
        }
    }
}

async fn send_json(write: &Mutex<WsSink>, value: &serde_json::Value) -> Result<(), ChannelError> {
    write
        .lock()
        .await
        .send(WsMessage::Text(value.to_string().into()))
        .await
        .map_err(|e| ChannelError::Connect(e.to_string()))
}

async fn heartbeat_loop(
    write: Arc<Mutex<WsSink>>,
    every: Duration,
    sequence: watch::Receiver<Option<u64>>,
) {
    let mut ticker = tokio::time::interval(every);
    // First tick is immediate.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let seq = *sequence.borrow();
        if let Err(e) = send_json(&write, &heartbeat_payload(seq)).await {
            warn!(error = %e, "heartbeat send failed");
            break;
        }
    }
}

/// Exponential backoff (1s doubling, 5 min cap) with ±25% jitter.
/// `attempt` is 0-based.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let base = INITIAL_RECONNECT_MS.saturating_mul(2u64.saturating_pow(attempt.min(12)));
    let capped = base.min(MAX_RECONNECT_MS) as f64;
    let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
    Duration::from_millis((capped * (1.0 + jitter)).max(100.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    #[test]
    fn backoff_grows_and_caps() {
        for attempt in 0..20 {
            let d = reconnect_delay(attempt).as_millis() as u64;
            let base = (INITIAL_RECONNECT_MS << attempt.min(12)).min(MAX_RECONNECT_MS);
            assert!(d >= base * 3 / 4 && d <= base * 5 / 4 + 1, "{attempt}: {d}");
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn run_future_can_be_spawned() {
        let (tx, _rx) = mpsc::channel(1);
        let gateway = Gateway::new(
            GatewayConfig::new(SecretString::from("tok")),
            Arc::new(RuntimeStatus::new()),
            tx,
            CancellationToken::new(),
        );
        let run = gateway.run();
        assert_send(&run);
    }

    async fn send(ws: &mut WebSocketStream<TcpStream>, v: Value) {
        ws.send(WsMessage::Text(v.to_string().into())).await.unwrap();
    }

    fn message_create(id: &str, guild: Option<&str>) -> Value {
        json!({
            "op": 0, "s": 2, "t": "MESSAGE_CREATE",
            "d": {
                "id": id,
                "channel_id": "c1",
                "guild_id": guild,
                "author": {"id": "42", "username": "bob"},
                "content": "yo",
                "timestamp": "2024-05-01T12:00:00+00:00"
            }
        })
    }

    #[tokio::test]
    async fn session_feeds_guild_messages_and_stops_on_fatal_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            send(&mut ws, json!({"op": 10, "d": {"heartbeat_interval": 60000}})).await;

            let identify = ws.next().await.unwrap().unwrap();
            let identify: Value = serde_json::from_str(identify.to_text().unwrap()).unwrap();
            assert_eq!(identify["op"], 2);
            assert_eq!(identify["d"]["token"], "tok");

            send(
                &mut ws,
                json!({"op": 0, "s": 1, "t": "READY",
                       "d": {"user": {"id": "999", "username": "pybot", "bot": true},
                             "session_id": "s"}}),
            )
            .await;
            send(&mut ws, message_create("m1", Some("g1"))).await;
            send(&mut ws, message_create("m2", None)).await;
            ws.send(WsMessage::Close(Some(CloseFrame {
                code: CloseCode::from(4004),
                reason: "Authentication failed.".into(),
            })))
            .await
            .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let status = Arc::new(RuntimeStatus::new());
        let (tx, mut rx) = mpsc::channel(8);
        let gateway = Gateway::new(
            GatewayConfig {
                url: format!("ws://{addr}"),
                token: SecretString::from("tok"),
                max_reconnect_attempts: 3,
            },
            Arc::clone(&status),
            tx,
            CancellationToken::new(),
        );

        let err = gateway.run().await.unwrap_err();
        assert!(matches!(err, ChannelError::Fatal { code: 4004, .. }));
        assert!(!status.is_connected());
        assert_eq!(status.account().unwrap().id.as_str(), "999");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.id.as_str(), "m1");
        assert!(rx.try_recv().is_err(), "direct message must be dropped");
    }

    #[tokio::test]
    async fn unreachable_gateway_exhausts_budget() {
        // Bind then drop to get a port nothing listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let gateway = Gateway::new(
            GatewayConfig {
                url: format!("ws://{addr}"),
                token: SecretString::from("tok"),
                max_reconnect_attempts: 0,
            },
            Arc::new(RuntimeStatus::new()),
            tx,
            CancellationToken::new(),
        );
        let err = gateway.run().await.unwrap_err();
        assert!(matches!(err, ChannelError::ReconnectsExhausted(0)));
    }

    #[tokio::test]
    async fn cancellation_stops_reconnect_wait() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let gateway = Gateway::new(
            GatewayConfig {
                url: format!("ws://{addr}"),
                token: SecretString::from("tok"),
                max_reconnect_attempts: 8,
            },
            Arc::new(RuntimeStatus::new()),
            tx,
            cancel.clone(),
        );
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });
        assert!(gateway.run().await.is_ok());
    }
}
