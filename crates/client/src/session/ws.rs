// Websocket transport for y-websocket compatible collaboration servers.
//
// Each session owns one background task that connects, pumps frames in both
// directions and reconnects with exponential backoff until it is disposed.

use std::net::IpAddr;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use mdroom_common::types::RoomId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::{EventSink, NetworkSession, SessionError, SessionEvent, SessionProvider, SessionRequest};
use crate::resource::{DisposeError, Disposable};

type ClientSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// ── Reconnection ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay: Duration::from_millis(250), max_delay: Duration::from_secs(30) }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after `consecutive_failures` failed ones.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let exp = consecutive_failures.min(7);
        self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay)
    }
}

// ── Provider ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct WsSessionProvider {
    policy: ReconnectPolicy,
}

impl WsSessionProvider {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy }
    }
}

impl SessionProvider for WsSessionProvider {
    fn open(&self, request: SessionRequest) -> Result<Box<dyn NetworkSession>, SessionError> {
        validate_endpoint(&request.endpoint)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SessionError::NoRuntime(request.room.clone()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = runtime.spawn(run_session(
            request.endpoint,
            self.policy.clone(),
            request.events,
            outbound_rx,
            shutdown_rx,
        ));

        Ok(Box::new(WsSession {
            room: request.room,
            outbound: outbound_tx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }))
    }
}

pub fn validate_endpoint(endpoint: &str) -> Result<(), SessionError> {
    let invalid = |reason: String| SessionError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };
    let parsed = Url::parse(endpoint).map_err(|error| invalid(error.to_string()))?;
    match parsed.scheme() {
        // The transport is built without a TLS stack; terminate TLS in front of it.
        "wss" => Err(invalid("wss is not supported by this transport".to_string())),
        "ws" => {
            if !is_loopback_host(parsed.host_str()) {
                warn!(endpoint, "collaboration endpoint is not encrypted");
            }
            Ok(())
        }
        other => Err(invalid(format!("unsupported scheme `{other}`, expected ws or wss"))),
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|addr| addr.is_loopback())
}

// ── Session ────────────────────────────────────────────────────────

struct WsSession {
    room: RoomId,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl NetworkSession for WsSession {
    fn room(&self) -> &RoomId {
        &self.room
    }

    fn send(&self, frame: Vec<u8>) -> Result<(), SessionError> {
        if self.shutdown.is_none() {
            return Err(SessionError::Closed(self.room.clone()));
        }
        self.outbound.send(frame).map_err(|_| SessionError::Closed(self.room.clone()))
    }
}

impl Disposable for WsSession {
    fn resource_name(&self) -> &'static str {
        "network_session"
    }

    fn dispose(&mut self) -> Result<(), DisposeError> {
        let Some(shutdown) = self.shutdown.take() else {
            return Ok(());
        };
        // The task may already have exited on its own; nothing left to stop then.
        if shutdown.send(()).is_err() {
            debug!(room = %self.room, "session task already finished");
        }
        // Detach: the task closes the socket and exits on its own.
        drop(self.task.take());
        Ok(())
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Background task ────────────────────────────────────────────────

enum PumpExit {
    Shutdown,
    Lost(String),
}

async fn run_session(
    endpoint: String,
    policy: ReconnectPolicy,
    events: EventSink,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let room = events.room().clone();
    let mut consecutive_failures = 0u32;

    loop {
        let connected = tokio::select! {
            _ = &mut shutdown => return,
            result = connect_async(endpoint.as_str()) => result,
        };

        let reason = match connected {
            Ok((socket, _)) => {
                consecutive_failures = 0;
                info!(room = %room, endpoint = %endpoint, "collaboration session open");
                if !events.emit(SessionEvent::Open) {
                    return;
                }
                match pump(socket, &events, &mut outbound, &mut shutdown).await {
                    PumpExit::Shutdown => return,
                    PumpExit::Lost(reason) => reason,
                }
            }
            Err(error) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                format!("connect failed: {error}")
            }
        };

        warn!(room = %room, %reason, consecutive_failures, "collaboration session lost");
        if !events.emit(SessionEvent::Closed { reason }) {
            return;
        }

        // Frames queued while offline are superseded by the next handshake.
        while outbound.try_recv().is_ok() {}

        let delay = policy.delay_for(consecutive_failures);
        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Send frames queued before shutdown (the presence leave frame among them),
/// then close the socket.
async fn flush_and_close(
    sink: &mut SplitSink<ClientSocket, WsMessage>,
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Ok(frame) = outbound.try_recv() {
        if sink.feed(WsMessage::Binary(frame.into())).await.is_err() {
            return;
        }
    }
    let _ = sink.send(WsMessage::Close(None)).await;
}

async fn pump(
    socket: ClientSocket,
    events: &EventSink,
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: &mut oneshot::Receiver<()>,
) -> PumpExit {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                flush_and_close(&mut sink, outbound).await;
                return PumpExit::Shutdown;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return PumpExit::Shutdown;
                };
                if let Err(error) = sink.send(WsMessage::Binary(frame.into())).await {
                    return PumpExit::Lost(format!("send failed: {error}"));
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Binary(payload))) => {
                        if !events.emit(SessionEvent::Frame(payload.to_vec())) {
                            let _ = sink.send(WsMessage::Close(None)).await;
                            return PumpExit::Shutdown;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame
                            .map(|frame| frame.reason.as_str().to_owned())
                            .filter(|reason| !reason.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        return PumpExit::Lost(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return PumpExit::Lost(error.to_string()),
                    None => return PumpExit::Lost("stream ended".to_string()),
                }
            }
        }
    }
}
