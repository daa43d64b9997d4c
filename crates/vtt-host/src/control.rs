use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use vtt_kernel::{EngineError, SessionSpec};
use vtt_types::{
    FullState, FullStateRequest, ParticipantId, SessionEnd, SessionId, SessionStatus,
    StateOperation, StateUpdate, StateUpdateBroadcast, StateUpdateResponse, Value, Version,
};

use crate::error::HostError;
use crate::registry::SessionRegistry;

pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub v: u8,
    pub id: String,
    pub cmd: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ControlError>,
}

impl ResponseEnvelope {
    fn from_result(id: String, res: Result<serde_json::Value, ControlError>) -> Self {
        match res {
            Ok(val) => ResponseEnvelope {
                id,
                ok: true,
                result: Some(val),
                error: None,
            },
            Err(e) => ResponseEnvelope {
                id,
                ok: false,
                result: None,
                error: Some(e),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlError {
    pub code: String,
    pub message: String,
}

impl ControlError {
    fn invalid_request(msg: impl Into<String>) -> Self {
        Self {
            code: "invalid_request".into(),
            message: msg.into(),
        }
    }

    fn unknown_method() -> Self {
        Self {
            code: "unknown_method".into(),
            message: "unknown command".into(),
        }
    }

    fn decode(msg: impl Into<String>) -> Self {
        Self {
            code: "decode_error".into(),
            message: msg.into(),
        }
    }

    fn host(err: HostError) -> Self {
        let code = match &err {
            HostError::Engine(engine) => engine.code().as_str().to_string(),
            HostError::SessionExists(_) => "session_exists".into(),
            _ => "host_error".into(),
        };
        Self {
            code,
            message: err.to_string(),
        }
    }
}

/// Frames written on a `subscribe` connection, one per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum StreamEvent {
    Snapshot { subscriber: u64, snapshot: FullState },
    Broadcast(StateUpdateBroadcast),
    Closed { reason: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePayload {
    #[serde(default)]
    session_id: Option<SessionId>,
    writer: ParticipantId,
    #[serde(default)]
    participants: Vec<ParticipantId>,
    #[serde(default)]
    initial_state: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload {
    session_id: SessionId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriterPayload {
    session_id: SessionId,
    writer: ParticipantId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantsPayload {
    session_id: SessionId,
    participants: Vec<ParticipantId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePayload {
    submitter: ParticipantId,
    update: RawUpdate,
}

/// A `StateUpdate` whose operations are still undecoded, so a malformed
/// operation is rejected inside the update response rather than the envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUpdate {
    request_id: String,
    session_id: SessionId,
    base_version: Version,
    operations: Vec<serde_json::Value>,
    #[serde(default)]
    timestamp: u64,
}

impl RawUpdate {
    fn decode(self) -> Result<StateUpdate, EngineError> {
        let operations = self
            .operations
            .into_iter()
            .enumerate()
            .map(|(index, op)| {
                serde_json::from_value::<StateOperation>(op).map_err(|e| {
                    EngineError::InvalidUpdate(format!("operation {index} is malformed: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StateUpdate {
            request_id: self.request_id,
            session_id: self.session_id,
            base_version: self.base_version,
            operations,
            timestamp: self.timestamp,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullStatePayload {
    requester: ParticipantId,
    request: FullStateRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribePayload {
    session_id: SessionId,
    participant: ParticipantId,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlushPayload {
    #[serde(default)]
    session_id: Option<SessionId>,
}

fn decode_payload<T: serde::de::DeserializeOwned>(payload: &serde_json::Value) -> Result<T, ControlError> {
    serde_json::from_value(payload.clone()).map_err(|e| ControlError::decode(format!("{e}")))
}

/// Unix-socket control server (NDJSON framing) in front of a session registry.
pub struct ControlServer {
    path: PathBuf,
    registry: Arc<SessionRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ControlServer {
    pub fn new<P: Into<PathBuf>>(
        path: P,
        registry: Arc<SessionRegistry>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let shutdown_rx = shutdown_tx.subscribe();
        Self {
            path: path.into(),
            registry,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) -> Result<(), HostError> {
        if self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
        let listener = UnixListener::bind(&self.path)
            .map_err(|e| HostError::Control(format!("failed to bind control socket: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600));
        }
        tracing::info!(path = %self.path.display(), "control server listening");

        loop {
            tokio::select! {
                res = listener.accept() => {
                    match res {
                        Ok((stream, _)) => {
                            let registry = Arc::clone(&self.registry);
                            let shutdown_tx = self.shutdown_tx.clone();
                            tokio::spawn(handle_conn(stream, registry, shutdown_tx));
                        }
                        Err(err) => tracing::warn!("control accept failed: {err}"),
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    let _ = std::fs::remove_file(&self.path);
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn handle_conn(
    stream: UnixStream,
    registry: Arc<SessionRegistry>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let (r, mut w) = stream.into_split();
    let mut reader = BufReader::new(r);
    let mut line = String::new();

    while let Ok(n) = reader.read_line(&mut line).await {
        if n == 0 {
            break;
        }
        let resp = match serde_json::from_str::<RequestEnvelope>(&line) {
            Ok(req) if req.cmd == "subscribe" && req.v == PROTOCOL_VERSION => {
                // The connection belongs to the stream from here on.
                stream_subscription(req, &registry, &mut w, shutdown_tx.subscribe()).await;
                return;
            }
            Ok(req) => handle_request(req, &registry, &shutdown_tx).await,
            Err(e) => ResponseEnvelope::from_result(String::new(), Err(ControlError::decode(e.to_string()))),
        };
        if write_line(&mut w, &resp).await.is_err() {
            break;
        }
        line.clear();
    }
}

async fn write_line<T: Serialize>(w: &mut OwnedWriteHalf, value: &T) -> std::io::Result<()> {
    let json = serde_json::to_string(value).map_err(std::io::Error::other)?;
    w.write_all(json.as_bytes()).await?;
    w.write_all(b"\n").await
}

fn event_envelope(id: &str, event: &StreamEvent) -> ResponseEnvelope {
    let res = serde_json::to_value(event).map_err(|e| ControlError::decode(e.to_string()));
    ResponseEnvelope::from_result(id.to_string(), res)
}

async fn stream_subscription(
    req: RequestEnvelope,
    registry: &SessionRegistry,
    w: &mut OwnedWriteHalf,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let opened = async {
        let p: SubscribePayload = decode_payload(&req.payload)?;
        let handle = registry
            .open_session(&p.session_id)
            .await
            .map_err(ControlError::host)?;
        let sub = handle
            .subscribe(p.participant)
            .await
            .map_err(ControlError::host)?;
        Ok::<_, ControlError>((handle, sub))
    }
    .await;
    let (handle, mut sub) = match opened {
        Ok(pair) => pair,
        Err(err) => {
            let _ = write_line(w, &ResponseEnvelope::from_result(req.id, Err(err))).await;
            return;
        }
    };

    let first = StreamEvent::Snapshot {
        subscriber: sub.id,
        snapshot: sub.snapshot.clone(),
    };
    if write_line(w, &event_envelope(&req.id, &first)).await.is_err() {
        return;
    }
    tracing::debug!(session = %handle.id(), subscriber = sub.id, "subscription streaming");

    loop {
        tokio::select! {
            next = sub.next() => match next {
                Some(msg) => {
                    let event = StreamEvent::Broadcast(StateUpdateBroadcast::clone(&msg));
                    if write_line(w, &event_envelope(&req.id, &event)).await.is_err() {
                        break;
                    }
                }
                None => {
                    let reason = if handle.snapshot().status == SessionStatus::Ended {
                        "ended"
                    } else {
                        "lagged"
                    };
                    let closed = StreamEvent::Closed { reason: reason.into() };
                    let _ = write_line(w, &event_envelope(&req.id, &closed)).await;
                    break;
                }
            },
            _ = shutdown_rx.recv() => {
                let closed = StreamEvent::Closed { reason: "shutdown".into() };
                let _ = write_line(w, &event_envelope(&req.id, &closed)).await;
                break;
            }
        }
    }
}

async fn handle_request(
    req: RequestEnvelope,
    registry: &SessionRegistry,
    shutdown_tx: &broadcast::Sender<()>,
) -> ResponseEnvelope {
    let id = req.id.clone();
    let res: Result<serde_json::Value, ControlError> = async {
        if req.v != PROTOCOL_VERSION {
            return Err(ControlError::invalid_request("unsupported protocol version"));
        }
        match req.cmd.as_str() {
            "session-create" => {
                let p: CreatePayload = decode_payload(&req.payload)?;
                let session_id = p
                    .session_id
                    .unwrap_or_else(|| SessionId::new(uuid::Uuid::new_v4().to_string()));
                let mut spec = SessionSpec::new(session_id, p.writer).with_participants(p.participants);
                if let Some(initial) = p.initial_state {
                    spec = spec.with_initial(initial);
                }
                let handle = registry.create_session(spec).await.map_err(ControlError::host)?;
                let snapshot = handle.snapshot();
                Ok(json!({
                    "sessionId": snapshot.id,
                    "status": snapshot.status,
                    "version": snapshot.version,
                    "hash": snapshot.hash,
                }))
            }
            "session-end" => {
                let p: SessionEnd = decode_payload(&req.payload)?;
                let ended = registry
                    .end_session(&p.session_id)
                    .await
                    .map_err(ControlError::host)?;
                Ok(json!({
                    "sessionId": ended.snapshot.id,
                    "version": ended.snapshot.version,
                    "hash": ended.snapshot.hash,
                    "persisted": ended.persisted,
                }))
            }
            "session-list" => {
                let stored = registry.list_stored().await.map_err(ControlError::host)?;
                Ok(json!({ "sessions": registry.list(), "stored": stored }))
            }
            "writer-connect" => {
                let p: WriterPayload = decode_payload(&req.payload)?;
                let handle = registry
                    .open_session(&p.session_id)
                    .await
                    .map_err(ControlError::host)?;
                let status = handle
                    .writer_connected(p.writer)
                    .await
                    .map_err(ControlError::host)?;
                Ok(json!({ "status": status }))
            }
            "writer-disconnect" => {
                let p: SessionPayload = decode_payload(&req.payload)?;
                let handle = registry
                    .open_session(&p.session_id)
                    .await
                    .map_err(ControlError::host)?;
                let status = handle.writer_disconnected().await.map_err(ControlError::host)?;
                Ok(json!({ "status": status }))
            }
            "participants-set" => {
                let p: ParticipantsPayload = decode_payload(&req.payload)?;
                let handle = registry
                    .open_session(&p.session_id)
                    .await
                    .map_err(ControlError::host)?;
                handle
                    .set_participants(p.participants)
                    .await
                    .map_err(ControlError::host)?;
                Ok(json!({}))
            }
            "state-update" => {
                let p: UpdatePayload = decode_payload(&req.payload)?;
                // Engine rejections travel inside the update response, not the envelope.
                let response = match registry.open_session(&p.update.session_id).await {
                    Ok(handle) => match p.update.decode() {
                        Ok(update) => handle.submit(p.submitter, update).await,
                        Err(err) => StateUpdateResponse::rejected(err.to_response_error()),
                    },
                    Err(err) => StateUpdateResponse::rejected(err.to_response_error()),
                };
                serde_json::to_value(response).map_err(|e| ControlError::decode(e.to_string()))
            }
            "full-state" => {
                let p: FullStatePayload = decode_payload(&req.payload)?;
                let handle = registry
                    .open_session(&p.request.session_id)
                    .await
                    .map_err(ControlError::host)?;
                let response = handle
                    .full_state(p.requester, p.request)
                    .await
                    .map_err(ControlError::host)?;
                serde_json::to_value(response).map_err(|e| ControlError::decode(e.to_string()))
            }
            "flush" => {
                let p: FlushPayload = if req.payload.is_null() {
                    FlushPayload::default()
                } else {
                    decode_payload(&req.payload)?
                };
                match p.session_id {
                    Some(session_id) => {
                        let handle = registry
                            .open_session(&session_id)
                            .await
                            .map_err(ControlError::host)?;
                        let written = handle.flush().await.map_err(ControlError::host)?;
                        Ok(json!({ "flushed": usize::from(written) }))
                    }
                    None => {
                        let results = registry.flush_all().await;
                        let failed: Vec<String> = results
                            .iter()
                            .filter(|(_, r)| r.is_err())
                            .map(|(id, _)| id.to_string())
                            .collect();
                        Ok(json!({
                            "flushed": results.len() - failed.len(),
                            "failed": failed,
                        }))
                    }
                }
            }
            "shutdown" => {
                let _ = shutdown_tx.send(());
                Ok(json!({}))
            }
            _ => Err(ControlError::unknown_method()),
        }
    }
    .await;

    ResponseEnvelope::from_result(id, res)
}

/// Minimal control client used by tests and CLI helpers.
pub struct ControlClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

impl ControlClient {
    pub async fn connect(path: &Path) -> std::io::Result<Self> {
        let stream = UnixStream::connect(path).await?;
        let (r, w) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(r),
            writer: w,
            next_id: 1,
        })
    }

    pub async fn request(&mut self, envelope: &RequestEnvelope) -> std::io::Result<ResponseEnvelope> {
        write_line(&mut self.writer, envelope).await?;
        self.read_envelope().await?.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "control connection closed")
        })
    }

    /// Send `cmd` and return its result, turning an error envelope into [`HostError::Control`].
    pub async fn call(&mut self, cmd: &str, payload: serde_json::Value) -> Result<serde_json::Value, HostError> {
        let envelope = RequestEnvelope {
            v: PROTOCOL_VERSION,
            id: self.next_id.to_string(),
            cmd: cmd.to_string(),
            payload,
        };
        self.next_id += 1;
        let resp = self.request(&envelope).await?;
        match (resp.ok, resp.error) {
            (true, _) => Ok(resp.result.unwrap_or(serde_json::Value::Null)),
            (false, Some(err)) => Err(HostError::Control(format!("{}: {}", err.code, err.message))),
            (false, None) => Err(HostError::Control(format!("{cmd} failed"))),
        }
    }

    /// Read the next frame of a streaming response; `None` once the server hangs up.
    pub async fn read_envelope(&mut self) -> std::io::Result<Option<ResponseEnvelope>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        serde_json::from_str(&line)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Next decoded subscription frame.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>, HostError> {
        let Some(resp) = self.read_envelope().await? else {
            return Ok(None);
        };
        match (resp.ok, resp.result, resp.error) {
            (true, Some(result), _) => serde_json::from_value(result)
                .map(Some)
                .map_err(|e| HostError::Control(format!("bad stream frame: {e}"))),
            (_, _, Some(err)) => Err(HostError::Control(format!("{}: {}", err.code, err.message))),
            _ => Err(HostError::Control("empty stream frame".into())),
        }
    }
}
