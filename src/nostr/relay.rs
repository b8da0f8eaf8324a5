//! Relay websocket client
//!
//! One long-lived websocket per relay. Send, receive and connect are
//! serialized by independent per-connection locks so concurrent callers
//! never interleave a receive on the same socket. Publishes wait for the
//! relay's `OK`; one-shot fetches collect until `EOSE` or timeout and
//! partial results are valid.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::event::{Event, Filter};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, WsMessage>;
type WsReader = SplitStream<WsStream>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay transport failures. None of these are fatal to the engine: it
/// needs only one acknowledging relay for publishes and tolerates partial
/// fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    Unreachable(String),
    ProtocolViolation(String),
    RejectedByRelay(String),
    Timeout,
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable(msg) => write!(f, "Relay unreachable: {}", msg),
            Self::ProtocolViolation(msg) => write!(f, "Relay protocol violation: {}", msg),
            Self::RejectedByRelay(msg) => write!(f, "Relay rejected event: {}", msg),
            Self::Timeout => write!(f, "Relay operation timed out"),
        }
    }
}

impl std::error::Error for RelayError {}

impl RelayError {
    /// Rejections that mention throttling get retried with backoff by the
    /// pool.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RejectedByRelay(msg) if msg.to_lowercase().contains("rate-limit")
            || msg.to_lowercase().contains("rate limit")
            || msg.to_lowercase().contains("too fast"))
    }
}

/// Parsed server-to-client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    Event { sub_id: String, event: Event },
    Eose(String),
    Ok { event_id: String, accepted: bool, message: String },
    Closed { sub_id: String, message: String },
    Notice(String),
    Other,
}

/// Parse one relay JSON frame.
pub fn parse_frame(raw: &str) -> Result<RelayFrame, RelayError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| RelayError::ProtocolViolation(format!("Invalid JSON frame: {}", e)))?;
    let array = value
        .as_array()
        .ok_or_else(|| RelayError::ProtocolViolation("Frame is not an array".into()))?;
    let label = array
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| RelayError::ProtocolViolation("Frame missing label".into()))?;

    match label {
        "EVENT" => {
            let sub_id = array
                .get(1)
                .and_then(|v| v.as_str())
                .ok_or_else(|| RelayError::ProtocolViolation("EVENT missing sub id".into()))?
                .to_string();
            let event: Event = serde_json::from_value(
                array
                    .get(2)
                    .cloned()
                    .ok_or_else(|| RelayError::ProtocolViolation("EVENT missing body".into()))?,
            )
            .map_err(|e| RelayError::ProtocolViolation(format!("Malformed event: {}", e)))?;
            Ok(RelayFrame::Event { sub_id, event })
        }
        "EOSE" => Ok(RelayFrame::Eose(
            array
                .get(1)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        )),
        "OK" => Ok(RelayFrame::Ok {
            event_id: array
                .get(1)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            accepted: array.get(2).and_then(|v| v.as_bool()).unwrap_or(false),
            message: array
                .get(3)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        "CLOSED" => Ok(RelayFrame::Closed {
            sub_id: array
                .get(1)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            message: array
                .get(2)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        "NOTICE" => Ok(RelayFrame::Notice(
            array
                .get(1)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        )),
        _ => Ok(RelayFrame::Other),
    }
}

/// One relay connection.
pub struct RelayConnection {
    pub url: String,
    writer: Mutex<Option<WsWriter>>,
    reader: Mutex<Option<WsReader>>,
    connect_lock: Mutex<()>,
}

impl RelayConnection {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            connect_lock: Mutex::new(()),
        }
    }

    /// Establish the websocket if not already connected.
    pub async fn connect(&self) -> Result<(), RelayError> {
        let _guard = self.connect_lock.lock().await;
        if self.writer.lock().await.is_some() {
            return Ok(());
        }

        let connected = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| RelayError::Unreachable(format!("Connection timeout: {}", self.url)))?
            .map_err(|e| RelayError::Unreachable(e.to_string()))?;

        let (stream, _response) = connected;
        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        *self.reader.lock().await = Some(reader);
        log::debug!("Connected to relay {}", self.url);
        Ok(())
    }

    /// Tear down the socket; the next operation reconnects.
    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.send(WsMessage::Close(None)).await;
        }
        *self.reader.lock().await = None;
    }

    async fn mark_broken(&self) {
        *self.writer.lock().await = None;
        *self.reader.lock().await = None;
    }

    async fn send_frame(&self, frame: &Value) -> Result<(), RelayError> {
        let mut writer = self.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| RelayError::Unreachable("Not connected".into()))?;
        let text = frame.to_string();
        if let Err(e) = sink.send(WsMessage::Text(text)).await {
            drop(writer);
            self.mark_broken().await;
            return Err(RelayError::Unreachable(e.to_string()));
        }
        Ok(())
    }

    /// Receive the next parseable frame, skipping pings and binary noise.
    /// `reader` must already be locked by the caller's scope via the
    /// returned guard pattern; this helper owns the lock for one frame.
    async fn recv_frame(
        &self,
        reader: &mut WsReader,
        deadline: tokio::time::Instant,
    ) -> Result<RelayFrame, RelayError> {
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or(RelayError::Timeout)?;
            let message = tokio::time::timeout(remaining, reader.next())
                .await
                .map_err(|_| RelayError::Timeout)?;

            match message {
                Some(Ok(WsMessage::Text(text))) => return parse_frame(&text),
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(RelayError::Unreachable("Connection closed".into()));
                }
                Some(Ok(_)) => continue, // ping/pong/binary
                Some(Err(e)) => return Err(RelayError::Unreachable(e.to_string())),
            }
        }
    }

    /// Publish an event and wait for the relay's `OK`.
    ///
    /// No retry at this layer; the pool decides what a failed relay
    /// means.
    pub async fn publish(&self, event: &Event) -> Result<(), RelayError> {
        self.connect().await?;
        self.send_frame(&serde_json::json!(["EVENT", event])).await?;

        let deadline = tokio::time::Instant::now() + PUBLISH_TIMEOUT;
        let mut reader_guard = self.reader.lock().await;
        let reader = reader_guard
            .as_mut()
            .ok_or_else(|| RelayError::Unreachable("Not connected".into()))?;

        loop {
            match self.recv_frame(reader, deadline).await {
                Ok(RelayFrame::Ok {
                    event_id,
                    accepted,
                    message,
                }) if event_id == event.id => {
                    if accepted {
                        return Ok(());
                    }
                    return Err(RelayError::RejectedByRelay(message));
                }
                Ok(RelayFrame::Notice(message)) => {
                    log::debug!("Relay {} notice: {}", self.url, message);
                }
                Ok(_) => continue,
                Err(RelayError::Unreachable(e)) => {
                    drop(reader_guard);
                    self.mark_broken().await;
                    return Err(RelayError::Unreachable(e));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One-shot fetch: open a subscription, collect events until `EOSE`
    /// or the timeout, then close. Returns whatever was collected.
    pub async fn fetch(
        &self,
        filters: &[Filter],
        timeout: Duration,
    ) -> Result<Vec<Event>, RelayError> {
        self.connect().await?;

        let sub_id = uuid::Uuid::new_v4().to_string();
        let mut request = vec![
            serde_json::json!("REQ"),
            serde_json::json!(sub_id),
        ];
        request.extend(filters.iter().map(|f| serde_json::json!(f)));
        self.send_frame(&Value::Array(request)).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut events = Vec::new();

        {
            let mut reader_guard = self.reader.lock().await;
            let reader = match reader_guard.as_mut() {
                Some(r) => r,
                None => return Ok(events),
            };

            loop {
                match self.recv_frame(reader, deadline).await {
                    Ok(RelayFrame::Event { sub_id: sid, event }) if sid == sub_id => {
                        events.push(event);
                    }
                    Ok(RelayFrame::Eose(sid)) if sid == sub_id => break,
                    Ok(RelayFrame::Closed { sub_id: sid, .. }) if sid == sub_id => break,
                    Ok(_) => continue,
                    Err(RelayError::Timeout) => break, // partial result is fine
                    Err(e) => {
                        drop(reader_guard);
                        self.mark_broken().await;
                        return Err(e);
                    }
                }
            }
        }

        // Best effort close; the subscription is short-lived anyway.
        let _ = self
            .send_frame(&serde_json::json!(["CLOSE", sub_id]))
            .await;

        Ok(events)
    }

    /// Open a streaming subscription. The caller drives it with
    /// [`Subscription::next_event`] and ends it with
    /// [`Subscription::close`] or by dropping it.
    pub async fn subscribe(
        self: &std::sync::Arc<Self>,
        filters: &[Filter],
    ) -> Result<Subscription, RelayError> {
        self.connect().await?;
        let sub_id = uuid::Uuid::new_v4().to_string();
        let mut request = vec![
            serde_json::json!("REQ"),
            serde_json::json!(sub_id),
        ];
        request.extend(filters.iter().map(|f| serde_json::json!(f)));
        self.send_frame(&Value::Array(request)).await?;
        Ok(Subscription {
            connection: self.clone(),
            sub_id,
        })
    }
}

/// Handle for a streaming subscription on one relay.
pub struct Subscription {
    connection: std::sync::Arc<RelayConnection>,
    sub_id: String,
}

impl Subscription {
    /// Wait for the next matching event. Returns `None` when the relay
    /// closed the subscription; `Err(Timeout)` when nothing arrived in
    /// time (the subscription stays open).
    pub async fn next_event(&self, timeout: Duration) -> Result<Option<Event>, RelayError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut reader_guard = self.connection.reader.lock().await;
        let reader = reader_guard
            .as_mut()
            .ok_or_else(|| RelayError::Unreachable("Not connected".into()))?;

        loop {
            match self.connection.recv_frame(reader, deadline).await? {
                RelayFrame::Event { sub_id, event } if sub_id == self.sub_id => {
                    return Ok(Some(event));
                }
                RelayFrame::Closed { sub_id, message } if sub_id == self.sub_id => {
                    log::debug!(
                        "Relay {} closed subscription: {}",
                        self.connection.url,
                        message
                    );
                    return Ok(None);
                }
                _ => continue,
            }
        }
    }

    /// Close the subscription on the relay.
    pub async fn close(self) {
        let _ = self
            .connection
            .send_frame(&serde_json::json!(["CLOSE", self.sub_id]))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ok_frame() {
        let frame = parse_frame(r#"["OK","abcd",true,""]"#).unwrap();
        assert_eq!(
            frame,
            RelayFrame::Ok {
                event_id: "abcd".into(),
                accepted: true,
                message: String::new()
            }
        );
    }

    #[test]
    fn test_parse_rejection_frame() {
        let frame = parse_frame(r#"["OK","abcd",false,"rate-limited: slow down"]"#).unwrap();
        match frame {
            RelayFrame::Ok {
                accepted, message, ..
            } => {
                assert!(!accepted);
                assert!(RelayError::RejectedByRelay(message).is_rate_limited());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_parse_event_frame() {
        let raw = r#"["EVENT","sub1",{"id":"00","pubkey":"ab","created_at":1,"kind":7375,"tags":[],"content":"c","sig":"00"}]"#;
        match parse_frame(raw).unwrap() {
            RelayFrame::Event { sub_id, event } => {
                assert_eq!(sub_id, "sub1");
                assert_eq!(event.kind, 7375);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_parse_eose_and_closed() {
        assert_eq!(
            parse_frame(r#"["EOSE","s"]"#).unwrap(),
            RelayFrame::Eose("s".into())
        );
        assert_eq!(
            parse_frame(r#"["CLOSED","s","done"]"#).unwrap(),
            RelayFrame::Closed {
                sub_id: "s".into(),
                message: "done".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame(r#"{"not":"array"}"#).is_err());
        assert!(parse_frame(r#"[42]"#).is_err());
        assert_eq!(parse_frame(r#"["AUTH","x"]"#).unwrap(), RelayFrame::Other);
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(RelayError::RejectedByRelay("rate-limited".into()).is_rate_limited());
        assert!(RelayError::RejectedByRelay("Rate Limit exceeded".into()).is_rate_limited());
        assert!(!RelayError::RejectedByRelay("invalid: bad sig".into()).is_rate_limited());
        assert!(!RelayError::Timeout.is_rate_limited());
    }
}
