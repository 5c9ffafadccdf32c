//! Newline-delimited JSON channel over an async reader/writer pair.
//!
//! Each direction is one JSON value per line:
//! ```text
//! Owner → Worker: {"type": "job", "id": 1}\n
//! Worker → Owner: {"type": "progress", "id": 1, "done": 0.5}\n
//! ```
//! Inbound lines that are not valid JSON are delivered as string payloads.

use std::future::{self, Future};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Channel, ChannelError, Listeners};
use crate::event::{Event, EventKind};
use crate::observer::Observer;

/// Buffer size of each direction of an in-memory pair
const PAIR_BUFFER_SIZE: usize = 64 * 1024;

/// Channel speaking JSON lines; one writer task and one reader task.
///
/// Inbound events are delivered by the reader task one at a time, in arrival
/// order, each to completion before the next line is read.
pub struct LineChannel {
    name: String,
    outbound: mpsc::UnboundedSender<String>,
    listeners: Arc<Listeners>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LineChannel {
    /// Start a channel over `reader`/`writer`. Must be called within a Tokio runtime.
    pub fn new<R, W>(name: impl Into<String>, reader: R, writer: W) -> Result<Self, ChannelError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_epilogue(name, reader, writer, future::ready(None))
    }

    /// Like [`LineChannel::new`], additionally delivering the event produced by
    /// `epilogue` once the inbound side has closed.
    pub(crate) fn with_epilogue<R, W, F>(
        name: impl Into<String>,
        reader: R,
        writer: W,
        epilogue: F,
    ) -> Result<Self, ChannelError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = Option<Event>> + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;
        let name = name.into();
        let listeners = Arc::new(Listeners::new());
        let (outbound, rx) = mpsc::unbounded_channel();

        let writer = handle.spawn(write_loop(name.clone(), writer, rx));
        let reader = handle.spawn(read_loop(name.clone(), reader, listeners.clone(), epilogue));

        log::debug!("Channel {} started", name);
        Ok(Self {
            name,
            outbound,
            listeners,
            reader,
            writer,
        })
    }

    /// Channel over this process's stdin/stdout, for use inside a worker
    pub fn stdio() -> Result<Self, ChannelError> {
        Self::new("stdio", tokio::io::stdin(), tokio::io::stdout())
    }

    /// Two connected in-memory ends
    pub fn pair() -> Result<(Self, Self), ChannelError> {
        let (left, right) = tokio::io::duplex(PAIR_BUFFER_SIZE);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        Ok((
            Self::new("pair-left", left_read, left_write)?,
            Self::new("pair-right", right_read, right_write)?,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting messages and wait until everything already queued has
    /// been written out
    pub async fn close(mut self) {
        let (closed, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.outbound, closed));
        if let Err(e) = (&mut self.writer).await {
            log::debug!("Channel {} writer ended abnormally: {}", self.name, e);
        }
    }
}

impl Channel for LineChannel {
    fn send(&self, message: Value) -> Result<(), ChannelError> {
        let line = serde_json::to_string(&message).map_err(ChannelError::Serialize)?;
        self.outbound.send(line).map_err(|_| ChannelError::Closed)
    }

    fn subscribe(&self, kind: EventKind, observer: Observer) {
        self.listeners.subscribe(kind, observer);
    }

    fn unsubscribe(&self, kind: &EventKind, observer: &Observer) {
        self.listeners.unsubscribe(kind, observer);
    }

    fn handler(&self) -> Option<Observer> {
        self.listeners.handler()
    }

    fn set_handler(&self, handler: Option<Observer>) {
        self.listeners.set_handler(handler);
    }
}

impl Drop for LineChannel {
    fn drop(&mut self) {
        log::debug!("Channel {} dropped", self.name);
        self.reader.abort();
    }
}

async fn write_loop<W>(name: String, mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            log::debug!("Channel {} outbound side closed: {}", name, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop<R, F>(name: String, reader: R, listeners: Arc<Listeners>, epilogue: F)
where
    R: AsyncRead + Unpin,
    F: Future<Output = Option<Event>>,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                log::debug!("Channel {} reached end of stream", name);
                listeners.dispatch(&Event::new(EventKind::Close, Value::Null));
                break;
            }
            Ok(_) => {
                if let Some(data) = decode_line(&buf) {
                    listeners.dispatch(&Event::message(data));
                }
            }
            Err(e) => {
                log::warn!("Channel {} read failed: {}", name, e);
                listeners.dispatch(&Event::new(EventKind::Error, Value::String(e.to_string())));
                break;
            }
        }
    }

    if let Some(event) = epilogue.await {
        listeners.dispatch(&event);
    }
}

/// Payload of one raw inbound line, or `None` for a blank line.
///
/// Lines that are not JSON (or not even UTF-8) become string payloads with
/// only the line terminator removed.
fn decode_line(raw: &[u8]) -> Option<Value> {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.trim_ascii().is_empty() {
        return None;
    }
    Some(
        serde_json::from_slice(line)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(line).into_owned())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    fn forwarder() -> (Observer, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = Observer::infallible(move |event| {
            let _ = tx.send(event.clone());
        });
        (observer, rx)
    }

    async fn next(rx: &mut UnboundedReceiver<Event>) -> Event {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("observer dropped")
    }

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(LineChannel::pair(), Err(ChannelError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (left, right) = LineChannel::pair().unwrap();
        let (observer, mut rx) = forwarder();
        right.subscribe(EventKind::Message, observer);

        for i in 0..5 {
            left.send(json!({"type": "seq", "n": i})).unwrap();
        }

        for i in 0..5 {
            let event = next(&mut rx).await;
            assert_eq!(event.kind, EventKind::Message);
            assert_eq!(event.data, json!({"type": "seq", "n": i}));
        }
    }

    #[tokio::test]
    async fn test_non_json_line_is_string_payload() {
        let (reader, mut raw) = tokio::io::duplex(1024);
        let (sink, _keep) = tokio::io::duplex(1024);
        let channel = LineChannel::new("raw", reader, sink).unwrap();
        let (observer, mut rx) = forwarder();
        channel.set_handler(Some(observer));

        raw.write_all(b"not json at all\n\n{\"ok\":true}\n").await.unwrap();

        assert_eq!(next(&mut rx).await.data, json!("not json at all"));
        assert_eq!(next(&mut rx).await.data, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_stop_channel() {
        let (reader, mut raw) = tokio::io::duplex(1024);
        let (sink, _keep) = tokio::io::duplex(1024);
        let channel = LineChannel::new("raw", reader, sink).unwrap();
        let (observer, mut rx) = forwarder();
        channel.subscribe(EventKind::Message, observer.clone());
        channel.subscribe(EventKind::Error, observer);

        raw.write_all(b"\xff\xfe garbage\n{\"type\":\"after\"}\n").await.unwrap();

        let first = next(&mut rx).await;
        assert_eq!(first.kind, EventKind::Message);
        assert_eq!(first.data, json!("\u{fffd}\u{fffd} garbage"));
        let second = next(&mut rx).await;
        assert_eq!(second.kind, EventKind::Message);
        assert_eq!(second.data, json!({"type": "after"}));
    }

    #[tokio::test]
    async fn test_string_payload_keeps_whitespace() {
        let (reader, mut raw) = tokio::io::duplex(1024);
        let (sink, _keep) = tokio::io::duplex(1024);
        let channel = LineChannel::new("raw", reader, sink).unwrap();
        let (observer, mut rx) = forwarder();
        channel.set_handler(Some(observer));

        raw.write_all(b"  indented text \r\n   \n\tlast\n").await.unwrap();

        assert_eq!(next(&mut rx).await.data, json!("  indented text "));
        assert_eq!(next(&mut rx).await.data, json!("\tlast"));
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"{\"a\":1}\n"), Some(json!({"a": 1})));
        assert_eq!(decode_line(b" {\"a\":1} \r\n"), Some(json!({"a": 1})));
        assert_eq!(decode_line(b"plain"), Some(json!("plain")));
        assert_eq!(decode_line(b" \t\r\n"), None);
        assert_eq!(decode_line(b"\n"), None);
    }

    #[tokio::test]
    async fn test_close_event_on_eof() {
        let (left, right) = LineChannel::pair().unwrap();
        let (observer, mut rx) = forwarder();
        right.subscribe(EventKind::Close, observer);

        drop(left);

        let event = next(&mut rx).await;
        assert_eq!(event.kind, EventKind::Close);
    }

    #[tokio::test]
    async fn test_close_flushes_queued_messages() {
        let (left, right) = LineChannel::pair().unwrap();
        let (observer, mut rx) = forwarder();
        right.subscribe(EventKind::Message, observer.clone());
        right.subscribe(EventKind::Close, observer);

        left.send(json!("last words")).unwrap();
        left.close().await;

        assert_eq!(next(&mut rx).await.data, json!("last words"));
        assert_eq!(next(&mut rx).await.kind, EventKind::Close);
    }

    #[tokio::test]
    async fn test_send_after_peer_gone_does_not_panic() {
        let (left, right) = LineChannel::pair().unwrap();
        drop(right);
        // The writer task notices the broken pipe on its own schedule; sends
        // either queue or report Closed, never panic.
        for _ in 0..3 {
            let _ = left.send(json!({"type": "late"}));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
