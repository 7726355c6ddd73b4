//! In-process TRC stand-in for tests.

use crate::connection::Conn;
use crate::error::TrcError;
use crate::wire::{write_message, MessageReader};
use serde_json::{json, Value};
use srrs_protocol::{Message, MessageType, ProtocolVersion};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The TRC end of a test connection.
pub(crate) struct MockTrc {
    reader: MessageReader<BoxedReader>,
    writer: BoxedWriter,
}

impl MockTrc {
    pub const TOKEN: &'static str = "secret-token";

    /// Creates a stream pair with TRC's handshake request already queued.
    ///
    /// The returned stream is the engine's end.
    pub async fn pair(version: &str, token: Option<&str>) -> (DuplexStream, MockTrc) {
        let (engine, trc) = tokio::io::duplex(64 * 1024);
        let mut trc = MockTrc::from_stream(trc);
        trc.send_handshake(version, token).await;
        (engine, trc)
    }

    pub fn from_stream<S>(stream: S) -> MockTrc
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader: BoxedReader = Box::new(read_half);
        MockTrc {
            reader: MessageReader::new(reader),
            writer: Box::new(write_half),
        }
    }

    pub async fn send_handshake(&mut self, version: &str, token: Option<&str>) {
        let mut payload = json!({ "version": version });
        if let Some(token) = token {
            payload["token"] = json!(token);
        }
        self.send(&Message::request(MessageType::Handshake, Some(payload)))
            .await;
    }

    pub async fn send(&mut self, message: &Message) {
        write_message(&mut self.writer, message).await.unwrap();
    }

    /// Writes `line` verbatim, followed by a newline.
    pub async fn send_raw(&mut self, line: &[u8]) {
        self.writer.write_all(line).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Pushes an unsolicited state update.
    pub async fn push_state(&mut self, payload: Value) {
        self.send(&Message::request(MessageType::State, Some(payload)))
            .await;
    }

    pub async fn next(&mut self) -> Result<Message, TrcError> {
        tokio::time::timeout(RECV_TIMEOUT, self.reader.next())
            .await
            .expect("timed out waiting for the engine")
    }

    pub async fn recv(&mut self) -> Message {
        self.next().await.unwrap()
    }

    /// Returns the next message if one arrives within `wait`.
    pub async fn recv_within(&mut self, wait: Duration) -> Option<Message> {
        tokio::time::timeout(wait, self.reader.next())
            .await
            .ok()
            .and_then(Result::ok)
    }

    /// Reads one request and replies to it without payload.
    pub async fn answer(&mut self) -> Message {
        let req = self.recv().await;
        self.send(&Message::reply_to(&req, None)).await;
        req
    }

    /// Waits until the engine has dispatched everything sent so far.
    pub async fn sync(&mut self) {
        let probe = Message::request(MessageType::Ping, None);
        self.send(&probe).await;
        let reply = self.recv().await;
        assert_eq!(reply.parent_id, Some(probe.message_id));
    }

    /// Answers requests until the stream ends.
    pub async fn serve(mut self) {
        while let Ok(req) = self.reader.next().await {
            let answerable = matches!(req.msg_type, MessageType::Ping | MessageType::State);
            if answerable && req.parent_id.is_none() {
                let reply = Message::reply_to(&req, None);
                if write_message(&mut self.writer, &reply).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Establishes a connection with a TRC offering version 1.0.0 and a token.
pub(crate) async fn connect_pair() -> (Arc<Conn>, MockTrc) {
    connect_pair_with(
        ProtocolVersion::new(1, 0, 0),
        "1.0.0",
        Some(MockTrc::TOKEN),
    )
    .await
}

pub(crate) async fn connect_pair_with(
    local: ProtocolVersion,
    peer_version: &str,
    token: Option<&str>,
) -> (Arc<Conn>, MockTrc) {
    let (stream, mut trc) = MockTrc::pair(peer_version, token).await;
    let conn = Conn::establish(local, stream).await.unwrap();

    let reply = trc.recv().await;
    assert_eq!(reply.msg_type, MessageType::Handshake);
    (conn, trc)
}
