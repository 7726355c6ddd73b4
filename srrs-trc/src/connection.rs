//! Connection to TRC.

use crate::dispatch;
use crate::error::TrcError;
use crate::handshake;
use crate::notify::{Notifier, StateSubscription};
use crate::pending::Correlator;
use crate::store::StateStore;
use crate::wire::{write_message, MessageReader};
use serde::Serialize;
use serde_json::Value;
use srrs_protocol::{Command, Message, MessageType, ProtocolVersion, State, TurtleState, Validate};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Upper bound on shutting the write half down during close.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// A live protocol connection to one TRC peer.
///
/// Created by [`Conn::establish`], which performs the handshake and starts
/// the dispatch task. All methods take `&self` and may be called
/// concurrently.
pub struct Conn {
    version: ProtocolVersion,
    token: Option<String>,
    /// Write half of the stream; `None` once closed.
    writer: Mutex<Option<BoxedWriter>>,
    pub(crate) store: StateStore,
    pub(crate) notifier: Arc<Notifier>,
    pub(crate) pending: Correlator,
    closed: watch::Sender<bool>,
    /// Cleared when the dispatch task exits.
    dispatching: AtomicBool,
    errors: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<TrcError>>>,
}

impl Conn {
    /// Performs the handshake over `stream` and starts dispatching.
    pub async fn establish<S>(local: ProtocolVersion, stream: S) -> Result<Arc<Conn>, TrcError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = MessageReader::new(read_half);

        tracing::debug!(local_version = %local, "Starting protocol handshake...");
        let negotiated = handshake::accept(local, &mut reader, &mut write_half).await?;

        let writer: BoxedWriter = Box::new(write_half);
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let conn = Arc::new(Conn {
            version: negotiated.version,
            token: negotiated.token,
            writer: Mutex::new(Some(writer)),
            store: StateStore::new(),
            notifier: Notifier::new(),
            pending: Correlator::new(),
            closed,
            dispatching: AtomicBool::new(true),
            errors: parking_lot::Mutex::new(Some(errors_rx)),
        });

        tokio::spawn(dispatch::run(conn.clone(), reader, errors_tx));
        Ok(conn)
    }

    /// Sends a request and waits for its reply, returning the reply payload.
    ///
    /// Fails with [`TrcError::Closed`] without writing anything if the
    /// connection is closed, and with a validation error if `payload` is
    /// invalid. The wait ends early with [`TrcError::Closed`] if the
    /// connection closes first. Dropping the returned future deregisters the
    /// request.
    pub async fn send_request<P>(
        &self,
        msg_type: MessageType,
        payload: &P,
    ) -> Result<Option<Value>, TrcError>
    where
        P: Serialize + Validate + ?Sized,
    {
        if self.is_closed() || !self.dispatching.load(Ordering::SeqCst) {
            tracing::debug!("send_request() called on closed connection");
            return Err(TrcError::Closed);
        }
        payload.validate()?;

        let payload = match serde_json::to_value(payload)? {
            Value::Null => None,
            value => Some(value),
        };
        let request = Message::request(msg_type, payload);
        let mut reply = self.pending.register(request.message_id.clone())?;

        // The dispatch task clears the table on exit; a slot registered after
        // that would never be filled.
        if !self.dispatching.load(Ordering::SeqCst) {
            return Err(TrcError::Closed);
        }

        tracing::debug!(
            msg_type = %request.msg_type,
            message_id = %request.message_id,
            "Sending request..."
        );
        self.write(&request).await?;
        tracing::debug!(message_id = %request.message_id, "Request sent, waiting for response...");

        let response = tokio::select! {
            response = reply.recv() => response?,
            _ = self.closed() => {
                tracing::debug!(message_id = %request.message_id, "Connection closed while waiting");
                return Err(TrcError::Closed);
            }
        };
        tracing::debug!(message_id = %request.message_id, "Response received");
        Ok(response.payload)
    }

    /// Round-trips a ping.
    pub async fn ping(&self) -> Result<(), TrcError> {
        self.send_request(MessageType::Ping, &()).await?;
        Ok(())
    }

    /// Sends a partial state to TRC.
    pub async fn set_state(&self, state: &State) -> Result<(), TrcError> {
        self.send_request(MessageType::State, state).await?;
        Ok(())
    }

    pub async fn set_command(&self, command: Command) -> Result<(), TrcError> {
        self.set_state(&State::with_command(command)).await
    }

    /// Sends per-turtle state. Fails if `turtles` is empty.
    pub async fn set_turtle_state(
        &self,
        turtles: BTreeMap<String, TurtleState>,
    ) -> Result<(), TrcError> {
        if turtles.is_empty() {
            return Err(TrcError::EmptyTurtleState);
        }
        self.set_state(&State::with_turtles(turtles)).await
    }

    /// Returns the latest state snapshot.
    pub fn state(&self) -> Arc<State> {
        self.store.snapshot()
    }

    /// Subscribes to coalesced state change signals.
    pub fn subscribe_state_changes(&self) -> Result<StateSubscription, TrcError> {
        self.notifier.subscribe().ok_or(TrcError::Closed)
    }

    /// Takes the receiver of asynchronous connection errors.
    ///
    /// There is a single receiver; later calls return `None`. The channel
    /// ends once the dispatch task has exited.
    pub fn errors(&self) -> Option<mpsc::UnboundedReceiver<TrcError>> {
        self.errors.lock().take()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Returns the token TRC sent in its handshake.
    pub fn token(&self) -> Result<&str, TrcError> {
        self.token.as_deref().ok_or(TrcError::NoToken)
    }

    /// Returns the negotiated protocol version.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.notifier.len()
    }

    /// Closes the connection.
    ///
    /// Wakes everything waiting on [`Conn::closed`], ends all subscriptions,
    /// fails outstanding requests and shuts the stream down. Closing an
    /// already closed connection does nothing.
    pub async fn close(&self) -> Result<(), TrcError> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        tracing::debug!("Closing connection...");

        self.notifier.close();
        tracing::debug!(pending = self.pending.len(), "Clearing pending requests");
        self.pending.clear();

        // Every writer lock holder races the closed signal, so the lock is
        // released promptly once it is set.
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            tracing::debug!("Shutting down writer");
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "Writer shutdown failed"),
                Err(_) => tracing::debug!("Writer shutdown timed out, dropping it"),
            }
        }

        tracing::debug!("Connection closed");
        Ok(())
    }

    /// Writes one message. Gives up with [`TrcError::Closed`] as soon as the
    /// connection closes, releasing the writer for [`Conn::close`].
    pub(crate) async fn write(&self, message: &Message) -> Result<(), TrcError> {
        tokio::select! {
            biased;
            _ = self.closed() => Err(TrcError::Closed),
            result = async {
                let mut guard = self.writer.lock().await;
                match guard.as_mut() {
                    Some(writer) => write_message(writer, message).await,
                    None => Err(TrcError::Closed),
                }
            } => result,
        }
    }

    /// Marks the dispatch task as gone. Nothing will fill reply slots or
    /// signal subscribers from here on.
    pub(crate) fn stop_dispatch(&self) {
        self.dispatching.store(false, Ordering::SeqCst);
        self.pending.clear();
        self.notifier.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connect_pair, connect_pair_with, MockTrc};
    use serde_json::json;
    use srrs_protocol::MessageId;

    #[tokio::test]
    async fn test_accessors_after_handshake() {
        let (conn, _trc) = connect_pair().await;
        assert_eq!(conn.token().unwrap(), MockTrc::TOKEN);
        assert_eq!(conn.version(), ProtocolVersion::new(1, 0, 0));
        assert!(!conn.is_closed());
        assert_eq!(conn.pending_requests(), 0);
        assert_eq!(conn.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_token_not_configured() {
        let (conn, _trc) = connect_pair_with(ProtocolVersion::new(1, 0, 0), "1.0.0", None).await;
        assert!(matches!(conn.token(), Err(TrcError::NoToken)));
    }

    #[tokio::test]
    async fn test_version_downgraded() {
        let (conn, _trc) =
            connect_pair_with(ProtocolVersion::new(1, 2, 0), "1.7.1", Some("t")).await;
        assert_eq!(conn.version(), ProtocolVersion::new(1, 2, 0));
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let (conn, mut trc) = connect_pair().await;
        let ping = tokio::spawn({
            let conn = conn.clone();
            async move { conn.ping().await }
        });

        let req = trc.answer().await;
        assert_eq!(req.msg_type, MessageType::Ping);
        assert_eq!(req.parent_id, None);
        assert_eq!(req.payload, None);

        ping.await.unwrap().unwrap();
        assert_eq!(conn.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_auto_reply_to_probe() {
        let (_conn, mut trc) = connect_pair().await;
        let probe = Message::request(MessageType::Ping, None);
        trc.send(&probe).await;

        let reply = trc.recv().await;
        assert_eq!(reply.msg_type, MessageType::Ping);
        assert_eq!(reply.parent_id, Some(probe.message_id.clone()));
        assert_ne!(reply.message_id, probe.message_id);
    }

    #[tokio::test]
    async fn test_no_reply_to_ping_reply() {
        let (_conn, mut trc) = connect_pair().await;
        let stray = Message::new(MessageType::Ping, None, Some(MessageId::generate()));
        trc.send(&stray).await;

        let probe = Message::request(MessageType::Ping, None);
        trc.send(&probe).await;

        let reply = trc.recv().await;
        assert_eq!(reply.parent_id, Some(probe.message_id));
    }

    #[tokio::test]
    async fn test_state_updates_merge() {
        let (conn, mut trc) = connect_pair().await;
        trc.push_state(json!({"turtles": {"T1": {"batteryvoltage": 50}}}))
            .await;
        trc.push_state(json!({"turtles": {"T2": {"batteryvoltage": 80}}}))
            .await;
        trc.sync().await;

        let state = conn.state();
        assert_eq!(state.turtle("T1").unwrap().battery_voltage, 50);
        assert_eq!(state.turtle("T2").unwrap().battery_voltage, 80);
    }

    #[tokio::test]
    async fn test_notifications_coalesce() {
        let (conn, mut trc) = connect_pair().await;
        let mut sub = conn.subscribe_state_changes().unwrap();
        assert_eq!(conn.subscriber_count(), 1);

        for voltage in [10, 20, 30] {
            trc.push_state(json!({"turtles": {"T1": {"batteryvoltage": voltage}}}))
                .await;
        }
        trc.sync().await;

        assert!(sub.has_changed());
        assert!(!sub.has_changed());
        assert_eq!(conn.state().turtle("T1").unwrap().battery_voltage, 30);

        sub.unsubscribe();
        assert_eq!(conn.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_woken_by_update() {
        let (conn, mut trc) = connect_pair().await;
        let mut sub = conn.subscribe_state_changes().unwrap();

        trc.push_state(json!({"command": "start"})).await;
        assert!(tokio::time::timeout(Duration::from_secs(5), sub.changed())
            .await
            .unwrap());
        assert_eq!(conn.state().command, Some(Command::Start));
    }

    #[tokio::test]
    async fn test_set_command() {
        let (conn, mut trc) = connect_pair().await;
        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.set_command(Command::DroppedBall).await }
        });

        let req = trc.answer().await;
        assert_eq!(req.msg_type, MessageType::State);
        assert_eq!(req.payload, Some(json!({"command": "dropped_ball"})));
        call.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_set_turtle_state() {
        let (conn, mut trc) = connect_pair().await;
        let mut turtles = BTreeMap::new();
        turtles.insert(
            "T3".to_string(),
            TurtleState {
                battery_voltage: 42,
                ..TurtleState::default()
            },
        );
        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.set_turtle_state(turtles).await }
        });

        let req = trc.answer().await;
        assert_eq!(req.payload.unwrap()["turtles"]["T3"]["batteryvoltage"], 42);
        call.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_empty_turtle_state_rejected() {
        let (conn, mut trc) = connect_pair().await;
        assert!(matches!(
            conn.set_turtle_state(BTreeMap::new()).await,
            Err(TrcError::EmptyTurtleState)
        ));
        assert!(trc.recv_within(Duration::from_millis(50)).await.is_none());
        assert_eq!(conn.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_invalid_payload_not_sent() {
        let (conn, mut trc) = connect_pair().await;
        let state = State {
            command: None,
            turtles: Some(BTreeMap::new()),
        };
        assert!(matches!(
            conn.set_state(&state).await,
            Err(TrcError::Invalid(_))
        ));
        assert!(trc.recv_within(Duration::from_millis(50)).await.is_none());
    }

    #[tokio::test]
    async fn test_request_after_close_writes_nothing() {
        let (conn, mut trc) = connect_pair().await;
        conn.close().await.unwrap();

        assert!(matches!(
            conn.set_command(Command::Stop).await,
            Err(TrcError::Closed)
        ));
        assert!(matches!(conn.ping().await, Err(TrcError::Closed)));
        // The only thing left on the wire is end of stream.
        assert!(matches!(trc.next().await, Err(_)));
    }

    #[tokio::test]
    async fn test_concurrent_requests_correlated() {
        let (conn, mut trc) = connect_pair().await;
        let first = tokio::spawn({
            let conn = conn.clone();
            async move {
                conn.send_request(MessageType::State, &json!({"command": "start"}))
                    .await
            }
        });
        let second = tokio::spawn({
            let conn = conn.clone();
            async move {
                conn.send_request(MessageType::State, &json!({"command": "stop"}))
                    .await
            }
        });

        let a = trc.recv().await;
        let b = trc.recv().await;
        assert_ne!(a.message_id, b.message_id);

        // Answer in reverse order, echoing each request's payload.
        trc.send(&Message::new(MessageType::Ping, b.payload.clone(), Some(b.message_id.clone())))
            .await;
        trc.send(&Message::new(MessageType::Ping, a.payload.clone(), Some(a.message_id.clone())))
            .await;

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first, Some(json!({"command": "start"})));
        assert_eq!(second, Some(json!({"command": "stop"})));
        assert_eq!(conn.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_stops_dispatch() {
        let (conn, mut trc) = connect_pair().await;
        let mut errors = conn.errors().unwrap();
        assert!(conn.errors().is_none());

        trc.send_raw(br#"{"type":"bogus","message_id":"m1"}"#).await;

        let err = errors.recv().await.unwrap();
        assert!(matches!(err, TrcError::UnknownMessageType(ref t) if t == "bogus"));
        assert!(err.is_fatal());
        // The channel ends with the dispatch task.
        assert!(errors.recv().await.is_none());

        trc.push_state(json!({"command": "start"})).await;
        trc.send(&Message::request(MessageType::Ping, None)).await;
        assert!(trc.recv_within(Duration::from_millis(50)).await.is_none());
        assert_eq!(conn.state().command, None);
        assert!(matches!(conn.ping().await, Err(TrcError::Closed)));
        assert!(matches!(
            conn.subscribe_state_changes(),
            Err(TrcError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_malformed_record_is_fatal() {
        let (conn, mut trc) = connect_pair().await;
        let mut errors = conn.errors().unwrap();

        trc.send_raw(b"not json").await;

        let err = errors.recv().await.unwrap();
        assert!(matches!(err, TrcError::Protocol(_)));
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_field_is_fatal() {
        let (conn, mut trc) = connect_pair().await;
        let mut errors = conn.errors().unwrap();

        trc.send_raw(br#"{"type":"ping","message_id":"m1","extra":1}"#)
            .await;

        assert!(matches!(
            errors.recv().await.unwrap(),
            TrcError::Protocol(_)
        ));
    }

    #[tokio::test]
    async fn test_merge_failure_is_not_fatal() {
        let (conn, mut trc) = connect_pair().await;
        let mut errors = conn.errors().unwrap();

        trc.push_state(json!("not an object")).await;
        let err = errors.recv().await.unwrap();
        assert!(matches!(err, TrcError::StateMerge(_)));
        assert!(!err.is_fatal());

        trc.push_state(json!({"command": "go_in"})).await;
        trc.sync().await;
        assert_eq!(conn.state().command, Some(Command::GoIn));
    }

    #[tokio::test]
    async fn test_eof_after_close_not_reported() {
        let (conn, trc) = connect_pair().await;
        let mut errors = conn.errors().unwrap();

        conn.close().await.unwrap();
        drop(trc);

        let next = tokio::time::timeout(Duration::from_secs(5), errors.recv())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_eof_while_open_reported() {
        let (conn, trc) = connect_pair().await;
        let mut errors = conn.errors().unwrap();
        drop(trc);

        assert!(matches!(
            errors.recv().await.unwrap(),
            TrcError::Protocol(srrs_protocol::ProtocolError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (conn, _trc) = connect_pair().await;
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.is_closed());

        tokio::time::timeout(Duration::from_secs(1), conn.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let (conn, mut trc) = connect_pair().await;
        let closed = tokio::spawn({
            let conn = conn.clone();
            async move { conn.closed().await }
        });
        let ping = tokio::spawn({
            let conn = conn.clone();
            async move { conn.ping().await }
        });
        let mut sub = conn.subscribe_state_changes().unwrap();

        // Request is on the wire but never answered.
        trc.recv().await;
        assert_eq!(conn.pending_requests(), 1);

        conn.close().await.unwrap();
        assert!(matches!(ping.await.unwrap(), Err(TrcError::Closed)));
        closed.await.unwrap();
        assert!(!sub.changed().await);
        assert_eq!(conn.pending_requests(), 0);
        assert!(matches!(
            conn.subscribe_state_changes(),
            Err(TrcError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_unblocks_stalled_write() {
        let (stream, mut trc) = MockTrc::pair("1.0.0", Some(MockTrc::TOKEN)).await;
        let conn = Conn::establish(ProtocolVersion::new(1, 0, 0), stream)
            .await
            .unwrap();
        trc.recv().await;

        // TRC stops reading; the payload is far larger than the stream buffer.
        let pad = "x".repeat(256 * 1024);
        let request = tokio::spawn({
            let conn = conn.clone();
            async move {
                conn.send_request(MessageType::State, &json!({ "pad": pad }))
                    .await
            }
        });
        while conn.pending_requests() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!request.is_finished());

        tokio::time::timeout(Duration::from_secs(2), conn.close())
            .await
            .unwrap()
            .unwrap();
        assert!(conn.is_closed());

        let result = tokio::time::timeout(Duration::from_secs(2), request)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TrcError::Closed)));

        // The write half was shut down: TRC sees the cut-off line, then the end.
        assert!(trc.next().await.is_err());
    }

    #[tokio::test]
    async fn test_abandoned_request_deregisters() {
        let (conn, mut trc) = connect_pair().await;
        let result = tokio::time::timeout(Duration::from_millis(50), conn.ping()).await;
        assert!(result.is_err());
        assert_eq!(conn.pending_requests(), 0);

        // A late reply is discarded without disturbing the connection.
        let req = trc.recv().await;
        trc.send(&Message::reply_to(&req, None)).await;
        trc.sync().await;
        assert!(!conn.is_closed());
    }
}
