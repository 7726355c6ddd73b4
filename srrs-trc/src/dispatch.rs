//! Inbound message dispatch.
//!
//! One task per connection reads the stream in order and routes every
//! message: pings are answered, state updates are merged and announced, and
//! replies are handed to the request waiting for them.

use crate::connection::Conn;
use crate::error::TrcError;
use crate::wire::MessageReader;
use srrs_protocol::{Message, MessageType};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::mpsc::UnboundedSender;

/// Runs until the connection is closed or a fatal error occurs.
///
/// Fatal errors are sent on `errors` before returning. A read failure after
/// the connection was closed is expected and not reported.
pub(crate) async fn run<R>(
    conn: Arc<Conn>,
    mut reader: MessageReader<R>,
    errors: UnboundedSender<TrcError>,
) where
    R: AsyncRead + Unpin,
{
    tracing::debug!("Dispatch loop started");
    loop {
        let next = tokio::select! {
            biased;
            _ = conn.closed() => break,
            next = reader.next() => next,
        };

        let message = match next {
            Ok(message) => message,
            Err(e) => {
                if conn.is_closed() {
                    tracing::debug!(error = %e, "Read failed after close");
                } else {
                    tracing::debug!(error = %e, "Failed to decode message");
                    let _ = errors.send(e);
                }
                break;
            }
        };

        if let Err(e) = dispatch(&conn, message, &errors).await {
            let _ = errors.send(e);
            break;
        }
    }

    conn.stop_dispatch();
    tracing::debug!("Dispatch loop stopped");
}

async fn dispatch(
    conn: &Conn,
    message: Message,
    errors: &UnboundedSender<TrcError>,
) -> Result<(), TrcError> {
    match &message.msg_type {
        MessageType::Ping => {
            // A ping with a parent is itself a reply.
            if message.parent_id.is_none() {
                let reply = Message::reply_to(&message, None);
                tracing::debug!(parent_id = %message.message_id, "Replying to ping");
                match conn.write(&reply).await {
                    Ok(()) => {}
                    Err(TrcError::Closed) if conn.is_closed() => return Ok(()),
                    Err(e) => {
                        let _ = errors.send(TrcError::PingReply(Box::new(e)));
                    }
                }
            }
        }
        MessageType::State => {
            if let Some(payload) = &message.payload {
                match conn.store.apply(payload) {
                    Ok(_) => {
                        conn.notifier.notify();
                    }
                    Err(e) => {
                        let _ = errors.send(TrcError::StateMerge(e));
                    }
                }
            }
        }
        other => {
            tracing::warn!(msg_type = %other, "Unmatched message received");
            return Err(TrcError::UnknownMessageType(other.to_string()));
        }
    }

    if message.parent_id.is_some() {
        conn.pending.deliver(message);
    }
    Ok(())
}
