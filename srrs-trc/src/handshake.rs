//! Connection setup handshake.
//!
//! TRC speaks first: it sends a handshake request carrying the version it
//! wants and a session token. SRRS answers with the negotiated version.

use crate::error::TrcError;
use crate::wire::{write_message, MessageReader};
use srrs_protocol::{Handshake, Message, MessageType, ProtocolVersion};
use tokio::io::{AsyncRead, AsyncWrite};

/// Outcome of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub version: ProtocolVersion,
    pub token: Option<String>,
}

/// Reads TRC's handshake request and writes the reply.
pub async fn accept<R, W>(
    local: ProtocolVersion,
    reader: &mut MessageReader<R>,
    writer: &mut W,
) -> Result<Negotiated, TrcError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    tracing::debug!("Decoding handshake message...");
    let req = reader.next().await.map_err(|e| {
        TrcError::Handshake(format!("failed to decode handshake request message: {e}"))
    })?;
    tracing::debug!("Handshake message decoded successfully");

    if req.msg_type != MessageType::Handshake {
        return Err(TrcError::Handshake(format!(
            "expected message of type {}, got {}",
            MessageType::Handshake,
            req.msg_type
        )));
    }
    let Some(payload) = req.payload.clone() else {
        return Err(TrcError::Handshake(
            "received handshake payload is empty".to_string(),
        ));
    };

    let hs: Handshake = serde_json::from_value(payload)
        .map_err(|e| TrcError::Handshake(format!("failed to decode handshake: {e}")))?;

    let version = local
        .negotiate(&hs.version)
        .ok_or(TrcError::VersionMismatch {
            local,
            peer: hs.version,
        })?;

    let resp = Handshake {
        version,
        token: None,
    };
    let reply = Message::reply_to(&req, Some(serde_json::to_value(&resp)?));
    write_message(writer, &reply).await?;

    tracing::debug!(version = %version, "Handshake complete");
    Ok(Negotiated {
        version,
        token: hs.token,
    })
}
