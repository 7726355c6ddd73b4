//! Liveness monitor.
//!
//! Pings TRC on a fixed interval. Each ping must complete before the next
//! tick is due; a failed or late ping closes the connection.

use crate::connection::Conn;
use crate::error::TrcError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Default interval between pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Monitors `conn` until it closes or stops answering.
///
/// Returns `Ok(())` when the connection was closed by someone else, and the
/// ping error after closing the connection itself.
pub async fn run(conn: Arc<Conn>, interval: Duration) -> Result<(), TrcError> {
    let mut next = Instant::now() + interval;
    loop {
        tokio::select! {
            _ = conn.closed() => return Ok(()),
            _ = tokio::time::sleep_until(next) => {}
        }
        next += interval;

        let result = match tokio::time::timeout_at(next, conn.ping()).await {
            Ok(result) => result,
            Err(_) => Err(TrcError::Timeout),
        };
        if let Err(e) = result {
            if conn.is_closed() {
                return Ok(());
            }
            tracing::error!(error = %e, "Liveness ping failed, closing connection");
            conn.close().await?;
            return Err(e);
        }
        tracing::debug!("Liveness ping succeeded");
    }
}

/// Spawns [`run`] on the current runtime.
pub fn spawn(conn: Arc<Conn>, interval: Duration) -> JoinHandle<Result<(), TrcError>> {
    tokio::spawn(run(conn, interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::connect_pair;
    use srrs_protocol::MessageType;

    const INTERVAL: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_answered_pings_keep_connection() {
        let (conn, mut trc) = connect_pair().await;
        let monitor = spawn(conn.clone(), INTERVAL);

        for _ in 0..3 {
            let req = trc.answer().await;
            assert_eq!(req.msg_type, MessageType::Ping);
        }
        assert!(!conn.is_closed());

        conn.close().await.unwrap();
        assert!(monitor.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unanswered_ping_closes() {
        let (conn, mut trc) = connect_pair().await;
        let monitor = spawn(conn.clone(), INTERVAL);

        trc.answer().await;
        // Read the next ping but leave it unanswered.
        trc.recv().await;

        let result = tokio::time::timeout(Duration::from_secs(5), monitor)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TrcError::Timeout)));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_stops_when_closed() {
        let (conn, _trc) = connect_pair().await;
        let monitor = spawn(conn.clone(), Duration::from_secs(60));

        conn.close().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), monitor)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
