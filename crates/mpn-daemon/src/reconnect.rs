use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::Exit;
use crate::mpd::Transport;

/// Pause between two connection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Exit code used when the server cannot be reached and we are not persisting.
pub const EXIT_CONNECTION_LOST: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Reconnect,
    Terminate(i32),
}

/// What to do when the connection goes away.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    persist: bool,
    delay: Duration,
    /// When the last successful connection was made.
    connected_at: Option<Instant>,
}

impl ReconnectPolicy {
    pub fn new(persist: bool) -> Self {
        Self {
            persist,
            delay: RECONNECT_DELAY,
            connected_at: None,
        }
    }

    pub fn on_disconnect(&self) -> Action {
        if self.persist {
            Action::Reconnect
        } else {
            Action::Terminate(EXIT_CONNECTION_LOST)
        }
    }

    /// Connect, retrying every [`RECONNECT_DELAY`] while persisting.
    ///
    /// Attempts are never closer than the delay, counting from the previous
    /// successful connection, so a server that drops us right after the
    /// greeting is not hammered.  The very first attempt is immediate.  A
    /// shutdown request interrupts the wait and ends with a clean exit.
    pub async fn establish<T: Transport>(
        &mut self,
        transport: &mut T,
        shutdown: &CancellationToken,
    ) -> Result<(), Exit> {
        let mut not_before = self.connected_at.take().map(|at| at + self.delay);
        loop {
            if let Some(deadline) = not_before.take() {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = shutdown.cancelled() => {}
                }
            }
            if shutdown.is_cancelled() {
                warn!("mpd: shutdown requested while reconnecting");
                return Err(Exit(0));
            }

            match transport.connect().await {
                Ok(()) => {
                    self.connected_at = Some(Instant::now());
                    return Ok(());
                }
                Err(e) => error!("mpd: failed to connect: {}", e),
            }

            if let Action::Terminate(code) = self.on_disconnect() {
                return Err(Exit(code));
            }

            info!("mpd: retrying in {}s", self.delay.as_secs());
            not_before = Some(Instant::now() + self.delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::MockTransport;

    #[test]
    fn test_policy_actions() {
        assert_eq!(ReconnectPolicy::new(true).on_disconnect(), Action::Reconnect);
        assert_eq!(
            ReconnectPolicy::new(false).on_disconnect(),
            Action::Terminate(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_is_immediate() {
        let mut transport = MockTransport::new();
        let start = tokio::time::Instant::now();
        ReconnectPolicy::new(true)
            .establish(&mut transport, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(transport.log.borrow().connect_times.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_persist_gives_up_once() {
        let mut transport = MockTransport::new();
        transport.refuse_connections(usize::MAX);
        let result = ReconnectPolicy::new(false)
            .establish(&mut transport, &CancellationToken::new())
            .await;
        assert_eq!(result, Err(Exit(1)));
        assert_eq!(transport.log.borrow().connect_times.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_retries_every_five_seconds() {
        let mut transport = MockTransport::new();
        transport.refuse_connections(3);
        let start = tokio::time::Instant::now();
        ReconnectPolicy::new(true)
            .establish(&mut transport, &CancellationToken::new())
            .await
            .unwrap();

        let offsets: Vec<Duration> = transport
            .log
            .borrow()
            .connect_times
            .iter()
            .map(|t| *t - start)
            .collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(15),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let mut transport = MockTransport::new();
        transport.refuse_connections(usize::MAX);
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            trigger.cancel();
        });
        let result = ReconnectPolicy::new(true)
            .establish(&mut transport, &shutdown)
            .await;
        assert_eq!(result, Err(Exit(0)));
        assert_eq!(transport.log.borrow().connect_times.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_lived_session_waits_before_reconnecting() {
        let mut transport = MockTransport::new();
        let mut policy = ReconnectPolicy::new(true);
        let shutdown = CancellationToken::new();
        let start = tokio::time::Instant::now();

        policy.establish(&mut transport, &shutdown).await.unwrap();
        policy.establish(&mut transport, &shutdown).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        policy.establish(&mut transport, &shutdown).await.unwrap();

        let offsets: Vec<Duration> = transport
            .log
            .borrow()
            .connect_times
            .iter()
            .map(|t| *t - start)
            .collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_secs(5),
                Duration::from_secs(65),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_attempt_after_shutdown() {
        let mut transport = MockTransport::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let result = ReconnectPolicy::new(true)
            .establish(&mut transport, &shutdown)
            .await;
        assert_eq!(result, Err(Exit(0)));
        assert!(transport.log.borrow().connect_times.is_empty());
    }
}
