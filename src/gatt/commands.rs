//! Single-flight serialization of GATT commands.
//!
//! A BLE link services one outstanding request at a time; firing a second
//! read or write while the first is pending gets it silently dropped by
//! most stacks. [`CommandRunner`] forces every exchange through one fair
//! mutex, so commands run strictly in arrival order, each bounded by its
//! own deadline. The deadline starts when the command reaches the front
//! of the queue, not while it is still waiting behind others.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CommandError;

/// Default per-command deadline.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(5000);

/// Label and deadline for one serialized command.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub label: String,
    pub timeout: Duration,
}

impl CommandContext {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(label: impl Into<String>, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            timeout,
        }
    }
}

/// Runs async GATT exchanges one at a time.
///
/// The tokio mutex queues waiters fairly, so callers proceed in the order
/// they called [`run`](Self::run). The guard is held for the whole
/// action and released on every exit path, success, failure, timeout or
/// cancellation alike.
#[derive(Debug, Default)]
pub struct CommandRunner {
    lock: Mutex<()>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access, then drives `action` to completion
    /// under the context's deadline.
    ///
    /// A deadline miss aborts the action (its future is dropped) and
    /// returns [`CommandError::Timeout`]; no retry happens here, that
    /// policy belongs to the caller.
    pub async fn run<T>(
        &self,
        ctx: CommandContext,
        action: impl Future<Output = Result<T, CommandError>>,
    ) -> Result<T, CommandError> {
        debug!(label = %ctx.label, "command queued");
        let _guard = self.lock.lock().await;
        debug!(label = %ctx.label, "command started");

        match tokio::time::timeout(ctx.timeout, action).await {
            Ok(Ok(value)) => {
                debug!(label = %ctx.label, "command completed");
                Ok(value)
            }
            Ok(Err(err)) => {
                warn!(label = %ctx.label, error = %err, "command failed");
                Err(err)
            }
            Err(_) => {
                warn!(label = %ctx.label, timeout = ?ctx.timeout, "command timed out");
                Err(CommandError::Timeout {
                    label: ctx.label,
                    timeout: ctx.timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    #[tokio::test]
    async fn actions_never_overlap() {
        let runner = Arc::new(CommandRunner::new());
        let in_flight = Arc::new(AtomicUsize::new(0));

        let exchange = |runner: Arc<CommandRunner>, in_flight: Arc<AtomicUsize>| async move {
            runner
                .run(CommandContext::new("probe"), async move {
                    let concurrent = in_flight.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(concurrent, 0, "two commands ran at once");
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
        };

        let (a, b) = tokio::join!(
            exchange(runner.clone(), in_flight.clone()),
            exchange(runner.clone(), in_flight.clone())
        );
        a.unwrap();
        b.unwrap();
    }

    #[tokio::test]
    async fn commands_complete_in_arrival_order() {
        let runner = Arc::new(CommandRunner::new());
        let order = Arc::new(AsyncMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for n in 0..3 {
            let runner = runner.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                runner
                    .run(CommandContext::new(format!("cmd-{n}")), async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        order.lock().await.push(n);
                        Ok(())
                    })
                    .await
            }));
            // give each task time to reach the lock queue before the next
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn deadline_miss_reports_timeout_with_label() {
        let runner = CommandRunner::new();
        let err = runner
            .run(
                CommandContext::with_timeout("slow", Duration::from_millis(20)),
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
            )
            .await
            .unwrap_err();
        match err {
            CommandError::Timeout { label, timeout } => {
                assert_eq!(label, "slow");
                assert_eq!(timeout, Duration::from_millis(20));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_releases_the_lock_for_the_next_command() {
        let runner = CommandRunner::new();
        let _ = runner
            .run(
                CommandContext::with_timeout("stuck", Duration::from_millis(10)),
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
            )
            .await;
        runner
            .run(CommandContext::new("after"), async { Ok(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn action_error_passes_through() {
        let runner = CommandRunner::new();
        let err = runner
            .run(CommandContext::new("failing"), async {
                Err::<(), _>(CommandError::from(
                    crate::error::TransportError::NotConnected,
                ))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Transport(_)));
    }
}
