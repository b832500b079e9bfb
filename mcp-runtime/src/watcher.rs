use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::bridge::ToolBridge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    Refreshed,
    Failed,
}

/// One watcher tick: read the backend build and refresh when it differs
/// from `last_build`. `last_build` only advances after a successful
/// refresh, so a failed cycle is retried on the next tick.
pub async fn poll_once(bridge: &ToolBridge, last_build: &mut Option<String>) -> PollOutcome {
    let version = match bridge
        .backend()
        .fetch_version(bridge.config().version_timeout)
        .await
    {
        Ok(version) => version,
        Err(err) => {
            tracing::warn!(
                event = "version_poll_failed",
                error = %err,
                "backend version poll failed"
            );
            return PollOutcome::Failed;
        }
    };

    if last_build.as_deref() == Some(version.build.as_str()) {
        return PollOutcome::Unchanged;
    }

    tracing::info!(
        event = "backend_build_changed",
        previous = last_build.as_deref().unwrap_or("none"),
        current = %version.build,
        "backend build changed; refreshing catalog"
    );

    match bridge.refresh_with_build(Some(version.build.clone())).await {
        Ok(_) => {
            *last_build = Some(version.build);
            PollOutcome::Refreshed
        }
        Err(_) => PollOutcome::Failed,
    }
}

/// Background poller. Stopping cancels the loop, including an in-flight
/// poll, without waiting for it.
#[derive(Debug)]
pub struct RefreshWatcher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RefreshWatcher {
    pub fn spawn(bridge: Arc<ToolBridge>, initial_build: Option<String>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut last_build = initial_build;
            let mut ticker = tokio::time::interval(bridge.config().poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            if last_build.is_some() {
                // already loaded at this build; skip the immediate tick
                ticker.tick().await;
            }

            tracing::info!(
                event = "refresh_watcher_started",
                interval_secs = bridge.config().poll_interval.as_secs(),
                "refresh watcher started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = async {
                        ticker.tick().await;
                        poll_once(&bridge, &mut last_build).await
                    } => {}
                }
            }
        });
        Self { cancel, handle }
    }

    /// Safe to call any number of times, from any thread.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RefreshWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
