//! Run control and progress reporting.
//!
//! [`RunControl`] is a cloneable handle shared between the orchestrator and
//! whoever drives it. Pause and stop requests are honoured at item and
//! batch boundaries; in-flight work always finishes.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::types::run::{ProgressEvent, RunState};

struct ControlInner {
    stop: CancellationToken,
    paused: watch::Sender<bool>,
    state: Mutex<RunState>,
}

/// Shared pause/resume/stop handle for one run.
#[derive(Clone)]
pub struct RunControl {
    inner: Arc<ControlInner>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(ControlInner {
                stop: CancellationToken::new(),
                paused,
                state: Mutex::new(RunState::Idle),
            }),
        }
    }

    /// Ask the run to pause at the next boundary.
    pub fn pause(&self) {
        info!("Pause requested");
        self.inner.paused.send_replace(true);
    }

    pub fn resume(&self) {
        info!("Resume requested");
        self.inner.paused.send_replace(false);
    }

    /// Ask the run to stop at the next boundary. Also releases a pause.
    pub fn stop(&self) {
        info!("Stop requested");
        self.inner.stop.cancel();
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_cancelled()
    }

    /// Current orchestrator state.
    pub fn state(&self) -> RunState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token cancelled when a stop is requested.
    pub fn stop_token(&self) -> CancellationToken {
        self.inner.stop.clone()
    }

    /// Move the state machine to `next`.
    pub(crate) fn transition(&self, next: RunState) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == next {
            return Ok(());
        }
        if !state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        debug!(from = %*state, to = %next, "Run state transition");
        *state = next;
        Ok(())
    }

    /// Wait while paused.
    ///
    /// Returns `false` if a stop was requested before or during the wait.
    pub(crate) async fn wait_if_paused(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        if !self.is_paused() {
            return true;
        }

        let mut paused = self.inner.paused.subscribe();
        tokio::select! {
            _ = self.inner.stop.cancelled() => false,
            resumed = paused.wait_for(|p| !*p) => resumed.is_ok() && !self.is_stopped(),
        }
    }
}

/// Receives progress events from the orchestrator.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressReporter for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Logs progress events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        info!(
            stage = %event.stage,
            current = event.current,
            total = event.total,
            "Progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transitions_are_validated() {
        let control = RunControl::new();
        assert_eq!(control.state(), RunState::Idle);

        assert!(matches!(
            control.transition(RunState::Processing),
            Err(PipelineError::InvalidTransition { .. })
        ));
        control.transition(RunState::Acquiring).unwrap();
        control.transition(RunState::Completed).unwrap();
        assert!(control.transition(RunState::Acquiring).is_err());
    }

    #[tokio::test]
    async fn test_resume_releases_waiter() {
        let control = RunControl::new();
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_if_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        control.resume();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_releases_paused_waiter() {
        let control = RunControl::new();
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_if_paused().await })
        };
        control.stop();

        assert!(!waiter.await.unwrap());
    }

    #[test]
    fn test_closure_reporter() {
        let seen = std::sync::Mutex::new(Vec::new());
        let reporter = |event: &ProgressEvent| seen.lock().unwrap().push(event.current);

        reporter.on_progress(&ProgressEvent {
            stage: RunState::Processing,
            current: 3,
            total: 10,
        });

        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }
}
