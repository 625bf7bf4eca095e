use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Process lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    /// Stop signal received; components are winding down
    Draining,
    Terminated,
}

/// Broadcasts shutdown to every long-running component.
///
/// Components hold a receiver from [`Shutdown::subscribe`] and exit once the
/// state leaves `Running`.
pub struct Shutdown {
    state: watch::Sender<State>,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(State::Running);
        Arc::new(Self { state })
    }

    /// Get current state
    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// Start draining (called on SIGTERM/SIGINT)
    pub fn start_drain(&self) {
        if self.state() != State::Running {
            return;
        }
        info!("starting graceful shutdown");
        self.state.send_replace(State::Draining);
    }

    /// Complete shutdown
    pub fn terminate(&self) {
        if self.state() == State::Terminated {
            return;
        }
        info!("shutdown complete");
        self.state.send_replace(State::Terminated);
    }

    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }
}

/// Resolves once `rx` reports a non-running state.
pub async fn wait_for_drain(mut rx: watch::Receiver<State>) {
    // A dropped sender also means shutdown
    let _ = rx.wait_for(|state| *state != State::Running).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_shutdown_state_machine() {
        let shutdown = Shutdown::new();
        assert_eq!(shutdown.state(), State::Running);
        assert!(shutdown.is_running());

        shutdown.start_drain();
        assert_eq!(shutdown.state(), State::Draining);
        assert!(!shutdown.is_running());

        // Draining twice is a no-op
        shutdown.start_drain();
        assert_eq!(shutdown.state(), State::Draining);

        shutdown.terminate();
        assert_eq!(shutdown.state(), State::Terminated);
    }

    #[tokio::test]
    async fn test_subscribers_observe_drain() {
        let shutdown = Shutdown::new();
        let waiter = tokio::spawn(wait_for_drain(shutdown.subscribe()));

        shutdown.start_drain();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter did not observe drain")
            .unwrap();
    }
}
