//! Timer-driven rotation.
//!
//! The scheduler owns one background task per `start()`. The task ticks the
//! rotation and monitoring timers and exits as soon as the stop signal
//! fires, the engine is dropped, or the engine reports that its generation
//! is no longer the running one.

use std::sync::Weak;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::engine::Shared;

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Not started, or stopped
    Idle,
    /// Ticking on the rotation interval
    Running,
}

struct RunningTask {
    generation: u64,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Rotation scheduler.
pub(crate) struct RotationScheduler {
    rotation_interval: Duration,
    monitor_interval: Duration,
    generations: u64,
    running: Option<RunningTask>,
}

impl RotationScheduler {
    pub(crate) fn new(rotation_interval: Duration, monitor_interval: Duration) -> Self {
        Self {
            rotation_interval,
            monitor_interval,
            generations: 0,
            running: None,
        }
    }

    pub(crate) fn state(&self) -> SchedulerState {
        match self.running {
            Some(_) => SchedulerState::Running,
            None => SchedulerState::Idle,
        }
    }

    /// Reserve the generation number for the next run.
    pub(crate) fn next_generation(&mut self) -> u64 {
        self.generations += 1;
        self.generations
    }

    /// Spawn the tick loop for `generation` on `runtime`.
    pub(crate) fn spawn(&mut self, runtime: &Handle, engine: Weak<Shared>, generation: u64) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = runtime.spawn(run_ticker(
            engine,
            generation,
            self.rotation_interval,
            self.monitor_interval,
            stop_rx,
        ));

        self.running = Some(RunningTask {
            generation,
            stop_tx,
            handle,
        });
    }

    /// Signal the running task to stop. Returns the stopped generation.
    pub(crate) fn stop(&mut self) -> Option<u64> {
        let task = self.running.take()?;
        let _ = task.stop_tx.send(true);
        debug!(
            generation = task.generation,
            finished = task.handle.is_finished(),
            "stop signalled"
        );
        Some(task.generation)
    }
}

async fn run_ticker(
    engine: Weak<Shared>,
    generation: u64,
    rotation_interval: Duration,
    monitor_interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let now = Instant::now();
    let mut rotation = interval_at(now + rotation_interval, rotation_interval);
    rotation.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut monitor = interval_at(now + monitor_interval, monitor_interval);
    monitor.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        generation,
        rotation_interval = %humantime::format_duration(rotation_interval),
        "rotation scheduler running"
    );

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = rotation.tick() => {
                let Some(shared) = engine.upgrade() else { break };
                if !shared.rotation_tick(generation) {
                    break;
                }
            }
            _ = monitor.tick() => {
                let Some(shared) = engine.upgrade() else { break };
                if !shared.monitor_tick(generation) {
                    break;
                }
            }
        }
    }

    info!(generation, "rotation scheduler stopped");
}
