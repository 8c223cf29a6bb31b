use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info};

use crate::error::{ClaimStoreError, Result};

/// One unit of scheduled work.
#[async_trait]
pub trait CycleRunner: Send + Sync + 'static {
    /// Run a cycle to completion and return how long to wait before the next.
    /// An error means the runner itself is broken; the scheduler stops.
    async fn run_cycle(&self) -> Result<Duration>;
}

struct Running {
    shutdown: CancellationToken,
    done: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

enum Lifecycle {
    Idle,
    Running(Running),
    /// Stop was requested; `done` fires once the last cycle has returned.
    Stopping { done: CancellationToken },
}

impl Lifecycle {
    fn is_active(&self) -> bool {
        match self {
            Self::Idle => false,
            Self::Running(running) => !running.handle.is_finished(),
            Self::Stopping { done } => !done.is_cancelled(),
        }
    }

    fn done(&self) -> Option<CancellationToken> {
        match self {
            Self::Idle => None,
            Self::Running(running) => Some(running.done.clone()),
            Self::Stopping { done } => Some(done.clone()),
        }
    }
}

/// Drives a [`CycleRunner`] in a loop: run, then sleep, then run again.
///
/// The next cycle is armed only after the previous one returns, so cycles
/// never overlap however long they take. The first cycle starts immediately.
/// A stopped scheduler cannot be started again until its last cycle is over.
pub struct CollectionScheduler {
    runner: Arc<dyn CycleRunner>,
    state: Mutex<Lifecycle>,
}

impl CollectionScheduler {
    pub fn new(runner: Arc<dyn CycleRunner>) -> Self {
        Self {
            runner,
            state: Mutex::new(Lifecycle::Idle),
        }
    }

    /// True while a loop or a stopping loop's final cycle is still executing.
    pub fn is_running(&self) -> bool {
        self.state.lock().is_active()
    }

    /// Spawn the loop on the current tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_active() {
            return Err(ClaimStoreError::SchedulerAlreadyRunning);
        }

        let shutdown = CancellationToken::new();
        let done = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.runner.clone(),
            shutdown.clone(),
            done.clone().drop_guard(),
        ));
        *state = Lifecycle::Running(Running {
            shutdown,
            done,
            handle,
        });
        info!("collection scheduler started");
        Ok(())
    }

    /// Cancel the pending wait and prevent any further cycle.
    ///
    /// A cycle already in flight runs to completion; await the returned
    /// handle to observe it. Returns `None` when nothing was running.
    pub fn stop(&self) -> Option<JoinHandle<Result<()>>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, Lifecycle::Idle) {
            Lifecycle::Running(running) => {
                running.shutdown.cancel();
                *state = Lifecycle::Stopping {
                    done: running.done,
                };
                Some(running.handle)
            }
            other => {
                *state = other;
                None
            }
        }
    }

    /// [`stop`](Self::stop), then wait for the loop and surface its result.
    pub async fn shutdown(&self) -> Result<()> {
        match self.stop() {
            Some(handle) => handle
                .await
                .map_err(|e| ClaimStoreError::TaskFailed(e.to_string()))?,
            None => Ok(()),
        }
    }

    /// Resolves once the loop has exited, whether stopped or failed.
    pub async fn stopped(&self) {
        let done = self.state.lock().done();
        if let Some(done) = done {
            done.cancelled().await;
        }
    }
}

async fn run_loop(
    runner: Arc<dyn CycleRunner>,
    shutdown: CancellationToken,
    _done: DropGuard,
) -> Result<()> {
    while !shutdown.is_cancelled() {
        let delay = match runner.run_cycle().await {
            Ok(delay) => delay,
            Err(e) => {
                error!(fatal = true, error = %e, "collection cycle failed, stopping scheduler");
                return Err(e);
            }
        };

        if shutdown.is_cancelled() {
            break;
        }
        debug!(delay_ms = delay.as_millis() as u64, "next collection cycle armed");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!("collection scheduler stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    struct ScriptedRunner {
        work: Duration,
        interval: Duration,
        fail_on: Option<usize>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        spans: parking_lot::Mutex<Vec<(Instant, Instant)>>,
    }

    impl ScriptedRunner {
        fn new(work: Duration, interval: Duration) -> Arc<Self> {
            Self::failing(work, interval, None)
        }

        fn failing(work: Duration, interval: Duration, fail_on: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                work,
                interval,
                fail_on,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                spans: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn spans(&self) -> Vec<(Instant, Instant)> {
            self.spans.lock().clone()
        }
    }

    #[async_trait]
    impl CycleRunner for ScriptedRunner {
        async fn run_cycle(&self) -> Result<Duration> {
            let begun = Instant::now();
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let cycle = {
                let mut spans = self.spans.lock();
                spans.push((begun, Instant::now()));
                spans.len()
            };
            if self.fail_on == Some(cycle) {
                return Err(ClaimStoreError::TaskFailed("disk on fire".into()));
            }
            Ok(self.interval)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_never_overlap_and_wait_from_completion() {
        let runner = ScriptedRunner::new(Duration::from_secs(3), Duration::from_secs(1));
        let scheduler = CollectionScheduler::new(runner.clone());
        let t0 = Instant::now();

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        scheduler.shutdown().await.unwrap();

        let spans = runner.spans();
        assert!(spans.len() >= 4, "only {} cycles ran", spans.len());
        assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);
        assert!(spans[0].0 - t0 < Duration::from_millis(5), "first cycle must run immediately");

        for pair in spans.windows(2) {
            let (_, previous_end) = pair[0];
            let (next_start, _) = pair[1];
            let gap = next_start - previous_end;
            assert!(
                gap >= Duration::from_secs(1) && gap < Duration::from_millis(1005),
                "gap between cycles was {gap:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_cycle_lets_it_finish_without_rearming() {
        let runner = ScriptedRunner::new(Duration::from_secs(5), Duration::from_secs(1));
        let scheduler = CollectionScheduler::new(runner.clone());

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runner.active.load(Ordering::SeqCst), 1);

        let handle = scheduler.stop().expect("scheduler was running");
        handle.await.unwrap().unwrap();
        assert_eq!(runner.spans().len(), 1, "in-flight cycle completes");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runner.spans().len(), 1, "no cycle after stop");
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_while_cycle_in_flight_does_not_overlap() {
        let runner = ScriptedRunner::new(Duration::from_secs(5), Duration::from_secs(1));
        let scheduler = CollectionScheduler::new(runner.clone());

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let handle = scheduler.stop().expect("scheduler was running");

        assert!(scheduler.is_running(), "final cycle still executing");
        assert!(matches!(
            scheduler.start(),
            Err(ClaimStoreError::SchedulerAlreadyRunning)
        ));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);

        handle.await.unwrap().unwrap();
        scheduler.stopped().await;
        assert!(!scheduler.is_running());

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runner.active.load(Ordering::SeqCst), 1);
        scheduler.shutdown().await.unwrap();

        assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(runner.spans().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_safe_before_start_and_when_repeated() {
        let runner = ScriptedRunner::new(Duration::from_millis(10), Duration::from_secs(1));
        let scheduler = CollectionScheduler::new(runner.clone());

        assert!(scheduler.stop().is_none());
        scheduler.shutdown().await.unwrap();

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        scheduler.shutdown().await.unwrap();
        scheduler.shutdown().await.unwrap();
        assert!(scheduler.stop().is_none());
        scheduler.stopped().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_rejected_but_restart_after_stop_works() {
        let runner = ScriptedRunner::new(Duration::from_millis(10), Duration::from_secs(1));
        let scheduler = CollectionScheduler::new(runner.clone());

        scheduler.start().unwrap();
        assert!(matches!(
            scheduler.start(),
            Err(ClaimStoreError::SchedulerAlreadyRunning)
        ));
        scheduler.shutdown().await.unwrap();

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_cycle_error_ends_the_loop_and_reaches_the_host() {
        let runner =
            ScriptedRunner::failing(Duration::from_millis(10), Duration::from_secs(1), Some(2));
        let scheduler = CollectionScheduler::new(runner.clone());

        scheduler.start().unwrap();
        scheduler.stopped().await;
        assert!(!scheduler.is_running());

        let err = scheduler.shutdown().await.unwrap_err();
        assert!(matches!(err, ClaimStoreError::TaskFailed(_)));
        assert_eq!(runner.spans().len(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runner.spans().len(), 2);
    }
}
