//! Reconciliation loop
//!
//! Once per tick every stream that is not resting offline is reconciled on
//! its own task: intended state (persisted record plus schedule window) is
//! compared with what the supervisor tracks, and the difference is closed by
//! starting, stopping or resetting the stream. A stream that overruns the
//! per-stream deadline keeps running in the background and does not hold up
//! the rest of the tick.
//!
//! Manual override policy: a stream an operator forced live outside its
//! window keeps broadcasting until the operator stops it. The tick only rolls
//! its materialized window forward.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::StreamEngine;
use crate::errors::AppResult;
use crate::models::{LifecycleState, LifecycleUpdate, Stream, WindowPhase};
use crate::notifications::{HealReason, StartTrigger, StopReason, StreamEvent};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    pub started: usize,
    pub stopped: usize,
    pub healed: usize,
    pub failed: usize,
    /// Streams still reconciling when the deadline passed
    pub deferred: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ReconcileOutcome {
    started: bool,
    stopped: bool,
    healed: bool,
}

impl TickReport {
    fn record(&mut self, outcome: ReconcileOutcome) {
        self.started += usize::from(outcome.started);
        self.stopped += usize::from(outcome.stopped);
        self.healed += usize::from(outcome.healed);
    }
}

pub struct ReconciliationLoop {
    engine: Arc<StreamEngine>,
    tick_interval: Duration,
    reconcile_deadline: Duration,
}

impl ReconciliationLoop {
    pub fn new(
        engine: Arc<StreamEngine>,
        tick_interval: Duration,
        reconcile_deadline: Duration,
    ) -> Self {
        Self {
            engine,
            tick_interval,
            reconcile_deadline,
        }
    }

    /// Tick until cancelled. The first tick runs immediately.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        info!("Starting reconciliation loop (interval {:?})", self.tick_interval);
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    debug!("Tick complete: {:?}", report);
                }
                _ = cancellation_token.cancelled() => {
                    info!("Reconciliation loop received cancellation signal, shutting down");
                    break;
                }
            }
        }
    }

    pub async fn tick(&self) -> TickReport {
        let stream_ids = match self.engine.store().list_reconcilable().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to list streams for reconciliation: {}", e);
                return TickReport::default();
            }
        };

        let mut report = TickReport {
            examined: stream_ids.len(),
            ..TickReport::default()
        };

        let tasks = stream_ids.into_iter().map(|stream_id| {
            let engine = self.engine.clone();
            let deadline = self.reconcile_deadline;
            async move {
                let handle =
                    tokio::spawn(async move { reconcile_stream(&engine, stream_id).await });
                (stream_id, tokio::time::timeout(deadline, handle).await)
            }
        });

        for (stream_id, result) in join_all(tasks).await {
            match result {
                Ok(Ok(Ok(outcome))) => report.record(outcome),
                Ok(Ok(Err(e))) => {
                    report.failed += 1;
                    if e.is_transient() {
                        warn!(
                            "stream_id={} status=reconcile_failed retry=next_tick error={}",
                            stream_id, e
                        );
                    } else {
                        error!("stream_id={} status=reconcile_failed error={}", stream_id, e);
                    }
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!("stream_id={} status=reconcile_panicked error={}", stream_id, e);
                }
                Err(_) => {
                    report.deferred += 1;
                    warn!(
                        "stream_id={} status=reconcile_deadline_exceeded deadline={:?}",
                        stream_id, self.reconcile_deadline
                    );
                }
            }
        }

        if report.started + report.stopped + report.healed + report.failed > 0 {
            info!(
                "Tick: examined={} started={} stopped={} healed={} failed={} deferred={}",
                report.examined,
                report.started,
                report.stopped,
                report.healed,
                report.failed,
                report.deferred
            );
        }
        report
    }
}

async fn reconcile_stream(
    engine: &StreamEngine,
    stream_id: Uuid,
) -> AppResult<ReconcileOutcome> {
    let _lock = engine.locks().acquire(stream_id).await;
    let mut outcome = ReconcileOutcome::default();

    // Re-read under the lock; an operator action may have changed it
    let Some(mut stream) = engine.store().find_stream(stream_id).await? else {
        return Ok(outcome);
    };
    let running = engine.supervisor().is_running(stream_id).await;

    if stream.heal_pending {
        outcome.healed = true;
        engine.notifier().emit(StreamEvent::AutoHeal {
            stream_id,
            reason: HealReason::Crash,
        });
        // An override keeps broadcasting regardless of its window
        if stream.schedule.is_manual() || stream.manual_override {
            engine
                .launch(&stream, stream.manual_override, StartTrigger::AutoHeal)
                .await?;
            outcome.started = true;
            return Ok(outcome);
        }
        reset_to_scheduled(engine, &mut stream).await?;
    } else if stream.state == LifecycleState::Live && !running {
        outcome.healed = true;
        warn!(
            "stream_id={} status=zombie persisted live with no tracked process",
            stream_id
        );
        // Sweeps whatever an earlier instance may have left on the destination
        engine.supervisor().stop(stream_id, true).await?;
        engine.notifier().emit(StreamEvent::AutoHeal {
            stream_id,
            reason: HealReason::Zombie,
        });
        if stream.schedule.is_manual() {
            engine
                .store()
                .update_lifecycle(stream_id, LifecycleUpdate::state(LifecycleState::Offline))
                .await?;
            return Ok(outcome);
        }
        reset_to_scheduled(engine, &mut stream).await?;
    }

    if stream.schedule.is_manual() || stream.state == LifecycleState::Offline {
        return Ok(outcome);
    }

    let now = engine.now();
    let evaluation = engine.evaluate(&stream.schedule);

    if stream.state == LifecycleState::ManualOverride {
        let window_open = stream
            .window()
            .map(|w| w.phase(now) != WindowPhase::Closed)
            .unwrap_or(false);
        if window_open {
            return Ok(outcome);
        }
        info!("stream_id={} manual override window closed, rescheduling", stream_id);
        reset_to_scheduled(engine, &mut stream).await?;
    }

    let phase = stream
        .window()
        .map(|w| w.phase(now))
        .unwrap_or(WindowPhase::Closed);

    match phase {
        WindowPhase::Active => {
            if !running {
                engine.launch(&stream, false, StartTrigger::Schedule).await?;
                outcome.started = true;
            } else if stream.state != LifecycleState::Live {
                // A start whose caller went away before persisting
                engine
                    .store()
                    .update_lifecycle(stream_id, LifecycleUpdate::live(stream.manual_override))
                    .await?;
            }
        }
        WindowPhase::Upcoming | WindowPhase::Closed => {
            if running && stream.manual_override {
                if phase == WindowPhase::Closed && stream.window() != evaluation.next_window {
                    debug!(
                        "stream_id={} override keeps running, rolling window forward",
                        stream_id
                    );
                    engine
                        .store()
                        .update_lifecycle(
                            stream_id,
                            LifecycleUpdate::live(true).with_window(evaluation.next_window),
                        )
                        .await?;
                }
                return Ok(outcome);
            }

            if running {
                engine.supervisor().stop(stream_id, true).await?;
                engine.notifier().emit(StreamEvent::Stopped {
                    stream_id,
                    reason: StopReason::WindowClosed,
                });
                outcome.stopped = true;
            }

            let needs_update = running
                || stream.state != LifecycleState::Scheduled
                || stream.manual_override
                || stream.window() != evaluation.next_window;
            if needs_update {
                engine
                    .store()
                    .update_lifecycle(
                        stream_id,
                        LifecycleUpdate::state(LifecycleState::Scheduled)
                            .with_window(evaluation.next_window),
                    )
                    .await?;
            }

            // A stale window may hide one that is already open
            if evaluation.should_be_active {
                let refreshed = Stream {
                    state: LifecycleState::Scheduled,
                    manual_override: false,
                    ..stream
                };
                engine.launch(&refreshed, false, StartTrigger::Schedule).await?;
                outcome.started = true;
            }
        }
    }

    Ok(outcome)
}

/// Persist `scheduled` with a freshly evaluated window, clearing override and heal flags
async fn reset_to_scheduled(engine: &StreamEngine, stream: &mut Stream) -> AppResult<()> {
    let window = engine.evaluate(&stream.schedule).next_window;
    engine
        .store()
        .update_lifecycle(
            stream.id,
            LifecycleUpdate::state(LifecycleState::Scheduled).with_window(window),
        )
        .await?;
    stream.state = LifecycleState::Scheduled;
    stream.manual_override = false;
    stream.heal_pending = false;
    stream.next_start = window.map(|w| w.start);
    stream.next_end = window.map(|w| w.end);
    Ok(())
}
