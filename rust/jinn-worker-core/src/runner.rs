//! Main loop (spec §2, §4.A, §5): ties the Cycle Controller, pre-cycle
//! maintenance, and per-cycle orchestration together, with stop-file and
//! SIGINT/SIGTERM cancellation and an optional single-iteration `--once`
//! mode for scripted/manual testing.

use std::time::Duration;

use chrono::{Datelike, Timelike};

use crate::cycle::run_cycle;
use crate::cycle_control::StopReason;
use crate::maintenance::run_maintenance;
use crate::state::WorkerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run until a stop condition is reached (stop-file, max runs/cycles,
    /// or an OS signal).
    Continuous,
    /// Run exactly one cycle and return, regardless of stop conditions.
    Once,
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

fn local_time_parts() -> (u32, i64) {
    let now = chrono::Local::now();
    let minutes_since_midnight = now.hour() * 60 + now.minute();
    let day_epoch = now.num_days_from_ce() as i64;
    (minutes_since_midnight, day_epoch)
}

/// Runs the worker according to `mode`. Returns once a stop condition is
/// reached (`Continuous`) or after exactly one cycle (`Once`), reporting why
/// so the caller can map a stuck-cycle exit to a distinct process exit code
/// (spec §4.D step 4, §6).
pub async fn run(state: &mut WorkerState, mode: RunMode) -> StopReason {
    loop {
        let ts = now_unix();
        let (minutes_since_midnight, day_epoch) = local_time_parts();

        match state.cycle.decide_next(ts, minutes_since_midnight, day_epoch) {
            crate::cycle_control::Decision::Stop(reason) => {
                tracing::info!(?reason, "worker stopping");
                return reason;
            }
            crate::cycle_control::Decision::Sleep(duration) => {
                tracing::debug!(sleep_secs = duration.as_secs(), "sleeping outside earning window or job cap reached");
                if !sleep_or_signal(duration).await {
                    return StopReason::Signal;
                }
                continue;
            }
            crate::cycle_control::Decision::Run => {}
        }

        run_maintenance(state, ts).await;

        let outcome = run_cycle(state, ts).await;
        let sleep_for = state.cycle.finish_cycle(outcome.processed_request);

        if mode == RunMode::Once {
            return StopReason::OnceCompleted;
        }

        if outcome.stuck_exit {
            tracing::warn!("exiting after too many consecutive cycles with no eligible candidate");
            return StopReason::StuckCycle;
        }

        if !sleep_or_signal(sleep_for).await {
            return StopReason::Signal;
        }
    }
}

/// Sleeps for `duration`, or returns early (with `false`) if a termination
/// signal arrives first, so the main loop can shut down promptly instead of
/// waiting out a long backoff interval.
async fn sleep_or_signal(duration: Duration) -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                tokio::time::sleep(duration).await;
                return true;
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, stopping");
                false
            }
            _ = sigterm.recv() => {
                tracing::info!("received sigterm, stopping");
                false
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, stopping");
                false
            }
        }
    }
}
