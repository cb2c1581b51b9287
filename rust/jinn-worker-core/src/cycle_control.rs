//! Cycle Controller (spec §4.A): adaptive poll interval, stop-file and
//! run/cycle caps, and earning-window gating with a per-window job cap.

use std::path::PathBuf;
use std::time::Duration;

use jinn_worker_config::earning_window::{capped_sleep_until_open, EarningWindow};
use jinn_worker_config::schema::WorkerSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    StopFile,
    MaxRuns,
    MaxCycles,
    /// Spec §4.D step 4, §6: too many consecutive cycles found every
    /// candidate already in the session's executed-jobs map. The process
    /// must exit non-zero so an external supervisor restarts it with a
    /// freshly empty session map.
    StuckCycle,
    /// A termination signal (SIGINT/SIGTERM) arrived while sleeping between
    /// cycles.
    Signal,
    /// `RunMode::Once` completed its single cycle normally.
    OnceCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Run,
    Sleep(Duration),
    Stop(StopReason),
}

/// Adaptive scheduling and lifecycle gating (spec §4.A). Backs off the
/// poll interval geometrically when a cycle finds nothing to do, and
/// resets to the base interval the moment a cycle processes a request.
pub struct CycleController {
    stop_file: PathBuf,
    max_runs: Option<u64>,
    max_cycles: Option<u64>,
    base_interval: Duration,
    max_interval: Duration,
    poll_factor: f64,
    earning_window: Option<EarningWindow>,
    earning_window_max_jobs: Option<u32>,

    interval: Duration,
    run_count: u64,
    cycle_count: u64,
    window_job_count: u32,
    current_window_id: Option<String>,
}

impl CycleController {
    pub fn new(cfg: &WorkerSection) -> Self {
        let earning_window = cfg.earning_window.as_deref().and_then(|spec| {
            let parsed = EarningWindow::parse(spec);
            if parsed.is_none() {
                tracing::warn!(spec, "ignoring malformed earning_window, treating as always-open");
            }
            parsed
        });

        Self {
            stop_file: cfg.stop_file.clone(),
            max_runs: cfg.max_runs,
            max_cycles: cfg.max_cycles,
            base_interval: cfg.base_poll_interval,
            max_interval: cfg.max_poll_interval,
            poll_factor: cfg.poll_factor,
            earning_window,
            earning_window_max_jobs: cfg.earning_window_max_jobs,
            interval: cfg.base_poll_interval,
            run_count: 0,
            cycle_count: 0,
            window_job_count: 0,
            current_window_id: None,
        }
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Decide whether to run a cycle now, sleep, or stop entirely. Checked
    /// once at the top of every loop iteration.
    pub fn decide_next(&mut self, now_unix: i64, minutes_since_midnight: u32, day_epoch: i64) -> Decision {
        if self.stop_file.exists() {
            return Decision::Stop(StopReason::StopFile);
        }
        if let Some(max_runs) = self.max_runs {
            if self.run_count >= max_runs {
                return Decision::Stop(StopReason::MaxRuns);
            }
        }
        if let Some(max_cycles) = self.max_cycles {
            if self.cycle_count >= max_cycles {
                return Decision::Stop(StopReason::MaxCycles);
            }
        }

        if let Some(window) = &self.earning_window {
            if !window.contains(minutes_since_midnight) {
                let minutes_until_open = window.minutes_until_open(minutes_since_midnight);
                return Decision::Sleep(capped_sleep_until_open(minutes_until_open));
            }

            let window_id = window.window_id(day_epoch, minutes_since_midnight);
            if self.current_window_id.as_deref() != Some(window_id.as_str()) {
                self.current_window_id = Some(window_id);
                self.window_job_count = 0;
            }

            if let Some(max_jobs) = self.earning_window_max_jobs {
                if self.window_job_count >= max_jobs {
                    return Decision::Sleep(self.max_interval);
                }
            }
        }

        let _ = now_unix;
        Decision::Run
    }

    /// Record the outcome of a cycle and compute the interval to sleep
    /// before the next one. Resets the backoff to the base interval on any
    /// cycle that processed a request (spec §4.A).
    pub fn finish_cycle(&mut self, processed_request: bool) -> Duration {
        self.cycle_count += 1;
        if processed_request {
            self.run_count += 1;
            self.window_job_count += 1;
            self.interval = self.base_interval;
        } else {
            let scaled = self.interval.mul_f64(self.poll_factor);
            self.interval = scaled.min(self.max_interval);
        }
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section() -> WorkerSection {
        WorkerSection {
            base_poll_interval: Duration::from_secs(30),
            max_poll_interval: Duration::from_secs(300),
            poll_factor: 1.5,
            ..Default::default()
        }
    }

    #[test]
    fn interval_backs_off_geometrically_and_caps() {
        let mut controller = CycleController::new(&section());
        assert_eq!(controller.finish_cycle(false), Duration::from_secs(45));
        assert_eq!(controller.finish_cycle(false), Duration::from_secs_f64(67.5));
        for _ in 0..20 {
            controller.finish_cycle(false);
        }
        assert_eq!(controller.finish_cycle(false), Duration::from_secs(300));
    }

    #[test]
    fn processed_request_resets_interval() {
        let mut controller = CycleController::new(&section());
        controller.finish_cycle(false);
        controller.finish_cycle(false);
        assert_eq!(controller.finish_cycle(true), Duration::from_secs(30));
    }

    #[test]
    fn stop_file_wins_over_everything_else() {
        let dir = tempfile::tempdir().unwrap();
        let stop_file = dir.path().join("stop");
        std::fs::write(&stop_file, b"").unwrap();
        let mut cfg = section();
        cfg.stop_file = stop_file;
        let mut controller = CycleController::new(&cfg);
        assert_eq!(controller.decide_next(0, 0, 0), Decision::Stop(StopReason::StopFile));
    }

    #[test]
    fn max_runs_stops_after_threshold() {
        let mut cfg = section();
        cfg.max_runs = Some(1);
        let mut controller = CycleController::new(&cfg);
        controller.finish_cycle(true);
        assert_eq!(controller.decide_next(0, 0, 0), Decision::Stop(StopReason::MaxRuns));
    }

    #[test]
    fn outside_earning_window_sleeps_until_open() {
        let mut cfg = section();
        cfg.earning_window = Some("09:00-17:00".to_string());
        let mut controller = CycleController::new(&cfg);
        match controller.decide_next(0, 8 * 60, 0) {
            Decision::Sleep(_) => {}
            other => panic!("expected Sleep, got {other:?}"),
        }
    }

    #[test]
    fn window_job_cap_sleeps_for_max_interval() {
        let mut cfg = section();
        cfg.earning_window = Some("09:00-17:00".to_string());
        cfg.earning_window_max_jobs = Some(1);
        let mut controller = CycleController::new(&cfg);
        assert_eq!(controller.decide_next(0, 10 * 60, 0), Decision::Run);
        controller.finish_cycle(true);
        assert_eq!(controller.decide_next(0, 10 * 60, 0), Decision::Sleep(Duration::from_secs(300)));
    }

    #[test]
    fn malformed_earning_window_fails_open() {
        let mut cfg = section();
        cfg.earning_window = Some("not-a-window".to_string());
        let mut controller = CycleController::new(&cfg);
        assert_eq!(controller.decide_next(0, 0, 0), Decision::Run);
    }
}
