//! Earning-window parsing (spec §4.A, §8 scenario 6, §9 open question #3).
//!
//! Window membership is recomputed from the current wall-clock time on
//! every cycle rather than cached, per the Open Question resolution in
//! SPEC_FULL.md §9 — this keeps DST/NTP-step edge cases correct for free.

use std::time::Duration;

/// A parsed `HH:MM-HH:MM` earning window, in minutes-since-local-midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarningWindow {
    start_minutes: u32,
    end_minutes: u32,
}

impl EarningWindow {
    /// Parse `HH:MM-HH:MM`. On any parse failure this "fails open": the
    /// caller should treat the result as always-in-window with a warning,
    /// matching the spec's stated failure semantics for misconfigured
    /// schedule strings.
    pub fn parse(spec: &str) -> Option<Self> {
        let (start, end) = spec.split_once('-')?;
        let start_minutes = parse_hhmm(start.trim())?;
        let end_minutes = parse_hhmm(end.trim())?;
        Some(Self {
            start_minutes,
            end_minutes,
        })
    }

    /// Whether `minutes_since_midnight` falls inside the window, handling
    /// the case where it wraps past midnight (`22:00-08:00`).
    pub fn contains(&self, minutes_since_midnight: u32) -> bool {
        if self.start_minutes <= self.end_minutes {
            (self.start_minutes..self.end_minutes).contains(&minutes_since_midnight)
        } else {
            minutes_since_midnight >= self.start_minutes || minutes_since_midnight < self.end_minutes
        }
    }

    /// A stable identifier for "the window instance that started most
    /// recently at or before `minutes_since_midnight`" — used to reset the
    /// per-window job counter when a new window begins (spec §4.A).
    pub fn window_id(&self, day_epoch: i64, minutes_since_midnight: u32) -> String {
        let day = if self.start_minutes <= self.end_minutes {
            day_epoch
        } else if minutes_since_midnight >= self.start_minutes {
            day_epoch
        } else {
            // We're in the tail of a window that started "yesterday".
            day_epoch - 1
        };
        format!("{day}:{}", self.start_minutes)
    }

    /// Minutes until the window next opens, given we are currently outside
    /// it. Used to compute the capped sleep duration.
    pub fn minutes_until_open(&self, minutes_since_midnight: u32) -> u32 {
        if minutes_since_midnight < self.start_minutes {
            self.start_minutes - minutes_since_midnight
        } else {
            // Past the window today; it opens again tomorrow.
            (24 * 60 - minutes_since_midnight) + self.start_minutes
        }
    }
}

fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h >= 24 || m >= 60 {
        return None;
    }
    Some(h * 60 + m)
}

/// Sleep duration until the window opens, capped at one hour so stop
/// signals are still observed (spec §4.A).
pub fn capped_sleep_until_open(minutes_until_open: u32) -> Duration {
    Duration::from_secs(60).checked_mul(minutes_until_open).map_or(
        Duration::from_secs(3600),
        |d| d.min(Duration::from_secs(3600)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_same_day_window() {
        let window = EarningWindow::parse("09:00-17:00").unwrap();
        assert!(window.contains(9 * 60));
        assert!(window.contains(16 * 60 + 59));
        assert!(!window.contains(17 * 60));
        assert!(!window.contains(8 * 60));
    }

    #[test]
    fn wrapping_window_over_midnight() {
        let window = EarningWindow::parse("22:00-08:00").unwrap();
        assert!(window.contains(23 * 60));
        assert!(window.contains(0));
        assert!(window.contains(7 * 60 + 59));
        assert!(!window.contains(14 * 60)); // scenario 6: 14:00 is out of window
        assert!(!window.contains(8 * 60));
    }

    #[test]
    fn out_of_window_sleep_is_capped_at_one_hour() {
        let window = EarningWindow::parse("22:00-08:00").unwrap();
        let minutes = window.minutes_until_open(14 * 60); // 14:00 -> 22:00 is 8h away
        assert_eq!(minutes, 8 * 60);
        let sleep = capped_sleep_until_open(minutes);
        assert_eq!(sleep, Duration::from_secs(3600));
    }

    #[test]
    fn malformed_spec_fails_open() {
        assert!(EarningWindow::parse("garbage").is_none());
        assert!(EarningWindow::parse("25:00-08:00").is_none());
    }

    #[test]
    fn window_id_changes_when_new_window_begins() {
        let window = EarningWindow::parse("22:00-08:00").unwrap();
        let id_before_midnight = window.window_id(100, 23 * 60);
        let id_after_midnight = window.window_id(101, 2 * 60);
        assert_eq!(id_before_midnight, id_after_midnight);

        let id_next_night = window.window_id(101, 23 * 60);
        assert_ne!(id_before_midnight, id_next_night);
    }
}
