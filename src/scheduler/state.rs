//! Cycle state machine
//!
//! Two modes, FETCH and REFRESH, and a day-in-cycle counter in
//! `1..=cycle_length`. Advancing past the last day wraps to day 1 and flips
//! the mode; that is the only transition that changes the mode.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ingestion mode of the current cycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Fetch,
    Refresh,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "FETCH",
            Self::Refresh => "REFRESH",
        }
    }

    pub fn flip(self) -> Self {
        match self {
            Self::Fetch => Self::Refresh,
            Self::Refresh => Self::Fetch,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FETCH" => Ok(Self::Fetch),
            "REFRESH" => Ok(Self::Refresh),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// When the day counter moves forward
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayAdvance {
    /// After every completed tick
    #[default]
    Tick,
    /// At most once per UTC calendar day
    Calendar,
}

impl FromStr for DayAdvance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tick" => Ok(Self::Tick),
            "calendar" => Ok(Self::Calendar),
            other => Err(format!("unknown day advance policy '{other}' (expected tick|calendar)")),
        }
    }
}

/// Persisted singleton scheduler state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleState {
    pub mode: Mode,
    /// Day in cycle, `1..=cycle_length`
    pub day: u32,
    /// Last region fully processed; `None` starts at the first region
    pub last_region: Option<String>,
    /// Seed plan anchor, reset whenever a FETCH phase begins
    pub cycle_started_on: NaiveDate,
    pub day_started_on: NaiveDate,
    pub locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub process_started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CycleState {
    /// State inserted when none is persisted: FETCH, day 1, first region
    pub fn initial(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        Self {
            mode: Mode::Fetch,
            day: 1,
            last_region: None,
            cycle_started_on: today,
            day_started_on: today,
            locked: false,
            locked_at: None,
            process_started_at: None,
            updated_at: now,
        }
    }

    /// Whether the end of a tick should move the day forward
    pub fn should_advance(&self, policy: DayAdvance, today: NaiveDate) -> bool {
        match policy {
            DayAdvance::Tick => true,
            DayAdvance::Calendar => today > self.day_started_on,
        }
    }

    /// Move to the next day, wrapping and flipping mode past `cycle_length`
    ///
    /// Returns `true` when the mode flipped.
    pub fn advance_day(&mut self, cycle_length: u32, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        self.day += 1;
        self.day_started_on = today;
        self.updated_at = now;

        if self.day > cycle_length.max(1) {
            self.day = 1;
            self.mode = self.mode.flip();
            if self.mode == Mode::Fetch {
                self.cycle_started_on = today;
            }
            true
        } else {
            false
        }
    }

    /// Held lock older than `stale_after`, or held without a timestamp
    pub fn lock_is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.locked && self.locked_at.map_or(true, |at| now - at >= stale_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let state = CycleState::initial(at(1));
        assert_eq!(state.mode, Mode::Fetch);
        assert_eq!(state.day, 1);
        assert!(state.last_region.is_none());
        assert!(!state.locked);
    }

    #[test]
    fn test_advance_within_cycle() {
        let mut state = CycleState::initial(at(1));
        assert!(!state.advance_day(3, at(2)));
        assert_eq!(state.day, 2);
        assert_eq!(state.mode, Mode::Fetch);
    }

    #[test]
    fn test_boundary_flips_once() {
        let mut state = CycleState::initial(at(1));
        let mut flips = 0;
        for d in 0..3 {
            if state.advance_day(3, at(2 + d)) {
                flips += 1;
            }
        }
        assert_eq!(flips, 1);
        assert_eq!(state.day, 1);
        assert_eq!(state.mode, Mode::Refresh);
        // A REFRESH phase keeps the seed anchor of its FETCH phase.
        assert_eq!(state.cycle_started_on, at(1).date_naive());

        for d in 0..3 {
            state.advance_day(3, at(10 + d));
        }
        assert_eq!(state.mode, Mode::Fetch);
        assert_eq!(state.cycle_started_on, at(12).date_naive());
    }

    #[test]
    fn test_calendar_policy() {
        let state = CycleState::initial(at(1));
        assert!(!state.should_advance(DayAdvance::Calendar, at(1).date_naive()));
        assert!(state.should_advance(DayAdvance::Calendar, at(2).date_naive()));
        assert!(state.should_advance(DayAdvance::Tick, at(1).date_naive()));
    }

    #[test]
    fn test_lock_staleness() {
        let mut state = CycleState::initial(at(1));
        assert!(!state.lock_is_stale(at(1), Duration::hours(3)));

        state.locked = true;
        state.locked_at = Some(at(1));
        assert!(!state.lock_is_stale(at(1) + Duration::hours(2), Duration::hours(3)));
        assert!(state.lock_is_stale(at(1) + Duration::hours(3), Duration::hours(3)));

        state.locked_at = None;
        assert!(state.lock_is_stale(at(1), Duration::hours(3)));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("fetch".parse::<Mode>().unwrap(), Mode::Fetch);
        assert_eq!("REFRESH".parse::<Mode>().unwrap(), Mode::Refresh);
        assert!("other".parse::<Mode>().is_err());
        assert_eq!("calendar".parse::<DayAdvance>().unwrap(), DayAdvance::Calendar);
    }
}
