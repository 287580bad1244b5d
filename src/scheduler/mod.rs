//! Cycle scheduling
//!
//! The top-level state machine of the harvester. A persisted [`CycleState`]
//! tracks the mode (FETCH or REFRESH) and the day in the cycle; every tick
//! processes the next few regions of a fixed rotation and moves the day
//! forward, flipping the mode when the cycle wraps.
//!
//! # Architecture
//!
//! ```text
//!   interval ──▶ CycleScheduler::tick
//!                    │  single-flight lock (cycle_state.locked)
//!                    ▼
//!           next_regions(last_region, N)
//!                    │
//!         ┌──────────┼──────────┐
//!         ▼          ▼          ▼
//!      region 1   region 2   region N    Pipeline::run_region, with timeout
//!         │          │          │        state saved after each region
//!         └──────────┼──────────┘
//!                    ▼
//!            backfill if budget left
//!                    ▼
//!          advance day / flip mode
//! ```
//!
//! # Modules
//!
//! - [`state`] - Mode, CycleState and the day/mode transitions
//! - [`region`] - Region list rotation and API region parameters
//! - [`cycle`] - The tick loop, status report and lock reset
//! - [`error`] - Scheduler errors
//!
//! # Failure policy
//!
//! | Event | Effect |
//! |---------|---------|
//! | lock held | tick skipped |
//! | lock older than `lock_stale_after` | taken over, logged at warn |
//! | region timeout or error | region abandoned for this tick |
//! | tick budget exhausted | remaining regions skipped, day advanced |
//! | quota depleted | cooldown, tick aborted, day not advanced |
//! | panic in the tick body | lock released, error returned |

pub mod cycle;
pub mod error;
pub mod region;
pub mod state;

pub use cycle::{
    reset_lock, CycleScheduler, SchedulerSettings, StatusReport, TickOutcome, TickReport,
};
pub use error::{SchedulerError, SchedulerResult};
pub use region::{next_regions, GLOBAL};
pub use state::{CycleState, DayAdvance, Mode};
