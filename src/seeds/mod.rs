//! Deterministic seed query generator
//!
//! A pure function of `(cycle_start, day, slot, index)`. The seed of a
//! `(day, slot)` pair is the SHA-256 of `"{cycle_start}:{day}:{slot}"`; each
//! vocabulary axis is then indexed with `(seed + step * index) mod len` using
//! that axis' own prime step. Nothing is stored: the whole plan can be
//! replayed from the cycle start date.

pub mod vocabulary;

use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;

use vocabulary::{Axis, DECADES, GENRES, LANGUAGES, MOODS, REGIONS, TEMPLATES, TOPICS};

pub use vocabulary::MAX_PER_SLOT;

/// Seed generator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeedError {
    #[error("day {day} outside cycle of {days} days")]
    DayOutOfRange { day: u32, days: u32 },

    #[error("slot {slot} outside 0..{slots}")]
    SlotOutOfRange { slot: u32, slots: u32 },

    #[error("index {index} outside 0..{per_slot}")]
    IndexOutOfRange { index: u32, per_slot: u32 },

    #[error("invalid plan shape: {0}")]
    InvalidShape(String),

    #[error("plan size mismatch: expected {expected}, generated {actual}")]
    PlanSizeMismatch { expected: u64, actual: u64 },

    #[error("duplicate query on day {day} slot {slot}: {query}")]
    DuplicateQuery { day: u32, slot: u32, query: String },
}

/// One rendered search query and the vocabulary it was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedQuery {
    pub day: u32,
    pub slot: u32,
    pub index: u32,
    pub text: String,
    pub genre: &'static str,
    pub mood: &'static str,
    /// Regional scene word (not the geographic filter)
    pub region: &'static str,
    pub language: &'static str,
    pub decade: &'static str,
    pub topic: &'static str,
}

/// 256-bit seed of a `(day, slot)` pair
pub fn seed(cycle_start: NaiveDate, day: u32, slot: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{day}:{slot}", cycle_start.format("%Y-%m-%d")).as_bytes());
    hasher.finalize().into()
}

/// The seed read as a big-endian integer, reduced modulo `m`
fn seed_mod(seed: &[u8; 32], m: u64) -> u64 {
    seed.iter()
        .fold(0u64, |acc, &b| (acc * 256 + u64::from(b)) % m)
}

fn pick(axis: &Axis, seed: &[u8; 32], index: u32) -> &'static str {
    let len = axis.len() as u64;
    let offset = (axis.step * u64::from(index)) % len;
    axis.words[((seed_mod(seed, len) + offset) % len) as usize]
}

/// Render the query for one position of the plan
///
/// No range checks; see [`SeedPlan::query`] for the checked form.
pub fn render(cycle_start: NaiveDate, day: u32, slot: u32, index: u32) -> SeedQuery {
    let seed = seed(cycle_start, day, slot);

    let genre = pick(&GENRES, &seed, index);
    let mood = pick(&MOODS, &seed, index);
    let region = pick(&REGIONS, &seed, index);
    let language = pick(&LANGUAGES, &seed, index);
    let decade = pick(&DECADES, &seed, index);
    let topic = pick(&TOPICS, &seed, index);
    let template = pick(&TEMPLATES, &seed, index);

    let text = template
        .replace("{genre}", genre)
        .replace("{mood}", mood)
        .replace("{region}", region)
        .replace("{language}", language)
        .replace("{decade}", decade)
        .replace("{topic}", topic);

    SeedQuery {
        day,
        slot,
        index,
        text,
        genre,
        mood,
        region,
        language,
        decade,
        topic,
    }
}

// ============================================================================
// Plan
// ============================================================================

/// The full query plan of one cycle: `days × slots × per_slot` queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedPlan {
    cycle_start: NaiveDate,
    days: u32,
    slots: u32,
    per_slot: u32,
}

impl SeedPlan {
    pub fn new(cycle_start: NaiveDate, days: u32, slots: u32, per_slot: u32) -> Result<Self, SeedError> {
        if days == 0 {
            return Err(SeedError::InvalidShape("days must be greater than 0".into()));
        }
        if slots == 0 || 24 % slots != 0 {
            return Err(SeedError::InvalidShape(format!(
                "slots must divide 24, got {slots}"
            )));
        }
        if per_slot == 0 || per_slot > MAX_PER_SLOT {
            return Err(SeedError::InvalidShape(format!(
                "per_slot must be in 1..={MAX_PER_SLOT}, got {per_slot}"
            )));
        }

        Ok(Self {
            cycle_start,
            days,
            slots,
            per_slot,
        })
    }

    pub fn cycle_start(&self) -> NaiveDate {
        self.cycle_start
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn slots(&self) -> u32 {
        self.slots
    }

    pub fn per_slot(&self) -> u32 {
        self.per_slot
    }

    /// Exact number of queries in the plan
    pub fn plan_size(&self) -> u64 {
        u64::from(self.days) * u64::from(self.slots) * u64::from(self.per_slot)
    }

    /// Slot covering a wall-clock hour (0-23)
    pub fn slot_for_hour(&self, hour: u32) -> u32 {
        (hour.min(23) * self.slots) / 24
    }

    fn check(&self, day: u32, slot: u32) -> Result<(), SeedError> {
        if day == 0 || day > self.days {
            return Err(SeedError::DayOutOfRange {
                day,
                days: self.days,
            });
        }
        if slot >= self.slots {
            return Err(SeedError::SlotOutOfRange {
                slot,
                slots: self.slots,
            });
        }
        Ok(())
    }

    pub fn query(&self, day: u32, slot: u32, index: u32) -> Result<SeedQuery, SeedError> {
        self.check(day, slot)?;
        if index >= self.per_slot {
            return Err(SeedError::IndexOutOfRange {
                index,
                per_slot: self.per_slot,
            });
        }
        Ok(render(self.cycle_start, day, slot, index))
    }

    /// All queries of one `(day, slot)`, in index order
    pub fn slot_queries(&self, day: u32, slot: u32) -> Result<Vec<SeedQuery>, SeedError> {
        self.check(day, slot)?;
        Ok((0..self.per_slot)
            .map(|i| render(self.cycle_start, day, slot, i))
            .collect())
    }

    /// Every query of the plan, day-major then slot then index
    pub fn iter(&self) -> impl Iterator<Item = SeedQuery> + '_ {
        (1..=self.days).flat_map(move |day| {
            (0..self.slots).flat_map(move |slot| {
                (0..self.per_slot).map(move |i| render(self.cycle_start, day, slot, i))
            })
        })
    }

    /// Verify the plan size and that no slot repeats a query
    ///
    /// Returns the number of generated queries.
    pub fn self_check(&self) -> Result<u64, SeedError> {
        let mut count = 0u64;

        for day in 1..=self.days {
            for slot in 0..self.slots {
                let mut seen = HashSet::with_capacity(self.per_slot as usize);
                for q in self.slot_queries(day, slot)? {
                    if !seen.insert(q.text.clone()) {
                        return Err(SeedError::DuplicateQuery {
                            day,
                            slot,
                            query: q.text,
                        });
                    }
                    count += 1;
                }
            }
        }

        if count != self.plan_size() {
            return Err(SeedError::PlanSizeMismatch {
                expected: self.plan_size(),
                actual: count,
            });
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render(start(), 3, 2, 17);
        let b = render(start(), 3, 2, 17);
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_cycle_start_changes_plan() {
        let other = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let a: Vec<String> = (0..20).map(|i| render(start(), 1, 0, i).text).collect();
        let b: Vec<String> = (0..20).map(|i| render(other, 1, 0, i).text).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn test_query_renders_genre_and_mood() {
        let q = render(start(), 1, 0, 0);
        assert!(q.text.contains(q.genre));
        assert!(q.text.contains(q.mood));
        assert!(!q.text.contains('{'));
    }

    #[test]
    fn test_default_plan_size() {
        let plan = SeedPlan::new(start(), 29, 6, 120).unwrap();
        assert_eq!(plan.plan_size(), 20_880);
    }

    #[test]
    fn test_self_check_small_plan() {
        let plan = SeedPlan::new(start(), 3, 4, MAX_PER_SLOT).unwrap();
        assert_eq!(plan.self_check().unwrap(), 3 * 4 * 312);
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(SeedPlan::new(start(), 0, 6, 120).is_err());
        assert!(SeedPlan::new(start(), 29, 5, 120).is_err());
        assert!(SeedPlan::new(start(), 29, 6, 0).is_err());
        assert!(SeedPlan::new(start(), 29, 6, MAX_PER_SLOT + 1).is_err());
    }

    #[test]
    fn test_range_checks() {
        let plan = SeedPlan::new(start(), 29, 6, 120).unwrap();
        assert!(matches!(plan.query(0, 0, 0), Err(SeedError::DayOutOfRange { .. })));
        assert!(matches!(plan.query(30, 0, 0), Err(SeedError::DayOutOfRange { .. })));
        assert!(matches!(plan.query(1, 6, 0), Err(SeedError::SlotOutOfRange { .. })));
        assert!(matches!(plan.query(1, 0, 120), Err(SeedError::IndexOutOfRange { .. })));
        assert!(plan.query(29, 5, 119).is_ok());
    }

    #[test]
    fn test_slot_for_hour() {
        let plan = SeedPlan::new(start(), 29, 6, 120).unwrap();
        assert_eq!(plan.slot_for_hour(0), 0);
        assert_eq!(plan.slot_for_hour(3), 0);
        assert_eq!(plan.slot_for_hour(4), 1);
        assert_eq!(plan.slot_for_hour(23), 5);
    }

    #[test]
    fn test_seed_mod_matches_small_values() {
        let mut seed = [0u8; 32];
        seed[31] = 200;
        seed[30] = 1;
        // 0x01C8 = 456
        assert_eq!(seed_mod(&seed, 1000), 456);
        assert_eq!(seed_mod(&seed, 7), 456 % 7);
    }
}
