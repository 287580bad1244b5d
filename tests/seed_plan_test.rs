//! Seed plan properties

use std::collections::HashSet;

use chrono::NaiveDate;
use playlist_harvester::seeds::{SeedPlan, MAX_PER_SLOT};
use proptest::prelude::*;

fn default_plan(start: NaiveDate) -> SeedPlan {
    SeedPlan::new(start, 29, 6, 120).unwrap()
}

fn date(offset: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 1).unwrap() + chrono::Duration::days(offset as i64)
}

#[test]
fn test_default_plan_self_check() {
    let plan = default_plan(date(0));
    assert_eq!(plan.self_check().unwrap(), 20_880);
    assert_eq!(plan.iter().count(), 20_880);
}

#[test]
fn test_iteration_order_is_day_major() {
    let plan = SeedPlan::new(date(0), 2, 2, 3).unwrap();
    let positions: Vec<(u32, u32, u32)> = plan.iter().map(|q| (q.day, q.slot, q.index)).collect();
    assert_eq!(positions.first(), Some(&(1, 0, 0)));
    assert_eq!(positions[3], (1, 1, 0));
    assert_eq!(positions.last(), Some(&(2, 1, 2)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_queries_are_reproducible(
        offset in 0u32..2000,
        day in 1u32..=29,
        slot in 0u32..6,
        index in 0u32..120,
    ) {
        let a = default_plan(date(offset)).query(day, slot, index).unwrap();
        let b = default_plan(date(offset)).query(day, slot, index).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert!(a.text.contains(a.genre));
        prop_assert!(!a.text.contains('{'), "query text contains an unrendered brace: {}", a.text);
    }

    #[test]
    fn prop_slot_queries_are_distinct(
        offset in 0u32..2000,
        day in 1u32..=29,
        slot in 0u32..4,
    ) {
        let plan = SeedPlan::new(date(offset), 29, 4, MAX_PER_SLOT).unwrap();
        let queries = plan.slot_queries(day, slot).unwrap();
        let unique: HashSet<&str> = queries.iter().map(|q| q.text.as_str()).collect();
        prop_assert_eq!(unique.len(), MAX_PER_SLOT as usize);
    }

    #[test]
    fn prop_every_hour_maps_to_a_slot(hour in 0u32..24, slots in prop::sample::select(vec![1u32, 2, 3, 4, 6, 8, 12, 24])) {
        let plan = SeedPlan::new(date(0), 29, slots, 10).unwrap();
        prop_assert!(plan.slot_for_hour(hour) < slots);
    }
}
