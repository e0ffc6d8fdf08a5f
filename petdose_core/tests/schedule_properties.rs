//! Property tests for dose generation and merging.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use petdose_core::config::ScheduleConfig;
use petdose_core::{
    generate, merge_doses, ActiveRange, Dosage, DoseUnit, Frequency, MedicationSchedule, Period,
    ReminderSettings, TimeOfDay,
};
use proptest::prelude::*;

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
}

fn arb_period() -> impl Strategy<Value = Period> {
    prop_oneof![Just(Period::Day), Just(Period::Week), Just(Period::Month)]
}

fn arb_times() -> impl Strategy<Value = Vec<TimeOfDay>> {
    prop::collection::vec(0u32..1440, 0..5)
        .prop_map(|minutes| minutes.into_iter().filter_map(TimeOfDay::from_minutes).collect())
}

fn arb_schedule() -> impl Strategy<Value = MedicationSchedule> {
    (
        1u32..=6,
        arb_period(),
        arb_times(),
        0i64..60,
        prop::option::of(0i64..90),
    )
        .prop_map(|(times_per_period, period, explicit, start_offset, length)| {
            let start_date = base_date() + Duration::days(start_offset);
            let schedule = MedicationSchedule {
                id: "med-prop".into(),
                pet_id: "pet-prop".into(),
                name: "Gabapentin".into(),
                dosage: Dosage {
                    amount: 100.0,
                    unit: DoseUnit::Mg,
                },
                frequency: Frequency {
                    times_per_period,
                    period,
                    explicit_times: Vec::new(),
                },
                active_range: ActiveRange {
                    start_date,
                    end_date: length.map(|days| start_date + Duration::days(days)),
                    indefinite: length.is_none(),
                },
                reminders: ReminderSettings { enabled: true },
            };
            schedule.with_explicit_times(explicit)
        })
}

/// Window start in minutes after 2024-01-01 00:00 UTC, and a length in hours
fn arb_window() -> impl Strategy<Value = (DateTime<Utc>, DateTime<Utc>)> {
    (0i64..(120 * 1440), 0i64..(24 * 45)).prop_map(|(start, hours)| {
        let start = midnight(base_date()) + Duration::minutes(start);
        (start, start + Duration::hours(hours))
    })
}

proptest! {
    #[test]
    fn doses_stay_inside_window_and_active_range(
        schedule in arb_schedule(),
        (start, end) in arb_window(),
    ) {
        let config = ScheduleConfig::default();
        let generation = generate(&schedule, &start, &end, &config).unwrap();

        for dose in &generation.doses {
            prop_assert!(dose.scheduled_time >= start);
            prop_assert!(dose.scheduled_time < end);
            prop_assert!(schedule.active_range.contains(dose.scheduled_time.date_naive()));
            prop_assert_eq!(&dose.medication_id, &schedule.id);
        }
    }

    #[test]
    fn doses_are_sorted_and_unique(
        schedule in arb_schedule(),
        (start, end) in arb_window(),
    ) {
        let generation = generate(&schedule, &start, &end, &ScheduleConfig::default()).unwrap();
        for pair in generation.doses.windows(2) {
            prop_assert!(pair[0].scheduled_time < pair[1].scheduled_time);
        }
    }

    #[test]
    fn generation_is_deterministic(
        schedule in arb_schedule(),
        (start, end) in arb_window(),
    ) {
        let config = ScheduleConfig::default();
        let first = generate(&schedule, &start, &end, &config).unwrap();
        let second = generate(&schedule, &start, &end, &config).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn explicit_times_are_honored(
        schedule in arb_schedule(),
        (start, end) in arb_window(),
    ) {
        prop_assume!(!schedule.frequency.explicit_times.is_empty());

        let generation = generate(&schedule, &start, &end, &ScheduleConfig::default()).unwrap();
        for dose in &generation.doses {
            let minutes = dose.scheduled_time.hour() * 60 + dose.scheduled_time.minute();
            let time = TimeOfDay::from_minutes(minutes).unwrap();
            prop_assert!(schedule.frequency.explicit_times.contains(&time));
        }
    }

    #[test]
    fn daily_explicit_times_fire_every_day(
        mut schedule in arb_schedule(),
        days in 1i64..30,
    ) {
        prop_assume!(!schedule.frequency.explicit_times.is_empty());
        schedule.frequency.period = Period::Day;
        schedule.active_range.indefinite = true;
        schedule.active_range.end_date = None;

        let start = midnight(schedule.active_range.start_date);
        let end = start + Duration::days(days);
        let generation = generate(&schedule, &start, &end, &ScheduleConfig::default()).unwrap();

        prop_assert_eq!(
            generation.doses.len(),
            schedule.frequency.explicit_times.len() * days as usize
        );
    }

    #[test]
    fn split_windows_merge_to_whole(
        schedule in arb_schedule(),
        (start, end) in arb_window(),
        split in 0.0f64..1.0,
    ) {
        let config = ScheduleConfig::default();
        let span = (end - start).num_minutes();
        let middle = start + Duration::minutes((span as f64 * split) as i64);

        let whole = generate(&schedule, &start, &end, &config).unwrap().doses;
        let first = generate(&schedule, &start, &middle, &config).unwrap().doses;
        let second = generate(&schedule, &middle, &end, &config).unwrap().doses;

        prop_assert_eq!(merge_doses(vec![first, second]), whole);
    }

    #[test]
    fn merging_overlapping_sequences_drops_duplicates(
        schedule in arb_schedule(),
        (start, end) in arb_window(),
    ) {
        let config = ScheduleConfig::default();
        let doses = generate(&schedule, &start, &end, &config).unwrap().doses;

        let merged = merge_doses(vec![doses.clone(), doses.clone()]);
        prop_assert_eq!(merged, doses);
    }

    #[test]
    fn disabled_reminders_generate_nothing(
        mut schedule in arb_schedule(),
        (start, end) in arb_window(),
    ) {
        schedule.reminders.enabled = false;
        let generation = generate(&schedule, &start, &end, &ScheduleConfig::default()).unwrap();
        prop_assert!(generation.doses.is_empty());
        prop_assert!(generation.advisories.is_empty());
    }
}
