use birthday_core::{BirthdayRecord, WeekWindow};
use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn record(name: &str, month: u32, day: u32) -> BirthdayRecord {
    BirthdayRecord::new(name, month, day, None).unwrap()
}

#[test]
fn every_day_of_two_years_maps_to_a_monday_start_and_sunday_end() {
    let mut day = date(2023, 1, 1);
    while day <= date(2024, 12, 31) {
        let instant = Utc
            .with_ymd_and_hms(day.year(), day.month(), day.day(), 23, 59, 59)
            .unwrap();
        let window = WeekWindow::containing(instant);
        assert_eq!(window.start().weekday(), Weekday::Mon, "start for {day}");
        assert_eq!(window.end(), window.start() + Duration::days(6));
        assert!(window.contains(day));
        assert_eq!(window.days().count(), 7);
        day += Duration::days(1);
    }
}

#[test]
fn alice_bob_cara_scenario_matches_only_alice() {
    let window = WeekWindow::starting(date(2024, 6, 3)).unwrap();
    assert_eq!(window.end(), date(2024, 6, 9));

    assert!(window.matches(&record("Alice", 6, 5)));
    assert!(!window.matches(&record("Bob", 6, 10)));
    assert!(!window.matches(&record("Cara", 2, 29)));
    assert_eq!(window.occurrence(6, 5), Some(date(2024, 6, 5)));
}

#[test]
fn year_boundary_window_matches_both_years() {
    // Monday 2024-12-30 .. Sunday 2025-01-05.
    let window = WeekWindow::for_date(date(2025, 1, 2));
    assert_eq!(window.start(), date(2024, 12, 30));

    assert_eq!(window.occurrence(12, 31), Some(date(2024, 12, 31)));
    assert_eq!(window.occurrence(1, 4), Some(date(2025, 1, 4)));
    assert_eq!(window.occurrence(12, 29), None);
    assert_eq!(window.occurrence(1, 6), None);
}

#[test]
fn leap_day_surfaces_on_feb_28_in_common_year_weeks() {
    let cara = record("Cara", 2, 29);

    // 2025 is not a leap year; Feb 28 is a Friday.
    let common = WeekWindow::for_date(date(2025, 2, 26));
    assert_eq!(common.occurrence_of(&cara), Some(date(2025, 2, 28)));

    // 2024 week containing Feb 28 and Feb 29.
    let leap = WeekWindow::for_date(date(2024, 2, 28));
    assert_eq!(leap.occurrence_of(&cara), Some(date(2024, 2, 29)));
}

#[test]
fn feb_28_records_are_not_shifted_in_leap_years() {
    let window = WeekWindow::for_date(date(2024, 2, 28));
    assert_eq!(window.occurrence(2, 28), Some(date(2024, 2, 28)));
}
