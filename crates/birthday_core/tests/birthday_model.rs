use birthday_core::{BirthdayRecord, BirthdayValidationError};
use chrono::NaiveDate;

#[test]
fn new_normalizes_name_and_keeps_fields() {
    let record = BirthdayRecord::new("  alice   smith ", 6, 5, Some(1990)).unwrap();
    assert_eq!(record.name, "Alice Smith");
    assert_eq!(record.natural_key(), "alice smith");
    assert_eq!((record.month, record.day, record.year), (6, 5, Some(1990)));
}

#[test]
fn blank_name_is_rejected() {
    assert_eq!(
        BirthdayRecord::new("   ", 1, 1, None).unwrap_err(),
        BirthdayValidationError::EmptyName
    );
}

#[test]
fn month_and_day_must_form_a_calendar_date() {
    assert_eq!(
        BirthdayRecord::new("Ada", 13, 1, None).unwrap_err(),
        BirthdayValidationError::MonthOutOfRange(13)
    );
    assert_eq!(
        BirthdayRecord::new("Ada", 4, 31, None).unwrap_err(),
        BirthdayValidationError::InvalidDay { month: 4, day: 31 }
    );
    assert_eq!(
        BirthdayRecord::new("Ada", 2, 30, None).unwrap_err(),
        BirthdayValidationError::InvalidDay { month: 2, day: 30 }
    );
}

#[test]
fn leap_day_is_valid_without_year_but_needs_a_leap_birth_year() {
    assert!(BirthdayRecord::new("Cara", 2, 29, None).is_ok());
    assert!(BirthdayRecord::new("Cara", 2, 29, Some(2000)).is_ok());
    assert_eq!(
        BirthdayRecord::new("Cara", 2, 29, Some(2001)).unwrap_err(),
        BirthdayValidationError::InvalidYear {
            year: 2001,
            month: 2,
            day: 29
        }
    );
}

#[test]
fn leap_day_is_observed_on_feb_28_in_common_years() {
    let cara = BirthdayRecord::new("Cara", 2, 29, Some(2000)).unwrap();
    assert_eq!(cara.observed_in(2025), NaiveDate::from_ymd_opt(2025, 2, 28));
    assert_eq!(cara.observed_in(2024), NaiveDate::from_ymd_opt(2024, 2, 29));
}

#[test]
fn age_is_known_only_with_birth_year() {
    let alice = BirthdayRecord::new("Alice", 6, 5, Some(1990)).unwrap();
    let bob = BirthdayRecord::new("Bob", 6, 10, None).unwrap();
    let on = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();
    assert_eq!(alice.age_on(on), Some(34));
    assert_eq!(bob.age_on(on), None);
}
