//! Graduation year and grade derived from the student email convention
//! (`firstname26@kla.education` graduates in 2026).

use chrono::{Datelike, NaiveDate};

const MIN_GRADUATION_YEAR: i32 = 2000;
const MAX_GRADUATION_YEAR: i32 = 2100;
const SENIOR_GRADE: i32 = 12;

/// Trailing 2- or 4-digit suffix of the local part, as a year in [2000, 2100].
pub fn derive_graduation_year_from_email(email: &str) -> Option<i32> {
    let local = email.trim().split('@').next()?;
    let digits: String = local
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let year = match digits.len() {
        2 => 2000 + digits.parse::<i32>().ok()?,
        4 => digits.parse::<i32>().ok()?,
        _ => return None,
    };
    (MIN_GRADUATION_YEAR..=MAX_GRADUATION_YEAR)
        .contains(&year)
        .then_some(year)
}

/// Graduation year of the class that is currently in its senior year.
/// Before the rollover month the senior class graduates this calendar year.
pub fn current_senior_graduation_year(today: NaiveDate, rollover_month: u32) -> i32 {
    if today.month() < rollover_month {
        today.year()
    } else {
        today.year() + 1
    }
}

/// Grade 0 (kindergarten) to 12, or `None` when the email carries no usable
/// year or the student is outside that range.
pub fn derive_student_grade_from_email(email: &str, today: NaiveDate, rollover_month: u32) -> Option<u8> {
    let graduation_year = derive_graduation_year_from_email(email)?;
    let senior = current_senior_graduation_year(today, rollover_month);
    let grade = SENIOR_GRADE - (graduation_year - senior);
    (0..=SENIOR_GRADE).contains(&grade).then_some(grade as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn graduation_year_suffixes() {
        assert_eq!(derive_graduation_year_from_email("student26@kla.education"), Some(2026));
        assert_eq!(derive_graduation_year_from_email("jane.doe2031@kla.education"), Some(2031));
        assert_eq!(derive_graduation_year_from_email("a1999@kla.education"), None);
        assert_eq!(derive_graduation_year_from_email("x2101@kla.education"), None);
        assert_eq!(derive_graduation_year_from_email("teacher@kla.education"), None);
        assert_eq!(derive_graduation_year_from_email("s126@kla.education"), None);
        assert_eq!(derive_graduation_year_from_email("s7@kla.education"), None);
    }

    #[test]
    fn grade_before_rollover() {
        // Senior class of 2024 is still enrolled in January 2024.
        assert_eq!(derive_student_grade_from_email("student26@kla.education", date(2024, 1, 1), 6), Some(10));
        assert_eq!(derive_student_grade_from_email("student24@kla.education", date(2024, 5, 31), 6), Some(12));
    }

    #[test]
    fn grade_after_rollover() {
        assert_eq!(derive_student_grade_from_email("student26@kla.education", date(2024, 6, 1), 6), Some(11));
        assert_eq!(derive_student_grade_from_email("student24@kla.education", date(2024, 9, 1), 6), None);
    }

    #[test]
    fn grade_range_is_bounded() {
        assert_eq!(derive_student_grade_from_email("kid36@kla.education", date(2024, 1, 1), 6), Some(0));
        assert_eq!(derive_student_grade_from_email("kid37@kla.education", date(2024, 1, 1), 6), None);
    }
}
