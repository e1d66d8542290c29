use crate::auth::{Caller, Group};
use crate::email;
use crate::error::{AppError, AppResult, StoreError};
use crate::types::{CreateReservationRequest, Reservation};
use crate::validate::{is_valid_email, non_empty_trimmed, normalize_email};
use crate::AppState;
use chrono::NaiveDate;

const SLOT_MINUTES: u32 = 60;

/// Permitted start-time range for a slot, in minutes after midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_minutes: u32,
    pub end_minutes: u32,
}

impl TimeWindow {
    /// Parse `HH:MM-HH:MM`.
    pub fn parse_range(raw: &str) -> Result<Self, String> {
        let (start, end) = raw
            .split_once('-')
            .ok_or_else(|| format!("expected HH:MM-HH:MM, got {:?}", raw))?;
        let window = Self {
            start_minutes: parse_hhmm(start)?,
            end_minutes: parse_hhmm(end)?,
        };
        if window.start_minutes >= window.end_minutes {
            return Err(format!("window {:?} ends before it starts", raw));
        }
        Ok(window)
    }

    pub fn admits(&self, slot_start_minutes: u32, slot_minutes: u32) -> bool {
        slot_start_minutes >= self.start_minutes
            && slot_start_minutes + slot_minutes <= self.end_minutes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationWindows {
    pub weekday: TimeWindow,
    pub weekend: TimeWindow,
}

impl ReservationWindows {
    pub fn for_weekday(&self, iso_weekday: u32) -> TimeWindow {
        if iso_weekday >= 6 {
            self.weekend
        } else {
            self.weekday
        }
    }
}

/// `HH:MM` (24h) to minutes after midnight; `24:00` is allowed as an end.
pub fn parse_hhmm(raw: &str) -> Result<u32, String> {
    let raw = raw.trim();
    let (h, m) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected HH:MM, got {:?}", raw))?;
    let hours: u32 = h.parse().map_err(|_| format!("invalid hour in {:?}", raw))?;
    let minutes: u32 = m.parse().map_err(|_| format!("invalid minutes in {:?}", raw))?;
    if m.len() != 2 || minutes > 59 || hours > 24 || (hours == 24 && minutes != 0) {
        return Err(format!("{:?} is not a valid time", raw));
    }
    Ok(hours * 60 + minutes)
}

/// ISO weekday (1 = Monday .. 7 = Sunday) by Zeller's congruence, with no
/// calendar or timezone library involved.
pub fn iso_weekday(year: i32, month: u32, day: u32) -> u32 {
    let (y, m) = if month < 3 {
        (year - 1, month as i32 + 12)
    } else {
        (year, month as i32)
    };
    let k = y.rem_euclid(100);
    let j = y.div_euclid(100);
    // h: 0 = Saturday, 1 = Sunday, ..., 6 = Friday
    let h = (day as i32 + (13 * (m + 1)) / 5 + k + k / 4 + j / 4 + 5 * j).rem_euclid(7);
    ((h + 5).rem_euclid(7) + 1) as u32
}

/// Split a strict `YYYY-MM-DD` into checked calendar parts.
pub fn parse_date_parts(raw: &str) -> AppResult<(i32, u32, u32)> {
    let parts: Vec<&str> = raw.trim().split('-').collect();
    let bad = || AppError::BadRequest(format!("'{}' is not a YYYY-MM-DD date", raw.trim()));
    if parts.len() != 3 || parts[0].len() != 4 || parts[1].len() != 2 || parts[2].len() != 2 {
        return Err(bad());
    }
    let year: i32 = parts[0].parse().map_err(|_| bad())?;
    let month: u32 = parts[1].parse().map_err(|_| bad())?;
    let day: u32 = parts[2].parse().map_err(|_| bad())?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(bad)?;
    Ok((year, month, day))
}

/// Reject `hour` unless a 60 minute slot starting then fits the day's window.
pub fn check_slot(date: &str, hour: i64, windows: &ReservationWindows) -> AppResult<()> {
    let (year, month, day) = parse_date_parts(date)?;
    if !(0..=23).contains(&hour) {
        return Err(AppError::BadRequest(format!("hour {} is out of range 0-23", hour)));
    }

    let weekday = iso_weekday(year, month, day);
    let window = windows.for_weekday(weekday);
    let slot_start = hour as u32 * 60;
    if !window.admits(slot_start, SLOT_MINUTES) {
        return Err(AppError::Validation(vec![format!(
            "{}:00 on {} is outside the bookable window {}-{}",
            hour,
            date,
            format_minutes(window.start_minutes),
            format_minutes(window.end_minutes)
        )]));
    }
    Ok(())
}

pub fn format_minutes(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Sorted hours already taken on `date`.
pub async fn list_reserved_hours(state: &AppState, date: &str) -> AppResult<Vec<u8>> {
    parse_date_parts(date)?;
    let mut hours: Vec<u8> = state
        .reservations
        .list_partition(&Reservation::pk_for(date.trim()))
        .await?
        .into_iter()
        .map(|r| r.hour)
        .collect();
    hours.sort_unstable();
    hours.dedup();
    Ok(hours)
}

/// Validate and book a slot. The conditional create on `(date, hour)` is the
/// only double-booking guard: a taken slot is a `Conflict`, never an overwrite.
pub async fn create_reservation_validated(
    state: &AppState,
    caller: &Caller,
    req: CreateReservationRequest,
    today: NaiveDate,
) -> AppResult<Reservation> {
    let date = req.date.trim().to_string();
    let (year, month, day) = parse_date_parts(&date)?;

    let mut errors = Vec::new();
    let contact_name = non_empty_trimmed(&req.contact_name);
    if contact_name.is_none() {
        errors.push("contactName is required".to_string());
    }
    let contact_email = normalize_email(&req.contact_email);
    if !is_valid_email(&contact_email) {
        errors.push(format!("contactEmail '{}' is not a valid email", req.contact_email.trim()));
    }
    if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
        if date < today {
            errors.push(format!("{} is in the past", date));
        }
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    check_slot(&date, req.hour, &state.config.reservation_windows)?;

    let reservation = Reservation {
        date: date.clone(),
        hour: req.hour as u8,
        contact_name: contact_name.unwrap_or_default(),
        contact_email: contact_email.clone(),
        contact_phone: req.contact_phone.as_deref().and_then(non_empty_trimmed),
        notes: req.notes.as_deref().and_then(non_empty_trimmed),
        owner: caller.subject.clone(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    match state.reservations.create(&reservation).await {
        Ok(()) => {}
        Err(StoreError::AlreadyExists(_)) => {
            tracing::info!("Slot {} {:02}:00 already reserved", date, reservation.hour);
            return Err(AppError::Conflict(format!(
                "{} {:02}:00 is already reserved",
                date, reservation.hour
            )));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!("Reservation created for {} {:02}:00 by {}", date, reservation.hour, caller.subject);

    email::notify(
        state.mailer.as_ref(),
        &[contact_email],
        "Sports field reservation confirmed",
        &format!(
            "Hi {},\n\nYour sports field reservation for {} at {:02}:00 is confirmed.\n\nManage reservations: {}/reservations\n",
            reservation.contact_name, reservation.date, reservation.hour, state.config.app_base_url
        ),
    )
    .await;

    Ok(reservation)
}

pub async fn cancel_reservation(state: &AppState, caller: &Caller, date: &str, hour: i64) -> AppResult<()> {
    parse_date_parts(date)?;
    if !(0..=23).contains(&hour) {
        return Err(AppError::BadRequest(format!("hour {} is out of range 0-23", hour)));
    }
    let pk = Reservation::pk_for(date.trim());
    let sk = Reservation::sk_for(hour as u8);
    let existing = state
        .reservations
        .get(&pk, &sk)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No reservation for {} {:02}:00", date.trim(), hour)))?;

    caller.require_owner_or(&existing.owner, &[Group::Admin])?;
    state.reservations.delete(&pk, &sk).await?;
    tracing::info!("Reservation {} {:02}:00 cancelled by {}", existing.date, existing.hour, caller.subject);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::email::RecordingMailer;
    use std::sync::Arc;

    fn windows() -> ReservationWindows {
        Config::for_tests().reservation_windows
    }

    fn request(date: &str, hour: i64) -> CreateReservationRequest {
        CreateReservationRequest {
            date: date.into(),
            hour,
            contact_name: "Coach Lee".into(),
            contact_email: "Coach@KLA.education".into(),
            contact_phone: Some(" ".into()),
            notes: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn zeller_matches_known_weekdays() {
        assert_eq!(iso_weekday(2024, 1, 6), 6); // Saturday
        assert_eq!(iso_weekday(2024, 1, 7), 7); // Sunday
        assert_eq!(iso_weekday(2024, 1, 8), 1); // Monday
        assert_eq!(iso_weekday(2000, 2, 29), 2); // Tuesday
        assert_eq!(iso_weekday(1999, 12, 31), 5); // Friday
        assert_eq!(iso_weekday(2026, 10, 18), 7); // Sunday
    }

    #[test]
    fn weekend_window_bounds() {
        let w = windows();
        assert!(check_slot("2024-01-06", 11, &w).is_err());
        assert!(check_slot("2024-01-06", 12, &w).is_ok());
        assert!(check_slot("2024-01-06", 17, &w).is_ok());
        assert!(check_slot("2024-01-06", 18, &w).is_err());
    }

    #[test]
    fn weekday_window_and_bad_input() {
        let w = windows();
        assert!(check_slot("2024-01-08", 14, &w).is_err());
        assert!(check_slot("2024-01-08", 15, &w).is_ok());
        assert!(check_slot("2024-01-08", 20, &w).is_ok());
        assert!(matches!(check_slot("2024-01-08", 24, &w), Err(AppError::BadRequest(_))));
        assert!(matches!(check_slot("2024-02-30", 15, &w), Err(AppError::BadRequest(_))));
        assert!(matches!(check_slot("6/1/2024", 15, &w), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn window_parsing() {
        assert_eq!(
            TimeWindow::parse_range("12:00-18:30"),
            Ok(TimeWindow { start_minutes: 720, end_minutes: 1110 })
        );
        assert!(TimeWindow::parse_range("12:00").is_err());
        assert!(TimeWindow::parse_range("12:60-13:00").is_err());
        assert!(TimeWindow::parse_range("09:00-24:00").is_ok());
    }

    #[tokio::test]
    async fn second_booking_of_same_slot_conflicts() {
        let mailer = Arc::new(RecordingMailer::default());
        let mut state = AppState::in_memory(Config::for_tests());
        state.mailer = mailer.clone();
        let caller = Caller::new("sub-1", Some("coach@kla.education"), &[]);
        let other = Caller::new("sub-2", None, &[]);

        let first = create_reservation_validated(&state, &caller, request("2024-01-06", 12), today())
            .await
            .unwrap();
        assert_eq!(first.contact_email, "coach@kla.education");
        assert_eq!(first.contact_phone, None);

        let err = create_reservation_validated(&state, &other, request("2024-01-06", 12), today())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let stored = state
            .reservations
            .get(&Reservation::pk_for("2024-01-06"), &Reservation::sk_for(12))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.owner, "sub-1");
        assert_eq!(list_reserved_hours(&state, "2024-01-06").await.unwrap(), vec![12]);
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn rejects_past_dates_and_bad_contacts() {
        let state = AppState::in_memory(Config::for_tests());
        let caller = Caller::new("sub-1", None, &[]);
        let mut req = request("2023-12-30", 12);
        req.contact_email = "not-an-email".into();
        req.contact_name = " ".into();
        let err = create_reservation_validated(&state, &caller, req, today()).await.unwrap_err();
        match err {
            AppError::Validation(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        assert!(state.reservations.list_partition("RESERVATION#2023-12-30").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_owner_or_admin_cancels() {
        let state = AppState::in_memory(Config::for_tests());
        let owner = Caller::new("sub-1", None, &[]);
        let stranger = Caller::new("sub-2", None, &["Teacher"]);
        let admin = Caller::new("sub-3", None, &["Admin"]);
        create_reservation_validated(&state, &owner, request("2024-01-08", 16), today())
            .await
            .unwrap();

        assert!(matches!(
            cancel_reservation(&state, &stranger, "2024-01-08", 16).await,
            Err(AppError::Forbidden(_))
        ));
        cancel_reservation(&state, &admin, "2024-01-08", 16).await.unwrap();
        assert!(list_reserved_hours(&state, "2024-01-08").await.unwrap().is_empty());
        assert!(matches!(
            cancel_reservation(&state, &owner, "2024-01-08", 16).await,
            Err(AppError::NotFound(_))
        ));
    }
}
