use crate::auth::{Caller, Group};
use crate::email;
use crate::error::{AppError, AppResult};
use crate::reservations::{format_minutes, parse_date_parts, parse_hhmm};
use crate::store::Page;
use crate::types::{CreatePcLabReservationRequest, PcLabDecisionRequest, PcLabReservation, PcLabStatus};
use crate::validate::non_empty_trimmed;
use crate::AppState;
use chrono::NaiveDate;

const REQUESTERS: &[Group] = &[Group::Teacher, Group::Admin];
const APPROVERS: &[Group] = &[Group::ItAdmins, Group::Admin];

/// A requester's decision on their own request, or an approver's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcLabDecision {
    Approve,
    Reject,
    Cancel,
}

impl PcLabDecision {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }

    fn target(&self) -> PcLabStatus {
        match self {
            Self::Approve => PcLabStatus::Approved,
            Self::Reject => PcLabStatus::Rejected,
            Self::Cancel => PcLabStatus::Cancelled,
        }
    }
}

pub async fn create_pc_lab_reservation(
    state: &AppState,
    caller: &Caller,
    req: CreatePcLabReservationRequest,
    today: NaiveDate,
) -> AppResult<PcLabReservation> {
    caller.require_any(REQUESTERS)?;
    let (year, month, day) = parse_date_parts(&req.date)?;

    let mut errors = Vec::new();
    let start = parse_hhmm(&req.start_time).map_err(|e| errors.push(format!("startTime: {}", e))).ok();
    let end = parse_hhmm(&req.end_time).map_err(|e| errors.push(format!("endTime: {}", e))).ok();
    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            errors.push("startTime must be before endTime".to_string());
        }
    }
    let purpose = non_empty_trimmed(&req.purpose);
    if purpose.is_none() {
        errors.push("purpose is required".to_string());
    }
    if req.seats == 0 {
        errors.push("seats must be at least 1".to_string());
    }
    if NaiveDate::from_ymd_opt(year, month, day).is_some_and(|d| d < today) {
        errors.push(format!("{} is in the past", req.date.trim()));
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let reservation = PcLabReservation {
        id: uuid::Uuid::new_v4().to_string(),
        date: req.date.trim().to_string(),
        start_time: format_minutes(start.unwrap_or_default()),
        end_time: format_minutes(end.unwrap_or_default()),
        purpose: purpose.unwrap_or_default(),
        seats: req.seats,
        requested_by: caller.subject.clone(),
        requester_email: caller.email.clone(),
        status: PcLabStatus::Pending,
        decided_by: None,
        decision_note: None,
        created_at: chrono::Utc::now().to_rfc3339(),
        updated_at: None,
    };
    state.pc_lab.create(&reservation).await?;
    tracing::info!(
        "PC lab request {} for {} {}-{} by {}",
        reservation.id,
        reservation.date,
        reservation.start_time,
        reservation.end_time,
        caller.label()
    );
    Ok(reservation)
}

pub async fn list_pc_lab_reservations(
    state: &AppState,
    cursor: Option<String>,
    limit: usize,
) -> AppResult<Page<PcLabReservation>> {
    Ok(state.pc_lab.list(cursor, limit.clamp(1, 100)).await?)
}

/// Move a `PENDING` request to its final state. Anything already decided
/// is a conflict.
pub async fn decide_pc_lab_reservation(
    state: &AppState,
    caller: &Caller,
    id: &str,
    decision: PcLabDecision,
    req: PcLabDecisionRequest,
) -> AppResult<PcLabReservation> {
    let key = PcLabReservation::pk_for(id);
    let mut reservation = state
        .pc_lab
        .get(&key, &key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("PC lab reservation {} not found", id)))?;

    match decision {
        PcLabDecision::Cancel => caller.require_owner_or(&reservation.requested_by, &[Group::Admin])?,
        PcLabDecision::Approve | PcLabDecision::Reject => caller.require_any(APPROVERS)?,
    }

    if reservation.status != PcLabStatus::Pending {
        return Err(AppError::Conflict(format!(
            "PC lab reservation {} is already {:?}",
            id, reservation.status
        )));
    }

    reservation.status = decision.target();
    reservation.decided_by = Some(caller.label());
    reservation.decision_note = req.note.as_deref().and_then(non_empty_trimmed);
    reservation.updated_at = Some(chrono::Utc::now().to_rfc3339());
    state.pc_lab.update(&reservation).await?;
    tracing::info!("PC lab reservation {} is now {:?} ({})", id, reservation.status, caller.label());

    if let Some(to) = reservation.requester_email.clone() {
        if decision != PcLabDecision::Cancel || caller.subject != reservation.requested_by {
            let note = reservation
                .decision_note
                .as_deref()
                .map(|n| format!("\nNote: {}\n", n))
                .unwrap_or_default();
            email::notify(
                state.mailer.as_ref(),
                &[to],
                &format!("PC lab request {:?}", reservation.status),
                &format!(
                    "Your PC lab request for {} {}-{} ({}) is now {:?}.\n{}\n{}/pc-lab\n",
                    reservation.date,
                    reservation.start_time,
                    reservation.end_time,
                    reservation.purpose,
                    reservation.status,
                    note,
                    state.config.app_base_url
                ),
            )
            .await;
        }
    }

    Ok(reservation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::email::RecordingMailer;
    use std::sync::Arc;

    fn request(start: &str, end: &str) -> CreatePcLabReservationRequest {
        CreatePcLabReservationRequest {
            date: "2024-03-04".into(),
            start_time: start.into(),
            end_time: end.into(),
            purpose: "Coding club".into(),
            seats: 20,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[tokio::test]
    async fn request_then_approve_once() {
        let mailer = Arc::new(RecordingMailer::default());
        let mut state = AppState::in_memory(Config::for_tests());
        state.mailer = mailer.clone();
        let teacher = Caller::new("t-1", Some("t@kla.education"), &["Teacher"]);
        let it = Caller::new("it-1", Some("it@kla.education"), &["ITAdmins"]);

        let created = create_pc_lab_reservation(&state, &teacher, request("9:00", "10:30"), today())
            .await
            .unwrap();
        assert_eq!(created.status, PcLabStatus::Pending);
        assert_eq!(created.start_time, "09:00");

        let err = decide_pc_lab_reservation(&state, &teacher, &created.id, PcLabDecision::Approve, Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let approved = decide_pc_lab_reservation(
            &state,
            &it,
            &created.id,
            PcLabDecision::Approve,
            PcLabDecisionRequest { note: Some("Room B".into()) },
        )
        .await
        .unwrap();
        assert_eq!(approved.status, PcLabStatus::Approved);
        assert_eq!(approved.decided_by.as_deref(), Some("it@kla.education"));
        assert_eq!(mailer.sent()[0].to, vec!["t@kla.education"]);

        let err = decide_pc_lab_reservation(&state, &teacher, &created.id, PcLabDecision::Cancel, Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn validation_and_access() {
        let state = AppState::in_memory(Config::for_tests());
        let teacher = Caller::new("t-1", None, &["Teacher"]);
        let err = create_pc_lab_reservation(&state, &teacher, request("11:00", "10:00"), today())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.len() == 1));

        let student = Caller::new("s-1", None, &[]);
        let err = create_pc_lab_reservation(&state, &student, request("09:00", "10:00"), today())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn requester_may_cancel_pending() {
        let state = AppState::in_memory(Config::for_tests());
        let teacher = Caller::new("t-1", None, &["Teacher"]);
        let other = Caller::new("t-2", None, &["Teacher"]);
        let created = create_pc_lab_reservation(&state, &teacher, request("13:00", "14:00"), today())
            .await
            .unwrap();

        assert!(decide_pc_lab_reservation(&state, &other, &created.id, PcLabDecision::Cancel, Default::default())
            .await
            .is_err());
        let cancelled = decide_pc_lab_reservation(&state, &teacher, &created.id, PcLabDecision::Cancel, Default::default())
            .await
            .unwrap();
        assert_eq!(cancelled.status, PcLabStatus::Cancelled);

        let page = list_pc_lab_reservations(&state, None, 10).await.unwrap();
        assert_eq!(page.items.len(), 1);
    }
}
