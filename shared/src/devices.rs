use crate::auth::{Caller, Group};
use crate::error::{AppError, AppResult, StoreError};
use crate::store::Page;
use crate::types::{ActiveLoan, CheckoutDeviceRequest, DeviceLoan, LoanStatus};
use crate::validate::{is_valid_email, non_empty_trimmed, normalize_email, parse_iso_date};
use crate::AppState;

const LOAN_MANAGERS: &[Group] = &[Group::ItAdmins, Group::Admin];

/// Lend a device. The `ActiveLoan` marker's conditional create is what stops
/// the same device going out twice.
pub async fn checkout_device(state: &AppState, caller: &Caller, req: CheckoutDeviceRequest) -> AppResult<DeviceLoan> {
    caller.require_any(LOAN_MANAGERS)?;

    let mut errors = Vec::new();
    let device_tag = non_empty_trimmed(&req.device_tag).map(|t| t.to_uppercase());
    if device_tag.is_none() {
        errors.push("deviceTag is required".to_string());
    }
    let borrower_email = normalize_email(&req.borrower_email);
    if !is_valid_email(&borrower_email) {
        errors.push(format!("borrowerEmail '{}' is not a valid email", req.borrower_email.trim()));
    }
    let due_date = match req.due_date.as_deref().and_then(non_empty_trimmed) {
        Some(raw) => match parse_iso_date(&raw) {
            Ok(date) => Some(date.format("%Y-%m-%d").to_string()),
            Err(e) => {
                errors.push(format!("dueDate: {}", e));
                None
            }
        },
        None => None,
    };
    let device_tag = match device_tag {
        Some(tag) if errors.is_empty() => tag,
        _ => return Err(AppError::Validation(errors)),
    };

    let now = chrono::Utc::now().to_rfc3339();
    let loan = DeviceLoan {
        id: uuid::Uuid::new_v4().to_string(),
        device_tag: device_tag.clone(),
        borrower_email,
        loaned_at: now.clone(),
        due_date,
        returned_at: None,
        status: LoanStatus::Out,
        notes: req.notes.as_deref().and_then(non_empty_trimmed),
        issued_by: caller.label(),
    };
    let marker = ActiveLoan {
        device_tag: device_tag.clone(),
        loan_id: loan.id.clone(),
        loaned_at: now,
    };

    match state.active_loans.create(&marker).await {
        Ok(()) => {}
        Err(StoreError::AlreadyExists(_)) => {
            return Err(AppError::Conflict(format!("Device {} is already on loan", device_tag)));
        }
        Err(e) => return Err(e.into()),
    }

    if let Err(e) = state.device_loans.create(&loan).await {
        tracing::error!("Failed to record loan of {}; releasing marker: {}", device_tag, e);
        if let Err(release) = state
            .active_loans
            .delete(&ActiveLoan::pk_for(&device_tag), ActiveLoan::SK)
            .await
        {
            tracing::error!("Failed to release loan marker for {}: {}", device_tag, release);
        }
        return Err(e.into());
    }

    tracing::info!("Device {} loaned to {} by {}", loan.device_tag, loan.borrower_email, loan.issued_by);
    Ok(loan)
}

pub async fn return_device(state: &AppState, caller: &Caller, loan_id: &str) -> AppResult<DeviceLoan> {
    caller.require_any(LOAN_MANAGERS)?;
    let key = DeviceLoan::pk_for(loan_id);
    let mut loan = state
        .device_loans
        .get(&key, &key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", loan_id)))?;

    if loan.status == LoanStatus::Returned {
        return Err(AppError::Conflict(format!("Loan {} was already returned", loan_id)));
    }

    loan.status = LoanStatus::Returned;
    loan.returned_at = Some(chrono::Utc::now().to_rfc3339());
    state.device_loans.update(&loan).await?;

    let marker_pk = ActiveLoan::pk_for(&loan.device_tag);
    match state.active_loans.get(&marker_pk, ActiveLoan::SK).await? {
        Some(marker) if marker.loan_id == loan.id => {
            state.active_loans.delete(&marker_pk, ActiveLoan::SK).await?;
        }
        Some(marker) => {
            tracing::warn!("Device {} marker belongs to loan {}, leaving it", loan.device_tag, marker.loan_id);
        }
        None => {
            tracing::warn!("Device {} had no active loan marker", loan.device_tag);
        }
    }

    tracing::info!("Device {} returned (loan {})", loan.device_tag, loan.id);
    Ok(loan)
}

pub async fn list_device_loans(
    state: &AppState,
    caller: &Caller,
    cursor: Option<String>,
    limit: usize,
) -> AppResult<Page<DeviceLoan>> {
    caller.require_any(LOAN_MANAGERS)?;
    Ok(state.device_loans.list(cursor, limit.clamp(1, 100)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::MemoryRepository;
    use std::sync::Arc;

    fn it() -> Caller {
        Caller::new("it-1", Some("it@kla.education"), &["ITAdmins"])
    }

    fn checkout(tag: &str) -> CheckoutDeviceRequest {
        CheckoutDeviceRequest {
            device_tag: tag.into(),
            borrower_email: "Student30@kla.education".into(),
            due_date: Some("2024-06-30".into()),
            notes: None,
        }
    }

    #[tokio::test]
    async fn device_cannot_be_loaned_twice() {
        let state = AppState::in_memory(Config::for_tests());
        let loan = checkout_device(&state, &it(), checkout("lap-01")).await.unwrap();
        assert_eq!(loan.device_tag, "LAP-01");
        assert_eq!(loan.borrower_email, "student30@kla.education");

        let err = checkout_device(&state, &it(), checkout("LAP-01")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let returned = return_device(&state, &it(), &loan.id).await.unwrap();
        assert_eq!(returned.status, LoanStatus::Returned);
        assert!(matches!(
            return_device(&state, &it(), &loan.id).await,
            Err(AppError::Conflict(_))
        ));

        let again = checkout_device(&state, &it(), checkout("LAP-01")).await.unwrap();
        assert_ne!(again.id, loan.id);
        assert_eq!(list_device_loans(&state, &it(), None, 10).await.unwrap().items.len(), 2);
    }

    #[tokio::test]
    async fn failed_loan_write_releases_marker() {
        let loans = Arc::new(MemoryRepository::<DeviceLoan>::new());
        loans.fail_writes_where(|_| true);
        let mut state = AppState::in_memory(Config::for_tests());
        state.device_loans = loans;

        assert!(checkout_device(&state, &it(), checkout("TAB-7")).await.is_err());
        assert!(state
            .active_loans
            .get(&ActiveLoan::pk_for("TAB-7"), ActiveLoan::SK)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn validation_errors_are_collected() {
        let state = AppState::in_memory(Config::for_tests());
        let req = CheckoutDeviceRequest {
            device_tag: " ".into(),
            borrower_email: "nobody".into(),
            due_date: Some("30/06/2024".into()),
            notes: None,
        };
        match checkout_device(&state, &it(), req).await {
            Err(AppError::Validation(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        let teacher = Caller::new("t", None, &["Teacher"]);
        assert!(matches!(
            checkout_device(&state, &teacher, checkout("X")).await,
            Err(AppError::Forbidden(_))
        ));
    }
}
