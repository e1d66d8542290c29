use crate::auth::{Caller, Group};
use crate::csv;
use crate::error::{AppError, AppResult};
use crate::store::list_all;
use crate::types::{CreateLedgerEntryRequest, LedgerEntry, LedgerKind, LedgerSummary};
use crate::validate::{non_empty_trimmed, parse_iso_date};
use crate::AppState;

const BOOKKEEPERS: &[Group] = &[Group::Admin, Group::Hr];

/// Validate a `YYYY-MM` month filter.
pub fn parse_month(raw: &str) -> AppResult<String> {
    let month = raw.trim();
    let valid = month.len() == 7
        && month.as_bytes()[4] == b'-'
        && month[..4].chars().all(|c| c.is_ascii_digit())
        && month[5..]
            .parse::<u32>()
            .map(|m| (1..=12).contains(&m))
            .unwrap_or(false);
    if valid {
        Ok(month.to_string())
    } else {
        Err(AppError::BadRequest(format!("'{}' is not a YYYY-MM month", month)))
    }
}

pub async fn create_ledger_entry(
    state: &AppState,
    caller: &Caller,
    req: CreateLedgerEntryRequest,
) -> AppResult<LedgerEntry> {
    caller.require_any(BOOKKEEPERS)?;

    let mut errors = Vec::new();
    let date = parse_iso_date(&req.date)
        .map_err(|e| errors.push(format!("date: {}", e)))
        .ok();
    let description = non_empty_trimmed(&req.description);
    if description.is_none() {
        errors.push("description is required".to_string());
    }
    if req.amount_cents <= 0 {
        errors.push("amountCents must be greater than zero".to_string());
    }
    let (date, description) = match (date, description) {
        (Some(date), Some(description)) if errors.is_empty() => (date, description),
        _ => return Err(AppError::Validation(errors)),
    };

    let entry = LedgerEntry {
        id: uuid::Uuid::new_v4().to_string(),
        date: date.format("%Y-%m-%d").to_string(),
        description,
        amount_cents: req.amount_cents,
        kind: req.kind,
        category: req.category.as_deref().and_then(non_empty_trimmed),
        created_by: caller.label(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    state.ledger.create(&entry).await?;
    tracing::info!("Ledger {:?} entry {} of {} cents on {}", entry.kind, entry.id, entry.amount_cents, entry.date);
    Ok(entry)
}

/// Entries dated within `month`, oldest first.
pub async fn list_ledger_entries(state: &AppState, caller: &Caller, month: &str) -> AppResult<Vec<LedgerEntry>> {
    caller.require_any(BOOKKEEPERS)?;
    let month = parse_month(month)?;
    let prefix = format!("{}-", month);
    let mut entries: Vec<LedgerEntry> = list_all(state.ledger.as_ref(), 200)
        .await?
        .into_iter()
        .filter(|e| e.date.starts_with(&prefix))
        .collect();
    entries.sort_by(|a, b| (&a.date, &a.created_at).cmp(&(&b.date, &b.created_at)));
    Ok(entries)
}

pub fn summarize(month: &str, entries: &[LedgerEntry]) -> LedgerSummary {
    let total = |kind: LedgerKind| entries.iter().filter(|e| e.kind == kind).map(|e| e.amount_cents).sum::<i64>();
    let income_cents = total(LedgerKind::Income);
    let expense_cents = total(LedgerKind::Expense);
    LedgerSummary {
        month: month.to_string(),
        income_cents,
        expense_cents,
        net_cents: income_cents - expense_cents,
        entries: entries.len(),
    }
}

pub async fn ledger_summary(state: &AppState, caller: &Caller, month: &str) -> AppResult<LedgerSummary> {
    let entries = list_ledger_entries(state, caller, month).await?;
    Ok(summarize(month.trim(), &entries))
}

fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    format!("{}{}.{:02}", sign, cents.abs() / 100, cents.abs() % 100)
}

pub async fn export_ledger_csv(state: &AppState, caller: &Caller, month: &str) -> AppResult<String> {
    let entries = list_ledger_entries(state, caller, month).await?;
    let mut rows: Vec<Vec<String>> = vec![vec![
        "date".to_string(),
        "kind".to_string(),
        "description".to_string(),
        "category".to_string(),
        "amount".to_string(),
        "createdBy".to_string(),
    ]];
    rows.extend(entries.iter().map(|e| {
        vec![
            e.date.clone(),
            match e.kind {
                LedgerKind::Income => "INCOME".to_string(),
                LedgerKind::Expense => "EXPENSE".to_string(),
            },
            e.description.clone(),
            e.category.clone().unwrap_or_default(),
            format_cents(e.amount_cents),
            e.created_by.clone(),
        ]
    }));
    csv::to_csv(&rows, ',')
}
