//! Role assignments: CRUD, bulk role edits and directory sync.
//!
//! Email and subject uniqueness is a scan before the write. Two concurrent
//! writers can both pass the scan; only the id key is guarded by the store.

use crate::auth::{Caller, Group};
use crate::error::{AppError, AppResult};
use crate::imports::{load_index, UserRoleImport};
use crate::store::{list_all, Page};
use crate::types::{CreateRoleAssignmentRequest, RoleAssignment, UpdateRoleAssignmentRequest};
use crate::validate::{is_valid_email, is_valid_role, non_empty_trimmed, normalize_email};
use crate::AppState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MANAGERS: &[Group] = &[Group::Admin, Group::ItAdmins];
const SCAN_PAGE_SIZE: usize = 200;
const MAX_REPORTED_FAILURES: usize = 10;

fn validate_roles(roles: &[String]) -> AppResult<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    let mut errors = Vec::new();
    for role in roles.iter().map(|r| r.trim()).filter(|r| !r.is_empty()) {
        if !is_valid_role(role) {
            errors.push(format!("invalid role '{}'", role));
        } else if !out.iter().any(|r| r == role) {
            out.push(role.to_string());
        }
    }
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(AppError::Validation(errors))
    }
}

async fn ensure_unique(
    state: &AppState,
    id: &str,
    email_lower: &str,
    subject: Option<&str>,
) -> AppResult<()> {
    let existing = list_all(state.role_assignments.as_ref(), SCAN_PAGE_SIZE).await?;
    for other in existing.iter().filter(|r| r.id != id) {
        if other.primary_email_lower == email_lower {
            return Err(AppError::Conflict(format!(
                "{} is already assigned to role record {}",
                email_lower, other.id
            )));
        }
        if let (Some(subject), Some(theirs)) = (subject, other.external_identity_subject.as_deref()) {
            if subject == theirs {
                return Err(AppError::Conflict(format!(
                    "identity {} is already linked to {}",
                    subject, other.primary_email_lower
                )));
            }
        }
    }
    Ok(())
}

async fn load(state: &AppState, id: &str) -> AppResult<RoleAssignment> {
    let key = RoleAssignment::pk_for(id);
    state
        .role_assignments
        .get(&key, &key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Role assignment {} not found", id)))
}

pub async fn list_role_assignments(
    state: &AppState,
    caller: &Caller,
    cursor: Option<String>,
    limit: usize,
) -> AppResult<Page<RoleAssignment>> {
    caller.require_any(MANAGERS)?;
    Ok(state.role_assignments.list(cursor, limit.clamp(1, 100)).await?)
}

pub async fn create_role_assignment(
    state: &AppState,
    caller: &Caller,
    req: CreateRoleAssignmentRequest,
) -> AppResult<RoleAssignment> {
    caller.require_any(MANAGERS)?;
    let email_lower = normalize_email(&req.primary_email);
    if !is_valid_email(&email_lower) {
        return Err(AppError::Validation(vec![format!(
            "primaryEmail '{}' is not a valid email",
            req.primary_email.trim()
        )]));
    }
    let roles = validate_roles(&req.roles)?;
    let subject = req.external_identity_subject.as_deref().and_then(non_empty_trimmed);

    let id = uuid::Uuid::new_v4().to_string();
    ensure_unique(state, &id, &email_lower, subject.as_deref()).await?;

    let assignment = RoleAssignment {
        id,
        primary_email: req.primary_email.trim().to_string(),
        primary_email_lower: email_lower,
        roles,
        verified_emails: Vec::new(),
        external_identity_subject: subject,
        notes: req.notes.as_deref().and_then(non_empty_trimmed),
        created_at: chrono::Utc::now().to_rfc3339(),
        updated_at: None,
        created_by: Some(caller.label()),
        updated_by: None,
    };
    state.role_assignments.create(&assignment).await?;
    tracing::info!("Role assignment {} created for {}", assignment.id, assignment.primary_email_lower);
    Ok(assignment)
}

pub async fn update_role_assignment(
    state: &AppState,
    caller: &Caller,
    id: &str,
    req: UpdateRoleAssignmentRequest,
) -> AppResult<RoleAssignment> {
    caller.require_any(MANAGERS)?;
    let mut assignment = load(state, id).await?;

    if let Some(email) = req.primary_email {
        let email_lower = normalize_email(&email);
        if !is_valid_email(&email_lower) {
            return Err(AppError::Validation(vec![format!(
                "primaryEmail '{}' is not a valid email",
                email.trim()
            )]));
        }
        assignment.primary_email = email.trim().to_string();
        assignment.primary_email_lower = email_lower;
    }
    if let Some(roles) = req.roles {
        assignment.roles = validate_roles(&roles)?;
    }
    if let Some(subject) = req.external_identity_subject {
        assignment.external_identity_subject = non_empty_trimmed(&subject);
    }
    if let Some(notes) = req.notes {
        assignment.notes = non_empty_trimmed(&notes);
    }

    ensure_unique(
        state,
        &assignment.id,
        &assignment.primary_email_lower,
        assignment.external_identity_subject.as_deref(),
    )
    .await?;

    assignment.updated_at = Some(chrono::Utc::now().to_rfc3339());
    assignment.updated_by = Some(caller.label());
    state.role_assignments.update(&assignment).await?;
    tracing::info!("Role assignment {} updated by {}", assignment.id, caller.label());
    Ok(assignment)
}

pub async fn delete_role_assignment(state: &AppState, caller: &Caller, id: &str) -> AppResult<()> {
    caller.require_any(MANAGERS)?;
    let assignment = load(state, id).await?;
    let key = RoleAssignment::pk_for(&assignment.id);
    state.role_assignments.delete(&key, &key).await?;
    tracing::info!("Role assignment {} ({}) deleted by {}", id, assignment.primary_email_lower, caller.label());
    Ok(())
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkRoleAction {
    Add,
    Remove,
    Set,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateRolesRequest {
    pub primary_emails: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub action: BulkRoleAction,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    pub primary_email: String,
    pub message: String,
}

#[derive(Debug, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateSummary {
    pub updated: u32,
    pub created: u32,
    pub failed: u32,
    pub failures: Vec<BulkFailure>,
}

impl BulkUpdateSummary {
    fn fail(&mut self, email: &str, message: String) {
        tracing::warn!("Bulk role update failed for {}: {}", email, message);
        self.failed += 1;
        if self.failures.len() < MAX_REPORTED_FAILURES {
            self.failures.push(BulkFailure {
                primary_email: email.to_string(),
                message,
            });
        }
    }
}

fn apply_action(current: &[String], roles: &[String], action: BulkRoleAction) -> Vec<String> {
    match action {
        BulkRoleAction::Set => roles.to_vec(),
        BulkRoleAction::Add => {
            let mut out = current.to_vec();
            for role in roles {
                if !out.contains(role) {
                    out.push(role.clone());
                }
            }
            out
        }
        BulkRoleAction::Remove => current.iter().filter(|r| !roles.contains(*r)).cloned().collect(),
    }
}

/// Add, remove or replace roles for many emails at once. Every email is
/// handled independently; one failure never stops the rest.
pub async fn bulk_update_user_roles(
    state: &AppState,
    caller: &Caller,
    req: BulkUpdateRolesRequest,
) -> AppResult<BulkUpdateSummary> {
    caller.require_any(MANAGERS)?;
    let roles = validate_roles(&req.roles)?;
    if roles.is_empty() && req.action != BulkRoleAction::Set {
        return Err(AppError::Validation(vec!["roles must not be empty".to_string()]));
    }

    let mut emails: Vec<String> = Vec::new();
    for email in req.primary_emails.iter().map(|e| normalize_email(e)).filter(|e| !e.is_empty()) {
        if !emails.contains(&email) {
            emails.push(email);
        }
    }
    if emails.is_empty() {
        return Err(AppError::Validation(vec!["primaryEmails must not be empty".to_string()]));
    }

    let index = load_index::<UserRoleImport>(state.role_assignments.as_ref()).await?;
    let actor = caller.label();
    let mut summary = BulkUpdateSummary::default();

    for email in emails {
        if !is_valid_email(&email) {
            summary.fail(&email, "not a valid email".to_string());
            continue;
        }
        let now = chrono::Utc::now().to_rfc3339();
        match index.get(&email) {
            Some(existing) => {
                let updated = RoleAssignment {
                    roles: apply_action(&existing.roles, &roles, req.action),
                    updated_at: Some(now),
                    updated_by: Some(actor.clone()),
                    ..existing.clone()
                };
                match state.role_assignments.update(&updated).await {
                    Ok(()) => summary.updated += 1,
                    Err(e) => summary.fail(&email, e.to_string()),
                }
            }
            None if req.action == BulkRoleAction::Remove => {
                summary.fail(&email, "no role assignment for this email".to_string());
            }
            None => {
                let created = RoleAssignment {
                    id: uuid::Uuid::new_v4().to_string(),
                    primary_email: email.clone(),
                    primary_email_lower: email.clone(),
                    roles: roles.clone(),
                    verified_emails: Vec::new(),
                    external_identity_subject: None,
                    notes: None,
                    created_at: now,
                    updated_at: None,
                    created_by: Some(actor.clone()),
                    updated_by: None,
                };
                match state.role_assignments.create(&created).await {
                    Ok(()) => summary.created += 1,
                    Err(e) => summary.fail(&email, e.to_string()),
                }
            }
        }
    }

    tracing::info!(
        "Bulk {:?} of {:?} by {}: {} updated, {} created, {} failed",
        req.action,
        roles,
        actor,
        summary.updated,
        summary.created,
        summary.failed
    );
    Ok(summary)
}

#[derive(Debug, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub scanned: u32,
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub conflicts: u32,
}

/// Link every directory user to a role assignment by email, recording the
/// identity subject and verified email.
pub async fn sync_cognito_users(state: &AppState, caller: &Caller) -> AppResult<SyncSummary> {
    caller.require_any(MANAGERS)?;
    let mut index: HashMap<String, RoleAssignment> =
        load_index::<UserRoleImport>(state.role_assignments.as_ref()).await?;
    let mut owners: HashMap<String, String> = index
        .values()
        .filter_map(|r| Some((r.external_identity_subject.clone()?, r.primary_email_lower.clone())))
        .collect();

    let actor = caller.label();
    let mut summary = SyncSummary::default();
    let mut token = None;

    loop {
        let page = state
            .directory
            .list_users(token)
            .await
            .map_err(AppError::Internal)?;

        for user in page.users {
            summary.scanned += 1;
            let email = match user.email.as_deref().map(normalize_email) {
                Some(email) if user.enabled && is_valid_email(&email) => email,
                _ => {
                    summary.skipped += 1;
                    continue;
                }
            };

            if let Some(owner) = owners.get(&user.subject) {
                if *owner != email {
                    tracing::warn!("Identity {} is linked to {}, not {}", user.subject, owner, email);
                    summary.conflicts += 1;
                    continue;
                }
            }

            let now = chrono::Utc::now().to_rfc3339();
            let result = match index.get(&email) {
                Some(existing) => {
                    let mut next = existing.clone();
                    next.external_identity_subject = Some(user.subject.clone());
                    if user.email_verified && !next.verified_emails.contains(&email) {
                        next.verified_emails.push(email.clone());
                    }
                    if next == *existing {
                        summary.skipped += 1;
                        continue;
                    }
                    next.updated_at = Some(now);
                    next.updated_by = Some(actor.clone());
                    let outcome = state.role_assignments.update(&next).await;
                    if outcome.is_ok() {
                        summary.updated += 1;
                    }
                    outcome.map(|()| next)
                }
                None => {
                    let created = RoleAssignment {
                        id: uuid::Uuid::new_v4().to_string(),
                        primary_email: email.clone(),
                        primary_email_lower: email.clone(),
                        roles: Vec::new(),
                        verified_emails: if user.email_verified { vec![email.clone()] } else { Vec::new() },
                        external_identity_subject: Some(user.subject.clone()),
                        notes: None,
                        created_at: now,
                        updated_at: None,
                        created_by: Some(actor.clone()),
                        updated_by: None,
                    };
                    let outcome = state.role_assignments.create(&created).await;
                    if outcome.is_ok() {
                        summary.created += 1;
                    }
                    outcome.map(|()| created)
                }
            };

            match result {
                Ok(record) => {
                    owners.insert(user.subject.clone(), email.clone());
                    index.insert(email, record);
                }
                Err(e) => {
                    tracing::error!("Failed to sync directory user {}: {}", user.subject, e);
                    summary.skipped += 1;
                }
            }
        }

        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    tracing::info!(
        "Directory sync by {}: {} scanned, {} created, {} updated, {} skipped, {} conflicts",
        actor,
        summary.scanned,
        summary.created,
        summary.updated,
        summary.skipped,
        summary.conflicts
    );
    Ok(summary)
}
