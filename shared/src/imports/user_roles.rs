use super::{split_header, ColumnMap, ColumnSpec, ImportRow, ImportSpec, ParsedImport};
use crate::store::Repository;
use crate::types::{ImportKind, RoleAssignment};
use crate::validate::{is_valid_email, is_valid_role, non_empty_trimmed, normalize_email, split_roles};
use crate::AppState;
use std::sync::Arc;

pub static COLUMNS: &[ColumnSpec] = &[
    ColumnSpec { name: "primaryEmail", aliases: &["email"], required: true },
    ColumnSpec { name: "roles", aliases: &["role"], required: false },
    ColumnSpec { name: "notes", aliases: &["note"], required: false },
];

#[derive(Debug, Clone, PartialEq)]
pub struct UserRoleRow {
    pub primary_email: String,
    pub roles: Vec<String>,
    pub notes: Option<String>,
}

pub fn validate_row(row_number: usize, columns: &ColumnMap, fields: &[String]) -> ImportRow<UserRoleRow> {
    let raw_email = columns.get(fields, "primaryEmail");
    let email = normalize_email(raw_email);
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if email.is_empty() {
        errors.push("primaryEmail is required".to_string());
    } else if !is_valid_email(&email) {
        errors.push(format!("invalid email '{}'", raw_email));
    }

    let roles = split_roles(columns.get(fields, "roles"));
    for role in roles.iter().filter(|r| !is_valid_role(r)) {
        errors.push(format!("invalid role '{}'", role));
    }
    if roles.is_empty() {
        warnings.push("no roles listed".to_string());
    }

    let record = errors.is_empty().then(|| UserRoleRow {
        primary_email: raw_email.to_string(),
        roles,
        notes: non_empty_trimmed(columns.get(fields, "notes")),
    });

    ImportRow {
        row_number,
        primary_email: email,
        record,
        errors,
        warnings,
    }
}

pub struct UserRoleImport;

impl ImportSpec for UserRoleImport {
    type Row = UserRoleRow;
    type Target = RoleAssignment;

    const KIND: ImportKind = ImportKind::UserRole;

    fn parse(text: &str) -> Result<ParsedImport<UserRoleRow>, Vec<String>> {
        let (header, data) = split_header(text)?;
        let columns = ColumnMap::resolve(&header, COLUMNS)?;
        let warnings = columns
            .unknown
            .iter()
            .map(|c| format!("Ignored unknown column '{}'", c))
            .collect();
        let rows = data
            .iter()
            .map(|(n, fields)| validate_row(*n, &columns, fields))
            .collect();
        Ok(ParsedImport { rows, warnings })
    }

    fn repository(state: &AppState) -> Arc<dyn Repository<RoleAssignment>> {
        state.role_assignments.clone()
    }

    fn identity(target: &RoleAssignment) -> String {
        normalize_email(&target.primary_email_lower)
    }

    fn freshness(target: &RoleAssignment) -> Option<String> {
        target.updated_at.clone().or_else(|| Some(target.created_at.clone()))
    }

    fn merge(row: &UserRoleRow, existing: Option<&RoleAssignment>, actor: &str, now: &str) -> RoleAssignment {
        let primary_email_lower = normalize_email(&row.primary_email);
        match existing {
            Some(current) => RoleAssignment {
                primary_email: row.primary_email.trim().to_string(),
                primary_email_lower,
                roles: row.roles.clone(),
                notes: row.notes.clone().or_else(|| current.notes.clone()),
                updated_at: Some(now.to_string()),
                updated_by: Some(actor.to_string()),
                ..current.clone()
            },
            None => RoleAssignment {
                id: uuid::Uuid::new_v4().to_string(),
                primary_email: row.primary_email.trim().to_string(),
                primary_email_lower,
                roles: row.roles.clone(),
                verified_emails: Vec::new(),
                external_identity_subject: None,
                notes: row.notes.clone(),
                created_at: now.to_string(),
                updated_at: None,
                created_by: Some(actor.to_string()),
                updated_by: None,
            },
        }
    }
}
