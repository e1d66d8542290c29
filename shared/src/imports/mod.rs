//! CSV bulk import: parse, validate, reconcile against existing records by
//! normalized email, and upsert with per-row outcomes.

pub mod job;
pub mod student_profiles;
pub mod user_roles;

use crate::csv;
use crate::error::StoreError;
use crate::store::{Record, Repository};
use crate::types::{ImportKind, ResultLogEntry, RowOutcome};
use crate::validate::canonical_header;
use crate::AppState;
use chrono::DateTime;
use std::collections::HashMap;
use std::sync::Arc;

pub use job::{get_import_job, import_result_url, list_import_jobs, run_import, start_import};
pub use student_profiles::StudentProfileImport;
pub use user_roles::UserRoleImport;

/// Page size used when loading existing records for reconciliation.
pub const RECONCILE_PAGE_SIZE: usize = 200;

/// One data row after validation. Transient: never persisted.
#[derive(Debug, Clone)]
pub struct ImportRow<T> {
    /// 1-based position among data rows (the header is not counted).
    pub row_number: usize,
    pub primary_email: String,
    pub record: Option<T>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl<T> ImportRow<T> {
    pub fn is_actionable(&self) -> bool {
        self.errors.is_empty() && self.record.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ParsedImport<T> {
    pub rows: Vec<ImportRow<T>>,
    /// File-level notes such as unrecognised columns.
    pub warnings: Vec<String>,
}

impl<T> ParsedImport<T> {
    pub fn actionable(&self) -> impl Iterator<Item = &ImportRow<T>> {
        self.rows.iter().filter(|r| r.is_actionable())
    }
}

/// A column the importer understands, matched case-insensitively by any alias.
pub struct ColumnSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub required: bool,
}

/// Resolved header: canonical column name to field index.
pub struct ColumnMap {
    index: HashMap<&'static str, usize>,
    pub unknown: Vec<String>,
}

impl ColumnMap {
    /// Fails with one message per missing required column.
    pub fn resolve(header: &[String], specs: &'static [ColumnSpec]) -> Result<Self, Vec<String>> {
        let canonical: Vec<String> = header.iter().map(|h| canonical_header(h)).collect();
        let mut index = HashMap::new();
        let mut matched = vec![false; header.len()];

        for spec in specs {
            let wanted = std::iter::once(spec.name).chain(spec.aliases.iter().copied());
            let candidates: Vec<String> = wanted.map(canonical_header).collect();
            if let Some(pos) = canonical.iter().position(|h| candidates.contains(h)) {
                index.insert(spec.name, pos);
                matched[pos] = true;
            }
        }

        let missing: Vec<String> = specs
            .iter()
            .filter(|s| s.required && !index.contains_key(s.name))
            .map(|s| format!("Missing required column '{}'", s.name))
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }

        let unknown = header
            .iter()
            .zip(matched)
            .filter(|(h, used)| !used && !h.trim().is_empty())
            .map(|(h, _)| h.trim().to_string())
            .collect();

        Ok(Self { index, unknown })
    }

    /// Trimmed field value, empty when the column or field is absent.
    pub fn get<'a>(&self, row: &'a [String], column: &str) -> &'a str {
        self.index
            .get(column)
            .and_then(|&i| row.get(i))
            .map(|s| s.trim())
            .unwrap_or("")
    }
}

/// Split parsed text into header and data rows, numbering data rows and
/// dropping fully blank ones.
pub fn split_header(text: &str) -> Result<(Vec<String>, Vec<(usize, Vec<String>)>), Vec<String>> {
    if text.trim().is_empty() {
        return Err(vec!["CSV file is empty".to_string()]);
    }
    let mut rows = csv::parse(text).into_iter();
    let header = rows
        .find(|r| !csv::is_blank_row(r))
        .ok_or_else(|| vec!["CSV file has no header row".to_string()])?;
    let data = rows
        .enumerate()
        .map(|(i, r)| (i + 1, r))
        .filter(|(_, r)| !csv::is_blank_row(r))
        .collect();
    Ok((header, data))
}

/// One import type: how rows are parsed and how a row becomes a stored record.
pub trait ImportSpec: Send + Sync + 'static {
    type Row: Clone + Send + Sync;
    type Target: Record;

    const KIND: ImportKind;

    fn parse(text: &str) -> Result<ParsedImport<Self::Row>, Vec<String>>;

    fn repository(state: &AppState) -> Arc<dyn Repository<Self::Target>>;

    /// Normalized identity (lowercased email) of a stored record.
    fn identity(target: &Self::Target) -> String;

    /// Timestamp used to pick the newest record when identities collide.
    fn freshness(target: &Self::Target) -> Option<String>;

    /// Build the record to write: an update of `existing` (keeping its id)
    /// or a brand-new record.
    fn merge(row: &Self::Row, existing: Option<&Self::Target>, actor: &str, now: &str) -> Self::Target;
}

fn is_newer(candidate: Option<&str>, current: Option<&str>) -> bool {
    match (candidate, current) {
        (Some(a), Some(b)) => match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
            (Ok(a), Ok(b)) => a > b,
            _ => a > b,
        },
        (Some(_), None) => true,
        _ => false,
    }
}

/// Load every existing record page by page, keyed by normalized identity.
/// On duplicate identities the most recently updated record wins.
pub async fn load_index<S: ImportSpec>(
    repo: &dyn Repository<S::Target>,
) -> Result<HashMap<String, S::Target>, StoreError> {
    let mut index: HashMap<String, S::Target> = HashMap::new();
    let mut cursor = None;
    loop {
        let page = repo.list(cursor, RECONCILE_PAGE_SIZE).await?;
        for record in page.items {
            let key = S::identity(&record);
            if key.is_empty() {
                continue;
            }
            let replace = match index.get(&key) {
                Some(current) => is_newer(
                    S::freshness(&record).as_deref(),
                    S::freshness(current).as_deref(),
                ),
                None => true,
            };
            if replace {
                index.insert(key, record);
            }
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(index)
}

/// Applies validated rows one at a time. A failing row is recorded and the
/// batch carries on.
pub struct Reconciler<S: ImportSpec> {
    repo: Arc<dyn Repository<S::Target>>,
    index: HashMap<String, S::Target>,
    actor: String,
    pub entries: Vec<ResultLogEntry>,
    pub created: u32,
    pub updated: u32,
    pub failed: u32,
}

impl<S: ImportSpec> Reconciler<S> {
    pub fn new(repo: Arc<dyn Repository<S::Target>>, index: HashMap<String, S::Target>, actor: &str) -> Self {
        Self {
            repo,
            index,
            actor: actor.to_string(),
            entries: Vec::new(),
            created: 0,
            updated: 0,
            failed: 0,
        }
    }

    pub fn succeeded(&self) -> u32 {
        self.created + self.updated
    }

    pub fn processed(&self) -> u32 {
        self.succeeded() + self.failed
    }

    pub async fn apply(&mut self, row: &ImportRow<S::Row>) {
        let record = match (&row.record, row.errors.is_empty()) {
            (Some(record), true) => record,
            _ => {
                let message = if row.errors.is_empty() {
                    "Row could not be parsed".to_string()
                } else {
                    row.errors.join("; ")
                };
                self.fail(row, message);
                return;
            }
        };

        let now = chrono::Utc::now().to_rfc3339();
        let existing = self.index.get(&row.primary_email);
        let is_update = existing.is_some();
        let target = S::merge(record, existing, &self.actor, &now);

        let result = if is_update {
            self.repo.update(&target).await
        } else {
            self.repo.create(&target).await
        };

        match result {
            Ok(()) => {
                if is_update {
                    self.updated += 1;
                } else {
                    self.created += 1;
                }
                let message = (!row.warnings.is_empty()).then(|| row.warnings.join("; "));
                self.entries.push(ResultLogEntry {
                    row_number: row.row_number,
                    primary_email: row.primary_email.clone(),
                    status: RowOutcome::Success,
                    message: Some(match message {
                        Some(w) => format!("{} ({})", if is_update { "Updated" } else { "Created" }, w),
                        None => if is_update { "Updated" } else { "Created" }.to_string(),
                    }),
                });
                self.index.insert(row.primary_email.clone(), target);
            }
            Err(e) => {
                tracing::warn!("Import row {} ({}) failed to write: {}", row.row_number, row.primary_email, e);
                self.fail(row, format!("Write failed: {}", e));
            }
        }
    }

    fn fail(&mut self, row: &ImportRow<S::Row>, message: String) {
        self.failed += 1;
        self.entries.push(ResultLogEntry {
            row_number: row.row_number,
            primary_email: row.primary_email.clone(),
            status: RowOutcome::Error,
            message: Some(message),
        });
    }

    /// Up to `limit` failures rendered for a summary message.
    pub fn failure_examples(&self, limit: usize) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.status == RowOutcome::Error)
            .take(limit)
            .map(|e| {
                let who = if e.primary_email.is_empty() { "no email" } else { e.primary_email.as_str() };
                format!("Row {} ({}): {}", e.row_number, who, e.message.as_deref().unwrap_or("failed"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SPECS: &[ColumnSpec] = &[
        ColumnSpec { name: "primaryEmail", aliases: &["email"], required: true },
        ColumnSpec { name: "roles", aliases: &[], required: false },
    ];

    fn header(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resolves_aliases_and_reports_unknown() {
        let map = ColumnMap::resolve(&header(&["E-Mail", "Roles", "Shoe Size"]), SPECS).unwrap();
        let row = header(&[" a@kla.education ", "Admin", "9"]);
        assert_eq!(map.get(&row, "primaryEmail"), "a@kla.education");
        assert_eq!(map.get(&row, "roles"), "Admin");
        assert_eq!(map.get(&row, "notes"), "");
        assert_eq!(map.unknown, vec!["Shoe Size"]);
    }

    #[test]
    fn missing_required_column_is_a_parse_error() {
        let err = ColumnMap::resolve(&header(&["roles", "notes"]), SPECS).err().unwrap();
        assert_eq!(err, vec!["Missing required column 'primaryEmail'"]);
    }

    #[test]
    fn header_split_numbers_data_rows() {
        let (head, rows) = split_header("\na,b\n1,2\n,\n3,4\n").unwrap();
        assert_eq!(head, vec!["a", "b"]);
        let numbers: Vec<usize> = rows.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 3]);
        assert!(split_header("  \n").is_err());
    }

    fn assignment(id: &str, email_lower: &str, updated_at: Option<&str>) -> crate::types::RoleAssignment {
        crate::types::RoleAssignment {
            id: id.to_string(),
            primary_email: email_lower.trim().to_string(),
            primary_email_lower: email_lower.to_string(),
            roles: vec!["Teacher".to_string()],
            verified_emails: vec![],
            external_identity_subject: None,
            notes: None,
            created_at: "2023-01-01T00:00:00Z".to_string(),
            updated_at: updated_at.map(|t| t.to_string()),
            created_by: None,
            updated_by: None,
        }
    }

    #[tokio::test]
    async fn index_keeps_newest_duplicate_across_pages() {
        use crate::store::MemoryRepository;
        use crate::types::RoleAssignment;

        let repo = Arc::new(MemoryRepository::<RoleAssignment>::new());
        for i in 0..450 {
            let email = format!("a-filler-{:03}@kla.education", i);
            repo.create(&assignment(&format!("filler-{}", i), &email, None)).await.unwrap();
        }
        // Legacy casing sorts onto the first page, the newer copy onto the last.
        repo.create(&assignment("a-old", "Dup@kla.education", Some("2024-01-01T00:00:00Z")))
            .await
            .unwrap();
        repo.create(&assignment("z-new", "dup@kla.education", Some("2024-03-01T00:00:00Z")))
            .await
            .unwrap();

        let index = load_index::<UserRoleImport>(repo.as_ref()).await.unwrap();
        assert_eq!(index.len(), 451);
        assert_eq!(index["dup@kla.education"].id, "z-new");

        let parsed = UserRoleImport::parse("primaryEmail,roles\nDUP@kla.education,HR\n").unwrap();
        let mut reconciler = Reconciler::<UserRoleImport>::new(repo.clone(), index, "admin@kla.education");
        reconciler.apply(&parsed.rows[0]).await;
        assert_eq!((reconciler.created, reconciler.updated, reconciler.failed), (0, 1, 0));

        let newer = repo
            .get(&RoleAssignment::pk_for("z-new"), &RoleAssignment::pk_for("z-new"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(newer.roles, vec!["HR"]);
        let older = repo
            .get(&RoleAssignment::pk_for("a-old"), &RoleAssignment::pk_for("a-old"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(older.roles, vec!["Teacher"]);
    }

    #[test]
    fn newer_timestamps_win() {
        assert!(is_newer(Some("2024-02-01T00:00:00Z"), Some("2024-01-01T00:00:00+00:00")));
        // Same instant in different offsets is not newer.
        assert!(!is_newer(Some("2024-01-01T01:00:00Z"), Some("2024-01-01T10:00:00+09:00")));
        assert!(is_newer(Some("2024-01-01T00:00:00Z"), None));
        assert!(!is_newer(None, Some("2024-01-01T00:00:00Z")));
    }
}
