use super::{load_index, ImportSpec, Reconciler, StudentProfileImport, UserRoleImport};
use crate::auth::{Caller, Group};
use crate::email;
use crate::error::{AppError, AppResult};
use crate::types::{ImportJob, ImportJobStatus, ImportKind, StartImportRequest};
use crate::AppState;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const MAX_CSV_BYTES: usize = 5 * 1024 * 1024;
pub const PROGRESS_EVERY_ROWS: u32 = 25;
pub const MAX_MESSAGE_EXAMPLES: usize = 5;
pub const RESULT_URL_TTL_SECS: u64 = 15 * 60;

pub fn source_key(kind: ImportKind, job_id: &str) -> String {
    format!("imports/{}/{}/source.csv", kind.slug(), job_id)
}

pub fn result_key(kind: ImportKind, job_id: &str) -> String {
    format!("imports/{}/{}/result.json", kind.slug(), job_id)
}

/// Inverse of `source_key`, used by the worker to route bucket events.
pub fn parse_source_key(key: &str) -> Option<(ImportKind, String)> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("imports"), Some(kind), Some(job_id), Some("source.csv"), None) if !job_id.is_empty() => {
            Some((ImportKind::from_slug(kind)?, job_id.to_string()))
        }
        _ => None,
    }
}

/// Groups allowed to run and inspect imports of `kind`.
pub fn allowed_groups(kind: ImportKind) -> &'static [Group] {
    match kind {
        ImportKind::UserRole => &[Group::Admin, Group::ItAdmins],
        ImportKind::StudentProfile => &[Group::Admin, Group::ItAdmins, Group::Hr],
    }
}

fn decode_csv(req: &StartImportRequest) -> AppResult<String> {
    let text = match req.encoding.as_deref().map(|e| e.trim().to_ascii_lowercase()) {
        Some(enc) if enc == "base64" => {
            let bytes = STANDARD
                .decode(req.csv.trim())
                .map_err(|e| AppError::BadRequest(format!("csv is not valid base64: {}", e)))?;
            String::from_utf8(bytes).map_err(|_| AppError::BadRequest("csv must be UTF-8 text".to_string()))?
        }
        Some(enc) if !enc.is_empty() && enc != "utf-8" && enc != "utf8" => {
            return Err(AppError::BadRequest(format!("Unsupported encoding '{}'", enc)));
        }
        _ => req.csv.clone(),
    };
    if text.trim().is_empty() {
        return Err(AppError::BadRequest("csv is empty".to_string()));
    }
    if text.len() > MAX_CSV_BYTES {
        return Err(AppError::BadRequest(format!(
            "csv is {} bytes; the limit is {} bytes",
            text.len(),
            MAX_CSV_BYTES
        )));
    }
    Ok(text)
}

/// Store the uploaded CSV and create a `QUEUED` job. The upload's bucket
/// event starts the worker.
pub async fn start_import(
    state: &AppState,
    caller: &Caller,
    kind: ImportKind,
    req: StartImportRequest,
) -> AppResult<ImportJob> {
    caller.require_any(allowed_groups(kind))?;
    let text = decode_csv(&req)?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let file_name = req.file_name.trim();
    let mut job = ImportJob {
        id: id.clone(),
        kind,
        status: ImportJobStatus::Queued,
        source_filename: if file_name.is_empty() { "upload.csv".to_string() } else { file_name.to_string() },
        source_sha256: format!("{:x}", Sha256::digest(text.as_bytes())),
        csv_location: source_key(kind, &id),
        result_location: None,
        total_rows: 0,
        processed_rows: 0,
        success_count: 0,
        failure_count: 0,
        message: None,
        created_by: caller.label(),
        created_at: now.clone(),
        started_at: None,
        completed_at: None,
        updated_at: Some(now),
    };

    // The job must exist before the upload lands, or the worker finds nothing.
    state.import_jobs.create(&job).await?;

    if let Err(e) = state.objects.put_text(&job.csv_location, text, "text/csv").await {
        tracing::error!("Failed to store CSV for import job {}: {}", id, e);
        let now = chrono::Utc::now().to_rfc3339();
        job.status = ImportJobStatus::Failed;
        job.message = Some(format!("Failed to store uploaded CSV: {}", e));
        job.completed_at = Some(now.clone());
        job.updated_at = Some(now);
        state.import_jobs.put(&job).await?;
        return Err(e.into());
    }

    tracing::info!(
        "Queued {} import job {} ({}) for {}",
        kind.as_str(),
        id,
        job.source_filename,
        job.created_by
    );
    Ok(job)
}

async fn load_job(state: &AppState, kind: ImportKind, job_id: &str) -> AppResult<ImportJob> {
    state
        .import_jobs
        .get(&ImportJob::pk_for(job_id), kind.as_str())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Import job {} not found", job_id)))
}

pub async fn get_import_job(state: &AppState, caller: &Caller, kind: ImportKind, job_id: &str) -> AppResult<ImportJob> {
    caller.require_any(allowed_groups(kind))?;
    load_job(state, kind, job_id).await
}

/// Most recent jobs of `kind`, newest first.
pub async fn list_import_jobs(state: &AppState, caller: &Caller, kind: ImportKind, limit: usize) -> AppResult<Vec<ImportJob>> {
    caller.require_any(allowed_groups(kind))?;
    let mut jobs: Vec<ImportJob> = crate::store::list_all(state.import_jobs.as_ref(), 100)
        .await?
        .into_iter()
        .filter(|j| j.kind == kind)
        .collect();
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    jobs.truncate(limit.max(1));
    Ok(jobs)
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultUrl {
    pub url: String,
    pub expires_in: u64,
}

pub async fn import_result_url(state: &AppState, caller: &Caller, kind: ImportKind, job_id: &str) -> AppResult<ResultUrl> {
    caller.require_any(allowed_groups(kind))?;
    let job = load_job(state, kind, job_id).await?;
    let location = job
        .result_location
        .ok_or_else(|| AppError::NotFound(format!("Import job {} has no result log yet", job_id)))?;
    let url = state.objects.presign_get(&location, RESULT_URL_TTL_SECS).await?;
    Ok(ResultUrl {
        url,
        expires_in: RESULT_URL_TTL_SECS,
    })
}

/// Worker entry: process a queued job to a terminal state. Safe to call more
/// than once for the same job; a terminal job is returned untouched.
pub async fn run_import(state: &AppState, kind: ImportKind, job_id: &str) -> AppResult<ImportJob> {
    let mut job = load_job(state, kind, job_id).await?;
    if job.status.is_terminal() {
        tracing::info!("Import job {} already {:?}; skipping", job_id, job.status);
        return Ok(job);
    }
    if job.status == ImportJobStatus::Processing {
        tracing::warn!("Import job {} was left PROCESSING; running it again", job_id);
    }

    let now = chrono::Utc::now().to_rfc3339();
    job.status = ImportJobStatus::Processing;
    job.started_at = Some(now.clone());
    job.updated_at = Some(now);
    state.import_jobs.put(&job).await?;
    tracing::info!("Processing {} import job {}", kind.as_str(), job_id);

    let outcome = match kind {
        ImportKind::UserRole => execute::<UserRoleImport>(state, &mut job).await,
        ImportKind::StudentProfile => execute::<StudentProfileImport>(state, &mut job).await,
    };

    match outcome {
        Ok(status) => job.status = status,
        Err(e) => {
            tracing::error!("Import job {} failed: {}", job_id, e);
            job.status = ImportJobStatus::Failed;
            job.message = Some(format!("Import failed: {}", e));
        }
    }

    let now = chrono::Utc::now().to_rfc3339();
    job.completed_at = Some(now.clone());
    job.updated_at = Some(now);
    state.import_jobs.put(&job).await?;

    tracing::info!(
        "Import job {} finished {:?}: {} of {} rows processed, {} succeeded, {} failed",
        job.id,
        job.status,
        job.processed_rows,
        job.total_rows,
        job.success_count,
        job.failure_count
    );
    notify_admins(state, &job).await;
    Ok(job)
}

/// Checkpoint the job. A failed checkpoint is logged and the run continues;
/// the terminal write in `run_import` is the one that must land.
async fn write_progress(state: &AppState, job: &mut ImportJob) {
    job.updated_at = Some(chrono::Utc::now().to_rfc3339());
    if let Err(e) = state.import_jobs.put(job).await {
        tracing::warn!("Import job {}: progress write failed at row {}: {}", job.id, job.processed_rows, e);
    }
}

fn bounded(items: &[String]) -> String {
    let mut text = items
        .iter()
        .take(MAX_MESSAGE_EXAMPLES)
        .cloned()
        .collect::<Vec<_>>()
        .join("; ");
    if items.len() > MAX_MESSAGE_EXAMPLES {
        text.push_str(&format!(" (and {} more)", items.len() - MAX_MESSAGE_EXAMPLES));
    }
    text
}

/// Parse, reconcile and write the result log. Returns the terminal status.
async fn execute<S: ImportSpec>(state: &AppState, job: &mut ImportJob) -> AppResult<ImportJobStatus> {
    let text = state.objects.get_text(&job.csv_location).await?;

    let parsed = match S::parse(&text) {
        Ok(parsed) => parsed,
        Err(errors) => {
            tracing::warn!("Import job {} could not parse its CSV: {:?}", job.id, errors);
            job.message = Some(format!("CSV could not be parsed: {}", bounded(&errors)));
            return Ok(ImportJobStatus::Failed);
        }
    };
    for warning in &parsed.warnings {
        tracing::info!("Import job {}: {}", job.id, warning);
    }

    job.total_rows = parsed.rows.len() as u32;
    if job.total_rows == 0 {
        job.message = Some("CSV contains no data rows".to_string());
        return Ok(ImportJobStatus::Failed);
    }
    job.message = Some(format!("Processing {} rows", job.total_rows));
    write_progress(state, job).await;

    let repo = S::repository(state);
    let index = load_index::<S>(repo.as_ref()).await?;
    tracing::info!("Import job {}: {} existing records indexed", job.id, index.len());

    let mut reconciler = Reconciler::<S>::new(repo, index, &job.created_by);
    for row in &parsed.rows {
        reconciler.apply(row).await;

        job.processed_rows = reconciler.processed();
        job.success_count = reconciler.succeeded();
        job.failure_count = reconciler.failed;
        if job.processed_rows % PROGRESS_EVERY_ROWS == 0 && job.processed_rows < job.total_rows {
            job.message = Some(format!("Processed {} of {} rows", job.processed_rows, job.total_rows));
            write_progress(state, job).await;
        }
    }

    let location = result_key(job.kind, &job.id);
    let body = serde_json::to_string_pretty(&reconciler.entries).map_err(|e| AppError::Internal(e.to_string()))?;
    state.objects.put_text(&location, body, "application/json").await?;
    job.result_location = Some(location);

    let examples = reconciler.failure_examples(MAX_MESSAGE_EXAMPLES);
    tracing::info!(
        "Import job {}: {} created, {} updated",
        job.id,
        reconciler.created,
        reconciler.updated
    );
    let mut message = format!(
        "Processed {} rows: {} succeeded, {} failed",
        job.processed_rows,
        reconciler.succeeded(),
        reconciler.failed
    );
    if !examples.is_empty() {
        message.push_str(&format!(". Examples: {}", examples.join("; ")));
    }
    job.message = Some(message);

    Ok(if job.failure_count == 0 {
        ImportJobStatus::Succeeded
    } else {
        ImportJobStatus::Failed
    })
}

async fn notify_admins(state: &AppState, job: &ImportJob) {
    if state.config.admin_emails.is_empty() || state.config.ses_sender.is_none() {
        return;
    }
    let subject = format!("{} import {:?}", job.kind.slug(), job.status);
    let text = format!(
        "Import job {} ({}) finished with status {:?}.\n\n{}\n\nDetails: {}/admin/imports/{}/{}\n",
        job.id,
        job.source_filename,
        job.status,
        job.message.as_deref().unwrap_or(""),
        state.config.app_base_url,
        job.kind.slug(),
        job.id
    );
    email::notify(state.mailer.as_ref(), &state.config.admin_emails, &subject, &text).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::email::RecordingMailer;
    use crate::store::{MemoryObjectStore, MemoryRepository, ObjectStore, Repository};
    use crate::types::{ResultLogEntry, RoleAssignment, RowOutcome};
    use std::sync::Arc;

    fn admin() -> Caller {
        Caller::new("admin-sub", Some("admin@kla.education"), &["Admin"])
    }

    fn request(csv: &str) -> StartImportRequest {
        StartImportRequest {
            csv: csv.to_string(),
            file_name: "roles.csv".to_string(),
            encoding: None,
        }
    }

    async fn run(state: &AppState, kind: ImportKind, csv: &str) -> ImportJob {
        let job = start_import(state, &admin(), kind, request(csv)).await.unwrap();
        assert_eq!(job.status, ImportJobStatus::Queued);
        run_import(state, kind, &job.id).await.unwrap()
    }

    async fn result_log(objects: &MemoryObjectStore, job: &ImportJob) -> Vec<ResultLogEntry> {
        let body = objects.get_text(job.result_location.as_deref().unwrap()).await.unwrap();
        serde_json::from_str(&body).unwrap()
    }

    #[test]
    fn source_keys_round_trip() {
        let key = source_key(ImportKind::StudentProfile, "job-1");
        assert_eq!(key, "imports/student-profiles/job-1/source.csv");
        assert_eq!(parse_source_key(&key), Some((ImportKind::StudentProfile, "job-1".to_string())));
        assert_eq!(parse_source_key("imports/user-roles/job-1/result.json"), None);
        assert_eq!(parse_source_key("imports/teachers/job-1/source.csv"), None);
    }

    #[tokio::test]
    async fn one_bad_row_fails_the_job_but_not_the_batch() {
        let objects = Arc::new(MemoryObjectStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let mut state = AppState::in_memory(Config::for_tests());
        state.objects = objects.clone();
        state.mailer = mailer.clone();

        let csv = "primaryEmail,roles,notes\n\
                   a@kla.education,Admin,\n\
                   b@kla.education,not a role!,\n\
                   c@kla.education,Teacher,\n";
        let job = run(&state, ImportKind::UserRole, csv).await;

        assert_eq!(job.status, ImportJobStatus::Failed);
        assert_eq!(job.total_rows, 3);
        assert_eq!(job.processed_rows, 3);
        assert_eq!(job.success_count, 2);
        assert_eq!(job.failure_count, 1);
        assert!(job.completed_at.is_some());

        let log = result_log(&objects, &job).await;
        let errors: Vec<&ResultLogEntry> = log.iter().filter(|e| e.status == RowOutcome::Error).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row_number, 2);
        assert_eq!(errors[0].primary_email, "b@kla.education");

        let roles = crate::store::list_all(state.role_assignments.as_ref(), 50).await.unwrap();
        assert_eq!(roles.len(), 2);

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["it@kla.education"]);
    }

    #[tokio::test]
    async fn repeated_email_creates_once_then_updates() {
        let state = AppState::in_memory(Config::for_tests());
        let csv = "email,roles\nSam@kla.education,Teacher\nsam@KLA.education,Teacher;HR\n";
        let job = run(&state, ImportKind::UserRole, csv).await;

        assert_eq!(job.status, ImportJobStatus::Succeeded);
        assert_eq!(job.success_count, 2);
        let roles = crate::store::list_all(state.role_assignments.as_ref(), 50).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].roles, vec!["Teacher", "HR"]);
        assert_eq!(job.message.as_deref(), Some("Processed 2 rows: 2 succeeded, 0 failed"));
    }

    #[tokio::test]
    async fn existing_records_are_updated_in_place() {
        let state = AppState::in_memory(Config::for_tests());
        let existing = RoleAssignment {
            id: "role-1".to_string(),
            primary_email: "Kim@kla.education".to_string(),
            primary_email_lower: "kim@kla.education".to_string(),
            roles: vec!["Teacher".to_string()],
            verified_emails: vec![],
            external_identity_subject: Some("sub-kim".to_string()),
            notes: None,
            created_at: "2023-01-01T00:00:00Z".to_string(),
            updated_at: None,
            created_by: None,
            updated_by: None,
        };
        state.role_assignments.create(&existing).await.unwrap();

        let job = run(&state, ImportKind::UserRole, "primaryEmail,roles\nkim@kla.education,Admin\n").await;
        assert_eq!(job.status, ImportJobStatus::Succeeded);

        let stored = state
            .role_assignments
            .get(&RoleAssignment::pk_for("role-1"), &RoleAssignment::pk_for("role-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.roles, vec!["Admin"]);
        assert_eq!(stored.external_identity_subject.as_deref(), Some("sub-kim"));
    }

    #[tokio::test]
    async fn write_failures_are_recorded_per_row() {
        let roles = Arc::new(MemoryRepository::<RoleAssignment>::new());
        roles.fail_writes_where(|r: &RoleAssignment| r.primary_email_lower == "b@kla.education");
        let mut state = AppState::in_memory(Config::for_tests());
        state.role_assignments = roles.clone();

        let job = run(&state, ImportKind::UserRole, "primaryEmail,roles\na@kla.education,HR\nb@kla.education,HR\n").await;
        assert_eq!(job.status, ImportJobStatus::Failed);
        assert_eq!((job.success_count, job.failure_count), (1, 1));
        assert_eq!(roles.len(), 1);
        assert!(job.message.as_deref().unwrap().contains("Row 2 (b@kla.education): Write failed"));
    }

    #[tokio::test]
    async fn failed_progress_checkpoints_do_not_abort_the_run() {
        let objects = Arc::new(MemoryObjectStore::new());
        let jobs = Arc::new(MemoryRepository::<ImportJob>::new());
        jobs.fail_writes_where(|job: &ImportJob| job.processed_rows > 0 && job.completed_at.is_none());
        let mut state = AppState::in_memory(Config::for_tests());
        state.objects = objects.clone();
        state.import_jobs = jobs.clone();

        let mut csv = String::from("primaryEmail,roles\n");
        for i in 0..60 {
            csv.push_str(&format!("user{}@kla.education,HR\n", i));
        }
        let job = run(&state, ImportKind::UserRole, &csv).await;

        assert_eq!(job.status, ImportJobStatus::Succeeded);
        assert_eq!((job.total_rows, job.processed_rows, job.success_count), (60, 60, 60));
        assert_eq!(job.message.as_deref(), Some("Processed 60 rows: 60 succeeded, 0 failed"));
        assert_eq!(result_log(&objects, &job).await.len(), 60);

        let stored = jobs
            .get(&ImportJob::pk_for(&job.id), ImportKind::UserRole.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ImportJobStatus::Succeeded);
        assert_eq!(stored.processed_rows, 60);
    }

    #[tokio::test]
    async fn missing_header_fails_without_rows() {
        let state = AppState::in_memory(Config::for_tests());
        let job = run(&state, ImportKind::StudentProfile, "primaryEmail,student.firstName\na@kla.education,A\n").await;
        assert_eq!(job.status, ImportJobStatus::Failed);
        assert_eq!(job.total_rows, 0);
        assert!(job.message.as_deref().unwrap().contains("student.lastName"));
        assert!(job.result_location.is_none());
    }

    #[tokio::test]
    async fn terminal_jobs_are_not_rerun() {
        let state = AppState::in_memory(Config::for_tests());
        let job = run(&state, ImportKind::UserRole, "primaryEmail,roles\na@kla.education,HR\n").await;
        assert_eq!(job.status, ImportJobStatus::Succeeded);

        let again = run_import(&state, ImportKind::UserRole, &job.id).await.unwrap();
        assert_eq!(again, job);
        assert_eq!(crate::store::list_all(state.role_assignments.as_ref(), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn base64_upload_and_limits() {
        let state = AppState::in_memory(Config::for_tests());
        let encoded = STANDARD.encode("primaryEmail,roles\na@kla.education,HR\n");
        let req = StartImportRequest {
            csv: encoded,
            file_name: "r.csv".to_string(),
            encoding: Some("base64".to_string()),
        };
        let job = start_import(&state, &admin(), ImportKind::UserRole, req).await.unwrap();
        assert_eq!(job.source_sha256.len(), 64);
        assert_eq!(state.objects.get_text(&job.csv_location).await.unwrap(), "primaryEmail,roles\na@kla.education,HR\n");

        let err = start_import(&state, &admin(), ImportKind::UserRole, request("  ")).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let big = "x".repeat(MAX_CSV_BYTES + 1);
        let err = start_import(&state, &admin(), ImportKind::UserRole, request(&big)).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn hr_may_import_profiles_but_not_roles() {
        let state = AppState::in_memory(Config::for_tests());
        let hr = Caller::new("hr-sub", Some("hr@kla.education"), &["HR"]);
        let csv = "primaryEmail,firstName,lastName\nzoe30@kla.education,Zoe,Park\n";
        let job = start_import(&state, &hr, ImportKind::StudentProfile, request(csv)).await.unwrap();
        let done = run_import(&state, ImportKind::StudentProfile, &job.id).await.unwrap();
        assert_eq!(done.status, ImportJobStatus::Succeeded);

        let url = import_result_url(&state, &hr, ImportKind::StudentProfile, &job.id).await.unwrap();
        assert_eq!(url.expires_in, 900);
        assert!(url.url.contains("result.json"));

        let err = start_import(&state, &hr, ImportKind::UserRole, request(csv)).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
