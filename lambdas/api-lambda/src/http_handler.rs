use kla_shared::auth::{self, Caller};
use kla_shared::error::{AppError, AppResult};
use kla_shared::types::{ImportKind, StartImportRequest};
use kla_shared::{devices, http, imports, ledger, pc_lab, profiles, reservations, roles, AppState};
use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use serde::Serialize;
use std::sync::Arc;

const DEFAULT_PAGE_SIZE: usize = 50;

/// What a route produced, before it becomes an HTTP response.
enum Routed {
    Json(StatusCode, serde_json::Value),
    Csv(String, String),
    NoContent,
    NotFound,
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> AppResult<Routed> {
    let value = serde_json::to_value(value).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Routed::Json(status, value))
}

fn query<'a>(event: &'a Request, name: &str) -> Option<&'a str> {
    event
        .query_string_parameters_ref()
        .and_then(|q| q.first(name))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn page_size(event: &Request) -> AppResult<usize> {
    match query(event, "limit") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| AppError::BadRequest(format!("limit '{}' is not a number", raw))),
        None => Ok(DEFAULT_PAGE_SIZE),
    }
}

fn required_query<'a>(event: &'a Request, name: &str) -> AppResult<&'a str> {
    query(event, name).ok_or_else(|| AppError::BadRequest(format!("query parameter '{}' is required", name)))
}

fn import_kind(slug: &str) -> AppResult<ImportKind> {
    ImportKind::from_slug(slug).ok_or_else(|| AppError::NotFound(format!("Unknown import type '{}'", slug)))
}

fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}

/// Main Lambda handler - resolves the caller and routes to an operation
pub(crate) async fn function_handler(event: Request, state: Arc<AppState>) -> Result<Response<Body>, Error> {
    let method = event.method().clone();
    let path = event.uri().path().to_string();
    tracing::info!("API invoked - Method: {} Path: {}", method, path);

    if method == Method::OPTIONS {
        return http::cors_preflight();
    }

    let caller = match auth::caller_from_request(&event, state.config.allow_dev_identity) {
        Ok(caller) => caller,
        Err(e) => return http::error_response(&e),
    };

    match route(&state, &caller, &method, &path, &event).await {
        Ok(Routed::Json(status, value)) => http::json_response(status, &value),
        Ok(Routed::Csv(file_name, text)) => http::csv_response(&file_name, text),
        Ok(Routed::NoContent) => http::no_content(),
        Ok(Routed::NotFound) => http::not_found(),
        Err(e) => http::error_response(&e),
    }
}

async fn route(
    state: &AppState,
    caller: &Caller,
    method: &Method,
    path: &str,
    event: &Request,
) -> AppResult<Routed> {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let body = event.body();

    match (method, parts.as_slice()) {
        // --- SPORTS FIELD RESERVATIONS ---
        (&Method::GET, ["reservations", date, "hours"]) => {
            let hours = reservations::list_reserved_hours(state, date).await?;
            json(StatusCode::OK, &serde_json::json!({ "date": date, "hours": hours }))
        }
        (&Method::POST, ["reservations"]) => {
            let req = http::parse_body(body)?;
            let reservation = reservations::create_reservation_validated(state, caller, req, today()).await?;
            json(StatusCode::CREATED, &reservation)
        }
        (&Method::DELETE, ["reservations", date, hour]) => {
            let hour: i64 = hour
                .parse()
                .map_err(|_| AppError::BadRequest(format!("hour '{}' is not a number", hour)))?;
            reservations::cancel_reservation(state, caller, date, hour).await?;
            Ok(Routed::NoContent)
        }

        // --- PROFILES ---
        (&Method::GET, ["profiles", user_id]) => {
            let view = profiles::get_user_profile(state, caller, user_id, today()).await?;
            json(StatusCode::OK, &view)
        }
        (&Method::GET, ["admin", "student-profiles", "export"]) => {
            let text = profiles::export_student_profiles_csv(state, caller).await?;
            Ok(Routed::Csv("student-profiles.csv".to_string(), text))
        }

        // --- IMPORTS ---
        (&Method::POST, ["admin", "imports", kind]) => {
            let kind = import_kind(kind)?;
            let req: StartImportRequest = http::parse_body(body)?;
            let job = imports::start_import(state, caller, kind, req).await?;
            json(StatusCode::ACCEPTED, &job)
        }
        (&Method::GET, ["admin", "imports", kind]) => {
            let kind = import_kind(kind)?;
            let jobs = imports::list_import_jobs(state, caller, kind, page_size(event)?).await?;
            json(StatusCode::OK, &jobs)
        }
        (&Method::GET, ["admin", "imports", kind, job_id]) => {
            let job = imports::get_import_job(state, caller, import_kind(kind)?, job_id).await?;
            json(StatusCode::OK, &job)
        }
        (&Method::GET, ["admin", "imports", kind, job_id, "result"]) => {
            let url = imports::import_result_url(state, caller, import_kind(kind)?, job_id).await?;
            json(StatusCode::OK, &url)
        }

        // --- ROLE ASSIGNMENTS ---
        (&Method::GET, ["admin", "user-roles"]) => {
            let cursor = query(event, "cursor").map(|c| c.to_string());
            let page = roles::list_role_assignments(state, caller, cursor, page_size(event)?).await?;
            json(
                StatusCode::OK,
                &serde_json::json!({ "items": page.items, "nextCursor": page.next_cursor }),
            )
        }
        (&Method::POST, ["admin", "user-roles"]) => {
            let assignment = roles::create_role_assignment(state, caller, http::parse_body(body)?).await?;
            json(StatusCode::CREATED, &assignment)
        }
        (&Method::POST, ["admin", "user-roles", "bulk"]) => {
            let summary = roles::bulk_update_user_roles(state, caller, http::parse_body(body)?).await?;
            json(StatusCode::OK, &summary)
        }
        (&Method::PATCH, ["admin", "user-roles", id]) | (&Method::PUT, ["admin", "user-roles", id]) => {
            let assignment = roles::update_role_assignment(state, caller, id, http::parse_body(body)?).await?;
            json(StatusCode::OK, &assignment)
        }
        (&Method::DELETE, ["admin", "user-roles", id]) => {
            roles::delete_role_assignment(state, caller, id).await?;
            Ok(Routed::NoContent)
        }
        (&Method::POST, ["admin", "cognito", "sync"]) => {
            let summary = roles::sync_cognito_users(state, caller).await?;
            json(StatusCode::OK, &summary)
        }

        // --- PC LAB ---
        (&Method::GET, ["pc-lab", "reservations"]) => {
            let cursor = query(event, "cursor").map(|c| c.to_string());
            let page = pc_lab::list_pc_lab_reservations(state, cursor, page_size(event)?).await?;
            json(
                StatusCode::OK,
                &serde_json::json!({ "items": page.items, "nextCursor": page.next_cursor }),
            )
        }
        (&Method::POST, ["pc-lab", "reservations"]) => {
            let reservation =
                pc_lab::create_pc_lab_reservation(state, caller, http::parse_body(body)?, today()).await?;
            json(StatusCode::CREATED, &reservation)
        }
        (&Method::POST, ["pc-lab", "reservations", id, action]) => {
            let Some(decision) = pc_lab::PcLabDecision::from_action(action) else {
                return Ok(Routed::NotFound);
            };
            let req = if body.is_empty() {
                Default::default()
            } else {
                http::parse_body(body)?
            };
            let reservation = pc_lab::decide_pc_lab_reservation(state, caller, id, decision, req).await?;
            json(StatusCode::OK, &reservation)
        }

        // --- DEVICE LOANS ---
        (&Method::GET, ["devices", "loans"]) => {
            let cursor = query(event, "cursor").map(|c| c.to_string());
            let page = devices::list_device_loans(state, caller, cursor, page_size(event)?).await?;
            json(
                StatusCode::OK,
                &serde_json::json!({ "items": page.items, "nextCursor": page.next_cursor }),
            )
        }
        (&Method::POST, ["devices", "loans"]) => {
            let loan = devices::checkout_device(state, caller, http::parse_body(body)?).await?;
            json(StatusCode::CREATED, &loan)
        }
        (&Method::POST, ["devices", "loans", loan_id, "return"]) => {
            let loan = devices::return_device(state, caller, loan_id).await?;
            json(StatusCode::OK, &loan)
        }

        // --- LEDGER ---
        (&Method::GET, ["ledger"]) => {
            let entries = ledger::list_ledger_entries(state, caller, required_query(event, "month")?).await?;
            json(StatusCode::OK, &entries)
        }
        (&Method::POST, ["ledger"]) => {
            let entry = ledger::create_ledger_entry(state, caller, http::parse_body(body)?).await?;
            json(StatusCode::CREATED, &entry)
        }
        (&Method::GET, ["ledger", "summary"]) => {
            let summary = ledger::ledger_summary(state, caller, required_query(event, "month")?).await?;
            json(StatusCode::OK, &summary)
        }
        (&Method::GET, ["ledger", "export"]) => {
            let month = required_query(event, "month")?;
            let text = ledger::export_ledger_csv(state, caller, month).await?;
            Ok(Routed::Csv(format!("ledger-{}.csv", month), text))
        }

        _ => Ok(Routed::NotFound),
    }
}
