use crate::error::{AppError, AppResult};
use lambda_http::{Request, RequestExt};
use std::collections::HashMap;

/// Authorization groups managed in the user pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Admin,
    ItAdmins,
    Hr,
    Teacher,
}

impl Group {
    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Admin => "Admin",
            Group::ItAdmins => "ITAdmins",
            Group::Hr => "HR",
            Group::Teacher => "Teacher",
        }
    }
}

/// The authenticated principal of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Caller {
    pub subject: String,
    pub email: Option<String>,
    pub groups: Vec<String>,
}

impl Caller {
    pub fn new(subject: impl Into<String>, email: Option<&str>, groups: &[&str]) -> Self {
        Self {
            subject: subject.into(),
            email: email.map(|e| e.to_lowercase()),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    pub fn is_in(&self, group: Group) -> bool {
        self.groups.iter().any(|g| g == group.as_str())
    }

    pub fn is_any(&self, groups: &[Group]) -> bool {
        groups.iter().any(|g| self.is_in(*g))
    }

    pub fn require_any(&self, groups: &[Group]) -> AppResult<()> {
        if self.is_any(groups) {
            return Ok(());
        }
        let names: Vec<&str> = groups.iter().map(|g| g.as_str()).collect();
        Err(AppError::Forbidden(format!(
            "Not authorized: requires one of {}",
            names.join(", ")
        )))
    }

    /// Owner of a resource, or a member of one of `groups`.
    pub fn require_owner_or(&self, owner: &str, groups: &[Group]) -> AppResult<()> {
        if self.subject == owner {
            return Ok(());
        }
        self.require_any(groups)
    }

    /// Audit label: email when known, subject otherwise.
    pub fn label(&self) -> String {
        self.email.clone().unwrap_or_else(|| self.subject.clone())
    }
}

/// `cognito:groups` arrives as `[A B]` from HTTP API JWT authorizers, as a
/// JSON array from some clients, or comma separated from dev headers.
pub fn parse_groups(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
        return list;
    }
    trimmed
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|g| g.trim().trim_matches('"'))
        .filter(|g| !g.is_empty())
        .map(|g| g.to_string())
        .collect()
}

fn caller_from_claims(claims: &HashMap<String, String>) -> Option<Caller> {
    let subject = claims.get("sub")?.clone();
    Some(Caller {
        subject,
        email: claims.get("email").map(|e| e.to_lowercase()),
        groups: claims
            .get("cognito:groups")
            .map(|g| parse_groups(g))
            .unwrap_or_default(),
    })
}

fn header(event: &Request, name: &str) -> Option<String> {
    event
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the caller from the JWT authorizer claims (API Gateway has already
/// validated the token). With `allow_dev_identity`, `X-User-*` headers may stand in.
pub fn caller_from_request(event: &Request, allow_dev_identity: bool) -> AppResult<Caller> {
    if allow_dev_identity {
        if let Some(subject) = header(event, "X-User-Id") {
            tracing::warn!("Using development identity header for {}", subject);
            return Ok(Caller {
                subject,
                email: header(event, "X-User-Email").map(|e| e.to_lowercase()),
                groups: header(event, "X-User-Groups")
                    .map(|g| parse_groups(&g))
                    .unwrap_or_default(),
            });
        }
    }

    event
        .request_context_ref()
        .and_then(|ctx| ctx.authorizer())
        .and_then(|auth| auth.jwt.as_ref())
        .and_then(|jwt| caller_from_claims(&jwt.claims))
        .ok_or_else(|| AppError::Unauthorized("Missing or invalid authorization".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_http::Body;

    #[test]
    fn group_formats() {
        assert_eq!(parse_groups("[Admin ITAdmins]"), vec!["Admin", "ITAdmins"]);
        assert_eq!(parse_groups("[\"HR\",\"Teacher\"]"), vec!["HR", "Teacher"]);
        assert_eq!(parse_groups("Admin, HR"), vec!["Admin", "HR"]);
        assert!(parse_groups("[]").is_empty());
    }

    #[test]
    fn group_checks() {
        let teacher = Caller::new("sub-1", Some("T@kla.education"), &["Teacher"]);
        assert_eq!(teacher.email.as_deref(), Some("t@kla.education"));
        assert!(teacher.require_any(&[Group::Teacher, Group::Admin]).is_ok());
        let err = teacher.require_any(&[Group::Admin, Group::ItAdmins]).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(ref m) if m.contains("Admin, ITAdmins")));
        assert!(teacher.require_owner_or("sub-1", &[Group::Admin]).is_ok());
        assert!(teacher.require_owner_or("sub-2", &[Group::Admin]).is_err());
    }

    #[test]
    fn dev_headers_only_when_allowed() {
        let request: Request = lambda_http::http::Request::builder()
            .header("X-User-Id", "dev-user")
            .header("X-User-Groups", "Admin,HR")
            .body(Body::Empty)
            .unwrap();

        let caller = caller_from_request(&request, true).unwrap();
        assert_eq!(caller.subject, "dev-user");
        assert!(caller.is_in(Group::Hr));

        let err = caller_from_request(&request, false).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
