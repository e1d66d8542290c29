use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

/// `None` only if the pattern fails to compile, in which case nothing matches.
fn email_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok()).as_ref()
}

fn role_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_+=,.@-]{1,128}$").ok()).as_ref()
}

/// Header key used for matching: lowercase ASCII alphanumerics only, so
/// `PrimaryEmail`, `primary_email` and `Primary Email` compare equal.
pub fn canonical_header(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    email_regex().is_some_and(|re| re.is_match(email))
}

pub fn is_valid_role(role: &str) -> bool {
    role_regex().is_some_and(|re| re.is_match(role))
}

/// Split a joined role list on commas, semicolons, pipes and whitespace,
/// dropping empties and duplicates while keeping first-seen order.
pub fn split_roles(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in raw.split(|c: char| c == ',' || c == ';' || c == '|' || c.is_whitespace()) {
        let token = token.trim();
        if !token.is_empty() && !out.iter().any(|r| r == token) {
            out.push(token.to_string());
        }
    }
    out
}

/// Tri-state boolean coercion. Empty and `unknown` mean "not stated".
pub fn parse_boolish(raw: &str) -> Result<Option<bool>, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Ok(Some(true)),
        "no" | "n" | "false" | "0" => Ok(Some(false)),
        "" | "unknown" => Ok(None),
        other => Err(format!("'{}' is not a yes/no value", other)),
    }
}

/// Accepts `YYYY-MM-DD` or `DD/MM/YYYY`; `-`, `/` and `.` are interchangeable.
pub fn parse_flexible_date(raw: &str) -> Result<NaiveDate, String> {
    let trimmed = raw.trim();
    let parts: Vec<&str> = trimmed.split(['-', '/', '.']).collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
        return Err(format!("'{}' is not a date (use YYYY-MM-DD or DD/MM/YYYY)", trimmed));
    }

    let num = |s: &str| s.parse::<u32>().map_err(|_| format!("'{}' is not a date", trimmed));
    let (year, month, day) = if parts[0].len() == 4 {
        (num(parts[0])?, num(parts[1])?, num(parts[2])?)
    } else if parts[2].len() == 4 {
        (num(parts[2])?, num(parts[1])?, num(parts[0])?)
    } else {
        return Err(format!("'{}' is not a date (use YYYY-MM-DD or DD/MM/YYYY)", trimmed));
    };

    NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| format!("'{}' is not a valid calendar date", trimmed))
}

/// Strict ISO date used by API parameters.
pub fn parse_iso_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| format!("'{}' is not a YYYY-MM-DD date", raw.trim()))
}

pub fn non_empty_trimmed(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_patterns_compile() {
        assert!(email_regex().is_some());
        assert!(role_regex().is_some());
    }

    #[test]
    fn header_aliases_collapse() {
        assert_eq!(canonical_header("PrimaryEmail"), "primaryemail");
        assert_eq!(canonical_header(" primary_email "), "primaryemail");
        assert_eq!(canonical_header("student.firstName"), "studentfirstname");
    }

    #[test]
    fn email_checks_are_permissive() {
        assert!(is_valid_email("student26@kla.education"));
        assert!(is_valid_email("o'neil+tag@sub.example.co"));
        assert!(!is_valid_email("no-at-sign.example.com"));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email("nodot@example"));
    }

    #[test]
    fn role_tokens() {
        assert!(is_valid_role("ITAdmins"));
        assert!(is_valid_role("group.name@kla-1"));
        assert!(!is_valid_role("bad!role"));
        assert!(!is_valid_role(&"x".repeat(129)));
        assert_eq!(split_roles(" Admin, Teacher;HR | Admin  "), vec!["Admin", "Teacher", "HR"]);
    }

    #[test]
    fn boolish() {
        assert_eq!(parse_boolish("Yes"), Ok(Some(true)));
        assert_eq!(parse_boolish("0"), Ok(Some(false)));
        assert_eq!(parse_boolish("unknown"), Ok(None));
        assert_eq!(parse_boolish(" "), Ok(None));
        assert!(parse_boolish("maybe").is_err());
    }

    #[test]
    fn flexible_dates() {
        let expected = NaiveDate::from_ymd_opt(2010, 3, 7).unwrap();
        assert_eq!(parse_flexible_date("2010-03-07"), Ok(expected));
        assert_eq!(parse_flexible_date("07/03/2010"), Ok(expected));
        assert_eq!(parse_flexible_date("7.3.2010"), Ok(expected));
        assert_eq!(parse_flexible_date("2010/3/7"), Ok(expected));
        assert!(parse_flexible_date("31/02/2010").is_err());
        assert!(parse_flexible_date("2010-13-01").is_err());
        assert!(parse_flexible_date("10-03-07").is_err());
        assert!(parse_flexible_date("March 7").is_err());
    }
}
