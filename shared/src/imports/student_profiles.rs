use super::{split_header, ColumnMap, ColumnSpec, ImportRow, ImportSpec, ParsedImport};
use crate::store::Repository;
use crate::students::derive_graduation_year_from_email;
use crate::types::{Guardian, ImportKind, ProfileStatus, StudentProfile, UserProfile, UserType};
use crate::validate::{is_valid_email, non_empty_trimmed, normalize_email, parse_boolish, parse_flexible_date};
use crate::AppState;
use std::sync::Arc;

/// Column order of both the import template and the export.
pub static COLUMNS: &[ColumnSpec] = &[
    ColumnSpec { name: "primaryEmail", aliases: &["email"], required: true },
    ColumnSpec { name: "status", aliases: &[], required: false },
    ColumnSpec { name: "student.firstName", aliases: &["firstName"], required: true },
    ColumnSpec { name: "student.lastName", aliases: &["lastName"], required: true },
    ColumnSpec { name: "student.preferredName", aliases: &["preferredName"], required: false },
    ColumnSpec { name: "student.dateOfBirth", aliases: &["dateOfBirth"], required: false },
    ColumnSpec { name: "student.gender", aliases: &["gender"], required: false },
    ColumnSpec { name: "student.nationality", aliases: &["nationality"], required: false },
    ColumnSpec { name: "student.homeroom", aliases: &["homeroom"], required: false },
    ColumnSpec { name: "student.enrollmentDate", aliases: &["enrollmentDate"], required: false },
    ColumnSpec { name: "student.photoConsent", aliases: &["photoConsent"], required: false },
    ColumnSpec { name: "student.medicalNotes", aliases: &["medicalNotes"], required: false },
    ColumnSpec { name: "student.allergies", aliases: &["allergies"], required: false },
    ColumnSpec { name: "student.guardian1Name", aliases: &["guardian1Name"], required: false },
    ColumnSpec { name: "student.guardian1Email", aliases: &["guardian1Email"], required: false },
    ColumnSpec { name: "student.guardian1Phone", aliases: &["guardian1Phone"], required: false },
    ColumnSpec { name: "student.guardian2Name", aliases: &["guardian2Name"], required: false },
    ColumnSpec { name: "student.guardian2Email", aliases: &["guardian2Email"], required: false },
    ColumnSpec { name: "student.guardian2Phone", aliases: &["guardian2Phone"], required: false },
    ColumnSpec { name: "student.address", aliases: &["address"], required: false },
];

#[derive(Debug, Clone, PartialEq)]
pub struct StudentProfileRow {
    pub primary_email: String,
    pub status: ProfileStatus,
    pub student: StudentProfile,
}

fn optional_date(
    columns: &ColumnMap,
    fields: &[String],
    column: &str,
    errors: &mut Vec<String>,
) -> Option<String> {
    let raw = columns.get(fields, column);
    if raw.is_empty() {
        return None;
    }
    match parse_flexible_date(raw) {
        Ok(date) => Some(date.format("%Y-%m-%d").to_string()),
        Err(e) => {
            errors.push(format!("{}: {}", column, e));
            None
        }
    }
}

fn guardian(columns: &ColumnMap, fields: &[String], n: u8, errors: &mut Vec<String>) -> Option<Guardian> {
    let name = non_empty_trimmed(columns.get(fields, &format!("student.guardian{}Name", n)));
    let email = non_empty_trimmed(columns.get(fields, &format!("student.guardian{}Email", n))).map(|e| normalize_email(&e));
    let phone = non_empty_trimmed(columns.get(fields, &format!("student.guardian{}Phone", n)));

    if let Some(email) = &email {
        if !is_valid_email(email) {
            errors.push(format!("student.guardian{}Email: invalid email '{}'", n, email));
        }
    }
    if name.is_none() && email.is_none() && phone.is_none() {
        return None;
    }
    Some(Guardian { name, email, phone })
}

pub fn validate_row(row_number: usize, columns: &ColumnMap, fields: &[String]) -> ImportRow<StudentProfileRow> {
    let raw_email = columns.get(fields, "primaryEmail");
    let email = normalize_email(raw_email);
    let mut errors = Vec::new();

    if email.is_empty() {
        errors.push("primaryEmail is required".to_string());
    } else if !is_valid_email(&email) {
        errors.push(format!("invalid email '{}'", raw_email));
    }

    let status = match columns.get(fields, "status") {
        "" => ProfileStatus::Active,
        raw => ProfileStatus::parse(raw).unwrap_or_else(|| {
            errors.push(format!(
                "status '{}' must be one of ACTIVE, INACTIVE, GRADUATED, WITHDRAWN",
                raw
            ));
            ProfileStatus::Active
        }),
    };

    let first_name = columns.get(fields, "student.firstName").to_string();
    if first_name.is_empty() {
        errors.push("student.firstName is required".to_string());
    }
    let last_name = columns.get(fields, "student.lastName").to_string();
    if last_name.is_empty() {
        errors.push("student.lastName is required".to_string());
    }

    let date_of_birth = optional_date(columns, fields, "student.dateOfBirth", &mut errors);
    let enrollment_date = optional_date(columns, fields, "student.enrollmentDate", &mut errors);

    let photo_consent = match parse_boolish(columns.get(fields, "student.photoConsent")) {
        Ok(value) => value,
        Err(e) => {
            errors.push(format!("student.photoConsent: {}", e));
            None
        }
    };

    let guardians: Vec<Guardian> = [1, 2]
        .into_iter()
        .filter_map(|n| guardian(columns, fields, n, &mut errors))
        .collect();

    let text = |column: &str| non_empty_trimmed(columns.get(fields, column));
    let student = StudentProfile {
        first_name,
        last_name,
        preferred_name: text("student.preferredName"),
        date_of_birth,
        gender: text("student.gender"),
        nationality: text("student.nationality"),
        homeroom: text("student.homeroom"),
        enrollment_date,
        photo_consent,
        medical_notes: text("student.medicalNotes"),
        allergies: text("student.allergies"),
        guardians,
        address: text("student.address"),
        graduation_year: derive_graduation_year_from_email(&email),
    };

    let record = errors.is_empty().then(|| StudentProfileRow {
        primary_email: raw_email.to_string(),
        status,
        student,
    });

    ImportRow {
        row_number,
        primary_email: email,
        record,
        errors,
        warnings: Vec::new(),
    }
}

/// The export row for one profile, in `COLUMNS` order.
pub fn profile_to_fields(profile: &UserProfile) -> Vec<String> {
    let student = profile.student.clone().unwrap_or_default();
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    let guardian = |i: usize| student.guardians.get(i).cloned().unwrap_or_default();
    let (g1, g2) = (guardian(0), guardian(1));
    let consent = match student.photo_consent {
        Some(true) => "yes",
        Some(false) => "no",
        None => "",
    };

    vec![
        profile.primary_email.clone(),
        profile.status.as_str().to_string(),
        student.first_name.clone(),
        student.last_name.clone(),
        opt(&student.preferred_name),
        opt(&student.date_of_birth),
        opt(&student.gender),
        opt(&student.nationality),
        opt(&student.homeroom),
        opt(&student.enrollment_date),
        consent.to_string(),
        opt(&student.medical_notes),
        opt(&student.allergies),
        opt(&g1.name),
        opt(&g1.email),
        opt(&g1.phone),
        opt(&g2.name),
        opt(&g2.email),
        opt(&g2.phone),
        opt(&student.address),
    ]
}

pub struct StudentProfileImport;

impl ImportSpec for StudentProfileImport {
    type Row = StudentProfileRow;
    type Target = UserProfile;

    const KIND: ImportKind = ImportKind::StudentProfile;

    fn parse(text: &str) -> Result<ParsedImport<StudentProfileRow>, Vec<String>> {
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

    fn repository(state: &AppState) -> Arc<dyn Repository<UserProfile>> {
        state.profiles.clone()
    }

    fn identity(target: &UserProfile) -> String {
        normalize_email(&target.primary_email_lower)
    }

    fn freshness(target: &UserProfile) -> Option<String> {
        target.updated_at.clone().or_else(|| Some(target.created_at.clone()))
    }

    fn merge(row: &StudentProfileRow, existing: Option<&UserProfile>, actor: &str, now: &str) -> UserProfile {
        let primary_email_lower = normalize_email(&row.primary_email);
        match existing {
            Some(current) => UserProfile {
                primary_email: row.primary_email.trim().to_string(),
                primary_email_lower,
                user_type: UserType::Student,
                status: row.status,
                student: Some(row.student.clone()),
                updated_at: Some(now.to_string()),
                updated_by: Some(actor.to_string()),
                ..current.clone()
            },
            None => UserProfile {
                user_id: uuid::Uuid::new_v4().to_string(),
                primary_email: row.primary_email.trim().to_string(),
                primary_email_lower,
                user_type: UserType::Student,
                status: row.status,
                student: Some(row.student.clone()),
                created_at: now.to_string(),
                updated_at: None,
                created_by: Some(actor.to_string()),
                updated_by: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv;

    fn header() -> String {
        COLUMNS.iter().map(|c| c.name).collect::<Vec<_>>().join(",")
    }

    #[test]
    fn parses_full_row_with_bare_aliases() {
        let text = "email,firstName,lastName,dateOfBirth,photoConsent,guardian1Email,guardian1Name\n\
                    Mia27@kla.education,Mia,Lee,05/03/2012,Y,MOM@example.com,Ana\n";
        let parsed = StudentProfileImport::parse(text).unwrap();
        let row = &parsed.rows[0];
        assert!(row.errors.is_empty(), "{:?}", row.errors);
        let record = row.record.as_ref().unwrap();
        assert_eq!(record.status, ProfileStatus::Active);
        assert_eq!(record.student.date_of_birth.as_deref(), Some("2012-03-05"));
        assert_eq!(record.student.photo_consent, Some(true));
        assert_eq!(record.student.graduation_year, Some(2027));
        assert_eq!(record.student.guardians.len(), 1);
        assert_eq!(record.student.guardians[0].email.as_deref(), Some("mom@example.com"));
    }

    #[test]
    fn collects_every_error_on_a_row() {
        let text = "primaryEmail,status,student.firstName,student.lastName,student.dateOfBirth,student.photoConsent,student.guardian2Email\n\
                    x@kla.education,ENROLLED,,Lee,31/02/2012,maybe,not-an-email\n";
        let parsed = StudentProfileImport::parse(text).unwrap();
        let row = &parsed.rows[0];
        assert!(row.record.is_none());
        assert_eq!(row.errors.len(), 5, "{:?}", row.errors);
    }

    #[test]
    fn missing_name_column_aborts() {
        let err = StudentProfileImport::parse("primaryEmail,student.firstName\na@kla.education,A\n").unwrap_err();
        assert_eq!(err, vec!["Missing required column 'student.lastName'"]);
    }

    #[test]
    fn exported_row_reimports_unchanged() {
        let text = format!(
            "{}\nann30@kla.education,GRADUATED,Ann,\"O'Neil, Jr\",,2015-09-01,F,KR,7B,2021-08-20,no,\"line1\nline2\",nuts,Bo,bo@example.com,010,,,,\"1 Main St\"\n",
            header()
        );
        let parsed = StudentProfileImport::parse(&text).unwrap();
        let row = parsed.rows[0].record.clone().unwrap();
        let profile = StudentProfileImport::merge(&row, None, "t", "2024-01-01T00:00:00Z");

        let exported = csv::to_csv(&[profile_to_fields(&profile)], ',').unwrap();
        let reparsed = StudentProfileImport::parse(&format!("{}\n{}", header(), exported)).unwrap();
        assert_eq!(reparsed.rows[0].record.as_ref(), Some(&row));
    }
}
