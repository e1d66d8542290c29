use crate::auth::{Caller, Group};
use crate::csv;
use crate::error::{AppError, AppResult};
use crate::imports::student_profiles::{profile_to_fields, COLUMNS};
use crate::store::list_all;
use crate::students::derive_student_grade_from_email;
use crate::types::{UserProfile, UserProfileView, UserType};
use crate::AppState;
use chrono::NaiveDate;

/// Fetch a profile and attach the grade derived from its email. The grade
/// is computed on every read, never stored.
pub async fn get_user_profile(
    state: &AppState,
    caller: &Caller,
    user_id: &str,
    today: NaiveDate,
) -> AppResult<UserProfileView> {
    caller.require_owner_or(user_id, &[Group::Admin, Group::Hr, Group::Teacher])?;

    let profile = state
        .profiles
        .get(&UserProfile::pk_for(user_id), UserProfile::SK)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", user_id)))?;

    let student_grade = match profile.user_type {
        UserType::Student => {
            derive_student_grade_from_email(&profile.primary_email, today, state.config.grade_rollover_month)
        }
        _ => None,
    };
    Ok(UserProfileView { profile, student_grade })
}

/// Every student profile as CSV, with the import header so the file can be
/// edited and uploaded again.
pub async fn export_student_profiles_csv(state: &AppState, caller: &Caller) -> AppResult<String> {
    caller.require_any(&[Group::Admin, Group::Hr])?;

    let mut profiles: Vec<UserProfile> = list_all(state.profiles.as_ref(), 200)
        .await?
        .into_iter()
        .filter(|p| p.user_type == UserType::Student)
        .collect();
    profiles.sort_by(|a, b| a.primary_email_lower.cmp(&b.primary_email_lower));

    let mut rows: Vec<Vec<String>> = Vec::with_capacity(profiles.len() + 1);
    rows.push(COLUMNS.iter().map(|c| c.name.to_string()).collect());
    rows.extend(profiles.iter().map(profile_to_fields));

    tracing::info!("Exported {} student profiles for {}", profiles.len(), caller.label());
    csv::to_csv(&rows, ',')
}
