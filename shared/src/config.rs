use crate::error::ConfigError;
use crate::reservations::{ReservationWindows, TimeWindow};
use std::env;

const DEFAULT_TABLE_NAME: &str = "kla-admin";
const DEFAULT_APP_BASE_URL: &str = "http://localhost:5173";
const DEFAULT_ROLLOVER_MONTH: u32 = 6;
const DEFAULT_WEEKDAY_WINDOW: &str = "15:00-21:00";
const DEFAULT_WEEKEND_WINDOW: &str = "12:00-18:00";

/// Process-wide configuration, read once at cold start.
#[derive(Debug, Clone)]
pub struct Config {
    pub table_name: String,
    pub import_bucket: String,
    pub user_pool_id: String,
    pub app_base_url: String,
    pub ses_sender: Option<String>,
    pub admin_emails: Vec<String>,
    pub grade_rollover_month: u32,
    pub reservation_windows: ReservationWindows,
    pub allow_dev_identity: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so tests don't touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let grade_rollover_month = match get("GRADE_ROLLOVER_MONTH") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|m| (1..=12).contains(m))
                .ok_or_else(|| ConfigError::Invalid {
                    name: "GRADE_ROLLOVER_MONTH",
                    reason: format!("expected a month 1-12, got {:?}", raw),
                })?,
            None => DEFAULT_ROLLOVER_MONTH,
        };

        let window = |key: &'static str, default: &str| {
            let raw = get(key).unwrap_or_else(|| default.to_string());
            TimeWindow::parse_range(&raw).map_err(|reason| ConfigError::Invalid { name: key, reason })
        };

        Ok(Self {
            table_name: get("TABLE_NAME").unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
            import_bucket: require("IMPORT_BUCKET_NAME")?,
            user_pool_id: require("USER_POOL_ID")?,
            app_base_url: get("APP_BASE_URL")
                .unwrap_or_else(|| DEFAULT_APP_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            ses_sender: get("SES_SENDER"),
            admin_emails: get("ADMIN_EMAILS")
                .map(|list| {
                    list.split(',')
                        .map(|e| e.trim().to_lowercase())
                        .filter(|e| !e.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            grade_rollover_month,
            reservation_windows: ReservationWindows {
                weekday: window("RESERVATION_WEEKDAY_WINDOW", DEFAULT_WEEKDAY_WINDOW)?,
                weekend: window("RESERVATION_WEEKEND_WINDOW", DEFAULT_WEEKEND_WINDOW)?,
            },
            allow_dev_identity: get("ALLOW_DEV_IDENTITY")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }

    /// Defaults suitable for unit tests and local runs.
    pub fn for_tests() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            import_bucket: "kla-imports-test".to_string(),
            user_pool_id: "ap-southeast-2_test".to_string(),
            app_base_url: DEFAULT_APP_BASE_URL.to_string(),
            ses_sender: Some("noreply@kla.education".to_string()),
            admin_emails: vec!["it@kla.education".to_string()],
            grade_rollover_month: DEFAULT_ROLLOVER_MONTH,
            reservation_windows: ReservationWindows {
                weekday: TimeWindow { start_minutes: 15 * 60, end_minutes: 21 * 60 },
                weekend: TimeWindow { start_minutes: 12 * 60, end_minutes: 18 * 60 },
            },
            allow_dev_identity: true,
        }
    }
}
