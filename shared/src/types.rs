use crate::store::Record;
use serde::{Deserialize, Serialize};

// ========== ROLE ASSIGNMENT ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    pub id: String,
    pub primary_email: String,
    pub primary_email_lower: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub verified_emails: Vec<String>,
    pub external_identity_subject: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl Record for RoleAssignment {
    const ENTITY: &'static str = "ROLE_ASSIGNMENT";

    fn partition_key(&self) -> String {
        Self::pk_for(&self.id)
    }

    fn sort_key(&self) -> String {
        Self::pk_for(&self.id)
    }

    fn list_key(&self) -> String {
        self.primary_email_lower.clone()
    }
}

impl RoleAssignment {
    pub fn pk_for(id: &str) -> String {
        format!("ROLE#{}", id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleAssignmentRequest {
    pub primary_email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub external_identity_subject: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoleAssignmentRequest {
    pub primary_email: Option<String>,
    pub roles: Option<Vec<String>>,
    pub external_identity_subject: Option<String>,
    pub notes: Option<String>,
}

// ========== USER PROFILE ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserType {
    Student,
    Staff,
    Guardian,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileStatus {
    Active,
    Inactive,
    Graduated,
    Withdrawn,
}

impl ProfileStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "INACTIVE" => Some(Self::Inactive),
            "GRADUATED" => Some(Self::Graduated),
            "WITHDRAWN" => Some(Self::Withdrawn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Graduated => "GRADUATED",
            Self::Withdrawn => "WITHDRAWN",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Guardian {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub first_name: String,
    pub last_name: String,
    pub preferred_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub nationality: Option<String>,
    pub homeroom: Option<String>,
    pub enrollment_date: Option<String>,
    pub photo_consent: Option<bool>,
    pub medical_notes: Option<String>,
    pub allergies: Option<String>,
    #[serde(default)]
    pub guardians: Vec<Guardian>,
    pub address: Option<String>,
    pub graduation_year: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub primary_email: String,
    pub primary_email_lower: String,
    pub user_type: UserType,
    pub status: ProfileStatus,
    pub student: Option<StudentProfile>,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl Record for UserProfile {
    const ENTITY: &'static str = "USER_PROFILE";

    fn partition_key(&self) -> String {
        Self::pk_for(&self.user_id)
    }

    fn sort_key(&self) -> String {
        Self::SK.to_string()
    }

    fn list_key(&self) -> String {
        self.primary_email_lower.clone()
    }
}

impl UserProfile {
    pub const SK: &'static str = "PROFILE";

    pub fn pk_for(user_id: &str) -> String {
        format!("USER#{}", user_id)
    }
}

/// Profile as returned to callers, with the grade derived at read time.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileView {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub student_grade: Option<u8>,
}

// ========== IMPORT JOB ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportKind {
    UserRole,
    StudentProfile,
}

impl ImportKind {
    /// Path segment used in routes and object keys.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::UserRole => "user-roles",
            Self::StudentProfile => "student-profiles",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "user-roles" => Some(Self::UserRole),
            "student-profiles" => Some(Self::StudentProfile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserRole => "USER_ROLE",
            Self::StudentProfile => "STUDENT_PROFILE",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportJobStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl ImportJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// QUEUED -> PROCESSING -> {SUCCEEDED, FAILED}; QUEUED may also fail directly.
    pub fn can_transition_to(&self, next: ImportJobStatus) -> bool {
        use ImportJobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing) | (Queued, Failed) | (Processing, Succeeded) | (Processing, Failed)
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: String,
    pub kind: ImportKind,
    pub status: ImportJobStatus,
    pub source_filename: String,
    pub source_sha256: String,
    pub csv_location: String,
    pub result_location: Option<String>,
    pub total_rows: u32,
    pub processed_rows: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub message: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Record for ImportJob {
    const ENTITY: &'static str = "IMPORT_JOB";

    fn partition_key(&self) -> String {
        Self::pk_for(&self.id)
    }

    fn sort_key(&self) -> String {
        self.kind.as_str().to_string()
    }

    fn list_key(&self) -> String {
        self.created_at.clone()
    }
}

impl ImportJob {
    pub fn pk_for(id: &str) -> String {
        format!("IMPORT_JOB#{}", id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowOutcome {
    Success,
    Error,
}

/// One line of the downloadable result log.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultLogEntry {
    pub row_number: usize,
    pub primary_email: String,
    pub status: RowOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartImportRequest {
    pub csv: String,
    pub file_name: String,
    /// `"base64"` when the client sends the file bytes encoded.
    pub encoding: Option<String>,
}

// ========== SPORTS FIELD RESERVATION ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub date: String,
    pub hour: u8,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub notes: Option<String>,
    pub owner: String,
    pub created_at: String,
}

impl Record for Reservation {
    const ENTITY: &'static str = "RESERVATION";

    fn partition_key(&self) -> String {
        Self::pk_for(&self.date)
    }

    fn sort_key(&self) -> String {
        Self::sk_for(self.hour)
    }

    fn list_key(&self) -> String {
        format!("{}#{:02}", self.date, self.hour)
    }
}

impl Reservation {
    pub fn pk_for(date: &str) -> String {
        format!("RESERVATION#{}", date)
    }

    pub fn sk_for(hour: u8) -> String {
        format!("HOUR#{:02}", hour)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    pub date: String,
    pub hour: i64,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub notes: Option<String>,
}

// ========== PC LAB RESERVATION ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PcLabStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PcLabReservation {
    pub id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub purpose: String,
    pub seats: u32,
    pub requested_by: String,
    pub requester_email: Option<String>,
    pub status: PcLabStatus,
    pub decided_by: Option<String>,
    pub decision_note: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl Record for PcLabReservation {
    const ENTITY: &'static str = "PC_LAB_RESERVATION";

    fn partition_key(&self) -> String {
        Self::pk_for(&self.id)
    }

    fn sort_key(&self) -> String {
        Self::pk_for(&self.id)
    }

    fn list_key(&self) -> String {
        format!("{}#{}", self.date, self.start_time)
    }
}

impl PcLabReservation {
    pub fn pk_for(id: &str) -> String {
        format!("PCLAB#{}", id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePcLabReservationRequest {
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub purpose: String,
    #[serde(default = "default_seats")]
    pub seats: u32,
}

fn default_seats() -> u32 {
    1
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PcLabDecisionRequest {
    pub note: Option<String>,
}

// ========== DEVICE LOAN ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Out,
    Returned,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLoan {
    pub id: String,
    pub device_tag: String,
    pub borrower_email: String,
    pub loaned_at: String,
    pub due_date: Option<String>,
    pub returned_at: Option<String>,
    pub status: LoanStatus,
    pub notes: Option<String>,
    pub issued_by: String,
}

impl Record for DeviceLoan {
    const ENTITY: &'static str = "DEVICE_LOAN";

    fn partition_key(&self) -> String {
        Self::pk_for(&self.id)
    }

    fn sort_key(&self) -> String {
        Self::pk_for(&self.id)
    }

    fn list_key(&self) -> String {
        self.loaned_at.clone()
    }
}

impl DeviceLoan {
    pub fn pk_for(id: &str) -> String {
        format!("LOAN#{}", id)
    }
}

/// Exists only while a device is out; its key makes a second checkout fail.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveLoan {
    pub device_tag: String,
    pub loan_id: String,
    pub loaned_at: String,
}

impl Record for ActiveLoan {
    const ENTITY: &'static str = "ACTIVE_LOAN";

    fn partition_key(&self) -> String {
        Self::pk_for(&self.device_tag)
    }

    fn sort_key(&self) -> String {
        Self::SK.to_string()
    }
}

impl ActiveLoan {
    pub const SK: &'static str = "ACTIVE_LOAN";

    pub fn pk_for(device_tag: &str) -> String {
        format!("DEVICE#{}", device_tag)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutDeviceRequest {
    pub device_tag: String,
    pub borrower_email: String,
    pub due_date: Option<String>,
    pub notes: Option<String>,
}

// ========== LEDGER ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerKind {
    Income,
    Expense,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub date: String,
    pub description: String,
    pub amount_cents: i64,
    pub kind: LedgerKind,
    pub category: Option<String>,
    pub created_by: String,
    pub created_at: String,
}

impl Record for LedgerEntry {
    const ENTITY: &'static str = "LEDGER_ENTRY";

    fn partition_key(&self) -> String {
        Self::pk_for(&self.id)
    }

    fn sort_key(&self) -> String {
        Self::pk_for(&self.id)
    }

    fn list_key(&self) -> String {
        format!("{}#{}", self.date, self.id)
    }
}

impl LedgerEntry {
    pub fn pk_for(id: &str) -> String {
        format!("LEDGER#{}", id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLedgerEntryRequest {
    pub date: String,
    pub description: String,
    pub amount_cents: i64,
    pub kind: LedgerKind,
    pub category: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub month: String,
    pub income_cents: i64,
    pub expense_cents: i64,
    pub net_cents: i64,
    pub entries: usize,
}
