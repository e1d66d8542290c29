pub mod auth;
pub mod config;
pub mod csv;
pub mod devices;
pub mod directory;
pub mod email;
pub mod error;
pub mod http;
pub mod imports;
pub mod ledger;
pub mod pc_lab;
pub mod profiles;
pub mod reservations;
pub mod roles;
pub mod store;
pub mod students;
pub mod types;
pub mod validate;

use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sesv2::Client as SesClient;
use config::Config;
use directory::{CognitoDirectory, IdentityDirectory, MemoryDirectory};
use email::{DisabledMailer, Mailer, SesMailer};
use std::sync::Arc;
use store::{DynamoRepository, MemoryObjectStore, MemoryRepository, ObjectStore, Repository, S3ObjectStore};
use types::{
    ActiveLoan, DeviceLoan, ImportJob, LedgerEntry, PcLabReservation, Reservation, RoleAssignment, UserProfile,
};

/// Shared application state, built once per cold start.
pub struct AppState {
    pub config: Config,
    pub role_assignments: Arc<dyn Repository<RoleAssignment>>,
    pub profiles: Arc<dyn Repository<UserProfile>>,
    pub import_jobs: Arc<dyn Repository<ImportJob>>,
    pub reservations: Arc<dyn Repository<Reservation>>,
    pub pc_lab: Arc<dyn Repository<PcLabReservation>>,
    pub device_loans: Arc<dyn Repository<DeviceLoan>>,
    pub active_loans: Arc<dyn Repository<ActiveLoan>>,
    pub ledger: Arc<dyn Repository<LedgerEntry>>,
    pub objects: Arc<dyn ObjectStore>,
    pub directory: Arc<dyn IdentityDirectory>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(
        config: Config,
        cognito_client: CognitoClient,
        dynamo_client: DynamoClient,
        s3_client: S3Client,
        ses_client: SesClient,
    ) -> Arc<Self> {
        let table = config.table_name.clone();
        let mailer: Arc<dyn Mailer> = match &config.ses_sender {
            Some(sender) => Arc::new(SesMailer::new(ses_client, sender.clone())),
            None => Arc::new(DisabledMailer),
        };

        Arc::new(Self {
            role_assignments: Arc::new(DynamoRepository::<RoleAssignment>::new(dynamo_client.clone(), table.clone())),
            profiles: Arc::new(DynamoRepository::<UserProfile>::new(dynamo_client.clone(), table.clone())),
            import_jobs: Arc::new(DynamoRepository::<ImportJob>::new(dynamo_client.clone(), table.clone())),
            reservations: Arc::new(DynamoRepository::<Reservation>::new(dynamo_client.clone(), table.clone())),
            pc_lab: Arc::new(DynamoRepository::<PcLabReservation>::new(dynamo_client.clone(), table.clone())),
            device_loans: Arc::new(DynamoRepository::<DeviceLoan>::new(dynamo_client.clone(), table.clone())),
            active_loans: Arc::new(DynamoRepository::<ActiveLoan>::new(dynamo_client.clone(), table.clone())),
            ledger: Arc::new(DynamoRepository::<LedgerEntry>::new(dynamo_client, table)),
            objects: Arc::new(S3ObjectStore::new(s3_client, config.import_bucket.clone())),
            directory: Arc::new(CognitoDirectory::new(cognito_client, config.user_pool_id.clone())),
            mailer,
            config,
        })
    }

    /// Everything in process memory. Fields are public so tests can swap in
    /// a recording mailer or a faulty repository.
    pub fn in_memory(config: Config) -> Self {
        Self {
            config,
            role_assignments: Arc::new(MemoryRepository::<RoleAssignment>::new()),
            profiles: Arc::new(MemoryRepository::<UserProfile>::new()),
            import_jobs: Arc::new(MemoryRepository::<ImportJob>::new()),
            reservations: Arc::new(MemoryRepository::<Reservation>::new()),
            pc_lab: Arc::new(MemoryRepository::<PcLabReservation>::new()),
            device_loans: Arc::new(MemoryRepository::<DeviceLoan>::new()),
            active_loans: Arc::new(MemoryRepository::<ActiveLoan>::new()),
            ledger: Arc::new(MemoryRepository::<LedgerEntry>::new()),
            objects: Arc::new(MemoryObjectStore::new()),
            directory: Arc::new(MemoryDirectory::new(Vec::new(), 60)),
            mailer: Arc::new(email::RecordingMailer::default()),
        }
    }
}
