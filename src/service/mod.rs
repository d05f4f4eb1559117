pub mod announcement_service;
pub mod recency_index;

use std::sync::Arc;
use sqlx::SqlitePool;

use crate::{
    auth::AuthService,
    config::Settings,
    error::Result,
};

pub use announcement_service::AnnouncementService;
pub use recency_index::RecencyIndex;

pub struct ServiceContext {
    pub announcement_service: Arc<AnnouncementService>,
    pub auth_service: Arc<AuthService>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    /// Wires the services. Loading the announcement service performs the
    /// startup scan of the store.
    pub async fn new(db_pool: SqlitePool, settings: &Settings) -> Result<Self> {
        let announcement_service = Arc::new(
            AnnouncementService::load(db_pool.clone(), &settings.announcements).await?,
        );
        let auth_service = Arc::new(AuthService::new(&settings.auth));

        Ok(Self {
            announcement_service,
            auth_service,
            db_pool,
        })
    }
}
