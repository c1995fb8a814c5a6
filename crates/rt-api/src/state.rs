use std::sync::Arc;

use rt_ops::RadiusService;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::jobs::JobRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub service: Arc<RadiusService>,
    pub jobs: JobRegistry,
    pub config: AppConfig,
}
