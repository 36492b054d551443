use std::sync::Arc;

use crate::cloud::PrinterCloud;
use crate::config::AppConfig;
use crate::core::PrintService;
use tokio_rusqlite::Connection;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub printer: Arc<PrintService>,
}

impl AppContext {
    pub fn new(config: AppConfig, cloud: Arc<dyn PrinterCloud>, ledger: Option<Connection>) -> Self {
        let mut service = PrintService::new(cloud, &config);
        if let Some(conn) = ledger {
            service = service.with_ledger(conn);
        }

        Self {
            config: Arc::new(config),
            printer: Arc::new(service),
        }
    }
}
