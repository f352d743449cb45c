use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::services::gateway::{CardGateway, MpesaGateway};
use crate::services::messaging::MessagingProvider;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub mpesa: Box<dyn MpesaGateway>,
    pub card: Box<dyn CardGateway>,
    pub messaging: Box<dyn MessagingProvider>,
}

impl AppState {
    /// Locks the shared connection. Never hold the guard across an `.await`.
    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.db
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("database mutex poisoned")))
    }
}
