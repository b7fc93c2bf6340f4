use std::sync::Arc;

use crate::analysis::ScanJob;
use crate::cache::RefreshCache;
use crate::config::AppConfig;
use crate::error::ScanError;
use crate::exchange::ExchangeId;

/// Shared application state, passed to all route handlers via `axum::extract::State`.
pub struct AppState {
    pub config: AppConfig,
    pub cache: RefreshCache,
}

impl AppState {
    pub fn new(config: AppConfig, job: Arc<dyn ScanJob>) -> Arc<Self> {
        let cache = RefreshCache::new(job, config.cache.staleness());
        Arc::new(Self { config, cache })
    }

    /// Parses a requested exchange id, falling back to the configured default
    /// when none was given.
    pub fn resolve_exchange(&self, requested: Option<&str>) -> Result<ExchangeId, ScanError> {
        match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.parse(),
            None => Ok(self.config.scan.default_exchange),
        }
    }
}
