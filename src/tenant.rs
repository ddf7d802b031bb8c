use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::engine::{Engine, EngineOptions};
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::reaper;

/// One restaurant per database name. Each gets its own Engine, WAL and
/// maintenance tasks.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    options: EngineOptions,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, options: EngineOptions) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            options,
        }
    }

    /// Get or lazily create the engine for a restaurant.
    ///
    /// Engines are keyed by the sanitized name that also names the WAL file,
    /// so two database names that map to one file share one engine.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }

        // Keep the WAL inside data_dir.
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Holding the entry makes a racing connection for the same name wait
        // instead of opening the WAL twice.
        let engine = match self.engines.entry(safe_name.clone()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let notify = Arc::new(NotifyHub::new());
                let engine = Arc::new(Engine::new(wal_path, notify, self.options)?);
                slot.insert(engine.clone());
                engine
            }
        };

        tokio::spawn(reaper::run_maintenance(engine.clone()));
        tokio::spawn(reaper::run_compactor(engine.clone(), self.compact_threshold));

        tracing::info!("opened restaurant {safe_name}");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}
