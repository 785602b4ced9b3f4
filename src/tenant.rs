use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::engine::{BookingEngine, EngineConfig, EngineError};
use crate::limits::*;
use crate::model::TenantId;
use crate::storage::Store;

/// One tenant's store and the engine wired to it.
pub struct Tenant {
    pub id: TenantId,
    pub store: Arc<Store>,
    pub engine: BookingEngine,
}

/// Manages per-tenant stores. Each tenant gets its own WAL file and
/// compactor. Tenant = database name from the pgwire connection.
pub struct TenantManager {
    tenants: DashMap<String, Arc<Tenant>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    engine_config: EngineConfig,
}

impl TenantManager {
    pub fn new(
        data_dir: PathBuf,
        compact_threshold: u64,
        engine_config: EngineConfig,
    ) -> Result<Self, EngineError> {
        engine_config.validate()?;
        Ok(Self {
            tenants: DashMap::new(),
            data_dir,
            compact_threshold,
            engine_config,
        })
    }

    /// Get or lazily open the tenant's store.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Tenant>> {
        if let Some(t) = self.tenants.get(tenant) {
            return Ok(t.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
        }
        if self.tenants.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // The name is the WAL file stem, so it must map to exactly one file.
        if tenant.is_empty()
            || !tenant.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tenant name must be non-empty and use only ASCII letters, digits, '_' or '-'",
            ));
        }

        let created = match self.tenants.entry(tenant.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let wal_path = self.data_dir.join(format!("{tenant}.wal"));
                let store = Arc::new(Store::open(&wal_path)?);
                let engine = BookingEngine::with_store(store.clone(), self.engine_config)
                    .map_err(io::Error::other)?;
                let t = Arc::new(Tenant { id: TenantId::new(tenant), store, engine });

                let compactor_store = t.store.clone();
                let threshold = self.compact_threshold;
                tokio::spawn(async move {
                    run_compactor(compactor_store, threshold).await;
                });
                e.insert(t.clone());
                t
            }
        };

        tracing::info!(tenant, "tenant loaded");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenants.len() as f64);
        Ok(created)
    }
}

/// Rewrite the tenant's WAL whenever enough appends have piled up.
pub async fn run_compactor(store: Arc<Store>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(10));
    loop {
        interval.tick().await;
        let appends = store.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => tracing::info!(appends, "WAL compacted"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}
