//! Process wiring.
//!
//! [`App`] owns the database handle, the task barrier and the mailer, and
//! builds the services on top of them. There is no global state: tests
//! build as many independent apps as they like.

use crate::background::TaskBarrier;
use crate::config::Config;
use crate::db::{Database, DbError};
use crate::mailer::Mailer;
use crate::services::{AccountService, CatalogService};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct App {
    pub config: Config,
    pub db: Database,
    pub barrier: TaskBarrier,
    pub mailer: Mailer,
    pub accounts: AccountService,
    pub catalog: CatalogService,
}

impl App {
    /// Open the database and build every service from `config`.
    pub async fn bootstrap(config: Config) -> Result<Self, DbError> {
        let mailer = Mailer::from_config(&config);
        Self::with_mailer(config, mailer).await
    }

    /// Same as [`App::bootstrap`] with a caller-supplied mailer.
    pub async fn with_mailer(config: Config, mailer: Mailer) -> Result<Self, DbError> {
        let db = Database::new(&config.database.path).await?;
        let barrier = TaskBarrier::new();

        let accounts = AccountService::new(db.clone(), mailer.clone(), barrier.clone(), config.tokens.clone());
        let catalog = CatalogService::new(db.clone());

        Ok(Self {
            config,
            db,
            barrier,
            mailer,
            accounts,
            catalog,
        })
    }

    /// Periodically delete expired tokens. `None` when pruning is disabled.
    pub fn spawn_token_pruner(&self) -> Option<JoinHandle<()>> {
        let secs = self.config.tokens.prune_interval_secs;
        if secs == 0 {
            info!("Token pruning disabled");
            return None;
        }

        let db = self.db.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            loop {
                interval.tick().await;
                match db.tokens().delete_expired().await {
                    Ok(removed) if removed > 0 => {
                        info!(removed, "Expired tokens pruned");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Failed to prune expired tokens");
                    }
                }
            }
        }))
    }

    /// Wait for detached work, bounded by `shutdown.drain_timeout_secs`.
    pub async fn shutdown(&self) -> bool {
        let drained = self.barrier.drain(self.config.shutdown.drain_timeout()).await;
        if drained {
            info!("Background work drained");
        }
        drained
    }
}
