//! Idempotent seeding of the reserved superuser, the root role and its full grant.

use std::{future::Future, sync::Arc, time::Duration};

use serde_json::json;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};

use crate::{
    catalog::PermissionCatalog,
    config::AppConfig,
    error::StoreResult,
    models::{NewRole, NewUser},
    password::{PasswordError, hash_password},
    repository::CredentialState,
};

/// BootstrapPlan
///
/// What the routine converges the store towards. The admin password is hashed once
/// here, not on every run.
pub struct BootstrapPlan {
    pub admin_username: String,
    pub admin_password_hash: String,
    pub root_role: String,
    pub catalog: Arc<PermissionCatalog>,
}

impl BootstrapPlan {
    pub fn from_config(
        config: &AppConfig,
        catalog: Arc<PermissionCatalog>,
    ) -> Result<Self, PasswordError> {
        Ok(Self {
            admin_username: config.admin_username.clone(),
            admin_password_hash: hash_password(&config.admin_password)?,
            root_role: config.root_role.clone(),
            catalog,
        })
    }
}

/// What a single run changed. All-zero means the store was already converged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub permissions_seeded: usize,
    pub admin_created: bool,
    pub root_role_created: bool,
    pub root_assigned: bool,
    pub grants_added: u64,
}

impl BootstrapReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Bootstrapper
///
/// Cheap to clone; clones share the gate, so at most one run is in flight per
/// process no matter who triggers it.
#[derive(Clone)]
pub struct Bootstrapper {
    store: CredentialState,
    plan: Arc<BootstrapPlan>,
    gate: Arc<Mutex<()>>,
}

impl Bootstrapper {
    pub fn new(store: CredentialState, plan: BootstrapPlan) -> Self {
        Self {
            store,
            plan: Arc::new(plan),
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// run
    ///
    /// Seeds the catalog, ensures the admin user, the root role and the admin's
    /// membership, then grants root every permission it is missing. Everything
    /// happens in one transaction; any failure leaves the store untouched.
    pub async fn run(&self) -> StoreResult<BootstrapReport> {
        let _gate = self.gate.lock().await;
        let plan = &self.plan;
        let mut report = BootstrapReport::default();
        let mut tx = self.store.begin().await?;

        for permission in plan.catalog.new_permissions() {
            if tx.ensure_permission(permission).await? {
                report.permissions_seeded += 1;
            }
        }

        let admin = match tx.find_user_by_username(&plan.admin_username).await? {
            Some(user) => user,
            None => {
                report.admin_created = true;
                tx.create_user(NewUser {
                    username: plan.admin_username.clone(),
                    phone: None,
                    password_hash: plan.admin_password_hash.clone(),
                    profile: json!({}),
                })
                .await?
            }
        };

        let root = match tx.find_role_by_name(&plan.root_role).await? {
            Some(role) => role,
            None => {
                report.root_role_created = true;
                tx.create_role(NewRole {
                    name: plan.root_role.clone(),
                    description: "Reserved role holding every permission".to_string(),
                })
                .await?
            }
        };

        if !tx.has_role(admin.id, root.id).await? {
            tx.assign_role(admin.id, root.id).await?;
            report.root_assigned = true;
        }

        let all = tx.permission_ids().await?;
        report.grants_added = tx.grant_missing(root.id, &all).await?;

        tx.commit().await?;
        Ok(report)
    }

    /// Runs once and logs the outcome; used at startup and by the scheduler.
    pub async fn run_logged(&self) -> bool {
        match self.run().await {
            Ok(report) if report.is_noop() => {
                tracing::debug!("bootstrap: store already converged");
                true
            }
            Ok(report) => {
                tracing::info!(
                    permissions_seeded = report.permissions_seeded,
                    admin_created = report.admin_created,
                    root_role_created = report.root_role_created,
                    root_assigned = report.root_assigned,
                    grants_added = report.grants_added,
                    "bootstrap: applied changes"
                );
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "bootstrap: run failed, store unchanged");
                false
            }
        }
    }

    /// Re-runs the routine every `every`, starting one interval from now.
    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        schedule("bootstrap", every, move || {
            let this = self.clone();
            async move {
                this.run_logged().await;
            }
        })
    }
}

/// Sequential timer loop: the next tick is awaited only after the previous job
/// finished, and each job runs in its own task so a panic is logged, not fatal.
pub(crate) fn schedule<F, Fut>(name: &'static str, every: Duration, job: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = tokio::spawn(job()).await {
                tracing::error!(job = name, error = %e, "scheduled job panicked");
            }
        }
    })
}
