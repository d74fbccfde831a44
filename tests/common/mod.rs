//! Shared test harness: an in-memory database plus a scriptable mock of the
//! chat-platform gateway.

#![allow(dead_code)] // Each test binary uses a different slice of the harness.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempgrant::config::SweepConfig;
use tempgrant::db::Database;
use tempgrant::gateway::{Capability, CapabilityGateway, GatewayError, Principal, Scope};
use tempgrant::protect::ProtectionTracker;
use tempgrant::store::GrantStore;
use tempgrant::sweep::Sweeper;

#[derive(Default)]
struct GatewayState {
    scopes: HashMap<i64, String>,
    principals: HashSet<(i64, i64)>,
    capabilities: HashMap<(i64, i64), String>,
    held: HashSet<(i64, i64, i64)>,
    unmanageable: HashSet<(i64, i64)>,
    fail_grants: bool,
    fail_revokes: bool,
    fail_notify: bool,
    grant_calls: Vec<(i64, i64, i64, String)>,
    revoke_calls: Vec<(i64, i64, i64, String)>,
    notify_calls: Vec<(i64, String)>,
    total_calls: usize,
}

/// Scriptable gateway double. Everything registered resolves; mutation
/// failures are injected per call kind.
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<GatewayState>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_scope(&self, scope_id: i64, name: &str) {
        self.state
            .lock()
            .unwrap()
            .scopes
            .insert(scope_id, name.to_string());
    }

    pub fn add_principal(&self, scope_id: i64, principal_id: i64) {
        self.state
            .lock()
            .unwrap()
            .principals
            .insert((scope_id, principal_id));
    }

    pub fn add_capability(&self, scope_id: i64, capability_id: i64, name: &str) {
        self.state
            .lock()
            .unwrap()
            .capabilities
            .insert((scope_id, capability_id), name.to_string());
    }

    pub fn set_held(&self, scope_id: i64, principal_id: i64, capability_id: i64) {
        self.state
            .lock()
            .unwrap()
            .held
            .insert((scope_id, principal_id, capability_id));
    }

    pub fn holds(&self, scope_id: i64, principal_id: i64, capability_id: i64) -> bool {
        self.state
            .lock()
            .unwrap()
            .held
            .contains(&(scope_id, principal_id, capability_id))
    }

    pub fn deny_manage(&self, scope_id: i64, capability_id: i64) {
        self.state
            .lock()
            .unwrap()
            .unmanageable
            .insert((scope_id, capability_id));
    }

    pub fn allow_manage(&self, scope_id: i64, capability_id: i64) {
        self.state
            .lock()
            .unwrap()
            .unmanageable
            .remove(&(scope_id, capability_id));
    }

    pub fn set_fail_grants(&self, fail: bool) {
        self.state.lock().unwrap().fail_grants = fail;
    }

    pub fn set_fail_revokes(&self, fail: bool) {
        self.state.lock().unwrap().fail_revokes = fail;
    }

    pub fn set_fail_notify(&self, fail: bool) {
        self.state.lock().unwrap().fail_notify = fail;
    }

    pub fn grant_calls(&self) -> Vec<(i64, i64, i64, String)> {
        self.state.lock().unwrap().grant_calls.clone()
    }

    pub fn revoke_calls(&self) -> Vec<(i64, i64, i64, String)> {
        self.state.lock().unwrap().revoke_calls.clone()
    }

    pub fn notify_calls(&self) -> Vec<(i64, String)> {
        self.state.lock().unwrap().notify_calls.clone()
    }

    /// Every trait-method invocation, lookups included.
    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().total_calls
    }
}

#[async_trait]
impl CapabilityGateway for MockGateway {
    async fn resolve_scope(&self, scope_id: i64) -> Result<Scope, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.total_calls += 1;
        state
            .scopes
            .get(&scope_id)
            .map(|name| Scope {
                id: scope_id,
                name: name.clone(),
            })
            .ok_or(GatewayError::ScopeNotFound(scope_id))
    }

    async fn resolve_principal(
        &self,
        scope_id: i64,
        principal_id: i64,
    ) -> Result<Principal, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.total_calls += 1;
        if state.principals.contains(&(scope_id, principal_id)) {
            Ok(Principal {
                id: principal_id,
                display_name: format!("principal-{principal_id}"),
            })
        } else {
            Err(GatewayError::PrincipalNotFound {
                scope: scope_id,
                principal: principal_id,
            })
        }
    }

    async fn resolve_capability(
        &self,
        scope_id: i64,
        capability_id: i64,
    ) -> Result<Capability, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.total_calls += 1;
        state
            .capabilities
            .get(&(scope_id, capability_id))
            .map(|name| Capability {
                id: capability_id,
                name: name.clone(),
            })
            .ok_or(GatewayError::CapabilityNotFound {
                scope: scope_id,
                capability: capability_id,
            })
    }

    async fn principal_has_capability(
        &self,
        scope_id: i64,
        principal_id: i64,
        capability_id: i64,
    ) -> Result<bool, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.total_calls += 1;
        Ok(state.held.contains(&(scope_id, principal_id, capability_id)))
    }

    async fn can_manage_capability(
        &self,
        scope_id: i64,
        capability_id: i64,
    ) -> Result<bool, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.total_calls += 1;
        Ok(!state.unmanageable.contains(&(scope_id, capability_id)))
    }

    async fn grant_capability(
        &self,
        scope_id: i64,
        principal_id: i64,
        capability_id: i64,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.total_calls += 1;
        state
            .grant_calls
            .push((scope_id, principal_id, capability_id, reason.to_string()));
        if state.fail_grants {
            return Err(GatewayError::Mutation("injected grant failure".into()));
        }
        state.held.insert((scope_id, principal_id, capability_id));
        Ok(())
    }

    async fn revoke_capability(
        &self,
        scope_id: i64,
        principal_id: i64,
        capability_id: i64,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.total_calls += 1;
        state
            .revoke_calls
            .push((scope_id, principal_id, capability_id, reason.to_string()));
        if state.fail_revokes {
            return Err(GatewayError::Mutation("injected revoke failure".into()));
        }
        state.held.remove(&(scope_id, principal_id, capability_id));
        Ok(())
    }

    async fn notify_principal(
        &self,
        principal_id: i64,
        message: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.total_calls += 1;
        state
            .notify_calls
            .push((principal_id, message.to_string()));
        if state.fail_notify {
            return Err(GatewayError::Unavailable("injected notify failure".into()));
        }
        Ok(())
    }
}

/// Everything a test needs, wired against one in-memory database.
pub struct TestRig {
    pub db: Database,
    pub gateway: Arc<MockGateway>,
    pub tracker: Arc<ProtectionTracker>,
    pub store: GrantStore,
    pub sweeper: Sweeper,
}

/// Sweep tuning shrunk to test timescales.
pub fn fast_config() -> SweepConfig {
    SweepConfig {
        sweep_interval_ms: 50,
        initial_delay_ms: 0,
        batch_size: 5,
        batch_pause_ms: 0,
        protection_window_ms: 300_000,
        reconcile_delay_ms: 100,
    }
}

pub async fn rig() -> anyhow::Result<TestRig> {
    rig_with(fast_config()).await
}

pub async fn rig_with(cfg: SweepConfig) -> anyhow::Result<TestRig> {
    // First caller wins; later try_init failures are expected.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();

    let db = Database::new(":memory:").await?;
    let gateway = MockGateway::new();
    let tracker = Arc::new(ProtectionTracker::new());
    let store = GrantStore::new(db.clone(), Arc::clone(&tracker));
    let sweeper = Sweeper::new(
        db.clone(),
        gateway.clone(),
        Arc::clone(&tracker),
        cfg,
    );

    Ok(TestRig {
        db,
        gateway,
        tracker,
        store,
        sweeper,
    })
}

/// Seed the mock platform with one scope, one principal, and a couple of
/// capabilities the suites share.
pub fn seed_platform(gateway: &MockGateway) {
    gateway.add_scope(1, "Test Guild");
    gateway.add_principal(1, 10);
    gateway.add_capability(1, 100, "Trial Member");
    gateway.add_capability(1, 200, "Member");
}

/// Rewind a simple grant's expiry so the next sweep sees it as due.
pub async fn backdate_simple(db: &Database, id: i64, expires_at: i64) -> anyhow::Result<()> {
    sqlx::query("UPDATE simple_grants SET expires_at = ? WHERE id = ?")
        .bind(expires_at)
        .bind(id)
        .execute(db.pool())
        .await?;
    Ok(())
}

/// Rewind a replacement grant's expiry so the next sweep sees it as due.
pub async fn backdate_replacement(db: &Database, id: i64, expires_at: i64) -> anyhow::Result<()> {
    sqlx::query("UPDATE replacement_grants SET expires_at = ? WHERE id = ?")
        .bind(expires_at)
        .bind(id)
        .execute(db.pool())
        .await?;
    Ok(())
}

pub async fn count_simple(db: &Database) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM simple_grants")
        .fetch_one(db.pool())
        .await?;
    Ok(count)
}

pub async fn count_replacement(db: &Database) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM replacement_grants")
        .fetch_one(db.pool())
        .await?;
    Ok(count)
}

/// Write a simple grant straight into the table, bypassing the guard - the
/// move an external event listener makes when it re-registers a capability
/// it just saw granted.
pub async fn insert_errant_simple(
    db: &Database,
    scope_id: i64,
    principal_id: i64,
    capability_id: i64,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO simple_grants
            (scope_id, principal_id, capability_id, granted_at, expires_at, granted_by, reason)
        VALUES (?, ?, ?, ?, ?, 0, 'event listener re-registration')
        "#,
    )
    .bind(scope_id)
    .bind(principal_id)
    .bind(capability_id)
    .bind(now)
    .bind(now + 3600)
    .execute(db.pool())
    .await?;
    Ok(())
}
