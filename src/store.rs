//! Guarded grant store - the single creation surface for grant records.
//!
//! Every path that creates a grant (the command layer included) must go
//! through [`GrantStore`], which checks the protection tracker before
//! writing. Raw inserts are crate-private on the repository, so the guard
//! cannot be bypassed by construction.

use crate::db::{Database, DbError, ReplacementGrant, SimpleGrant};
use crate::metrics;
use crate::protect::ProtectionTracker;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors surfaced by guarded grant creation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The capability was granted by a recent swap and is still protected
    /// against re-registration as a temporary grant.
    #[error(
        "capability {capability} is protected for principal {principal} in scope {scope}: {reason}"
    )]
    ProtectedCapability {
        scope: i64,
        principal: i64,
        capability: i64,
        reason: String,
    },

    #[error("grant duration must be positive")]
    ExpiryNotAfterGrant,

    #[error("temporary and final capability must differ")]
    TempEqualsFinal,

    #[error("a grant already exists for this principal and capability")]
    Duplicate,

    #[error(transparent)]
    Db(DbError),
}

impl StoreError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ProtectedCapability { .. } => "protected_capability",
            Self::ExpiryNotAfterGrant => "expiry_not_after_grant",
            Self::TempEqualsFinal => "temp_equals_final",
            Self::Duplicate => "duplicate_grant",
            Self::Db(_) => "db_error",
        }
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::DuplicateGrant => StoreError::Duplicate,
            other => StoreError::Db(other),
        }
    }
}

/// Request to create a simple time-boxed grant.
#[derive(Debug, Clone)]
pub struct NewSimpleGrant {
    pub scope_id: i64,
    pub principal_id: i64,
    pub capability_id: i64,
    /// Seconds until the grant expires. Must be positive.
    pub duration_secs: i64,
    pub granted_by: i64,
    pub reason: Option<String>,
}

/// Request to create a grant-with-replacement.
#[derive(Debug, Clone)]
pub struct NewReplacementGrant {
    pub scope_id: i64,
    pub principal_id: i64,
    pub temp_capability_id: i64,
    pub final_capability_id: i64,
    /// Seconds until the swap fires. Must be positive.
    pub duration_secs: i64,
    pub granted_by: i64,
    pub reason: Option<String>,
    /// Revoke the temporary capability when swapping in the final one.
    pub revoke_temp_on_swap: bool,
}

/// A principal's active grants of both kinds.
#[derive(Debug, Clone, Default)]
pub struct PrincipalGrants {
    pub simple: Vec<SimpleGrant>,
    pub replacements: Vec<ReplacementGrant>,
}

/// Guarded creation surface over the grant tables.
#[derive(Clone)]
pub struct GrantStore {
    db: Database,
    tracker: Arc<ProtectionTracker>,
}

impl GrantStore {
    /// Create a store sharing the sweep's protection tracker.
    pub fn new(db: Database, tracker: Arc<ProtectionTracker>) -> Self {
        Self { db, tracker }
    }

    /// The shared protection tracker.
    pub fn tracker(&self) -> &Arc<ProtectionTracker> {
        &self.tracker
    }

    fn check_guard(
        &self,
        scope_id: i64,
        principal_id: i64,
        capability_id: i64,
    ) -> Result<(), StoreError> {
        if let Some(entry) = self.tracker.get(scope_id, principal_id, capability_id) {
            metrics::record_protected_conflict();
            debug!(
                scope = scope_id,
                principal = principal_id,
                capability = capability_id,
                reason = %entry.reason,
                "Grant creation blocked by protection window"
            );
            return Err(StoreError::ProtectedCapability {
                scope: scope_id,
                principal: principal_id,
                capability: capability_id,
                reason: entry.reason,
            });
        }
        Ok(())
    }

    /// Create a simple grant, rejecting protected capabilities.
    pub async fn create_simple(&self, req: NewSimpleGrant) -> Result<SimpleGrant, StoreError> {
        if req.duration_secs <= 0 {
            return Err(StoreError::ExpiryNotAfterGrant);
        }
        self.check_guard(req.scope_id, req.principal_id, req.capability_id)?;

        let now = chrono::Utc::now().timestamp();
        let grant = self
            .db
            .grants()
            .insert_simple(
                req.scope_id,
                req.principal_id,
                req.capability_id,
                now,
                now + req.duration_secs,
                req.granted_by,
                req.reason.as_deref(),
            )
            .await?;

        info!(
            scope = grant.scope_id,
            principal = grant.principal_id,
            capability = grant.capability_id,
            expires_at = grant.expires_at,
            "Simple grant created"
        );
        Ok(grant)
    }

    /// Create a replacement grant, rejecting protected temp capabilities.
    pub async fn create_replacement(
        &self,
        req: NewReplacementGrant,
    ) -> Result<ReplacementGrant, StoreError> {
        if req.duration_secs <= 0 {
            return Err(StoreError::ExpiryNotAfterGrant);
        }
        if req.temp_capability_id == req.final_capability_id {
            return Err(StoreError::TempEqualsFinal);
        }
        self.check_guard(req.scope_id, req.principal_id, req.temp_capability_id)?;

        let now = chrono::Utc::now().timestamp();
        let grant = self
            .db
            .grants()
            .insert_replacement(
                req.scope_id,
                req.principal_id,
                req.temp_capability_id,
                req.final_capability_id,
                now,
                now + req.duration_secs,
                req.granted_by,
                req.reason.as_deref(),
                req.revoke_temp_on_swap,
            )
            .await?;

        info!(
            scope = grant.scope_id,
            principal = grant.principal_id,
            temp_capability = grant.temp_capability_id,
            final_capability = grant.final_capability_id,
            expires_at = grant.expires_at,
            "Replacement grant created"
        );
        Ok(grant)
    }

    /// Cancel an active grant by its capability key.
    ///
    /// Matches a simple grant on its capability, or a replacement grant on
    /// its temporary capability. Returns whether anything was removed.
    pub async fn cancel(
        &self,
        scope_id: i64,
        principal_id: i64,
        capability_id: i64,
    ) -> Result<bool, StoreError> {
        let grants = self.db.grants();

        let removed_simple = grants
            .delete_simple_by_key(scope_id, principal_id, capability_id)
            .await?;
        let removed_replacement = grants
            .delete_replacement_by_temp(scope_id, principal_id, capability_id)
            .await?;

        let removed = removed_simple || removed_replacement;
        if removed {
            info!(
                scope = scope_id,
                principal = principal_id,
                capability = capability_id,
                "Grant cancelled"
            );
        }
        Ok(removed)
    }

    /// List a principal's active grants of both kinds.
    pub async fn grants_for_principal(
        &self,
        scope_id: i64,
        principal_id: i64,
    ) -> Result<PrincipalGrants, StoreError> {
        let grants = self.db.grants();
        Ok(PrincipalGrants {
            simple: grants.simple_for_principal(scope_id, principal_id).await?,
            replacements: grants
                .replacements_for_principal(scope_id, principal_id)
                .await?,
        })
    }
}
