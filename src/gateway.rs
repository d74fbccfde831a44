//! Capability gateway trait - the boundary to the remote chat platform.
//!
//! The scheduler never talks to the platform directly; it resolves scopes,
//! principals and capabilities and mutates membership through this trait.
//! All calls are best-effort and rate-limited on the remote side, which is
//! why the sweep paces itself and treats mutation failures as retryable.

use async_trait::async_trait;
use thiserror::Error;

/// A bounded context (community/guild) in which principals hold capabilities.
#[derive(Debug, Clone)]
pub struct Scope {
    pub id: i64,
    pub name: String,
}

/// An actor holding or receiving capabilities within a scope.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: i64,
    pub display_name: String,
}

/// A grantable unit (a role) conferring permissions within a scope.
#[derive(Debug, Clone)]
pub struct Capability {
    pub id: i64,
    pub name: String,
}

/// Gateway errors.
///
/// The missing-target kinds mean a grant record no longer refers to anything
/// real and should be dropped; the transient kinds mean the record must be
/// retained and retried on the next sweep.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("scope not found: {0}")]
    ScopeNotFound(i64),

    #[error("principal {principal} not found in scope {scope}")]
    PrincipalNotFound { scope: i64, principal: i64 },

    #[error("capability {capability} not found in scope {scope}")]
    CapabilityNotFound { scope: i64, capability: i64 },

    #[error("insufficient authority to manage capability {0}")]
    InsufficientAuthority(i64),

    #[error("gateway mutation failed: {0}")]
    Mutation(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ScopeNotFound(_) => "scope_not_found",
            Self::PrincipalNotFound { .. } => "principal_not_found",
            Self::CapabilityNotFound { .. } => "capability_not_found",
            Self::InsufficientAuthority(_) => "insufficient_authority",
            Self::Mutation(_) => "mutation_failed",
            Self::Unavailable(_) => "unavailable",
        }
    }

    /// True when the grant's target no longer exists on the platform and
    /// the record should be deleted rather than retried.
    pub fn is_missing_target(&self) -> bool {
        matches!(
            self,
            Self::ScopeNotFound(_)
                | Self::PrincipalNotFound { .. }
                | Self::CapabilityNotFound { .. }
        )
    }
}

/// Lookup and mutation operations against the remote platform.
///
/// Implementations are expected to be cheap to share (`Arc<dyn ...>`) and
/// internally rate-limited; the sweep calls them sequentially.
#[async_trait]
pub trait CapabilityGateway: Send + Sync {
    /// Resolve a scope by id.
    async fn resolve_scope(&self, scope_id: i64) -> Result<Scope, GatewayError>;

    /// Resolve a principal within a scope.
    async fn resolve_principal(
        &self,
        scope_id: i64,
        principal_id: i64,
    ) -> Result<Principal, GatewayError>;

    /// Resolve a capability within a scope.
    async fn resolve_capability(
        &self,
        scope_id: i64,
        capability_id: i64,
    ) -> Result<Capability, GatewayError>;

    /// Does the principal currently hold the capability?
    async fn principal_has_capability(
        &self,
        scope_id: i64,
        principal_id: i64,
        capability_id: i64,
    ) -> Result<bool, GatewayError>;

    /// Does the scheduler's own authority rank high enough to mutate this
    /// capability?
    async fn can_manage_capability(
        &self,
        scope_id: i64,
        capability_id: i64,
    ) -> Result<bool, GatewayError>;

    /// Grant a capability to a principal.
    async fn grant_capability(
        &self,
        scope_id: i64,
        principal_id: i64,
        capability_id: i64,
        reason: &str,
    ) -> Result<(), GatewayError>;

    /// Revoke a capability from a principal.
    async fn revoke_capability(
        &self,
        scope_id: i64,
        principal_id: i64,
        capability_id: i64,
        reason: &str,
    ) -> Result<(), GatewayError>;

    /// Direct-message a principal. Best effort: callers swallow failures.
    async fn notify_principal(&self, principal_id: i64, message: &str)
    -> Result<(), GatewayError>;
}
