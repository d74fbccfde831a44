//! Expiration pass: revoke and drop due simple grants.

use super::{SweepStats, Sweeper};
use crate::db::{DbError, SimpleGrant};
use crate::gateway::GatewayError;
use tracing::{debug, info, warn};

/// Process all simple grants due at `now`.
pub(super) async fn run_pass(
    sweeper: &Sweeper,
    now: i64,
    stats: &mut SweepStats,
) -> Result<(), DbError> {
    let due = sweeper.db.grants().find_due_simple(now).await?;
    if due.is_empty() {
        return Ok(());
    }
    debug!(count = due.len(), "Expiration pass: due simple grants");

    for grant in due {
        stats.processed += 1;

        match settle(sweeper, &grant).await {
            Ok(()) => match sweeper.db.grants().delete_simple(grant.id).await {
                Ok(_) => stats.removed += 1,
                Err(e) => {
                    stats.errors += 1;
                    warn!(
                        grant_id = grant.id,
                        error = %e,
                        "Failed to delete settled simple grant; will retry next sweep"
                    );
                }
            },
            Err(e) => {
                stats.errors += 1;
                warn!(
                    scope = grant.scope_id,
                    principal = grant.principal_id,
                    capability = grant.capability_id,
                    code = e.error_code(),
                    error = %e,
                    "Expiration failed; grant retained for retry"
                );
            }
        }

        sweeper.pace(stats.processed).await;
    }

    Ok(())
}

/// Settle one expired grant: revoke the capability if it is still held.
///
/// `Ok` means the grant is fully resolved and the record can be deleted,
/// including the missing-target cases where there is nothing left to
/// revoke. `Err` means a transient failure: keep the record.
async fn settle(sweeper: &Sweeper, grant: &SimpleGrant) -> Result<(), GatewayError> {
    let gateway = &sweeper.gateway;

    let scope = match gateway.resolve_scope(grant.scope_id).await {
        Ok(scope) => scope,
        Err(e) if e.is_missing_target() => {
            debug!(scope = grant.scope_id, "Scope gone; dropping expired grant");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let principal = match gateway
        .resolve_principal(grant.scope_id, grant.principal_id)
        .await
    {
        Ok(principal) => principal,
        Err(e) if e.is_missing_target() => {
            debug!(
                scope = grant.scope_id,
                principal = grant.principal_id,
                "Principal gone; dropping expired grant"
            );
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let capability = match gateway
        .resolve_capability(grant.scope_id, grant.capability_id)
        .await
    {
        Ok(capability) => capability,
        Err(e) if e.is_missing_target() => {
            debug!(
                scope = grant.scope_id,
                capability = grant.capability_id,
                "Capability gone; dropping expired grant"
            );
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let held = gateway
        .principal_has_capability(grant.scope_id, grant.principal_id, grant.capability_id)
        .await?;
    if !held {
        debug!(
            scope = grant.scope_id,
            principal = grant.principal_id,
            capability = grant.capability_id,
            "Capability no longer held; nothing to revoke"
        );
        return Ok(());
    }

    gateway
        .revoke_capability(
            grant.scope_id,
            grant.principal_id,
            grant.capability_id,
            "expired simple grant",
        )
        .await?;

    info!(
        scope = %scope.name,
        principal = %principal.display_name,
        capability = %capability.name,
        "Expired grant revoked"
    );

    let message = format!(
        "Your temporary role {} in {} has expired.",
        capability.name, scope.name
    );
    if let Err(e) = gateway.notify_principal(grant.principal_id, &message).await {
        debug!(
            principal = grant.principal_id,
            error = %e,
            "Expiry notification failed (ignored)"
        );
    }

    Ok(())
}
