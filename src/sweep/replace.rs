//! Replacement pass: swap due temporary capabilities for their final ones.
//!
//! The protect-then-grant ordering is the heart of the race protection: the
//! final capability's (scope, principal, capability) triple goes into the
//! protection tracker strictly before the gateway grant call, so an event
//! listener reacting to the grant cannot re-register it as a temporary
//! grant. A deferred reconciliation check catches anything that slipped
//! through anyway.

use super::{SweepStats, Sweeper};
use crate::db::{Database, DbError, ReplacementGrant};
use crate::gateway::GatewayError;
use crate::metrics;
use tracing::{debug, info, warn};

/// How a due replacement grant was resolved.
enum Settled {
    /// The final capability is in place; the record counts as replaced.
    Swapped,
    /// The swap can never complete (scope/principal/final capability gone);
    /// the record counts as removed.
    Abandoned,
}

/// Process all replacement grants due at `now`.
pub(super) async fn run_pass(
    sweeper: &Sweeper,
    now: i64,
    stats: &mut SweepStats,
) -> Result<(), DbError> {
    let due = sweeper.db.grants().find_due_replacement(now).await?;
    if due.is_empty() {
        return Ok(());
    }
    debug!(count = due.len(), "Replacement pass: due replacement grants");

    for grant in due {
        stats.processed += 1;

        match settle(sweeper, &grant).await {
            Ok(outcome) => match sweeper.db.grants().delete_replacement(grant.id).await {
                Ok(_) => match outcome {
                    Settled::Swapped => {
                        stats.replaced += 1;
                        spawn_reconciliation(sweeper, &grant);
                    }
                    Settled::Abandoned => stats.removed += 1,
                },
                Err(e) => {
                    stats.errors += 1;
                    warn!(
                        grant_id = grant.id,
                        error = %e,
                        "Failed to delete settled replacement grant; will retry next sweep"
                    );
                }
            },
            Err(e) => {
                stats.errors += 1;
                warn!(
                    scope = grant.scope_id,
                    principal = grant.principal_id,
                    temp_capability = grant.temp_capability_id,
                    final_capability = grant.final_capability_id,
                    code = e.error_code(),
                    error = %e,
                    "Replacement failed; grant retained for retry"
                );
            }
        }

        sweeper.pace(stats.processed).await;
    }

    Ok(())
}

/// Settle one due replacement grant.
///
/// `Err` means a transient failure: keep the record and retry next sweep.
/// If the temp capability was already revoked before the failure, it is
/// NOT re-granted; the principal stays capability-less until the retried
/// grant succeeds.
async fn settle(sweeper: &Sweeper, grant: &ReplacementGrant) -> Result<Settled, GatewayError> {
    let gateway = &sweeper.gateway;

    let scope = match gateway.resolve_scope(grant.scope_id).await {
        Ok(scope) => scope,
        Err(e) if e.is_missing_target() => {
            debug!(scope = grant.scope_id, "Scope gone; dropping replacement grant");
            return Ok(Settled::Abandoned);
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
                "Principal gone; dropping replacement grant"
            );
            return Ok(Settled::Abandoned);
        }
        Err(e) => return Err(e),
    };

    let final_capability = match gateway
        .resolve_capability(grant.scope_id, grant.final_capability_id)
        .await
    {
        Ok(capability) => capability,
        Err(e) if e.is_missing_target() => {
            warn!(
                scope = grant.scope_id,
                principal = grant.principal_id,
                final_capability = grant.final_capability_id,
                "Final capability gone; abandoning swap"
            );
            return Ok(Settled::Abandoned);
        }
        Err(e) => return Err(e),
    };

    if !gateway
        .can_manage_capability(grant.scope_id, grant.final_capability_id)
        .await?
    {
        return Err(GatewayError::InsufficientAuthority(
            grant.final_capability_id,
        ));
    }

    if grant.revoke_temp_on_swap {
        revoke_temp(sweeper, grant).await;
    }

    // Protect strictly before the grant call: the grant event may fire a
    // listener that would otherwise re-register the final capability as a
    // new temporary grant.
    sweeper.tracker.protect(
        grant.scope_id,
        grant.principal_id,
        grant.final_capability_id,
        "recent replacement swap",
        sweeper.cfg.protection_window(),
    );

    let already_held = gateway
        .principal_has_capability(grant.scope_id, grant.principal_id, grant.final_capability_id)
        .await?;
    if !already_held {
        gateway
            .grant_capability(
                grant.scope_id,
                grant.principal_id,
                grant.final_capability_id,
                "auto swap from expired temp grant",
            )
            .await?;
    }

    info!(
        scope = %scope.name,
        principal = %principal.display_name,
        final_capability = %final_capability.name,
        already_held,
        "Replacement swap completed"
    );

    let message = format!(
        "Your temporary role in {} has been replaced with {}.",
        scope.name, final_capability.name
    );
    if let Err(e) = gateway.notify_principal(grant.principal_id, &message).await {
        debug!(
            principal = grant.principal_id,
            error = %e,
            "Swap notification failed (ignored)"
        );
    }

    Ok(Settled::Swapped)
}

/// Revoke the temporary capability ahead of the swap.
///
/// Every failure here is logged and non-fatal: a stale temp role is a
/// cosmetic problem, a missed swap is not.
async fn revoke_temp(sweeper: &Sweeper, grant: &ReplacementGrant) {
    let gateway = &sweeper.gateway;

    let held = match gateway
        .principal_has_capability(grant.scope_id, grant.principal_id, grant.temp_capability_id)
        .await
    {
        Ok(held) => held,
        Err(e) => {
            warn!(
                temp_capability = grant.temp_capability_id,
                error = %e,
                "Could not check temp capability; skipping its revocation"
            );
            return;
        }
    };
    if !held {
        return;
    }

    match gateway
        .can_manage_capability(grant.scope_id, grant.temp_capability_id)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                temp_capability = grant.temp_capability_id,
                "Insufficient authority for temp capability; leaving it in place"
            );
            return;
        }
        Err(e) => {
            warn!(
                temp_capability = grant.temp_capability_id,
                error = %e,
                "Authority check for temp capability failed; skipping its revocation"
            );
            return;
        }
    }

    if let Err(e) = gateway
        .revoke_capability(
            grant.scope_id,
            grant.principal_id,
            grant.temp_capability_id,
            "expired temporary grant (replaced)",
        )
        .await
    {
        warn!(
            temp_capability = grant.temp_capability_id,
            error = %e,
            "Temp capability revocation failed; continuing swap"
        );
    }
}

/// Schedule the one-shot reconciliation check for a completed swap.
///
/// Fires once after the configured delay and deletes any record that
/// re-registered the swapped-in capability as temporary for the same
/// principal, despite the protection window.
fn spawn_reconciliation(sweeper: &Sweeper, grant: &ReplacementGrant) {
    let db = sweeper.db.clone();
    let delay = sweeper.cfg.reconcile_delay();
    let (scope, principal, capability) = (
        grant.scope_id,
        grant.principal_id,
        grant.final_capability_id,
    );

    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match reconcile(&db, scope, principal, capability).await {
            Ok(0) => {
                debug!(
                    scope,
                    principal, capability, "Reconciliation clean: no errant re-registration"
                );
            }
            Ok(removed) => {
                metrics::record_reconciled(removed as u64);
                warn!(
                    scope,
                    principal,
                    capability,
                    removed,
                    "Reconciliation removed errant re-registration of swapped capability"
                );
            }
            Err(e) => {
                warn!(
                    scope,
                    principal,
                    capability,
                    error = %e,
                    "Reconciliation check failed"
                );
            }
        }
    });
}

/// Delete any grant record that claims the swapped-in capability as
/// temporary: a simple grant on it, or a replacement grant using it as the
/// temp capability. Returns how many records were removed.
async fn reconcile(
    db: &Database,
    scope_id: i64,
    principal_id: i64,
    capability_id: i64,
) -> Result<usize, DbError> {
    let grants = db.grants();
    let mut removed = 0;

    if grants
        .delete_simple_by_key(scope_id, principal_id, capability_id)
        .await?
    {
        removed += 1;
    }
    if grants
        .delete_replacement_by_temp(scope_id, principal_id, capability_id)
        .await?
    {
        removed += 1;
    }

    Ok(removed)
}
