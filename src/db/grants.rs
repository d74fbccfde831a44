//! Repository for timed capability grants.
//!
//! Two record kinds: simple grants (revoke on expiry) and replacement
//! grants (swap a temporary capability for a permanent one on expiry).
//!
//! Inserts are crate-private on purpose: external callers must go through
//! `GrantStore`, which consults the protection tracker before writing.

use super::DbError;
use sqlx::SqlitePool;

/// A simple time-boxed grant: revoked and forgotten when it expires.
#[derive(Debug, Clone)]
pub struct SimpleGrant {
    pub id: i64,
    pub scope_id: i64,
    pub principal_id: i64,
    pub capability_id: i64,
    pub granted_at: i64,
    pub expires_at: i64,
    pub granted_by: i64,
    pub reason: Option<String>,
}

/// A grant-with-replacement: the temporary capability is swapped for the
/// final one when it expires.
#[derive(Debug, Clone)]
pub struct ReplacementGrant {
    pub id: i64,
    pub scope_id: i64,
    pub principal_id: i64,
    pub temp_capability_id: i64,
    pub final_capability_id: i64,
    pub granted_at: i64,
    pub expires_at: i64,
    pub granted_by: i64,
    pub reason: Option<String>,
    pub revoke_temp_on_swap: bool,
}

type SimpleRow = (i64, i64, i64, i64, i64, i64, i64, Option<String>);
type ReplacementRow = (i64, i64, i64, i64, i64, i64, i64, i64, Option<String>, bool);

fn simple_from_row(row: SimpleRow) -> SimpleGrant {
    let (id, scope_id, principal_id, capability_id, granted_at, expires_at, granted_by, reason) =
        row;
    SimpleGrant {
        id,
        scope_id,
        principal_id,
        capability_id,
        granted_at,
        expires_at,
        granted_by,
        reason,
    }
}

fn replacement_from_row(row: ReplacementRow) -> ReplacementGrant {
    let (
        id,
        scope_id,
        principal_id,
        temp_capability_id,
        final_capability_id,
        granted_at,
        expires_at,
        granted_by,
        reason,
        revoke_temp_on_swap,
    ) = row;
    ReplacementGrant {
        id,
        scope_id,
        principal_id,
        temp_capability_id,
        final_capability_id,
        granted_at,
        expires_at,
        granted_by,
        reason,
        revoke_temp_on_swap,
    }
}

/// Map unique-key violations to a distinct error kind so callers can
/// surface "already granted" instead of a generic database error.
fn map_insert_err(err: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
    {
        return DbError::DuplicateGrant;
    }
    DbError::Sqlx(err)
}

/// Repository for grant operations.
pub struct GrantRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> GrantRepository<'a> {
    /// Create a new grant repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    // ========== Simple grant operations ==========

    /// Insert a simple grant. Unguarded: `GrantStore::create_simple` is the
    /// public entry point.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn insert_simple(
        &self,
        scope_id: i64,
        principal_id: i64,
        capability_id: i64,
        granted_at: i64,
        expires_at: i64,
        granted_by: i64,
        reason: Option<&str>,
    ) -> Result<SimpleGrant, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO simple_grants
                (scope_id, principal_id, capability_id, granted_at, expires_at, granted_by, reason)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(scope_id)
        .bind(principal_id)
        .bind(capability_id)
        .bind(granted_at)
        .bind(expires_at)
        .bind(granted_by)
        .bind(reason)
        .execute(self.pool)
        .await
        .map_err(map_insert_err)?;

        Ok(SimpleGrant {
            id: result.last_insert_rowid(),
            scope_id,
            principal_id,
            capability_id,
            granted_at,
            expires_at,
            granted_by,
            reason: reason.map(str::to_string),
        })
    }

    /// Get all simple grants due at `now`, soonest expiry first.
    pub async fn find_due_simple(&self, now: i64) -> Result<Vec<SimpleGrant>, DbError> {
        let rows = sqlx::query_as::<_, SimpleRow>(
            r#"
            SELECT id, scope_id, principal_id, capability_id,
                   granted_at, expires_at, granted_by, reason
            FROM simple_grants
            WHERE expires_at <= ?
            ORDER BY expires_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(simple_from_row).collect())
    }

    /// Delete a simple grant by record id.
    pub async fn delete_simple(&self, id: i64) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM simple_grants WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a simple grant by its (scope, principal, capability) key.
    pub async fn delete_simple_by_key(
        &self,
        scope_id: i64,
        principal_id: i64,
        capability_id: i64,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "DELETE FROM simple_grants WHERE scope_id = ? AND principal_id = ? AND capability_id = ?",
        )
        .bind(scope_id)
        .bind(principal_id)
        .bind(capability_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List a principal's active simple grants in a scope.
    pub async fn simple_for_principal(
        &self,
        scope_id: i64,
        principal_id: i64,
    ) -> Result<Vec<SimpleGrant>, DbError> {
        let rows = sqlx::query_as::<_, SimpleRow>(
            r#"
            SELECT id, scope_id, principal_id, capability_id,
                   granted_at, expires_at, granted_by, reason
            FROM simple_grants
            WHERE scope_id = ? AND principal_id = ?
            ORDER BY expires_at ASC
            "#,
        )
        .bind(scope_id)
        .bind(principal_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(simple_from_row).collect())
    }

    // ========== Replacement grant operations ==========

    /// Insert a replacement grant. Unguarded: `GrantStore::create_replacement`
    /// is the public entry point.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn insert_replacement(
        &self,
        scope_id: i64,
        principal_id: i64,
        temp_capability_id: i64,
        final_capability_id: i64,
        granted_at: i64,
        expires_at: i64,
        granted_by: i64,
        reason: Option<&str>,
        revoke_temp_on_swap: bool,
    ) -> Result<ReplacementGrant, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO replacement_grants
                (scope_id, principal_id, temp_capability_id, final_capability_id,
                 granted_at, expires_at, granted_by, reason, revoke_temp_on_swap)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(scope_id)
        .bind(principal_id)
        .bind(temp_capability_id)
        .bind(final_capability_id)
        .bind(granted_at)
        .bind(expires_at)
        .bind(granted_by)
        .bind(reason)
        .bind(revoke_temp_on_swap)
        .execute(self.pool)
        .await
        .map_err(map_insert_err)?;

        Ok(ReplacementGrant {
            id: result.last_insert_rowid(),
            scope_id,
            principal_id,
            temp_capability_id,
            final_capability_id,
            granted_at,
            expires_at,
            granted_by,
            reason: reason.map(str::to_string),
            revoke_temp_on_swap,
        })
    }

    /// Get all replacement grants due at `now`, soonest expiry first.
    pub async fn find_due_replacement(&self, now: i64) -> Result<Vec<ReplacementGrant>, DbError> {
        let rows = sqlx::query_as::<_, ReplacementRow>(
            r#"
            SELECT id, scope_id, principal_id, temp_capability_id, final_capability_id,
                   granted_at, expires_at, granted_by, reason, revoke_temp_on_swap
            FROM replacement_grants
            WHERE expires_at <= ?
            ORDER BY expires_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(replacement_from_row).collect())
    }

    /// Delete a replacement grant by record id.
    pub async fn delete_replacement(&self, id: i64) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM replacement_grants WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a replacement grant by its (scope, principal, temp capability) key.
    pub async fn delete_replacement_by_temp(
        &self,
        scope_id: i64,
        principal_id: i64,
        temp_capability_id: i64,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "DELETE FROM replacement_grants WHERE scope_id = ? AND principal_id = ? AND temp_capability_id = ?",
        )
        .bind(scope_id)
        .bind(principal_id)
        .bind(temp_capability_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List a principal's active replacement grants in a scope.
    pub async fn replacements_for_principal(
        &self,
        scope_id: i64,
        principal_id: i64,
    ) -> Result<Vec<ReplacementGrant>, DbError> {
        let rows = sqlx::query_as::<_, ReplacementRow>(
            r#"
            SELECT id, scope_id, principal_id, temp_capability_id, final_capability_id,
                   granted_at, expires_at, granted_by, reason, revoke_temp_on_swap
            FROM replacement_grants
            WHERE scope_id = ? AND principal_id = ?
            ORDER BY expires_at ASC
            "#,
        )
        .bind(scope_id)
        .bind(principal_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(replacement_from_row).collect())
    }
}
