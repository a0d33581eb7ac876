//! Durable store of estimator snapshots, one current snapshot per
//! (connection, quantile) with a single-prior chain for window blending.
//!
//! Writes run inside transactions on a single-connection pool, so operations
//! on the same connection name are serialized by the pool itself.

use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};
use tracing::warn;

use crate::db::models::PsqrRow;
use crate::error::Result;
use crate::psqr::Psqr;

/// A snapshot loaded from the store, together with its identity and the id of
/// the prior window's snapshot, if one is chained.
#[derive(Debug)]
pub struct SnapshotRecord {
    pub id: i64,
    pub previous_id: Option<i64>,
    pub psqr: Psqr,
}

#[derive(Clone)]
pub struct PsqrStore {
    pool: SqlitePool,
}

const PSQR_COLUMNS: &str = "id, previousPsqrId, perc, count, \
     q0, q1, q2, q3, q4, n0, n1, n2, n3, n4, \
     np0, np1, np2, np3, np4, dn0, dn1, dn2, dn3, dn4";

/// Per-quantile pointer column on the connection table, e.g. `currentPsqr95Id`.
fn current_column(quantile: f64) -> String {
    format!("currentPsqr{}Id", (quantile * 100.0).round() as i64)
}

impl PsqrStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Loads the current snapshot for `(connection, quantile)`. Returns None
    /// when the connection has no record yet, or when the record is unusable
    /// (pointer at a missing row, corrupt quantile) — callers start cold.
    pub async fn load_current(
        &self,
        connection: &str,
        quantile: f64,
    ) -> Result<Option<SnapshotRecord>> {
        let sql = format!(
            "SELECT {} FROM connection WHERE connectionOrigin = ?",
            current_column(quantile)
        );
        let current_id: Option<Option<i64>> = sqlx::query_scalar(&sql)
            .bind(connection)
            .fetch_optional(&self.pool)
            .await?;

        let Some(Some(id)) = current_id else {
            return Ok(None);
        };

        let record = self.load_by_id(id).await?;
        if record.is_none() {
            warn!(connection, id, "current snapshot unusable (missing or corrupt row), starting cold");
        }
        Ok(record)
    }

    /// Fetches any snapshot by id. None when the row is missing or corrupt.
    pub async fn load_by_id(&self, id: i64) -> Result<Option<SnapshotRecord>> {
        let sql = format!("SELECT {PSQR_COLUMNS} FROM psqr WHERE id = ?");
        let row: Option<PsqrRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| {
            let (id, previous_id) = (r.id, r.previous_psqr_id);
            r.into_psqr().map(|psqr| SnapshotRecord { id, previous_id, psqr })
        }))
    }

    /// Writes `psqr` as the current snapshot for `(connection, quantile)`,
    /// updating the existing row in place or creating row + pointer on first
    /// contact. Transactional.
    pub async fn upsert_current(
        &self,
        connection: &str,
        quantile: f64,
        psqr: &Psqr,
    ) -> Result<()> {
        let column = current_column(quantile);
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {column} FROM connection WHERE connectionOrigin = ?");
        let current_id: Option<Option<i64>> = sqlx::query_scalar(&sql)
            .bind(connection)
            .fetch_optional(&mut *tx)
            .await?;

        match current_id.flatten() {
            Some(id) => {
                update_psqr(&mut tx, id, psqr).await?;
            }
            None => {
                let id = insert_psqr(&mut tx, psqr, None).await?;
                let sql = format!(
                    "INSERT INTO connection (connectionOrigin, {column}) VALUES (?, ?) \
                     ON CONFLICT(connectionOrigin) DO UPDATE SET {column} = excluded.{column}"
                );
                sqlx::query(&sql).bind(connection).bind(id).execute(&mut *tx).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Closes the current window: duplicates the current snapshot with a zero
    /// count and the markers retained, repoints the connection at the copy,
    /// chains the copy to the closed snapshot, and drops the snapshot the
    /// closed one chained to, keeping at most one prior window. Atomic; an
    /// interrupted roll leaves the prior state intact. Returns the new
    /// snapshot id, or None when the connection has no current snapshot.
    pub async fn roll_window(&self, connection: &str, quantile: f64) -> Result<Option<i64>> {
        let column = current_column(quantile);
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {column} FROM connection WHERE connectionOrigin = ?");
        let current_id: Option<Option<i64>> = sqlx::query_scalar(&sql)
            .bind(connection)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(old_id) = current_id.flatten() else {
            return Ok(None);
        };

        let sql = format!("SELECT {PSQR_COLUMNS} FROM psqr WHERE id = ?");
        let row: Option<PsqrRow> = sqlx::query_as(&sql).bind(old_id).fetch_optional(&mut *tx).await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let old_previous = row.previous_psqr_id;
        let Some(mut copy) = row.into_psqr() else {
            return Ok(None);
        };
        copy.reset();

        let new_id = insert_psqr(&mut tx, &copy, Some(old_id)).await?;

        let sql = format!("UPDATE connection SET {column} = ? WHERE connectionOrigin = ?");
        sqlx::query(&sql).bind(new_id).bind(connection).execute(&mut *tx).await?;

        if let Some(prev) = old_previous {
            sqlx::query("DELETE FROM psqr WHERE id = ?")
                .bind(prev)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(Some(new_id))
    }
}

async fn insert_psqr(
    tx: &mut Transaction<'_, Sqlite>,
    psqr: &Psqr,
    previous_id: Option<i64>,
) -> Result<i64> {
    let (q, n, np, dn) = (psqr.q(), psqr.n(), psqr.np(), psqr.dn());
    let result = sqlx::query(
        "INSERT INTO psqr (previousPsqrId, perc, count, \
         q0, q1, q2, q3, q4, n0, n1, n2, n3, n4, \
         np0, np1, np2, np3, np4, dn0, dn1, dn2, dn3, dn4) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(previous_id)
    .bind(psqr.quantile())
    .bind(psqr.count())
    .bind(q[0]).bind(q[1]).bind(q[2]).bind(q[3]).bind(q[4])
    .bind(n[0]).bind(n[1]).bind(n[2]).bind(n[3]).bind(n[4])
    .bind(np[0]).bind(np[1]).bind(np[2]).bind(np[3]).bind(np[4])
    .bind(dn[0]).bind(dn[1]).bind(dn[2]).bind(dn[3]).bind(dn[4])
    .execute(&mut **tx)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn update_psqr(tx: &mut Transaction<'_, Sqlite>, id: i64, psqr: &Psqr) -> Result<()> {
    let (q, n, np, dn) = (psqr.q(), psqr.n(), psqr.np(), psqr.dn());
    sqlx::query(
        "UPDATE psqr SET perc = ?, count = ?, \
         q0 = ?, q1 = ?, q2 = ?, q3 = ?, q4 = ?, \
         n0 = ?, n1 = ?, n2 = ?, n3 = ?, n4 = ?, \
         np0 = ?, np1 = ?, np2 = ?, np3 = ?, np4 = ?, \
         dn0 = ?, dn1 = ?, dn2 = ?, dn3 = ?, dn4 = ? \
         WHERE id = ?",
    )
    .bind(psqr.quantile())
    .bind(psqr.count())
    .bind(q[0]).bind(q[1]).bind(q[2]).bind(q[3]).bind(q[4])
    .bind(n[0]).bind(n[1]).bind(n[2]).bind(n[3]).bind(n[4])
    .bind(np[0]).bind(np[1]).bind(np[2]).bind(np[3]).bind(np[4])
    .bind(dn[0]).bind(dn[1]).bind(dn[2]).bind(dn[3]).bind(dn[4])
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
    pool
}
