// Best-effort batched upserts under a mutation ceiling.
// Rows go through one connection; the transaction is committed every `ceiling` pending
// writes and once more at the end. A failing row is logged and skipped, never retried.

use serde::{Deserialize, Serialize};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::{Connection, SqliteConnection};
use tracing::error;

use crate::error::StoreError;

/// Pending writes per transaction before an intermediate commit.
pub const MAX_MUTATION_STATE_SIZE: usize = 50_000;

/// What a write call does when individual rows fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowFailurePolicy {
    /// Log and continue; the call succeeds with the failures counted in the report.
    #[default]
    Log,
    /// Log and continue, then fail the call so the aggregation pass is retried.
    FailPass,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteReport {
    pub rows_written: usize,
    pub rows_failed: usize,
    pub commits: usize,
}

/// A row that knows how to bind itself into its table's upsert statement.
pub(super) trait UpsertRow {
    fn bind<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>>;
}

pub(super) async fn upsert_batched<R: UpsertRow>(
    conn: &mut SqliteConnection,
    table: &'static str,
    sql: &str,
    rows: &[R],
    ceiling: usize,
) -> Result<WriteReport, StoreError> {
    let mut report = WriteReport::default();

    for chunk in rows.chunks(ceiling.max(1)) {
        let mut tx = conn.begin().await?;
        for row in chunk {
            match row.bind(sqlx::query(sql)).execute(&mut *tx).await {
                Ok(_) => report.rows_written += 1,
                Err(e) => {
                    error!(error = %e, table, "row upsert failed, skipping");
                    report.rows_failed += 1;
                }
            }
        }
        tx.commit().await?;
        report.commits += 1;
    }

    Ok(report)
}

impl RowFailurePolicy {
    pub(super) fn check(
        self,
        table: &'static str,
        report: WriteReport,
    ) -> Result<WriteReport, StoreError> {
        if self == Self::FailPass && report.rows_failed > 0 {
            return Err(StoreError::RowFailures {
                table,
                failed: report.rows_failed,
                total: report.rows_written + report.rows_failed,
            });
        }
        Ok(report)
    }
}
