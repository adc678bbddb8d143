// Query condition and its translation into a pushed-down WHERE clause.

use sqlx::{QueryBuilder, Sqlite};

/// Filter for metric queries. At least one criterion must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Condition {
    pub metric_names: Vec<String>,
    pub hostname: Option<String>,
    pub app_id: Option<String>,
    pub instance_id: Option<String>,
    /// Inclusive lower bound (epoch ms).
    pub start_time: Option<i64>,
    /// Exclusive upper bound (epoch ms).
    pub end_time: Option<i64>,
    pub limit: Option<usize>,
    /// Merge rows of the same series into one result instead of one result per row.
    pub grouped: bool,
}

impl Condition {
    pub fn is_empty(&self) -> bool {
        self.metric_names.is_empty()
            && self.hostname.is_none()
            && self.app_id.is_none()
            && self.instance_id.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
    }

    /// Cluster tables have no hostname column, so a hostname alone filters nothing.
    pub fn is_empty_for_cluster(&self) -> bool {
        Condition {
            hostname: None,
            ..self.clone()
        }
        .is_empty()
    }

    /// Appends `WHERE ...` for every set criterion. `hostname` is skipped for cluster tables.
    pub(super) fn push_where(
        &self,
        qb: &mut QueryBuilder<'_, Sqlite>,
        time_column: &'static str,
        has_hostname: bool,
    ) {
        qb.push(" WHERE 1 = 1");
        if !self.metric_names.is_empty() {
            qb.push(" AND metric_name IN (");
            let mut names = qb.separated(", ");
            for name in &self.metric_names {
                names.push_bind(name.clone());
            }
            names.push_unseparated(")");
        }
        if has_hostname && let Some(hostname) = &self.hostname {
            qb.push(" AND hostname = ").push_bind(hostname.clone());
        }
        if let Some(app_id) = &self.app_id {
            qb.push(" AND app_id = ").push_bind(app_id.clone());
        }
        if let Some(instance_id) = &self.instance_id {
            qb.push(" AND instance_id = ").push_bind(instance_id.clone());
        }
        if let Some(start) = self.start_time {
            qb.push(format!(" AND {} >= ", time_column))
                .push_bind(start);
        }
        if let Some(end) = self.end_time {
            qb.push(format!(" AND {} < ", time_column)).push_bind(end);
        }
    }

    /// SQL LIMIT value; sizes past i64::MAX clamp instead of wrapping to a negative "no limit".
    pub(super) fn row_limit(&self, fetch_size: usize) -> i64 {
        i64::try_from(self.limit.unwrap_or(fetch_size)).unwrap_or(i64::MAX)
    }
}
