//! Reconciliation of the source and target tables for one partition.
//!
//! For every source file touched in the partition the comparison query
//! counts source rows against matching target rows:
//!
//! ```text
//! diff = count(source request ids in file) - count(matching target request ids)
//! ```
//!
//! Only files with `diff == 0` are fully migrated and safe to delete. Any
//! other value, positive or negative, keeps the file for investigation.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use common::config::CatalogConfig;
use common::storage::{ObjectUrl, StorageError};
use querier::{QueryRunner, ResultReader, ResultRecord, ResultSet};

use crate::error::CleanupError;
use crate::partition::PartitionKey;

/// Per-file reconciliation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub partition_date: String,
    /// Object URI of the source file.
    pub path: String,
    pub diff: i64,
}

impl FileRecord {
    /// Read a record from a result row, `None` if a column is missing or
    /// `diff` is not an integer.
    pub fn from_result(record: &ResultRecord) -> Option<Self> {
        Some(Self {
            partition_date: record.get("dt")?.to_string(),
            path: record.get("path")?.to_string(),
            diff: record.get("diff")?.trim().parse().ok()?,
        })
    }

    pub fn is_deletable(&self) -> bool {
        self.diff == 0
    }
}

/// The single bucket a run is allowed to delete from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket {
    scheme: String,
    name: String,
}

impl Bucket {
    pub fn new(scheme: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            name: name.into(),
        }
    }

    pub fn of(url: &ObjectUrl) -> Self {
        Self::new(url.scheme(), url.bucket())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root URL of the bucket, e.g. `s3://raw-bucket/`.
    pub fn url(&self) -> Result<ObjectUrl, StorageError> {
        ObjectUrl::parse(&format!("{}://{}/", self.scheme, self.name))
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.name)
    }
}

/// A fully migrated source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionCandidate {
    /// Object URI as reported by the query.
    pub path: String,
    /// Object key within the bucket, leading separator stripped.
    pub key: String,
}

/// Outcome of reconciling one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub partition: PartitionKey,
    pub records: Vec<FileRecord>,
    /// Result rows dropped as malformed.
    pub skipped_rows: usize,
    /// `None` only when the partition produced no records.
    pub bucket: Option<Bucket>,
    pub candidates: Vec<DeletionCandidate>,
}

/// Reject anything but ASCII letters, digits and underscores.
pub fn validate_identifier(name: &str) -> Result<(), CleanupError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CleanupError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Build the per-file comparison statement for `partition`.
pub fn comparison_query(
    catalog: &CatalogConfig,
    partition: &PartitionKey,
) -> Result<String, CleanupError> {
    validate_identifier(&catalog.database)?;
    validate_identifier(&catalog.source_table)?;
    validate_identifier(&catalog.target_table)?;

    let CatalogConfig {
        database,
        source_table,
        target_table,
    } = catalog;
    let (year, month, day) = (partition.year(), partition.month(), partition.day());

    Ok(format!(
        r#"-- Get Statistic of Gzip File on {partition}
WITH source_rows AS (
  SELECT "$path" AS path, concat("year", '-', "month", '-', "day") AS dt, request_id
  FROM {database}.{source_table}
  WHERE "year" = '{year}' AND "month" = '{month}' AND "day" = '{day}'
), target_rows AS (
  SELECT concat("year", '-', "month", '-', "day") AS dt, request_id
  FROM {database}.{target_table}
  WHERE "year" = '{year}' AND "month" = '{month}' AND "day" = '{day}'
), joined AS (
  SELECT s.path, s.dt, s.request_id AS g_id, t.request_id AS p_id
  FROM source_rows s LEFT JOIN target_rows t
  ON s.dt = t.dt AND s.request_id = t.request_id
)
SELECT dt, path, COUNT(g_id) - COUNT(p_id) AS diff
FROM joined
GROUP BY dt, path"#
    ))
}

/// Result rows split into usable records and rejected rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interpretation {
    pub records: Vec<FileRecord>,
    /// Rows missing a column or carrying a non-integer `diff`.
    pub rejected: usize,
    /// Paths carried by rejected rows. They still count toward the bucket check.
    pub rejected_paths: Vec<String>,
}

/// Convert result rows into file records.
pub fn interpret(result: &ResultSet) -> Interpretation {
    let mut interpretation = Interpretation::default();
    for row in &result.records {
        match FileRecord::from_result(row) {
            Some(record) => interpretation.records.push(record),
            None => {
                interpretation.rejected += 1;
                if let Some(path) = row.get("path").filter(|p| !p.trim().is_empty()) {
                    interpretation.rejected_paths.push(path.to_string());
                }
            }
        }
    }
    interpretation
}

fn parse_path(path: &str) -> Result<ObjectUrl, CleanupError> {
    ObjectUrl::parse(path).map_err(|source| CleanupError::InvalidPath {
        path: path.to_string(),
        source,
    })
}

/// The one bucket all `paths` live in. Every path counts, deletable or not.
pub fn resolve_bucket<'a>(
    paths: impl IntoIterator<Item = &'a str>,
) -> Result<Option<Bucket>, CleanupError> {
    let mut buckets = BTreeSet::new();
    for path in paths {
        buckets.insert(Bucket::of(&parse_path(path)?));
    }

    if buckets.len() > 1 {
        return Err(CleanupError::InvariantViolation {
            buckets: buckets.iter().map(Bucket::to_string).collect(),
        });
    }
    Ok(buckets.into_iter().next())
}

/// Deletable records as candidates, in result order, each path at most once.
pub fn select_candidates(records: &[FileRecord]) -> Result<Vec<DeletionCandidate>, CleanupError> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for record in records.iter().filter(|r| r.is_deletable()) {
        if !seen.insert(record.path.as_str()) {
            continue;
        }
        let url = parse_path(&record.path)?;
        candidates.push(DeletionCandidate {
            path: record.path.clone(),
            key: url.key().to_string(),
        });
    }
    Ok(candidates)
}

/// Runs the comparison query and turns its results into deletion candidates.
pub struct ReconciliationEngine {
    catalog: CatalogConfig,
    runner: QueryRunner,
    reader: ResultReader,
}

impl ReconciliationEngine {
    pub fn new(catalog: CatalogConfig, runner: QueryRunner, reader: ResultReader) -> Self {
        Self {
            catalog,
            runner,
            reader,
        }
    }

    pub async fn reconcile(&self, partition: PartitionKey) -> Result<Reconciliation, CleanupError> {
        let sql = comparison_query(&self.catalog, &partition)?;
        let location = self.runner.run(&sql).await?;
        let result = self.reader.read(&location).await?;

        let Interpretation {
            records,
            rejected,
            rejected_paths,
        } = interpret(&result);
        let skipped_rows = result.skipped_rows + rejected;
        let candidates = select_candidates(&records)?;
        let mut reconciliation = Reconciliation {
            partition,
            records,
            skipped_rows,
            bucket: None,
            candidates,
        };

        tracing::info!(
            partition = %partition,
            total_files = reconciliation.records.len(),
            ready_to_delete = reconciliation.candidates.len(),
            skipped_rows,
            "Reconciled partition"
        );
        if skipped_rows > 0 {
            tracing::warn!(
                partition = %partition,
                skipped_rows,
                results = %location,
                "Skipped malformed result rows"
            );
        }

        if reconciliation.records.is_empty() {
            return Ok(reconciliation);
        }

        let paths = reconciliation
            .records
            .iter()
            .map(|r| r.path.as_str())
            .chain(rejected_paths.iter().map(String::as_str));
        reconciliation.bucket = resolve_bucket(paths)?;
        Ok(reconciliation)
    }
}
