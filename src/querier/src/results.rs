//! Delimited query result files.

use std::collections::HashMap;
use std::sync::Arc;

use common::storage::{ObjectUrl, StoreProvider};
use object_store::ObjectStore;

use crate::error::ResultsError;

/// One result row, keyed by header name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultRecord {
    fields: HashMap<String, String>,
}

impl ResultRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResultRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Parsed result file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    /// Well-formed rows in file order.
    pub records: Vec<ResultRecord>,
    /// Rows dropped because their field count did not match the header.
    pub skipped_rows: usize,
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Parse comma-delimited content whose first line is the header.
///
/// Values may be wrapped in double quotes, which are removed. Rows with a
/// different number of fields than the header are skipped and counted;
/// blank lines are ignored.
pub fn parse_delimited(content: &str) -> ResultSet {
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());

    let Some(header_line) = lines.next() else {
        return ResultSet::default();
    };
    let header: Vec<&str> = header_line.split(',').map(unquote).collect();

    let mut result = ResultSet::default();
    for (index, line) in lines.enumerate() {
        let values: Vec<&str> = line.split(',').map(unquote).collect();
        if values.len() != header.len() {
            tracing::debug!(
                line = index + 2,
                expected = header.len(),
                found = values.len(),
                "Skipping malformed result row"
            );
            result.skipped_rows += 1;
            continue;
        }

        result
            .records
            .push(header.iter().copied().zip(values).collect());
    }

    result
}

/// Fetches and parses result files from object storage.
#[derive(Debug, Clone)]
pub struct ResultReader {
    stores: Arc<dyn StoreProvider>,
}

impl ResultReader {
    pub fn new(stores: Arc<dyn StoreProvider>) -> Self {
        Self { stores }
    }

    pub async fn read(&self, location: &str) -> Result<ResultSet, ResultsError> {
        let url = ObjectUrl::parse(location)?;
        let store = self.stores.store_for(&url)?;

        let fetch_error = |source| ResultsError::Fetch {
            location: location.to_string(),
            source,
        };
        let bytes = store
            .get(&url.object_path()?)
            .await
            .map_err(fetch_error)?
            .bytes()
            .await
            .map_err(fetch_error)?;

        let content = String::from_utf8(bytes.to_vec()).map_err(|source| ResultsError::Encoding {
            location: location.to_string(),
            source,
        })?;

        let result = parse_delimited(&content);
        tracing::debug!(
            location = %location,
            records = result.records.len(),
            skipped = result.skipped_rows,
            "Read query results"
        );
        Ok(result)
    }
}
