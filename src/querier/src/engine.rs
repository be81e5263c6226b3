//! Embedded DataFusion query service.
//!
//! Executes statements on a [`SessionContext`] in background tasks and
//! writes each result as a header-first CSV object under the requested
//! output location, mirroring how a managed interactive query service
//! reports results. Tables are registered either from configuration as
//! listing tables or directly as table providers.
//!
//! The catalog database becomes the session's default schema, so
//! `database.table` references resolve against registered tables.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::config::{TableFormat, TableSourceConfig};
use common::storage::{ObjectUrl, StorageError, StoreProvider};
use datafusion::arrow::csv::WriterBuilder;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::datasource::TableProvider;
use datafusion::datasource::file_format::FileFormat;
use datafusion::datasource::file_format::csv::CsvFormat;
use datafusion::datasource::file_format::file_compression_type::FileCompressionType;
use datafusion::datasource::file_format::json::JsonFormat;
use datafusion::datasource::file_format::parquet::ParquetFormat;
use datafusion::datasource::listing::{
    ListingOptions, ListingTable, ListingTableConfig, ListingTableUrl,
};
use datafusion::error::DataFusionError;
use datafusion::prelude::{DataFrame, SessionConfig, SessionContext, lit};
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::QueryError;
use crate::execution::{QueryRequest, QueryService, QueryState};

const DEFAULT_CATALOG: &str = "datafusion";

/// Column holding the URI of the file a listing table row came from.
pub const FILE_PATH_COLUMN: &str = "$path";

#[derive(Clone)]
pub struct DataFusionQueryService {
    ctx: SessionContext,
    stores: Arc<dyn StoreProvider>,
    executions: Arc<RwLock<HashMap<String, QueryState>>>,
}

impl DataFusionQueryService {
    /// Create a service whose default schema is `database`.
    pub fn new(database: &str, stores: Arc<dyn StoreProvider>) -> Self {
        let config = SessionConfig::new()
            .with_create_default_catalog_and_schema(true)
            .with_default_catalog_and_schema(DEFAULT_CATALOG, database);

        Self {
            ctx: SessionContext::new_with_config(config),
            stores,
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn session_context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Register a table provider under `name` in the default schema.
    pub fn register_table(
        &self,
        name: &str,
        table: Arc<dyn TableProvider>,
    ) -> Result<(), QueryError> {
        self.ctx.register_table(name, table)?;
        Ok(())
    }

    /// Register every configured listing table.
    pub async fn register_tables(
        &self,
        tables: &HashMap<String, TableSourceConfig>,
    ) -> Result<(), QueryError> {
        for (name, source) in tables {
            self.register_listing_table(name, source).await?;
        }
        Ok(())
    }

    /// Register a table over the files under `source.location`.
    ///
    /// Every row carries the URI of the file it was read from in
    /// [`FILE_PATH_COLUMN`]. Hive-style `column=value` path segments fill the
    /// configured partition columns as strings, empty when a file's path has
    /// no segment for a column. Files are listed once, at registration.
    pub async fn register_listing_table(
        &self,
        name: &str,
        source: &TableSourceConfig,
    ) -> Result<(), QueryError> {
        let location = ObjectUrl::parse(&source.location)?;
        let store = self.stores.store_for(&location)?;
        self.ctx
            .register_object_store(&location.bucket_url(), store.clone());

        let extension = source
            .file_extension
            .clone()
            .unwrap_or_else(|| default_extension(source.format).to_string());
        let options = ListingOptions::new(file_format(source.format, &extension))
            .with_file_extension(extension.clone());

        let prefix = location.object_path()?;
        let mut files: Vec<ObjectMeta> = store
            .list(Some(&prefix))
            .try_collect()
            .await
            .map_err(StorageError::from)?;
        files.retain(|meta| meta.location.as_ref().ends_with(&extension));
        files.sort_by(|a, b| a.location.cmp(&b.location));
        if files.is_empty() {
            return Err(QueryError::NoFiles {
                table: name.to_string(),
                location: location.to_string(),
            });
        }

        let root = location.as_str().trim_end_matches('/');
        let table_url = ListingTableUrl::parse(format!("{root}/"))?;
        let state = self.ctx.state();
        let file_schema = options.infer_schema(&state, &table_url).await?;

        let bucket_url = location.bucket_url();
        let mut combined: Option<DataFrame> = None;
        for meta in &files {
            let file_url = format!("{bucket_url}{}", meta.location);
            let config = ListingTableConfig::new(ListingTableUrl::parse(&file_url)?)
                .with_listing_options(options.clone())
                .with_schema(file_schema.clone());
            let mut frame = self
                .ctx
                .read_table(Arc::new(ListingTable::try_new(config)?))?
                .with_column(FILE_PATH_COLUMN, lit(file_url))?;
            for column in &source.partition_columns {
                let value = partition_value(&meta.location, column).unwrap_or_default();
                frame = frame.with_column(column, lit(value))?;
            }

            combined = Some(match combined {
                Some(acc) => acc.union(frame)?,
                None => frame,
            });
        }

        if let Some(frame) = combined {
            self.ctx.register_table(name, frame.into_view())?;
        }

        tracing::info!(
            table = %name,
            location = %location,
            format = ?source.format,
            files = files.len(),
            "Registered listing table"
        );
        Ok(())
    }

    async fn set_state(&self, execution_id: &str, state: QueryState) {
        self.executions
            .write()
            .await
            .insert(execution_id.to_string(), state);
    }

    async fn execute(&self, sql: &str, output: &ObjectUrl) -> Result<(), QueryError> {
        let batches = self.ctx.sql(sql).await?.collect().await?;
        let csv = encode_csv(&batches)?;

        let store = self.stores.store_for(output)?;
        store
            .put(&output.object_path()?, csv.into())
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}

fn file_format(format: TableFormat, extension: &str) -> Arc<dyn FileFormat> {
    let compression = if extension.ends_with(".gz") {
        FileCompressionType::GZIP
    } else {
        FileCompressionType::UNCOMPRESSED
    };

    match format {
        TableFormat::Parquet => Arc::new(ParquetFormat::default()),
        TableFormat::Csv => Arc::new(
            CsvFormat::default()
                .with_has_header(true)
                .with_file_compression_type(compression),
        ),
        TableFormat::Json => Arc::new(JsonFormat::default().with_file_compression_type(compression)),
    }
}

/// Value of the `column=value` segment in `path`, if any.
fn partition_value(path: &ObjectPath, column: &str) -> Option<String> {
    path.parts().find_map(|part| {
        part.as_ref()
            .split_once('=')
            .filter(|(key, _)| *key == column)
            .map(|(_, value)| value.to_string())
    })
}

fn default_extension(format: TableFormat) -> &'static str {
    match format {
        TableFormat::Parquet => ".parquet",
        TableFormat::Csv => ".csv",
        TableFormat::Json => ".json",
    }
}

/// Header-first CSV of all batches. An empty result yields an empty file.
fn encode_csv(batches: &[RecordBatch]) -> Result<Vec<u8>, DataFusionError> {
    let mut writer = WriterBuilder::new().with_header(true).build(Vec::new());
    for batch in batches {
        writer.write(batch)?;
    }
    Ok(writer.into_inner())
}

#[async_trait]
impl QueryService for DataFusionQueryService {
    async fn start_query(&self, request: QueryRequest) -> Result<String, QueryError> {
        let execution_id = Uuid::new_v4().to_string();
        let output =
            ObjectUrl::parse(&request.output_location)?.child(&format!("{execution_id}.csv"))?;

        self.set_state(&execution_id, QueryState::Queued).await;

        let service = self.clone();
        let id = execution_id.clone();
        tokio::spawn(async move {
            service.set_state(&id, QueryState::Running).await;

            let state = match service.execute(&request.sql, &output).await {
                Ok(()) => QueryState::Succeeded {
                    output_location: output.to_string(),
                },
                Err(e) => QueryState::Failed {
                    reason: e.to_string(),
                },
            };
            tracing::debug!(execution_id = %id, state = %state, "Query execution finished");
            service.set_state(&id, state).await;
        });

        Ok(execution_id)
    }

    async fn query_state(&self, execution_id: &str) -> Result<QueryState, QueryError> {
        self.executions
            .read()
            .await
            .get(execution_id)
            .cloned()
            .ok_or_else(|| QueryError::UnknownExecution(execution_id.to_string()))
    }
}
