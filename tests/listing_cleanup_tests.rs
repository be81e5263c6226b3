//! Cleanup runs over configured listing tables: gzip CSV source files and
//! plain CSV target files on an in-memory object store.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cleaner::{CleanupJob, PartitionKey};
use common::config::{CatalogConfig, Configuration, TableFormat, TableSourceConfig};
use common::storage::FixedStoreProvider;
use flate2::Compression;
use flate2::write::GzEncoder;
use object_store::ObjectStore;
use object_store::memory::InMemory;
use object_store::path::Path;
use querier::DataFusionQueryService;

const RAW_A: &str = "raw/year=2024/month=01/day=05/a.csv.gz";
const RAW_B: &str = "raw/year=2024/month=01/day=05/b.csv.gz";
const RAW_OLD: &str = "raw/year=2024/month=01/day=04/c.csv.gz";

fn gzip(content: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

async fn put(store: &InMemory, key: &str, content: Vec<u8>) {
    store
        .put(&Path::from(key), Bytes::from(content).into())
        .await
        .unwrap();
}

fn partition_columns() -> Vec<String> {
    vec!["year".to_string(), "month".to_string(), "day".to_string()]
}

fn config() -> Configuration {
    let mut tables = HashMap::new();
    tables.insert(
        "raw_requests".to_string(),
        TableSourceConfig {
            location: "s3://lake/raw/".to_string(),
            format: TableFormat::Csv,
            partition_columns: partition_columns(),
            file_extension: Some(".csv.gz".to_string()),
        },
    );
    tables.insert(
        "requests".to_string(),
        TableSourceConfig {
            location: "s3://lake/converted/".to_string(),
            format: TableFormat::Csv,
            partition_columns: partition_columns(),
            file_extension: None,
        },
    );

    let mut config = Configuration {
        catalog: CatalogConfig {
            database: "logs".to_string(),
            source_table: "raw_requests".to_string(),
            target_table: "requests".to_string(),
        },
        ..Default::default()
    };
    config.query.output_location = "s3://results/athena/".to_string();
    config.query.work_group = "primary".to_string();
    config.query.poll_interval = Duration::from_millis(5);
    config.query.tables = tables;
    config
}

async fn run_cleanup(store: Arc<InMemory>) -> cleaner::CleanupReport {
    let config = config();
    let stores = Arc::new(FixedStoreProvider::new(store));
    let service = DataFusionQueryService::new(&config.catalog.database, stores.clone());
    service.register_tables(&config.query.tables).await.unwrap();

    let job = CleanupJob::from_config(&config, Arc::new(service), stores);
    job.run(PartitionKey::parse("2024-01-05").unwrap())
        .await
        .unwrap()
}

async fn exists(store: &InMemory, key: &str) -> bool {
    store.head(&Path::from(key)).await.is_ok()
}

#[tokio::test]
async fn test_configured_tables_delete_converted_gzip_files() {
    let store = Arc::new(InMemory::new());
    put(&store, RAW_A, gzip("request_id\nr1\nr2\n")).await;
    put(&store, RAW_B, gzip("request_id\nr3\nr4\n")).await;
    put(&store, RAW_OLD, gzip("request_id\nr5\n")).await;
    put(
        &store,
        "converted/year=2024/month=01/day=05/part-0.csv",
        b"request_id\nr1\nr2\nr3\n".to_vec(),
    )
    .await;

    let report = run_cleanup(store.clone()).await;
    assert_eq!(report.total_files, 2);
    assert_eq!(report.deletable_files, 1);
    assert_eq!(report.deleted, 1);

    assert!(!exists(&store, RAW_A).await);
    assert!(exists(&store, RAW_B).await);
    assert!(exists(&store, RAW_OLD).await);
}

#[tokio::test]
async fn test_configured_tables_nothing_converted_yet() {
    let store = Arc::new(InMemory::new());
    put(&store, RAW_A, gzip("request_id\nr1\nr2\n")).await;
    put(
        &store,
        "converted/year=2024/month=01/day=04/part-0.csv",
        b"request_id\nr9\n".to_vec(),
    )
    .await;

    let report = run_cleanup(store.clone()).await;
    assert_eq!(report.total_files, 1);
    assert_eq!(report.deletable_files, 0);
    assert_eq!(report.deleted, 0);
    assert!(exists(&store, RAW_A).await);
}
