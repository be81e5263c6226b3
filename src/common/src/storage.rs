use object_store::{ObjectStore, memory::InMemory, path::Path};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid object URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Object URL '{0}' does not name a bucket")]
    MissingBucket(String),

    #[error("Invalid object path in '{url}': {source}")]
    InvalidPath {
        url: String,
        source: object_store::path::Error,
    },

    #[error("Failed to create object store for '{url}': {source}")]
    StoreCreation {
        url: String,
        source: object_store::Error,
    },

    #[error("Object store operation failed: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// An object addressed as `scheme://bucket/key`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectUrl {
    url: Url,
}

impl ObjectUrl {
    /// Parse an object URL. Every scheme except `file` must carry a bucket
    /// in the host position.
    pub fn parse(input: &str) -> Result<Self, StorageError> {
        let url = Url::parse(input).map_err(|e| StorageError::InvalidUrl {
            url: input.to_string(),
            reason: e.to_string(),
        })?;

        if url.scheme() != "file" && url.host_str().is_none_or(str::is_empty) {
            return Err(StorageError::MissingBucket(input.to_string()));
        }

        Ok(Self { url })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Bucket (URL host), empty for `file://` URLs.
    pub fn bucket(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// The object key: the URL path with its leading separator stripped,
    /// still in URL-encoded form.
    pub fn key(&self) -> &str {
        let path = self.url.path();
        path.strip_prefix('/').unwrap_or(path)
    }

    /// The decoded object store path for this key.
    pub fn object_path(&self) -> Result<Path, StorageError> {
        Path::from_url_path(self.url.path()).map_err(|source| StorageError::InvalidPath {
            url: self.url.to_string(),
            source,
        })
    }

    /// `scheme://bucket/`, the root the object's store is built from.
    pub fn bucket_url(&self) -> Url {
        let mut root = self.url.clone();
        root.set_path("/");
        root.set_query(None);
        root.set_fragment(None);
        root
    }

    /// Append `name` as a child of this location.
    pub fn child(&self, name: &str) -> Result<Self, StorageError> {
        let base = self.url.as_str().trim_end_matches('/');
        Self::parse(&format!("{base}/{name}"))
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Resolves the object store that serves a given object URL.
pub trait StoreProvider: Send + Sync + fmt::Debug {
    fn store_for(&self, url: &ObjectUrl) -> Result<Arc<dyn ObjectStore>, StorageError>;
}

/// Builds a store per bucket from the URL scheme (`s3`, `gs`, `az`, `file`,
/// `memory`). Every `memory://` resolution returns a fresh empty store; use
/// [`FixedStoreProvider`] to share one.
#[derive(Clone, Debug, Default)]
pub struct UrlStoreProvider {
    options: Vec<(String, String)>,
}

impl UrlStoreProvider {
    pub fn new(options: Vec<(String, String)>) -> Self {
        Self { options }
    }

    /// Pick up `AWS_*` settings (credentials, region, endpoint) from the environment.
    pub fn from_env() -> Self {
        let options = std::env::vars()
            .filter(|(key, _)| key.starts_with("AWS_"))
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();
        Self { options }
    }
}

impl StoreProvider for UrlStoreProvider {
    fn store_for(&self, url: &ObjectUrl) -> Result<Arc<dyn ObjectStore>, StorageError> {
        if url.scheme() == "memory" {
            return Ok(Arc::new(InMemory::new()));
        }

        let bucket_url = url.bucket_url();
        let (store, _) = object_store::parse_url_opts(&bucket_url, self.options.clone())
            .map_err(|source| StorageError::StoreCreation {
                url: bucket_url.to_string(),
                source,
            })?;
        Ok(Arc::from(store))
    }
}

/// Serves every URL from a single store, keyed by the URL path only.
#[derive(Clone, Debug)]
pub struct FixedStoreProvider {
    store: Arc<dyn ObjectStore>,
}

impl FixedStoreProvider {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

impl StoreProvider for FixedStoreProvider {
    fn store_for(&self, _url: &ObjectUrl) -> Result<Arc<dyn ObjectStore>, StorageError> {
        Ok(self.store.clone())
    }
}
