//! Value Loaders
//!
//! The loader computes a value when neither the local tiers nor the owning
//! peer have it. It may run concurrently for different keys, but the group's
//! coalescer guarantees it never runs twice concurrently for the same key.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::Value;

/// Loader outcome other than success
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    /// The backing source has no value for this key
    #[error("not found")]
    NotFound,

    /// Any other failure (backing store outage, decode error, ...)
    #[error("{0}")]
    Failed(String),
}

impl LoaderError {
    pub fn failed(reason: impl Into<String>) -> Self {
        LoaderError::Failed(reason.into())
    }
}

/// Computes the value for a key from the backing source
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, key: &str) -> Result<Value, LoaderError>;
}

/// Adapts an async closure into a [`Loader`]
pub struct FnLoader<F> {
    f: F,
}

/// Build a loader from `Fn(String) -> impl Future<Output = Result<Value, LoaderError>>`
pub fn loader_fn<F, Fut>(f: F) -> FnLoader<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, LoaderError>> + Send + 'static,
{
    FnLoader { f }
}

#[async_trait]
impl<F, Fut> Loader for FnLoader<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, LoaderError>> + Send + 'static,
{
    async fn load(&self, key: &str) -> Result<Value, LoaderError> {
        (self.f)(key.to_string()).await
    }
}

/// Serves keys as relative paths under a root directory
#[derive(Debug, Clone)]
pub struct FileLoader {
    root: PathBuf,
    ttl: Option<Duration>,
}

impl FileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ttl: None,
        }
    }

    /// Give every loaded value a lifetime
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `key` under the root, rejecting anything that escapes it
    fn resolve(&self, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl Loader for FileLoader {
    async fn load(&self, key: &str) -> Result<Value, LoaderError> {
        let path = self.resolve(key).ok_or(LoaderError::NotFound)?;

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(match self.ttl {
                Some(ttl) => Value::with_ttl(data, ttl),
                None => Value::new(data),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(LoaderError::NotFound),
            Err(e) => Err(LoaderError::failed(format!("{}: {}", path.display(), e))),
        }
    }
}
