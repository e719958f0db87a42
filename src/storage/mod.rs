//! Object storage backends the pipeline reads from.
//!
//! The pipeline needs exactly two operations from a backend: a lazy listing
//! of the objects under a prefix, and a reader over one object's bytes. Both
//! are expressed by [`ObjectStore`].
//!
//! ## Available backends
//!
//! - [`GcsStore`] - Google Cloud Storage via the JSON API
//! - [`MemoryStore`] - in-process objects, with fault injection for tests

pub mod gcs;
pub mod memory;

pub use gcs::{GcsConfig, GcsStore};
pub use memory::MemoryStore;

use crate::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::io::AsyncRead;

/// An object discovered while listing a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    /// Full object key, used verbatim as the archive entry path
    pub name: String,
    /// Size in bytes as reported by the listing
    pub size: u64,
}

/// Listing in backend order. `None` marks the end of the listing; an `Err`
/// item is fatal and nothing further should be pulled.
pub type ObjectStream<'a> = BoxStream<'a, Result<ObjectDescriptor>>;

/// Byte stream over one object's content. Dropping it releases the download.
pub type ObjectReader<'a> = Box<dyn AsyncRead + Send + Unpin + 'a>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lazily list objects in `bucket` whose name starts with `prefix`.
    fn list<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> ObjectStream<'a>;

    /// Open `name` in `bucket` for reading.
    async fn open<'a>(&'a self, bucket: &str, name: &str) -> Result<ObjectReader<'a>>;
}
