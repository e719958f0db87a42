//! In-process object store.
//!
//! Objects live in a sorted map, so listings come back in lexical order.
//! Failures can be injected per object to exercise the abort paths of the
//! pipeline without a network.

use super::{ObjectDescriptor, ObjectReader, ObjectStore, ObjectStream};
use crate::error::{GcsZipError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::io::StreamReader;

/// Bytes a failing read delivers before the error.
const PARTIAL_READ_LEN: usize = 16;

#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: BTreeMap<String, BTreeMap<String, Bytes>>,
    open_failures: HashSet<String>,
    read_failures: HashSet<String>,
    list_failures: HashSet<String>,
    opened: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an object.
    pub fn with_object(
        mut self,
        bucket: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        self.buckets
            .entry(bucket.into())
            .or_default()
            .insert(name.into(), content.into());
        self
    }

    /// Make opening `name` fail, in any bucket.
    pub fn fail_open(mut self, name: impl Into<String>) -> Self {
        self.open_failures.insert(name.into());
        self
    }

    /// Make reading `name` fail after a few bytes, in any bucket.
    pub fn fail_read(mut self, name: impl Into<String>) -> Self {
        self.read_failures.insert(name.into());
        self
    }

    /// Make listing `bucket` fail.
    pub fn fail_list(mut self, bucket: impl Into<String>) -> Self {
        self.list_failures.insert(bucket.into());
        self
    }

    /// How many times [`ObjectStore::open`] has been called.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn list<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> ObjectStream<'a> {
        if self.list_failures.contains(bucket) {
            let err = GcsZipError::List(format!("listing bucket {bucket:?} failed"));
            return Box::pin(stream::iter([Err(err)]));
        }
        let Some(objects) = self.buckets.get(bucket) else {
            let err = GcsZipError::List(format!("bucket {bucket:?} doesn't exist"));
            return Box::pin(stream::iter([Err(err)]));
        };

        let matching = objects
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(name, _)| name.starts_with(prefix))
            .map(|(name, content)| {
                Ok(ObjectDescriptor {
                    name: name.clone(),
                    size: content.len() as u64,
                })
            });
        Box::pin(stream::iter(matching))
    }

    async fn open<'a>(&'a self, bucket: &str, name: &str) -> Result<ObjectReader<'a>> {
        self.opened.fetch_add(1, Ordering::SeqCst);

        if self.open_failures.contains(name) {
            return Err(GcsZipError::Open(format!(
                "permission denied opening {name:?}"
            )));
        }
        let content = self
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(name))
            .cloned()
            .ok_or_else(|| GcsZipError::Open("storage: object doesn't exist".to_string()))?;

        let chunks: Vec<io::Result<Bytes>> = if self.read_failures.contains(name) {
            let partial = content.slice(..content.len().min(PARTIAL_READ_LEN));
            vec![
                Ok(partial),
                Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    format!("connection reset while reading {name:?}"),
                )),
            ]
        } else {
            vec![Ok(content)]
        };

        Ok(Box::new(StreamReader::new(stream::iter(chunks))))
    }
}
