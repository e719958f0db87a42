//! Google Cloud Storage backend.
//!
//! Listing walks the JSON API page by page with page tokens and yields each
//! page's objects before asking for the next one, so buckets larger than
//! memory are fine. Object content is downloaded as a byte stream and
//! exposed as an `AsyncRead`.
//!
//! ## Example
//!
//! ```no_run
//! use gcs_zip::storage::{GcsConfig, GcsStore};
//!
//! # async fn example() -> gcs_zip::Result<()> {
//! // Ambient credentials (GOOGLE_APPLICATION_CREDENTIALS, metadata server, ...)
//! let store = GcsStore::connect(&GcsConfig::default()).await?;
//!
//! // Anonymous client against a local emulator
//! let emulator = GcsStore::connect(
//!     &GcsConfig::default().with_endpoint("http://localhost:4443"),
//! ).await?;
//! # Ok(())
//! # }
//! ```

use super::{ObjectDescriptor, ObjectReader, ObjectStore, ObjectStream};
use crate::error::{GcsZipError, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::list::ListObjectsRequest;
use std::io;
use tokio_util::io::StreamReader;
use tracing::debug;

/// How to reach Cloud Storage.
#[derive(Debug, Clone, Default)]
pub struct GcsConfig {
    /// Alternative API endpoint, e.g. a storage emulator. Requests to it are
    /// sent without credentials.
    pub endpoint: Option<String>,
}

impl GcsConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// [`ObjectStore`] backed by a Cloud Storage client.
///
/// The client is cheap to share; one store can serve any number of
/// concurrent pipelines.
#[derive(Clone)]
pub struct GcsStore {
    client: Client,
}

impl GcsStore {
    /// Build a client from ambient credentials, or an anonymous one when a
    /// custom endpoint is configured.
    pub async fn connect(config: &GcsConfig) -> Result<Self> {
        let client_config = match &config.endpoint {
            Some(endpoint) => ClientConfig {
                storage_endpoint: endpoint.trim_end_matches('/').to_string(),
                ..ClientConfig::default().anonymous()
            },
            None => ClientConfig::default()
                .with_auth()
                .await
                .map_err(|e| GcsZipError::Client(e.to_string()))?,
        };

        debug!(endpoint = %client_config.storage_endpoint, "storage client ready");
        Ok(Self::from_client(Client::new(client_config)))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn list<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> ObjectStream<'a> {
        Box::pin(try_stream! {
            let mut page_token: Option<String> = None;
            let mut page_number = 0u32;

            loop {
                let request = ListObjectsRequest {
                    bucket: bucket.to_string(),
                    prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
                    page_token: page_token.take(),
                    ..Default::default()
                };

                let page = self
                    .client
                    .list_objects(&request)
                    .await
                    .map_err(|e| GcsZipError::List(e.to_string()))?;
                page_number += 1;

                let items = page.items.unwrap_or_default();
                debug!(page = page_number, objects = items.len(), "listed page");

                for object in items {
                    yield ObjectDescriptor {
                        name: object.name,
                        size: object.size.max(0) as u64,
                    };
                }

                match page.next_page_token {
                    Some(token) if !token.is_empty() => page_token = Some(token),
                    _ => break,
                }
            }
        })
    }

    async fn open<'a>(&'a self, bucket: &str, name: &str) -> Result<ObjectReader<'a>> {
        let request = GetObjectRequest {
            bucket: bucket.to_string(),
            object: name.to_string(),
            ..Default::default()
        };

        let stream = self
            .client
            .download_streamed_object(&request, &Range::default())
            .await
            .map_err(|e| GcsZipError::Open(e.to_string()))?;

        let stream = Box::pin(stream.map_err(io::Error::other));
        Ok(Box::new(StreamReader::new(stream)))
    }
}
