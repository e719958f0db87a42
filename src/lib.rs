//! # gcs-zip: stream a Cloud Storage prefix into one zip archive
//!
//! `gcs-zip` lists every object under a `gs://<bucket>/<prefix>` target and
//! copies each one, in listing order, into its own entry of a zip archive.
//! The archive is written front to back without seeking, so it can go to a
//! local file or straight into an HTTP response body, and only one object's
//! bytes are in flight at any time.
//!
//! ## Features
//!
//! - **Lazy listing**: objects are pulled page by page while the archive is written
//! - **Streaming copy**: object content is compressed on the fly, never buffered whole
//! - **Fail fast**: the first listing, open, read or write error ends the run
//! - **Two front ends**: the `gcs-zip` CLI and the `gcs-zip-server` HTTP service
//!
//! ## Quick Start
//!
//! ```no_run
//! use gcs_zip::storage::{GcsConfig, GcsStore};
//! use gcs_zip::{archive_prefix, Target};
//!
//! # async fn example() -> gcs_zip::Result<()> {
//! let store = GcsStore::connect(&GcsConfig::default()).await?;
//! let target = Target::parse("gs://my-bucket/exports/2024/");
//!
//! let file = tokio::fs::File::create("output.zip").await?;
//! let summary = archive_prefix(&store, &target, file).await?;
//! println!("archived {} objects", summary.entries);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod target;

pub use archive::{ArchiveSummary, ArchiveWriter};
pub use error::{GcsZipError, Result};
pub use pipeline::archive_prefix;
pub use storage::{ObjectDescriptor, ObjectStore};
pub use target::Target;
