//! The archive run: list a prefix, then copy each object into its own entry.
//!
//! Objects are handled one at a time in listing order. Each object is opened
//! only when its turn comes and its reader is dropped before the next one is
//! opened. The first error ends the run; whatever was already written stays
//! in the sink and the archive is never finalized.

use crate::archive::{ArchiveSummary, ArchiveWriter};
use crate::error::Result;
use crate::storage::ObjectStore;
use crate::target::Target;
use futures_util::StreamExt;
use tokio::io::AsyncWrite;
use tracing::{info, info_span, Instrument};

/// Archive every object under `target` into `sink`.
///
/// On success the archive is finalized and the sink shut down.
pub async fn archive_prefix<S, W>(store: &S, target: &Target, sink: W) -> Result<ArchiveSummary>
where
    S: ObjectStore + ?Sized,
    W: AsyncWrite + Unpin,
{
    let span = info_span!("archive", bucket = %target.bucket(), prefix = %target.prefix());
    run(store, target, sink).instrument(span).await
}

async fn run<S, W>(store: &S, target: &Target, sink: W) -> Result<ArchiveSummary>
where
    S: ObjectStore + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut archive = ArchiveWriter::new(sink);
    let mut objects = store.list(target.bucket(), target.prefix());

    while let Some(object) = objects.next().await {
        let object = object?;
        info!(name = %object.name, size = object.size, "handling file");

        let mut reader = store.open(target.bucket(), &object.name).await?;
        let copied = archive
            .copy_entry(&object.name, object.size, &mut reader)
            .await?;

        info!(
            name = %object.name,
            bytes = copied,
            archive_bytes = archive.bytes_written(),
            "done handling file"
        );
    }

    let summary = archive.finish().await?;
    info!(
        entries = summary.entries,
        uncompressed_bytes = summary.uncompressed_bytes,
        archive_bytes = summary.archive_bytes,
        "archive finalized"
    );
    Ok(summary)
}
