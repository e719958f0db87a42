//! Streaming zip writer for non-seekable sinks.
//!
//! Entries are DEFLATE-compressed on the fly and their sizes and CRC-32 are
//! written in a trailing data descriptor, so the sink only ever sees forward
//! writes. That makes it usable for local files and HTTP response bodies
//! alike. Compressed output is staged in a small buffer and pushed to the
//! sink once it grows past [`FLUSH_THRESHOLD`], keeping memory flat no matter
//! how large an object is.
//!
//! Entries that may exceed 4 GiB are started with
//! [`ArchiveWriter::start_large_entry`]: their local header carries a ZIP64
//! extra field and their data descriptor uses 64-bit sizes, which is what
//! readers that walk local headers without the central directory expect.
//!
//! ```no_run
//! use gcs_zip::ArchiveWriter;
//!
//! # async fn example() -> gcs_zip::Result<()> {
//! let file = tokio::fs::File::create("out.zip").await?;
//! let mut archive = ArchiveWriter::new(file);
//!
//! archive.start_entry("hello.txt").await?;
//! archive.write_data(b"Hello!").await?;
//!
//! let mut source: &[u8] = b"copied from a reader";
//! archive.copy_entry("docs/readme.txt", 20, &mut source).await?;
//!
//! let summary = archive.finish().await?;
//! assert_eq!(summary.entries, 2);
//! # Ok(())
//! # }
//! ```

use crate::error::{GcsZipError, Result};
use async_compression::tokio::write::DeflateEncoder;
use bytes::{BufMut, BytesMut};
use crc32fast::Hasher as Crc32;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Staged compressed bytes are pushed to the sink past this size.
pub const FLUSH_THRESHOLD: usize = 64 * 1024;

/// Read buffer used by [`ArchiveWriter::copy_entry`].
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Expected sizes from here on get a ZIP64 local header in
/// [`ArchiveWriter::copy_entry`]. Leaves room for deflate's worst-case growth
/// below the 4 GiB limit.
pub const LARGE_ENTRY_THRESHOLD: u64 = 0xF000_0000;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const ZIP64_EOCD_SIG: u32 = 0x0606_4b50;
const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;
const ZIP64_EXTRA_ID: u16 = 0x0001;

const VERSION_DEFAULT: u16 = 20;
const VERSION_ZIP64: u16 = 45;
/// Bit 3: sizes in data descriptor. Bit 11: UTF-8 names.
const FLAGS: u16 = 0x0808;
const METHOD_DEFLATE: u16 = 8;
/// 1980-01-01 00:00, the earliest DOS timestamp. Fixed so archives are reproducible.
const DOS_TIME: u16 = 0;
const DOS_DATE: u16 = (1 << 5) | 1;

/// Totals reported once an archive has been finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Number of entries in the central directory
    pub entries: usize,
    /// Sum of all entry sizes before compression
    pub uncompressed_bytes: u64,
    /// Total bytes written to the sink, central directory included
    pub archive_bytes: u64,
}

/// Central directory record kept for every closed entry.
struct EntryRecord {
    name: String,
    local_header_offset: u64,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
}

impl EntryRecord {
    fn needs_zip64(&self) -> bool {
        self.compressed_size > u32::MAX as u64
            || self.uncompressed_size > u32::MAX as u64
            || self.local_header_offset > u32::MAX as u64
    }
}

struct OpenEntry {
    name: String,
    local_header_offset: u64,
    encoder: DeflateEncoder<CompressedBuffer>,
    crc: Crc32,
    uncompressed_size: u64,
    compressed_size: u64,
    zip64: bool,
}

/// In-memory target of the deflate encoder.
struct CompressedBuffer {
    buffer: Vec<u8>,
}

impl CompressedBuffer {
    fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn should_flush(&self) -> bool {
        self.buffer.len() >= FLUSH_THRESHOLD
    }
}

impl AsyncWrite for CompressedBuffer {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Sink wrapper that tracks how many bytes have been written, which stands in
/// for `stream_position()` on sinks that cannot seek.
struct CountingSink<W> {
    inner: W,
    written: u64,
}

impl<W: AsyncWrite + Unpin> CountingSink<W> {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }
}

/// Zip writer over any `AsyncWrite` sink.
///
/// Entries are written strictly in the order they are started; an entry is
/// closed when the next one starts or when [`finish`](Self::finish) runs.
pub struct ArchiveWriter<W: AsyncWrite + Unpin> {
    sink: CountingSink<W>,
    entries: Vec<EntryRecord>,
    current: Option<OpenEntry>,
    uncompressed_bytes: u64,
}

impl<W: AsyncWrite + Unpin> ArchiveWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: CountingSink {
                inner: sink,
                written: 0,
            },
            entries: Vec::new(),
            current: None,
            uncompressed_bytes: 0,
        }
    }

    /// Bytes written to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.sink.written
    }

    /// Close the open entry, if any, and start a new one named `name`.
    pub async fn start_entry(&mut self, name: &str) -> Result<()> {
        self.begin_entry(name, false).await
    }

    /// Like [`start_entry`](Self::start_entry), for content that may reach
    /// 4 GiB or more.
    pub async fn start_large_entry(&mut self, name: &str) -> Result<()> {
        self.begin_entry(name, true).await
    }

    async fn begin_entry(&mut self, name: &str, zip64: bool) -> Result<()> {
        if name.len() > u16::MAX as usize {
            return Err(GcsZipError::InvalidState(format!(
                "entry name is {} bytes, zip allows at most {}",
                name.len(),
                u16::MAX
            )));
        }
        self.finish_current_entry().await?;

        let local_header_offset = self.sink.written;

        // Sizes live in the data descriptor; a ZIP64 entry points at its
        // (zeroed) extra field instead.
        let (version, size_field, extra_len) = if zip64 {
            (VERSION_ZIP64, u32::MAX, 20u16)
        } else {
            (VERSION_DEFAULT, 0, 0)
        };

        let mut header = BytesMut::with_capacity(30 + name.len() + extra_len as usize);
        header.put_u32_le(LOCAL_HEADER_SIG);
        header.put_u16_le(version);
        header.put_u16_le(FLAGS);
        header.put_u16_le(METHOD_DEFLATE);
        header.put_u16_le(DOS_TIME);
        header.put_u16_le(DOS_DATE);
        header.put_u32_le(0); // crc32, in data descriptor
        header.put_u32_le(size_field); // compressed size
        header.put_u32_le(size_field); // uncompressed size
        header.put_u16_le(name.len() as u16);
        header.put_u16_le(extra_len);
        header.put_slice(name.as_bytes());
        if zip64 {
            header.put_u16_le(ZIP64_EXTRA_ID);
            header.put_u16_le(16);
            header.put_u64_le(0); // uncompressed size
            header.put_u64_le(0); // compressed size
        }
        self.sink.write(&header).await?;

        self.current = Some(OpenEntry {
            name: name.to_string(),
            local_header_offset,
            encoder: DeflateEncoder::new(CompressedBuffer::new()),
            crc: Crc32::new(),
            uncompressed_size: 0,
            compressed_size: 0,
            zip64,
        });

        Ok(())
    }

    /// Append uncompressed bytes to the open entry.
    pub async fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let entry = self
            .current
            .as_mut()
            .ok_or_else(|| GcsZipError::InvalidState("no entry started".to_string()))?;

        entry.crc.update(data);
        entry.uncompressed_size += data.len() as u64;
        entry.encoder.write_all(data).await?;

        let staged = entry.encoder.get_mut();
        if staged.should_flush() {
            let compressed = staged.take();
            self.sink.write(&compressed).await?;
            entry.compressed_size += compressed.len() as u64;
        }

        Ok(())
    }

    /// Write a whole entry from `reader`, returning the number of bytes copied.
    ///
    /// `expected_size` only picks the header layout: at or above
    /// [`LARGE_ENTRY_THRESHOLD`] the entry is started as a large one.
    ///
    /// The entry stays open until the next entry starts or the archive is
    /// finished, so a read error leaves the archive truncated mid-entry.
    pub async fn copy_entry<R>(
        &mut self,
        name: &str,
        expected_size: u64,
        reader: &mut R,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.begin_entry(name, expected_size >= LARGE_ENTRY_THRESHOLD)
            .await?;

        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut copied = 0u64;
        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            self.write_data(&buffer[..n]).await?;
            copied += n as u64;
        }

        Ok(copied)
    }

    async fn finish_current_entry(&mut self) -> Result<()> {
        let Some(mut entry) = self.current.take() else {
            return Ok(());
        };

        entry.encoder.shutdown().await?;
        let remaining = entry.encoder.into_inner().take();
        if !remaining.is_empty() {
            self.sink.write(&remaining).await?;
            entry.compressed_size += remaining.len() as u64;
        }

        let crc32 = entry.crc.finalize();
        let record = EntryRecord {
            name: entry.name,
            local_header_offset: entry.local_header_offset,
            crc32,
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.uncompressed_size,
        };

        let mut descriptor = BytesMut::with_capacity(24);
        descriptor.put_u32_le(DATA_DESCRIPTOR_SIG);
        descriptor.put_u32_le(crc32);
        if entry.zip64
            || record.compressed_size > u32::MAX as u64
            || record.uncompressed_size > u32::MAX as u64
        {
            descriptor.put_u64_le(record.compressed_size);
            descriptor.put_u64_le(record.uncompressed_size);
        } else {
            descriptor.put_u32_le(record.compressed_size as u32);
            descriptor.put_u32_le(record.uncompressed_size as u32);
        }
        self.sink.write(&descriptor).await?;

        self.uncompressed_bytes += record.uncompressed_size;
        self.entries.push(record);
        Ok(())
    }

    /// Close the last entry, write the central directory and shut the sink down.
    pub async fn finish(mut self) -> Result<ArchiveSummary> {
        self.finish_current_entry().await?;

        let central_dir_offset = self.sink.written;
        for entry in &self.entries {
            let record = central_directory_record(entry);
            self.sink.write(&record).await?;
        }
        let central_dir_size = self.sink.written - central_dir_offset;

        let entry_count = self.entries.len() as u64;
        let mut trailer = BytesMut::with_capacity(98);
        let need_zip64 = entry_count >= u16::MAX as u64
            || central_dir_size >= u32::MAX as u64
            || central_dir_offset >= u32::MAX as u64;

        if need_zip64 {
            let zip64_eocd_offset = central_dir_offset + central_dir_size;

            trailer.put_u32_le(ZIP64_EOCD_SIG);
            trailer.put_u64_le(44); // size of the remaining record
            trailer.put_u16_le(VERSION_ZIP64); // made by
            trailer.put_u16_le(VERSION_ZIP64); // needed
            trailer.put_u32_le(0); // this disk
            trailer.put_u32_le(0); // disk with central directory
            trailer.put_u64_le(entry_count);
            trailer.put_u64_le(entry_count);
            trailer.put_u64_le(central_dir_size);
            trailer.put_u64_le(central_dir_offset);

            trailer.put_u32_le(ZIP64_LOCATOR_SIG);
            trailer.put_u32_le(0);
            trailer.put_u64_le(zip64_eocd_offset);
            trailer.put_u32_le(1); // total disks
        }

        trailer.put_u32_le(EOCD_SIG);
        trailer.put_u16_le(0); // this disk
        trailer.put_u16_le(0); // disk with central directory
        let classic_count = entry_count.min(u16::MAX as u64) as u16;
        trailer.put_u16_le(classic_count);
        trailer.put_u16_le(classic_count);
        trailer.put_u32_le(central_dir_size.min(u32::MAX as u64) as u32);
        trailer.put_u32_le(central_dir_offset.min(u32::MAX as u64) as u32);
        trailer.put_u16_le(0); // comment length
        self.sink.write(&trailer).await?;

        self.sink.inner.flush().await?;
        self.sink.inner.shutdown().await?;

        Ok(ArchiveSummary {
            entries: self.entries.len(),
            uncompressed_bytes: self.uncompressed_bytes,
            archive_bytes: self.sink.written,
        })
    }
}

fn central_directory_record(entry: &EntryRecord) -> BytesMut {
    let zip64 = entry.needs_zip64();
    let version = if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT };

    // ZIP64 extended information, fields present only when they overflow
    let mut extra = BytesMut::new();
    if zip64 {
        let mut data = BytesMut::with_capacity(24);
        if entry.uncompressed_size > u32::MAX as u64 {
            data.put_u64_le(entry.uncompressed_size);
        }
        if entry.compressed_size > u32::MAX as u64 {
            data.put_u64_le(entry.compressed_size);
        }
        if entry.local_header_offset > u32::MAX as u64 {
            data.put_u64_le(entry.local_header_offset);
        }
        extra.put_u16_le(0x0001);
        extra.put_u16_le(data.len() as u16);
        extra.put_slice(&data);
    }

    let mut record = BytesMut::with_capacity(46 + entry.name.len() + extra.len());
    record.put_u32_le(CENTRAL_HEADER_SIG);
    record.put_u16_le(version); // made by
    record.put_u16_le(version); // needed
    record.put_u16_le(FLAGS);
    record.put_u16_le(METHOD_DEFLATE);
    record.put_u16_le(DOS_TIME);
    record.put_u16_le(DOS_DATE);
    record.put_u32_le(entry.crc32);
    record.put_u32_le(entry.compressed_size.min(u32::MAX as u64) as u32);
    record.put_u32_le(entry.uncompressed_size.min(u32::MAX as u64) as u32);
    record.put_u16_le(entry.name.len() as u16);
    record.put_u16_le(extra.len() as u16);
    record.put_u16_le(0); // comment length
    record.put_u16_le(0); // disk number start
    record.put_u16_le(0); // internal attributes
    record.put_u32_le(0); // external attributes
    record.put_u32_le(entry.local_header_offset.min(u32::MAX as u64) as u32);
    record.put_slice(entry.name.as_bytes());
    record.put_slice(&extra);
    record
}
