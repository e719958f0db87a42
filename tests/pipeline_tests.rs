//! End-to-end runs of the archive pipeline against the in-memory store.

use gcs_zip::storage::MemoryStore;
use gcs_zip::{archive_prefix, GcsZipError, Result, Target};
use std::io::{Cursor, Read};
use tempfile::tempdir;

/// Entries of a finished archive, in central directory order.
fn read_archive(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        entries.push((file.name().to_string(), content));
    }
    entries
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn sample_store() -> MemoryStore {
    MemoryStore::new()
        .with_object("bucket", "a/1.txt", "first file")
        .with_object("bucket", "a/2.txt", "second file")
        .with_object("bucket", "b/3.txt", "third file")
}

#[tokio::test]
async fn test_archives_only_matching_prefix() -> Result<()> {
    let store = sample_store();
    let mut out = Vec::new();

    let summary = archive_prefix(&store, &Target::parse("gs://bucket/a/"), &mut out).await?;
    assert_eq!(summary.entries, 2);
    assert_eq!(summary.uncompressed_bytes, 21);
    assert_eq!(summary.archive_bytes, out.len() as u64);

    let entries = read_archive(&out);
    assert_eq!(
        entries,
        vec![
            ("a/1.txt".to_string(), b"first file".to_vec()),
            ("a/2.txt".to_string(), b"second file".to_vec()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_empty_prefix_archives_whole_bucket() -> Result<()> {
    let store = sample_store();
    let mut out = Vec::new();

    archive_prefix(&store, &Target::parse("gs://bucket/"), &mut out).await?;

    let names: Vec<String> = read_archive(&out).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, ["a/1.txt", "a/2.txt", "b/3.txt"]);
    Ok(())
}

#[tokio::test]
async fn test_no_matches_gives_valid_empty_archive() -> Result<()> {
    let store = sample_store();
    let mut out = Vec::new();

    let summary = archive_prefix(&store, &Target::parse("gs://bucket/zzz/"), &mut out).await?;
    assert_eq!(summary.entries, 0);
    assert_eq!(store.opened(), 0);

    let archive = zip::ZipArchive::new(Cursor::new(&out)).unwrap();
    assert_eq!(archive.len(), 0);
    Ok(())
}

#[tokio::test]
async fn test_open_failure_aborts_run() {
    let mut store = MemoryStore::new();
    for i in 1..=5 {
        store = store.with_object("bucket", format!("logs/{i}.log"), format!("log line {i}"));
    }
    let store = store.fail_open("logs/3.log");
    let mut out = Vec::new();

    let err = archive_prefix(&store, &Target::parse("gs://bucket/logs/"), &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, GcsZipError::Open(_)));
    assert!(err.to_string().contains("logs/3.log"));
    // Objects are opened one at a time; nothing past the failure was touched.
    assert_eq!(store.opened(), 3);

    assert!(contains(&out, b"logs/1.log"));
    assert!(contains(&out, b"logs/2.log"));
    assert!(!contains(&out, b"logs/3.log"));
    assert!(!contains(&out, b"logs/4.log"));
    assert!(!contains(&out, b"logs/5.log"));
    // Never finalized, so no central directory.
    assert!(zip::ZipArchive::new(Cursor::new(&out)).is_err());
}

#[tokio::test]
async fn test_read_failure_aborts_mid_entry() {
    let store = sample_store().fail_read("a/2.txt");
    let mut out = Vec::new();

    let err = archive_prefix(&store, &Target::parse("gs://bucket/a/"), &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, GcsZipError::Io(_)));
    assert!(err.to_string().contains("connection reset"));
    assert!(contains(&out, b"a/2.txt"));
    assert!(zip::ZipArchive::new(Cursor::new(&out)).is_err());
}

#[tokio::test]
async fn test_listing_failure_is_fatal() {
    let store = sample_store().fail_list("bucket");
    let mut out = Vec::new();

    let err = archive_prefix(&store, &Target::parse("gs://bucket/a/"), &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, GcsZipError::List(_)));
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_unparsed_target_hits_empty_bucket() {
    let store = sample_store();
    let mut out = Vec::new();

    let err = archive_prefix(&store, &Target::parse("bucket/a/"), &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, GcsZipError::List(_)));
    assert_eq!(store.opened(), 0);
}

#[tokio::test]
async fn test_repeated_runs_are_byte_identical() -> Result<()> {
    let store = sample_store();
    let target = Target::parse("gs://bucket/");

    let mut first = Vec::new();
    archive_prefix(&store, &target, &mut first).await?;
    let mut second = Vec::new();
    archive_prefix(&store, &target, &mut second).await?;

    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn test_large_object_survives_buffer_flushes() -> Result<()> {
    // Incompressible-ish content over several flush thresholds
    let content: Vec<u8> = (0..3 * 1024 * 1024u32)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
        .collect();
    let store = MemoryStore::new()
        .with_object("bucket", "big/blob.bin", content.clone())
        .with_object("bucket", "big/empty", Vec::new());
    let mut out = Vec::new();

    let summary = archive_prefix(&store, &Target::parse("gs://bucket/big/"), &mut out).await?;
    assert_eq!(summary.uncompressed_bytes, content.len() as u64);

    let entries = read_archive(&out);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, "big/blob.bin");
    assert_eq!(entries[0].1, content);
    assert_eq!(entries[1].0, "big/empty");
    assert!(entries[1].1.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_writes_archive_to_file() -> Result<()> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("output.zip");
    let store = sample_store();

    let file = tokio::fs::File::create(&path).await?;
    archive_prefix(
        &store,
        &Target::parse("gs://bucket/b/"),
        tokio::io::BufWriter::new(file),
    )
    .await?;

    let bytes = std::fs::read(&path)?;
    assert_eq!(
        read_archive(&bytes),
        vec![("b/3.txt".to_string(), b"third file".to_vec())]
    );
    Ok(())
}
