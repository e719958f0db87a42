//! Parsing of `gs://<bucket>/<prefix>` targets.

use crate::error::{GcsZipError, Result};

const SCHEME: &str = "gs://";

/// Bucket and prefix an archive run reads from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    raw: String,
    bucket: String,
    prefix: String,
}

impl Target {
    /// Best-effort parse.
    ///
    /// Input that does not look like `gs://<bucket>/<prefix>` yields an empty
    /// bucket and prefix instead of an error; the storage backend decides what
    /// an empty bucket means.
    pub fn parse(raw: &str) -> Self {
        let (bucket, prefix) = split(raw).unwrap_or_default();
        Self {
            raw: raw.to_string(),
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        }
    }

    /// Like [`Target::parse`] but rejects input the permissive parser would
    /// degrade to an empty bucket.
    pub fn parse_strict(raw: &str) -> Result<Self> {
        match split(raw) {
            Some((bucket, prefix)) => Ok(Self {
                raw: raw.to_string(),
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            }),
            None => Err(GcsZipError::InvalidTarget(raw.to_string())),
        }
    }

    /// Parse with strict validation when `strict` is set.
    pub fn resolve(raw: &str, strict: bool) -> Result<Self> {
        if strict {
            Self::parse_strict(raw)
        } else {
            Ok(Self::parse(raw))
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// File name advertised for a download of this target: `<prefix>.zip`.
    ///
    /// Quotes and backslashes are escaped and control characters dropped so
    /// the result can sit inside a quoted `Content-Disposition` parameter.
    pub fn archive_file_name(&self) -> String {
        let mut name = String::with_capacity(self.prefix.len() + 4);
        for c in self.prefix.chars() {
            match c {
                '"' | '\\' => {
                    name.push('\\');
                    name.push(c);
                }
                c if c.is_control() => {}
                c => name.push(c),
            }
        }
        name.push_str(".zip");
        name
    }
}

fn split(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix(SCHEME)?;
    let (bucket, prefix) = rest.split_once('/')?;
    if bucket.is_empty() {
        return None;
    }
    Some((bucket, prefix))
}
