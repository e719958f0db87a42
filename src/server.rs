//! HTTP front end: `GET /?uri=gs://<bucket>/<prefix>` streams a zip archive.
//!
//! Every request runs its own pipeline on a separate task that writes into a
//! bounded in-memory pipe; the read half of the pipe is the response body.
//! Only the storage client is shared between requests.
//!
//! The status line is held back until the archive produces its first bytes
//! or the pipeline ends, so failures that happen before anything is written
//! (bad bucket, listing error, first object missing) are reported as a 500.
//! Once bytes have gone out the status can no longer change; a later failure
//! ends the body with an error and the client sees a truncated transfer.
//!
//! The pipeline task is aborted as soon as the response (or the request
//! future, before headers go out) is dropped, so a client that hangs up
//! never leaves a download running.

use crate::error::{GcsZipError, Result};
use crate::pipeline;
use crate::storage::ObjectStore;
use crate::target::Target;
use crate::ArchiveSummary;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use serde::Deserialize;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tokio_util::task::AbortOnDropHandle;
use tracing::{error, info};

/// Capacity of the pipe between a pipeline task and its response body.
pub const PIPE_CAPACITY: usize = 256 * 1024;

/// State shared by all requests.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn ObjectStore>,
    strict: bool,
}

impl AppState {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            strict: false,
        }
    }

    /// Reject malformed `uri` values with 400 instead of archiving an empty bucket.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Error answered as a plain-text body.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.message,
        )
            .into_response()
    }
}

impl From<GcsZipError> for AppError {
    fn from(err: GcsZipError) -> Self {
        match err {
            GcsZipError::InvalidTarget(_) => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            err => Self::internal(err.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ArchiveQuery {
    pub uri: Option<String>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(download_archive))
        .route("/healthz", get(healthz))
        .with_state(state)
}

pub async fn healthz() -> &'static str {
    "ok"
}

/// `GET /?uri=gs://<bucket>/<prefix>`
pub async fn download_archive(
    State(state): State<AppState>,
    Query(query): Query<ArchiveQuery>,
) -> std::result::Result<Response, AppError> {
    let target = Target::resolve(query.uri.as_deref().unwrap_or_default(), state.strict)?;
    let disposition = format!("attachment; filename=\"{}\"", target.archive_file_name());
    let disposition = HeaderValue::from_bytes(disposition.as_bytes())
        .map_err(|e| AppError::internal(e.to_string()))?;

    let (pipe_writer, pipe_reader) = tokio::io::duplex(PIPE_CAPACITY);
    let store = Arc::clone(&state.store);
    let job_target = target.clone();
    let mut job = AbortOnDropHandle::new(tokio::spawn(async move {
        pipeline::archive_prefix(store.as_ref(), &job_target, pipe_writer).await
    }));
    let mut body = ReaderStream::new(pipe_reader);

    // Prefer the job outcome when both are ready so an early failure is a 500.
    let first = tokio::select! {
        biased;
        outcome = &mut job => {
            let summary = joined(outcome).map_err(|e| request_failed(&target, e))?;
            info!(uri = %target.raw(), entries = summary.entries, "archive served");
            return Ok(zip_response(disposition, body.boxed()));
        }
        chunk = body.next() => chunk,
    };

    let head: Vec<io::Result<Bytes>> = match first {
        Some(Ok(chunk)) => vec![Ok(chunk)],
        Some(Err(e)) => {
            job.abort();
            return Err(request_failed(&target, e.into()));
        }
        // Pipe closed: the pipeline is done, one way or the other.
        None => {
            let summary = joined(job.await).map_err(|e| request_failed(&target, e))?;
            info!(uri = %target.raw(), entries = summary.entries, "archive served");
            return Ok(zip_response(disposition, stream::empty().boxed()));
        }
    };

    // The tail owns the job handle, so dropping the body aborts the pipeline.
    let tail = stream::once(finish_stream(job, target)).filter_map(|item| async move { item });
    let body = stream::iter(head).chain(body).chain(tail);
    Ok(zip_response(disposition, body.boxed()))
}

fn zip_response(
    disposition: HeaderValue,
    body: stream::BoxStream<'static, io::Result<Bytes>>,
) -> Response {
    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    response
}

/// Final item of a streamed body: nothing on success, an error otherwise so
/// the connection is torn down instead of ending cleanly.
async fn finish_stream(
    job: AbortOnDropHandle<Result<ArchiveSummary>>,
    target: Target,
) -> Option<io::Result<Bytes>> {
    match joined(job.await) {
        Ok(summary) => {
            info!(uri = %target.raw(), entries = summary.entries, "archive served");
            None
        }
        Err(e) => {
            error!(uri = %target.raw(), error = %e, "archive aborted after response started");
            Some(Err(io::Error::other(e.to_string())))
        }
    }
}

fn joined(
    outcome: std::result::Result<Result<ArchiveSummary>, tokio::task::JoinError>,
) -> Result<ArchiveSummary> {
    outcome.map_err(|e| GcsZipError::Io(io::Error::other(e)))?
}

fn request_failed(target: &Target, err: GcsZipError) -> AppError {
    error!(uri = %target.raw(), error = %err, "archive failed");
    err.into()
}
