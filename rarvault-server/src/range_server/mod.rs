//! HTTP Range Server (spec.md §4.7, §6.3): serves byte ranges of archive
//! entries to whatever plays the pointer files the virtual-HTTP strategy
//! writes. Grounded on the teacher's
//! `ferrex-server::stream::stream_handlers::stream_with_progress_handler`,
//! but the range parsing diverges deliberately: the teacher silently clamps
//! an out-of-range request to a 200/206 it can satisfy, while this server
//! must answer unsatisfiable and multi-range requests with an explicit
//! `416` (spec.md §4.7 "Multi-range requests are rejected with 416").

mod range;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use rarvault_core::archive::ArchiveReader;
use rarvault_core::token_registry::TokenRegistry;
use rarvault_core::types::{ArchiveEntry, Token};

use crate::errors::AppError;
use range::RangeOutcome;

#[derive(Clone)]
pub struct RangeServerState {
    pub registry: TokenRegistry,
    pub reader: Arc<dyn ArchiveReader>,
    pub chunk_size: usize,
    pub streams: Arc<Semaphore>,
}

pub fn router(state: RangeServerState) -> Router {
    Router::new()
        .route("/{token}/{name}", get(get_or_head).head(get_or_head))
        .fallback(unmatched_path)
        .with_state(state)
}

/// Any request whose path doesn't even look like `/{token}/{name}` — axum's
/// router already turns a method mismatch on a matched path into `405`
/// (spec.md §4.7 "all other methods return 405") without help from here.
async fn unmatched_path() -> impl IntoResponse {
    AppError::not_found("unknown token").into_response()
}

async fn get_or_head(
    State(state): State<RangeServerState>,
    Path((token_str, _name)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let Some(token) = Token::from_url_safe(&token_str) else {
        return AppError::not_found("malformed token").into_response();
    };
    let Some(registration) = state.registry.resolve(&token) else {
        return AppError::not_found("unknown or released token").into_response();
    };

    let content_type = content_type_for(&registration.entry_path);
    let size = registration.size;

    if method == Method::HEAD {
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, size.to_string())
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CACHE_CONTROL, "no-store")
            .body(axum::body::Body::empty())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| range::parse(v, size))
        .unwrap_or(RangeOutcome::Full);

    let is_partial = matches!(range, RangeOutcome::Partial { .. });
    let (start, end) = match range {
        RangeOutcome::Full => (0, size.saturating_sub(1)),
        RangeOutcome::Partial { start, end } => (start, end),
        RangeOutcome::Unsatisfiable => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{size}"))
                .body(axum::body::Body::empty())
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    };

    let Ok(permit) = state.streams.clone().acquire_owned().await else {
        return AppError::internal("server shutting down").into_response();
    };

    let session = match state.reader.open(registration.handle.first_volume()).await {
        Ok(session) => session,
        Err(e) => {
            warn!(token = %token, error = %e, "failed to reopen archive for range request");
            return AppError::internal("archive unavailable").into_response();
        }
    };
    let entry = ArchiveEntry {
        path: registration.entry_path.clone(),
        size,
        crc32: None,
        encrypted: false,
        mtime: None,
    };
    let entry_reader = match session.open_entry(&entry).await {
        Ok(reader) => reader,
        Err(e) => {
            warn!(token = %token, error = %e, "failed to open entry reader for range request");
            return AppError::internal("archive unavailable").into_response();
        }
    };

    let served_len = end.saturating_sub(start) + 1;
    let body_stream = stream::unfold(
        ChunkState {
            reader: entry_reader,
            offset: start,
            remaining: served_len,
            chunk_size: state.chunk_size,
            _permit: permit,
        },
        next_chunk,
    );
    let body = axum::body::Body::from_stream(body_stream);

    let status = if is_partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, served_len.to_string())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-store");
    if is_partial {
        builder = builder.header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"));
    }
    debug!(token = %token, start, end, size, "serving range request");

    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

struct ChunkState {
    reader: Box<dyn rarvault_core::archive::EntryReader>,
    offset: u64,
    remaining: u64,
    chunk_size: usize,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

async fn next_chunk(mut state: ChunkState) -> Option<(Result<Vec<u8>, std::io::Error>, ChunkState)> {
    if state.remaining == 0 {
        return None;
    }
    let want = std::cmp::min(state.remaining, state.chunk_size as u64) as usize;
    match state.reader.read_at(state.offset, want).await {
        Ok(bytes) if bytes.is_empty() => None,
        Ok(bytes) => {
            state.offset += bytes.len() as u64;
            state.remaining = state.remaining.saturating_sub(bytes.len() as u64);
            Some((Ok(bytes), state))
        }
        Err(e) => Some((
            Err(std::io::Error::other(e.to_string())),
            ChunkState { remaining: 0, ..state },
        )),
    }
}

fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "flv" => "video/x-flv",
        "wmv" => "video/x-ms-wmv",
        "m4v" => "video/x-m4v",
        "mpg" | "mpeg" => "video/mpeg",
        "3gp" => "video/3gpp",
        "ogv" => "video/ogg",
        "ts" => "video/mp2t",
        "mts" | "m2ts" => "video/mp2t",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "srt" => "text/srt",
        "ass" | "ssa" => "text/x-ssa",
        "sub" | "idx" => "application/octet-stream",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use rarvault_core::archive::{ArchiveSession, TestOutcome};
    use rarvault_core::types::ArchiveSetHandle;

    #[test]
    fn content_type_falls_back_to_octet_stream() {
        assert_eq!(content_type_for("movie.mkv"), "video/x-matroska");
        assert_eq!(content_type_for("weird.xyz"), "application/octet-stream");
        assert_eq!(content_type_for("noextension"), "application/octet-stream");
    }

    struct FakeReader {
        content: Vec<u8>,
    }

    #[async_trait]
    impl rarvault_core::archive::EntryReader for FakeReader {
        async fn read_at(&mut self, offset: u64, length: usize) -> rarvault_core::error::Result<Vec<u8>> {
            let start = offset as usize;
            if start >= self.content.len() {
                return Ok(Vec::new());
            }
            let end = std::cmp::min(start + length, self.content.len());
            Ok(self.content[start..end].to_vec())
        }

        fn size(&self) -> u64 {
            self.content.len() as u64
        }

        async fn close(&mut self) -> rarvault_core::error::Result<()> {
            Ok(())
        }
    }

    struct FakeSession {
        content: Vec<u8>,
    }

    #[async_trait]
    impl ArchiveSession for FakeSession {
        async fn is_encrypted(&self) -> rarvault_core::error::Result<bool> {
            Ok(false)
        }

        async fn test(&self, _timeout: std::time::Duration) -> rarvault_core::error::Result<TestOutcome> {
            Ok(TestOutcome::Ok)
        }

        async fn entries(&self) -> rarvault_core::error::Result<Vec<ArchiveEntry>> {
            Ok(Vec::new())
        }

        async fn open_entry(
            &self,
            _entry: &ArchiveEntry,
        ) -> rarvault_core::error::Result<Box<dyn rarvault_core::archive::EntryReader>> {
            Ok(Box::new(FakeReader { content: self.content.clone() }))
        }
    }

    struct FakeArchiveReader {
        content: Vec<u8>,
    }

    #[async_trait]
    impl ArchiveReader for FakeArchiveReader {
        async fn open(&self, _first_volume_path: &std::path::Path) -> rarvault_core::error::Result<Box<dyn ArchiveSession>> {
            Ok(Box::new(FakeSession { content: self.content.clone() }))
        }
    }

    fn test_state(content: Vec<u8>) -> (RangeServerState, Token) {
        let registry = TokenRegistry::new();
        let handle = ArchiveSetHandle::new(std::path::PathBuf::from("/watch/Test.2021.1080p.x264-X.rar"));
        let token = registry.register(handle, "Test.2021.1080p.x264-X.mkv".to_string(), content.len() as u64);
        let state = RangeServerState {
            registry,
            reader: Arc::new(FakeArchiveReader { content }),
            chunk_size: 64 * 1024,
            streams: Arc::new(Semaphore::new(4)),
        };
        (state, token)
    }

    fn ten_mib() -> Vec<u8> {
        (0..10 * 1024 * 1024).map(|i| (i % 256) as u8).collect()
    }

    #[tokio::test]
    async fn head_and_full_get_report_identical_content_length() {
        let (state, token) = test_state(ten_mib());
        let app = router(state);

        let head_req = Request::builder()
            .method("HEAD")
            .uri(format!("/{token}/name.mkv"))
            .body(Body::empty())
            .unwrap();
        let head_resp = app.clone().oneshot(head_req).await.unwrap();
        assert_eq!(head_resp.status(), StatusCode::OK);
        let head_len = head_resp.headers().get(header::CONTENT_LENGTH).unwrap().clone();

        let get_req = Request::builder()
            .method("GET")
            .uri(format!("/{token}/name.mkv"))
            .body(Body::empty())
            .unwrap();
        let get_resp = app.oneshot(get_req).await.unwrap();
        assert_eq!(get_resp.status(), StatusCode::OK);
        assert_eq!(get_resp.headers().get(header::CONTENT_LENGTH).unwrap(), &head_len);
    }

    #[tokio::test]
    async fn range_returns_exactly_the_requested_bytes() {
        let content = ten_mib();
        let (state, token) = test_state(content.clone());
        let app = router(state);

        let req = Request::builder()
            .method("GET")
            .uri(format!("/{token}/name.mkv"))
            .header(header::RANGE, "bytes=1048576-2097151")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            resp.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 1048576-2097151/10485760"
        );
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &content[1_048_576..=2_097_151]);
    }

    #[tokio::test]
    async fn single_byte_range_at_start_is_206() {
        let (state, token) = test_state(ten_mib());
        let app = router(state);

        let req = Request::builder()
            .method("GET")
            .uri(format!("/{token}/name.mkv"))
            .header(header::RANGE, "bytes=0-0")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.headers().get(header::CONTENT_RANGE).unwrap(), "bytes 0-0/10485760");
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 1);
    }

    #[tokio::test]
    async fn range_at_last_byte_is_206_with_one_byte() {
        let (state, token) = test_state(ten_mib());
        let app = router(state);

        let req = Request::builder()
            .method("GET")
            .uri(format!("/{token}/name.mkv"))
            .header(header::RANGE, "bytes=10485759-")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 1);
    }

    #[tokio::test]
    async fn range_starting_at_eof_is_416() {
        let (state, token) = test_state(ten_mib());
        let app = router(state);

        let req = Request::builder()
            .method("GET")
            .uri(format!("/{token}/name.mkv"))
            .header(header::RANGE, "bytes=10485760-")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            resp.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */10485760"
        );
    }

    #[tokio::test]
    async fn unknown_token_is_404() {
        let (state, _token) = test_state(ten_mib());
        let app = router(state);

        let req = Request::builder()
            .method("GET")
            .uri(format!("/{}/name.mkv", Token::generate()))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unsupported_method_is_405() {
        let (state, token) = test_state(ten_mib());
        let app = router(state);

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/{token}/name.mkv"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
