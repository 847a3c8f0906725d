//! Token-authenticated public download handler with byte-range streaming.
//!
//! The token is a capability: the route is public and the error for a
//! missing, expired, or exhausted token never reveals which it was.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use tokio_stream::wrappers::ReceiverStream;
use torva_core::ReadSeek;
use torva_core::fsname::{is_within, join_within};
use tracing::warn;

use crate::error::ApiError;
use crate::state::SharedState;

const STREAM_CHUNK: usize = 64 * 1024;

/// `GET /download/{token}`: stream a payload file or packaged archive.
pub(crate) async fn download(
    State(state): State<SharedState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if token.is_empty() {
        return Err(ApiError::bad_request("missing token"));
    }

    let Some(consumed) = state.store.consume_download_token(&token).await? else {
        // Unknown vs spent: 404 for a token that never existed, 410 for one
        // that expired or ran out of uses. The message stays the same.
        return match state.store.get_download_token(&token).await? {
            None => Err(ApiError::not_found("invalid or expired token")),
            Some(_) => Err(ApiError::gone("invalid or expired token")),
        };
    };

    let record = state
        .store
        .get_torrent(consumed.torrent_id)
        .await?
        .ok_or_else(|| ApiError::not_found("torrent not found"))?;

    let (reader, length) = open_payload(&state, &record.info_hash, &consumed.file_path)?;

    if let Err(err) = state
        .store
        .log_download_started(record.user_id, length, &consumed.file_path)
        .await
    {
        warn!(error = %err, torrent_id = %record.id, "failed to log download start");
    }

    let filename = consumed
        .file_path
        .rsplit('/')
        .next()
        .unwrap_or(consumed.file_path.as_str())
        .to_string();

    let range = match headers.get(header::RANGE).and_then(|value| value.to_str().ok()) {
        Some(value) => Some(
            parse_range(value, length)
                .ok_or_else(|| ApiError::range_not_satisfiable("invalid range"))?,
        ),
        None => None,
    };

    serve_reader(reader, length, range, &filename).map_err(ApiError::internal)
}

fn open_payload(
    state: &SharedState,
    info_hash: &str,
    relative_path: &str,
) -> Result<(Box<dyn ReadSeek>, u64), ApiError> {
    // Prefer the engine's reader; it favours sequential streaming. Fall back
    // to the staged bytes on disk when the participation is gone.
    if let Ok(opened) = state.engine.open_reader(info_hash, relative_path) {
        return Ok(opened);
    }

    let download_dir = &state.engine.config().download_dir;
    let full = join_within(download_dir, relative_path)
        .ok_or_else(|| ApiError::forbidden("invalid file path"))?;
    if !full.exists() {
        return Err(ApiError::not_found("file not found on disk"));
    }
    if !is_within(download_dir, &full) {
        return Err(ApiError::forbidden("invalid file path"));
    }

    let file = File::open(&full).map_err(ApiError::internal)?;
    let length = file.metadata().map_err(ApiError::internal)?.len();
    Ok((Box::new(file), length))
}

/// Parse `bytes=a-b` / `bytes=a-` against a payload length. `None` means
/// unsatisfiable.
pub(crate) fn parse_range(header: &str, length: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start_text, end_text) = spec.split_once('-')?;
    let start: u64 = start_text.trim().parse().ok()?;
    let end: u64 = if end_text.trim().is_empty() {
        length.checked_sub(1)?
    } else {
        end_text.trim().parse().ok()?
    };
    (start <= end && end < length).then_some((start, end))
}

fn serve_reader(
    mut reader: Box<dyn ReadSeek>,
    length: u64,
    range: Option<(u64, u64)>,
    filename: &str,
) -> anyhow::Result<Response> {
    let (status, start, body_len, content_range) = match range {
        Some((start, end)) => (
            StatusCode::PARTIAL_CONTENT,
            start,
            end - start + 1,
            Some(format!("bytes {start}-{end}/{length}")),
        ),
        None => (StatusCode::OK, 0, length, None),
    };

    if start > 0 {
        reader.seek(SeekFrom::Start(start))?;
    }

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, body_len.to_string())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename.replace('"', "_")),
        );
    if let Some(content_range) = content_range {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }

    Ok(builder.body(reader_body(reader, body_len))?)
}

/// Bridge a blocking reader into a response body. The read loop runs on the
/// blocking pool; a dropped receiver (client gone) ends it and closes the
/// reader.
fn reader_body(mut reader: Box<dyn ReadSeek>, mut remaining: u64) -> Body {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, io::Error>>(8);
    tokio::task::spawn_blocking(move || {
        let mut buffer = vec![0u8; STREAM_CHUNK];
        while remaining > 0 {
            let want = buffer.len().min(usize::try_from(remaining).unwrap_or(buffer.len()));
            match reader.read(&mut buffer[..want]) {
                Ok(0) => break,
                Ok(read) => {
                    remaining = remaining.saturating_sub(read as u64);
                    if tx.blocking_send(Ok(Bytes::copy_from_slice(&buffer[..read]))).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.blocking_send(Err(err));
                    break;
                }
            }
        }
    });
    Body::from_stream(ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_parsing_accepts_closed_and_open_forms() {
        assert_eq!(parse_range("bytes=100-199", 1000), Some((100, 199)));
        assert_eq!(parse_range("bytes=0-0", 1000), Some((0, 0)));
        assert_eq!(parse_range("bytes=500-", 1000), Some((500, 999)));
        assert_eq!(parse_range("bytes=0-999", 1000), Some((0, 999)));
    }

    #[test]
    fn range_parsing_rejects_unsatisfiable_forms() {
        assert_eq!(parse_range("bytes=200-100", 1000), None);
        assert_eq!(parse_range("bytes=0-1000", 1000), None);
        assert_eq!(parse_range("bytes=1000-", 1000), None);
        assert_eq!(parse_range("bytes=-500", 1000), None);
        assert_eq!(parse_range("items=0-10", 1000), None);
        assert_eq!(parse_range("bytes=abc-def", 1000), None);
        assert_eq!(parse_range("bytes=0-", 0), None);
    }

    #[test]
    fn range_length_matches_requested_window() {
        // For any satisfiable a-b: body length == b - a + 1.
        let (start, end) = parse_range("bytes=100-199", 1000).expect("satisfiable");
        assert_eq!(end - start + 1, 100);
    }

    #[tokio::test]
    async fn reader_body_streams_exactly_the_window() {
        use std::io::Cursor;
        use tokio_stream::StreamExt as _;

        let data: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let mut reader: Box<dyn ReadSeek> = Box::new(Cursor::new(data.clone()));
        reader.seek(SeekFrom::Start(100)).expect("seek");

        let body = reader_body(reader, 100);
        let mut stream = body.into_data_stream();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.expect("chunk"));
        }
        assert_eq!(collected.len(), 100);
        assert_eq!(collected[..], data[100..200]);
    }
}
