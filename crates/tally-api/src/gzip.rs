//! Transparent gzip for request and response bodies.
//!
//! Requests carrying `Content-Encoding: gzip` are inflated before they
//! reach a handler. JSON and HTML responses are compressed when the
//! client sent `Accept-Encoding: gzip`.

use std::io::{self, Read, Write};

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, warn};

/// Upper bound for request bodies, compressed or inflated.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// axum middleware; install with `middleware::from_fn(gzip)`.
pub async fn gzip(req: Request, next: Next) -> Response {
    let wants_gzip = accepts_gzip(req.headers());

    let req = match inflate_request(req).await {
        Ok(req) => req,
        Err(status) => return status.into_response(),
    };
    let resp = next.run(req).await;

    if wants_gzip && is_compressible(&resp) {
        compress_response(resp).await
    } else {
        resp
    }
}

fn header_has_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|item| {
            item.split(';')
                .next()
                .is_some_and(|t| t.trim().eq_ignore_ascii_case(token))
        })
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    header_has_token(headers, header::ACCEPT_ENCODING, "gzip")
}

fn is_compressible(resp: &Response) -> bool {
    if resp.headers().contains_key(header::CONTENT_ENCODING) {
        return false;
    }
    resp.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json") || ct.starts_with("text/html"))
}

async fn inflate_request(req: Request) -> Result<Request, StatusCode> {
    if !header_has_token(req.headers(), header::CONTENT_ENCODING, "gzip") {
        return Ok(req);
    }

    let (mut parts, body) = req.into_parts();
    let compressed = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;
    let inflated = gunzip(&compressed).map_err(|e| {
        debug!(error = %e, "gzip request body rejected");
        StatusCode::BAD_REQUEST
    })?;

    parts.headers.remove(header::CONTENT_ENCODING);
    parts.headers.remove(header::CONTENT_LENGTH);
    Ok(Request::from_parts(parts, Body::from(inflated)))
}

async fn compress_response(resp: Response) -> Response {
    let (mut parts, body) = resp.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match gzip_bytes(&bytes) {
        Ok(compressed) => {
            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            parts.headers.remove(header::CONTENT_LENGTH);
            parts
                .headers
                .append(header::VARY, HeaderValue::from_static("accept-encoding"));
            Response::from_parts(parts, Body::from(compressed))
        }
        Err(e) => {
            warn!(error = %e, "gzip response failed, sending uncompressed");
            Response::from_parts(parts, Body::from(bytes))
        }
    }
}

/// Inflate a gzip payload, refusing output larger than the body limit.
pub fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut inflated = Vec::new();
    GzDecoder::new(data)
        .take(MAX_BODY_BYTES as u64 + 1)
        .read_to_end(&mut inflated)?;
    if inflated.len() > MAX_BODY_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "inflated body too large"));
    }
    Ok(inflated)
}

pub fn gzip_bytes(data: &[u8]) -> io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::fast());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trip() {
        let payload = br#"[{"id":"hits","type":"counter","delta":1}]"#;
        let compressed = gzip_bytes(payload).unwrap();
        assert_ne!(compressed.as_ref(), payload.as_slice());
        assert_eq!(gunzip(&compressed).unwrap(), payload.to_vec());
    }

    #[test]
    fn gunzip_rejects_garbage() {
        assert!(gunzip(b"definitely not gzip").is_err());
    }

    #[test]
    fn accept_encoding_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("br, gzip;q=0.8"));
        assert!(accepts_gzip(&headers));

        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("deflate"));
        assert!(!accepts_gzip(&headers));

        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("x-gzipped"));
        assert!(!accepts_gzip(&headers));
    }
}
