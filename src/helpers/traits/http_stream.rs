use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::RequestError;
use crate::helpers::traits::bytes::SplitBytes;
use crate::{ParsedRequest, ServerConfig, KIB};

// headers are small; anything beyond this is not worth waiting for
const MAX_HEADER_BYTES: usize = 64 * KIB;
const BODY_RESERVE_CHUNKS: usize = 4;

#[async_trait]
pub trait StreamHttp {
    /// Reads exactly one request: the header block plus, for `POST`, up to
    /// `Content-Length` body bytes (capped at `max_body_size`).
    ///
    /// A body shorter than declared is returned as-is.
    async fn read_request(&self, config: &ServerConfig) -> Result<ParsedRequest, RequestError>;
}

#[async_trait]
impl StreamHttp for TcpStream {
    async fn read_request(&self, config: &ServerConfig) -> Result<ParsedRequest, RequestError> {
        let mut buf = vec![0; config.header_chunk_size];
        let n = receive(self, &mut buf, config).await?;
        if n == 0 {
            return Err(RequestError::Empty);
        }
        let mut bytes = buf[..n].to_vec();

        let (head, body) = match bytes.find_bytes(b"\r\n\r\n") {
            Some(pos) => match std::str::from_utf8(&bytes[..pos]) {
                Ok(head) => (head.to_string(), bytes[pos + 4..].to_vec()),
                Err(_) => {
                    tracing::warn!(bytes = n, "undecodable request head, treating as GET /");
                    return Ok(ParsedRequest::fallback(bytes[pos + 4..].to_vec()));
                }
            },
            None => {
                read_remaining_head(self, &mut bytes, &mut buf, config).await?;
                match bytes.split_header_body() {
                    Some((head, rest)) => (decodable_prefix(head), rest.to_vec()),
                    None => (decodable_prefix(&bytes), Vec::new()),
                }
            }
        };

        let mut request = parse_head(&head, body)?;
        tracing::debug!(
            method = %request.method,
            path = %request.path,
            content_length = request.declared_content_length,
            "request head parsed"
        );

        if request.is_chunked() {
            tracing::warn!("chunked transfer-encoding is not supported, body left undecoded");
        } else if request.method == http::Method::POST && request.declared_content_length > 0 {
            read_body(self, &mut request, config).await;
        }

        Ok(request)
    }
}

async fn read_remaining_head(
    stream: &TcpStream,
    bytes: &mut Vec<u8>,
    buf: &mut [u8],
    config: &ServerConfig,
) -> Result<(), RequestError> {
    while bytes.find_bytes(b"\r\n\r\n").is_none() {
        if bytes.len() > MAX_HEADER_BYTES {
            tracing::warn!(bytes = bytes.len(), "request head too long, giving up");
            break;
        }
        let n = match receive(stream, buf, config).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "request head incomplete");
                break;
            }
        };
        bytes.extend_from_slice(&buf[..n]);

        // only the part before a terminator has to be text
        let head_end = bytes.find_bytes(b"\r\n\r\n").unwrap_or(bytes.len());
        if let Err(e) = std::str::from_utf8(&bytes[..head_end]) {
            if e.error_len().is_some() {
                tracing::warn!("request head is not text, ending header capture");
                break;
            }
        }
    }
    Ok(())
}

async fn read_body(stream: &TcpStream, request: &mut ParsedRequest, config: &ServerConfig) {
    let declared = request.declared_content_length;
    let target = declared.min(config.max_body_size);
    if declared > config.max_body_size {
        tracing::warn!(
            declared,
            limit = config.max_body_size,
            "declared body exceeds limit, reading up to the limit only"
        );
    }

    let body = &mut request.body;
    body.truncate(target);
    // grow with the data, a declared length alone does not pin memory
    body.reserve((target - body.len()).min(BODY_RESERVE_CHUNKS * config.body_chunk_size));

    let mut chunk = vec![0; config.body_chunk_size];
    let started = Instant::now();
    let mut last_log = started;

    while body.len() < target {
        let want = (target - body.len()).min(chunk.len());
        match receive(stream, &mut chunk[..want], config).await {
            Ok(0) => {
                tracing::debug!(received = body.len(), "peer closed during body");
                break;
            }
            Ok(n) => {
                body.extend_from_slice(&chunk[..n]);
                if last_log.elapsed() >= config.progress_log_interval {
                    last_log = Instant::now();
                    log_progress(body.len(), target, started);
                }
            }
            Err(e) => {
                tracing::warn!(received = body.len(), error = %e, "body read stopped");
                break;
            }
        }
    }

    if body.len() < target {
        tracing::warn!(
            received = body.len(),
            expected = target,
            "request body shorter than declared, continuing with received bytes"
        );
    } else {
        log_progress(body.len(), target, started);
    }
}

fn log_progress(received: usize, target: usize, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    let throughput_kbps = if elapsed > 0.0 {
        received as f64 / 1024.0 / elapsed
    } else {
        0.0
    };
    tracing::info!(
        percent = %format!("{:.1}", received as f64 * 100.0 / target.max(1) as f64),
        received,
        total = target,
        throughput_kbps = throughput_kbps.round() as u64,
        "receiving upload"
    );
}

/// One receive, bounded by the read timeout. "Not ready yet" results are
/// retried after a short sleep, up to `read_max_retry` times in a row.
async fn receive(stream: &TcpStream, buf: &mut [u8], config: &ServerConfig) -> io::Result<usize> {
    let mut budget = RetryBudget::new(config);
    loop {
        match tokio::time::timeout(config.read_timeout, stream.readable()).await {
            Err(_) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "receive timed out"));
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(())) => {}
        }

        match stream.try_read(buf) {
            Ok(n) => return Ok(n),
            Err(e) => budget.backoff(e).await?,
        }
    }
}

/// Consecutive transient read failures tolerated by one [`receive`].
struct RetryBudget {
    attempts: u8,
    max: u8,
    delay: Duration,
}

impl RetryBudget {
    fn new(config: &ServerConfig) -> Self {
        Self {
            attempts: 0,
            max: config.read_max_retry,
            delay: config.read_retry_delay,
        }
    }

    /// Sleeps before the next attempt, or hands the error back when it is not
    /// transient or the budget is spent.
    async fn backoff(&mut self, e: io::Error) -> io::Result<()> {
        if !matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) {
            return Err(e);
        }
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.max {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("no data after {} attempts", self.attempts),
            ));
        }
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

fn decodable_prefix(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) => String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned(),
    }
}

/// Parses the request line and header fields.
///
/// An absent or unparseable request line yields `GET /`. A request line with
/// a method and path but no version token is rejected.
pub fn parse_head(head: &str, body: Vec<u8>) -> Result<ParsedRequest, RequestError> {
    let mut lines = head.split("\r\n").flat_map(|line| line.split('\n'));
    let mut request = ParsedRequest::fallback(body);

    if let Some(request_line) = lines.next() {
        let mut parts = request_line.split_whitespace();
        let method = parts.next().and_then(|m| m.parse::<http::Method>().ok());
        let path = parts.next();
        match (method, path) {
            (Some(method), Some(path)) => {
                request.method = method;
                request.path = path.to_string();
                request.version = match parts.next() {
                    Some("HTTP/0.9") => http::Version::HTTP_09,
                    Some("HTTP/1.0") => http::Version::HTTP_10,
                    Some(_) => http::Version::HTTP_11,
                    None => return Err(RequestError::MissingVersion),
                };
            }
            _ => tracing::debug!(line = request_line, "malformed request line, using GET /"),
        }
    }

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            if !key.is_empty() {
                headers.insert(key.to_string(), value.trim().to_string());
            }
        }
    }
    request.headers = headers;

    request.declared_content_length = request
        .header("Content-Length")
        .and_then(|len| len.parse().ok())
        .unwrap_or(0);

    Ok(request)
}
