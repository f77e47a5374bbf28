use std::io;

use http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE,
};
use http::{Response, StatusCode, Version};
use tokio::net::TcpStream;

use crate::helpers::pages;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

pub trait ResponseUtil {
    /// Serializes status line, headers and body into wire bytes.
    fn to_http_bytes(&self) -> Vec<u8>;
}

impl ResponseUtil for Response<String> {
    fn to_http_bytes(&self) -> Vec<u8> {
        let mut send_string = format!("{:?} {}\r\n", self.version(), self.status());
        for (key, value) in self.headers().iter() {
            send_string.push_str(&format!(
                "{}: {}\r\n",
                key.as_str(),
                String::from_utf8_lossy(value.as_bytes())
            ));
        }
        send_string.push_str("\r\n");
        send_string.push_str(self.body());
        send_string.into_bytes()
    }
}

fn html_response(status: StatusCode, body: String) -> Response<String> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.version_mut() = Version::HTTP_11;

    let length = response.body().len();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

pub fn render_upload_page() -> Vec<u8> {
    html_response(StatusCode::OK, pages::upload_page()).to_http_bytes()
}

pub fn render_success(filename: &str, size: usize) -> Vec<u8> {
    html_response(StatusCode::OK, pages::success_page(filename, size)).to_http_bytes()
}

pub fn render_error(message: &str) -> Vec<u8> {
    html_response(StatusCode::BAD_REQUEST, pages::error_page(message)).to_http_bytes()
}

pub fn render_cors_preflight() -> Vec<u8> {
    let mut response = Response::new(String::new());
    *response.version_mut() = Version::HTTP_11;

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, GET, OPTIONS"),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(0usize));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    response.to_http_bytes()
}

/// Writes `bytes` with a single send. A short write is reported, not retried.
pub async fn send_bytes(stream: &TcpStream, bytes: &[u8]) -> io::Result<usize> {
    loop {
        stream.writable().await?;
        match stream.try_write(bytes) {
            Ok(n) => {
                if n < bytes.len() {
                    tracing::warn!(sent = n, total = bytes.len(), "partial response sent");
                }
                return Ok(n);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}
