use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use atomic_upload::{Server, ServerConfig, UploadedFile};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub struct TestServer {
    pub server: Server,
    pub addr: SocketAddr,
    pub uploads: Arc<Mutex<Vec<UploadedFile>>>,
    pub dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|config| config).await
    }

    /// Starts on an ephemeral port with a fresh upload directory, letting the
    /// caller adjust the rest of the configuration.
    pub async fn start_with<F>(configure: F) -> Self
    where
        F: FnOnce(ServerConfig) -> ServerConfig,
    {
        let dir = tempfile::tempdir().unwrap();
        let uploads = Arc::new(Mutex::new(Vec::new()));
        let seen = uploads.clone();
        let config = configure(ServerConfig::new()).port(0).upload_dir(dir.path());
        let server = Server::new(config, move |file: &UploadedFile| {
            seen.lock().unwrap().push(file.clone())
        });
        server.start().await;
        assert!(server.is_running());
        let port = server.local_addr().await.unwrap().port();

        Self {
            server,
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            uploads,
            dir,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn uploads(&self) -> Vec<UploadedFile> {
        self.uploads.lock().unwrap().clone()
    }

    /// Sends `request` verbatim and reads until the server closes.
    pub async fn raw(&self, request: &[u8]) -> Response {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).await.unwrap();
        Response::parse(&bytes)
    }

    pub async fn stop(self) {
        self.server.stop().await;
    }
}

#[derive(Debug)]
pub struct Response {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Response {
    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes).into_owned();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap().to_string();
        let headers = lines
            .filter_map(|line| line.split_once(": "))
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect();
        Self {
            status_line,
            headers,
            body: body.to_string(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub fn id3_payload(len: usize, fill: u8) -> Vec<u8> {
    let mut payload = b"ID3\x04\x00".to_vec();
    payload.resize(len, fill);
    payload
}

pub fn multipart_request(
    boundary: &str,
    filename: &str,
    content_type: &str,
    payload: &[u8],
) -> Vec<u8> {
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let mut request = format!(
        "POST / HTTP/1.1\r\nHost: localhost\r\n\
         Content-Type: multipart/form-data; boundary={boundary}\r\n\
         Content-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(&body);
    request
}
