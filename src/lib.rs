use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

pub mod connection;
pub mod error;
pub mod helpers;
pub mod net;
pub mod upload;

pub use error::{MultipartError, RequestError, UploadError};
pub use helpers::traits::http_request::{
    extract_multipart, BoundaryForm, MultipartPart, RequestUtils,
};
pub use helpers::traits::http_response::{
    render_cors_preflight, render_error, render_success, render_upload_page, ResponseUtil,
};
pub use helpers::traits::http_stream::StreamHttp;
pub use upload::{UploadHandler, UploadResult, UploadSink, UploadedFile};

pub mod external {
    pub use async_trait;
    pub use http;
    pub use mime_guess;
    pub use tokio;
}

pub type SendableError = Box<dyn std::error::Error + Send + Sync>;

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * KIB;

/// Tunables for one server instance. Cloned into every connection task and
/// never mutated once the server is started.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub no_delay: bool,
    pub listen_backlog: i32,
    /// Requested `SO_RCVBUF` for the listener and each accepted socket.
    pub recv_buffer_size: usize,
    /// Upper bound for a single receive before the connection is dropped.
    pub read_timeout: Duration,
    pub header_chunk_size: usize,
    pub body_chunk_size: usize,
    /// Consecutive "no data yet" reads tolerated before giving up on a body.
    pub read_max_retry: u8,
    pub read_retry_delay: Duration,
    /// Ceiling on accumulated request body bytes, regardless of `Content-Length`.
    pub max_body_size: usize,
    pub min_upload_size: usize,
    pub max_upload_size: usize,
    pub max_filename_length: usize,
    pub progress_log_interval: Duration,
    pub upload_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            no_delay: true,
            listen_backlog: 5,
            recv_buffer_size: 16 * MIB,
            read_timeout: Duration::from_secs(1800),
            header_chunk_size: 16 * KIB,
            body_chunk_size: 64 * KIB,
            read_max_retry: 10,
            read_retry_delay: Duration::from_millis(100),
            max_body_size: 100 * MIB,
            min_upload_size: KIB,
            max_upload_size: 500 * MIB,
            max_filename_length: 100,
            progress_log_interval: Duration::from_millis(500),
            upload_dir: std::env::temp_dir(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn upload_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.upload_dir = dir.into();
        self
    }

    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub fn read_timeout_secs(mut self, secs: u64) -> Self {
        self.read_timeout = Duration::from_secs(secs);
        self
    }

    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn max_upload_size(mut self, size: usize) -> Self {
        self.max_upload_size = size;
        self
    }

    pub fn max_filename_length(mut self, len: usize) -> Self {
        self.max_filename_length = len;
        self
    }

    pub fn read_max_retry(mut self, retries: u8, delay: Duration) -> Self {
        self.read_max_retry = retries;
        self.read_retry_delay = delay;
        self
    }
}

/// One HTTP request as read off the wire.
///
/// Header names keep the case the client sent; use [`ParsedRequest::header`]
/// for case-insensitive lookups.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: http::Method,
    pub path: String,
    pub version: http::Version,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub declared_content_length: usize,
}

impl ParsedRequest {
    /// Stand-in used when the header block cannot be decoded at all.
    pub fn fallback(body: Vec<u8>) -> Self {
        Self {
            method: http::Method::GET,
            path: "/".into(),
            version: http::Version::HTTP_11,
            headers: HashMap::new(),
            body,
            declared_content_length: 0,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_chunked(&self) -> bool {
        self.header("Transfer-Encoding")
            .map(|value| value.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }
}

struct RunningListener {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ServerState {
    advertised_address: String,
    local_addr: Option<SocketAddr>,
    running_listener: Option<RunningListener>,
}

/// LAN upload receiver.
///
/// `start` binds the listening socket and spawns the accept loop; every
/// accepted connection is served on its own task and closed after a single
/// response.
pub struct Server {
    config: Arc<ServerConfig>,
    sink: Arc<UploadSink>,
    running: Arc<AtomicBool>,
    state: Mutex<ServerState>,
}

impl Server {
    pub fn new<H>(config: ServerConfig, handler: H) -> Self
    where
        H: UploadHandler + 'static,
    {
        Self::with_handler(config, Arc::new(handler))
    }

    pub fn with_handler(config: ServerConfig, handler: Arc<dyn UploadHandler>) -> Self {
        let config = Arc::new(config);
        Self {
            sink: Arc::new(UploadSink::new(config.clone(), handler)),
            config,
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(ServerState::default()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Binds `0.0.0.0:port` and starts accepting.
    ///
    /// Always returns a displayable `http://ip:port` address, even when the
    /// socket could not be bound; check [`Server::is_running`] for the outcome.
    pub async fn start(&self) -> String {
        let mut state = self.state.lock().await;
        if self.is_running() {
            tracing::warn!(address = %state.advertised_address, "server already running");
            return state.advertised_address.clone();
        }

        let ip = net::advertised_ip();
        let listener = net::bind_listener(&self.config).and_then(TcpListener::from_std);

        let port = match listener {
            Ok(listener) => {
                let local_addr = listener.local_addr().ok();
                let port = local_addr.map(|addr| addr.port()).unwrap_or(self.config.port);
                state.local_addr = local_addr;

                let shutdown = Arc::new(Notify::new());
                self.running.store(true, Ordering::SeqCst);
                let task = tokio::spawn(accept_loop(
                    listener,
                    self.config.clone(),
                    self.sink.clone(),
                    self.running.clone(),
                    shutdown.clone(),
                ));
                state.running_listener = Some(RunningListener { shutdown, task });
                tracing::info!(%ip, port, "upload server started");
                port
            }
            Err(e) => {
                tracing::error!(
                    port = self.config.port,
                    error = %e,
                    "failed to start upload server"
                );
                self.config.port
            }
        };

        state.advertised_address = format!("http://{}:{}", ip, port);
        state.advertised_address.clone()
    }

    /// Closes the listening socket. Connections already accepted keep running.
    pub async fn stop(&self) {
        let running_listener = {
            let mut state = self.state.lock().await;
            state.local_addr = None;
            state.running_listener.take()
        };
        self.running.store(false, Ordering::SeqCst);

        if let Some(RunningListener { shutdown, task }) = running_listener {
            shutdown.notify_one();
            if let Err(e) = task.await {
                tracing::error!(error = %e, "accept loop ended abnormally");
            }
            tracing::info!("upload server stopped");
        }
    }

    pub async fn advertised_address(&self) -> String {
        self.state.lock().await.advertised_address.clone()
    }

    /// Address the listener is actually bound to while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.local_addr
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    sink: Arc<UploadSink>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            accepted = listener.accept() => match accepted {
                Ok((tcp_stream, peer)) => {
                    tracing::debug!(%peer, "connection accepted");
                    let accept = Accept::new(tcp_stream, peer, config.clone(), sink.clone());
                    tokio::spawn(accept.handle());
                }
                Err(e) if is_connection_error(&e) => {
                    tracing::debug!(error = %e, "connection dropped before accept");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
    running.store(false, Ordering::SeqCst);
}

/// An accepted connection, owned by exactly one handler task.
pub struct Accept {
    pub tcp_stream: TcpStream,
    pub peer: SocketAddr,
    pub config: Arc<ServerConfig>,
    pub sink: Arc<UploadSink>,
}

impl Accept {
    pub fn new(
        tcp_stream: TcpStream,
        peer: SocketAddr,
        config: Arc<ServerConfig>,
        sink: Arc<UploadSink>,
    ) -> Self {
        Self {
            tcp_stream,
            peer,
            config,
            sink,
        }
    }
}

fn is_connection_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}
