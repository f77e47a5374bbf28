//! Per-connection request handling: one request, one response, then close.

use http::Method;

use crate::helpers::traits::http_request::RequestUtils;
use crate::helpers::traits::http_response::{
    render_cors_preflight, render_error, render_success, render_upload_page, send_bytes,
};
use crate::helpers::traits::http_stream::StreamHttp;
use crate::net::configure_connection;
use crate::upload::UploadSink;
use crate::{Accept, ParsedRequest};

impl Accept {
    /// Serves a single request. The socket is closed when this returns,
    /// whichever branch produced the response.
    pub async fn handle(self) {
        let Accept {
            tcp_stream,
            peer,
            config,
            sink,
        } = self;

        configure_connection(&tcp_stream, &config);

        let response = match tcp_stream.read_request(&config).await {
            Ok(request) => {
                tracing::info!(
                    %peer,
                    method = %request.method,
                    path = %request.path,
                    body = request.body.len(),
                    "request received"
                );
                dispatch(request, &sink).await
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "unreadable request");
                render_error(&format!("bad request: {}", e))
            }
        };

        match send_bytes(&tcp_stream, &response).await {
            Ok(sent) => tracing::debug!(%peer, sent, "response sent"),
            Err(e) => tracing::warn!(%peer, error = %e, "failed to send response"),
        }
    }
}

pub async fn dispatch(request: ParsedRequest, sink: &UploadSink) -> Vec<u8> {
    match request.method {
        Method::GET => render_upload_page(),
        Method::OPTIONS => render_cors_preflight(),
        Method::POST => handle_upload(request, sink).await,
        other => {
            tracing::warn!(method = %other, "unsupported method");
            render_error(&format!("unsupported method: {}", other))
        }
    }
}

async fn handle_upload(request: ParsedRequest, sink: &UploadSink) -> Vec<u8> {
    let part = match request.get_multi_part() {
        Ok(part) => part,
        Err(e) => {
            tracing::warn!(error = %e, "upload rejected before storage");
            return render_error(&e.to_string());
        }
    };
    drop(request);

    let result = sink.accept(part).await;
    if result.success {
        render_success(&result.filename, result.size_bytes)
    } else {
        render_error(&result.message)
    }
}
