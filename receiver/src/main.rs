use std::path::PathBuf;

use atomic_upload::{SendableError, Server, ServerConfig, UploadedFile};
use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Receives audio files from browsers on the local network.
#[derive(Debug, Parser)]
#[command(name = "receiver", version)]
struct Args {
    #[arg(long, env = "UPLOAD_PORT", default_value_t = 8080)]
    port: u16,

    /// Where uploads are written. Defaults to the system temp directory.
    #[arg(long, env = "UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    /// Per-read timeout in seconds.
    #[arg(long, env = "UPLOAD_READ_TIMEOUT", default_value_t = 1800)]
    read_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), SendableError> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atomic_upload=info,receiver=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::new()
        .port(args.port)
        .read_timeout_secs(args.read_timeout);
    if let Some(dir) = args.upload_dir {
        config = config.upload_dir(dir);
    }

    let server = Server::new(config, |file: &UploadedFile| {
        tracing::info!(
            path = %file.path.display(),
            filename = %file.filename,
            size = file.size_bytes,
            mime = %file.mime_type,
            "upload ready for import"
        );
    });

    let address = server.start().await;
    if !server.is_running() {
        return Err(format!("could not listen on port {}", server.config().port).into());
    }
    println!("open {} in a browser on the same network", address);
    tracing::info!(
        upload_dir = %server.config().upload_dir.display(),
        "waiting for uploads"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.stop().await;
    Ok(())
}
