use clap::Parser;
use config_hook::Error;
use config_hook::Result;
use config_hook::ServiceBuilder;
use config_hook::Settings;
use config_hook::TlsConfig;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

/// Keeps container config hooks in sync with the key/value store
#[derive(Debug, Parser)]
#[command(name = "config-hook", version)]
struct Cli {
    /// Override settings file, applied on top of CONFIG_PATH and the environment
    #[arg(long)]
    config: Option<String>,

    /// Environment variable prefix marking config hooks
    #[arg(long)]
    prefix: Option<String>,

    /// Path of the docker unix socket
    #[arg(long)]
    docker: Option<String>,

    /// Store location, e.g. etcd://127.0.0.1:4001,127.0.0.1:4002
    #[arg(long)]
    store: Option<String>,

    /// Discovery location, e.g. consul://127.0.0.1:8500
    #[arg(long)]
    discovery: Option<String>,

    /// Client certificate for the etcd connection
    #[arg(long)]
    etcd_cert: Option<String>,

    /// Client key for the etcd connection
    #[arg(long)]
    etcd_keycert: Option<String>,

    /// CA certificate for the etcd connection
    #[arg(long)]
    etcd_cacert: Option<String>,
}

impl Cli {
    /// Layers the flags over the loaded settings; flags win
    fn apply(
        self,
        mut settings: Settings,
    ) -> Result<Settings> {
        if let Some(path) = self.config.as_deref() {
            info!("with_override_config from: {}", path);
            settings = settings.with_override_config(path)?;
        }
        if let Some(prefix) = self.prefix {
            settings.hook.prefix = prefix;
        }
        if let Some(socket) = self.docker {
            settings.docker.socket = socket;
        }
        if let Some(url) = self.store {
            settings.store.url = url;
        }
        if let Some(url) = self.discovery {
            settings.discovery.url = Some(url);
        }
        apply_tls(&mut settings.store.tls, self.etcd_cert, self.etcd_keycert, self.etcd_cacert);
        Ok(settings)
    }
}

fn apply_tls(
    tls: &mut TlsConfig,
    cert_file: Option<String>,
    key_file: Option<String>,
    cacert_file: Option<String>,
) {
    if let Some(path) = cert_file {
        tls.cert_file = Some(path);
    }
    if let Some(path) = key_file {
        tls.key_file = Some(path);
    }
    if let Some(path) = cacert_file {
        tls.cacert_file = Some(path);
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initializing Logs
    let _guard = init_observability();

    let settings = cli.apply(Settings::new()?)?.validate()?;

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    let dispatcher = ServiceBuilder::init(settings, graceful_rx.clone())
        .build()?
        .start_metrics_server(graceful_rx.clone())
        .ready()?;

    info!("config hook service started. Waiting for shutdown signal...");
    // Listen on Shutdown Signal
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    if let Err(e) = dispatcher.run().await {
        error!("dispatcher stops: {:?}", e);
        return Err(e);
    }

    info!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::SignalSenderClosed(format!("Failed to send shutdown signal: {}", e))
    })?;

    info!("Shutdown completed");
    Ok(())
}

/// Logs to stdout through a non-blocking writer, `RUST_LOG` filtered
/// (default `info`). The guard must live as long as the process.
fn init_observability() -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(filter);
    tracing_subscriber::registry().with(base_subscriber).init();

    guard
}
