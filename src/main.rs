use clap::Parser;
use sapliy_listen::config::{Command, DebugCommand, DebugListenArgs, ListenArgs};
use sapliy_listen::http_server;
use sapliy_listen::poller::{EventPoller, HttpEventSource};
use sapliy_listen::render::{self, Console};
use sapliy_listen::{telemetry, Args, Config, ListenerSettings, PollerSettings};
use tokio_util::sync::CancellationToken;

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::debug!("received Ctrl+C"),
        _ = terminate => tracing::debug!("received SIGTERM"),
    }
    token.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init_telemetry()?;
    tracing::debug!("{:?}", args);

    let config = Config::load(args.config.as_deref())?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    match args.command {
        Command::Listen(listen) => run_listener(&config, &listen, shutdown).await,
        Command::Debug {
            command: DebugCommand::Listen(debug),
        } => run_poller(&config, &debug, shutdown).await,
    }
}

async fn run_listener(
    config: &Config,
    args: &ListenArgs,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let settings = ListenerSettings::new(config, args);
    let listener = http_server::bind(settings.port).await?;
    http_server::serve(listener, settings, Console::stdout(), shutdown).await?;
    Ok(())
}

async fn run_poller(
    config: &Config,
    args: &DebugListenArgs,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let settings = PollerSettings::new(config, args)?;
    let source = HttpEventSource::new(&settings)?;
    let console = Console::stdout();

    console.emit(&render::poller_banner(&settings.api_url));
    EventPoller::new(source, &settings, console.clone())
        .run(shutdown)
        .await;
    console.emit(&render::goodbye());
    Ok(())
}
