use anyhow::Context;
use clap::{Parser, Subcommand};
use libris_app::services;
use libris_kernel::settings::Settings;

/// Library catalog services.
#[derive(Parser, Debug)]
#[command(name = "libris")]
#[command(about = "Library catalog core and search services")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Serve the core API (books, authors, creation events)
    Core {
        /// Listen port, overriding configuration
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Serve the search API and run the index consumer
    Search {
        /// Listen port, overriding configuration
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Rebuild the search indices from the core API and exit
    Reindex,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load().with_context(|| "failed to load libris settings")?;
    libris_telemetry::init(&settings.telemetry);

    settings.server.port = listen_port(&cli.command, &settings);

    match cli.command {
        Command::Core { .. } => {
            let service = services::core_service(&settings).await?;
            services::run(service, &settings, shutdown_signal()).await
        }
        Command::Search { .. } => {
            let service = services::search_service(&settings)?;
            services::run(service, &settings, shutdown_signal()).await
        }
        Command::Reindex => {
            let report = services::reindex_once(&settings).await?;
            tracing::info!(books = report.books, authors = report.authors, "reindex finished");
            Ok(())
        }
    }
}

/// `--port` wins; otherwise each service listens on its configured port.
fn listen_port(command: &Command, settings: &Settings) -> u16 {
    match command {
        Command::Core { port } => port.unwrap_or(settings.server.port),
        Command::Search { port } => port.unwrap_or(settings.server.search_port),
        Command::Reindex => settings.server.port,
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_subcommands() {
        let cli = Cli::try_parse_from(["libris", "core"]).unwrap();
        assert_eq!(cli.command, Command::Core { port: None });

        let cli = Cli::try_parse_from(["libris", "search", "--port", "8001"]).unwrap();
        assert_eq!(cli.command, Command::Search { port: Some(8001) });

        let cli = Cli::try_parse_from(["libris", "reindex"]).unwrap();
        assert_eq!(cli.command, Command::Reindex);
    }

    #[test]
    fn rejects_missing_or_unknown_subcommand() {
        assert!(Cli::try_parse_from(["libris"]).is_err());
        assert!(Cli::try_parse_from(["libris", "frontend"]).is_err());
        assert!(Cli::try_parse_from(["libris", "core", "--port", "http"]).is_err());
    }

    #[test]
    fn listen_port_follows_the_subcommand() {
        let settings = Settings::default();

        assert_eq!(listen_port(&Command::Core { port: None }, &settings), 8000);
        assert_eq!(listen_port(&Command::Search { port: None }, &settings), 8001);
        assert_eq!(
            listen_port(&Command::Search { port: Some(9100) }, &settings),
            9100
        );
    }
}
