use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lanseer_core::{AppConfig, LogFormat, LoggingConfig};
use lanseer_discovery::{
    DiscoveryEvent, DiscoveryEventKind, DiscoveryManager, MdnsSdStack, ServiceKey,
};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// lanseer - browse and advertise services on the local network over mDNS
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "LANSEER_CONFIG", default_value = "config/lanseer.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Browse for a service type and print every event as a JSON line
    Scan {
        /// Service type, e.g. _http._tcp
        #[arg(long = "type", default_value = "_http._tcp")]
        service_type: String,

        /// Discovery domain
        #[arg(long, default_value = "local")]
        domain: String,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<f64>,
    },

    /// Advertise a service until interrupted
    Publish {
        /// Service type, e.g. _http._tcp
        #[arg(long = "type")]
        service_type: String,

        /// Instance name
        #[arg(long)]
        name: String,

        /// Port the service listens on
        #[arg(long)]
        port: u16,

        /// Discovery domain
        #[arg(long, default_value = "local")]
        domain: String,

        /// TXT entry as key=value, may be repeated
        #[arg(long = "txt", value_parser = parse_txt)]
        txt: Vec<(String, String)>,
    },

    /// Browse and publish everything listed in the configuration file
    Run,
}

fn parse_txt(entry: &str) -> std::result::Result<(String, String), String> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", entry)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AppConfig::from_config_builder(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging);
    info!(app = %config.app.name, config = ?args.config, "Configuration loaded");

    let stack = Arc::new(MdnsSdStack::new().context("Failed to start mDNS stack")?);
    let manager = DiscoveryManager::start(stack, &config.discovery)
        .context("Failed to start discovery manager")?;
    let grace = Duration::from_secs(config.app.shutdown_timeout_secs);

    let outcome = match args.command {
        Command::Scan {
            service_type,
            domain,
            duration,
        } => scan(&manager, &service_type, &domain, duration).await,
        Command::Publish {
            service_type,
            name,
            port,
            domain,
            txt,
        } => {
            let metadata = txt
                .into_iter()
                .map(|(key, value)| (key, value.into_bytes()))
                .collect();
            publish(&manager, &service_type, &domain, &name, port, metadata, grace).await
        }
        Command::Run => run(&manager, &config, grace).await,
    };

    if let Err(e) = manager.shutdown().await {
        warn!(error = %e, "Discovery manager did not shut down cleanly");
    }

    outcome
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directives()));

    // Events go to stdout, logs to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(logging.file_line)
        .with_line_number(logging.file_line)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn scan(
    manager: &DiscoveryManager,
    service_type: &str,
    domain: &str,
    duration: Option<f64>,
) -> Result<()> {
    let limit = match duration {
        Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(secs) => bail!("--duration must be a positive number of seconds, got {}", secs),
        None => None,
    };

    manager.scan(service_type, domain)?;

    let until = async move {
        match limit {
            Some(limit) => {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => info!("Scan duration elapsed"),
                    _ = shutdown_signal() => {}
                }
            }
            None => shutdown_signal().await,
        }
    };
    print_events_until(manager, until).await?;

    manager.stop()?;
    Ok(())
}

async fn publish(
    manager: &DiscoveryManager,
    service_type: &str,
    domain: &str,
    name: &str,
    port: u16,
    metadata: HashMap<String, Vec<u8>>,
    grace: Duration,
) -> Result<()> {
    manager.register_service(service_type, domain, name, port, metadata)?;
    print_events_until(manager, shutdown_signal()).await?;

    manager.unregister_service(service_type, domain, name)?;
    let pending = HashSet::from([ServiceKey::new(service_type, domain, name)]);
    wait_for_withdrawal(manager, pending, grace).await
}

async fn run(manager: &DiscoveryManager, config: &AppConfig, grace: Duration) -> Result<()> {
    let discovery = &config.discovery;
    if discovery.browse.is_none() && discovery.services.is_empty() {
        bail!("Nothing to do: configure discovery.browse or discovery.services");
    }

    if let Some(ref browse) = discovery.browse {
        manager.scan(&browse.service_type, &browse.domain)?;
    }
    for service in &discovery.services {
        manager.register_definition(service)?;
    }

    print_events_until(manager, shutdown_signal()).await?;

    if discovery.browse.is_some() {
        manager.stop()?;
    }

    let mut pending = HashSet::new();
    for service in &discovery.services {
        manager.unregister_service(&service.service_type, &service.domain, &service.name)?;
        pending.insert(ServiceKey::new(
            &service.service_type,
            &service.domain,
            service.name.clone(),
        ));
    }
    wait_for_withdrawal(manager, pending, grace).await
}

/// Prints events as JSON lines until `until` completes
async fn print_events_until(manager: &DiscoveryManager, until: impl Future<Output = ()>) -> Result<()> {
    let events = manager.events();
    tokio::pin!(until);

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = event.context("Discovery event channel closed")?;
                print_event(&event)?;
            }
            _ = &mut until => return Ok(()),
        }
    }
}

/// Keeps printing events until every key in `pending` reports `ServiceStopped`
async fn wait_for_withdrawal(
    manager: &DiscoveryManager,
    mut pending: HashSet<ServiceKey>,
    grace: Duration,
) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let events = manager.events();
    let outcome = tokio::time::timeout(grace, async {
        while !pending.is_empty() {
            let event = events.recv().await.context("Discovery event channel closed")?;
            print_event(&event)?;
            if let DiscoveryEventKind::ServiceStopped { ref key } = event.kind {
                pending.remove(key);
            }
        }
        Ok::<_, anyhow::Error>(())
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(_) => {
            warn!(remaining = pending.len(), "Timed out waiting for services to be withdrawn");
            Ok(())
        }
    }
}

fn print_event(event: &DiscoveryEvent) -> Result<()> {
    let line = serde_json::to_string(event).context("Failed to serialize event")?;
    println!("{}", line);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl-C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_txt() {
        assert_eq!(
            parse_txt("path=/status").unwrap(),
            ("path".to_string(), "/status".to_string())
        );
        assert_eq!(parse_txt("flag=").unwrap(), ("flag".to_string(), String::new()));
        assert!(parse_txt("=value").is_err());
        assert!(parse_txt("novalue").is_err());
    }

    #[test]
    fn test_cli_parses_publish() {
        let args = Args::try_parse_from([
            "lanseer", "publish", "--type", "_http._tcp", "--name", "kiosk", "--port", "8080",
            "--txt", "path=/", "--txt", "v=1",
        ])
        .unwrap();

        match args.command {
            Command::Publish { port, txt, domain, .. } => {
                assert_eq!(port, 8080);
                assert_eq!(domain, "local");
                assert_eq!(txt.len(), 2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
