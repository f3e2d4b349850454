use cluster_discovery::config::{AppConfig, ConnectorConfig, DiscoveryConfig, ServerConfig};
use cluster_discovery::coordination::memory::InMemoryCoordinator;
use cluster_discovery::discovery::handlers::router;
use cluster_discovery::lifecycle::LifecycleEnvironment;
use cluster_discovery::participant::DiscoveryBundle;
use std::time::Duration;

const DEFAULT_COORDINATION_ADDRESS: &str = "127.0.0.1:2181";

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} --config <file.json>", program);
    eprintln!("       {} --cluster <name> --port <port> [--host <host>]", program);
    eprintln!("Example: {} --config node.json", program);
    eprintln!("Example: {} --cluster search --port 8080 --host 127.0.0.1", program);

    std::process::exit(1);
}

fn parse_args() -> anyhow::Result<AppConfig> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        usage(&args[0]);
    }

    let mut config_path: Option<String> = None;
    let mut cluster: Option<String> = None;
    let mut port: Option<u16> = None;
    let mut host: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match args[i].as_str() {
            "--config" => {
                config_path = value;
                i += 2;
            }
            "--cluster" => {
                cluster = value;
                i += 2;
            }
            "--port" => {
                port = value.map(|p| p.parse()).transpose()?;
                i += 2;
            }
            "--host" => {
                host = value;
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    if let Some(path) = config_path {
        return AppConfig::load(path);
    }

    match (cluster, port) {
        (Some(cluster_name), Some(port)) => Ok(AppConfig {
            discovery: DiscoveryConfig {
                coordination_address: DEFAULT_COORDINATION_ADDRESS.to_string(),
                cluster_name,
                resolve_timeout_ms: 2000,
            },
            server: ServerConfig {
                advertised_host: host,
                application_connectors: vec![ConnectorConfig::Http {
                    bind_host: Some("0.0.0.0".to_string()),
                    port,
                }],
            },
        }),
        _ => usage(&args[0]),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = parse_args()?;
    let address = config.discovery.coordination_address.clone();

    // 1. Embedded coordination service:
    let coordinator = InMemoryCoordinator::new(&address);
    coordinator.add_cluster(&config.discovery.cluster_name);
    tracing::info!("Embedded coordination service at {}", coordinator.address());

    // 2. Participant + spectator, managed by the lifecycle:
    let bundle = DiscoveryBundle::new(config.clone());
    let mut lifecycle = LifecycleEnvironment::new();

    let registrar = bundle.install(coordinator.client(&address), &mut lifecycle)?;
    let watcher = bundle.install_watcher(coordinator.client(&address), &mut lifecycle);

    lifecycle.start_all().await?;
    tracing::info!("Node registered as {}", registrar.instance_name());

    // 3. Stats reporter:
    let stats_watcher = watcher.clone();
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let services = stats_watcher.get_services();
            tracing::info!("Cluster stats: {} reachable services", services.len());
            for service in services {
                tracing::info!("  - {}", service);
            }
        }
    });

    // 4. HTTP server:
    let port = config.server.application_port()?;
    let bind_host = config
        .server
        .application_connectors
        .first()
        .and_then(|connector| connector.bind_host())
        .unwrap_or("0.0.0.0")
        .to_string();

    let listener = tokio::net::TcpListener::bind((bind_host.as_str(), port)).await?;
    tracing::info!("HTTP server listening on {}:{}", bind_host, port);
    tracing::info!("Press Ctrl+C to shutdown");

    let served = axum::serve(listener, router(watcher))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await;

    // 5. Shutdown:
    stats_handle.abort();
    lifecycle.stop_all().await?;
    served?;

    Ok(())
}
