use clap::{Parser, Subcommand};
use routelet::capture::AfPacketSocket;
use routelet::config;
use routelet::dataplane::{Frame, ForwardingEngine, Interface, InterfaceTable, RoutingTable};
use routelet::telemetry::{init_logging, LogConfig, MetricsRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "routelet")]
#[command(about = "A software IPv4 router")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the router
    Run {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Validate the configuration and route table without binding sockets
    Check {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config } => cmd_run(&config),
        Commands::Check { config } => cmd_check(&config),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

struct Port {
    socket: AfPacketSocket,
    buf: Vec<u8>,
}

fn cmd_run(config_path: &Path) -> Result<(), String> {
    let cfg = config::load(config_path).map_err(|e| e.to_string())?;
    init_logging(Some(&LogConfig {
        level: cfg.log.level.clone(),
        format: cfg.log.format.clone(),
    }));

    let parsed = cfg.parse_interfaces().map_err(|e| e.to_string())?;
    let entries = config::load_routes(&cfg.routes).map_err(|e| e.to_string())?;
    for entry in &entries {
        if entry.if_id >= parsed.len() {
            return Err(format!(
                "route {}/{} references unknown interface id {}",
                entry.prefix, entry.mask, entry.if_id
            ));
        }
    }

    let rt = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
    rt.block_on(async move {
        let mut interfaces = Vec::new();
        let mut ports = Vec::new();

        for iface in &parsed {
            let mac = match iface.mac {
                Some(m) => m,
                None => config::read_interface_mac(&iface.name).map_err(|e| e.to_string())?,
            };
            let socket = AfPacketSocket::bind(&iface.name).map_err(|e| {
                format!(
                    "failed to bind to {}: {}. Run with root privileges.",
                    iface.name, e
                )
            })?;
            info!(name = %iface.name, %mac, ip = %iface.ip, "interface up");

            interfaces.push(Interface {
                name: iface.name.clone(),
                mac,
                ip: iface.ip,
                prefix_len: iface.prefix_len,
            });
            ports.push(Port {
                socket,
                buf: vec![0u8; 2048],
            });
        }

        let routes = RoutingTable::from_entries(entries);
        info!(
            interfaces = interfaces.len(),
            routes = routes.len(),
            "routelet started, processing frames"
        );

        let metrics = Arc::new(MetricsRegistry::new());
        let mut engine =
            ForwardingEngine::new(InterfaceTable::new(interfaces), routes, metrics.clone());

        loop {
            let (if_id, result) = tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    break;
                }
                received = recv_any(&mut ports) => received,
            };

            match result {
                Ok(len) => {
                    let frame = Frame {
                        if_id,
                        data: ports[if_id].buf[..len].to_vec(),
                    };
                    let (_, to_send) = engine.process(frame);
                    for out in to_send {
                        match ports.get_mut(out.if_id) {
                            Some(port) => {
                                if let Err(e) = port.socket.send(&out.data).await {
                                    warn!(if_id = out.if_id, "send failed: {}", e);
                                }
                            }
                            None => warn!(if_id = out.if_id, "no port for interface"),
                        }
                    }
                }
                Err(e) => error!(if_id, "receive error: {}", e),
            }
        }

        for (name, value) in metrics.export() {
            info!("{} = {}", name, value);
        }
        Ok(())
    })
}

/// Wait for a frame on any port, returning the port index and receive result
async fn recv_any(ports: &mut [Port]) -> (usize, routelet::Result<usize>) {
    let futures: Vec<_> = ports
        .iter_mut()
        .enumerate()
        .map(|(i, port)| {
            let Port { socket, buf } = port;
            Box::pin(async move { (i, socket.recv(buf).await) })
        })
        .collect();

    let (result, _, _) = futures::future::select_all(futures).await;
    result
}

fn cmd_check(config_path: &Path) -> Result<(), String> {
    init_logging(None);
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| e.to_string())?;
    let parsed = cfg.parse_interfaces().map_err(|e| e.to_string())?;
    let entries = config::load_routes(&cfg.routes).map_err(|e| e.to_string())?;

    for entry in &entries {
        if entry.if_id >= parsed.len() {
            return Err(format!(
                "route {}/{} references unknown interface id {}",
                entry.prefix, entry.mask, entry.if_id
            ));
        }
    }

    let table = RoutingTable::from_entries(entries);
    println!(
        "[INFO] {} interfaces, {} routes",
        parsed.len(),
        table.len()
    );
    println!("[INFO] Configuration is valid");
    Ok(())
}
