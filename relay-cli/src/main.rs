//! adsb-relay: producer relay, consumer client, and KML snapshot server.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use relay_core::config::{self, Config};
use relay_core::field::FieldRecord;
use relay_core::tracker::TrackTable;
use relay_core::types::{icao_to_string, unix_now};
use relay_core::wire;
use relay_net::{RelayClient, RelayServer};

mod web;

#[derive(Parser)]
#[command(name = "adsb-relay", version, about = "ADS-B track relay")]
struct Cli {
    /// Config file (default: ~/.adsb-relay/config.yaml)
    #[arg(long, global = true, env = "ADSB_RELAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read decoded field records (JSON lines) from stdin and relay track updates
    Serve {
        /// Address to accept consumers on
        #[arg(long, env = "ADSB_RELAY_HOST")]
        host: Option<String>,

        /// Port to accept consumers on
        #[arg(long, env = "ADSB_RELAY_PORT")]
        port: Option<u16>,

        /// Maximum number of tracked aircraft
        #[arg(long, env = "ADSB_RELAY_CAPACITY")]
        capacity: Option<usize>,

        /// Milliseconds between accept polls
        #[arg(long)]
        accept_interval_ms: Option<u64>,
    },

    /// Connect to a relay, keep a live track table, and serve it as KML
    Listen {
        /// Relay server as host:port
        #[arg(long, env = "ADSB_RELAY_SERVER")]
        server: Option<String>,

        /// Address for the snapshot HTTP server
        #[arg(long)]
        http_host: Option<String>,

        /// Port for the snapshot HTTP server
        #[arg(long, env = "ADSB_RELAY_HTTP_PORT")]
        http_port: Option<u16>,

        /// Drop aircraft not heard from for this many seconds
        #[arg(long)]
        staleness_secs: Option<f64>,

        /// Seconds between stale-aircraft sweeps
        #[arg(long)]
        cull_interval_secs: Option<f64>,
    },

    /// Show the effective configuration, or write the defaults with --init
    Config {
        /// Write a default config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };

    let result = match cli.command {
        Commands::Serve {
            host,
            port,
            capacity,
            accept_interval_ms,
        } => {
            let mut config = config;
            let s = &mut config.server;
            if let Some(h) = host {
                s.host = h;
            }
            if let Some(p) = port {
                s.port = p;
            }
            if let Some(c) = capacity {
                s.capacity = c;
            }
            if let Some(ms) = accept_interval_ms {
                s.accept_interval = Duration::from_millis(ms);
            }
            cmd_serve(&config).await
        }
        Commands::Listen {
            server,
            http_host,
            http_port,
            staleness_secs,
            cull_interval_secs,
        } => {
            let mut config = config;
            let c = &mut config.client;
            if let Some(server) = server {
                match parse_server(&server) {
                    Some((host, port)) => {
                        c.host = host;
                        c.port = port;
                    }
                    None => {
                        eprintln!("Error: --server must be host:port, got {server:?}");
                        std::process::exit(1);
                    }
                }
            }
            if let Some(h) = http_host {
                c.http_host = h;
            }
            if let Some(p) = http_port {
                c.http_port = p;
            }
            if let Some(secs) = staleness_secs.and_then(seconds) {
                c.staleness_window = secs;
            }
            if let Some(secs) = cull_interval_secs.and_then(seconds) {
                c.cull_interval = secs;
            }
            cmd_listen(&config).await
        }
        Commands::Config { init } => cmd_config(&cli.config, &config, init),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Split `host:port`, taking the last colon so bare IPv6 hosts still parse.
fn parse_server(s: &str) -> Option<(String, u16)> {
    let (host, port) = s.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}

fn seconds(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct IngestStats {
    lines: u64,
    relayed: u64,
    skipped: u64,
    decode_errors: u64,
}

async fn cmd_serve(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = RelayServer::bind(&config.server).await?;
    let mut table = TrackTable::new(config.server.capacity);
    let mut stats = IngestStats::default();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted, shutting down");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("end of input");
                break;
            }
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.lines += 1;

        let record: FieldRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                stats.decode_errors += 1;
                warn!(error = %e, "unparseable field record");
                continue;
            }
        };

        match table.ingest(&record, unix_now()) {
            Ok(Some(update)) => {
                debug!(icao = %icao_to_string(&update.icao), kind = %update.kind(), "relaying update");
                server.publish(wire::encode(&update)).await?;
                stats.relayed += 1;
            }
            Ok(None) => stats.skipped += 1,
            Err(e) => {
                stats.decode_errors += 1;
                warn!(df = record.df, address = record.address, error = %e, "rejected field record");
            }
        }
    }

    let consumers = server.consumer_count();
    server.shutdown().await;
    print_serve_summary(&stats, &table, consumers);
    Ok(())
}

fn print_serve_summary(stats: &IngestStats, table: &TrackTable, consumers: usize) {
    println!();
    println!(
        "Records: {} read, {} relayed, {} incomplete, {} decode errors",
        stats.lines, stats.relayed, stats.skipped, stats.decode_errors
    );
    println!(
        "Aircraft: {} tracked (capacity {}), {} consumers at exit",
        table.len(),
        table.capacity(),
        consumers
    );

    if table.is_empty() {
        return;
    }

    println!();
    let mut out = Table::new();
    out.set_header(vec![
        "ICAO", "Seq", "Flight", "Squawk", "Alt", "Speed", "Hdg", "VRate", "Lat", "Lon",
    ]);

    let mut sorted: Vec<_> = table.iter().collect();
    sorted.sort_by_key(|(_, t)| t.sequence_id);

    let fmt = |v: Option<f64>, digits: usize| {
        v.map(|x| format!("{x:.digits$}")).unwrap_or("-".into())
    };
    for (icao, t) in sorted {
        out.add_row(vec![
            Cell::new(icao_to_string(icao)),
            Cell::new(t.sequence_id),
            Cell::new(t.flight_id.as_deref().unwrap_or("-")),
            Cell::new(
                t.squawk
                    .map(|s| format!("{s:04}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(fmt(t.altitude, 0)),
            Cell::new(fmt(t.velocity, 0)),
            Cell::new(fmt(t.heading, 1)),
            Cell::new(fmt(t.vertical_rate, 0)),
            Cell::new(fmt(t.latitude, 4)),
            Cell::new(fmt(t.longitude, 4)),
        ]);
    }
    println!("{out}");
}

// ---------------------------------------------------------------------------
// listen
// ---------------------------------------------------------------------------

async fn cmd_listen(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let c = &config.client;
    info!(
        server = %format!("{}:{}", c.host, c.port),
        staleness_secs = c.staleness_window.as_secs_f64(),
        "starting relay client"
    );
    let client = RelayClient::start(c);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let http = web::serve(client.handle().clone(), &c.http_host, c.http_port, async move {
        let _ = stop_rx.await;
    });
    tokio::pin!(http);

    let outcome = tokio::select! {
        r = &mut http => r,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            let _ = stop_tx.send(());
            http.await
        }
    };

    let stats = client.handle().stats();
    let tracks = client.handle().track_count();
    client.shutdown().await;
    info!(
        tracks,
        records_applied = stats.records_applied,
        protocol_errors = stats.protocol_errors,
        connects = stats.connects,
        culled = stats.culled,
        "relay client stopped"
    );

    outcome?;
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config(
    path: &Option<PathBuf>,
    config: &Config,
    init: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !init {
        print!("{}", config::serialize_config(config));
        return Ok(());
    }

    let defaults = Config::default();
    let written = match path {
        Some(p) => {
            config::save_config_to(&defaults, p)?;
            p.clone()
        }
        None => config::save_config(&defaults)?,
    };
    println!("Wrote default config to {}", written.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server() {
        assert_eq!(parse_server("relay.local:30005"), Some(("relay.local".into(), 30005)));
        assert_eq!(parse_server("[::1]:1234"), Some(("::1".into(), 1234)));
        assert_eq!(parse_server("relay.local"), None);
        assert_eq!(parse_server(":1234"), None);
        assert_eq!(parse_server("host:notaport"), None);
    }

    #[test]
    fn test_seconds_rejects_negative() {
        assert_eq!(seconds(1.5), Some(Duration::from_millis(1500)));
        assert_eq!(seconds(-1.0), None);
        assert_eq!(seconds(f64::NAN), None);
        assert_eq!(seconds(1e20), None);
    }

    #[test]
    fn test_cli_parses_listen_flags() {
        let cli = Cli::try_parse_from([
            "adsb-relay",
            "listen",
            "--server",
            "10.0.0.2:4000",
            "--http-port",
            "9000",
            "--staleness-secs",
            "60",
        ])
        .unwrap();
        match cli.command {
            Commands::Listen {
                server,
                http_port,
                staleness_secs,
                ..
            } => {
                assert_eq!(server.as_deref(), Some("10.0.0.2:4000"));
                assert_eq!(http_port, Some(9000));
                assert_eq!(staleness_secs, Some(60.0));
            }
            _ => panic!("expected listen"),
        }
    }
}
