use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use lib_netify::ingest::decoder::CONTROL_PREFIX;
use rand::Rng;
use serde_json::json;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::time::sleep;

const PROTOCOLS: &[(i64, &str)] = &[(91, "TLS"), (7, "HTTP"), (5, "DNS"), (188, "QUIC")];
const APPLICATIONS: &[(i64, &str)] = &[
    (10, "netify.google"),
    (119, "netify.youtube"),
    (142, "netify.netflix"),
    (196, "netify.github"),
];

#[derive(Parser, Debug)]
#[clap(author, version, about = "Simulates Netify agents pushing telemetry to server_netify", long_about = None)]
struct Args {
    /// Server host
    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[clap(short, long, default_value_t = 7150)]
    port: u16,

    /// Number of concurrent agent connections
    #[clap(short, long, default_value_t = 4)]
    agents: u32,

    /// Flow lines sent by each agent
    #[clap(short, long, default_value_t = 1000)]
    flows: u64,

    /// Distinct device MACs per agent
    #[clap(long, default_value_t = 16)]
    devices: u32,

    /// Send one stats line after every N flows (0 disables)
    #[clap(long, default_value_t = 100)]
    stats_every: u64,

    /// Router identifier prefix; agent i declares `<prefix>-<i>`
    #[clap(long, default_value = "sim-router")]
    router_prefix: String,

    /// Skip the ROUTER_ID handshake so the server falls back to its mappings
    #[clap(long)]
    no_handshake: bool,

    /// Per-agent line rate limit in lines/second (0 = unlimited)
    #[clap(long, default_value_t = 0)]
    rate: u64,

    /// Report interval in seconds
    #[clap(short, long, default_value_t = 5)]
    report_interval_secs: u64,
}

#[derive(Default)]
struct Totals {
    lines: AtomicU64,
    bytes: AtomicU64,
    finished_agents: AtomicU64,
}

fn device_mac(agent: u32, device: u32) -> String {
    format!("02:00:{:02x}:{:02x}:{:02x}:{:02x}", (agent >> 8) & 0xff, agent & 0xff, (device >> 8) & 0xff, device & 0xff)
}

fn flow_line(agent: u32, devices: u32) -> String {
    let mut rng = rand::rng();
    let (proto_id, proto_name) = PROTOCOLS[rng.random_range(0..PROTOCOLS.len())];
    let (app_id, app_name) = APPLICATIONS[rng.random_range(0..APPLICATIONS.len())];
    let now_ms = Utc::now().timestamp_millis();
    let mut flow = json!({
        "first_seen_at": now_ms - rng.random_range(0..60_000),
        "last_seen_at": now_ms,
        "ip_version": 4,
        "ip_protocol": if proto_name == "DNS" || proto_name == "QUIC" { 17 } else { 6 },
        "ip_nat": rng.random_bool(0.5),
        "local_ip": format!("10.{}.{}.{}", agent % 256, rng.random_range(0..=255u8), rng.random_range(1..=254u8)),
        "local_port": rng.random_range(1024..=65535u16),
        "local_mac": device_mac(agent, rng.random_range(0..devices.max(1))),
        "local_origin": true,
        "other_ip": format!("{}.{}.{}.{}", rng.random_range(1..=223u8), rng.random::<u8>(), rng.random::<u8>(), rng.random_range(1..=254u8)),
        "other_port": if proto_name == "DNS" { 53 } else { 443 },
        "other_type": "remote",
        "detected_protocol": proto_id,
        "detected_protocol_name": proto_name,
        "detected_application": app_id,
        "detected_application_name": app_name,
        "detection_guessed": false,
        "host_server_name": app_name.trim_start_matches("netify.").to_string() + ".example",
    });
    if proto_name == "TLS" {
        flow["ssl"] = json!({
            "version": "0x0303",
            "cipher_suite": "0x1301",
            "client_sni": flow["host_server_name"].clone(),
            "client_ja3": format!("{:032x}", rng.random::<u128>()),
        });
    } else if proto_name == "HTTP" {
        flow["http"] = json!({
            "method": "GET",
            "url": "/",
            "user_agent": "netify-sim/1.0",
            "status_code": 200,
        });
    }
    json!({ "type": "flow", "interface": "eth0", "flow": flow }).to_string()
}

fn stats_line(agent: u32, sent: u64) -> String {
    json!({
        "type": "stats",
        "scope": "interface",
        "agent": agent,
        "eth0": { "flows": sent, "ts": Utc::now().timestamp_millis() },
    })
    .to_string()
}

async fn send_line(writer: &mut BufWriter<TcpStream>, totals: &Totals, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    totals.lines.fetch_add(1, Ordering::Relaxed);
    totals.bytes.fetch_add(line.len() as u64 + 1, Ordering::Relaxed);
    Ok(())
}

async fn run_agent(agent: u32, args: Arc<Args>, totals: Arc<Totals>) -> Result<()> {
    let addr = format!("{}:{}", args.host, args.port);
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("Agent {} failed to connect to {}", agent, addr))?;
    stream.set_nodelay(true)?;
    let mut writer = BufWriter::new(stream);

    if !args.no_handshake {
        let mut handshake = String::from_utf8_lossy(CONTROL_PREFIX).into_owned();
        handshake.push_str(&format!("{}-{}", args.router_prefix, agent));
        send_line(&mut writer, &totals, &handshake).await?;
    }

    let pause = (args.rate > 0).then(|| Duration::from_secs_f64(1.0 / args.rate as f64));
    for seq in 1..=args.flows {
        send_line(&mut writer, &totals, &flow_line(agent, args.devices)).await?;
        if args.stats_every > 0 && seq % args.stats_every == 0 {
            send_line(&mut writer, &totals, &stats_line(agent, seq)).await?;
        }
        if let Some(pause) = pause {
            sleep(pause).await;
        }
    }

    writer.flush().await?;
    writer.shutdown().await?;
    totals.finished_agents.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Arc::new(Args::parse());
    let totals = Arc::new(Totals::default());
    let started = Instant::now();

    // Reporter task
    let totals_reporter = Arc::clone(&totals);
    let report_every = Duration::from_secs(args.report_interval_secs.max(1));
    let reporter = tokio::spawn(async move {
        let mut last_lines = 0u64;
        loop {
            sleep(report_every).await;
            let lines = totals_reporter.lines.load(Ordering::Relaxed);
            let bytes = totals_reporter.bytes.load(Ordering::Relaxed);
            println!(
                "[{}] lines={} (+{} / {:.0} lines/s) bytes={} agents_done={}",
                Utc::now().format("%H:%M:%S"),
                lines,
                lines - last_lines,
                (lines - last_lines) as f64 / report_every.as_secs_f64(),
                bytes,
                totals_reporter.finished_agents.load(Ordering::Relaxed),
            );
            last_lines = lines;
        }
    });

    println!(
        "Starting {} agents against {}:{} ({} flows each)...",
        args.agents, args.host, args.port, args.flows
    );
    let handles: Vec<_> = (0..args.agents)
        .map(|agent| tokio::spawn(run_agent(agent, args.clone(), totals.clone())))
        .collect();

    let mut failed = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failed += 1;
                eprintln!("Agent error: {:#}", e);
            }
            Err(e) => {
                failed += 1;
                eprintln!("Agent task panicked: {}", e);
            }
        }
    }
    reporter.abort();

    let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
    let lines = totals.lines.load(Ordering::Relaxed);
    let bytes = totals.bytes.load(Ordering::Relaxed);
    println!("\n----- Feed Summary -----");
    println!("Agents: {} ok, {} failed", args.agents as u64 - failed, failed);
    println!("Lines sent: {} in {:.2}s ({:.0} lines/s)", lines, elapsed, lines as f64 / elapsed);
    println!("Bytes sent: {} ({:.2} MiB/s)", bytes, bytes as f64 / elapsed / (1024.0 * 1024.0));
    println!("------------------------\n");

    if failed > 0 {
        anyhow::bail!("{} agent(s) failed", failed);
    }
    Ok(())
}
