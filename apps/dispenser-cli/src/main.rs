use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use device_agent::{Agent, AgentConfig, GatewayClient, MockHardware};
use device_registry::{DeviceId, DeviceSnapshot, HeartbeatReport, Params, StatusReport};
use serde_json::Value;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "dispenser",
    version,
    about = "Dispenser gateway CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Gateway base URL
    #[arg(
        long,
        global = true,
        env = "DISPENSER_BACKEND",
        default_value = "http://127.0.0.1:3000"
    )]
    backend: String,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value_t = 10)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue a command for a device (replaces any undelivered one)
    Send {
        device: DeviceId,
        /// unlock, lock, dispense, register_fingerprint or check_hand
        command: String,
        /// Motor to turn (dispense)
        #[arg(long, requires = "segment", conflicts_with = "params")]
        motor_id: Option<u64>,
        /// Carousel segment to bring to the outlet (dispense)
        #[arg(long, requires = "motor_id", conflicts_with = "params")]
        segment: Option<u64>,
        /// Raw params object as JSON
        #[arg(long)]
        params: Option<String>,
    },
    /// Show a device's pending command, last status and last heartbeat
    State {
        device: DeviceId,
        /// Print the raw JSON snapshot
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        /// Refresh every N seconds until Ctrl-C (5 when given without a value)
        #[arg(long, value_name = "SECS", num_args = 0..=1, default_missing_value = "5")]
        watch: Option<u64>,
    },
    /// Take the pending command as the device would (consumes it)
    Poll { device: DeviceId },
    /// Push a status report as the device
    Status {
        device: DeviceId,
        status_type: String,
        /// Data object as JSON
        #[arg(long)]
        data: Option<String>,
    },
    /// Push a heartbeat as the device
    Heartbeat {
        device: DeviceId,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        locked: Option<bool>,
        #[arg(long)]
        fingerprint_count: Option<u32>,
    },
    /// Run a simulated dispenser against the gateway until Ctrl-C
    Agent {
        device: DeviceId,
        /// Seconds between polls
        #[arg(long, default_value_t = 5)]
        poll_interval: u64,
        /// Seconds between heartbeats
        #[arg(long, default_value_t = 60)]
        heartbeat_interval: u64,
        /// Seconds to wait for a hand after dispensing
        #[arg(long, default_value_t = 30)]
        hand_timeout: u64,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let timeout = Duration::from_secs(cli.timeout_secs);
    let client = GatewayClient::new(&cli.backend, timeout)?;

    match cli.command {
        Commands::Send {
            device,
            command,
            motor_id,
            segment,
            params,
        } => {
            let params = match (motor_id, segment, params) {
                (Some(motor_id), Some(segment), _) => Some(
                    device_registry::DispenseParams { motor_id, segment }.to_params(),
                ),
                (_, _, Some(raw)) => Some(parse_object(&raw, "--params")?),
                _ => None,
            };
            let issued = client.issue_command(&device, &command, params).await?;
            match issued.params {
                Some(p) => println!("queued: {} {}", issued.command, Value::Object(p)),
                None => println!("queued: {}", issued.command),
            }
        }
        Commands::State {
            device,
            json,
            watch: None,
        } => show_state(&client, &device, json).await?,
        Commands::State {
            device,
            json,
            watch: Some(secs),
        } => {
            let mut tick = tokio::time::interval(Duration::from_secs(secs.max(1)));
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = tick.tick() => {
                        if let Err(e) = show_state(&client, &device, json).await {
                            eprintln!("state: {e}");
                        }
                        println!();
                    }
                }
            }
        }
        Commands::Poll { device } => match client.poll_command(&device).await? {
            Some(polled) => {
                let params = polled.params.map(Value::Object).unwrap_or(Value::Null);
                println!(
                    "command: {} {}",
                    polled.command.unwrap_or_default(),
                    params
                );
            }
            None => println!("command: none"),
        },
        Commands::Status {
            device,
            status_type,
            data,
        } => {
            let mut report = StatusReport::new(status_type).with_timestamp(now());
            if let Some(raw) = data {
                report = report.with_data(parse_object(&raw, "--data")?);
            }
            client.send_status(&device, &report).await?;
            println!("status: ok");
        }
        Commands::Heartbeat {
            device,
            ip,
            locked,
            fingerprint_count,
        } => {
            let heartbeat = HeartbeatReport {
                timestamp: Some(now()),
                ip_address: ip,
                locked,
                fingerprint_count,
            };
            client.send_heartbeat(&device, &heartbeat).await?;
            println!("heartbeat: ok");
        }
        Commands::Agent {
            device,
            poll_interval,
            heartbeat_interval,
            hand_timeout,
        } => {
            let config = AgentConfig {
                backend_url: cli.backend.clone(),
                poll_interval: Duration::from_secs(poll_interval.max(1)),
                heartbeat_interval: Duration::from_secs(heartbeat_interval.max(1)),
                hand_timeout: Duration::from_secs(hand_timeout),
                request_timeout: timeout,
            };
            info!(device = %device, "starting simulated dispenser");
            let agent = Agent::new(device, config, MockHardware::simulated())?;
            agent.run().await;
        }
    }
    Ok(())
}

async fn show_state(client: &GatewayClient, device: &DeviceId, json: bool) -> Result<()> {
    let snapshot = client.snapshot(device).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(())
}

fn parse_object(raw: &str, flag: &str) -> Result<Params> {
    match serde_json::from_str::<Value>(raw).with_context(|| format!("{flag}: invalid JSON"))? {
        Value::Object(map) => Ok(map),
        other => bail!("{flag}: expected a JSON object, got {other}"),
    }
}

fn print_snapshot(snapshot: &DeviceSnapshot) {
    let state = &snapshot.state;
    println!("device: {}", snapshot.device_id);
    match &state.pending_command {
        Some(cmd) => println!(
            "pending: {} {} (issued {})",
            cmd.command,
            cmd.params.raw().map(|p| Value::Object(p.clone())).unwrap_or(Value::Null),
            fmt_time(cmd.issued_at)
        ),
        None => println!("pending: none"),
    }
    match &state.last_status {
        Some(s) => println!(
            "status: {} {} (received {})",
            s.status_type,
            s.data.clone().map(Value::Object).unwrap_or(Value::Null),
            fmt_time(s.received_at)
        ),
        None => println!("status: none"),
    }
    match &state.last_heartbeat {
        Some(h) => println!(
            "heartbeat: ip={} locked={} fingerprints={} (received {})",
            h.ip_address.as_deref().unwrap_or("-"),
            h.locked.map(|l| l.to_string()).unwrap_or_else(|| "-".into()),
            h.fingerprint_count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".into()),
            fmt_time(h.received_at)
        ),
        None => println!("heartbeat: none"),
    }
}

fn fmt_time(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}

fn now() -> String {
    fmt_time(OffsetDateTime::now_utc())
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
