//! Mower telemetry injection utility
//!
//! Publishes vendor-style status payloads onto a broker so a running bridge
//! can be exercised without a real mower.
//!
//! ## Usage
//!
//! ```bash
//! # One status report for device ABC123
//! inject-telemetry --device-id ABC123 --battery 77 --mode 1
//!
//! # Ten reports, one every two seconds, draining the battery
//! inject-telemetry --device-id ABC123 --count 10 --interval-secs 2
//!
//! # Arbitrary payload, e.g. to check malformed-input handling
//! inject-telemetry --device-id ABC123 --payload '{bad json'
//! ```

use bytes::Bytes;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, timeout, Duration};

#[derive(Parser)]
#[command(
    name = "inject-telemetry",
    about = "Publish sample mower status payloads to an MQTT broker"
)]
struct Args {
    /// Device id embedded in the topic
    #[arg(long, required = true)]
    device_id: String,

    /// Topic prefix, giving /{prefix}/{device_id}/update
    #[arg(long, default_value = "device")]
    prefix: String,

    /// Battery percentage for the first report
    #[arg(long, default_value = "80")]
    battery: i64,

    /// Vendor mode code (0 paused, 1 mowing, 2 returning, 4 edge cutting)
    #[arg(long, default_value = "1")]
    mode: i64,

    /// Vendor error code
    #[arg(long, default_value = "0")]
    error_code: i64,

    /// Publish this payload verbatim instead of a generated report
    #[arg(long)]
    payload: Option<String>,

    /// Number of reports to publish
    #[arg(long, default_value = "1")]
    count: u32,

    /// Seconds between reports
    #[arg(long, default_value = "5")]
    interval_secs: u64,

    /// Publish with the retain flag
    #[arg(long)]
    retain: bool,

    /// MQTT broker host
    #[arg(long, default_value = "localhost", env = "MOWERLINK_BROKER_HOST")]
    broker_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883", env = "MOWERLINK_BROKER_PORT")]
    broker_port: u16,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Status report in the shape the vendor firmware sends (`cmd` 501)
fn status_report(args: &Args, sequence: u32) -> Value {
    let battery = (args.battery - i64::from(sequence)).clamp(0, 100);
    json!({
        "cmd": 501,
        "power": battery,
        "mode": args.mode,
        "station": args.mode == 2 && battery >= 100,
        "err_code": args.error_code,
        "wifi_lv": -58,
        "cur_min": 12 + sequence,
        "total_min": 48_211 + sequence,
        "on_min": 41_377 + sequence,
        "cur_area": 35.5 + f64::from(sequence),
        "on_area": 912.0,
        "ts": unix_now(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let client_id = format!("inject-telemetry-{}", unix_now());
    let mut options = MqttOptions::new(client_id, &args.broker_host, args.broker_port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(options, 10);

    println!(
        "Connecting to MQTT broker {}:{}...",
        args.broker_host, args.broker_port
    );

    let connected = timeout(Duration::from_secs(5), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(e),
            }
        }
    })
    .await;

    match connected {
        Ok(Ok(())) => println!("✓ Connected"),
        Ok(Err(e)) => {
            eprintln!("✗ Failed to connect: {e}");
            std::process::exit(1);
        }
        Err(_) => {
            eprintln!("✗ Timed out waiting for the broker");
            std::process::exit(1);
        }
    }

    let topic = format!(
        "/{}/{}/update",
        args.prefix.trim_matches('/'),
        args.device_id
    );

    for sequence in 0..args.count {
        let payload = match &args.payload {
            Some(raw) => Bytes::from(raw.clone()),
            None => Bytes::from(status_report(&args, sequence).to_string()),
        };

        println!("📤 {topic} <- {}", String::from_utf8_lossy(&payload));
        client
            .publish_bytes(topic.as_str(), QoS::AtLeastOnce, args.retain, payload)
            .await?;

        // Drive the event loop until the publish has left the client
        let sent = timeout(Duration::from_secs(5), async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;
        if !matches!(sent, Ok(Ok(()))) {
            eprintln!("✗ Publish was not confirmed by the client");
            std::process::exit(1);
        }

        if sequence + 1 < args.count {
            sleep(Duration::from_secs(args.interval_secs)).await;
        }
    }

    client.disconnect().await?;
    let _ = timeout(Duration::from_secs(2), async {
        while let Ok(event) = eventloop.poll().await {
            if matches!(event, Event::Outgoing(Outgoing::Disconnect)) {
                break;
            }
        }
    })
    .await;

    println!("✓ Published {} report(s)", args.count);
    Ok(())
}
