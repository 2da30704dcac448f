//! hICN consumer measurement tool.
//!
//! Downloads a named content (byte-stream mode) or joins a live flow (RTC
//! mode) through a local forwarder, printing periodic transfer statistics.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use hicn::auth::{AsymmetricVerifier, SymmetricVerifier, Verifier};
use hicn::io::UdpConnector;
use hicn::transport::config::{ConsumerCallbacks, ConsumerConfig, ReadEvent, TransportAlgorithm};
use hicn::transport::name::MIN_PROBE_SUFFIX;
use hicn::transport::packet::{NackPayload, NACK_PAYLOAD_SIZE};
use hicn::transport::portal::Portal;
use hicn::transport::rtc::{RtcConsumer, RtcConsumerConfig};
use hicn::transport::StreamConsumer;
use hicn_cli::stats::summary_line;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "hicn-consumer")]
#[command(about = "hICN transfer measurement client", long_about = None)]
struct Args {
    /// Content name, e.g. b001::abcd or b001::abcd|4
    name: String,

    /// Fixed congestion window (CBR); omit for RAAQM
    #[arg(short = 'W', long)]
    window: Option<u32>,

    /// RAAQM beta parameter
    #[arg(short = 'b', long)]
    beta: Option<f64>,

    /// RAAQM drop factor parameter
    #[arg(short = 'd', long)]
    drop_factor: Option<f64>,

    /// Interest lifetime in milliseconds
    #[arg(short = 'L', long, default_value_t = 1000)]
    lifetime: u32,

    /// Receive buffer size; 0 disables reassembly
    #[arg(short = 'M', long, default_value_t = 131072)]
    receive_buffer: usize,

    /// Statistics interval in milliseconds
    #[arg(short = 'i', long, default_value_t = 1000)]
    stats_interval: u64,

    /// Producer certificate (public key PEM) for verification
    #[arg(short = 'c', long)]
    certificate: Option<PathBuf>,

    /// Passphrase for symmetric verification
    #[arg(short = 'k', long)]
    passphrase: Option<String>,

    /// Expect manifest-covered content
    #[arg(short = 'm', long)]
    manifest: bool,

    /// Run the RTC protocol
    #[arg(short = 'R', long)]
    rtc: bool,

    /// RTC run duration in seconds
    #[arg(short = 'D', long, default_value_t = 10)]
    duration: u64,

    /// Test mode: per-packet audit of the RTC flow
    #[arg(short = 't', long)]
    test_mode: bool,

    /// Forwarder address
    #[arg(short = 'z', long, default_value = "127.0.0.1:9695")]
    forwarder: SocketAddr,

    /// Local bind address
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,
}

fn build_verifier(args: &Args) -> Result<Option<Arc<dyn Verifier>>> {
    if let Some(path) = &args.certificate {
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("reading certificate {}", path.display()))?;
        let verifier = AsymmetricVerifier::from_public_key_pem(&pem)?;
        return Ok(Some(Arc::new(verifier)));
    }
    if let Some(passphrase) = &args.passphrase {
        return Ok(Some(Arc::new(SymmetricVerifier::new(passphrase))));
    }
    Ok(None)
}

fn build_callbacks(args: &Args) -> ConsumerCallbacks {
    let mut callbacks = ConsumerCallbacks::default();

    let stats_interval = args.stats_interval;
    let mut last_bytes = 0u64;
    callbacks.stats_summary = Some(Box::new(move |stats| {
        let delta = stats.bytes_received().saturating_sub(last_bytes);
        last_bytes = stats.bytes_received();
        println!("{}", summary_line(stats_interval, delta, stats));
    }));

    callbacks.read_callback = Some(Box::new(|event| match event {
        ReadEvent::Success { total_bytes } => {
            println!("Content retrieved. Size: {total_bytes} [Bytes]");
        }
        ReadEvent::Error(error) => {
            eprintln!("Error while reading from socket: {error}");
        }
        ReadEvent::Data(_) => {}
    }));

    if args.test_mode {
        let mut expected = 0u32;
        callbacks.content_object_input = Some(Box::new(move |content| {
            let suffix = content.suffix();
            if content.is_nack() && content.payload().len() == NACK_PAYLOAD_SIZE {
                if let Ok(nack) = NackPayload::decode(content.payload()) {
                    if suffix >= MIN_PROBE_SUFFIX {
                        println!("[PROBE] probe number = {suffix}");
                    } else if suffix < nack.production_segment {
                        println!(
                            "[OUT OF SYNCH] received NACK for {suffix}. Next expected packet {}",
                            nack.production_segment + 1
                        );
                    } else {
                        println!("[WINDOW TOO LARGE] received NACK for {suffix}");
                    }
                }
                return;
            }
            if suffix > expected && expected != 0 {
                for lost in expected..suffix {
                    println!("[LOSS] lost packet {lost}");
                }
            }
            expected = suffix.saturating_add(1);
        }));
    }

    callbacks
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let name: hicn::Name = args
        .name
        .parse()
        .map_err(|e| anyhow!("invalid name {}: {e}", args.name))?;

    let connector = UdpConnector::connect(args.bind, args.forwarder)?;
    let portal = Portal::new(Box::new(connector));
    let verifier = build_verifier(&args)?;
    let callbacks = build_callbacks(&args);

    println!("Starting download of {name}");
    let start = Instant::now();

    if args.rtc {
        let config = RtcConsumerConfig {
            interest_lifetime_ms: args.lifetime,
            stats_interval_ms: args.stats_interval,
            ..Default::default()
        };
        let mut consumer = RtcConsumer::new(config, callbacks, portal)?;
        consumer.consume(name, Some(Duration::from_secs(args.duration)))?;

        let elapsed = start.elapsed();
        let stats = consumer.stats();
        println!(
            "Received {} datagrams, {} bytes in {:.2}s ({} nacks, {} lost, {} recovered)",
            consumer.delivered_datagrams(),
            stats.bytes_received(),
            elapsed.as_secs_f64(),
            stats.received_nacks(),
            stats.lost_data(),
            stats.recovered_data(),
        );
        return Ok(());
    }

    let config = ConsumerConfig {
        algorithm: if args.window.is_some() {
            TransportAlgorithm::Cbr
        } else {
            TransportAlgorithm::Raaqm
        },
        window_size: args.window.unwrap_or(16),
        beta: args.beta.unwrap_or(0.99),
        drop_factor: args.drop_factor.unwrap_or(0.004),
        interest_lifetime_ms: args.lifetime,
        receive_buffer_size: args.receive_buffer,
        stats_interval_ms: args.stats_interval,
        verifier,
        manifest: args.manifest,
        ..Default::default()
    };

    let mut consumer = StreamConsumer::new(config, callbacks, portal)?;
    let total = consumer.consume(name)?;

    let elapsed = start.elapsed().as_secs_f64();
    eprintln!(
        "Elapsed Time: {elapsed:.3} seconds -- {:.3} [Mbps]",
        (total as f64 * 8.0) / elapsed / 1_000_000.0
    );
    Ok(())
}
