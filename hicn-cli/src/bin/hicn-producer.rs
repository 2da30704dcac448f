//! hICN producer measurement tool.
//!
//! Serves a synthetic content under a prefix (byte-stream mode) or paces a
//! live flow (RTC mode) through a local forwarder. Supports manifest
//! emission, per-segment signing, live production on first interest,
//! virtual replies and trace-driven RTC schedules.

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::Parser;
use hicn::auth::{HashAlgorithm, Identity, Signer, SymmetricSigner};
use hicn::io::UdpConnector;
use hicn::transport::config::{ProducerCallbacks, ProducerConfig};
use hicn::transport::consumer::StopHandle;
use hicn::transport::portal::Portal;
use hicn::transport::rtc::{RtcProducer, RtcProducerConfig};
use hicn::transport::StreamProducer;
use hicn::Prefix;
use hicn_cli::config::{parse_trace_file, Rate};
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "hicn-producer")]
#[command(about = "hICN measurement server", long_about = None)]
struct Args {
    /// Served prefix, e.g. b001::/64
    prefix: String,

    /// Size of the content to publish
    #[arg(short = 'A', long, default_value_t = 20 * 1024 * 1024)]
    content_size: usize,

    /// Size of each data packet
    #[arg(short = 's', long, default_value_t = 1500)]
    packet_size: usize,

    /// Produce transport manifests
    #[arg(short = 'm', long)]
    manifest: bool,

    /// Segments covered per manifest
    #[arg(long, default_value_t = 16)]
    manifest_capacity: usize,

    /// Start producing upon the first interest instead of up front
    #[arg(short = 'l', long)]
    live: bool,

    /// Reply from a pre-allocated pool, no real payload
    #[arg(short = 'v', long)]
    virtual_producer: bool,

    /// Path of the PEM private key used for signing
    #[arg(short = 'K', long)]
    keystore: Option<PathBuf>,

    /// Passphrase for symmetric signing
    #[arg(short = 'k', long)]
    passphrase: Option<String>,

    /// Hash algorithm for manifest digests (sha256, sha512, crc32)
    #[arg(short = 'y', long, default_value = "sha256")]
    hash: String,

    /// Keep the suffix sequence across production rounds
    #[arg(short = 'x', long)]
    multiphase: bool,

    /// Content object expiry in milliseconds
    #[arg(short = 'e', long, default_value_t = 600_000)]
    expiry_ms: u32,

    /// Run the RTC production protocol
    #[arg(short = 'R', long)]
    rtc: bool,

    /// RTC production bitrate
    #[arg(short = 'B', long, default_value = "2048kbps")]
    bitrate: Rate,

    /// RTC payload size
    #[arg(short = 'P', long, default_value_t = 1400)]
    payload_size: usize,

    /// Interactive mode: toggle RTC production on each input line
    #[arg(short = 'I', long)]
    interactive: bool,

    /// Trace-driven RTC schedule (overrides the bitrate)
    #[arg(short = 'T', long)]
    trace: Option<PathBuf>,

    /// Forwarder address
    #[arg(short = 'z', long, default_value = "127.0.0.1:9695")]
    forwarder: SocketAddr,

    /// Local bind address
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,
}

fn build_signer(args: &Args, hash: HashAlgorithm) -> Result<Option<Arc<dyn Signer>>> {
    if let Some(passphrase) = &args.passphrase {
        return Ok(Some(Arc::new(SymmetricSigner::new(passphrase))));
    }
    if let Some(path) = &args.keystore {
        let identity = Identity::load_or_generate(path, hash)?;
        // Publish the trust anchor next to the key so consumers can
        // verify us.
        let anchor = path.with_extension("pub.pem");
        std::fs::write(&anchor, identity.public_key_pem()?)
            .with_context(|| format!("writing {}", anchor.display()))?;
        println!("Trust anchor written to {}", anchor.display());
        return Ok(Some(Arc::new(identity.signer())));
    }
    Ok(None)
}

fn run_rtc(args: &Args, portal: Portal, prefix: Prefix) -> Result<()> {
    let trace = match &args.trace {
        Some(path) => Some(parse_trace_file(path)?),
        None => None,
    };

    let config = RtcProducerConfig {
        payload_size: args.payload_size,
        production_rate_kbps: args.bitrate.kbps(),
        content_expiry_ms: 1000,
        trace,
        ..Default::default()
    };

    let mut producer = RtcProducer::new(config, ProducerCallbacks::default(), portal)?;
    producer.register_prefix(prefix);

    if args.interactive {
        let switch = producer.production_switch();
        switch.set_enabled(false);
        println!("Interactive mode: press return to toggle production");
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                if line.is_err() {
                    break;
                }
                switch.toggle();
                if switch.is_enabled() {
                    println!("start real time content production");
                } else {
                    println!("stop real time content production");
                }
            }
        });
    }

    println!("Running RTC producer under {prefix}");
    let stop = StopHandle::new();
    producer.run(&stop, None)?;
    Ok(())
}

fn run_stream(args: &Args, portal: Portal, prefix: Prefix) -> Result<()> {
    let hash = HashAlgorithm::from_name(&args.hash)?;
    let signer = build_signer(args, hash)?;

    let config = ProducerConfig {
        data_packet_size: args.packet_size,
        content_expiry_ms: args.expiry_ms,
        manifest: args.manifest,
        manifest_capacity: args.manifest_capacity,
        hash_algorithm: hash,
        signer,
        virtual_mode: args.virtual_producer,
        ..Default::default()
    };

    let mut producer = StreamProducer::new(config, ProducerCallbacks::default(), portal)?;
    producer.register_prefix(prefix);

    let content_name = prefix.name(0);
    let stop = StopHandle::new();

    if args.virtual_producer {
        println!("Serving virtual replies under {prefix}");
        producer.serve(&stop, None)?;
        return Ok(());
    }

    if !args.live {
        let buffer = Bytes::from(vec![b'?'; args.content_size]);
        let produced = producer.produce_stream(content_name, buffer, !args.multiphase, 0)?;
        println!("Written {produced} data packets in output buffer");
        producer.serve(&stop, None)?;
        return Ok(());
    }

    // Live production: the first interest of each content triggers the
    // actual segmentation.
    println!("Waiting for interests under {prefix}");
    loop {
        if let Some(interest) = producer.process_one(Duration::from_millis(50))? {
            let suffix = interest.suffix();
            println!("Received interest {suffix}, starting production at {suffix}");
            let buffer = Bytes::from(vec![b'?'; args.content_size]);
            let produced =
                producer.produce_stream(*interest.name(), buffer, !args.multiphase, suffix)?;
            println!("Written {produced} data packets in output buffer");
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let prefix: Prefix = args
        .prefix
        .parse()
        .map_err(|e| anyhow!("invalid prefix {}: {e}", args.prefix))?;

    let connector = UdpConnector::connect(args.bind, args.forwarder)?;
    let portal = Portal::new(Box::new(connector));

    println!("Producing contents under name {prefix}");
    if args.rtc {
        run_rtc(&args, portal, prefix)
    } else {
        run_stream(&args, portal, prefix)
    }
}
