use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info, warn};
use nix::sys::signal::{signal, SigHandler, Signal};
use pcap::{Capture, Device};

use flowtap::flow::{spawn_sweeper, CleanupConfig, FlowTable, FlowTableConfig};
use flowtap::{analyzer, tracelog, ConsoleDisplay, Error, PacketProcessor};

/// Passive TCP flow tracker: live capture, stream reassembly, TLS
/// handshake analysis.
#[derive(Debug, Parser)]
#[clap(name = "flowtap", version)]
struct Args {
    /// Capture filter expression
    #[clap(short = 'f', value_name = "EXPR", default_value = "tcp")]
    filter: String,

    /// Enable debug logs; optionally a comma-list of log names to also
    /// print to stdout
    #[clap(short = 'd', value_name = "LOGS", min_values = 0, max_values = 1, use_value_delimiter = true)]
    debug: Option<Vec<String>>,

    /// As -d, plus truncate existing log files at start
    #[clap(short = 'D', value_name = "LOGS", min_values = 0, max_values = 1, use_value_delimiter = true)]
    debug_truncate: Option<Vec<String>>,

    /// Sweeper interval in seconds
    #[clap(short = 'c', value_name = "SEC", default_value_t = 5)]
    sweep_interval: u64,

    /// Comma-separated analyzer names to enable per flow
    #[clap(
        short = 'a',
        value_name = "NAMES",
        use_value_delimiter = true,
        default_value = "reassm,tls"
    )]
    analyzers: Vec<String>,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_signum: i32) {
    SHUTDOWN.store(true, Ordering::Release);
}

fn install_signal_handlers() -> Result<(), Error> {
    unsafe {
        signal(Signal::SIGINT, SigHandler::Handler(handle_signal))?;
        signal(Signal::SIGTERM, SigHandler::Handler(handle_signal))?;
    }
    Ok(())
}

fn run(args: Args) -> Result<(), Error> {
    let (debug, truncate, stdout_logs) = match (args.debug_truncate, args.debug) {
        (Some(logs), _) => (true, true, logs),
        (None, Some(logs)) => (true, false, logs),
        (None, None) => (false, false, Vec::new()),
    };
    tracelog::init(debug, truncate, &stdout_logs);
    analyzer::register_builtin();

    for name in &args.analyzers {
        if !analyzer::registered_names().contains(&name.as_str()) {
            warn!("analyzer {name:?} is not registered and will be skipped per flow");
        }
    }

    // Open the default device before anything spawns: a capture failure is
    // the one fatal error this program has.
    let device = Device::lookup()?;
    info!(
        "capturing on {} with filter {:?}, debug {}, sweep every {} s, analyzers {:?}",
        device.name,
        args.filter,
        if debug { "on" } else { "off" },
        args.sweep_interval,
        args.analyzers
    );
    let mut capture = Capture::from_device(device)?
        .promisc(true)
        .snaplen(65535)
        .timeout(1000)
        .open()?;
    capture.filter(&args.filter, true)?;

    install_signal_handlers()?;

    let table = Arc::new(FlowTable::new(FlowTableConfig {
        cleanup: CleanupConfig::default(),
        sweep_interval: Duration::from_secs(args.sweep_interval.max(1)),
        analyzers: args.analyzers.clone(),
    }));
    let running = Arc::new(AtomicBool::new(true));
    let sweeper = spawn_sweeper(table.clone(), running.clone());

    let processor = PacketProcessor::new(table.clone());
    let mut display = ConsoleDisplay::new(
        format!("flowtap: filter {:?}", args.filter),
        Duration::from_secs(1),
    );

    while !SHUTDOWN.load(Ordering::Acquire) {
        match capture.next() {
            Ok(packet) => {
                processor.handle_frame(packet.data, packet.header.len as usize, Instant::now());
                display.maybe_update(&table, Instant::now());
            }
            // the read timeout is what lets the shutdown flag be polled
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                error!("capture read failed: {e}");
                break;
            }
        }
    }

    info!("shutting down");
    running.store(false, Ordering::Release);
    if sweeper.join().is_err() {
        warn!("sweeper thread panicked");
    }
    tracelog::flush_all();

    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("{e}");
        eprintln!("flowtap: {e}");
        std::process::exit(1);
    }
}
