//! # MAVLink Gateway - Main Entry Point
//!
//! Assembles and drives the secure protocol gateway:
//! 1. **Initialize logging**: detailed rolling-file (or stderr) layer plus a
//!    colorized operator stream on stdout
//! 2. **Parse arguments**: endpoint specs per deployment role, transformer
//!    and performance options
//! 3. **Assemble the pipeline**: hook the configured transports, the stdout
//!    discard sink, and the optional XOR transformer pair
//! 4. **Drive**: spin the dispatch loop until the operator console or a
//!    signal-equivalent sets the terminate flag, ticking the performance
//!    reporter in between
//!
//! The dispatch loop itself is strictly single-threaded; the only other
//! threads are transport workers (owned by their adapters) and the console
//! reader, which communicates through three relaxed atomic flags.

use std::io::Write as _;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

use mavlink_gateway::cli::{Args, EndpointSpec, PerfUnitArg};
use mavlink_gateway::console;
use mavlink_gateway::defaults;
use mavlink_gateway::perf::PerfReporter;
use mavlink_gateway::pipeline::Pipeline;
use mavlink_gateway::transform::{xor_transform, Port};
use mavlink_gateway::transport::{
    hook_serial, hook_stdio_sink, hook_tcp, hook_udp, SerialConfig, SinkId, SourceId, TcpConfig,
    TcpMode, UdpConfig,
};

mod logging;
use logging::ConsoleFormatter;

fn main() -> Result<()> {
    // Parse command-line arguments first, as they control logging behavior.
    let args = Args::parse();

    // Verbosity applies to both the detailed layer and stdout:
    // default INFO, -v DEBUG, -vv and more TRACE.
    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // The detailed layer goes to a daily-rolling file unless "stderr" was
    // requested. The guard must stay alive for file logging to flush.
    let guard;
    let detailed_log_layer;
    if let Some("stderr") = args.log_file.as_deref() {
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else {
        let file_appender = match args.log_file.as_deref() {
            Some(path_str) => {
                let log_path = std::path::Path::new(path_str);
                let log_dir = log_path
                    .parent()
                    .unwrap_or_else(|| std::path::Path::new("."));
                let log_filename = log_path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("mavlink_gateway.log"));
                tracing_appender::rolling::daily(log_dir, log_filename)
            }
            None => tracing_appender::rolling::daily(".", "mavlink_gateway.log"),
        };
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    }

    // Clean operator-facing stream on stdout, silenced by --quiet.
    let stdout_log = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ConsoleFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .init();
    let _log_guard = guard;

    info!(
        "Starting MAVLink gateway {}",
        mavlink_gateway::VERSION
    );

    // Assemble the pipeline: one transport per configured role, the stdout
    // printer on the discard slot, then the optional transformer pair.
    let mut pipeline = Pipeline::new();
    hook_role(&mut pipeline, &args.vmc, SourceId::Vmc, SinkId::Vmc)?;
    hook_role(&mut pipeline, &args.legacy, SourceId::Legacy, SinkId::Legacy)?;
    if let Some(spec) = &args.enclave {
        hook_role(&mut pipeline, spec, SourceId::Enclave, SinkId::Enclave)?;
    }
    hook_stdio_sink(&mut pipeline, SinkId::Discard);

    if let Some(role) = args.xor {
        let (source, sink) = role.ids();
        pipeline.add_transformer(Port::Source(source), xor_transform);
        pipeline.add_transformer(Port::Sink(sink), xor_transform);
        info!("XOR transformer installed on {}/{}", source, sink);
    }

    pipeline.connect();

    let flags = pipeline.flags();
    let console = console::spawn(flags.clone());

    let units = PerfUnitArg::resolve(&args.perf, args.enclave.is_some());
    let mut reporter = PerfReporter::new(args.perf_interval, units);
    let mut perf_json = match &args.perf_json {
        Some(path) => Some(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening perf JSON file {:?}", path))?,
        ),
        None => None,
    };

    // The driver loop: pump, report, back off briefly when idle.
    while !flags.terminated() {
        let worked = match pipeline.spin() {
            Ok(worked) => worked,
            Err(e) => {
                error!("pipeline spin failed: {}", e);
                break;
            }
        };
        if let Some(report) = reporter.tick(pipeline.perf_mut()) {
            if let Some(file) = perf_json.as_mut() {
                if let Ok(line) = serde_json::to_string(&report) {
                    let _ = writeln!(file, "{}", line);
                }
            }
        }
        if !worked {
            thread::sleep(defaults::IDLE_BACKOFF);
        }
    }

    info!("terminate observed, draining transports");
    pipeline.disconnect();
    flags.set_terminated();
    if let Some(handle) = console {
        let _ = handle.join();
    }

    info!("MAVLink gateway stopped");
    Ok(())
}

/// Hook the transport described by `spec` into the pipeline as `source`
/// and `sink`. A hook failure (e.g. a port already in use) aborts startup;
/// nothing is registered for the failed role.
fn hook_role(
    pipeline: &mut Pipeline,
    spec: &EndpointSpec,
    source: SourceId,
    sink: SinkId,
) -> Result<()> {
    match spec {
        EndpointSpec::Udp { host, port } => hook_udp(
            pipeline,
            UdpConfig {
                host: host.clone(),
                port: *port,
            },
            source,
            sink,
        ),
        EndpointSpec::TcpListen { port } => hook_tcp(
            pipeline,
            TcpConfig {
                mode: TcpMode::Listen,
                host: "0.0.0.0".to_string(),
                port: *port,
            },
            source,
            sink,
        ),
        EndpointSpec::TcpConnect { host, port } => hook_tcp(
            pipeline,
            TcpConfig {
                mode: TcpMode::Connect,
                host: host.clone(),
                port: *port,
            },
            source,
            sink,
        ),
        EndpointSpec::Serial { device, baud } => hook_serial(
            pipeline,
            SerialConfig {
                device: device.clone(),
                baud: *baud,
            },
            source,
            sink,
        ),
    }
    .with_context(|| format!("hooking {} as {}/{}", spec, source, sink))?;
    info!("hooked {} as source '{}' / sink '{}'", spec, source, sink);
    Ok(())
}
