//! # Command-Line Interface
//!
//! Argument parsing for the gateway binary, built on the `clap` derive API.
//! Each deployment role (flight controller, legacy peer, enclave peer) is
//! bound to one transport endpoint described by a compact spec string:
//!
//! ```text
//! udp:14551              UDP, bind on all interfaces
//! udp:0.0.0.0:14551      UDP, explicit bind address
//! tcp:5760               TCP, listen for one peer
//! tcp:10.0.0.2:5760      TCP, dial out to the peer
//! serial:/dev/ttyAMA0    serial line at the default 115200 baud
//! serial:/dev/ttyS1:57600
//! ```
//!
//! The defaults mirror the simulation deployment: the flight controller on
//! UDP 14551 and the legacy peer on UDP 12001, no enclave.

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser, ValueEnum,
};
use std::path::PathBuf;
use std::time::Duration;

use crate::perf::PerfUnit;
use crate::transport::{SinkId, SourceId};

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Endpoint of the trusted flight/mission controller
    #[arg(long, value_parser = parse_endpoint, default_value = "udp:14551",
          help_heading = "Endpoints")]
    pub vmc: EndpointSpec,

    /// Endpoint of the untrusted legacy peer
    #[arg(long, value_parser = parse_endpoint, default_value = "udp:12001",
          help_heading = "Endpoints")]
    pub legacy: EndpointSpec,

    /// Endpoint of the enclave peer (omit to run without one)
    #[arg(long, value_parser = parse_endpoint, help_heading = "Endpoints")]
    pub enclave: Option<EndpointSpec>,

    /// Apply the XOR payload transformer to this role's port pair
    ///
    /// Installs the decoder on the role's source and the encoder on its
    /// sink, so traffic on that wire is obfuscated while everything behind
    /// the gateway sees plaintext.
    #[arg(long, value_enum, help_heading = "Transformers")]
    pub xor: Option<XorRole>,

    /// Performance summary cadence (minimum 2s)
    ///
    /// Supports human-readable durations like "2s", "500ms" or "1m".
    #[arg(long, value_parser = parse_duration, default_value = "2s",
          help_heading = "Performance")]
    pub perf_interval: Duration,

    /// Performance units to sample (space separated)
    #[arg(long, value_enum, default_values_t = vec![PerfUnitArg::All],
          num_args = 1.., help_heading = "Performance")]
    pub perf: Vec<PerfUnitArg>,

    /// Append each sampled performance report as a JSON line to this file
    #[arg(long, help_heading = "Performance")]
    pub perf_json: Option<PathBuf>,

    /// Log file path, or "stderr" to log diagnostics to stderr
    ///
    /// Without this flag a daily-rolling log file is written in the
    /// working directory.
    #[arg(long, help_heading = "Output and Logging")]
    pub log_file: Option<String>,

    /// Silence user-facing informational output on stdout
    #[arg(short = 'q', long, help_heading = "Output and Logging")]
    pub quiet: bool,

    /// Increase diagnostic log verbosity.
    ///
    /// Can be used multiple times to increase detail:
    ///  -v: debug
    ///  -vv and more: trace
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,
}

/// One parsed endpoint spec string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSpec {
    Udp { host: String, port: u16 },
    TcpListen { port: u16 },
    TcpConnect { host: String, port: u16 },
    Serial { device: PathBuf, baud: u32 },
}

/// Default serial baud rate when the spec does not name one.
pub const DEFAULT_BAUD: u32 = 115_200;

impl std::fmt::Display for EndpointSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointSpec::Udp { host, port } => write!(f, "udp:{}:{}", host, port),
            EndpointSpec::TcpListen { port } => write!(f, "tcp:{}", port),
            EndpointSpec::TcpConnect { host, port } => write!(f, "tcp:{}:{}", host, port),
            EndpointSpec::Serial { device, baud } => {
                write!(f, "serial:{}:{}", device.display(), baud)
            }
        }
    }
}

/// Parse an endpoint spec string (see the module docs for the grammar).
pub fn parse_endpoint(s: &str) -> Result<EndpointSpec, String> {
    let (scheme, rest) = s
        .split_once(':')
        .ok_or_else(|| format!("endpoint '{}' is missing a scheme", s))?;
    if rest.is_empty() {
        return Err(format!("endpoint '{}' is missing an address", s));
    }
    match scheme {
        "udp" => match rest.split_once(':') {
            None => Ok(EndpointSpec::Udp {
                host: "0.0.0.0".to_string(),
                port: parse_port(rest)?,
            }),
            Some((host, port)) => Ok(EndpointSpec::Udp {
                host: host.to_string(),
                port: parse_port(port)?,
            }),
        },
        "tcp" => match rest.split_once(':') {
            None => Ok(EndpointSpec::TcpListen {
                port: parse_port(rest)?,
            }),
            Some((host, port)) => Ok(EndpointSpec::TcpConnect {
                host: host.to_string(),
                port: parse_port(port)?,
            }),
        },
        "serial" => {
            // The device path may contain colons only in the baud position,
            // so split from the right and require a number there.
            if let Some((device, baud)) = rest.rsplit_once(':') {
                if let Ok(baud) = baud.parse::<u32>() {
                    return Ok(EndpointSpec::Serial {
                        device: PathBuf::from(device),
                        baud,
                    });
                }
            }
            Ok(EndpointSpec::Serial {
                device: PathBuf::from(rest),
                baud: DEFAULT_BAUD,
            })
        }
        other => Err(format!("unknown endpoint scheme '{}'", other)),
    }
}

fn parse_port(s: &str) -> Result<u16, String> {
    s.parse::<u16>()
        .map_err(|_| format!("invalid port number '{}'", s))
}

/// Roles the XOR transformer can be attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum XorRole {
    Vmc,
    Legacy,
    Enclave,
}

impl XorRole {
    pub fn ids(self) -> (SourceId, SinkId) {
        match self {
            XorRole::Vmc => (SourceId::Vmc, SinkId::Vmc),
            XorRole::Legacy => (SourceId::Legacy, SinkId::Legacy),
            XorRole::Enclave => (SourceId::Enclave, SinkId::Enclave),
        }
    }
}

/// Selectable performance units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PerfUnitArg {
    Vmc,
    Legacy,
    Enclave,
    Exec,
    /// Every configured role plus the execution unit
    All,
}

impl std::fmt::Display for PerfUnitArg {
    // Renders the value-enum names so clap can echo defaults back.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PerfUnitArg::Vmc => "vmc",
            PerfUnitArg::Legacy => "legacy",
            PerfUnitArg::Enclave => "enclave",
            PerfUnitArg::Exec => "exec",
            PerfUnitArg::All => "all",
        })
    }
}

impl PerfUnitArg {
    /// Resolve the selected units against the configured roles. `All`
    /// expands to every role actually hooked plus the execution unit.
    pub fn resolve(selected: &[PerfUnitArg], has_enclave: bool) -> Vec<PerfUnit> {
        fn push_role(units: &mut Vec<PerfUnit>, source: SourceId, sink: SinkId) {
            units.push(PerfUnit::Source(source));
            units.push(PerfUnit::Sink(sink));
        }
        let mut units = Vec::new();
        if selected.contains(&PerfUnitArg::All) {
            push_role(&mut units, SourceId::Vmc, SinkId::Vmc);
            push_role(&mut units, SourceId::Legacy, SinkId::Legacy);
            if has_enclave {
                push_role(&mut units, SourceId::Enclave, SinkId::Enclave);
            }
            units.push(PerfUnit::Exec);
            return units;
        }
        for arg in selected {
            match arg {
                PerfUnitArg::Vmc => push_role(&mut units, SourceId::Vmc, SinkId::Vmc),
                PerfUnitArg::Legacy => push_role(&mut units, SourceId::Legacy, SinkId::Legacy),
                PerfUnitArg::Enclave => push_role(&mut units, SourceId::Enclave, SinkId::Enclave),
                PerfUnitArg::Exec => units.push(PerfUnit::Exec),
                PerfUnitArg::All => unreachable!("handled above"),
            }
        }
        units
    }
}

/// Parse duration from string (e.g. "500ms", "10s", "5m").
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration cannot be empty".to_string());
    }
    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else {
        // No unit specified, assume seconds.
        (s, "s")
    };
    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("invalid number in duration: {}", num_str))?;
    if num < 0.0 {
        return Err("duration cannot be negative".to_string());
    }
    Ok(match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_secs(num as u64),
        "m" => Duration::from_secs((num * 60.0) as u64),
        _ => return Err(format!("invalid duration unit: {}", unit)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Endpoint grammar accepted forms.
    #[test]
    fn parse_endpoint_forms() {
        assert_eq!(
            parse_endpoint("udp:14551").unwrap(),
            EndpointSpec::Udp {
                host: "0.0.0.0".into(),
                port: 14551
            }
        );
        assert_eq!(
            parse_endpoint("udp:127.0.0.1:14551").unwrap(),
            EndpointSpec::Udp {
                host: "127.0.0.1".into(),
                port: 14551
            }
        );
        assert_eq!(
            parse_endpoint("tcp:5760").unwrap(),
            EndpointSpec::TcpListen { port: 5760 }
        );
        assert_eq!(
            parse_endpoint("tcp:10.0.0.2:5760").unwrap(),
            EndpointSpec::TcpConnect {
                host: "10.0.0.2".into(),
                port: 5760
            }
        );
        assert_eq!(
            parse_endpoint("serial:/dev/ttyAMA0").unwrap(),
            EndpointSpec::Serial {
                device: PathBuf::from("/dev/ttyAMA0"),
                baud: DEFAULT_BAUD
            }
        );
        assert_eq!(
            parse_endpoint("serial:/dev/ttyS1:57600").unwrap(),
            EndpointSpec::Serial {
                device: PathBuf::from("/dev/ttyS1"),
                baud: 57600
            }
        );
    }

    #[test]
    fn parse_endpoint_rejects_malformed_specs() {
        assert!(parse_endpoint("udp").is_err());
        assert!(parse_endpoint("udp:").is_err());
        assert!(parse_endpoint("udp:notaport").is_err());
        assert!(parse_endpoint("ftp:21").is_err());
        assert!(parse_endpoint("tcp:host:99999").is_err());
    }

    #[test]
    fn parse_duration_formats() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn perf_all_expands_to_configured_roles() {
        let units = PerfUnitArg::resolve(&[PerfUnitArg::All], false);
        assert!(units.contains(&PerfUnit::Source(SourceId::Vmc)));
        assert!(units.contains(&PerfUnit::Sink(SinkId::Legacy)));
        assert!(units.contains(&PerfUnit::Exec));
        assert!(!units.contains(&PerfUnit::Source(SourceId::Enclave)));

        let with_enclave = PerfUnitArg::resolve(&[PerfUnitArg::All], true);
        assert!(with_enclave.contains(&PerfUnit::Sink(SinkId::Enclave)));
    }

    #[test]
    fn perf_explicit_selection_is_kept() {
        let units = PerfUnitArg::resolve(&[PerfUnitArg::Exec, PerfUnitArg::Vmc], true);
        assert_eq!(
            units,
            vec![
                PerfUnit::Exec,
                PerfUnit::Source(SourceId::Vmc),
                PerfUnit::Sink(SinkId::Vmc)
            ]
        );
    }

    /// The derive parses a representative command line.
    #[test]
    fn args_parse_representative_invocation() {
        let args = Args::parse_from([
            "mavlink-gateway",
            "--vmc",
            "tcp:10.1.0.7:5760",
            "--enclave",
            "udp:12022",
            "--xor",
            "vmc",
            "--perf-interval",
            "5s",
            "-vv",
        ]);
        assert_eq!(
            args.vmc,
            EndpointSpec::TcpConnect {
                host: "10.1.0.7".into(),
                port: 5760
            }
        );
        assert_eq!(
            args.legacy,
            EndpointSpec::Udp {
                host: "0.0.0.0".into(),
                port: 12001
            }
        );
        assert!(args.enclave.is_some());
        assert_eq!(args.xor, Some(XorRole::Vmc));
        assert_eq!(args.perf_interval, Duration::from_secs(5));
        assert_eq!(args.verbose, 2);
        assert!(!args.quiet);
    }
}
