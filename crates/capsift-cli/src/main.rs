use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use capsift_core::classify::layout::TYPE_UNKNOWN;
use capsift_core::{
    CaptureSource, CaptureStats, ContentChunk, EngineBuilder, EngineConfig, EngineError, Frame,
    PredicateError, SourceError, list_interfaces,
};
use clap::{ArgGroup, Parser, Subcommand};
use glob::glob;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CAPSIFT_BUILD_COMMIT"),
    " ",
    env!("CAPSIFT_BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "capsift")]
#[command(version = VERSION)]
#[command(
    about = "Capture traffic, reassemble TCP streams and classify their content.",
    long_about = None,
    after_help = "Examples:\n  capsift interfaces\n  capsift capture --file capture.pcapng --skip-unknown\n  capsift capture --interface eth0 --no-packets --chunk-type http-request"
)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress logs and the final summary
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List network interfaces available for live capture.
    Interfaces {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Capture from an interface or a saved file and print accepted packets and
    /// stream chunks as JSON lines.
    #[command(group(ArgGroup::new("input").required(true).args(["interface", "file"])))]
    #[command(
        after_help = "Examples:\n  capsift capture --file capture.pcap\n  capsift capture --file 'dumps/*.pcapng' --chunk-type application/json\n  capsift capture --interface eth0 --promiscuous --config engine.json"
    )]
    Capture {
        /// Live interface name
        #[arg(short, long)]
        interface: Option<String>,

        /// Put the interface in promiscuous mode
        #[arg(long, requires = "interface")]
        promiscuous: bool,

        /// Path (or glob matching one file) of a .pcap or .pcapng capture
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Do not print packets, only stream chunks
        #[arg(long)]
        no_packets: bool,

        /// Only print chunks of this type (repeatable)
        #[arg(long = "chunk-type", value_name = "TYPE")]
        chunk_types: Vec<String>,

        /// Drop chunks classified as unknown
        #[arg(long)]
        skip_unknown: bool,

        /// Pretty-print each JSON record
        #[arg(long)]
        pretty: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Interfaces { json } => cmd_interfaces(json),
        Commands::Capture {
            interface,
            promiscuous,
            file,
            config,
            no_packets,
            chunk_types,
            skip_unknown,
            pretty,
        } => cmd_capture(CaptureArgs {
            interface,
            promiscuous,
            file,
            config,
            no_packets,
            chunk_types,
            skip_unknown,
            pretty,
            quiet: cli.quiet,
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "off",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(format!("{err:#}"), None)
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        let hint = match &err {
            EngineError::Config(_) => Some("check the values in the --config file".to_string()),
            EngineError::Source(SourceError::InterfaceNotFound(_)) => {
                Some("run `capsift interfaces` to list capture interfaces".to_string())
            }
            EngineError::Source(SourceError::Open { .. }) => {
                Some("live capture usually needs root or CAP_NET_RAW".to_string())
            }
            EngineError::Source(SourceError::Pcap(_)) => {
                Some("the file may be truncated or not a pcap/pcapng capture".to_string())
            }
            _ => None,
        };
        CliError::new(err.to_string(), hint)
    }
}

fn cmd_interfaces(json: bool) -> Result<(), CliError> {
    let interfaces = list_interfaces();
    let mut out = io::stdout().lock();
    if json {
        let text = serde_json::to_string_pretty(&interfaces).context("JSON serialization failed")?;
        writeln!(out, "{text}").context("failed to write to stdout")?;
        return Ok(());
    }
    if interfaces.is_empty() {
        return Err(CliError::new(
            "no network interfaces found",
            Some("live capture may need elevated privileges".to_string()),
        ));
    }
    for iface in interfaces {
        let state = match (iface.is_up, iface.is_loopback) {
            (true, true) => "up,loopback",
            (true, false) => "up",
            (false, true) => "down,loopback",
            (false, false) => "down",
        };
        writeln!(
            out,
            "{:<16} {:>4}  {:<14} {}",
            iface.name,
            iface.index,
            state,
            iface
                .ips
                .iter()
                .map(|ip| ip.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
        .context("failed to write to stdout")?;
    }
    Ok(())
}

struct CaptureArgs {
    interface: Option<String>,
    promiscuous: bool,
    file: Option<PathBuf>,
    config: Option<PathBuf>,
    no_packets: bool,
    chunk_types: Vec<String>,
    skip_unknown: bool,
    pretty: bool,
    quiet: bool,
}

fn cmd_capture(args: CaptureArgs) -> Result<(), CliError> {
    let source = match (&args.interface, &args.file) {
        (Some(name), _) => CaptureSource::interface(name.clone(), args.promiscuous),
        (None, Some(file)) => {
            let resolved = resolve_input_path(file)?;
            validate_input_file(&resolved)?;
            CaptureSource::file(resolved)
        }
        (None, None) => {
            return Err(CliError::new(
                "missing capture input",
                Some("use --interface NAME or --file PATH".to_string()),
            ));
        }
    };
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };

    let mut builder = EngineBuilder::new(source).config(config);
    if args.no_packets {
        builder = builder.packet_predicate(|_: &Frame| -> Result<bool, PredicateError> { Ok(false) });
    }
    if !args.chunk_types.is_empty() || args.skip_unknown {
        let wanted = args.chunk_types.clone();
        let skip_unknown = args.skip_unknown;
        builder = builder.stream_predicate(move |chunk: &ContentChunk| -> Result<bool, PredicateError> {
            Ok(chunk_wanted(&wanted, skip_unknown, &chunk.chunk_type))
        });
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let stats = runtime.block_on(run_capture(builder, args.pretty))?;

    if !args.quiet {
        eprintln!(
            "OK: {} frames read, {} packets and {} chunks printed ({} streams, {} evicted)",
            stats.frames_read,
            stats.packets_delivered,
            stats.chunks_delivered,
            stats.streams_completed,
            stats.flows_evicted
        );
    }
    Ok(())
}

async fn run_capture(builder: EngineBuilder, pretty: bool) -> Result<CaptureStats, CliError> {
    let (handle, mut outputs) = builder.start()?;
    let cancel = handle.cancellation_token();
    let mut out = io::stdout().lock();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let (mut packets_open, mut chunks_open, mut interrupted) = (true, true, false);
    let mut write_error = None;

    while packets_open || chunks_open {
        let record = tokio::select! {
            frame = outputs.packets.recv(), if packets_open => match frame {
                Some(frame) => Some(packet_record(&frame)),
                None => {
                    packets_open = false;
                    None
                }
            },
            chunk = outputs.chunks.recv(), if chunks_open => match chunk {
                Some(chunk) => Some(chunk_record(&chunk)),
                None => {
                    chunks_open = false;
                    None
                }
            },
            _ = &mut ctrl_c, if !interrupted => {
                info!("interrupted, closing capture");
                interrupted = true;
                cancel.cancel();
                None
            }
            else => break,
        };
        let Some(record) = record else {
            continue;
        };
        if let Err(err) = write_record(&mut out, &record, pretty) {
            debug!(error = %err, "stdout closed, stopping capture");
            write_error = Some(err);
            cancel.cancel();
            break;
        }
    }
    drop(outputs.packets);
    drop(outputs.chunks);

    let stats = handle.wait().await?;
    let engine_error = outputs.errors.try_recv().ok();
    if let Some(err) = write_error {
        if err.kind() != io::ErrorKind::BrokenPipe {
            return Err(CliError::new(format!("failed to write output: {err}"), None));
        }
    }
    match engine_error {
        Some(err) => Err(err.into()),
        None => Ok(stats),
    }
}

fn chunk_wanted(wanted: &[String], skip_unknown: bool, chunk_type: &str) -> bool {
    if skip_unknown && chunk_type == TYPE_UNKNOWN {
        return false;
    }
    wanted.is_empty() || wanted.iter().any(|t| t == chunk_type)
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record {
    Packet {
        timestamp: String,
        length: usize,
        capture_length: usize,
        summary: String,
    },
    Chunk {
        #[serde(rename = "type")]
        chunk_type: String,
        length: usize,
        encoding: &'static str,
        content: String,
    },
}

fn packet_record(frame: &Arc<Frame>) -> Record {
    Record::Packet {
        timestamp: frame.metadata.timestamp.clone(),
        length: frame.metadata.length,
        capture_length: frame.metadata.capture_length,
        summary: frame.summary(),
    }
}

/// Text content is printed as is, anything else as base64.
fn chunk_record(chunk: &ContentChunk) -> Record {
    let (encoding, content) = match std::str::from_utf8(&chunk.content) {
        Ok(text) => ("utf8", text.to_string()),
        Err(_) => ("base64", BASE64.encode(&chunk.content)),
    };
    Record::Chunk {
        chunk_type: chunk.chunk_type.clone(),
        length: chunk.content.len(),
        encoding,
        content,
    }
}

fn write_record(out: &mut impl Write, record: &Record, pretty: bool) -> io::Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(record)?
    } else {
        serde_json::to_string(record)?
    };
    writeln!(out, "{json}")?;
    out.flush()
}

fn load_config(path: &Path) -> Result<EngineConfig, CliError> {
    let text = fs::read_to_string(path).map_err(|err| {
        CliError::new(
            format!("cannot read config file {}: {err}", path.display()),
            Some("pass a readable JSON file to --config".to_string()),
        )
    })?;
    let config: EngineConfig = serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            format!("invalid config file {}: {err}", path.display()),
            Some("unknown fields are ignored; check value types".to_string()),
        )
    })?;
    config.validate().map_err(EngineError::from)?;
    Ok(config)
}

fn validate_input_file(input: &Path) -> Result<(), CliError> {
    if !input.exists() {
        return Err(CliError::new(
            format!("input file not found: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    if !input.is_file() {
        return Err(CliError::new(
            format!("input is not a file: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    let ext = input
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if ext != "pcap" && ext != "pcapng" {
        return Err(CliError::new(
            format!("unsupported input format '{}'", input.display()),
            Some("expected a .pcap or .pcapng file".to_string()),
        ));
    }
    Ok(())
}

fn resolve_input_path(input: &Path) -> Result<PathBuf, CliError> {
    let pattern = input.to_string_lossy();
    if !is_glob_pattern(&pattern) {
        return Ok(input.to_path_buf());
    }

    let paths = glob(&pattern).map_err(|err| {
        CliError::new(
            format!("invalid input pattern '{}'", pattern),
            Some(format!("pattern error: {}", err.msg)),
        )
    })?;
    let mut matches = Vec::new();
    for entry in paths {
        let path = entry.map_err(|err| {
            CliError::new(
                format!("invalid input pattern '{}'", pattern),
                Some(format!("pattern error: {}", err)),
            )
        })?;
        if path.is_file() {
            matches.push(path);
        }
    }

    match matches.len() {
        0 => Err(CliError::new(
            format!("no files match pattern '{}'", pattern),
            Some("check the path or quote the pattern; expected .pcap or .pcapng".to_string()),
        )),
        1 => Ok(matches.remove(0)),
        n => {
            let listed = matches
                .iter()
                .take(3)
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let more = if n > 3 { ", ..." } else { "" };
            Err(CliError::new(
                format!("multiple files match pattern '{pattern}' ({n} matches); matches: {listed}{more}"),
                Some("pass a single capture file, or run once per file".to_string()),
            ))
        }
    }
}

fn is_glob_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?') || input.contains('[')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_filter_combines_types_and_unknown() {
        let wanted = vec!["http-request".to_string()];
        assert!(chunk_wanted(&wanted, false, "http-request"));
        assert!(!chunk_wanted(&wanted, false, "text/plain"));
        assert!(chunk_wanted(&[], true, "text/plain"));
        assert!(!chunk_wanted(&[], true, "unknown"));
    }

    #[test]
    fn binary_chunks_are_base64() {
        let record = chunk_record(&ContentChunk::new("image/png", vec![0x89, 0x50, 0xff]));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "chunk");
        assert_eq!(value["type"], "image/png");
        assert_eq!(value["encoding"], "base64");
        assert_eq!(value["content"], "iVD/");
    }

    #[test]
    fn glob_detection() {
        assert!(is_glob_pattern("dumps/*.pcap"));
        assert!(!is_glob_pattern("dumps/a.pcap"));
    }
}
