//! rootgate
//!
//! Filesystem and shell gateway confined to one root directory.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use gateway::config::Config;
use gateway::Gateway;
use protocol::{
    Envelope, ErrorKind, ErrorMessage, Request, ResponseBody, ResponseEnvelope, OPERATIONS,
};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// rootgate - filesystem and shell gateway confined to one root directory.
#[derive(Parser, Debug)]
#[command(name = "rootgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Session root directory (overrides config and environment)
    #[arg(short, long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run one operation and print the JSON response
    Call {
        /// Operation name (see `rootgate ops`)
        op: String,

        /// Operation parameters as a JSON object
        #[arg(long, short, default_value = "{}")]
        params: String,
    },

    /// Answer request envelopes from stdin until it closes
    Serve {
        /// Envelope encoding on stdin and stdout
        #[arg(long, short, value_enum, default_value = "json")]
        format: WireFormat,
    },

    /// List available operations
    Ops,

    /// Print the effective configuration
    Config,
}

/// Envelope encoding for `serve`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// One JSON envelope per line
    Json,
    /// MessagePack envelopes, each behind a 4-byte big-endian length
    Msgpack,
}

/// Largest MessagePack frame accepted by `serve` (16 MB).
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides, then the command line
    config.apply_env_overrides();
    if let Some(root) = &cli.root {
        config.gateway.root = Some(root.clone());
    }

    let _log_guard = init_tracing(&config, cli.verbose)?;
    tracing::debug!("rootgate starting");

    config.validate()?;

    match cli.command {
        Commands::Ops => {
            for op in OPERATIONS {
                println!("{op}");
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
        Commands::Call { op, params } => {
            if !OPERATIONS.contains(&op.as_str()) {
                bail!("unknown operation '{}'; run `rootgate ops` to list them", op);
            }
            let params: serde_json::Value =
                serde_json::from_str(&params).context("--params must be valid JSON")?;
            let request = Request::from_parts(&op, params)
                .with_context(|| format!("invalid parameters for {}", op))?;

            let gateway = open_gateway(&mut config)?;
            let response = gateway.handle(Envelope::new(1, request)).await;
            println!("{}", serde_json::to_string_pretty(&response)?);

            // The log guard must drop before the process exits
            return Ok(exit_code(&response));
        }
        Commands::Serve { format } => {
            let gateway = open_gateway(&mut config)?;
            let mut stdout = tokio::io::stdout();
            match format {
                WireFormat::Json => {
                    serve_json(&gateway, BufReader::new(tokio::io::stdin()), &mut stdout).await?
                }
                WireFormat::Msgpack => {
                    serve_msgpack(&gateway, tokio::io::stdin(), &mut stdout).await?
                }
            }
            tracing::info!("stdin closed, shutting down");
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Process status for a one-shot call: failure when the operation failed.
fn exit_code(response: &ResponseEnvelope) -> ExitCode {
    match response.body {
        ResponseBody::Ok(_) => ExitCode::SUCCESS,
        ResponseBody::Error(_) => ExitCode::FAILURE,
    }
}

/// Install the tracing subscriber: stderr always, plus the configured log
/// file. The returned guard must live until exit so buffered lines flush.
fn init_tracing(config: &Config, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.gateway.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    let (file_layer, guard) = match &config.gateway.log_file {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn split_log_path(path: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    let name = path
        .file_name()
        .with_context(|| format!("log_file has no file name: {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, PathBuf::from(name)))
}

/// Build the gateway, asking for a root interactively if none is configured.
fn open_gateway(config: &mut Config) -> anyhow::Result<Gateway> {
    if config.gateway.root.is_none() {
        config.gateway.root = Some(prompt_for_root()?);
    }

    let gateway = Gateway::from_config(config).context("Failed to install session root")?;
    if let Some(root) = gateway.root() {
        tracing::info!("Serving session root {}", root.display());
    }
    Ok(gateway)
}

/// Ask on stderr/stdin until the user names an existing directory.
fn prompt_for_root() -> anyhow::Result<PathBuf> {
    let stdin = io::stdin();
    let mut stderr = io::stderr();

    loop {
        write!(stderr, "Session root directory: ")?;
        stderr.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            bail!("no session root given (use --root, ROOTGATE_ROOT or the config file)");
        }

        let candidate = PathBuf::from(line.trim());
        if candidate.as_os_str().is_empty() {
            continue;
        }
        if !candidate.exists() {
            writeln!(stderr, "Path does not exist: {}", candidate.display())?;
            continue;
        }
        if !candidate.is_dir() {
            writeln!(stderr, "Not a directory: {}", candidate.display())?;
            continue;
        }
        return Ok(candidate);
    }
}

/// Error response for input that is not a request envelope.
fn malformed(error: impl std::fmt::Display) -> ResponseEnvelope {
    tracing::warn!(error = %error, "malformed request envelope");
    ResponseEnvelope::error(
        0,
        ErrorMessage {
            kind: ErrorKind::InternalError,
            message: format!("malformed request: {}", error),
        },
    )
}

/// Answer one JSON envelope per input line until the input closes.
async fn serve_json<R, W>(gateway: &Gateway, input: R, output: &mut W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => gateway.handle(envelope).await,
            Err(e) => malformed(e),
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        output.write_all(&out).await?;
        output.flush().await?;
    }

    Ok(())
}

/// Answer length-prefixed MessagePack envelopes until the input closes.
async fn serve_msgpack<R, W>(gateway: &Gateway, mut input: R, output: &mut W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let len = match input.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        if len > MAX_FRAME_SIZE {
            bail!("frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_SIZE);
        }

        let mut payload = vec![0u8; len];
        input
            .read_exact(&mut payload)
            .await
            .context("truncated request frame")?;

        let response = match Envelope::from_msgpack(&payload) {
            Ok(envelope) => gateway.handle(envelope).await,
            Err(e) => malformed(e),
        };

        let out = response.to_msgpack()?;
        let out_len = u32::try_from(out.len()).context("response frame too large")?;
        output.write_u32(out_len).await?;
        output.write_all(&out).await?;
        output.flush().await?;
    }

    Ok(())
}
