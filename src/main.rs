//! streambridge - Stream text records through a child process.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use streambridge::bridge::{BridgeError, SeparatorSet};
use streambridge::config::{BridgeConfig, ConfigError, ConfigLoader};
use streambridge::display::{self, OutputFormat, TuplePrinter};
use streambridge::environment::ProcessEnvironment;
use streambridge::operation::{Operation, OperationError, StreamingOperation};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "streambridge",
    about = "Stream text records through a child process",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed stdin lines to a child process and print the tuples it emits.
    Run {
        /// Config file (defaults to .streambridge.toml, then the user config dir).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Record separators, with backslash escapes (e.g. '\r\n').
        #[arg(short, long)]
        separators: Option<String>,
        /// Working directory for the child.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Seconds to wait for a batch per record.
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Output format for tuples.
        #[arg(short, long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
        /// Do not wait for a batch after each record.
        #[arg(long)]
        no_pace: bool,
        /// Child command line (after `--`).
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Print the resolved configuration.
    CheckConfig {
        /// Config file to check.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Operation(#[from] OperationError),
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

struct RunOptions {
    config: Option<PathBuf>,
    separators: Option<String>,
    cwd: Option<PathBuf>,
    timeout: Option<u64>,
    format: OutputFormat,
    pace: bool,
    command: Vec<String>,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<BridgeConfig, ConfigError> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    loader.load()
}

async fn run(options: RunOptions) -> Result<(), CliError> {
    let mut config = load_config(options.config)?;
    if !options.command.is_empty() {
        config.command = options.command;
    }
    if let Some(raw) = options.separators {
        let separators = SeparatorSet::from_escaped(&raw)?;
        config.separators = Some(separators.chars().iter().collect());
    }
    if let Some(dir) = options.cwd {
        config.working_dir = Some(dir);
    }
    if let Some(secs) = options.timeout {
        config.flush_timeout_secs = secs;
    }

    let bridge = config.build_bridge()?;
    let cancel = bridge.cancellation_token();
    let mut operation = StreamingOperation::new(bridge).pace(options.pace);

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            cancel.cancel();
        });
    }

    operation.prepare(&ProcessEnvironment).await?;
    if let Some(command) = operation.bridge().command() {
        display::print_bridge_start(command, operation.bridge().pid());
    }

    let mut printer = TuplePrinter::stdout(options.format);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut records = 0;

    let fed = async {
        loop {
            let line = tokio::select! {
                () = cancel.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };
            let record = line.strip_suffix('\r').unwrap_or(&line);
            operation.operate(record, &mut printer).await?;
            records += 1;
        }
        Ok::<(), CliError>(())
    }
    .await;

    // Always tear down, even when feeding failed.
    let cleaned = operation.cleanup(&mut printer).await;
    display::print_bridge_end(records, printer.written());

    fed?;
    cleaned?;
    Ok(())
}

fn check_config(path: Option<PathBuf>) -> Result<(), CliError> {
    let config = load_config(path)?;
    print!("{}", toml::to_string_pretty(&config)?);
    config.validate()?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            config,
            separators,
            cwd,
            timeout,
            format,
            no_pace,
            command,
        } => {
            let options = RunOptions {
                config,
                separators,
                cwd,
                timeout,
                format: format.into(),
                pace: !no_pace,
                command,
            };
            run(options).await
        }
        Commands::CheckConfig { config } => check_config(config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            display::print_error(&e);
            ExitCode::FAILURE
        }
    }
}
