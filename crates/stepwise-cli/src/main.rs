mod session;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use stepwise_common::Direction;
use stepwise_config::{AppConfig, ConfigLoader, LogConfig, LogFormat};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::session::Session;

#[derive(Parser, Debug)]
#[command(
    name = "stepwise",
    version,
    about = "Apply and revert database migrations one step at a time"
)]
struct Cli {
    /// Config file (defaults to stepwise.yml / .yaml / .toml in the working directory)
    #[arg(long, global = true, env = "STEPWISE_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true, env = "STEPWISE_DATABASE")]
    database: Option<PathBuf>,

    /// Directory holding migration scripts
    #[arg(long = "dir", global = true, env = "STEPWISE_MIGRATIONS_DIR")]
    migrations_dir: Option<PathBuf>,

    /// Show when each migration was applied and flag missing files
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List migrations, marking the applied ones (default)
    Status {
        #[arg(hide = true)]
        rest: Vec<String>,
    },
    /// Create an empty migration script
    #[command(alias = "create")]
    New {
        #[arg(hide = true)]
        rest: Vec<String>,
    },
    /// Apply the next pending migration
    Up {
        #[arg(hide = true)]
        rest: Vec<String>,
    },
    /// Revert the most recently applied migration
    Down {
        #[arg(hide = true)]
        rest: Vec<String>,
    },
    #[command(external_subcommand)]
    Unknown(Vec<String>),
}

impl Command {
    /// Words after a known command are accepted and ignored.
    fn ignored(&self) -> &[String] {
        match self {
            Command::Status { rest }
            | Command::New { rest }
            | Command::Up { rest }
            | Command::Down { rest } => rest,
            Command::Unknown(_) => &[],
        }
    }
}

fn main() -> ExitCode {
    // Optional .env with STEPWISE_* overrides
    let _ = dotenvy::dotenv();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if is_unknown_usage(&e) => {
            eprintln!("unknown command");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // The final subscriber depends on the config, so loading logs to a
    // provisional one.
    let config = match load_config_logged(&cli, std::io::stderr) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:?}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.log);

    match run(&cli, &config) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

/// Flags and words clap does not know are reported like an unknown command.
fn is_unknown_usage(e: &clap::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::UnknownArgument | ErrorKind::InvalidSubcommand
    )
}

fn load_config_logged<W>(cli: &Cli, writer: W) -> Result<AppConfig>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provisional = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .finish();
    tracing::subscriber::with_default(provisional, || load_config(cli))
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = ConfigLoader::new().with_path(cli.config.clone()).load()?;
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if let Some(dir) = &cli.migrations_dir {
        config.migrations_dir = dir.clone();
    }
    Ok(config)
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Returns the process exit status.
fn run(cli: &Cli, config: &AppConfig) -> Result<u8> {
    let mut out = std::io::stdout().lock();

    if let Some(command) = &cli.command {
        let ignored = command.ignored();
        if !ignored.is_empty() {
            debug!("ignoring extra arguments: {ignored:?}");
        }
    }

    match &cli.command {
        Some(Command::Unknown(args)) => {
            debug!("unrecognised arguments: {args:?}");
            eprintln!("unknown command");
            return Ok(1);
        }
        None | Some(Command::Status { .. }) => {
            let session = Session::open(config)?;
            session.write_status(&mut out, cli.verbose)?;
        }
        Some(Command::New { .. }) => {
            let session = Session::open(config)?;
            let path = session.create()?;
            writeln!(out, "created {}", path.display())?;
        }
        Some(Command::Up { .. }) => {
            let mut session = Session::open(config)?;
            session.step(Direction::Up)?;
            session.write_status(&mut out, cli.verbose)?;
        }
        Some(Command::Down { .. }) => {
            let mut session = Session::open(config)?;
            session.step(Direction::Down)?;
            session.write_status(&mut out, cli.verbose)?;
        }
    }

    Ok(0)
}
