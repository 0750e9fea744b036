mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{exit_code_for, Context};
use kubetester_core::{install_signal_handler, StopSignal};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "kubetester",
    version,
    about = "Provision and tear down managed Kubernetes test environments"
)]
struct Cli {
    /// Path to the environment config file.
    #[arg(short, long, default_value = "kubetester.toml", global = true)]
    config: PathBuf,

    /// Directory holding state documents (default: .kubetester next to the config).
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Override the provider named in the config ("command" or "mock").
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a starter config file.
    Init {
        /// Environment name.
        name: String,
        /// Cloud region for the environment.
        #[arg(long, default_value = "us-west-2")]
        region: String,
        /// Overwrite an existing config file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Parse and validate the config file.
    Validate,
    /// Provision the environment, resuming after whatever already exists.
    Up,
    /// Delete everything recorded as created.
    Down,
    /// Show the recorded state of the environment.
    Status,
    /// Exit 0 if the environment is up and healthy, 1 otherwise.
    IsUp,
    /// Collect logs from the environment's node groups.
    Logs,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("KUBETESTER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let stop = StopSignal::new();
    if matches!(
        cli.command,
        Commands::Up | Commands::Down | Commands::IsUp | Commands::Logs
    ) {
        install_signal_handler(&stop);
    }

    let ctx = Context {
        config_path: cli.config,
        state_dir: cli.state_dir,
        provider: cli.provider,
        json: cli.json,
        stop,
    };

    let result = match cli.command {
        Commands::Init {
            name,
            region,
            force,
        } => commands::init::run(&ctx.config_path, &name, &region, force, ctx.json),
        Commands::Validate => commands::validate::run(&ctx),
        Commands::Up => commands::up::run(&ctx),
        Commands::Down => commands::down::run(&ctx),
        Commands::Status => commands::status::run(&ctx),
        Commands::IsUp => commands::is_up::run(&ctx),
        Commands::Logs => commands::logs::run(&ctx),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir, ctx.json),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
