use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "mpschedctl",
    about = "mpsched — programmable multipath scheduling",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and validate scheduler programs.
    ///
    /// Directories are searched recursively for `.progmp` files.
    Check {
        /// Program files or directories
        #[arg(required = true)]
        paths: Vec<String>,
        /// Engine config whose limits apply (default: built-in limits)
        #[arg(short, long)]
        config: Option<String>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Run a program against a scenario and print every decision
    Simulate {
        /// Scheduler program file
        #[arg(short, long)]
        program: String,
        /// Scenario file (registers, user value, subflows)
        #[arg(short, long)]
        scenario: String,
        /// Engine config (default: built-in config)
        #[arg(short, long)]
        config: Option<String>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            paths,
            config,
            format,
        } => commands::check::check(&paths, config.as_deref(), &format),
        Commands::Simulate {
            program,
            scenario,
            config,
            format,
        } => commands::simulate::simulate(&program, &scenario, config.as_deref(), &format),
    }
}
