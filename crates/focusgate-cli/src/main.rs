use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "focusgate-cli", version, about = "Focusgate policy engine CLI")]
struct Cli {
    /// Log engine decisions at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one target end to end and print the decision
    Check(commands::check::CheckArgs),
    /// Show or set the pause mode
    Pause {
        /// off, soft or hard; omit to show the current mode
        mode: Option<String>,
    },
    /// Whitelist and blacklist rules
    Rule {
        #[command(subcommand)]
        action: commands::rule::RuleAction,
    },
    /// Focus mode control
    Focus {
        #[command(subcommand)]
        action: commands::focus::FocusAction,
    },
    /// Scheduled exception windows
    Window {
        #[command(subcommand)]
        action: commands::window::WindowAction,
    },
    /// Points of interest and geofence policies
    Geo {
        #[command(subcommand)]
        action: commands::geo::GeoAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("focusgate_core=debug,focusgate_cli=debug")
    } else {
        EnvFilter::try_from_env("FOCUSGATE_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Check(args) => commands::check::run(args).await,
        Commands::Pause { mode } => commands::pause::run(mode).await,
        Commands::Rule { action } => commands::rule::run(action).await,
        Commands::Focus { action } => commands::focus::run(action).await,
        Commands::Window { action } => commands::window::run(action).await,
        Commands::Geo { action } => commands::geo::run(action).await,
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
