mod commands;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use unify_ssg::FailOn;

#[derive(Parser)]
#[command(name = "unify")]
#[command(about = "An incremental static site generator", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum FailOnArg {
    Warning,
    Error,
}

impl From<FailOnArg> for FailOn {
    fn from(value: FailOnArg) -> Self {
        match value {
            FailOnArg::Warning => FailOn::Warning,
            FailOnArg::Error => FailOn::Error,
        }
    }
}

#[derive(Args, Clone)]
pub struct BuildArgs {
    #[arg(long, short)]
    source: Option<PathBuf>,

    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Path to unify.toml (defaults to ./unify.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[arg(long)]
    pretty_urls: bool,

    #[arg(long)]
    minify: bool,

    /// Treat recoverable issues as errors (warning) or stop at the first error (error)
    #[arg(long, value_enum)]
    fail_on: Option<FailOnArg>,

    #[arg(long)]
    no_cache: bool,

    #[arg(long)]
    clean: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create unify.toml and a starter source tree
    Init {
        #[arg(long, short, default_value = "src")]
        source: String,

        #[arg(long, short, default_value = "dist")]
        output: String,
    },
    Build(BuildArgs),
    Watch(BuildArgs),
    Serve {
        #[command(flatten)]
        build: BuildArgs,

        #[arg(long, default_value = "3000")]
        port: u16,

        #[arg(long)]
        open: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    commands::init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Init { source, output } => commands::init_site(&source, &output),
        Commands::Build(args) => commands::build_site(&args),
        Commands::Watch(args) => commands::watch_site(&args),
        Commands::Serve { build, port, open } => commands::serve_site(&build, port, open).await,
    };

    if let Err(error) = result {
        eprintln!("Error: {error}");
        std::process::exit(error.exit_code());
    }
}
