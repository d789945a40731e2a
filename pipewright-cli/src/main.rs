use clap::Parser;
use tracing_subscriber::EnvFilter;

mod args;
mod cmd;
mod commands;
mod exit_codes;
mod output;

pub use args::*;
use commands::{CacheAction, Command};

const LOG_ENV: &str = "PIPEWRIGHT_LOG";

#[derive(Debug, Parser)]
#[command(name = "pipewright", version, about = "Runtime pipeline compiler")]
struct Cli {
    /// Log at debug level unless PIPEWRIGHT_LOG or RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create tokio runtime: {e}");
            std::process::exit(exit_codes::RUNTIME_ERROR);
        }
    };

    let exit_code = rt.block_on(run_command(cli.command));
    std::process::exit(exit_code);
}

fn init_logging(verbose: bool) {
    let filter = std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run_command(command: Command) -> i32 {
    match command {
        Command::Validate { path, output } => cmd::validate::validate_cmd(&path, output).await,
        Command::Shapes { path, output } => cmd::shapes::shapes_cmd(&path, output).await,
        Command::Emit { path, shape, output } => cmd::emit::emit_cmd(&path, shape, output).await,
        Command::Build {
            path,
            shape,
            nested,
            engine,
            output,
        } => cmd::build::build_cmd(&path, shape.as_deref(), nested, engine, output).await,
        Command::Run {
            path,
            shape,
            args,
            args_file,
            engine,
            output,
        } => cmd::run::run_cmd(&path, shape, args.as_deref(), args_file.as_deref(), engine, output).await,
        Command::Cache { action } => match action {
            CacheAction::List { cache, output } => cmd::cache::list_cmd(cache, output).await,
            CacheAction::Clear { cache, output } => cmd::cache::clear_cmd(cache, output).await,
            CacheAction::Prune {
                cache,
                older_than_secs,
                output,
            } => cmd::cache::prune_cmd(cache, older_than_secs, output).await,
        },
        Command::Toolchain { module } => cmd::toolchain::toolchain_cmd(&module).await,
    }
}
