use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;

use heddle_config::Config;
use heddle_types::ErrorKind;

use crate::commands::ExitStatus;
use crate::printer::Printer;

mod commands;
mod logging;
mod printer;

#[derive(Parser)]
#[command(author, version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Do not print any output.
    #[arg(global = true, long, short, conflicts_with = "verbose")]
    quiet: bool,

    /// Use verbose output.
    #[arg(global = true, long, short, conflicts_with = "quiet")]
    verbose: bool,

    /// Path to the shared cache directory.
    #[arg(global = true, long, env = "CACHE_ROOT")]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new version spec.
    Create(CreateArgs),
    /// Resolve a spec into a lock and print the plan.
    Validate(ValidateArgs),
    /// Materialize a version into its workspace.
    Realize(RealizeArgs),
    /// Realize, then run the engine's interactive server.
    RunUi(RunUiArgs),
    /// Realize, then run one graph job headlessly and emit the result.
    RunHandler(RunHandlerArgs),
    /// Copy a version spec under a new id.
    Clone(CloneArgs),
    /// Remove a version's workspace and lock.
    Delete(DeleteArgs),
    /// Enumerate known versions.
    List,
}

#[derive(Args)]
struct CreateArgs {
    version_id: String,

    /// The engine repository, as `URL[@ref]`.
    #[arg(long)]
    engine: String,

    /// An extension repository, as `URL[@ref]`; may be given more than once.
    #[arg(long = "extension")]
    extensions: Vec<String>,

    /// A model source, as `URI[::target_subdir]` (default subdir:
    /// `checkpoints`); may be given more than once.
    #[arg(long = "model")]
    models: Vec<String>,

    /// An extra pip requirement; may be given more than once.
    #[arg(long = "package")]
    packages: Vec<String>,

    /// Overwrite an existing spec file.
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct ValidateArgs {
    version_id: String,

    /// Resolve without writing the lock.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
#[allow(clippy::struct_excessive_bools)]
struct RealizeArgs {
    version_id: String,

    /// Realize into this directory instead of the default workspace.
    #[arg(long)]
    target: Option<PathBuf>,

    /// Use only cached sources, models and wheels.
    #[arg(long, env = "OFFLINE")]
    offline: bool,

    /// A directory of pre-built wheels for offline installs.
    #[arg(long)]
    wheels_dir: Option<PathBuf>,

    /// Skip model fetches.
    #[arg(long)]
    skip_models: bool,

    /// Replace pre-existing non-symlink projection targets.
    #[arg(long)]
    overwrite: bool,

    /// Print the plan without touching the filesystem.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct RunUiArgs {
    version_id: String,

    /// The address the engine listens on.
    #[arg(long)]
    host: Option<String>,

    #[arg(long, default_value_t = 8188)]
    port: u16,

    /// Extra arguments forwarded to the engine verbatim.
    #[arg(last = true)]
    engine_args: Vec<String>,
}

#[derive(Args)]
struct RunHandlerArgs {
    version_id: String,

    /// The graph to execute, as a JSON file.
    #[arg(long)]
    workflow: PathBuf,

    /// A staged input, as `NAME=URL`; may be given more than once.
    #[arg(long = "input")]
    inputs: Vec<String>,

    /// Delivery mode.
    #[arg(long, value_parser = ["base64", "object"])]
    output: Option<String>,

    /// Write the response here instead of stdout.
    #[arg(long)]
    out_file: Option<PathBuf>,

    /// The destination bucket for `object` output.
    #[arg(long)]
    bucket: Option<String>,
}

#[derive(Args)]
struct CloneArgs {
    src_id: String,
    dst_id: String,
}

#[derive(Args)]
struct DeleteArgs {
    version_id: String,

    /// Also remove the spec file.
    #[arg(long)]
    remove_spec: bool,

    /// Also remove model symlinks projected outside the workspace.
    #[arg(long)]
    remove_models_symlinks: bool,

    /// The workspace directory, when realized with `--target`.
    #[arg(long)]
    target: Option<PathBuf>,
}

async fn inner() -> Result<ExitStatus> {
    let cli = Cli::parse();

    logging::setup_logging(if cli.verbose {
        logging::Level::Verbose
    } else {
        logging::Level::Default
    })?;

    let printer = if cli.quiet {
        Printer::Quiet
    } else if cli.verbose {
        Printer::Verbose
    } else {
        Printer::Default
    };

    let mut config = Config::from_env();
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_root = Some(cache_dir);
    }

    match cli.command {
        Commands::Create(args) => commands::create(
            &config,
            &args.version_id,
            &args.engine,
            &args.extensions,
            &args.models,
            &args.packages,
            args.force,
            printer,
        ),
        Commands::Validate(args) => {
            commands::validate(&config, &args.version_id, args.dry_run, printer).await
        }
        Commands::Realize(args) => {
            commands::realize(
                &config,
                &args.version_id,
                args.target,
                args.offline,
                args.wheels_dir,
                args.skip_models,
                args.overwrite,
                args.dry_run,
                printer,
            )
            .await
        }
        Commands::RunUi(args) => {
            commands::run_ui(
                &config,
                &args.version_id,
                args.host,
                args.port,
                args.engine_args,
                printer,
            )
            .await
        }
        Commands::RunHandler(args) => {
            commands::run_handler(
                &config,
                &args.version_id,
                &args.workflow,
                &args.inputs,
                args.output.as_deref(),
                args.bucket,
                args.out_file,
                cli.verbose,
                printer,
            )
            .await
        }
        Commands::Clone(args) => commands::clone(&config, &args.src_id, &args.dst_id, printer),
        Commands::Delete(args) => commands::delete(
            &config,
            &args.version_id,
            args.remove_spec,
            args.remove_models_symlinks,
            args.target,
            printer,
        ),
        Commands::List => commands::list(&config, printer),
    }
}

/// Find the most specific classified error in the chain.
fn classify(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<commands::CliError>() {
            return err.kind;
        }
        if let Some(err) = cause.downcast_ref::<heddle_spec::SpecError>() {
            return err.kind();
        }
        if let Some(err) = cause.downcast_ref::<heddle_realize::RealizeError>() {
            return err.kind();
        }
        if let Some(err) = cause.downcast_ref::<heddle_handler::HandlerError>() {
            return err.kind();
        }
        if let Some(err) = cause.downcast_ref::<heddle_git::GitError>() {
            return err.kind();
        }
        if let Some(err) = cause.downcast_ref::<heddle_client::FetchError>() {
            return err.kind();
        }
        if let Some(err) = cause.downcast_ref::<heddle_client::UploadError>() {
            return err.kind();
        }
        if let Some(err) = cause.downcast_ref::<heddle_venv::VenvError>() {
            return err.kind();
        }
        if cause.downcast_ref::<heddle_types::InvalidVersionId>().is_some() {
            return ErrorKind::Usage;
        }
    }
    ErrorKind::Internal
}

#[tokio::main]
async fn main() -> ExitCode {
    match inner().await {
        Ok(status) => status.into(),
        Err(err) => {
            let kind = classify(&err);
            // One terminal line: the kind token plus the collapsed chain.
            let message = err
                .chain()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(": ");
            #[allow(clippy::print_stderr)]
            {
                eprintln!("{} {message}", format!("[{kind}]").red().bold());
            }
            ExitCode::from(kind.exit_code())
        }
    }
}
