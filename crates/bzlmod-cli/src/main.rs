use bzlmod_fetch::CacheDir;
use bzlmod_lockfile::{workspace_file, Workspace, LOCKFILE_NAME};
use bzlmod_resolve::{resolve, ResolveOptions};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "bzlmod",
    version,
    about = "Resolves external dependencies of a module-based workspace"
)]
struct Cli {
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
    /// Resolve dependencies and write the lock file and a generated
    /// workspace file.
    Resolve {
        /// Vendor fetched dependencies into this directory (relative to
        /// the workspace root), ready to be checked into source control.
        #[arg(long)]
        vendor_dir: Option<String>,
        /// Registries to pull dependencies from; earlier entries have
        /// higher priority.
        #[arg(long, value_delimiter = ',')]
        registries: Vec<String>,
    },
    /// Fetch the given repo(s) and print the path(s) they were fetched to.
    Fetch {
        /// Fetch all known repos.
        #[arg(long, default_value_t = false)]
        all: bool,
        /// Repo names from the lock file.
        repos: Vec<String>,
    },
}

fn main() -> ExitCode {
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
            tracing_subscriber::EnvFilter::try_from_env("BZLMOD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        Commands::Resolve {
            vendor_dir,
            registries,
        } => run_resolve(vendor_dir, registries),
        Commands::Fetch { all, repos } => run_fetch(all, &repos),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("Error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run_resolve(vendor_dir: Option<String>, registries: Vec<String>) -> Result<(), String> {
    let ws_dir = current_dir()?;
    let cache = CacheDir::default_location().map_err(|e| e.to_string())?;
    let mut options = ResolveOptions::new(cache);
    options.vendor_dir = vendor_dir;
    options.registries = registries;

    let ws = resolve(&ws_dir, options).map_err(|e| e.to_string())?;

    ws.write_to_file(&ws_dir.join(LOCKFILE_NAME))
        .map_err(|e| e.to_string())?;
    std::fs::write(
        ws_dir.join(workspace_file::WORKSPACE_FILE_NAME),
        workspace_file::render(&ws),
    )
    .map_err(|e| e.to_string())?;
    Ok(())
}

fn run_fetch(all: bool, repos: &[String]) -> Result<(), String> {
    let ws_dir = current_dir()?;
    let mut ws =
        Workspace::read_from_file(&ws_dir.join(LOCKFILE_NAME)).map_err(|e| e.to_string())?;
    let cache = CacheDir::default_location().map_err(|e| e.to_string())?;
    ws.bind(&ws_dir, cache);

    let names: Vec<String> = if all {
        // Every repo except the root itself.
        ws.repos
            .keys()
            .filter(|name| **name != ws.root_module_name)
            .cloned()
            .collect()
    } else {
        if repos.is_empty() {
            return Err("no repos given (use --all to fetch everything)".to_owned());
        }
        repos.to_vec()
    };

    let write_name = all || names.len() > 1;
    for name in &names {
        let path = ws.fetch(name).map_err(|e| e.to_string())?;
        if write_name {
            println!("{name} {}", path.display());
        } else {
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn current_dir() -> Result<PathBuf, String> {
    std::env::current_dir().map_err(|e| e.to_string())
}
