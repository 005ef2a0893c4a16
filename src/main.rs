use clap::{Args, Parser, Subcommand};
use flowc::{
    diagnostics::{emit_analysis_error, report_io_error, report_manifest_error},
    language::{analyzer::Analyzer, ast::Module},
    project::manifest::{find_manifest, Manifest},
};
use std::{fs, path::PathBuf, process};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "flowc", version)]
#[command(about = "Semantic analyzer for flow modules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve and check a parsed module
    Check(CheckArgs),
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Parsed module as JSON
    module: PathBuf,

    /// Manifest overriding the one embedded in the module
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Require a runnable entry package
    #[arg(long)]
    executable: bool,

    /// Root of the package sources, used to render diagnostics
    #[arg(long)]
    sources: Option<PathBuf>,

    /// Print the resolved module as JSON
    #[arg(long)]
    emit: bool,

    /// Analyze packages in parallel
    #[arg(long)]
    parallel: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowc=info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Command::Check(args) => check(args),
    }
}

fn check(args: CheckArgs) {
    let content = match fs::read_to_string(&args.module) {
        Ok(content) => content,
        Err(err) => {
            report_io_error(&args.module, &err);
            process::exit(1);
        }
    };
    let mut module: Module = match serde_json::from_str(&content) {
        Ok(module) => module,
        Err(err) => {
            eprintln!("Invalid module {}: {err}", args.module.display());
            process::exit(1);
        }
    };

    let manifest_path = args
        .manifest
        .clone()
        .or_else(|| args.sources.as_deref().and_then(find_manifest));
    if let Some(path) = manifest_path {
        debug!(manifest = %path.display(), "loading manifest");
        match Manifest::load(&path) {
            Ok(manifest) => module.manifest = manifest,
            Err(err) => {
                report_manifest_error(&err);
                process::exit(1);
            }
        }
    }

    let mut options = module.manifest.analyzer.clone();
    options.parallel |= args.parallel;
    let analyzer = Analyzer::new(options);
    let result = if args.executable {
        analyzer.analyze_executable(&module)
    } else {
        analyzer.analyze(&module)
    };

    let resolved = match result {
        Ok(resolved) => resolved,
        Err(err) => {
            emit_analysis_error(&err, args.sources.as_deref());
            process::exit(1);
        }
    };
    info!(module = %args.module.display(), "no problems found");

    if args.emit {
        match serde_json::to_string_pretty(&resolved) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("Failed to serialize resolved module: {err}");
                process::exit(1);
            }
        }
    }
}
