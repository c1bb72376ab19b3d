use clap::Parser;
use std::path::PathBuf;
use tracing::Level;

use tpurw::pipeline::{run_pipeline, EmitTarget};
use tpurw::rewrite::RewriteOptions;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Ir,
    Metadata,
    BuildInfo,
}

impl From<EmitStage> for EmitTarget {
    fn from(stage: EmitStage) -> Self {
        match stage {
            EmitStage::Ir => EmitTarget::Ir,
            EmitStage::Metadata => EmitTarget::Metadata,
            EmitStage::BuildInfo => EmitTarget::BuildInfo,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "tpurw",
    version,
    about = "Rewrites tf_device.launch_func ops into TPU compile and execute ops"
)]
struct Cli {
    /// Input module text
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output artifact
    #[arg(long, value_enum, default_value_t = EmitStage::Ir)]
    emit: EmitStage,

    /// Serialize compile metadata as indented JSON
    #[arg(long)]
    tpu_compile_metadata_debug: bool,

    /// Print phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_target(false)
        .init();

    if cli.verbose {
        eprintln!("tpurw: source = {}", cli.source.display());
        eprintln!("tpurw: emit   = {:?}", cli.emit);
    }

    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("tpurw: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let options = RewriteOptions {
        metadata_debug: cli.tpu_compile_metadata_debug,
    };
    let verbose = cli.verbose;
    let result = run_pipeline(&source, cli.emit.into(), options, |phase, elapsed, diags| {
        for diag in diags {
            eprintln!("tpurw: {}", diag);
        }
        if verbose {
            eprintln!(
                "tpurw: {} complete, {:.1}ms",
                phase.name(),
                elapsed.as_secs_f64() * 1000.0
            );
        }
    });

    if result.has_error {
        std::process::exit(1);
    }
    let Some(text) = result.output else {
        eprintln!("tpurw: pipeline produced no output");
        std::process::exit(1);
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("tpurw: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{}", text),
    }
}
