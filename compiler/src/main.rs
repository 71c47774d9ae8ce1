use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitForm {
    Lowered,
    Json,
    Fingerprint,
}

#[derive(Parser, Debug)]
#[command(
    name = "rpcc",
    version,
    about = "Raster Pipeline Compiler Collection — binds symbolic stage bounds in scheduled pipeline programs"
)]
struct Cli {
    /// Input pipeline bundle (JSON)
    bundle: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output form
    #[arg(long, value_enum, default_value = "lowered")]
    emit: EmitForm,

    /// Print pass phases
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("rpcc: bundle = {}", cli.bundle.display());
        eprintln!("rpcc: emit   = {:?}", cli.emit);
    }

    // ── Read and parse bundle ──
    let text = match std::fs::read_to_string(&cli.bundle) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("rpcc: error: {}: {}", cli.bundle.display(), e);
            std::process::exit(2);
        }
    };
    let bundle = match rpcc::bundle::Bundle::from_json(&text) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("rpcc: parse error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.verbose {
        eprintln!(
            "rpcc: {} stages, {} in realization order, {} fused groups, {} declared bounds",
            bundle.stages.len(),
            bundle.realization_order.len(),
            bundle.fused_groups.len(),
            bundle.bounds.len(),
        );
    }

    // ── Bounds inference ──
    let lowered = match bundle.lower() {
        Ok(s) => s,
        Err(diag) => {
            eprintln!("rpcc: {}", diag);
            std::process::exit(1);
        }
    };

    if cli.verbose {
        eprintln!(
            "rpcc: lowered fingerprint = {}",
            rpcc::stmt::fingerprint_hex(&lowered)
        );
    }

    let rendered = match cli.emit {
        EmitForm::Lowered => lowered.to_string(),
        EmitForm::Json => match serde_json::to_string_pretty(&lowered) {
            Ok(json) => format!("{}\n", json),
            Err(e) => {
                eprintln!("rpcc: error: {}", e);
                std::process::exit(2);
            }
        },
        EmitForm::Fingerprint => format!("{}\n", rpcc::stmt::fingerprint_hex(&lowered)),
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, rendered) {
                eprintln!("rpcc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{}", rendered),
    }
}
