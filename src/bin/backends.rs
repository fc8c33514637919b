//! quill-backends: report the detected execution provider.

use clap::Parser;
use serde::Serialize;

use quill_inference::cli;
use quill_inference::{detect_provider, ExecutionProvider};

#[derive(Parser)]
#[command(name = "quill-backends", about = "Report available execution providers")]
struct Args {
    /// Output format: text or json
    #[arg(long, default_value = "text", value_parser = validate_output_format)]
    output_format: String,

    /// Suppress all logging
    #[arg(long)]
    log_disable: bool,
}

fn validate_output_format(s: &str) -> Result<String, String> {
    match s {
        "text" | "json" => Ok(s.to_string()),
        _ => Err(format!("Unknown output format '{}'. Options: text, json", s)),
    }
}

#[derive(Serialize)]
struct ProbeReport {
    detected: String,
    gpu_feature: bool,
    gpu_available: bool,
    cpu_available: bool,
}

fn main() {
    let args = Args::parse();
    cli::init_logging(args.log_disable);

    let detected = detect_provider();
    let report = ProbeReport {
        detected: detected.to_string(),
        gpu_feature: cfg!(feature = "gpu"),
        gpu_available: detected == ExecutionProvider::Gpu,
        cpu_available: true,
    };

    match args.output_format.as_str() {
        "json" => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        _ => {
            println!("detected provider: {}", report.detected);
            println!(
                "gpu: {}",
                if report.gpu_available {
                    "available"
                } else if report.gpu_feature {
                    "unavailable (probe failed)"
                } else {
                    "unavailable (compiled without the `gpu` feature)"
                }
            );
            println!("cpu: available");
        }
    }
}
