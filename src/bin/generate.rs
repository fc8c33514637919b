//! quill-generate: generate text from a model artifact and vocabulary.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use serde::Serialize;

use quill_inference::cli;
use quill_inference::fetch::ArtifactSource;
use quill_inference::generation::{GenerationController, GenerationOverrides, InitOptions};
use quill_inference::runtime::BigramRuntime;
use quill_inference::ProviderChoice;

#[derive(Parser)]
#[command(name = "quill-generate", about = "Generate text from a model artifact")]
struct Args {
    /// Model artifact: path, file:// URI, or http(s) URL
    #[arg(short = 'm', long)]
    model: String,

    /// Vocabulary artifact: path, file:// URI, or http(s) URL
    #[arg(short = 'v', long)]
    vocab: String,

    /// Prompt text
    #[arg(short = 'p', long, conflicts_with_all = ["file", "stdin"])]
    prompt: Option<String>,

    /// Read prompt from file
    #[arg(short = 'f', long, conflicts_with = "stdin")]
    file: Option<PathBuf>,

    /// Read prompt from stdin
    #[arg(long)]
    stdin: bool,

    /// Maximum tokens to generate (-1 = until a stop token or the context limit)
    #[arg(short = 'n', long, default_value = "256")]
    max_tokens: i64,

    /// Enable sampling (default: greedy decoding)
    #[arg(long)]
    sample: bool,

    /// Temperature (<= 0 forces greedy)
    #[arg(long, default_value = "1.0")]
    temp: f32,

    /// Top-k truncation (<= 0 disables)
    #[arg(long, default_value = "0")]
    top_k: i32,

    /// Top-p (nucleus) truncation (>= 1.0 disables)
    #[arg(long, default_value = "1.0")]
    top_p: f32,

    /// Repetition penalty (1.0 = no penalty)
    #[arg(long, default_value = "1.0")]
    repetition_penalty: f32,

    /// Random seed for sampling
    #[arg(short = 's', long)]
    seed: Option<u64>,

    /// Execution provider: auto, gpu, cpu
    #[arg(long, default_value = "auto")]
    provider: String,

    /// Context length (prompt + generated tokens)
    #[arg(short = 'c', long, default_value = "4096")]
    ctx: usize,

    /// Print tokens as they are generated
    #[arg(long)]
    stream: bool,

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
struct Timings {
    load_ms: f64,
    generate_ms: f64,
    tokens_per_sec: f64,
}

#[derive(Serialize)]
struct ConfigOutput {
    max_tokens: i64,
    sample: bool,
    temperature: f32,
    top_k: i32,
    top_p: f32,
    repetition_penalty: f32,
    seed: Option<u64>,
}

#[derive(Serialize)]
struct JsonOutput {
    model: String,
    prompt: String,
    output: String,
    generated_tokens: usize,
    prompt_tokens: usize,
    stop_reason: String,
    provider: String,
    timings: Timings,
    config: ConfigOutput,
}

fn main() {
    let args = Args::parse();
    cli::init_logging(args.log_disable);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let provider = args.provider.parse::<ProviderChoice>()?;
    let prompt = cli::read_input(args.prompt.as_deref(), args.file.as_deref(), args.stdin)?;

    let max_new_tokens = if args.max_tokens < 0 {
        usize::MAX
    } else {
        args.max_tokens as usize
    };

    let load_start = Instant::now();
    let mut controller = GenerationController::new(Arc::new(BigramRuntime::new()));
    controller.initialize(
        &ArtifactSource::uri(&args.vocab),
        &ArtifactSource::uri(&args.model),
        InitOptions {
            provider,
            max_context_length: args.ctx,
            ..InitOptions::default()
        },
    )?;
    let load_ms = load_start.elapsed().as_secs_f64() * 1000.0;

    let overrides = GenerationOverrides {
        max_new_tokens: Some(max_new_tokens),
        do_sample: Some(args.sample),
        temperature: Some(args.temp),
        top_k: Some(args.top_k),
        top_p: Some(args.top_p),
        repetition_penalty: Some(args.repetition_penalty),
        seed: args.seed,
        ..Default::default()
    };

    let generate_start = Instant::now();
    let output = if args.stream {
        use std::io::Write;
        let result = controller.generate_stream(&prompt, &overrides, |fragment, _id| {
            print!("{}", fragment);
            let _ = std::io::stdout().flush();
        })?;
        println!();
        result
    } else {
        controller.generate_full(&prompt, &overrides)?
    };
    let generate_ms = generate_start.elapsed().as_secs_f64() * 1000.0;

    let tokens_per_sec = if generate_ms > 0.0 {
        output.token_ids.len() as f64 / (generate_ms / 1000.0)
    } else {
        0.0
    };

    let active_provider = controller
        .provider()
        .map(|p| p.to_string())
        .unwrap_or_default();

    match args.output_format.as_str() {
        "json" => {
            let json = JsonOutput {
                model: args.model.clone(),
                prompt,
                output: output.text.clone(),
                generated_tokens: output.token_ids.len(),
                prompt_tokens: output.prompt_tokens,
                stop_reason: output.stop_reason.to_string(),
                provider: active_provider,
                timings: Timings {
                    load_ms,
                    generate_ms,
                    tokens_per_sec,
                },
                config: ConfigOutput {
                    max_tokens: args.max_tokens,
                    sample: args.sample,
                    temperature: args.temp,
                    top_k: args.top_k,
                    top_p: args.top_p,
                    repetition_penalty: args.repetition_penalty,
                    seed: args.seed,
                },
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            if !args.stream {
                println!("{}", output.text);
            }
            eprintln!(
                "[{} tokens, {} | load {:.1} ms, generate {:.1} ms, {:.1} tok/s]",
                output.token_ids.len(),
                output.stop_reason,
                load_ms,
                generate_ms,
                tokens_per_sec
            );
        }
    }

    controller.release();
    Ok(())
}
