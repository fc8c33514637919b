//! quill-tokenize: encode and decode text with a vocabulary artifact.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use serde::Serialize;

use quill_inference::cli;
use quill_inference::fetch::ArtifactSource;
use quill_inference::tokenizer::{BpeTokenizer, DecodeOptions, EncodeOptions};

#[derive(Parser)]
#[command(name = "quill-tokenize", about = "Tokenize text with a vocabulary artifact")]
struct Args {
    /// Vocabulary artifact: path, file:// URI, or http(s) URL
    #[arg(short = 'v', long)]
    vocab: String,

    /// Text to tokenize
    #[arg(short = 'p', long, conflicts_with_all = ["file", "stdin", "decode"])]
    prompt: Option<String>,

    /// Read text from file
    #[arg(short = 'f', long, conflicts_with_all = ["stdin", "decode"])]
    file: Option<PathBuf>,

    /// Read text from stdin
    #[arg(long, conflicts_with = "decode")]
    stdin: bool,

    /// Decode comma-separated token ids instead of encoding
    #[arg(short = 'd', long)]
    decode: Option<String>,

    /// Don't prepend the begin-of-sequence token
    #[arg(long)]
    no_bos: bool,

    /// Print the total token count
    #[arg(long)]
    show_count: bool,

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
struct EncodeJson {
    text: String,
    ids: Vec<u32>,
    count: usize,
}

#[derive(Serialize)]
struct DecodeJson {
    ids: Vec<u32>,
    text: String,
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
    let tokenizer = BpeTokenizer::from_source(&ArtifactSource::uri(&args.vocab), &|_, _| {})?;

    if let Some(ids_arg) = &args.decode {
        let ids = parse_ids(ids_arg)?;
        let text = tokenizer.decode(&ids, &DecodeOptions::default());
        match args.output_format.as_str() {
            "json" => println!("{}", serde_json::to_string_pretty(&DecodeJson { ids, text })?),
            _ => println!("{}", text),
        }
        return Ok(());
    }

    let text = cli::read_input(args.prompt.as_deref(), args.file.as_deref(), args.stdin)?;
    let ids = tokenizer.encode(
        &text,
        &EncodeOptions {
            add_special_tokens: !args.no_bos,
            ..EncodeOptions::default()
        },
    );

    match args.output_format.as_str() {
        "json" => {
            let count = ids.len();
            println!(
                "{}",
                serde_json::to_string_pretty(&EncodeJson { text, ids, count })?
            );
        }
        _ => {
            let rendered: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            println!("[{}]", rendered.join(", "));
            if args.show_count {
                println!("count: {}", ids.len());
            }
        }
    }

    Ok(())
}

fn parse_ids(input: &str) -> Result<Vec<u32>, Box<dyn std::error::Error>> {
    input
        .split(',')
        .map(|s| {
            s.trim()
                .parse::<u32>()
                .map_err(|_| format!("Invalid token id: '{}'", s.trim()).into())
        })
        .collect()
}
