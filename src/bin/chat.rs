//! quill-chat: single-shot chat against a model artifact.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;

use quill_inference::cli;
use quill_inference::fetch::ArtifactSource;
use quill_inference::generation::{GenerationController, GenerationOverrides, InitOptions};
use quill_inference::runtime::BigramRuntime;
use quill_inference::tokenizer::{ChatMessage, Role};
use quill_inference::ProviderChoice;

#[derive(Parser)]
#[command(name = "quill-chat", about = "Chat with a model artifact")]
struct Args {
    /// Model artifact: path, file:// URI, or http(s) URL
    #[arg(short = 'm', long)]
    model: String,

    /// Vocabulary artifact: path, file:// URI, or http(s) URL
    #[arg(short = 'v', long)]
    vocab: String,

    /// System prompt for the conversation
    #[arg(long, conflicts_with = "messages")]
    system: Option<String>,

    /// User message
    #[arg(short = 'u', long, conflicts_with = "messages")]
    user: Option<String>,

    /// JSON conversation file: a list of {"role", "content"} objects.
    /// Messages with unrecognized roles are silently skipped.
    #[arg(long)]
    messages: Option<PathBuf>,

    /// Maximum tokens to generate
    #[arg(short = 'n', long, default_value = "256")]
    max_tokens: usize,

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

    /// Suppress all logging
    #[arg(long)]
    log_disable: bool,
}

/// Raw conversation entry as read from a --messages file.
#[derive(Deserialize)]
struct RawMessage {
    role: String,
    content: String,
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
    let messages = collect_messages(&args)?;
    if messages.is_empty() {
        return Err("No messages provided. Use --user or --messages".into());
    }

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

    let overrides = GenerationOverrides {
        max_new_tokens: Some(args.max_tokens),
        do_sample: Some(args.sample),
        temperature: Some(args.temp),
        top_k: Some(args.top_k),
        top_p: Some(args.top_p),
        seed: args.seed,
        ..Default::default()
    };

    if args.stream {
        use std::io::Write;
        controller.stream_chat(
            &messages,
            |fragment, _id| {
                print!("{}", fragment);
                let _ = std::io::stdout().flush();
            },
            &overrides,
        )?;
        println!();
    } else {
        let reply = controller.chat(&messages, &overrides)?;
        println!("{}", reply);
    }

    controller.release();
    Ok(())
}

fn collect_messages(args: &Args) -> Result<Vec<ChatMessage>, Box<dyn std::error::Error>> {
    if let Some(path) = &args.messages {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
        let entries: Vec<RawMessage> = serde_json::from_str(&raw)
            .map_err(|e| format!("Malformed conversation file '{}': {}", path.display(), e))?;
        return Ok(entries
            .into_iter()
            .filter_map(|entry| {
                Role::parse(&entry.role).map(|role| ChatMessage::new(role, entry.content))
            })
            .collect());
    }

    let mut messages = Vec::new();
    if let Some(system) = &args.system {
        messages.push(ChatMessage::system(system.clone()));
    }
    if let Some(user) = &args.user {
        messages.push(ChatMessage::user(user.clone()));
    }
    Ok(messages)
}
