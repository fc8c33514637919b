use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Unsupported source: {0}")]
    InvalidSource(String),

    #[error("Not ready: {0}")]
    NotReady(&'static str),

    #[error("Prompt length ({prompt_len}) meets or exceeds the context window ({max_context})")]
    ContextLengthExceeded {
        prompt_len: usize,
        max_context: usize,
    },

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("A generation is already in progress")]
    AlreadyGenerating,
}
