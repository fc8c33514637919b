//! Bundled baseline runtime: serialized bigram language models.
//!
//! The artifact is a dense next-token logit table:
//!
//! ```text
//! offset 0   magic      b"QLMB"
//! offset 4   version    u32 LE (currently 1)
//! offset 8   vocab_size u32 LE
//! offset 12  table      vocab_size * vocab_size f32 LE, row-major;
//!                       row r = logits over the next token given token r
//! ```
//!
//! Sessions declare `input_ids` and `attention_mask` inputs of shape
//! `[1, seq]` and a `logits` output of shape `[1, seq, vocab_size]`. The
//! runtime serves as the reference executor for the CLI tools and tests;
//! production graphs arrive through other [`ModelRuntime`] implementations.

use std::collections::HashMap;

use tracing::debug;

use crate::error::EngineError;
use crate::runtime::{GraphSession, ModelRuntime, SessionOptions};
use crate::tensor::TensorData;

/// Artifact magic bytes.
pub const BIGRAM_MAGIC: &[u8; 4] = b"QLMB";

const BIGRAM_VERSION: u32 = 1;
const HEADER_LEN: usize = 12;

/// Runtime for `QLMB` bigram artifacts.
#[derive(Debug, Default)]
pub struct BigramRuntime;

impl BigramRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl ModelRuntime for BigramRuntime {
    fn instantiate(
        &self,
        graph: &[u8],
        options: &SessionOptions,
    ) -> Result<Box<dyn GraphSession>, EngineError> {
        let model = BigramModel::parse(graph)?;
        debug!(
            vocab_size = model.vocab_size,
            provider = %options.provider,
            "Bigram session instantiated"
        );
        Ok(Box::new(BigramSession {
            model,
            input_names: vec!["input_ids".to_string(), "attention_mask".to_string()],
            output_names: vec!["logits".to_string()],
        }))
    }
}

/// Serialize a logit table into the `QLMB` artifact format.
///
/// `table` is row-major with `vocab_size * vocab_size` entries.
///
/// # Panics
/// Panics if `table.len()` does not equal `vocab_size * vocab_size`.
pub fn serialize_table(vocab_size: usize, table: &[f32]) -> Vec<u8> {
    assert_eq!(
        table.len(),
        vocab_size * vocab_size,
        "Table length {} does not match vocab_size {}",
        table.len(),
        vocab_size
    );
    let mut bytes = Vec::with_capacity(HEADER_LEN + table.len() * 4);
    bytes.extend_from_slice(BIGRAM_MAGIC);
    bytes.extend_from_slice(&BIGRAM_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(vocab_size as u32).to_le_bytes());
    for value in table {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[derive(Debug)]
struct BigramModel {
    vocab_size: usize,
    table: Vec<f32>,
}

impl BigramModel {
    fn parse(bytes: &[u8]) -> Result<Self, EngineError> {
        if bytes.len() < HEADER_LEN {
            return Err(EngineError::Load(format!(
                "Bigram artifact truncated: {} bytes, need at least {}",
                bytes.len(),
                HEADER_LEN
            )));
        }
        if &bytes[0..4] != BIGRAM_MAGIC {
            return Err(EngineError::Load(format!(
                "Invalid bigram magic: expected {:?}, got {:?}",
                BIGRAM_MAGIC,
                &bytes[0..4]
            )));
        }

        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != BIGRAM_VERSION {
            return Err(EngineError::Load(format!(
                "Unsupported bigram artifact version: {}",
                version
            )));
        }

        let vocab_size = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let expected = HEADER_LEN + vocab_size * vocab_size * 4;
        if bytes.len() != expected {
            return Err(EngineError::Load(format!(
                "Bigram artifact size mismatch: expected {} bytes for vocab_size {}, got {}",
                expected,
                vocab_size,
                bytes.len()
            )));
        }

        let table = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self { vocab_size, table })
    }

    fn row(&self, id: usize) -> Option<&[f32]> {
        if id >= self.vocab_size {
            return None;
        }
        let start = id * self.vocab_size;
        Some(&self.table[start..start + self.vocab_size])
    }
}

struct BigramSession {
    model: BigramModel,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl GraphSession for BigramSession {
    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn run(
        &mut self,
        inputs: &HashMap<String, TensorData>,
    ) -> Result<HashMap<String, TensorData>, EngineError> {
        let ids_tensor = inputs
            .get("input_ids")
            .ok_or_else(|| EngineError::Inference("Missing input 'input_ids'".to_string()))?;
        let ids = ids_tensor
            .as_i64()
            .ok_or_else(|| EngineError::Inference("'input_ids' must be I64".to_string()))?;
        if ids.is_empty() {
            return Err(EngineError::Inference(
                "'input_ids' must not be empty".to_string(),
            ));
        }

        let vocab = self.model.vocab_size;
        let mut logits = Vec::with_capacity(ids.len() * vocab);
        for &id in ids {
            let row = usize::try_from(id)
                .ok()
                .and_then(|id| self.model.row(id))
                .ok_or_else(|| {
                    EngineError::Inference(format!(
                        "Token id {} out of range for vocab_size {}",
                        id, vocab
                    ))
                })?;
            logits.extend_from_slice(row);
        }

        let mut outputs = HashMap::new();
        outputs.insert(
            "logits".to_string(),
            TensorData::from_f32(vec![1, ids.len(), vocab], logits),
        );
        Ok(outputs)
    }
}
