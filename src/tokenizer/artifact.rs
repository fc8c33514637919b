//! Vocabulary artifact parsing.
//!
//! A vocabulary artifact is a JSON document carrying:
//! - a vocabulary, either an ordered token array (position = id) or a
//!   `token -> id` map, at the top level (`"vocab"`) or nested under
//!   `"model"` (HuggingFace `tokenizer.json` layout);
//! - an ordered list of merge rules (`"left right"`), priority given by list
//!   position (lower index = higher priority);
//! - an optional `"added_tokens"` list of literal strings with reserved ids,
//!   merged into the built-in special-token set.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::EngineError;

/// An artifact-declared special token: a literal string plus a reserved id.
#[derive(Debug, Clone, Deserialize)]
pub struct AddedToken {
    pub content: String,
    pub id: u32,
}

/// The parsed contents of a vocabulary artifact.
#[derive(Debug, Clone)]
pub struct VocabArtifact {
    /// Token string -> id. Ids are not required to be contiguous.
    pub token_to_id: HashMap<String, u32>,
    /// Ordered merge rules, `"left right"` per entry.
    pub merges: Vec<String>,
    /// Artifact-declared additional special tokens.
    pub added_tokens: Vec<AddedToken>,
}

/// The vocabulary field in either of its recognized shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VocabField {
    List(Vec<String>),
    Map(HashMap<String, u32>),
}

#[derive(Debug, Deserialize)]
struct RawModel {
    vocab: Option<VocabField>,
    merges: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawArtifact {
    vocab: Option<VocabField>,
    merges: Option<Vec<String>>,
    model: Option<RawModel>,
    #[serde(default)]
    added_tokens: Vec<AddedToken>,
}

/// Parse a vocabulary artifact from its serialized bytes.
///
/// Fails with [`EngineError::Load`] when the document is not valid JSON or
/// no vocabulary field exists in any recognized location.
pub fn parse(bytes: &[u8]) -> Result<VocabArtifact, EngineError> {
    let raw: RawArtifact = serde_json::from_slice(bytes)
        .map_err(|e| EngineError::Load(format!("Malformed vocabulary artifact: {}", e)))?;

    let (model_vocab, model_merges) = match raw.model {
        Some(model) => (model.vocab, model.merges),
        None => (None, None),
    };

    let vocab = raw.vocab.or(model_vocab).ok_or_else(|| {
        EngineError::Load(
            "Vocabulary artifact has no 'vocab' field (top-level or under 'model')".to_string(),
        )
    })?;

    let token_to_id = match vocab {
        VocabField::Map(map) => map,
        VocabField::List(tokens) => tokens
            .into_iter()
            .enumerate()
            .map(|(i, tok)| (tok, i as u32))
            .collect(),
    };

    let merges = raw.merges.or(model_merges).unwrap_or_default();

    Ok(VocabArtifact {
        token_to_id,
        merges,
        added_tokens: raw.added_tokens,
    })
}
