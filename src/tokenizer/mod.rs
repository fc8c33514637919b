//! Byte-pair tokenizer driven by a serialized vocabulary artifact.
//!
//! [`Vocabulary`] holds the bidirectional token map, the ordered
//! merge-priority table, and the reserved special-token set. [`BpeTokenizer`]
//! implements greedy lowest-rank merging over whitespace-split words with a
//! distinguished word-boundary marker, a per-character fallback for
//! vocabularies without a merge table, and multi-turn chat prompt formatting.

pub mod artifact;
pub mod chat;

pub use chat::{format_chat, ChatMessage, Role};

use std::collections::{HashMap, HashSet};

use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::error::EngineError;
use crate::fetch::ArtifactSource;

/// The word-boundary marker character (U+0120, 'Ġ').
///
/// Encoding prefixes every word but the first with this marker; decoding
/// replaces it with a literal space.
pub const WORD_BOUNDARY_MARKER: char = '\u{0120}';

/// Built-in special-token strings. Their ids are resolved from the loaded
/// vocabulary; artifact-declared `added_tokens` merge into the same set.
pub const UNK_TOKEN: &str = "<unk>";
pub const BOS_TOKEN: &str = "<s>";
pub const EOS_TOKEN: &str = "<|endoftext|>";
pub const SYSTEM_MARKER: &str = "<|system|>";
pub const USER_MARKER: &str = "<|user|>";
pub const ASSISTANT_MARKER: &str = "<|assistant|>";
pub const END_OF_TURN_MARKER: &str = "<|end|>";

/// Options for [`BpeTokenizer::encode`].
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Prepend the begin-of-sequence id when the vocabulary declares one.
    pub add_special_tokens: bool,
    /// Upper bound applied when `truncation` is set.
    pub max_length: Option<usize>,
    /// Truncate the id sequence to `max_length`.
    pub truncation: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            add_special_tokens: true,
            max_length: None,
            truncation: false,
        }
    }
}

/// Options for [`BpeTokenizer::decode`].
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Drop special tokens instead of emitting their literal text.
    pub skip_special_tokens: bool,
    /// Collapse repeated whitespace and trim the result.
    pub clean_up_spaces: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            skip_special_tokens: true,
            clean_up_spaces: true,
        }
    }
}

/// An immutable, loaded vocabulary: bidirectional token map, merge-priority
/// table, and the reserved special-token set.
pub struct Vocabulary {
    token_to_id: HashMap<String, u32>,
    id_to_token: HashMap<u32, String>,
    /// `(id, token)` pairs in ascending id order, for deterministic scans.
    entries: Vec<(u32, String)>,
    /// `(left, right) -> priority index`; lower index = higher priority.
    merge_ranks: HashMap<(String, String), u32>,
    has_merges: bool,
    special_ids: HashSet<u32>,
    unk_id: Option<u32>,
    bos_id: Option<u32>,
    eos_id: Option<u32>,
    end_of_turn_id: Option<u32>,
    user_id: Option<u32>,
}

impl Vocabulary {
    /// Build a vocabulary from serialized artifact bytes.
    pub fn from_artifact(bytes: &[u8]) -> Result<Self, EngineError> {
        let parsed = artifact::parse(bytes)?;
        Ok(Self::from_parts(
            parsed.token_to_id,
            parsed.merges,
            parsed.added_tokens,
        ))
    }

    /// Fetch and parse a vocabulary artifact from a source.
    pub fn load(
        source: &ArtifactSource,
        progress: &dyn Fn(u64, u64),
    ) -> Result<Self, EngineError> {
        let bytes = source.resolve(progress)?;
        Self::from_artifact(&bytes)
    }

    fn from_parts(
        mut token_to_id: HashMap<String, u32>,
        merges: Vec<String>,
        added_tokens: Vec<artifact::AddedToken>,
    ) -> Self {
        let mut special_ids = HashSet::new();

        // Artifact-declared additions join (and may override) the token map.
        for added in &added_tokens {
            token_to_id.insert(added.content.clone(), added.id);
            special_ids.insert(added.id);
        }

        let mut id_to_token = HashMap::with_capacity(token_to_id.len());
        for (token, &id) in &token_to_id {
            id_to_token.insert(id, token.clone());
        }

        let mut entries: Vec<(u32, String)> = id_to_token
            .iter()
            .map(|(&id, token)| (id, token.clone()))
            .collect();
        entries.sort_by_key(|&(id, _)| id);

        let mut merge_ranks = HashMap::with_capacity(merges.len());
        for (rank, rule) in merges.iter().enumerate() {
            if let Some((left, right)) = rule.split_once(' ') {
                merge_ranks.insert((left.to_string(), right.to_string()), rank as u32);
            }
        }
        let has_merges = !merge_ranks.is_empty();

        let lookup = |name: &str| token_to_id.get(name).copied();
        let unk_id = lookup(UNK_TOKEN);
        let bos_id = lookup(BOS_TOKEN);
        let eos_id = lookup(EOS_TOKEN);
        let end_of_turn_id = lookup(END_OF_TURN_MARKER);
        let user_id = lookup(USER_MARKER);

        for id in [
            unk_id,
            bos_id,
            eos_id,
            end_of_turn_id,
            user_id,
            lookup(SYSTEM_MARKER),
            lookup(ASSISTANT_MARKER),
        ]
        .into_iter()
        .flatten()
        {
            special_ids.insert(id);
        }

        debug!(
            vocab_size = token_to_id.len(),
            merge_count = merge_ranks.len(),
            special_count = special_ids.len(),
            "Vocabulary loaded"
        );

        Self {
            token_to_id,
            id_to_token,
            entries,
            merge_ranks,
            has_merges,
            special_ids,
            unk_id,
            bos_id,
            eos_id,
            end_of_turn_id,
            user_id,
        }
    }

    /// Number of distinct tokens.
    pub fn vocab_size(&self) -> usize {
        self.token_to_id.len()
    }

    /// Look up a token's id.
    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    /// Look up an id's token text.
    pub fn token_text(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    /// Whether an id belongs to the reserved special-token set.
    pub fn is_special(&self, id: u32) -> bool {
        self.special_ids.contains(&id)
    }

    /// Merge priority for an adjacent pair, if the pair is in the table.
    fn merge_rank(&self, left: &str, right: &str) -> Option<u32> {
        self.merge_ranks
            .get(&(left.to_string(), right.to_string()))
            .copied()
    }

    /// Whether the vocabulary carries a merge table.
    pub fn has_merges(&self) -> bool {
        self.has_merges
    }

    /// First vocabulary entry (in id order) containing the character.
    fn find_containing(&self, ch: char) -> Option<u32> {
        self.entries
            .iter()
            .find(|(_, token)| token.contains(ch))
            .map(|&(id, _)| id)
    }

    pub fn unk_id(&self) -> Option<u32> {
        self.unk_id
    }

    pub fn bos_id(&self) -> Option<u32> {
        self.bos_id
    }

    pub fn eos_id(&self) -> Option<u32> {
        self.eos_id
    }

    pub fn end_of_turn_id(&self) -> Option<u32> {
        self.end_of_turn_id
    }

    pub fn user_marker_id(&self) -> Option<u32> {
        self.user_id
    }
}

/// Greedy byte-pair tokenizer over a loaded [`Vocabulary`].
pub struct BpeTokenizer {
    vocab: Vocabulary,
}

impl BpeTokenizer {
    pub fn new(vocab: Vocabulary) -> Self {
        Self { vocab }
    }

    /// Fetch a vocabulary artifact and build a tokenizer from it.
    pub fn from_source(
        source: &ArtifactSource,
        progress: &dyn Fn(u64, u64),
    ) -> Result<Self, EngineError> {
        Ok(Self::new(Vocabulary::load(source, progress)?))
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Encode text into token ids.
    ///
    /// 1. NFC-normalize and collapse whitespace runs to single spaces.
    /// 2. Split into words; every word but the first is prefixed with the
    ///    word-boundary marker.
    /// 3. Greedy BPE per word: repeatedly merge the adjacent pair with the
    ///    lowest priority index until no pair is in the merge table. Without
    ///    a merge table, fall back to per-character tokens.
    /// 4. Map tokens to ids, substituting the unknown id for misses.
    /// 5. Optionally prepend the begin-of-sequence id and truncate.
    pub fn encode(&self, text: &str, opts: &EncodeOptions) -> Vec<u32> {
        let normalized: String = text.nfc().collect();
        let words: Vec<&str> = normalized.split_whitespace().collect();

        let mut ids = Vec::new();
        if opts.add_special_tokens {
            if let Some(bos) = self.vocab.bos_id {
                ids.push(bos);
            }
        }

        for (i, word) in words.iter().enumerate() {
            let with_marker = i > 0;
            if self.vocab.has_merges {
                let piece = if with_marker {
                    let mut p = String::with_capacity(word.len() + WORD_BOUNDARY_MARKER.len_utf8());
                    p.push(WORD_BOUNDARY_MARKER);
                    p.push_str(word);
                    p
                } else {
                    (*word).to_string()
                };
                for symbol in self.merge_word(&piece) {
                    if let Some(id) = self.vocab.token_id(&symbol).or(self.vocab.unk_id) {
                        ids.push(id);
                    }
                }
            } else {
                self.encode_chars(word, with_marker, &mut ids);
            }
        }

        if opts.truncation {
            if let Some(max) = opts.max_length {
                ids.truncate(max);
            }
        }

        ids
    }

    /// Greedy BPE over one word: scan all adjacent pairs, merge the first
    /// occurrence of the lowest-ranked pair, repeat until no adjacent pair is
    /// present in the merge table.
    fn merge_word(&self, piece: &str) -> Vec<String> {
        let mut symbols: Vec<String> = piece.chars().map(|c| c.to_string()).collect();

        loop {
            let mut best: Option<(usize, u32)> = None;
            for i in 0..symbols.len().saturating_sub(1) {
                if let Some(rank) = self.vocab.merge_rank(&symbols[i], &symbols[i + 1]) {
                    let better = match best {
                        Some((_, best_rank)) => rank < best_rank,
                        None => true,
                    };
                    if better {
                        best = Some((i, rank));
                    }
                }
            }
            match best {
                Some((i, _)) => {
                    let right = symbols.remove(i + 1);
                    symbols[i].push_str(&right);
                }
                None => break,
            }
        }

        symbols
    }

    /// Per-character fallback for vocabularies without a merge table.
    ///
    /// For a word's first character (when the word carries the boundary
    /// marker), a `marker+char` entry is preferred over the bare character;
    /// otherwise the bare character, then the first vocabulary entry
    /// containing the character, then the unknown id.
    fn encode_chars(&self, word: &str, with_marker: bool, out: &mut Vec<u32>) {
        for (j, ch) in word.chars().enumerate() {
            if j == 0 && with_marker {
                let mut marked = String::with_capacity(ch.len_utf8() + WORD_BOUNDARY_MARKER.len_utf8());
                marked.push(WORD_BOUNDARY_MARKER);
                marked.push(ch);
                if let Some(id) = self.vocab.token_id(&marked) {
                    out.push(id);
                    continue;
                }
            }
            let mut bare = [0u8; 4];
            if let Some(id) = self.vocab.token_id(ch.encode_utf8(&mut bare)) {
                out.push(id);
                continue;
            }
            if let Some(id) = self.vocab.find_containing(ch) {
                out.push(id);
                continue;
            }
            if let Some(unk) = self.vocab.unk_id {
                out.push(unk);
            }
        }
    }

    /// Decode token ids back into text.
    ///
    /// Ids map to their token strings (special tokens become empty when
    /// skipped, as do unmapped ids); the concatenation has every boundary
    /// marker replaced with a literal space.
    pub fn decode(&self, ids: &[u32], opts: &DecodeOptions) -> String {
        let mut text = String::new();
        for &id in ids {
            if opts.skip_special_tokens && self.vocab.is_special(id) {
                continue;
            }
            if let Some(token) = self.vocab.token_text(id) {
                text.push_str(token);
            }
        }

        let replaced = text.replace(WORD_BOUNDARY_MARKER, " ");
        if opts.clean_up_spaces {
            collapse_whitespace(&replaced)
        } else {
            replaced
        }
    }

    /// Decode a single id for a streaming callback: special tokens are
    /// skipped, whitespace is left untouched so fragments concatenate
    /// faithfully.
    pub fn decode_fragment(&self, id: u32) -> String {
        self.decode(
            &[id],
            &DecodeOptions {
                skip_special_tokens: true,
                clean_up_spaces: false,
            },
        )
    }

    /// Render a conversation into a single prompt string. See
    /// [`chat::format_chat`].
    pub fn format_chat(&self, messages: &[ChatMessage]) -> String {
        chat::format_chat(messages)
    }
}

/// Collapse whitespace runs to single spaces and trim.
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
