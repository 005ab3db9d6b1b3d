//! Byte-level BPE tokenizer for GPT-2 / RoBERTa style models.
//!
//! Vocabulary and merges come from a Hugging Face `tokenizer.json`, or from a flat
//! `vocab.json` with `merges.txt` beside it. Merging runs on tiktoken's `CoreBPE`:
//! raw bytes take ranks `0..256`, merge `i` produces rank `256 + i`, and every rank
//! is mapped back to the vocabulary id of the token it spells.

use crate::utils::error::{ProbeError, Result};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

pub const DEFAULT_PAD_TOKEN: &str = "[PAD]";
pub const DEFAULT_EOS_TOKEN: &str = "</s>";
pub const DEFAULT_BOS_TOKEN: &str = "<s>";
pub const DEFAULT_UNK_TOKEN: &str = "<unk>";

/// GPT-2 pre-tokenizer pattern.
const GPT2_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

const BYTE_RANKS: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialToken {
    Pad,
    Eos,
    Bos,
    Unk,
    Mask,
}

impl SpecialToken {
    fn map_key(self) -> &'static str {
        match self {
            SpecialToken::Pad => "pad_token",
            SpecialToken::Eos => "eos_token",
            SpecialToken::Bos => "bos_token",
            SpecialToken::Unk => "unk_token",
            SpecialToken::Mask => "mask_token",
        }
    }

    fn conventional_names(self) -> &'static [&'static str] {
        match self {
            SpecialToken::Pad => &["<pad>", "[PAD]"],
            SpecialToken::Eos => &["</s>", "<|endoftext|>"],
            SpecialToken::Bos => &["<s>", "<|endoftext|>"],
            SpecialToken::Unk => &["<unk>", "[UNK]"],
            SpecialToken::Mask => &["<mask>", "[MASK]"],
        }
    }

    const ALL: [SpecialToken; 5] = [
        SpecialToken::Pad,
        SpecialToken::Eos,
        SpecialToken::Bos,
        SpecialToken::Unk,
        SpecialToken::Mask,
    ];
}

pub trait Tokenizer: Send + Sync {
    /// Encodes text without adding any special tokens.
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, id: u32) -> String;
    /// Size of the base vocabulary, added tokens excluded.
    fn vocab_size(&self) -> usize;
    fn token_id(&self, token: &str) -> Option<u32>;
    fn special_token(&self, role: SpecialToken) -> Option<&str>;

    fn pad_token_id(&self) -> Option<u32> {
        self.special_token(SpecialToken::Pad)
            .and_then(|token| self.token_id(token))
    }

    fn eos_token(&self) -> Option<&str> {
        self.special_token(SpecialToken::Eos)
    }

    fn mask_token_id(&self) -> Option<u32> {
        self.special_token(SpecialToken::Mask)
            .and_then(|token| self.token_id(token))
    }

    /// First token of `text` preceded by a space, i.e. how an object word is scored.
    fn first_word_token(&self, text: &str) -> Option<u32> {
        self.encode(&format!(" {}", text)).first().copied()
    }
}

#[derive(Clone)]
pub struct BpeTokenizer {
    bpe: Arc<CoreBPE>,
    /// BPE rank → vocabulary id; `None` for raw bytes the vocabulary lacks.
    rank_to_id: Vec<Option<u32>>,
    vocab: HashMap<String, u32>,
    id_to_token: HashMap<u32, String>,
    base_vocab_size: usize,
    added_tokens: Vec<String>,
    special_tokens: HashMap<SpecialToken, String>,
    byte_decoder: HashMap<char, u8>,
}

impl fmt::Debug for BpeTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BpeTokenizer")
            .field("bpe", &"<CoreBPE>")
            .field("base_vocab_size", &self.base_vocab_size)
            .field("added_tokens", &self.added_tokens)
            .field("special_tokens", &self.special_tokens)
            .finish()
    }
}

impl BpeTokenizer {
    /// Builds a tokenizer from a `token → id` vocabulary and its ordered merges.
    pub fn new(vocab: HashMap<String, u32>, merges: &[(String, String)]) -> Result<Self> {
        let byte_table = bytes_to_unicode();
        let byte_decoder: HashMap<char, u8> = byte_table
            .iter()
            .enumerate()
            .map(|(byte, ch)| (*ch, byte as u8))
            .collect();

        let mut encoder: HashMap<Vec<u8>, u32> = HashMap::new();
        let mut rank_to_id: Vec<Option<u32>> =
            Vec::with_capacity(BYTE_RANKS as usize + merges.len());
        for byte in 0..BYTE_RANKS {
            let token = byte_table[byte as usize].to_string();
            encoder.insert(vec![byte as u8], byte);
            rank_to_id.push(vocab.get(&token).copied());
        }

        for (left, right) in merges {
            let merged = format!("{}{}", left, right);
            let Some(id) = vocab.get(&merged) else {
                tracing::debug!("Merge {:?} + {:?} is not in the vocabulary, skipping it", left, right);
                continue;
            };
            let Some(bytes) = token_bytes(&merged, &byte_decoder) else {
                continue;
            };
            if let Entry::Vacant(entry) = encoder.entry(bytes) {
                entry.insert(rank_to_id.len() as u32);
                rank_to_id.push(Some(*id));
            }
        }

        let bpe = CoreBPE::new(
            encoder.into_iter().collect(),
            Default::default(),
            GPT2_PATTERN,
        )
        .map_err(|e| ProbeError::TokenizerError {
            message: format!("cannot build BPE encoder: {}", e),
        })?;

        let id_to_token = vocab.iter().map(|(token, id)| (*id, token.clone())).collect();
        let mut tokenizer = Self {
            bpe: Arc::new(bpe),
            rank_to_id,
            base_vocab_size: vocab.len(),
            vocab,
            id_to_token,
            added_tokens: Vec::new(),
            special_tokens: HashMap::new(),
            byte_decoder,
        };
        tokenizer.detect_special_tokens();
        Ok(tokenizer)
    }

    /// Parses a Hugging Face `tokenizer.json` (`model.vocab`, `model.merges`, `added_tokens`).
    pub fn from_tokenizer_json(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let model = value.get("model").ok_or_else(|| ProbeError::TokenizerError {
            message: "tokenizer.json has no 'model' section".to_string(),
        })?;
        if let Some(kind) = model.get("type").and_then(Value::as_str) {
            if kind != "BPE" {
                return Err(ProbeError::TokenizerError {
                    message: format!("unsupported tokenizer model {}", kind),
                });
            }
        }

        let vocab = parse_vocab(model.get("vocab").unwrap_or(&Value::Null))?;
        let merges = parse_merge_entries(model.get("merges").unwrap_or(&Value::Null))?;
        let mut tokenizer = Self::new(vocab, &merges)?;

        if let Some(Value::Array(added)) = value.get("added_tokens") {
            for entry in added {
                let content = entry.get("content").and_then(Value::as_str);
                let id = entry.get("id").and_then(Value::as_u64);
                if let (Some(content), Some(id)) = (content, id) {
                    tokenizer.register_added_token(content, id as u32);
                }
            }
            tokenizer.detect_special_tokens();
        }

        Ok(tokenizer)
    }

    /// Parses a flat `vocab.json` and the text of its `merges.txt`.
    pub fn from_vocab_and_merges(vocab_bytes: &[u8], merges_text: &str) -> Result<Self> {
        let value: Value = serde_json::from_slice(vocab_bytes)?;
        let vocab = parse_vocab(&value)?;
        let merges = merges_text
            .lines()
            .filter(|line| !line.starts_with("#version") && !line.trim().is_empty())
            .map(parse_merge_line)
            .collect::<Result<Vec<_>>>()?;
        Self::new(vocab, &merges)
    }

    /// Loads `tokenizer.json`, or `vocab.json` plus the `merges.txt` beside it, and
    /// applies a neighbouring `special_tokens_map.json` when present.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new(""));

        let is_tokenizer_json = serde_json::from_slice::<Value>(&bytes)?
            .get("model")
            .is_some();
        let mut tokenizer = if is_tokenizer_json {
            Self::from_tokenizer_json(&bytes)?
        } else {
            let merges_path = dir.join("merges.txt");
            let merges = std::fs::read_to_string(&merges_path).map_err(|e| ProbeError::TokenizerError {
                message: format!("{} needs {}: {}", path.display(), merges_path.display(), e),
            })?;
            Self::from_vocab_and_merges(&bytes, &merges)?
        };

        let map_path = dir.join("special_tokens_map.json");
        if map_path.exists() {
            let map_bytes = std::fs::read(&map_path)?;
            tokenizer.apply_special_tokens_map(&map_bytes)?;
            tracing::debug!("Applied special tokens from {}", map_path.display());
        }

        tracing::debug!(
            "Loaded tokenizer with {} base tokens, {} merges and {} added tokens",
            tokenizer.base_vocab_size,
            tokenizer.rank_to_id.len() - BYTE_RANKS as usize,
            tokenizer.added_tokens.len()
        );
        Ok(tokenizer)
    }

    /// Applies a `special_tokens_map.json`; values are strings or `{"content": ...}` objects.
    pub fn apply_special_tokens_map(&mut self, bytes: &[u8]) -> Result<()> {
        let map: Value = serde_json::from_slice(bytes)?;
        for role in SpecialToken::ALL {
            let content = match map.get(role.map_key()) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Object(obj)) => obj
                    .get("content")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            };
            if let Some(content) = content {
                self.set_special_token(role, &content);
            }
        }
        Ok(())
    }

    /// Assigns a role to a token, adding it to the vocabulary when it is new.
    pub fn set_special_token(&mut self, role: SpecialToken, content: &str) {
        if !self.vocab.contains_key(content) {
            let id = self.next_id();
            self.register_added_token(content, id);
        } else {
            self.mark_added(content);
        }
        self.special_tokens.insert(role, content.to_string());
    }

    /// Adds `[PAD]`, `</s>`, `<s>` and `<unk>` for whichever roles are still unset.
    pub fn with_default_special_tokens(mut self) -> Self {
        let defaults = [
            (SpecialToken::Pad, DEFAULT_PAD_TOKEN),
            (SpecialToken::Eos, DEFAULT_EOS_TOKEN),
            (SpecialToken::Bos, DEFAULT_BOS_TOKEN),
            (SpecialToken::Unk, DEFAULT_UNK_TOKEN),
        ];
        for (role, content) in defaults {
            if !self.special_tokens.contains_key(&role) {
                tracing::debug!("Adding default special token {:?} = {}", role, content);
                self.set_special_token(role, content);
            }
        }
        self
    }

    /// Number of ids, added tokens included; the width of a logits row.
    pub fn len(&self) -> usize {
        self.vocab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocab.is_empty()
    }

    fn next_id(&self) -> u32 {
        self.id_to_token.keys().max().map(|id| id + 1).unwrap_or(0)
    }

    fn register_added_token(&mut self, content: &str, id: u32) {
        self.vocab.insert(content.to_string(), id);
        self.id_to_token.insert(id, content.to_string());
        self.mark_added(content);
    }

    fn mark_added(&mut self, content: &str) {
        if !self.added_tokens.iter().any(|t| t == content) {
            self.added_tokens.push(content.to_string());
            // Longest first so overlapping added tokens split greedily.
            self.added_tokens
                .sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        }
    }

    fn detect_special_tokens(&mut self) {
        for role in SpecialToken::ALL {
            if self.special_tokens.contains_key(&role) {
                continue;
            }
            if let Some(name) = role
                .conventional_names()
                .iter()
                .find(|name| self.vocab.contains_key(**name))
            {
                self.special_tokens.insert(role, name.to_string());
                self.mark_added(name);
            }
        }
    }

    /// Splits `text` into plain segments and added tokens, in order.
    fn split_added<'a>(&'a self, text: &'a str) -> Vec<Segment<'a>> {
        let mut segments = Vec::new();
        let mut rest = text;

        while !rest.is_empty() {
            let earliest = self
                .added_tokens
                .iter()
                .filter_map(|token| rest.find(token.as_str()).map(|pos| (pos, token)))
                .min_by(|(pa, ta), (pb, tb)| pa.cmp(pb).then_with(|| tb.len().cmp(&ta.len())));

            match earliest {
                Some((pos, token)) => {
                    if pos > 0 {
                        segments.push(Segment::Text(&rest[..pos]));
                    }
                    segments.push(Segment::Added(token.as_str()));
                    rest = &rest[pos + token.len()..];
                }
                None => {
                    segments.push(Segment::Text(rest));
                    break;
                }
            }
        }
        segments
    }

    fn unk_id(&self) -> Option<u32> {
        self.special_tokens
            .get(&SpecialToken::Unk)
            .and_then(|token| self.vocab.get(token))
            .copied()
    }
}

enum Segment<'a> {
    Text(&'a str),
    Added(&'a str),
}

impl Tokenizer for BpeTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        let unk = self.unk_id();
        let mut ids = Vec::new();
        for segment in self.split_added(text) {
            match segment {
                Segment::Added(token) => {
                    if let Some(id) = self.vocab.get(token) {
                        ids.push(*id);
                    }
                }
                Segment::Text(text) => {
                    for rank in self.bpe.encode_ordinary(text) {
                        match self.rank_to_id.get(rank as usize).copied().flatten().or(unk) {
                            Some(id) => ids.push(id),
                            None => tracing::debug!("No vocabulary entry for BPE rank {}, dropping it", rank),
                        }
                    }
                }
            }
        }
        ids
    }

    fn decode(&self, id: u32) -> String {
        let Some(token) = self.id_to_token.get(&id) else {
            return String::new();
        };
        if self.added_tokens.iter().any(|t| t == token) {
            return token.clone();
        }

        let mut bytes = Vec::with_capacity(token.len());
        for ch in token.chars() {
            match self.byte_decoder.get(&ch) {
                Some(byte) => bytes.push(*byte),
                None => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn vocab_size(&self) -> usize {
        self.base_vocab_size
    }

    fn token_id(&self, token: &str) -> Option<u32> {
        self.vocab.get(token).copied()
    }

    fn special_token(&self, role: SpecialToken) -> Option<&str> {
        self.special_tokens.get(&role).map(String::as_str)
    }
}

fn parse_vocab(value: &Value) -> Result<HashMap<String, u32>> {
    let Value::Object(entries) = value else {
        return Err(ProbeError::TokenizerError {
            message: "vocabulary must be a JSON object of token → id".to_string(),
        });
    };

    entries
        .iter()
        .map(|(token, id)| {
            id.as_u64()
                .and_then(|id| u32::try_from(id).ok())
                .map(|id| (token.clone(), id))
                .ok_or_else(|| ProbeError::TokenizerError {
                    message: format!("token {:?} has a non-integer id {}", token, id),
                })
        })
        .collect()
}

/// `model.merges` holds either `"a b"` strings or `["a", "b"]` pairs.
fn parse_merge_entries(value: &Value) -> Result<Vec<(String, String)>> {
    let Value::Array(entries) = value else {
        return Err(ProbeError::TokenizerError {
            message: "tokenizer.json has no BPE merges".to_string(),
        });
    };

    entries
        .iter()
        .map(|entry| match entry {
            Value::String(line) => parse_merge_line(line),
            Value::Array(pair) => match pair.as_slice() {
                [Value::String(left), Value::String(right)] => Ok((left.clone(), right.clone())),
                _ => Err(ProbeError::TokenizerError {
                    message: format!("malformed merge {}", entry),
                }),
            },
            _ => Err(ProbeError::TokenizerError {
                message: format!("malformed merge {}", entry),
            }),
        })
        .collect()
}

fn parse_merge_line(line: &str) -> Result<(String, String)> {
    line.split_once(' ')
        .map(|(left, right)| (left.to_string(), right.to_string()))
        .ok_or_else(|| ProbeError::TokenizerError {
            message: format!("malformed merge {:?}", line),
        })
}

/// Raw bytes of a vocabulary token written in the byte-level alphabet.
fn token_bytes(token: &str, byte_decoder: &HashMap<char, u8>) -> Option<Vec<u8>> {
    token.chars().map(|ch| byte_decoder.get(&ch).copied()).collect()
}

/// GPT-2's reversible byte → printable character table (space maps to `Ġ`).
fn bytes_to_unicode() -> [char; 256] {
    let printable = |b: u32| {
        (u32::from('!')..=u32::from('~')).contains(&b)
            || (0xA1..=0xAC).contains(&b)
            || (0xAE..=0xFF).contains(&b)
    };

    let mut table = ['\0'; 256];
    let mut shifted = 0u32;
    for byte in 0u32..256 {
        let code = if printable(byte) {
            byte
        } else {
            shifted += 1;
            255 + shifted
        };
        table[byte as usize] = char::from_u32(code).unwrap_or('\u{FFFD}');
    }
    table
}
