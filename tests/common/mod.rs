#![allow(dead_code)]

use serde_json::json;
use std::path::{Path, PathBuf};

pub const DATASET: &str = "LAMA_TREx";

/// Words of the GPT-2 style test vocabulary; `Ġ` marks a leading space.
pub const WORDS: &[&str] = &[
    "Ġthe", "The", "ĠThe", "Ġof", "Ġis", "Ġin", "Ġwas", "Ġborn", "Ġcapital", "ĠParis",
    "ĠFrance", "ĠRome", "ĠItaly", "ĠMadrid", "ĠSpain", "ĠFlorence", "ĠDante", "Dante",
    "ĠLondon", "ĠEnglish", "Ġlanguage", "Ġspoken",
];

pub const SPECIAL_TOKENS: &[&str] = &["<unk>", "</s>", "<mask>"];

/// Tokens in id order and the merges that build every word one character at a time.
pub fn bpe_model() -> (Vec<String>, Vec<String>) {
    let mut tokens: Vec<String> = Vec::new();
    let push = |token: String, tokens: &mut Vec<String>| {
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    };
    for word in WORDS {
        for ch in word.chars() {
            push(ch.to_string(), &mut tokens);
        }
    }

    // Words with a leading space merge first at each step.
    let ordered: Vec<&str> = WORDS
        .iter()
        .copied()
        .filter(|w| w.starts_with('Ġ'))
        .chain(WORDS.iter().copied().filter(|w| !w.starts_with('Ġ')))
        .collect();
    let longest = ordered.iter().map(|w| w.chars().count()).max().unwrap_or(0);
    let mut merges = Vec::new();
    for step in 1..longest {
        for word in &ordered {
            let chars: Vec<char> = word.chars().collect();
            if chars.len() <= step {
                continue;
            }
            let left: String = chars[..step].iter().collect();
            let merge = format!("{} {}", left, chars[step]);
            if !merges.contains(&merge) {
                merges.push(merge);
                push(format!("{}{}", left, chars[step]), &mut tokens);
            }
        }
    }

    for special in SPECIAL_TOKENS {
        push(special.to_string(), &mut tokens);
    }
    (tokens, merges)
}

/// Writes a Hugging Face style `tokenizer.json` for the test vocabulary.
pub fn write_tokenizer(dir: &Path) -> anyhow::Result<PathBuf> {
    let (tokens, merges) = bpe_model();
    let vocab: serde_json::Map<String, serde_json::Value> = tokens
        .iter()
        .enumerate()
        .map(|(id, token)| (token.clone(), json!(id)))
        .collect();
    let path = dir.join("tokenizer.json");
    std::fs::write(
        &path,
        serde_json::to_vec_pretty(&json!({
            "added_tokens": [],
            "model": {"type": "BPE", "vocab": vocab, "merges": merges}
        }))?,
    )?;
    Ok(path)
}

pub fn token_id(token: &str) -> usize {
    bpe_model()
        .0
        .iter()
        .position(|t| t == token)
        .unwrap_or_else(|| panic!("{} is not in the test vocabulary", token))
}

fn fact(uid: &str, subj: &str, rel: &str, obj: &str, template: &str) -> serde_json::Value {
    let truncated = template.replace("[X]", subj);
    json!({
        "uid": uid,
        "subj": subj,
        "rel_id": rel,
        "output": obj,
        "truncated_input": truncated,
        "input": format!("{} [Y].", truncated),
    })
}

/// Writes `train.json`, `test.json` and `all.json` under `<root>/data/LAMA_TREx`.
pub fn write_dataset(root: &Path) -> anyhow::Result<PathBuf> {
    let dir = root.join("data").join(DATASET);
    std::fs::create_dir_all(&dir)?;

    let capital = "The capital of [X] is";
    let birth = "[X] was born in";
    let language = "The language of [X] is";
    let train = vec![
        fact("1", "France", "P36", "Paris", capital),
        fact("2", "Spain", "P36", "Madrid", capital),
        fact("5", "France", "P37", "French", language),
    ];
    let test = vec![
        fact("3", "Italy", "P36", "Rome", capital),
        fact("4", "Dante", "P19", "Florence", birth),
    ];
    let all: Vec<serde_json::Value> = train.iter().chain(test.iter()).cloned().collect();

    std::fs::write(dir.join("train.json"), serde_json::to_vec(&train)?)?;
    std::fs::write(dir.join("test.json"), serde_json::to_vec(&test)?)?;
    std::fs::write(dir.join("all.json"), serde_json::to_vec(&all)?)?;
    Ok(dir)
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
