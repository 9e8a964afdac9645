//! Protocol-defined phrases such as "gained 3 pounds".
//!
//! A pattern whose text contains a number only matches when the patient stated that
//! number. Vague reports ("gained a little weight") fall through to the generic,
//! number-free patterns instead.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtocolPattern {
    pub id: String,
    pub text: String,
}

impl ProtocolPattern {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into() }
    }

    pub fn requires_number(&self) -> bool {
        tokens(&self.text).iter().any(|token| is_number(token))
    }

    pub fn matches(&self, text: &str) -> bool {
        let wanted = tokens(&self.text);
        if wanted.is_empty() {
            return false;
        }
        let present = tokens(text);
        wanted.iter().all(|word| present.iter().any(|token| token == word))
    }

    fn content_words(&self) -> Vec<String> {
        tokens(&self.text).into_iter().filter(|token| !is_number(token)).collect()
    }
}

/// Every pattern the text satisfies, in protocol order.
pub fn match_patterns(patterns: &[ProtocolPattern], text: &str) -> Vec<String> {
    patterns.iter().filter(|pattern| pattern.matches(text)).map(|pattern| pattern.id.clone()).collect()
}

/// Checks pattern ids proposed by the text-understanding collaborator against the
/// patient's own words. A numeric pattern whose number is absent from the text is
/// replaced by any number-free pattern that shares a word with it and does match.
pub fn validate_selection(patterns: &[ProtocolPattern], selected: &[String], text: &str) -> Vec<String> {
    let mut accepted: Vec<String> = Vec::new();

    for id in selected {
        let Some(pattern) = patterns.iter().find(|pattern| &pattern.id == id) else {
            continue;
        };
        if pattern.matches(text) {
            push_unique(&mut accepted, &pattern.id);
            continue;
        }
        if !pattern.requires_number() {
            continue;
        }

        let words = pattern.content_words();
        for generic in patterns.iter().filter(|candidate| !candidate.requires_number()) {
            let related = generic.content_words().iter().any(|word| words.contains(word));
            if related && generic.matches(text) {
                push_unique(&mut accepted, &generic.id);
            }
        }
    }

    accepted
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

fn is_number(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|ch| ch.is_ascii_digit() || ch == '.')
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '.'))
        .map(|token| token.trim_matches('.'))
        .filter(|token| !token.is_empty())
        .map(canonical_token)
        .collect()
}

fn canonical_token(token: &str) -> String {
    let mapped = match token {
        "one" => "1",
        "two" => "2",
        "three" => "3",
        "four" => "4",
        "five" => "5",
        "six" => "6",
        "seven" => "7",
        "eight" => "8",
        "nine" => "9",
        "ten" => "10",
        "lb" | "lbs" | "pound" => "pounds",
        "kilo" | "kilos" | "kg" | "kgs" => "kilograms",
        other => other,
    };
    stem(mapped)
}

fn stem(word: &str) -> String {
    if is_number(word) {
        return word.to_string();
    }
    for suffix in ["ing", "ed", "s"] {
        if let Some(root) = word.strip_suffix(suffix) {
            if root.len() >= 3 {
                return root.to_string();
            }
        }
    }
    word.to_string()
}
