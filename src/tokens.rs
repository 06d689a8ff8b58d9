//! Token accounting for prompt budgets, using cl100k_base (GPT-4/3.5
//! standard). All budget arithmetic in the engine goes through this service.

use std::sync::LazyLock;
use tiktoken_rs::{CoreBPE, cl100k_base};

static BPE: LazyLock<CoreBPE> =
    LazyLock::new(|| cl100k_base().expect("cl100k_base ranks are embedded in the binary"));

#[derive(Debug)]
pub struct TokenService;

impl TokenService {
    /// Count tokens in a string.
    pub fn count(content: &str) -> usize {
        BPE.encode_with_special_tokens(content).len()
    }

    /// Truncate a string to at most `max_tokens` tokens.
    ///
    /// Falls back to a character cut if the truncated token slice does not
    /// decode cleanly (a cut can land inside a multi-byte sequence).
    pub fn truncate(content: &str, max_tokens: usize) -> String {
        let tokens = BPE.encode_with_special_tokens(content);
        if tokens.len() <= max_tokens {
            return content.to_string();
        }

        match BPE.decode(tokens[..max_tokens].to_vec()) {
            Ok(text) => text,
            Err(_) => {
                let approx_chars = content
                    .char_indices()
                    .map(|(i, _)| i)
                    .nth(max_tokens * 4)
                    .unwrap_or(content.len());
                content[..approx_chars].to_string()
            }
        }
    }

    /// Keep the longest prefix of `rows` whose cumulative token count
    /// (one extra token per row for the joining newline) fits `budget`.
    pub fn take_within_budget(rows: &[String], budget: usize) -> Vec<String> {
        let mut used = 0;
        let mut kept = Vec::new();
        for row in rows {
            let cost = Self::count(row) + 1;
            if used + cost > budget {
                break;
            }
            used += cost;
            kept.push(row.clone());
        }
        kept
    }
}
