use anyhow::{bail, Context};
use pl_core::core::{MessageDraft, Transform, TransformChain};
use serde_json::{Map, Value};

use crate::config::TransformConfig;

pub const DEFAULT_MAX_TOKS: usize = 80;

/// Names accepted in `[[transforms.*]]` entries.
pub const KNOWN_TRANSFORMS: &[&str] = &["noop", "sentence-split", "truncate"];

// ---------------------------------------------------------------------------
// Built-in transforms
// ---------------------------------------------------------------------------

pub struct Noop;

impl Transform for Noop {
    fn name(&self) -> &str {
        "noop"
    }

    fn transform(&self, draft: MessageDraft) -> MessageDraft {
        draft
    }
}

/// Puts every sentence on its own line; sentences longer than `max_toks`
/// whitespace tokens are broken into chunks of at most that many.
pub struct SentenceSplit {
    pub max_toks: usize,
}

impl SentenceSplit {
    pub fn split(&self, text: &str) -> String {
        let max = self.max_toks.max(1);
        let mut lines = Vec::new();
        for sentence in sentences(text) {
            let words: Vec<&str> = sentence.split_whitespace().collect();
            for chunk in words.chunks(max) {
                lines.push(chunk.join(" "));
            }
        }
        lines.join("\n")
    }
}

fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().is_none_or(|(_, next)| next.is_whitespace());
            if at_boundary {
                let end = i + c.len_utf8();
                out.push(text[start..end].trim());
                start = end;
            }
        }
    }
    out.push(text[start..].trim());
    out.retain(|s| !s.is_empty());
    out
}

impl Transform for SentenceSplit {
    fn name(&self) -> &str {
        "sentence-split"
    }

    fn transform(&self, mut draft: MessageDraft) -> MessageDraft {
        let split = self.split(&draft.text);
        if split != draft.text {
            draft.rewrite(split);
        }
        draft
    }
}

pub struct Truncate {
    pub max_chars: usize,
}

impl Transform for Truncate {
    fn name(&self) -> &str {
        "truncate"
    }

    fn transform(&self, mut draft: MessageDraft) -> MessageDraft {
        if draft.text.chars().count() > self.max_chars {
            let cut: String = draft.text.chars().take(self.max_chars).collect();
            draft.rewrite(cut);
        }
        draft
    }
}

// ---------------------------------------------------------------------------
// Construction from config
// ---------------------------------------------------------------------------

fn usize_arg(args: &Map<String, Value>, key: &str) -> anyhow::Result<Option<usize>> {
    match args.get(key) {
        None => Ok(None),
        Some(v) => {
            let n = v
                .as_u64()
                .with_context(|| format!("transform argument {key} must be a positive integer"))?;
            Ok(Some(n as usize))
        }
    }
}

pub fn build_transform(config: &TransformConfig) -> anyhow::Result<Box<dyn Transform>> {
    let transform: Box<dyn Transform> = match config.name.as_str() {
        "noop" => Box::new(Noop),
        "sentence-split" => Box::new(SentenceSplit {
            max_toks: usize_arg(&config.args, "max_toks")?.unwrap_or(DEFAULT_MAX_TOKS),
        }),
        "truncate" => {
            let max_chars = usize_arg(&config.args, "max_chars")?
                .context("truncate transform requires max_chars")?;
            Box::new(Truncate { max_chars })
        }
        other => bail!(
            "unknown transform {other}; expected one of {}",
            KNOWN_TRANSFORMS.join(", ")
        ),
    };
    Ok(transform)
}

pub fn build_chain(configs: &[TransformConfig]) -> anyhow::Result<TransformChain> {
    let transforms = configs
        .iter()
        .map(build_transform)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(TransformChain::new(transforms))
}

#[cfg(test)]
mod tests {
    use pl_core::core::UserId;
    use serde_json::json;

    use super::*;

    fn draft(text: &str) -> MessageDraft {
        MessageDraft::new(UserId::new("alice"), text)
    }

    fn cfg(name: &str, args: Value) -> TransformConfig {
        TransformConfig {
            name: name.into(),
            args: args.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_sentence_split_one_per_line() {
        let t = SentenceSplit { max_toks: 80 };
        assert_eq!(
            t.split("Hello there. How are you? Fine!"),
            "Hello there.\nHow are you?\nFine!"
        );
    }

    #[test]
    fn test_sentence_split_keeps_decimals() {
        let t = SentenceSplit { max_toks: 80 };
        assert_eq!(t.split("Pi is 3.14 roughly."), "Pi is 3.14 roughly.");
    }

    #[test]
    fn test_sentence_split_chunks_long_sentences() {
        let t = SentenceSplit { max_toks: 2 };
        assert_eq!(t.split("one two three four five"), "one two\nthree four\nfive");
    }

    #[test]
    fn test_changed_text_records_original() {
        let t = SentenceSplit { max_toks: 80 };
        let out = t.transform(draft("A. B."));
        assert_eq!(out.text, "A.\nB.");
        assert_eq!(out.data["text_orig"], "A. B.");
    }

    #[test]
    fn test_unchanged_text_has_no_original() {
        let out = Truncate { max_chars: 10 }.transform(draft("short"));
        assert_eq!(out.text, "short");
        assert!(!out.data.contains_key("text_orig"));
    }

    #[test]
    fn test_truncate_counts_chars() {
        let out = Truncate { max_chars: 3 }.transform(draft("héllo"));
        assert_eq!(out.text, "hél");
    }

    #[test]
    fn test_build_chain_in_order() {
        let chain = build_chain(&[
            cfg("truncate", json!({"max_chars": 5})),
            cfg("sentence-split", json!({})),
            cfg("noop", json!(null)),
        ])
        .unwrap();
        assert_eq!(chain.names(), vec!["truncate", "sentence-split", "noop"]);
        let out = chain.apply(draft("Hi. Bye now."));
        assert_eq!(out.text, "Hi.\nB");
        assert_eq!(out.data["text_orig"], "Hi. Bye now.");
    }

    #[test]
    fn test_unknown_transform_rejected() {
        let err = build_transform(&cfg("translate", json!({}))).err().unwrap();
        assert!(err.to_string().contains("unknown transform translate"));
    }

    #[test]
    fn test_truncate_requires_max_chars() {
        assert!(build_transform(&cfg("truncate", json!({}))).is_err());
        assert!(build_transform(&cfg("truncate", json!({"max_chars": "ten"}))).is_err());
    }
}
