use once_cell::sync::Lazy;
use regex::Regex;

// Tokens that attach to the previous word instead of taking a space
static NO_SPACE_BEFORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[.,!?;:%…)\]}»”’。，！？]").expect("static regex"));

static PURE_PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\p{P}+$").expect("static regex"));

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?…。！？]["'”’)\]]*$"#).expect("static regex"));

pub fn is_pure_punctuation(token: &str) -> bool {
    PURE_PUNCTUATION.is_match(token)
}

pub fn ends_sentence(word: &str) -> bool {
    SENTENCE_END.is_match(word)
}

/// Joins words with single spaces, except before punctuation and closing brackets.
pub fn join_words<S: AsRef<str>>(words: &[S]) -> String {
    let mut out = String::new();
    for word in words {
        let word = word.as_ref();
        if word.is_empty() {
            continue;
        }
        if !out.is_empty() && !NO_SPACE_BEFORE.is_match(word) {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Whitespace-separated tokens of a transcript fragment.
pub fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split_whitespace()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_words() {
        assert_eq!(join_words(&["Hello", "world", ".", "How", "are", "you", "?"]), "Hello world. How are you?");
        assert_eq!(join_words(&["(see", "above", ")", ",", "ok"]), "(see above), ok");
        assert_eq!(join_words::<&str>(&[]), "");
    }

    #[test]
    fn test_punctuation_classes() {
        assert!(is_pure_punctuation("."));
        assert!(is_pure_punctuation("?!"));
        assert!(is_pure_punctuation("…"));
        assert!(!is_pure_punctuation("world."));
        assert!(!is_pure_punctuation(""));

        assert!(ends_sentence("world."));
        assert!(ends_sentence("really?\""));
        assert!(!ends_sentence("Hello,"));
    }
}
