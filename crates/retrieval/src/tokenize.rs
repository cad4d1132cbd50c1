use once_cell::sync::Lazy;
use regex::Regex;

static CLEANER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{Hangul}\p{Latin}\p{Nd}\s]+").expect("valid tokenizer regex"));

pub fn tokenize(input: &str) -> Vec<String> {
    let normalized = CLEANER.replace_all(input, " ").to_lowercase();

    normalized
        .split_whitespace()
        .map(str::trim)
        .filter(|token| token.chars().count() > 1)
        .map(|token| token.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_hangul_and_latin() {
        let tokens = tokenize("T1 장기주차장, parking-fee!");
        assert!(tokens.iter().any(|t| t == "t1"));
        assert!(tokens.iter().any(|t| t == "장기주차장"));
        assert!(tokens.iter().any(|t| t == "parking"));
        assert!(tokens.iter().any(|t| t == "fee"));
    }
}
