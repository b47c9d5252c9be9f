//! Glob patterns over cache keys.

use std::fmt;

/// A glob over keys: `*` matches any run of characters (including none),
/// `?` matches exactly one, and `\` escapes the next character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    source: String,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyOne,
    AnyRun,
}

impl KeyPattern {
    /// Compile a pattern.
    pub fn new(pattern: impl Into<String>) -> Self {
        let source = pattern.into();
        let mut tokens = Vec::new();
        let mut chars = source.chars();
        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                }
                '?' => tokens.push(Token::AnyOne),
                '\\' => tokens.push(Token::Literal(chars.next().unwrap_or('\\'))),
                other => tokens.push(Token::Literal(other)),
            }
        }
        Self { source, tokens }
    }

    /// Pattern matching every key under `prefix`.
    pub fn prefix(prefix: &str) -> Self {
        let mut escaped = String::with_capacity(prefix.len() + 1);
        for c in prefix.chars() {
            if matches!(c, '*' | '?' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped.push('*');
        Self::new(escaped)
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern contains no wildcards.
    pub fn is_literal(&self) -> bool {
        self.tokens.iter().all(|t| matches!(t, Token::Literal(_)))
    }

    /// Test a key against the pattern.
    pub fn matches(&self, key: &str) -> bool {
        let key: Vec<char> = key.chars().collect();
        let (mut p, mut k) = (0, 0);
        // Last `*` seen and the key position it was tried at.
        let mut backtrack: Option<(usize, usize)> = None;

        while k < key.len() {
            match self.tokens.get(p) {
                Some(Token::AnyRun) => {
                    backtrack = Some((p, k));
                    p += 1;
                }
                Some(Token::AnyOne) => {
                    p += 1;
                    k += 1;
                }
                Some(Token::Literal(c)) if *c == key[k] => {
                    p += 1;
                    k += 1;
                }
                _ => match backtrack {
                    Some((star, from)) => {
                        p = star + 1;
                        k = from + 1;
                        backtrack = Some((star, from + 1));
                    }
                    None => return false,
                },
            }
        }

        self.tokens[p..].iter().all(|t| *t == Token::AnyRun)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl From<&str> for KeyPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_star_matches_suffix() {
        let pattern = KeyPattern::new("api:stations:*");
        assert!(pattern.matches("api:stations:/a"));
        assert!(pattern.matches("api:stations:/b"));
        assert!(pattern.matches("api:stations:"));
        assert!(!pattern.matches("api:prices:/a"));
        assert!(!pattern.matches("api:stations"));
    }

    #[test]
    fn test_inner_star_and_question_mark() {
        let pattern = KeyPattern::new("api:*:/?");
        assert!(pattern.matches("api:stations:/a"));
        assert!(!pattern.matches("api:stations:/ab"));

        let pattern = KeyPattern::new("*b*b");
        assert!(pattern.matches("abab"));
        assert!(pattern.matches("bb"));
        assert!(!pattern.matches("aba"));
    }

    #[test]
    fn test_escaped_wildcards_are_literal() {
        let pattern = KeyPattern::new(r"a\*b");
        assert!(pattern.matches("a*b"));
        assert!(!pattern.matches("axb"));
        assert!(pattern.is_literal());
    }

    #[test]
    fn test_prefix_escapes_wildcards() {
        let pattern = KeyPattern::prefix("api:q?:");
        assert!(pattern.matches("api:q?:x"));
        assert!(!pattern.matches("api:qz:x"));
    }

    proptest! {
        #[test]
        fn prop_literal_matches_only_itself(key in "[a-z:/]{0,12}", other in "[a-z:/]{0,12}") {
            let pattern = KeyPattern::prefix(&key);
            prop_assert!(pattern.matches(&key));
            let joined = format!("{}{}", key, other);
            prop_assert!(pattern.matches(&joined));

            let exact = KeyPattern::new(key.clone());
            prop_assert_eq!(exact.matches(&other), key == other);
        }

        #[test]
        fn prop_star_matches_everything(key in "\\PC{0,16}") {
            prop_assert!(KeyPattern::new("*").matches(&key));
        }
    }
}
