//! Parsing of naming responses.
//!
//! The model is asked for an array literal of quoted names but often wraps
//! it in a markdown code fence, uses single quotes, or adds prose around it.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::errors::{CompsetError, Result};

static QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""([^"\n]+)"|“([^”\n]+)”|「([^」\n]+)」"#).expect("quoted regex is valid")
});

/// Single-quoted names; the opening quote may not follow a letter, so
/// apostrophes such as `Here's` never open a match.
static SINGLE_QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\p{L}\p{N}_'])'([^'\n]+)'").expect("single-quoted regex is valid")
});

/// Remove markdown code fence lines.
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract the list of names from a naming response.
pub fn parse_name_list(response: &str) -> Result<Vec<String>> {
    let text = strip_code_fences(response);

    if let Some(literal) = array_literal(&text) {
        if let Ok(names) = serde_json::from_str::<Vec<String>>(literal) {
            return non_empty(clean(names));
        }
        if let Some(names) = parse_quoted_list(literal) {
            return non_empty(clean(names));
        }
    }

    // double, curly and corner-bracket quotes win over single quotes
    let names = quoted_names(&QUOTED, &text, 3);
    if !names.is_empty() {
        return non_empty(names);
    }
    non_empty(quoted_names(&SINGLE_QUOTED, &text, 1))
}

fn quoted_names(pattern: &Regex, text: &str, groups: usize) -> Vec<String> {
    let names = pattern
        .captures_iter(text)
        .filter_map(|caps| {
            (1..=groups)
                .find_map(|i| caps.get(i))
                .map(|m| m.as_str().to_string())
        })
        .collect();
    clean(names)
}

fn array_literal(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse `['a', "b"]` with either quote style and backslash escapes.
fn parse_quoted_list(literal: &str) -> Option<Vec<String>> {
    let inner = literal.strip_prefix('[')?.strip_suffix(']')?;
    let mut names = Vec::new();
    let mut chars = inner.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let quote = match chars.next() {
            None => break,
            Some(q @ ('\'' | '"')) => q,
            Some(_) => return None,
        };
        let mut current = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                }
                c if c == quote => {
                    closed = true;
                    break;
                }
                c => current.push(c),
            }
        }
        if !closed {
            return None;
        }
        names.push(current);
    }
    Some(names)
}

fn clean(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect()
}

fn non_empty(names: Vec<String>) -> Result<Vec<String>> {
    if names.is_empty() {
        Err(CompsetError::naming_service("no names found in response"))
    } else {
        Ok(names)
    }
}
