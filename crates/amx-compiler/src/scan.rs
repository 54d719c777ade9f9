/// Index of the bracket closing the one at `open_index`, honoring nested
/// `()[]{}` pairs and skipping quoted string/char literals. `None` when the
/// text is unbalanced.
pub(crate) fn matching_close(text: &str, open_index: usize) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in text[open_index..].char_indices() {
        if let Some(active) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == active {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' if !stack.is_empty() => quote = Some(ch),
            '(' | '[' | '{' => stack.push(ch),
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(open_index + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits on `separator` occurrences that sit outside brackets and quotes.
pub(crate) fn split_top_level(text: &str, separator: char) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0usize;

    for (index, ch) in text.char_indices() {
        if let Some(active) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == active {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.checked_sub(1)?,
            _ if ch == separator && depth == 0 => {
                parts.push(&text[start..index]);
                start = index + ch.len_utf8();
            }
            _ => {}
        }
    }

    if depth != 0 || quote.is_some() {
        return None;
    }
    parts.push(&text[start..]);
    Some(parts)
}

/// `"[a, b]"` -> `Some("a, b")` when the opening bracket closes at the very end.
pub(crate) fn bracketed_inner(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if !trimmed.starts_with('[') {
        return None;
    }
    let close = matching_close(trimmed, 0)?;
    if close + 1 != trimmed.len() {
        return None;
    }
    Some(&trimmed[1..close])
}

/// Items of a bracketed list; an empty list yields no items.
pub(crate) fn list_items(inner: &str) -> Option<Vec<&str>> {
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    Some(
        split_top_level(inner, ',')?
            .into_iter()
            .map(str::trim)
            .collect(),
    )
}

/// Byte offsets of `needle` as a root token outside quoted literals. A token
/// after `.` is a member access and one before `:` is a path head, so
/// neither counts.
pub(crate) fn root_token_offsets(source: &str, needle: &str) -> Vec<usize> {
    let mut offsets = Vec::new();
    if needle.is_empty() {
        return offsets;
    }

    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut index = 0usize;
    while let Some(ch) = source[index..].chars().next() {
        if let Some(active) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == active {
                quote = None;
            }
        } else if ch == '"' || ch == '\'' {
            quote = Some(ch);
        } else if source[index..].starts_with(needle) && is_root_token(source, index, needle.len()) {
            offsets.push(index);
            index += needle.len();
            continue;
        }
        index += ch.len_utf8();
    }
    offsets
}

pub(crate) fn mentions_root_token(source: &str, needle: &str) -> bool {
    !root_token_offsets(source, needle).is_empty()
}

/// Replaces root-token occurrences of `needle` outside quoted literals.
pub(crate) fn replace_bounded(source: &str, needle: &str, replacement: &str) -> String {
    let mut output = String::with_capacity(source.len());
    let mut copied = 0usize;
    for start in root_token_offsets(source, needle) {
        output.push_str(&source[copied..start]);
        output.push_str(replacement);
        copied = start + needle.len();
    }
    output.push_str(&source[copied..]);
    output
}

fn is_root_token(source: &str, start: usize, len: usize) -> bool {
    let before = source[..start].chars().next_back();
    let after = source[start + len..].chars().next();
    !before.is_some_and(|ch| is_identifier_char(ch) || ch == '.')
        && !after.is_some_and(|ch| is_identifier_char(ch) || ch == ':')
}

fn is_identifier_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod scan_tests {
    use super::*;

    #[test]
    fn matching_close_respects_nesting_and_quotes() {
        let text = "${a} #{f(\"}\", {x})} tail";
        assert_eq!(matching_close(text, 1), Some(3));
        let function_open = text.find("#{").expect("function") + 1;
        let close = matching_close(text, function_open).expect("balanced");
        assert_eq!(&text[function_open..=close], "{f(\"}\", {x})}");
        assert_eq!(matching_close("{(}", 0), None);
        assert_eq!(matching_close("{abc", 0), None);
    }

    #[test]
    fn split_top_level_ignores_nested_separators() {
        let parts = split_top_level("a, f(b, c), [d, e], \"x,y\"", ',').expect("balanced");
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1].trim(), "f(b, c)");
        assert_eq!(parts[3].trim(), "\"x,y\"");
        assert!(split_top_level("a, (b", ',').is_none());
    }

    #[test]
    fn bracketed_inner_requires_closing_at_end() {
        assert_eq!(bracketed_inner(" [A, B] "), Some("A, B"));
        assert_eq!(bracketed_inner("[A] + [B]"), None);
        assert_eq!(bracketed_inner("A, B"), None);
        assert_eq!(list_items("").expect("empty").len(), 0);
        assert_eq!(list_items("A , B").expect("items"), vec!["A", "B"]);
    }

    #[test]
    fn match_subject_is_found_only_as_a_root_token() {
        assert!(mentions_root_token("x > 0 && x < 10", "x"));
        assert!(mentions_root_token("f0(um, x)", "x"));
        assert!(!mentions_root_token(r#""x marks the spot""#, "x"));
        assert!(!mentions_root_token(r#"'x' == 'y'"#, "x"));
        assert!(!mentions_root_token("max(qty, 1)", "x"));
        assert!(!mentions_root_token("p0.x == 1", "x"));
        assert!(!mentions_root_token("x:Qty", "x"));
        assert!(!mentions_root_token("", "x"));
        assert_eq!(root_token_offsets("p0 + p10 * p0", "p0"), vec![0, 11]);
    }

    #[test]
    fn replace_bounded_skips_partial_tokens_and_literals() {
        let replaced = replace_bounded(r#"x == Buy || x == BuyMore || y == "Buy""#, "Buy", "'1'");
        assert_eq!(replaced, r#"x == '1' || x == BuyMore || y == "Buy""#);
    }
}
