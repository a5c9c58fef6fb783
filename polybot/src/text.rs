//! Status text helpers: wrapping long statuses into threads and picking
//! the best-fitting status from a set of alternatives.

/// Length of a status as the networks count it (Unicode scalar values).
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Wrap text into lines of at most `width` characters, breaking on
/// whitespace and after hyphens inside words (`state-of-the-art`). Runs of
/// whitespace (including newlines) collapse to a single space. A word longer
/// than `width` starts on the current line, filling what room is left, and
/// continues on the following lines.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut chunks: Vec<Vec<char>> = Vec::new();
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            chunks.push(vec![' ']);
        }
        chunks.extend(hyphen_pieces(word));
    }
    chunks.reverse();

    let mut lines = Vec::new();
    while !chunks.is_empty() {
        let mut line: Vec<char> = Vec::new();
        if !lines.is_empty() && chunks.last().is_some_and(|c| is_space(c)) {
            chunks.pop();
        }
        while chunks.last().is_some_and(|c| line.len() + c.len() <= width) {
            if let Some(chunk) = chunks.pop() {
                line.extend(chunk);
            }
        }
        if let Some(chunk) = chunks.last_mut() {
            if chunk.len() > width {
                let room = width - line.len();
                let mut end = room;
                if let Some(h) = chunk[..room].iter().rposition(|&c| c == '-') {
                    if h > 0 && chunk[..h].iter().any(|&c| c != '-') {
                        end = h + 1;
                    }
                }
                line.extend(chunk.drain(..end));
            }
        }
        if line.last() == Some(&' ') {
            line.pop();
        }
        if !line.is_empty() {
            lines.push(line.into_iter().collect());
        }
    }
    lines
}

fn is_space(chunk: &[char]) -> bool {
    matches!(chunk, [' '])
}

fn is_letter(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

/// Split a word after each hyphen that joins letters. A hyphen breaks when
/// two letters (or `x-y`) precede it and a letter follows.
fn hyphen_pieces(word: &str) -> Vec<Vec<char>> {
    let chars: Vec<char> = word.chars().collect();
    let letter = |i: usize| chars.get(i).copied().is_some_and(is_letter);
    let mut pieces = Vec::new();
    let mut start = 0;
    for i in 0..chars.len() {
        if chars[i] != '-' {
            continue;
        }
        let before = (i >= 2 && letter(i - 2) && letter(i - 1))
            || (i >= 3 && letter(i - 3) && chars[i - 2] == '-' && letter(i - 1));
        let after = letter(i + 1)
            && (letter(i + 2) || (chars.get(i + 2) == Some(&'-') && letter(i + 3)));
        if before && after {
            pieces.push(chars[start..=i].to_vec());
            start = i + 1;
        }
    }
    pieces.push(chars[start..].to_vec());
    pieces
}

/// Pick the longest choice strictly shorter than `max_len`.
///
/// Falls back to the first choice when none fits, so the network rejects
/// it rather than the bot silently posting nothing.
pub fn longest_allowed(choices: &[String], max_len: usize) -> &str {
    let mut sorted: Vec<&String> = choices.iter().collect();
    sorted.sort_by_key(|s| char_len(s));
    let mut picked = choices.first().map(String::as_str).unwrap_or("");
    for s in sorted {
        if char_len(s) < max_len {
            picked = s;
        }
    }
    picked
}

/// Cut text to `max_len` characters, marking the cut with `...`.
pub fn truncate(text: &str, max_len: usize) -> String {
    if char_len(text) <= max_len {
        return text.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_breaks_on_words() {
        let lines = wrap("the quick brown fox jumps over the lazy dog", 10);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps over", "the lazy", "dog"]);
        assert!(lines.iter().all(|l| char_len(l) <= 10));
    }

    #[test]
    fn wrap_collapses_whitespace() {
        let lines = wrap("  hello \n\n  world  ", 80);
        assert_eq!(lines, vec!["hello world"]);
    }

    #[test]
    fn wrap_splits_long_words() {
        let lines = wrap("ab abcdefghij cd", 4);
        assert_eq!(lines, vec!["ab a", "bcde", "fghi", "j cd"]);
    }

    #[test]
    fn wrap_breaks_after_hyphens() {
        let lines = wrap("a well-known state-of-the-art thing", 12);
        assert_eq!(lines, vec!["a well-known", "state-of-", "the-art", "thing"]);
    }

    #[test]
    fn wrap_keeps_short_hyphen_prefixes() {
        // A single letter before the hyphen is not a break point.
        let lines = wrap("an e-mail address", 8);
        assert_eq!(lines, vec!["an", "e-mail", "address"]);
    }

    #[test]
    fn wrap_breaks_long_words_at_a_hyphen() {
        let lines = wrap("xyzzy-plugh", 8);
        assert_eq!(lines, vec!["xyzzy-", "plugh"]);

        let lines = wrap("abc-1234567", 8);
        assert_eq!(lines, vec!["abc-", "1234567"]);
    }

    #[test]
    fn wrap_counts_characters_not_bytes() {
        let lines = wrap("ééé ééé", 3);
        assert_eq!(lines, vec!["ééé", "ééé"]);
    }

    #[test]
    fn wrap_empty() {
        assert!(wrap("   ", 10).is_empty());
    }

    #[test]
    fn longest_allowed_picks_longest_fitting() {
        let choices = vec![
            "medium length".to_string(),
            "short".to_string(),
            "this one is far too long".to_string(),
        ];
        assert_eq!(longest_allowed(&choices, 20), "medium length");
        assert_eq!(longest_allowed(&choices, 100), "this one is far too long");
    }

    #[test]
    fn longest_allowed_is_strict() {
        let choices = vec!["12345".to_string(), "1234".to_string()];
        assert_eq!(longest_allowed(&choices, 5), "1234");
    }

    #[test]
    fn longest_allowed_falls_back_to_first() {
        let choices = vec!["way too long".to_string(), "also too long".to_string()];
        assert_eq!(longest_allowed(&choices, 3), "way too long");
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("0123456789abc", 10), "0123456...");
        assert_eq!(char_len(&truncate(&"x".repeat(500), 300)), 300);
    }
}
