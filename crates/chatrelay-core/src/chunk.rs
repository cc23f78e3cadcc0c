//! Splitting long replies to fit Telegram's message size.

/// Maximum characters in one Telegram text message.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Split `text` into pieces of at most `limit` characters.
///
/// Breaks at the last newline inside the window, then the last space, and
/// only cuts mid-word when neither exists. Separators at a break are dropped.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        // Byte offset just past the `limit`-th char.
        let window_end = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..window_end];

        let (cut, skip) = match window.rfind('\n').or_else(|| window.rfind(' ')) {
            Some(0) | None => (window_end, 0),
            Some(i) => (i, 1),
        };

        chunks.push(rest[..cut].to_string());
        rest = &rest[cut + skip..];
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// First `max` characters of `text`, and whether anything was dropped.
pub fn truncate_chars(text: &str, max: usize) -> (&str, bool) {
    match text.char_indices().nth(max) {
        Some((i, _)) => (&text[..i], true),
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_single_chunk() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
        assert_eq!(split_message("", 10), vec![""]);
    }

    #[test]
    fn test_chunks_never_exceed_limit() {
        let text = "word ".repeat(3000);
        let chunks = split_message(&text, TELEGRAM_MESSAGE_LIMIT);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= TELEGRAM_MESSAGE_LIMIT);
        }
    }

    #[test]
    fn test_prefers_newline_then_space() {
        assert_eq!(split_message("aaa bbb\nccc", 9), vec!["aaa bbb", "ccc"]);
        assert_eq!(split_message("aaa bbb ccc", 9), vec!["aaa bbb", "ccc"]);
    }

    #[test]
    fn test_hard_cut_without_separators() {
        assert_eq!(split_message("abcdefgh", 3), vec!["abc", "def", "gh"]);
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "привет мир ".repeat(500);
        let chunks = split_message(&text, 100);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
        }
        assert_eq!(split_message("ééééé", 2), vec!["éé", "éé", "é"]);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), ("hello", false));
        assert_eq!(truncate_chars("héllo", 2), ("hé", true));
    }
}
