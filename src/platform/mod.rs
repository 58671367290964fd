pub mod journal;
pub mod telegram;

use std::time::Duration;

use anyhow::{Context, Result};
use teloxide::Bot;

/// Telegram's hard limit for a single text message, in UTF-16 code units
pub const MAX_MESSAGE_UNITS: usize = 4096;

/// Bot whose HTTP timeout outlasts the 30s long-poll window
pub(crate) fn long_poll_bot(token: &str) -> Result<Bot> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(45))
        .build()
        .context("Failed to build Telegram HTTP client")?;
    Ok(Bot::with_client(token, client))
}

fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

/// Split text into chunks of at most `max_units` UTF-16 code units, preferring
/// to break after a newline, then after a space.
pub fn split_message(text: &str, max_units: usize) -> Vec<String> {
    if utf16_len(text) <= max_units {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        // Byte offset of the longest prefix within `max_units`
        let mut end = 0;
        let mut units = 0;
        for (idx, c) in rest.char_indices() {
            units += c.len_utf16();
            if units > max_units {
                break;
            }
            end = idx + c.len_utf8();
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }

        let actual_end = if end < rest.len() {
            rest[..end]
                .rfind('\n')
                .or_else(|| rest[..end].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(rest[..actual_end].to_string());
        rest = &rest[actual_end..];
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_is_untouched() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
    }

    #[test]
    fn test_prefers_newline_boundaries() {
        let chunks = split_message("aaaa\nbbbb\ncccc", 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "cccc"]);
    }

    #[test]
    fn test_hard_split_without_whitespace() {
        let chunks = split_message(&"x".repeat(25), 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| utf16_len(c) <= 10));
    }

    #[test]
    fn test_counts_utf16_units_not_bytes() {
        let text = "⚠️".repeat(3000);
        let chunks = split_message(&text, MAX_MESSAGE_UNITS);
        assert!(chunks.iter().all(|c| utf16_len(c) <= MAX_MESSAGE_UNITS));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_astral_emoji_count_double() {
        // Each 😀 is one char but two UTF-16 code units
        let text = "😀".repeat(3000);
        assert_eq!(text.chars().count(), 3000);

        let chunks = split_message(&text, MAX_MESSAGE_UNITS);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| utf16_len(c) <= MAX_MESSAGE_UNITS));
        assert_eq!(chunks.concat(), text);
    }
}
