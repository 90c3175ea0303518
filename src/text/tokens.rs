//! Character-class token estimation.
//!
//! CJK text tokenises at roughly 1 token per 1.5 characters; everything else
//! at roughly 1 token per 4 characters. The estimate is used for prompt
//! budget enforcement only, so it errs on the conservative side.

/// CJK codepoint ranges counted at the denser rate.
fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF
    )
}

/// Estimate the token cost of `text`: ⌈CJK/1.5⌉ + ⌈non-CJK/4⌉.
pub fn estimate_tokens(text: &str) -> usize {
    let mut cjk = 0usize;
    let mut other = 0usize;
    for c in text.chars() {
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    div_ceil_ratio(cjk, 1.5) + div_ceil_ratio(other, 4.0)
}

fn div_ceil_ratio(count: usize, per_token: f64) -> usize {
    (count as f64 / per_token).ceil() as usize
}

/// Return a prefix of `text` whose estimate fits `max_tokens`, with a 5%
/// safety margin. Appends an ellipsis when anything was cut.
pub fn truncate(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }

    let budget = (max_tokens as f64 * 0.95) as usize;
    let mut cjk = 0usize;
    let mut other = 0usize;
    let mut end = 0usize;

    for (i, c) in text.char_indices() {
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
        if div_ceil_ratio(cjk, 1.5) + div_ceil_ratio(other, 4.0) > budget {
            break;
        }
        end = i + c.len_utf8();
    }

    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_ascii_rate() {
        // 8 ASCII chars → ⌈8/4⌉ = 2
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        // 9 chars → 3
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }

    #[test]
    fn test_cjk_rate() {
        // 3 CJK chars → ⌈3/1.5⌉ = 2
        assert_eq!(estimate_tokens("中文字"), 2);
    }

    #[test]
    fn test_mixed_text() {
        // "中文" = ⌈2/1.5⌉ = 2, "test" = ⌈4/4⌉ = 1
        assert_eq!(estimate_tokens("中文test"), 3);
    }

    #[test]
    fn test_truncate_noop_when_under_budget() {
        let text = "short text";
        assert_eq!(truncate(text, 100), text);
    }

    #[test]
    fn test_truncate_respects_budget() {
        let text = "word ".repeat(400); // ~500 tokens
        let cut = truncate(&text, 50);
        assert!(cut.ends_with('…'));
        // The prefix (without the ellipsis) fits the margin-adjusted budget
        let prefix = cut.trim_end_matches('…');
        assert!(estimate_tokens(prefix) <= 50);
        assert!(!prefix.is_empty());
    }

    #[test]
    fn test_truncate_cjk_on_char_boundary() {
        let text = "漢".repeat(300);
        let cut = truncate(&text, 20);
        assert!(cut.ends_with('…'));
        assert!(cut.chars().all(|c| c == '漢' || c == '…'));
    }
}
