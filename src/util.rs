/// Parse "true"/"false"/"1"/"0" from an owned String.
pub fn parse_bool_flag(s: String) -> Option<bool> {
    parse_bool_str(&s)
}

/// Parse "true"/"false"/"1"/"0" from a &str.
pub fn parse_bool_str(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read a numeric env override, clamped into `[min, max]`. Unset or unparseable
/// values fall back to `default`.
pub fn env_override_usize(key: &str, default: usize, min: usize, max: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .map(|v| v.clamp(min, max))
        .unwrap_or(default)
}

pub fn env_override_u64(key: &str, default: u64, min: u64, max: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|v| v.clamp(min, max))
        .unwrap_or(default)
}

/// Non-empty, trimmed env value.
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Keep the head and tail of `text` within `max_chars`, marking the elided middle.
pub fn truncate_for_history(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }

    let total = chars.len();
    let indicator = format!(
        "\n...[truncated {} chars]...\n",
        total.saturating_sub(max_chars)
    );
    let indicator_len = indicator.chars().count();
    if indicator_len >= max_chars {
        return chars.into_iter().take(max_chars).collect();
    }

    let available = max_chars - indicator_len;
    let keep_head = available / 2;
    let keep_tail = available - keep_head;

    let head: String = chars.iter().take(keep_head).collect();
    let tail: String = chars.iter().skip(total.saturating_sub(keep_tail)).collect();
    format!("{head}{indicator}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_helpers() {
        assert_eq!(parse_bool_str("true"), Some(true));
        assert_eq!(parse_bool_str("0"), Some(false));
        assert_eq!(parse_bool_flag("YES".to_string()), Some(true));
        assert_eq!(parse_bool_flag("off".to_string()), Some(false));
        assert_eq!(parse_bool_str("maybe"), None);
    }

    #[test]
    fn test_env_override_clamps_and_falls_back() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        std::env::set_var("VEX_TEST_OVERRIDE", "500");
        assert_eq!(env_override_usize("VEX_TEST_OVERRIDE", 10, 1, 64), 64);
        std::env::set_var("VEX_TEST_OVERRIDE", "not-a-number");
        assert_eq!(env_override_usize("VEX_TEST_OVERRIDE", 10, 1, 64), 10);
        std::env::set_var("VEX_TEST_OVERRIDE", "  ");
        assert_eq!(env_string("VEX_TEST_OVERRIDE"), None);
        std::env::remove_var("VEX_TEST_OVERRIDE");
        assert_eq!(env_override_u64("VEX_TEST_OVERRIDE", 7, 1, 9), 7);
    }

    #[test]
    fn test_truncate_for_history_keeps_head_and_tail() {
        let text = "a".repeat(50) + &"b".repeat(50);
        let truncated = truncate_for_history(&text, 60);
        assert!(truncated.chars().count() <= 60);
        assert!(truncated.starts_with('a'));
        assert!(truncated.ends_with('b'));
        assert!(truncated.contains("[truncated 40 chars]"));

        assert_eq!(truncate_for_history("short", 60), "short");
        assert_eq!(truncate_for_history("anything", 0), "");
    }
}
