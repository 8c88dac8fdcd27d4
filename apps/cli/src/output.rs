//! Output formatting utilities

use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Format a speed limit as human-readable
pub fn format_speed_limit(limit: Option<u64>) -> String {
    match limit {
        Some(bytes) if bytes > 0 => format!("{}/s", human_bytes::human_bytes(bytes as f64)),
        _ => "Unlimited".to_string(),
    }
}

/// Shorten long names for table cells
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short.jpg", 40), "short.jpg");
        assert_eq!(truncate("ééééééééééé.jpg", 8), "ééééé...");
    }

    #[test]
    fn speed_limit_display() {
        assert_eq!(format_speed_limit(None), "Unlimited");
        assert_eq!(format_speed_limit(Some(0)), "Unlimited");
        assert!(format_speed_limit(Some(2048)).ends_with("/s"));
    }
}
