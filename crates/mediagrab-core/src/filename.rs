//! Filename derivation and sanitization
//!
//! Turns discovered media URLs into safe, extension-bearing filenames.
//! Files without a recognizable extension get `.mp4` when the URL looks
//! like a video and `.jpg` otherwise, since the collections being
//! scraped are overwhelmingly images.

use url::Url;

/// Longest filename we will produce, in characters
pub const MAX_FILENAME_LEN: usize = 200;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "m4v", "mkv"];
const DEFAULT_VIDEO_EXTENSION: &str = "mp4";
const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

fn is_disallowed(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control()
}

/// Strip characters that are not allowed in filenames and clamp the length,
/// keeping the extension intact.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !is_disallowed(*c)).collect();
    let trimmed = cleaned.trim().trim_matches('.').trim();
    clamp_length(trimmed, MAX_FILENAME_LEN)
}

/// Sanitize a relative subfolder, dropping empty and traversal components
pub fn sanitize_subfolder(path: &str) -> Option<String> {
    let parts: Vec<String> = path
        .split(['/', '\\'])
        .map(sanitize_filename)
        .filter(|part| !part.is_empty() && part != "." && part != "..")
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Derive a filename from the last path segment of `url`.
///
/// Falls back to `fallback_stem` when the URL yields nothing usable.
pub fn derive_filename(url: &str, fallback_stem: &str) -> String {
    let segment = last_path_segment(url).unwrap_or_default();
    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);

    let mut name = sanitize_filename(&decoded);
    if name.is_empty() {
        name = sanitize_filename(fallback_stem);
    }
    if name.is_empty() {
        name = "media".to_string();
    }

    ensure_extension(&name, url)
}

/// Sanitize a caller-supplied filename, borrowing the URL's extension when
/// the name has none.
pub fn normalize_filename(name: &str, url: &str, fallback_stem: &str) -> String {
    let sanitized = sanitize_filename(name);
    if sanitized.is_empty() {
        return derive_filename(url, fallback_stem);
    }
    if extension(&sanitized).is_some() {
        return sanitized;
    }

    let from_url = last_path_segment(url)
        .and_then(|segment| extension(&segment).map(str::to_lowercase));
    match from_url {
        Some(ext) => clamp_length(&format!("{sanitized}.{ext}"), MAX_FILENAME_LEN),
        None => ensure_extension(&sanitized, url),
    }
}

/// The extension of `name` without the dot, if it has a plausible one
pub fn extension(name: &str) -> Option<&str> {
    let dot = name.rfind('.')?;
    if dot == 0 {
        return None;
    }
    let ext = &name[dot + 1..];
    let plausible = (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric());
    plausible.then_some(ext)
}

/// Whether the URL carries a hint that it points to a video
pub fn has_video_signal(url: &str) -> bool {
    let lower = url.to_lowercase();

    if let Ok(parsed) = Url::parse(&lower) {
        let video_segment = parsed
            .path_segments()
            .map(|mut segments| segments.any(|s| s == "video" || s == "videos"))
            .unwrap_or(false);
        if video_segment {
            return true;
        }

        let video_query = parsed.query_pairs().any(|(_, value)| {
            value.starts_with("video/") || VIDEO_EXTENSIONS.contains(&&*value)
        });
        if video_query {
            return true;
        }
    }

    VIDEO_EXTENSIONS
        .iter()
        .any(|ext| lower.contains(&format!(".{ext}")))
}

fn ensure_extension(name: &str, url: &str) -> String {
    if extension(name).is_some() {
        return name.to_string();
    }
    let ext = if has_video_signal(url) {
        DEFAULT_VIDEO_EXTENSION
    } else {
        DEFAULT_IMAGE_EXTENSION
    };
    clamp_length(&format!("{name}.{ext}"), MAX_FILENAME_LEN)
}

fn last_path_segment(url: &str) -> Option<String> {
    match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()?
            .filter(|s| !s.is_empty())
            .last()
            .map(str::to_string),
        Err(_) => {
            let path = url.split(['?', '#']).next().unwrap_or("");
            path.rsplit('/')
                .find(|s| !s.is_empty())
                .map(str::to_string)
        }
    }
}

fn clamp_length(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }

    match extension(name) {
        Some(ext) => {
            let ext_len = ext.chars().count() + 1;
            let stem_len = name.len() - ext.len() - 1;
            let stem: String = name[..stem_len].chars().take(max - ext_len).collect();
            format!("{}.{}", stem.trim_end(), ext)
        }
        None => name.chars().take(max).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_image_extension_and_drops_query() {
        assert_eq!(derive_filename("https://cdn.example/abc.jpg?w=200", "x"), "abc.jpg");
    }

    #[test]
    fn preserves_webm() {
        assert_eq!(derive_filename("https://cdn.example/media/clip.webm", "x"), "clip.webm");
    }

    #[test]
    fn appends_jpg_without_extension_or_video_signal() {
        assert_eq!(derive_filename("https://cdn.example/media/abc123", "x"), "abc123.jpg");
    }

    #[test]
    fn appends_mp4_for_video_urls() {
        assert_eq!(derive_filename("https://cdn.example/video/abc123", "x"), "abc123.mp4");
        assert_eq!(derive_filename("https://cdn.example/m/abc123?format=mp4", "x"), "abc123.mp4");
        assert_eq!(derive_filename("https://cdn.example/m/abc123?type=video/webm", "x"), "abc123.mp4");
    }

    #[test]
    fn decodes_and_strips_disallowed_characters() {
        assert_eq!(
            derive_filename("https://cdn.example/a%3Ab%7Cc%3F.png", "x"),
            "abc.png"
        );
        assert_eq!(sanitize_filename("  what*is<this>?.gif "), "whatisthis.gif");
        assert_eq!(sanitize_filename("tab\there.png"), "tabhere.png");
    }

    #[test]
    fn falls_back_to_stem_when_url_has_no_segment() {
        assert_eq!(derive_filename("https://cdn.example/", "1f2e3d4c"), "1f2e3d4c.jpg");
        assert_eq!(derive_filename("https://cdn.example/%3F%3F", "1f2e3d4c"), "1f2e3d4c.jpg");
    }

    #[test]
    fn clamps_long_names_keeping_extension() {
        let long = format!("{}.png", "a".repeat(300));
        let clamped = sanitize_filename(&long);
        assert_eq!(clamped.chars().count(), MAX_FILENAME_LEN);
        assert!(clamped.ends_with(".png"));

        let derived = derive_filename(&format!("https://cdn.example/{}", "b".repeat(250)), "x");
        assert_eq!(derived.chars().count(), MAX_FILENAME_LEN);
        assert!(derived.ends_with(".jpg"));
    }

    #[test]
    fn explicit_names_borrow_url_extension() {
        assert_eq!(normalize_filename("cover", "https://x/a/b.PNG", "x"), "cover.png");
        assert_eq!(normalize_filename("cover.gif", "https://x/a/b.png", "x"), "cover.gif");
        assert_eq!(normalize_filename("cover", "https://x/videos/b", "x"), "cover.mp4");
        assert_eq!(normalize_filename("???", "https://x/a/b.png", "x"), "b.png");
    }

    #[test]
    fn subfolders_lose_traversal_components() {
        assert_eq!(sanitize_subfolder("../album/./2024"), Some("album/2024".to_string()));
        assert_eq!(sanitize_subfolder("a\\b:c"), Some("a/bc".to_string()));
        assert_eq!(sanitize_subfolder("/.."), None);
    }

    #[test]
    fn extension_requires_short_alphanumeric_suffix() {
        assert_eq!(extension("a.jpeg"), Some("jpeg"));
        assert_eq!(extension(".hidden"), None);
        assert_eq!(extension("a.toolongext"), None);
        assert_eq!(extension("a.b-c"), None);
    }
}
