//! Shared utilities

use std::path::Path;

use anyhow::{Context, bail};
use nibble_pipeline::{ChatHistory, ChatRole};

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// Mime type for an image path, judged by extension
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Read an image file and work out its mime type
pub async fn load_image(path: &Path) -> anyhow::Result<(Vec<u8>, &'static str)> {
    let Some(mime) = mime_for_path(path) else {
        bail!(
            "{}: unsupported image type (use .jpg, .jpeg, .png or .webp)",
            path.display()
        );
    };
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok((bytes, mime))
}

/// Render the chat transcript for the terminal
pub fn render_history(history: &ChatHistory) -> String {
    if history.is_empty() {
        return "No history yet.".to_string();
    }

    history
        .iter()
        .map(|entry| {
            let time = entry.timestamp.format("%H:%M:%S");
            match entry.role {
                ChatRole::SystemLabel => format!("[{}] == {} ==", time, entry.text),
                ChatRole::UserQuestion => format!("[{}] you: {}", time, entry.text),
                ChatRole::AssistantAnswer => format!("[{}] nibble:\n{}", time, entry.text),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé...");
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("a/b/lunch.JPG")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("x.png")), Some("image/png"));
        assert_eq!(mime_for_path(Path::new("x.webp")), Some("image/webp"));
        assert_eq!(mime_for_path(Path::new("x.gif")), None);
        assert_eq!(mime_for_path(Path::new("noext")), None);
    }

    #[tokio::test]
    async fn test_load_image_rejects_unknown_extension() {
        let err = load_image(Path::new("menu.pdf")).await.unwrap_err();
        assert!(err.to_string().contains("unsupported image type"));
    }

    #[test]
    fn test_render_history() {
        let mut history = ChatHistory::new();
        assert_eq!(render_history(&history), "No history yet.");

        history.push(ChatRole::SystemLabel, "Nutrition Analysis");
        history.push(ChatRole::AssistantAnswer, "- apple");
        history.push(ChatRole::UserQuestion, "protein?");
        let rendered = render_history(&history);
        assert!(rendered.contains("== Nutrition Analysis =="));
        assert!(rendered.contains("nibble:\n- apple"));
        assert!(rendered.contains("you: protein?"));
    }
}
