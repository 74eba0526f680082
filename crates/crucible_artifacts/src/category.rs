//! Artifact categorization by path and extension.

use std::path::Path;

/// Infer the category for a file path. Rules are checked in order; the
/// first match wins. A file with no extension lands in `other`.
pub fn categorize(path: &Path) -> &'static str {
    let path_str = path.to_string_lossy().to_lowercase();
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    // Renderer output is categorized before anything else so that e.g.
    // media/videos/scene.mp4 counts as animation output, not video.
    if path_str.contains("manim") || path_str.contains("media") {
        return "manim";
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let has_temp_component = path.components().any(|c| {
        matches!(
            c.as_os_str().to_string_lossy().to_lowercase().as_str(),
            "temp" | "cache" | "tmp"
        )
    });
    if suffix == ".tmp"
        || suffix == ".cache"
        || file_name.starts_with("temp")
        || file_name.starts_with("cache")
        || has_temp_component
    {
        return "temporary";
    }

    match suffix.as_str() {
        ".mp4" | ".avi" | ".mov" | ".mkv" | ".webm" | ".gif" => "video",
        ".png" | ".jpg" | ".jpeg" | ".bmp" | ".svg" | ".tiff" => "image",
        ".html" | ".css" | ".js" => "web",
        ".pdf" | ".doc" | ".docx" | ".txt" | ".md" | ".rtf" => "document",
        ".py" | ".cpp" | ".java" | ".c" | ".h" | ".rs" | ".go" => "code",
        ".csv" | ".xlsx" | ".json" | ".xml" | ".yaml" | ".yml" => "data",
        ".zip" | ".tar" | ".gz" | ".rar" | ".7z" => "archive",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cat(p: &str) -> &'static str {
        categorize(&PathBuf::from(p))
    }

    #[test]
    fn test_manim_wins_over_extension() {
        assert_eq!(cat("media/videos/scene.mp4"), "manim");
        assert_eq!(cat("out/manim/frame.png"), "manim");
    }

    #[test]
    fn test_temporary_rules() {
        assert_eq!(cat("scratch.tmp"), "temporary");
        assert_eq!(cat("tmp/data.csv"), "temporary");
        assert_eq!(cat("cache_blob"), "temporary");
    }

    #[test]
    fn test_extension_buckets() {
        assert_eq!(cat("movie.mp4"), "video");
        assert_eq!(cat("photo.JPG"), "image");
        assert_eq!(cat("index.html"), "web");
        assert_eq!(cat("notes.txt"), "document");
        assert_eq!(cat("tool.rs"), "code");
        assert_eq!(cat("table.csv"), "data");
        assert_eq!(cat("bundle.zip"), "archive");
    }

    #[test]
    fn test_no_extension_is_other() {
        assert_eq!(cat("README"), "other");
        assert_eq!(cat("Makefile.custom"), "other");
    }
}
