//! Task discovery: images from a directory, a list file, or a single path.

use crate::error::TagcapError;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Enumerates image tasks for the dispatcher.
pub struct TaskDiscovery {
    extensions: Vec<String>,
}

impl TaskDiscovery {
    pub fn new(extensions: Vec<String>) -> Self {
        Self { extensions }
    }

    /// Enumerate image tasks at `input`.
    ///
    /// A directory is walked recursively for supported extensions; a `.txt`
    /// file is read as one image path per line; a `.json` file as an array
    /// of paths; anything else is treated as a single image. Tag and
    /// metadata files are never tasks themselves.
    pub fn discover(&self, input: &Path) -> Result<Vec<PathBuf>, TagcapError> {
        if input.is_file() {
            return match input.extension().and_then(|e| e.to_str()) {
                Some("txt") => {
                    let content = std::fs::read_to_string(input)?;
                    Ok(content
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(PathBuf::from)
                        .filter(|path| !is_metadata(path))
                        .collect())
                }
                Some("json") => {
                    let content = std::fs::read_to_string(input)?;
                    let paths: Vec<PathBuf> = serde_json::from_str(&content)?;
                    Ok(paths.into_iter().filter(|path| !is_metadata(path)).collect())
                }
                _ => Ok(vec![input.to_path_buf()]),
            };
        }

        let mut files: Vec<PathBuf> = WalkDir::new(input)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file() && self.is_supported(entry.path()))
            .map(|entry| entry.path().to_path_buf())
            .collect();

        // Sort by path for deterministic ordering
        files.sort();
        Ok(files)
    }

    /// Check if a file has a supported image extension.
    fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext_lower = ext.to_lowercase();
                self.extensions
                    .iter()
                    .any(|supported| supported.to_lowercase() == ext_lower)
            })
            .unwrap_or(false)
    }
}

/// Tag files and metadata files live next to images but are never tasks.
fn is_metadata(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("txt") | Some("json")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery() -> TaskDiscovery {
        TaskDiscovery::new(vec!["png".to_string(), "jpg".to_string()])
    }

    #[test]
    fn test_directory_walk_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"x").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"tags").unwrap();
        std::fs::write(dir.path().join("notes.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("c.webp"), b"x").unwrap();

        let tasks = discovery().discover(dir.path()).unwrap();
        let names: Vec<String> = tasks
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.png"]);
    }

    #[test]
    fn test_extension_matching_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("upper.PNG"), b"x").unwrap();

        let tasks = discovery().discover(dir.path()).unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_list_file_reads_paths() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("batch.txt");
        std::fs::write(&list, "/data/a.png\n\n/data/b.png\n/data/b.txt\n").unwrap();

        let tasks = discovery().discover(&list).unwrap();
        assert_eq!(
            tasks,
            vec![PathBuf::from("/data/a.png"), PathBuf::from("/data/b.png")]
        );
    }

    #[test]
    fn test_json_file_reads_paths() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("batch.json");
        std::fs::write(&list, r#"["/data/a.png", "/data/skip.json"]"#).unwrap();

        let tasks = discovery().discover(&list).unwrap();
        assert_eq!(tasks, vec![PathBuf::from("/data/a.png")]);
    }

    #[test]
    fn test_single_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("one.png");
        std::fs::write(&image, b"x").unwrap();

        let tasks = discovery().discover(&image).unwrap();
        assert_eq!(tasks, vec![image]);
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = discovery().discover(dir.path()).unwrap();
        assert!(tasks.is_empty());
    }
}
