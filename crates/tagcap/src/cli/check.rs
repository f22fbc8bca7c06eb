//! The `tagcap check` command: offline coverage audit of existing captions.
//!
//! Recomputes coverage over every caption artifact of each image (the
//! accepted caption plus the audit-trail alternates, scored as one
//! aggregate) and reports which tags the collection keeps dropping.

use clap::Args;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tagcap_core::{artifacts, Config, CoverageValidator, TagSet, TaskDiscovery};

/// Arguments for the `check` command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Directory of images with caption artifacts
    #[arg(required = true)]
    pub input: PathBuf,

    /// Config file path (defaults to the platform config location)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print each image's missing tags, not just the aggregate
    #[arg(long)]
    pub detailed: bool,

    /// Report only images whose missing tags include this token
    #[arg(long)]
    pub word: Option<String>,
}

/// Execute the check command.
pub async fn execute(args: CheckArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let validator = CoverageValidator::new(config.coverage.clone());
    let discovery = TaskDiscovery::new(config.processing.extensions.clone());

    let images = discovery.discover(&args.input)?;
    let mut checked = 0usize;
    let mut total_missing = 0usize;
    let mut frequency: HashMap<String, usize> = HashMap::new();

    for image in &images {
        let captions = collect_captions(image)?;
        if captions.is_empty() {
            continue;
        }
        let tags_text = match std::fs::read_to_string(artifacts::tags_path(image)) {
            Ok(text) => text,
            Err(_) => {
                tracing::warn!("Skipping {:?}: tag file not found", image);
                continue;
            }
        };

        let missing = validator.coverage(&TagSet::parse(&tags_text), &captions);
        checked += 1;
        total_missing += missing.len();
        for tag in &missing {
            *frequency.entry(tag.to_string()).or_default() += 1;
        }

        let word_hit = args
            .word
            .as_deref()
            .is_some_and(|word| missing.iter().any(|t| t.as_str() == word));
        if word_hit || (args.detailed && !missing.is_empty()) {
            println!(
                "{}: missing [{}]",
                image.display(),
                missing
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    if checked == 0 {
        tracing::warn!("No captioned images found at {:?}", args.input);
        return Ok(());
    }

    println!("Checked {checked} image(s)");
    println!(
        "Average missing tags: {:.2}",
        total_missing as f64 / checked as f64
    );

    if !frequency.is_empty() {
        let mut ranked: Vec<(String, usize)> = frequency.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        println!("Most frequently missing:");
        for (tag, count) in ranked.iter().take(20) {
            println!("  {count:>5}  {tag}");
        }
    }

    Ok(())
}

/// All caption artifacts for an image: the accepted caption plus every
/// `_caption_<i>.txt` alternate. The error dump is not a caption.
fn collect_captions(image: &Path) -> anyhow::Result<Vec<String>> {
    let mut captions = Vec::new();

    let caption_path = artifacts::caption_path(image);
    if caption_path.exists() {
        captions.push(std::fs::read_to_string(&caption_path)?);
    }

    let stem = image
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let prefix = format!("{stem}_caption_");
    let Some(parent) = image.parent() else {
        return Ok(captions);
    };

    let mut alternates = Vec::new();
    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix)
            && name.ends_with(".txt")
            && !name.ends_with("_error.txt")
        {
            alternates.push(entry.path());
        }
    }
    alternates.sort();
    for path in alternates {
        captions.push(std::fs::read_to_string(&path)?);
    }

    Ok(captions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_captions_gathers_best_and_alternates() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("img.png");
        std::fs::write(&image, b"x").unwrap();
        std::fs::write(artifacts::caption_path(&image), "best").unwrap();
        std::fs::write(artifacts::alternate_path(&image, 0), "alt zero").unwrap();
        std::fs::write(artifacts::alternate_path(&image, 2), "alt two").unwrap();
        std::fs::write(artifacts::error_path(&image), "boom").unwrap();

        let captions = collect_captions(&image).unwrap();
        assert_eq!(captions, vec!["best", "alt zero", "alt two"]);
    }

    #[test]
    fn test_collect_captions_empty_without_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("img.png");
        std::fs::write(&image, b"x").unwrap();

        let captions = collect_captions(&image).unwrap();
        assert!(captions.is_empty());
    }

    #[test]
    fn test_collect_captions_ignores_other_images() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("img.png");
        let other = dir.path().join("img2.png");
        std::fs::write(&image, b"x").unwrap();
        std::fs::write(&other, b"x").unwrap();
        std::fs::write(artifacts::caption_path(&image), "mine").unwrap();
        std::fs::write(artifacts::alternate_path(&other, 0), "theirs").unwrap();

        let captions = collect_captions(&image).unwrap();
        assert_eq!(captions, vec!["mine"]);
    }
}
