//! Request assembly for the captioning service.
//!
//! A request is an ordered sequence of text and image parts: instruction,
//! one few-shot example pair, the target tags, the target image, and a
//! trailing cue. Refinement turns append the previous best caption together
//! with the tags it dropped.

use crate::media::ImageInput;
use crate::types::Tag;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One element of the ordered request sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPart {
    Text(String),
    Image(ImageInput),
}

/// Prompt templates for request assembly.
///
/// Defaults are embedded; any field can be overridden from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Templates {
    /// Leading instruction sent with every request
    pub instruction: String,

    /// Example tag block for the few-shot pair
    pub example_tags: String,

    /// Example caption paired with the example tags
    pub example_caption: String,

    /// Optional image file shown between the example tags and caption
    pub example_image: Option<PathBuf>,

    /// Cue line that precedes the generated caption
    pub cue: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            instruction: DEFAULT_INSTRUCTION.to_string(),
            example_tags: DEFAULT_EXAMPLE_TAGS.to_string(),
            example_caption: DEFAULT_EXAMPLE_CAPTION.to_string(),
            example_image: None,
            cue: DEFAULT_CUE.to_string(),
        }
    }
}

const DEFAULT_INSTRUCTION: &str = r#"Analyze the image in a comprehensive and detailed manner.
The response will be used for constructing a dataset in academic research,
so it must mention everything necessary to explain the image, including
every given tag. Do not drop given tags.

Use and reorder the given tags to construct natural sentences. Do not
describe subjects or features you cannot recognize in the image.

The response must include ALL given tags.
"#;

const DEFAULT_EXAMPLE_TAGS: &str = r#"TAG:
general tags: 1girl solo long_hair blue_eyes looking_at_viewer smile outdoors sky cloud day standing
rating: general
"#;

const DEFAULT_EXAMPLE_CAPTION: &str = r#"RESPONSE INCLUDES ALL GIVEN TAGS:
A 1girl solo stands outdoors during the day, her long_hair moving slightly
as she is looking_at_viewer with a smile. Her blue_eyes catch the light
under a wide sky dotted with cloud. She is standing with relaxed posture.
The rating is general.
"#;

const DEFAULT_CUE: &str = "RESPONSE INCLUDES ALL GIVEN TAGS:";

/// Previous best caption and the tags it dropped, fed back to the service.
#[derive(Debug, Clone, PartialEq)]
pub struct RefinementSeed {
    pub previous: String,
    pub missing: Vec<Tag>,
}

/// Assembles the ordered part sequence for one generation call.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    templates: Templates,
    example_image: Option<ImageInput>,
}

impl PromptBuilder {
    pub fn new(templates: Templates, example_image: Option<ImageInput>) -> Self {
        Self {
            templates,
            example_image,
        }
    }

    /// Build the part sequence for one call.
    ///
    /// `tags_text` is the raw tag-file contents for the target image;
    /// the service sees them verbatim, normalization only affects scoring.
    pub fn build(
        &self,
        tags_text: &str,
        image: ImageInput,
        seed: Option<&RefinementSeed>,
    ) -> Vec<RequestPart> {
        let mut parts = vec![
            RequestPart::Text(self.templates.instruction.clone()),
            RequestPart::Text(self.templates.example_tags.clone()),
        ];
        if let Some(example) = &self.example_image {
            parts.push(RequestPart::Image(example.clone()));
        }
        parts.push(RequestPart::Text(self.templates.example_caption.clone()));
        parts.push(RequestPart::Text(tags_text.to_string()));
        parts.push(RequestPart::Image(image));
        parts.push(RequestPart::Text(self.templates.cue.clone()));
        if let Some(seed) = seed {
            parts.push(RequestPart::Text(format_missing_tags(
                &seed.previous,
                &seed.missing,
            )));
        }
        merge_parts(parts)
    }
}

/// Refinement block appended after the cue: the previous response and the
/// tags it failed to include.
fn format_missing_tags(previous: &str, missing: &[Tag]) -> String {
    let missing_list = missing
        .iter()
        .map(Tag::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "PREVIOUS_RESPONSE: {previous}\n\
         MISSING_TAGS: {missing_list}\n\
         These were the tags which were not included in the PREVIOUS_RESPONSE, \
         you MUST include these MISSING_TAGS in the REFINED RESPONSE.\n\n\
         REFINED RESPONSE:\n"
    )
}

/// Fold adjacent text parts into one so the request stays a single turn.
///
/// A newline is inserted between joined texts unless one side already
/// provides it.
pub fn merge_parts(parts: Vec<RequestPart>) -> Vec<RequestPart> {
    let mut merged: Vec<RequestPart> = Vec::with_capacity(parts.len());
    for part in parts {
        match (merged.last_mut(), part) {
            (Some(RequestPart::Text(previous)), RequestPart::Text(next)) => {
                if !previous.is_empty()
                    && !previous.ends_with('\n')
                    && !next.is_empty()
                    && !next.starts_with('\n')
                {
                    previous.push('\n');
                }
                previous.push_str(&next);
            }
            (_, part) => merged.push(part),
        }
    }
    merged
}
