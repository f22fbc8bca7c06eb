//! Per-image caption refinement control loop.
//!
//! One image moves through generate -> score -> select -> refine, bounded
//! by a retry budget. Each attempt produces `repeat_count` candidates; the
//! best one seeds the next attempt together with the tags it dropped, so
//! the service is told explicitly what to fix. The best-so-far never gets
//! worse: artifacts are rewritten only on strict score improvement.

use crate::config::{ProcessingConfig, ServiceConfig};
use crate::coverage::CoverageValidator;
use crate::error::CaptionError;
use crate::media::{self, ImageInput};
use crate::pool::ResourcePool;
use crate::request::{PromptBuilder, RefinementSeed, Templates};
use crate::service::CaptionService;
use crate::types::{artifacts, CancelFlag, Candidate, TagSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Knobs for the refinement loop.
#[derive(Debug, Clone)]
pub struct RefineOptions {
    /// Candidates generated per attempt
    pub repeat_count: usize,

    /// Additional attempts after the first
    pub max_retries: u32,

    /// Fixed backoff after a transient failure
    pub backoff: Duration,

    /// Whether an existing caption is refined rather than skipped
    pub refine_existing: bool,

    /// Longest image edge sent to the service
    pub max_image_edge: u32,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            repeat_count: 3,
            max_retries: 5,
            backoff: Duration::from_secs(2),
            refine_existing: true,
            max_image_edge: 768,
        }
    }
}

impl RefineOptions {
    pub fn from_config(processing: &ProcessingConfig, service: &ServiceConfig) -> Self {
        Self {
            repeat_count: processing.repeat_count,
            max_retries: processing.max_retries,
            backoff: processing.backoff(),
            refine_existing: processing.refine,
            max_image_edge: service.max_image_edge,
        }
    }
}

/// Terminal state of one image's refinement loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefineOutcome {
    /// Every tag covered; artifacts written
    Accepted { score: usize, attempts: u32 },

    /// Retry budget spent with a nonzero score; best-so-far persisted anyway
    Exhausted { score: usize, attempts: u32 },
}

/// Drives the generate/score/select/refine loop for single images.
pub struct RefinementController {
    service: Arc<dyn CaptionService>,
    pool: Arc<ResourcePool>,
    validator: CoverageValidator,
    builder: PromptBuilder,
    options: RefineOptions,
}

impl RefinementController {
    /// Build the controller, preparing the few-shot example image once.
    pub fn new(
        service: Arc<dyn CaptionService>,
        pool: Arc<ResourcePool>,
        validator: CoverageValidator,
        templates: Templates,
        options: RefineOptions,
    ) -> Result<Self, CaptionError> {
        let example_image = templates
            .example_image
            .as_deref()
            .map(|path| media::prepare_image(path, options.max_image_edge))
            .transpose()?;
        Ok(Self {
            service,
            pool,
            validator,
            builder: PromptBuilder::new(templates, example_image),
            options,
        })
    }

    /// Run the full loop for one image and persist its artifacts.
    ///
    /// Attempts are strictly sequential: attempt N+1 seeds from attempt N's
    /// best, so there is nothing to parallelize within one image.
    pub async fn refine_image(
        &self,
        image: &Path,
        cancel: &CancelFlag,
    ) -> Result<RefineOutcome, CaptionError> {
        let tags_path = artifacts::tags_path(image);
        let tags_text = match std::fs::read_to_string(&tags_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CaptionError::MissingTags {
                    path: image.to_path_buf(),
                });
            }
            Err(e) => return Err(CaptionError::io(&tags_path, e)),
        };

        let caption_path = artifacts::caption_path(image);
        let existing = if caption_path.exists() {
            if !self.options.refine_existing {
                return Err(CaptionError::AlreadySatisfied {
                    path: image.to_path_buf(),
                });
            }
            Some(
                std::fs::read_to_string(&caption_path)
                    .map_err(|e| CaptionError::io(&caption_path, e))?,
            )
        } else {
            None
        };

        let tag_set = TagSet::parse(&tags_text);
        let image_input = media::prepare_image(image, self.options.max_image_edge)?;

        let mut best: Option<Candidate> = existing.map(|text| {
            let missing = self.validator.coverage(&tag_set, std::slice::from_ref(&text));
            Candidate { text, missing }
        });
        if let Some(candidate) = &best {
            if candidate.is_perfect() {
                tracing::debug!("Existing caption for {:?} already covers all tags", image);
                return Ok(RefineOutcome::Accepted {
                    score: 0,
                    attempts: 0,
                });
            }
        }

        for attempt in 0..=self.options.max_retries {
            if cancel.is_cancelled() {
                return Err(CaptionError::Cancelled);
            }

            let outcome = self
                .run_attempt(&tags_text, &tag_set, &image_input, best.as_ref(), cancel)
                .await;

            match outcome {
                Ok(candidates) => {
                    let selected = select_best(&candidates);
                    let attempt_best = &candidates[selected];
                    let improved = best
                        .as_ref()
                        .map_or(true, |current| attempt_best.score() < current.score());
                    if improved {
                        best = Some(attempt_best.clone());
                        self.persist(image, &candidates, selected).await?;
                    }

                    // `best` is always Some past this point.
                    let score = best.as_ref().map(Candidate::score).unwrap_or_default();
                    if score == 0 {
                        return Ok(RefineOutcome::Accepted {
                            score,
                            attempts: attempt + 1,
                        });
                    }
                    if attempt == self.options.max_retries {
                        tracing::warn!(
                            "Retry budget spent for {:?}, keeping best with {} missing tags",
                            image,
                            score
                        );
                        return Ok(RefineOutcome::Exhausted {
                            score,
                            attempts: attempt + 1,
                        });
                    }
                }
                Err(CaptionError::Cancelled) => return Err(CaptionError::Cancelled),
                Err(e @ CaptionError::ResourceExhausted) => return Err(e),
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        "Attempt {}/{} for {:?} failed: {e}",
                        attempt + 1,
                        self.options.max_retries + 1,
                        image
                    );
                    if attempt == self.options.max_retries {
                        if let Some(candidate) = &best {
                            // A usable result from an earlier attempt beats
                            // surfacing the failure.
                            self.persist(image, std::slice::from_ref(candidate), 0)
                                .await?;
                            return Ok(RefineOutcome::Exhausted {
                                score: candidate.score(),
                                attempts: attempt + 1,
                            });
                        }
                        self.dump_error(image, &e).await;
                        return Err(e);
                    }
                    tokio::time::sleep(self.options.backoff).await;
                }
                Err(e) => {
                    self.dump_error(image, &e).await;
                    return Err(e);
                }
            }
        }

        // Every branch of the final attempt returns above.
        Err(CaptionError::EmptyCandidates)
    }

    /// Generate up to `repeat_count` candidates, rotating credentials.
    ///
    /// Within the attempt each successful candidate becomes the seed for
    /// the next call; a perfect candidate stops the attempt early.
    async fn run_attempt(
        &self,
        tags_text: &str,
        tag_set: &TagSet,
        image_input: &ImageInput,
        previous_best: Option<&Candidate>,
        cancel: &CancelFlag,
    ) -> Result<Vec<Candidate>, CaptionError> {
        let mut candidates: Vec<Candidate> = Vec::with_capacity(self.options.repeat_count);
        let mut seed = previous_best.cloned();
        let mut last_error: Option<CaptionError> = None;

        for _ in 0..self.options.repeat_count {
            if cancel.is_cancelled() {
                return Err(CaptionError::Cancelled);
            }

            let lease = self.pool.acquire(cancel).await?;
            let refinement = seed.as_ref().map(|candidate| RefinementSeed {
                previous: candidate.text.clone(),
                missing: candidate.missing.clone(),
            });
            let parts = self
                .builder
                .build(tags_text, image_input.clone(), refinement.as_ref());

            let call = tokio::time::timeout(
                self.service.timeout(),
                self.service.generate(&parts, lease.credential()),
            )
            .await;

            match call {
                Ok(Ok(text)) => {
                    let missing = self.validator.coverage(tag_set, std::slice::from_ref(&text));
                    let candidate = Candidate { text, missing };
                    let perfect = candidate.is_perfect();
                    seed = Some(candidate.clone());
                    candidates.push(candidate);
                    if perfect {
                        break;
                    }
                }
                Ok(Err(e @ CaptionError::RateLimited { .. })) => {
                    lease.penalize();
                    last_error = Some(e);
                }
                Ok(Err(e)) if e.is_transient() => {
                    tracing::warn!("Candidate call failed: {e}");
                    last_error = Some(e);
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    last_error = Some(CaptionError::Transient {
                        message: format!("Timeout after {:?}", self.service.timeout()),
                        status_code: None,
                    });
                }
            }
        }

        if candidates.is_empty() {
            if let Some(e) = last_error {
                tracing::debug!("Attempt produced no candidates, last error: {e}");
            }
            return Err(CaptionError::EmptyCandidates);
        }
        Ok(candidates)
    }

    /// Write the selected caption and the non-selected candidates of the
    /// winning attempt.
    async fn persist(
        &self,
        image: &Path,
        candidates: &[Candidate],
        selected: usize,
    ) -> Result<(), CaptionError> {
        let caption_path = artifacts::caption_path(image);
        tokio::fs::write(&caption_path, &candidates[selected].text)
            .await
            .map_err(|e| CaptionError::io(&caption_path, e))?;

        for (index, candidate) in candidates.iter().enumerate() {
            if index == selected {
                continue;
            }
            let path = artifacts::alternate_path(image, index);
            tokio::fs::write(&path, &candidate.text)
                .await
                .map_err(|e| CaptionError::io(&path, e))?;
        }
        Ok(())
    }

    /// Best-effort diagnostic dump for fatal failures.
    async fn dump_error(&self, image: &Path, error: &CaptionError) {
        let path = artifacts::error_path(image);
        let body = format!(
            "image: {}\nservice: {}\nerror: {error}\n",
            image.display(),
            self.service.name()
        );
        if let Err(e) = tokio::fs::write(&path, body).await {
            tracing::warn!("Failed to write error dump {:?}: {e}", path);
        }
    }
}

/// Index of the candidate with the strictly lowest missing-tag count;
/// ties go to the first occurrence.
fn select_best(candidates: &[Candidate]) -> usize {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(index, candidate)| (candidate.score(), *index))
        .map(|(index, _)| index)
        .unwrap_or(0)
}
