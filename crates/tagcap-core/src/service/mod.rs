//! Remote captioning service integration.
//!
//! Provides the `CaptionService` trait consumed by the refinement
//! controller and the Gemini-style `generateContent` backend.

pub(crate) mod gemini;
pub(crate) mod provider;

pub use gemini::GeminiService;
pub use provider::CaptionService;
