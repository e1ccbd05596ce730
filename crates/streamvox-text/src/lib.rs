//! Text-side processing for the StreamVox pipeline.

pub mod segmenter;

pub use segmenter::{SegmenterConfig, SentenceSegmenter, SENTENCE_TERMINATORS};
