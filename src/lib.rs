pub mod change_detector;
pub mod config;
pub mod deck;
pub mod error;
pub mod extractor;
pub mod fingerprint;
pub mod frame;
pub mod frame_source;
pub mod metadata;
pub mod pptx;
pub mod prefetch;
pub mod processor;
pub mod video_source;

#[cfg(test)]
mod test_support;

pub use change_detector::{ChangeDetector, Decision};
pub use config::{ConfigLayer, ConfigLoader};
pub use deck::{CanvasSpec, Deck, DeckAssembler, DeckEncoder, Placement, ScalePolicy};
pub use error::{Error, Result};
pub use extractor::{
    CancelToken, ExtractionResult, KeyframeExtractor, PartialExtraction, Progress, SlideCandidate,
};
pub use fingerprint::{DctHasher, Fingerprint, Fingerprinter};
pub use frame::Frame;
pub use frame_source::{FrameSource, MemorySource};
pub use metadata::{DeckManifest, SlideMetadata};
pub use pptx::{PptxReader, PptxWriter};
pub use prefetch::PrefetchSource;
pub use processor::{process_source, process_video, OutputOptions, ProcessConfig, ProcessOutput};
pub use video_source::FfmpegSource;
