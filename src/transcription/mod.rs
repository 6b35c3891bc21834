pub mod subtitles;
pub mod sync;
pub mod text;

pub use subtitles::SubtitleChunker;
pub use sync::{Released, SpokenWord, TranscriptDelta, TranscriptQueueItem, TranscriptSync};
