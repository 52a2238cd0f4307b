// Track metadata for "now playing" events
pub mod extractor;

pub use extractor::{MediaInfo, MetadataExtractor};
