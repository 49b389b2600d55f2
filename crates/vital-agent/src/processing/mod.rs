//! Document preprocessing: path normalization, remote parsing, language
//! detection, segmentation, and reference filtering.

pub mod chunker;
pub mod language;
pub mod parser;
pub mod reference_filter;

pub use chunker::SegmentChunker;
pub use language::detect_language;
pub use parser::{DocumentPreprocessor, ParsingService, RemoteParsingService};
pub use reference_filter::is_reference;
