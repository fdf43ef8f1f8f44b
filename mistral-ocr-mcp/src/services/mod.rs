mod extraction;

pub use extraction::{ExtractionService, MarkdownWithImages};
