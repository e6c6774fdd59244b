pub mod fallback;
pub mod flatten;
pub mod parallel;
pub mod text_source;
pub mod types;

pub use parallel::*;
pub use text_source::*;
pub use types::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Text encoding error: {0}")]
    EncodingError(String),

    #[error("Document has no pages")]
    EmptyDocument,

    #[error("Page {page} out of range: document has {page_count} pages")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("Tabular source has no header row")]
    MissingHeaderRow,
}
