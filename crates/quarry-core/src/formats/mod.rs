//! # Built-in Formats
//!
//! Materializers that ship with the crate. Rich formats (CSV, JSON, XML,
//! HTML) are registered by hosts through `MaterializerRegistry::register`.

mod archive_listing;
mod text;

pub use archive_listing::ArchiveListingMaterializer;
pub use text::TextMaterializer;
