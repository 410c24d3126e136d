//! Content normalization.
//!
//! - [`html_to_text`] - Feed HTML to plain markdown-like text
//! - [`ContentExtractor`] - Optional full-article text from an entry's link

mod extract;
mod html;

pub use extract::ContentExtractor;
pub use html::html_to_text;
