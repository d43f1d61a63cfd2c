//! Front ends that turn raw text into trees.
//!
//! Two modes: well-formed (optionally error-recovering) XML, and lenient
//! HTML that never fails on malformed markup. Both build directly into a
//! [`crate::tree::Tree`] with a document node at the root.

pub mod html;
pub mod xml;

pub use xml::ParseOptions;
