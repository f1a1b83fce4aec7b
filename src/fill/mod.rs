//! Placeholder filling over an opened [`Document`](crate::docx::document::Document).

pub mod logo;
pub mod mapping;
pub mod placeholder;
pub mod substitute;

pub use logo::{insert_logo, LogoImage, LogoOptions, DEFAULT_LOGO_MARKER};
pub use mapping::{discover_labels, FieldData, Mapping};
pub use placeholder::normalize_key;
pub use substitute::{fill_document, fill_document_bytes, fill_document_with, FillOptions, FillReport};
