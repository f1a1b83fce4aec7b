pub mod config;
pub mod docx;
pub mod error;
pub mod fill;
pub mod form;

#[cfg(test)]
mod testutil;

pub use docx::document::{Document, Scope};
pub use error::{FillError, Result};
pub use fill::{
    fill_document_bytes, fill_document_with, insert_logo, normalize_key, FieldData, FillOptions,
    FillReport, LogoImage, LogoOptions, Mapping,
};
