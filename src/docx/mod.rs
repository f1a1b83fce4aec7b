pub mod document;
pub mod media;
pub mod package;
pub mod tree;
pub mod walk;
pub mod xml;
