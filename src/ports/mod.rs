pub mod catalog;
pub mod source_library;
