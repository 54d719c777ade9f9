mod dictionary;
mod matrix;

pub use dictionary::parse_dictionary_xml;
pub use matrix::{parse_matrix_json, parse_registry_json};
