pub mod extractor;
pub mod prompt;
pub mod xml;

pub use extractor::{extract_function_calls, FunctionCall};
