pub mod analyzer;
pub mod ast;
pub mod errors;
pub mod scope;
pub mod span;
pub mod types;
pub mod typesystem;
