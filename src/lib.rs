pub mod diagnostics;
pub mod language;
pub mod project;
