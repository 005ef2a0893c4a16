//! Type expression resolution and structural subtyping.

mod resolver;
mod subtype;
mod trace;

pub use resolver::{Resolver, TypeFrame};
pub use subtype::{SubtypeChecker, SubtypeError, TerminatorParams};
pub use trace::{Terminator, Trace};
