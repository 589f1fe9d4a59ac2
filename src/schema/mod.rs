//! Schema module - Card, constraint, configuration and statistics types.

mod archetype;
mod card;
mod constraints;
mod discovery;
mod genetic;
mod score;

pub use archetype::*;
pub use card::*;
pub use constraints::*;
pub use discovery::*;
pub use genetic::*;
pub use score::*;
