pub mod extractor;
pub mod table;

pub use extractor::AffixExtractor;
pub use table::{ModifierTable, SqliteModifierTable};
