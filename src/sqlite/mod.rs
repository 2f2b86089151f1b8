pub mod driver;
pub mod generator;
pub mod parser;
pub mod types;



pub use driver::SqliteDriver;
pub use generator::{SqliteConfig, SqliteGenerator};
pub use parser::Parser;
pub use types::{ColDef, ColType, Schema};
