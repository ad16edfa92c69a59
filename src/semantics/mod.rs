pub mod analyzer;
mod binder;
pub mod dependencies;
mod early_rewriter;
pub mod scope;
pub mod sem_table;
mod table_collector;
pub mod table_info;
pub mod table_set;
mod typer;

pub use analyzer::analyze;
pub use dependencies::*;
pub use scope::*;
pub use sem_table::*;
pub use table_info::*;
pub use table_set::*;
