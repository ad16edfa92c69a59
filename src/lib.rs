pub mod cli;
pub mod engine;
pub mod semantics;
pub mod sql;
pub mod utils;
pub mod vcursor;
pub mod vindexes;
pub mod vschema;

pub use engine::{ExecContext, Primitive};
pub use semantics::{analyze, SemTable};
pub use utils::config::EngineConfig;
pub use utils::error::{GateError, GateResult};
pub use utils::types::*;
pub use vcursor::{MockVcursor, Vcursor};
pub use vschema::VSchema;
