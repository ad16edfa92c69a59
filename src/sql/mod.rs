pub mod ast;
pub mod bind;
pub mod parser;

pub use ast::*;
pub use bind::*;
pub use parser::*;
