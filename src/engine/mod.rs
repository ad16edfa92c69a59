// Operator contract, the operators and their shared helpers
pub mod comparator;
pub mod concatenate;
pub mod dml;
pub mod insert;
pub mod limit;
pub mod memory_sort;
pub mod multi_query;
pub mod ordered_aggregate;
pub mod primitive;
pub mod projection;
pub mod pullout_subquery;
pub mod route;
pub mod send;
pub mod set;
pub mod shards;
pub mod single_row;
pub mod streams;
pub mod subquery;

pub use comparator::*;
pub use concatenate::*;
pub use dml::*;
pub use insert::*;
pub use limit::*;
pub use memory_sort::*;
pub use multi_query::*;
pub use ordered_aggregate::*;
pub use primitive::*;
pub use projection::*;
pub use pullout_subquery::*;
pub use route::*;
pub use send::*;
pub use set::*;
pub use shards::*;
pub use single_row::*;
pub use streams::*;
pub use subquery::*;
