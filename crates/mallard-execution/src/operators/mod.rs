//! Physical operators

mod chunk_scan;
mod cross_product;
mod delim_join;
mod empty_result;
mod execute;
mod filter;
mod hash_aggregate;
mod hash_join;
mod order;
mod projection;
mod recursive_cte;
mod reservoir_sample;
mod simple_aggregate;
mod table_scan;
mod union;

pub use chunk_scan::{ChunkScan, SharedCollection};
pub use cross_product::CrossProduct;
pub use delim_join::DelimJoin;
pub use empty_result::EmptyResult;
pub use execute::Execute;
pub use filter::Filter;
pub use hash_aggregate::HashAggregate;
pub use hash_join::{HashJoin, JoinCondition, JoinType};
pub use order::Order;
pub use projection::Projection;
pub use recursive_cte::RecursiveCte;
pub use reservoir_sample::ReservoirSample;
pub use simple_aggregate::SimpleAggregate;
pub use table_scan::TableScan;
pub use union::Union;
