//! Aggregation Client (API side): builds aggregation programs and
//! merges the result batches fragments send back.

pub mod builder;
pub mod merge;
pub mod result_batch_size;
pub mod result_iter;

pub use builder::{AggregatorBuilder, ColumnDescriptor, TableDescriptor};
pub use merge::ResultMerger;
pub use result_iter::{prepare_results, GroupColumn, ResultRecord};
