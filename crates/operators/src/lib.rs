//! Built-in operators for the pipeline.
//!
//! ## Stateless Operators
//! - [`MapOperator`] - Transform each element
//! - [`FlatMapOperator`] - Transform each element into zero or more elements
//! - [`FilterOperator`] - Keep elements matching a predicate
//!
//! ## Keyed Operators
//! - [`KeyPartitioner`] / [`KeyRouter`] - Hash-route records to the task owning their key
//! - [`KeyedJoin`] - Continuous equi-join of two streams with per-key state

pub mod join;
pub mod partition;
pub mod stateless;

pub use join::{JoinCheckpointing, JoinConfig, JoinState, KeyedJoin, KeyedJoinOperator};
pub use partition::{KeyPartitioner, KeyRouter};
pub use stateless::{FilterOperator, FlatMapOperator, MapOperator};
