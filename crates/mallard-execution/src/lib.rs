//! Mallard Execution - Vectorized query execution engine
//!
//! Physical plans are pull-based operator trees. The executor cuts a plan
//! into pipelines at every sink, runs the pipelines on the task scheduler in
//! dependency order and then streams the result out of the plan root.

pub mod aggregate;
pub mod context;
pub mod executor;
pub mod expression;
pub mod operator;
pub mod operators;
pub mod pipeline;
pub mod profiler;
pub mod scheduler;

pub use aggregate::{AggregateExpression, AggregateFunction};
pub use context::{ClientContext, DatabaseInstance, ExecutionContext};
pub use executor::{Executor, PipelineGraph};
pub use expression::{evaluate, ArithmeticOp, Expression, ExpressionExecutor};
pub use operator::{tree_to_string, PhysicalOperator, PhysicalOperatorType, SinkOperator};
pub use pipeline::Pipeline;
pub use profiler::QueryProfiler;
pub use scheduler::TaskScheduler;
