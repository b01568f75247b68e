// src/task/mod.rs

//! Task tree and execution pipeline.
//!
//! - [`tree`] defines the recursive `Parallel | Serial | Command | Empty`
//!   structure the generator executes, plus the resolved command node.
//! - [`runner`] composes a stack of middlewares around a terminal executor
//!   with `next`/`abort` semantics.

pub mod runner;
pub mod tree;

pub use runner::{Middleware, MiddlewareFuture, Next, RunContext, TaskRunner, Terminal};
pub use tree::{CommandTask, Task};
