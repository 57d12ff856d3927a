//! # Prometheus Task Pool
//!
//! Hierarchical, capacity-limited task pools with idempotent, resumable units
//! of work.
//!
//! A long-running job fans out into many sub-tasks (one per item of a batch,
//! one per external call). Running them all at once overloads downstream
//! services; running them one by one wastes time. This crate bounds how many
//! run at once, both per job and across every job in the process, and makes
//! sure a unit of work with the same identity is never executed twice.
//!
//! ## Capacity
//!
//! A [`CapacitySource`](core::CapacitySource) is a budget of concurrency units.
//! Sources chain: a per-job local source has the process-wide global source as
//! parent, and a grant takes one unit at every level or none at all.
//!
//! ```rust,ignore
//! use prometheus_task_pool::builders::CapacityContext;
//!
//! let ctx = CapacityContext::new(8)?;          // 8 tasks process-wide
//! let job_capacity = ctx.child("batch-42", 3)?; // at most 3 for this job
//! ```
//!
//! ## Running tasks
//!
//! A [`TaskPoolRunner`](core::TaskPoolRunner) pulls tasks from a
//! [`TaskSource`](core::TaskSource) only once it holds a unit for them, and
//! streams a [`ProgressEnvelope`](core::ProgressEnvelope) per task in
//! completion order.
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use prometheus_task_pool::core::{ListSource, Task, TaskPoolRunner};
//! use prometheus_task_pool::runtime::TokioSpawner;
//!
//! let tasks = (0..10).map(|i| Task::new(format!("item-{i}"), move || async move { Ok(i * 2) }));
//! let runner = TaskPoolRunner::new("batch-42", ListSource::new(tasks), job_capacity, TokioSpawner::current());
//! let mut run = runner.run_tasks();
//! while let Some(envelope) = run.next().await {
//!     println!("{:?}", envelope?);
//! }
//! ```
//!
//! ## Idempotent units
//!
//! An [`IdempotentTaskRegistry`](core::IdempotentTaskRegistry) maps each
//! [`TaskIdentity`](core::TaskIdentity) to exactly one
//! [`RunnableUnit`](core::RunnableUnit). Backed by a
//! [`FileIdentityStore`](infra::FileIdentityStore), completed units survive a
//! restart and are never executed again.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core capacity, runner and identity abstractions.
pub mod core;
/// Configuration models for the capacity hierarchy.
pub mod config;
/// Builders to construct capacity contexts and runners from configuration.
pub mod builders;
/// Infrastructure adapters for identity storage.
pub mod infra;
/// Runtime adapters for spawning work.
pub mod runtime;
/// Shared utilities.
pub mod util;
