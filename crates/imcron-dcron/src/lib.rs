//! # imcron dcron
//!
//! Distributed cron scheduler. Every node of a fleet registers the same jobs;
//! each tick of a job runs on exactly one node, chosen by a consistent hash
//! ring over the nodes currently alive in a shared store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────── Dcron ────────────────────────────────┐
//! │                                                                       │
//! │  CronEngine ──tick──▶ JobWrapper ──owner?──▶ NodePool ──▶ HashRing    │
//! │                           │                     │                     │
//! │                           │ upgrading           │ poll every interval │
//! │                           ▼                     ▼                     │
//! │                      RecentJobs ◀──drain──  Driver (zset/key/memory)  │
//! │                           │                                           │
//! │                           └──▶ replay task (re-checks ownership)      │
//! │                                                                       │
//! │  JobStore (stable jobs) ◀── add/remove        JobRecoverer ──▶ start  │
//! │        └──────────── sync every interval ──────────┘                  │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Components
//!
//! - [`Dcron`]: add/remove jobs, start/stop, recovery and sync, introspection
//! - [`Driver`]: membership backends ([`RedisZSetDriver`], [`RedisKeyDriver`], [`MemoryDriver`])
//! - [`NodePool`]: Upgrading/Steady convergence and ownership checks
//! - [`HashRing`]: consistent hash ring with virtual points
//! - [`CronEngine`]: local trigger engine
//! - [`JobStore`]: persistence for [`StableJob`]s
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use imcron_dcron::{Dcron, DcronOptions, MemoryDriver, MemoryRegistry};
//!
//! #[tokio::main]
//! async fn main() -> imcron_dcron::Result<()> {
//!     let driver = MemoryDriver::new(MemoryRegistry::new(), "msg-cron", Duration::from_secs(6));
//!     let dcron = Dcron::new(Arc::new(driver), DcronOptions::new("msg-cron"))?;
//!     dcron.add_func("report", "*/5 * * * *", || async { println!("tick") }).await?;
//!     dcron.start().await?;
//!     dcron.stop().await
//! }
//! ```

pub mod config;
pub mod dcron;
pub mod driver;
pub mod engine;
pub mod error;
pub mod job;
pub mod node_pool;
pub mod recent;
pub mod ring;
pub mod schedule;
pub mod store;

pub use config::{DEFAULT_KEY_PREFIX, DcronOptions};
pub use dcron::{Dcron, JobInfo, JobRecoverer};
pub use driver::{
    Driver, MemoryDriver, MemoryRegistry, RedisDriverOptions, RedisKeyDriver, RedisZSetDriver,
};
pub use engine::CronEngine;
pub use error::{DcronError, Result};
pub use job::{FnJob, Job, StableJob, StableJobRecord};
pub use node_pool::{ClusterStatus, ConvergenceState, NodePool};
pub use recent::{RecentJob, RecentJobs};
pub use ring::HashRing;
pub use schedule::parse_schedule;
pub use store::{JobStore, MemoryJobStore, RedisJobStore};
