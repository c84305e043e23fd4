//! Claims batching engine for insurer claim submission
//!
//! Provides:
//! - Batch assignment keyed by provider, insurer and batch date
//! - A processing cost model driven by date, specialty, priority, amount and batch size
//! - A daily capacity pass that processes or defers ready batches
//! - A rebalancing pass that merges undersized and splits oversized batches
//! - In-memory and PostgreSQL stores behind one transactional interface

pub mod assignment;
pub mod config;
pub mod cost;
pub mod error;
pub mod models;
pub mod notification;
pub mod optimizer;
pub mod repository;
pub mod retry;
pub mod scheduler;
pub mod service;

pub use assignment::BatchAssigner;
pub use config::*;
pub use cost::CostModel;
pub use error::*;
pub use models::*;
pub use notification::*;
pub use optimizer::RebalanceOptimizer;
pub use repository::{BatchStore, InMemoryBatchStore, PostgresBatchStore, UnitOfWork};
pub use retry::RetryPolicy;
pub use scheduler::{CapacityScheduler, DEFAULT_PAGE_SIZE};
pub use service::*;
