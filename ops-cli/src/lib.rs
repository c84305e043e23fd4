//! Operations support for the `claims-batcher` binary
//!
//! The binary wires these helpers to a PostgreSQL store; they take any
//! [`batching_service::BatchStore`] so they can be exercised in memory.
//!
//! # Example Usage
//!
//! ```bash
//! claims-batcher migrate
//! claims-batcher seed
//! claims-batcher submit claims.json
//! claims-batcher process --date 2025-03-11
//! claims-batcher rebalance --date 2025-03-12
//! claims-batcher cycle
//! claims-batcher daemon --interval-secs 86400
//! ```

pub mod seed;
pub mod submissions;

pub use seed::{seed_reference_data, SeedReport};
pub use submissions::parse_submissions;
