//! Shared fatal-error channel for the rewriting core.
//!
//! Every component (URL codec, header rewriters, storage namespacer, CSP
//! store, interceptor dispatcher) reports failures through a [`FaultSink`]
//! instead of raising them across the capability boundary. Entries can be
//! appended to a [JSON Lines](https://jsonlines.org/) file by a background
//! writer task or handed to an in-process receiver.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use fault_log::FaultSink;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) = FaultSink::start("/var/log/rewriter/faults.jsonl").await?;
//! sink.report("csp-policy", "policy loaded twice for one context", None);
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{FaultEntry, Severity};
pub use sink::FaultSink;
pub use writer::{Durability, FaultWriteError, FaultWriter};
