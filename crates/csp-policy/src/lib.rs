//! # csp-policy
//!
//! Content-Security-Policy enforcement for pages served under the proxy
//! origin. The site's policy is captured once per navigation, frozen in a
//! [`PolicyStore`], and every outgoing URL the interceptors see can be
//! checked against it as if the page still lived on its real origin.
//!
//! ## Quick start
//!
//! ```rust
//! use csp_policy::PolicyStore;
//! use fault_log::FaultSink;
//! use url_rewrite::ProxyLocation;
//!
//! let location =
//!     ProxyLocation::new("https://proxy.example/prefix/https://site.example/", "/prefix/").unwrap();
//! let store = PolicyStore::new(location, FaultSink::tracing_only());
//! store.load_header("script-src 'self' https://cdn.example").unwrap();
//!
//! assert!(store.validate("https://cdn.example/lib.js", "https://proxy.example", "script-src").is_ok());
//! let violation = store
//!     .validate("https://evil.example/x.js", "https://proxy.example", "script-src")
//!     .unwrap_err();
//! assert_eq!(violation.rule, "'self' https://cdn.example");
//! ```

mod error;
pub mod policy;
pub mod source;
mod store;

// Re-export primary public API at crate root.
pub use error::{CspError, CspViolation};
pub use policy::{fallback_chain, parse_header, CspPolicy};
pub use source::{HashAlgorithm, SourceExpression};
pub use store::PolicyStore;
