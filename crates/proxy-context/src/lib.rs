//! # proxy-context
//!
//! The per-execution-context root of the rewriting core. Every window and
//! worker served under the proxy origin builds exactly one [`ProxyContext`]
//! from the deployment's [`FeatureConfig`] and the handles its host provides
//! ([`HostContext`]):
//!
//! ```text
//! FeatureConfig + HostContext
//!        │
//!        ▼
//!  1. ProxyLocation / UrlCodec / CookieRewriter
//!  2. Namespacer per reachable storage kind (claims checked, stale sessions evicted)
//!  3. PolicyStore (site CSP, write-once)
//!  4. Registry ──► Dispatcher ──► HostEnvironment (interceptors Active)
//! ```
//!
//! Nothing is looked up globally; the context is passed explicitly to
//! whatever needs it.
//!
//! ## Quick start
//!
//! ```rust
//! use interceptor_registry::{native, Capability, ContextKind, HostEnvironment, HostValue};
//! use proxy_context::{load_config_from_str, HostContext, ProxyContext};
//!
//! let config = load_config_from_str("prefix: /prefix/\n").unwrap();
//! let mut env = HostEnvironment::new();
//! env.define("open", Capability::Function(native(|args| Ok(args[0].clone()))));
//!
//! let host = HostContext::new(
//!     ContextKind::Window,
//!     "https://proxy.example/prefix/https://site.example/",
//! );
//! let ctx = ProxyContext::init(config, host, &mut env).unwrap();
//! assert_eq!(ctx.location().real_origin(), Some("https://site.example"));
//!
//! let opened = env.call("open", &[HostValue::from("/login")]).unwrap();
//! assert_eq!(opened, HostValue::from("https://proxy.example/prefix/https://site.example/login"));
//! ```

pub mod config;
mod context;
pub mod telemetry;

pub use config::{load_config, load_config_from_str, FeatureConfig};
pub use context::{storage_kinds, HostContext, ProxyContext, STORAGE_CHANNEL};
pub use telemetry::init_tracing;
