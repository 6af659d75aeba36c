//! # interceptor-registry
//!
//! Declarative interception of the host's runtime capabilities. Each
//! [`InterceptorDescriptor`] names one capability by its dotted global path,
//! the contexts it exists in, how to wrap it, and which of its arguments or
//! results are URLs ([`EscapeFix`]). Descriptors are grouped into bundles,
//! collected into an ordered [`Registry`] and installed once per context by a
//! [`Dispatcher`].
//!
//! ```text
//! FeatureSelection ──► Registry (core + bundles, last write wins)
//!                          │
//!                          ▼
//!        Dispatcher { context kind, platform support }
//!                          │  eligibility, then install
//!                          ▼
//!   HostEnvironment ── capability replaced by a wrapper ──► UrlCodec,
//!                                                         CookieRewriter,
//!                                                         PolicyStore,
//!                                                         Namespacer
//! ```
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use fault_log::FaultSink;
//! use interceptor_registry::{
//!     native, Capability, ContextKind, Dispatcher, FeatureSelection, HostEnvironment,
//!     HostValue, InterceptCx, Registry,
//! };
//! use url_rewrite::{ProxyLocation, UrlCodec};
//!
//! let location =
//!     ProxyLocation::new("https://proxy.example/prefix/https://site.example/", "/prefix/").unwrap();
//! let cx = Arc::new(InterceptCx::new(UrlCodec::new(location), FaultSink::tracing_only()));
//!
//! let mut env = HostEnvironment::new();
//! env.define("open", Capability::Function(native(|args| Ok(args[0].clone()))));
//!
//! let registry = Registry::from_features(&FeatureSelection::default());
//! let report = Dispatcher::new(ContextKind::Window, FaultSink::tracing_only())
//!     .install(&registry, &mut env, cx);
//! assert!(report.is_clean());
//!
//! let opened = env.call("open", &[HostValue::from("/login")]).unwrap();
//! assert_eq!(
//!     opened,
//!     HostValue::from("https://proxy.example/prefix/https://site.example/login")
//! );
//! ```

pub mod bundles;
pub mod context;
pub mod descriptor;
pub mod dispatcher;
mod error;
pub mod host;
pub mod registry;

pub use context::{ContextKind, ExposedContexts, PlatformSupport, SupportLevel, Supports};
pub use descriptor::{
    CallHook, EscapeFix, EscapeTarget, GetterHook, InterceptCx, InterceptorDescriptor, SetterHook, Slot,
    ValueHook, WrapSpec,
};
pub use dispatcher::{DescriptorState, Dispatcher, Exclusion, InstallRecord, InstallReport};
pub use error::InterceptorInstallError;
pub use host::{native, Capability, HostEnvironment, HostError, HostObject, HostValue, NativeFn, ProtoId};
pub use registry::{FeatureSelection, Registry};

pub use host_bridge::{BusClient, BusError, BusMessage, FetchError, FetchRequest, FetchResponse, Fetcher, MessageBus};
