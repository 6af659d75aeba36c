//! # url-rewrite
//!
//! String-level transforms that let a site run under the proxy origin while
//! still believing it lives on its own origin.
//!
//! - [`codec`]: real URL ⇄ proxy URL (`to_proxy`, `after_prefix`,
//!   `after_origin`) and the per-context [`UrlCodec`].
//! - [`location`]: the cached [`ProxyLocation`] of an execution context.
//! - [`cookie`]: `Set-Cookie` / `Cookie` path scoping.
//! - [`search_params`]: collision-free sidecar query parameters.
//!
//! ## Quick start
//!
//! ```rust
//! use url_rewrite::{after_prefix, to_proxy};
//!
//! let href = "https://proxy.example/prefix/https://site.example/";
//! let proxied = to_proxy("/login", href, "/prefix/").unwrap();
//! assert_eq!(proxied, "https://proxy.example/prefix/https://site.example/login");
//! assert_eq!(
//!     after_prefix(&proxied, "/prefix/", "https://proxy.example"),
//!     "https://site.example/login"
//! );
//! ```

pub mod codec;
pub mod cookie;
mod error;
pub mod location;
pub mod search_params;

pub use codec::{after_origin, after_prefix, rewrite_or_passthrough, to_proxy, UrlCodec, UrlForm};
pub use cookie::{rewrite_get_cookie, rewrite_set_cookie, rewrite_set_cookie_headers, CookieRewriter, PATH_MARKER};
pub use error::{HeaderRewriteError, SearchParamError, UrlRewriteError};
pub use location::ProxyLocation;
pub use search_params::{
    append_escaped, append_escaped_to_url, append_escaped_with_limit, SearchParams, DEFAULT_MAX_ESCAPES,
};
