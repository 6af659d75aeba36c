use std::sync::Arc;

use anyhow::{Context, Result};
use http::header::SET_COOKIE;
use http::HeaderMap;
use csp_policy::{CspError, PolicyStore};
use fault_log::FaultSink;
use host_bridge::{BusClient, Fetcher, MessageBus, StaticFetcher};
use interceptor_registry::{
    ContextKind, Dispatcher, HostEnvironment, InstallReport, InterceptCx, Registry,
};
use storage_ns::{
    serve_lookups, ClaimTable, Namespacer, RemoteStorage, StorageBackend, StorageKind,
    StorageNamespace,
};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;
use url_rewrite::{
    append_escaped_to_url, rewrite_set_cookie_headers, CookieRewriter, ProxyLocation,
    SearchParamError, UrlCodec,
};

use crate::config::FeatureConfig;

/// Bus channel carrying cross-context storage reads.
pub const STORAGE_CHANNEL: &str = "storage";

// ---------------------------------------------------------------------------
// Host handles
// ---------------------------------------------------------------------------

/// What the embedding environment hands a new context.
pub struct HostContext {
    pub kind: ContextKind,
    /// The context's own location, in proxy form.
    pub href: String,
    /// Shared by every context of one browsing client; scopes bus traffic.
    pub client_id: String,
    pub session_id: String,
    /// Direct storage access. Contexts without it read through a peer.
    pub storage: Option<Arc<dyn StorageBackend>>,
    pub claims: Arc<ClaimTable>,
    pub bus: MessageBus,
    pub fetcher: Arc<dyn Fetcher>,
    pub faults: FaultSink,
    /// The site's `Content-Security-Policy` header, if it sent one.
    pub csp_header: Option<String>,
}

impl HostContext {
    pub fn new(kind: ContextKind, href: impl Into<String>) -> Self {
        Self {
            kind,
            href: href.into(),
            client_id: uuid::Uuid::new_v4().to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            storage: None,
            claims: Arc::new(ClaimTable::new()),
            bus: MessageBus::new(),
            fetcher: Arc::new(StaticFetcher::new()),
            faults: FaultSink::tracing_only(),
            csp_header: None,
        }
    }

    pub fn with_client(mut self, client_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self.session_id = session_id.into();
        self
    }

    pub fn with_storage(mut self, backend: Arc<dyn StorageBackend>, claims: Arc<ClaimTable>) -> Self {
        self.storage = Some(backend);
        self.claims = claims;
        self
    }

    pub fn with_bus(mut self, bus: MessageBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_faults(mut self, faults: FaultSink) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_csp_header(mut self, header: impl Into<String>) -> Self {
        self.csp_header = Some(header.into());
        self
    }
}

/// Storage kinds a context of `kind` can reach directly.
pub fn storage_kinds(kind: ContextKind) -> &'static [StorageKind] {
    match kind {
        ContextKind::Window => &StorageKind::ALL,
        ContextKind::DedicatedWorker | ContextKind::SharedWorker | ContextKind::ServiceWorker => {
            &[StorageKind::IndexedDb]
        }
    }
}

fn store_id_base(config: &FeatureConfig, kind: StorageKind) -> &str {
    match kind {
        StorageKind::IndexedDb | StorageKind::Sql => &config.idb_store_id,
        StorageKind::LocalStorage | StorageKind::SessionStorage => &config.session_store_id,
        StorageKind::SharedStorage => &config.shared_storage_id,
    }
}

// ---------------------------------------------------------------------------
// ProxyContext
// ---------------------------------------------------------------------------

/// Root of one execution context. Built once by [`ProxyContext::init`] and
/// never reinitialised.
pub struct ProxyContext {
    kind: ContextKind,
    config: FeatureConfig,
    codec: UrlCodec,
    cookies: Option<Arc<CookieRewriter>>,
    session_id: String,
    namespacers: Vec<Arc<Namespacer>>,
    csp: Arc<PolicyStore>,
    registry: Registry,
    report: InstallReport,
    client: BusClient,
    fetcher: Arc<dyn Fetcher>,
    faults: FaultSink,
}

impl std::fmt::Debug for ProxyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyContext")
            .field("kind", &self.kind)
            .field("location", self.codec.location())
            .field("namespaces", &self.namespacers.len())
            .field("interceptors", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl ProxyContext {
    /// Wire up a context and install its interceptors into `env`.
    ///
    /// Order: location and codec, storage namespaces, CSP store, then the
    /// registry. A namespace collision or a malformed location aborts; a
    /// single interceptor failing to install does not.
    pub fn init(config: FeatureConfig, host: HostContext, env: &mut HostEnvironment) -> Result<Self> {
        let HostContext {
            kind,
            href,
            client_id,
            session_id,
            storage,
            claims,
            bus,
            fetcher,
            faults,
            csp_header,
        } = host;

        // 1. Location and codec.
        let location = ProxyLocation::new(&href, config.prefix.clone())
            .with_context(|| format!("invalid location for {kind} context: {href}"))?;
        let codec = UrlCodec::new(location.clone());

        let cookies = if location.is_proxied() {
            let rewriter = CookieRewriter::new(&location, &config.prefix)
                .context("failed to build cookie rewriter")?;
            Some(Arc::new(rewriter))
        } else {
            debug!(href = %href, "location is not proxied; cookies left unscoped");
            None
        };

        // 2. Storage namespaces.
        let site = location.real_origin().unwrap_or(location.origin()).to_string();
        let mut namespacers = Vec::new();
        if let Some(backend) = storage {
            for &storage_kind in storage_kinds(kind) {
                let store_id = format!("{}@{}", store_id_base(&config, storage_kind), site);
                let namespace = StorageNamespace::new(storage_kind, store_id, Some(&session_id))
                    .with_context(|| format!("invalid {storage_kind} namespace"))?;
                let namespacer = Namespacer::init(namespace, Arc::clone(&backend), &claims, &faults)
                    .with_context(|| format!("failed to claim {storage_kind} namespace"))?;
                namespacers.push(Arc::new(namespacer));
            }
        }

        // 3. CSP store.
        let csp = Arc::new(PolicyStore::new(location, faults.clone()));
        if let Some(header) = csp_header.as_deref() {
            csp.load_header(header)
                .context("failed to load content security policy")?;
        }

        // 4. Registry.
        let mut cx = InterceptCx::new(codec.clone(), faults.clone()).with_csp(Arc::clone(&csp));
        if let Some(cookies) = &cookies {
            cx = cx.with_cookies(Arc::clone(cookies));
        }
        for namespacer in &namespacers {
            cx = cx.with_storage(Arc::clone(namespacer));
        }

        let registry = Registry::from_features(&config.feature_selection());
        let report = Dispatcher::new(kind, faults.clone())
            .with_platform(config.platform())
            .install(&registry, env, Arc::new(cx));

        let client = bus.client(client_id);

        info!(
            context = %kind,
            href = %href,
            client = client.client_id(),
            namespaces = namespacers.len(),
            csp = csp.is_loaded(),
            interceptors = report.active().count(),
            "proxy context ready"
        );

        Ok(Self {
            kind,
            config,
            codec,
            cookies,
            session_id,
            namespacers,
            csp,
            registry,
            report,
            client,
            fetcher,
            faults,
        })
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn location(&self) -> &ProxyLocation {
        self.codec.location()
    }

    pub fn codec(&self) -> &UrlCodec {
        &self.codec
    }

    pub fn cookies(&self) -> Option<&CookieRewriter> {
        self.cookies.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn namespacer(&self, kind: StorageKind) -> Option<&Namespacer> {
        self.namespacers
            .iter()
            .find(|ns| ns.namespace().kind() == kind)
            .map(Arc::as_ref)
    }

    pub fn csp(&self) -> &PolicyStore {
        &self.csp
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn install_report(&self) -> &InstallReport {
        &self.report
    }

    pub fn bus_client(&self) -> &BusClient {
        &self.client
    }

    pub fn faults(&self) -> &FaultSink {
        &self.faults
    }

    /// Answer peer storage reads from this context's namespaces. `None` when
    /// the context has no direct storage.
    pub fn serve_storage_lookups(&self) -> Option<JoinHandle<()>> {
        if self.namespacers.is_empty() {
            return None;
        }
        Some(serve_lookups(&self.client, STORAGE_CHANNEL, self.namespacers.clone()))
    }

    pub fn remote_storage(&self, kind: StorageKind) -> RemoteStorage {
        RemoteStorage::new(self.client.clone(), STORAGE_CHANNEL, kind, self.config.bus_timeout())
    }

    /// Read `key` locally when this context holds the namespace, otherwise
    /// through a peer of the same client.
    pub async fn get_item(&self, kind: StorageKind, key: &str) -> Option<String> {
        match self.namespacer(kind) {
            Some(ns) => ns.get_item(key),
            None => self.remote_storage(kind).get_item(key).await,
        }
    }

    /// Check a resource against the hash sources of `directive`.
    pub async fn validate_hash(&self, candidate: &str, directive: &str) -> Result<(), CspError> {
        self.csp
            .validate_hash(candidate, directive, self.fetcher.as_ref())
            .await
    }

    /// Scope every `Set-Cookie` header of a site response under the proxy.
    /// Values that cannot be rewritten stay as they are and are reported as
    /// degraded. Returns the number rewritten.
    pub fn rewrite_response_cookies(&self, headers: &mut HeaderMap) -> usize {
        let Some(cookies) = self.cookies.as_deref() else {
            return 0;
        };
        let total = headers.get_all(SET_COOKIE).iter().count();
        let rewritten = rewrite_set_cookie_headers(headers, cookies);
        if rewritten < total {
            self.faults.report_degraded(
                "url-rewrite",
                format!("{} of {total} Set-Cookie values left unscoped", total - rewritten),
                None,
            );
        }
        rewritten
    }

    /// Add a sidecar query parameter to `url` without clobbering one the site
    /// already uses.
    pub fn append_sidecar_param(
        &self,
        url: &mut Url,
        base_name: &str,
        value: &str,
    ) -> Result<String, SearchParamError> {
        append_escaped_to_url(
            url,
            base_name,
            &self.config.search_param_escape_char,
            value,
            self.config.max_search_param_escapes,
        )
    }
}
