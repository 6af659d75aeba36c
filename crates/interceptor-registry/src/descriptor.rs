use std::fmt;
use std::sync::Arc;

use csp_policy::PolicyStore;
use fault_log::{FaultEntry, FaultSink, Severity};
use storage_ns::{Namespacer, StorageKind};
use url_rewrite::{rewrite_or_passthrough, CookieRewriter, UrlCodec, UrlForm};

use crate::context::{ExposedContexts, Supports};
use crate::host::{HostError, HostValue, NativeFn};

// ---------------------------------------------------------------------------
// Escape fixes
// ---------------------------------------------------------------------------

/// Which side of an intercepted operation carries a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscapeTarget {
    /// The produced value; mapped proxy → real.
    Return,
    /// A call or setter argument; mapped real → proxy.
    Param,
    /// A constructor argument; mapped real → proxy.
    ConstructorParam,
}

/// Declares that a value crossing the interception boundary is a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EscapeFix {
    pub targeting: EscapeTarget,
    /// Argument index. Required for the parameter targets.
    pub position: Option<usize>,
    pub kind: UrlForm,
}

impl EscapeFix {
    pub fn returns(kind: UrlForm) -> Self {
        Self {
            targeting: EscapeTarget::Return,
            position: None,
            kind,
        }
    }

    pub fn param(position: usize, kind: UrlForm) -> Self {
        Self {
            targeting: EscapeTarget::Param,
            position: Some(position),
            kind,
        }
    }

    pub fn constructor_param(position: usize, kind: UrlForm) -> Self {
        Self {
            targeting: EscapeTarget::ConstructorParam,
            position: Some(position),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Hook context
// ---------------------------------------------------------------------------

/// Services a wrapper may use while it runs.
#[derive(Clone)]
pub struct InterceptCx {
    codec: UrlCodec,
    cookies: Option<Arc<CookieRewriter>>,
    csp: Option<Arc<PolicyStore>>,
    storage: Vec<Arc<Namespacer>>,
    faults: FaultSink,
}

impl fmt::Debug for InterceptCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptCx")
            .field("location", self.codec.location())
            .field("storage", &self.storage.len())
            .finish_non_exhaustive()
    }
}

impl InterceptCx {
    pub fn new(codec: UrlCodec, faults: FaultSink) -> Self {
        Self {
            codec,
            cookies: None,
            csp: None,
            storage: Vec::new(),
            faults,
        }
    }

    pub fn with_cookies(mut self, cookies: Arc<CookieRewriter>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    pub fn with_csp(mut self, csp: Arc<PolicyStore>) -> Self {
        self.csp = Some(csp);
        self
    }

    pub fn with_storage(mut self, namespacer: Arc<Namespacer>) -> Self {
        self.storage.push(namespacer);
        self
    }

    pub fn codec(&self) -> &UrlCodec {
        &self.codec
    }

    pub fn cookies(&self) -> Option<&CookieRewriter> {
        self.cookies.as_deref()
    }

    pub fn csp(&self) -> Option<&PolicyStore> {
        self.csp.as_deref()
    }

    pub fn storage(&self, kind: StorageKind) -> Option<&Namespacer> {
        self.storage
            .iter()
            .find(|ns| ns.namespace().kind() == kind)
            .map(Arc::as_ref)
    }

    pub fn faults(&self) -> &FaultSink {
        &self.faults
    }

    /// Real → proxy for a string value; other values pass through.
    ///
    /// A URL that cannot be rewritten is passed on unchanged and reported as
    /// a degraded fault.
    pub fn encode(&self, value: HostValue, form: UrlForm) -> HostValue {
        let HostValue::String(url) = value else {
            return value;
        };
        let result = self.codec.encode(&url, form);
        if let Err(err) = &result {
            self.faults.submit(
                FaultEntry::new("url-rewrite", "URL passed through unrewritten")
                    .with_severity(Severity::Degraded)
                    .with_cause(err)
                    .with_details(serde_json::json!({
                        "url": url,
                        "form": format!("{form:?}"),
                        "location": self.codec.location().href(),
                    })),
            );
        }
        HostValue::String(rewrite_or_passthrough(result, &url))
    }

    /// Proxy → real for a string value; other values pass through.
    pub fn decode(&self, value: HostValue, form: UrlForm) -> HostValue {
        match value {
            HostValue::String(s) => HostValue::String(self.codec.decode(&s, form)),
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Wrapping behaviours
// ---------------------------------------------------------------------------

/// Computes a replacement for a plain value at install time.
pub type ValueHook = fn(&InterceptCx, HostValue) -> Result<HostValue, HostError>;
/// Post-processes what the original getter produced.
pub type GetterHook = fn(&InterceptCx, HostValue) -> Result<HostValue, HostError>;
/// Pre-processes what is handed to the original setter.
pub type SetterHook = fn(&InterceptCx, HostValue) -> Result<HostValue, HostError>;
/// Full interposition around a call or construction. Arguments have already
/// had their escape fixes applied.
pub type CallHook = fn(&InterceptCx, &NativeFn, Vec<HostValue>) -> Result<HostValue, HostError>;

/// The part of a capability a wrapper replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Whole,
    Get,
    Set,
}

impl Slot {
    /// Getter and setter wrappers on one accessor do not conflict.
    pub fn overlaps(self, other: Slot) -> bool {
        !matches!((self, other), (Slot::Get, Slot::Set) | (Slot::Set, Slot::Get))
    }
}

/// How a capability is wrapped. Exactly one per descriptor.
#[derive(Clone, Copy)]
pub enum WrapSpec {
    Value(ValueHook),
    Getter(Option<GetterHook>),
    Setter(Option<SetterHook>),
    Construction(Option<CallHook>),
    Call(Option<CallHook>),
}

impl WrapSpec {
    pub fn name(&self) -> &'static str {
        match self {
            WrapSpec::Value(_) => "wrapValue",
            WrapSpec::Getter(_) => "wrapGetter",
            WrapSpec::Setter(_) => "wrapSetter",
            WrapSpec::Construction(_) => "wrapConstruction",
            WrapSpec::Call(_) => "wrapCall",
        }
    }

    pub fn slot(&self) -> Slot {
        match self {
            WrapSpec::Getter(_) => Slot::Get,
            WrapSpec::Setter(_) => Slot::Set,
            _ => Slot::Whole,
        }
    }

    /// Whether `fix` makes sense for this behaviour.
    pub fn accepts(&self, fix: &EscapeFix) -> bool {
        match (self, fix.targeting) {
            (WrapSpec::Value(_) | WrapSpec::Getter(_) | WrapSpec::Call(_), EscapeTarget::Return) => {
                true
            }
            (WrapSpec::Call(_), EscapeTarget::Param) => fix.position.is_some(),
            (WrapSpec::Setter(_), EscapeTarget::Param) => fix.position == Some(0),
            (WrapSpec::Construction(_), EscapeTarget::ConstructorParam) => fix.position.is_some(),
            _ => false,
        }
    }
}

impl fmt::Debug for WrapSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Static description of one interception.
#[derive(Debug, Clone)]
pub struct InterceptorDescriptor {
    pub global_prop: String,
    pub exposed: ExposedContexts,
    pub supports: Supports,
    pub skip: bool,
    pub wrap: WrapSpec,
    pub escape_fixes: Vec<EscapeFix>,
}

impl InterceptorDescriptor {
    pub fn new(global_prop: impl Into<String>, wrap: WrapSpec) -> Self {
        Self {
            global_prop: global_prop.into(),
            exposed: ExposedContexts::ALL,
            supports: Supports::ANY,
            skip: false,
            wrap,
            escape_fixes: Vec::new(),
        }
    }

    pub fn call(global_prop: impl Into<String>) -> Self {
        Self::new(global_prop, WrapSpec::Call(None))
    }

    pub fn call_with(global_prop: impl Into<String>, hook: CallHook) -> Self {
        Self::new(global_prop, WrapSpec::Call(Some(hook)))
    }

    pub fn construction(global_prop: impl Into<String>) -> Self {
        Self::new(global_prop, WrapSpec::Construction(None))
    }

    pub fn getter(global_prop: impl Into<String>) -> Self {
        Self::new(global_prop, WrapSpec::Getter(None))
    }

    pub fn getter_with(global_prop: impl Into<String>, hook: GetterHook) -> Self {
        Self::new(global_prop, WrapSpec::Getter(Some(hook)))
    }

    pub fn setter_with(global_prop: impl Into<String>, hook: SetterHook) -> Self {
        Self::new(global_prop, WrapSpec::Setter(Some(hook)))
    }

    pub fn value(global_prop: impl Into<String>, hook: ValueHook) -> Self {
        Self::new(global_prop, WrapSpec::Value(hook))
    }

    pub fn exposed_in(mut self, exposed: ExposedContexts) -> Self {
        self.exposed = exposed;
        self
    }

    pub fn supports(mut self, supports: Supports) -> Self {
        self.supports = supports;
        self
    }

    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    pub fn fix(mut self, fix: EscapeFix) -> Self {
        self.escape_fixes.push(fix);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_spec_accepts_matching_fixes() {
        let call = WrapSpec::Call(None);
        assert!(call.accepts(&EscapeFix::param(0, UrlForm::Full)));
        assert!(call.accepts(&EscapeFix::returns(UrlForm::Full)));
        assert!(!call.accepts(&EscapeFix::constructor_param(0, UrlForm::Full)));

        let setter = WrapSpec::Setter(None);
        assert!(setter.accepts(&EscapeFix::param(0, UrlForm::Relative)));
        assert!(!setter.accepts(&EscapeFix::param(1, UrlForm::Relative)));
        assert!(!setter.accepts(&EscapeFix::returns(UrlForm::Relative)));

        let ctor = WrapSpec::Construction(None);
        assert!(ctor.accepts(&EscapeFix::constructor_param(0, UrlForm::Full)));
        assert!(!ctor.accepts(&EscapeFix::returns(UrlForm::Full)));

        let positionless = EscapeFix {
            targeting: EscapeTarget::Param,
            position: None,
            kind: UrlForm::Full,
        };
        assert!(!call.accepts(&positionless));
    }

    #[tokio::test]
    async fn unresolvable_url_passes_through_as_degraded_fault() {
        let location = url_rewrite::ProxyLocation::new(
            "https://proxy.example/prefix/https://site.example/",
            "/prefix/",
        )
        .unwrap();
        let (faults, mut rx) = FaultSink::channel();
        let cx = InterceptCx::new(UrlCodec::new(location), faults);

        let out = cx.encode(HostValue::from("//[oops/x"), UrlForm::Full);
        assert_eq!(out, HostValue::from("//[oops/x"));

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.severity, Severity::Degraded);
        assert_eq!(entry.component, "url-rewrite");
        assert_eq!(entry.details["url"], "//[oops/x");
        assert_eq!(entry.details["form"], "Full");
        assert!(!entry.causes.is_empty());
    }

    #[test]
    fn accessor_halves_do_not_overlap() {
        assert!(!Slot::Get.overlaps(Slot::Set));
        assert!(Slot::Get.overlaps(Slot::Get));
        assert!(Slot::Whole.overlaps(Slot::Set));
    }

    #[test]
    fn builder_defaults() {
        let d = InterceptorDescriptor::call("open");
        assert_eq!(d.exposed, ExposedContexts::ALL);
        assert_eq!(d.supports, Supports::ANY);
        assert!(!d.skip);
        assert!(d.escape_fixes.is_empty());
        assert_eq!(d.wrap.name(), "wrapCall");
    }
}
