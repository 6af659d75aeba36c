use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use fault_log::FaultSink;
use host_bridge::{FetchRequest, Fetcher};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256, Sha384, Sha512};
use url::Url;
use url_rewrite::{after_prefix, ProxyLocation};

use crate::error::{CspError, CspViolation};
use crate::policy::{parse_header, CspPolicy};
use crate::source::{HashAlgorithm, MatchTarget, SourceExpression};

const COMPONENT: &str = "csp-policy";

/// The frozen policy together with its compiled sources.
#[derive(Debug)]
struct LoadedPolicy {
    policy: CspPolicy,
    compiled: HashMap<String, Vec<SourceExpression>>,
}

impl LoadedPolicy {
    fn compile(policy: CspPolicy) -> Self {
        let compiled = policy
            .iter()
            .map(|(name, sources)| {
                let exprs = sources.iter().map(|s| SourceExpression::parse(s)).collect();
                (name.to_string(), exprs)
            })
            .collect();
        Self { policy, compiled }
    }
}

/// Write-once CSP holder for one navigation.
///
/// Before [`load`](Self::load) the store imposes no restriction. The policy
/// is interpreted for the *real* page: candidates in proxy form are decoded
/// before matching and `'self'` then means the real page origin. Other
/// candidates are compared with `source_origin` directly.
#[derive(Debug)]
pub struct PolicyStore {
    location: ProxyLocation,
    faults: FaultSink,
    loaded: OnceCell<LoadedPolicy>,
}

impl PolicyStore {
    pub fn new(location: ProxyLocation, faults: FaultSink) -> Self {
        Self {
            location,
            faults,
            loaded: OnceCell::new(),
        }
    }

    /// Freeze `policy` for this context. A second call is a fatal error.
    pub fn load(&self, policy: CspPolicy) -> Result<(), CspError> {
        let directives = policy.len();
        if self.loaded.set(LoadedPolicy::compile(policy)).is_err() {
            let err = CspError::AlreadyLoaded;
            self.faults
                .report(COMPONENT, "second policy load for one navigation", Some(&err));
            return Err(err);
        }
        tracing::info!(directives, page = self.location.real_href(), "content security policy loaded");
        Ok(())
    }

    /// Parse a `Content-Security-Policy` header and [`load`](Self::load) it.
    pub fn load_header(&self, header: &str) -> Result<(), CspError> {
        self.load(parse_header(header))
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    pub fn policy(&self) -> Option<&CspPolicy> {
        self.loaded.get().map(|l| &l.policy)
    }

    /// Sources for exactly `directive`, without fallback.
    pub fn get_rules(&self, directive: &str) -> Option<&[String]> {
        self.policy()?.get(directive)
    }

    /// Sources governing `directive` after the fallback chain, and the name
    /// of the directive that supplied them.
    pub fn effective_rules(&self, directive: &str) -> Option<(&str, &[String])> {
        self.policy()?.effective(directive)
    }

    /// Check `candidate` against the sources governing `directive`.
    ///
    /// Succeeds when any source allows the candidate, when the policy has
    /// nothing to say about the directive, or when no policy is loaded.
    pub fn validate(
        &self,
        candidate: &str,
        source_origin: &str,
        directive: &str,
    ) -> Result<(), CspViolation> {
        let Some(loaded) = self.loaded.get() else {
            return Ok(());
        };
        let Some((effective, sources)) = loaded.policy.effective(directive) else {
            return Ok(());
        };
        let compiled = loaded.compiled.get(effective).map(Vec::as_slice).unwrap_or(&[]);

        let violation = || CspViolation {
            directive: directive.to_string(),
            rule: sources.join(" "),
            candidate: candidate.to_string(),
        };

        let Ok(url) = Url::parse(self.location.href()).and_then(|base| base.join(candidate)) else {
            tracing::debug!(candidate, directive, "unparseable CSP candidate refused");
            return Err(violation());
        };

        let real = self.decode(&url);
        let page_scheme = Url::parse(self.location.real_href())
            .map(|u| u.scheme().to_string())
            .unwrap_or_else(|_| "https".to_string());

        // Proxy-form candidates are judged by the real URL they stand for.
        let target = match &real {
            Some(real) => MatchTarget {
                url: real,
                self_origin: self.location.real_origin().unwrap_or(source_origin),
                page_scheme: &page_scheme,
            },
            None => MatchTarget {
                url: &url,
                self_origin: source_origin,
                page_scheme: &page_scheme,
            },
        };
        let allowed = compiled.iter().any(|source| source.matches_url(&target));

        if allowed {
            tracing::debug!(candidate, directive, "CSP allowed");
            Ok(())
        } else {
            let v = violation();
            tracing::debug!(candidate, directive, rule = %v.rule, "CSP violation");
            Err(v)
        }
    }

    /// Fetch `candidate` and accept it if its body matches a hash source of
    /// `directive`. Nothing is fetched when the directive is unrestricted.
    pub async fn validate_hash(
        &self,
        candidate: &str,
        directive: &str,
        fetcher: &dyn Fetcher,
    ) -> Result<(), CspError> {
        let Some(loaded) = self.loaded.get() else {
            return Ok(());
        };
        let Some((effective, sources)) = loaded.policy.effective(directive) else {
            return Ok(());
        };
        let hashes: Vec<&SourceExpression> = loaded
            .compiled
            .get(effective)
            .into_iter()
            .flatten()
            .filter(|s| s.is_hash())
            .collect();

        let violation = || CspViolation {
            directive: directive.to_string(),
            rule: sources.join(" "),
            candidate: candidate.to_string(),
        };
        if hashes.is_empty() {
            return Err(violation().into());
        }

        let response = fetcher
            .fetch(FetchRequest::get(candidate))
            .await
            .map_err(|source| CspError::Fetch {
                url: candidate.to_string(),
                source,
            })?;

        let matched = hashes.iter().any(|source| match source {
            SourceExpression::Hash { algorithm, digest } => {
                digest_of(*algorithm, &response.body) == *digest
            }
            _ => false,
        });

        if matched {
            Ok(())
        } else {
            Err(violation().into())
        }
    }

    /// The real-site URL behind a proxy-form candidate, if it is one.
    fn decode(&self, url: &Url) -> Option<Url> {
        let loc = &self.location;
        let real = after_prefix(url.as_str(), loc.prefix(), loc.origin());
        if real == url.as_str() {
            return None;
        }
        Url::parse(&real).ok()
    }
}

fn digest_of(algorithm: HashAlgorithm, body: &[u8]) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => STANDARD.encode(Sha256::digest(body)),
        HashAlgorithm::Sha384 => STANDARD.encode(Sha384::digest(body)),
        HashAlgorithm::Sha512 => STANDARD.encode(Sha512::digest(body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use host_bridge::{FetchResponse, StaticFetcher};

    const HREF: &str = "https://proxy.example/prefix/https://site.example/";

    fn store() -> PolicyStore {
        PolicyStore::new(
            ProxyLocation::new(HREF, "/prefix/").unwrap(),
            FaultSink::tracing_only(),
        )
    }

    fn policy(directive: &str, sources: &[&str]) -> CspPolicy {
        [(directive, sources.to_vec())].into_iter().collect()
    }

    #[test]
    fn self_allows_proxy_origin_and_names_violation() {
        let s = store();
        s.load(policy("script-src", &["'self'"])).unwrap();

        assert!(s
            .validate("https://proxy.example/x.js", "https://proxy.example", "script-src")
            .is_ok());

        let err = s
            .validate("https://evil.example/x.js", "https://proxy.example", "script-src")
            .unwrap_err();
        assert_eq!(
            err,
            CspViolation {
                directive: "script-src".into(),
                rule: "'self'".into(),
                candidate: "https://evil.example/x.js".into(),
            }
        );
    }

    #[test]
    fn any_listed_source_allows_and_violation_names_the_whole_list() {
        let s = store();
        s.load(policy("script-src", &["'self'", "https://cdn.example"])).unwrap();

        assert!(s
            .validate(
                "https://proxy.example/prefix/https://site.example/app.js",
                "https://proxy.example",
                "script-src"
            )
            .is_ok());
        assert!(s
            .validate(
                "https://proxy.example/prefix/https://cdn.example/lib.js",
                "https://proxy.example",
                "script-src"
            )
            .is_ok());

        let err = s
            .validate(
                "https://proxy.example/prefix/https://evil.example/x.js",
                "https://proxy.example",
                "script-src",
            )
            .unwrap_err();
        assert_eq!(err.rule, "'self' https://cdn.example");
        assert_eq!(err.directive, "script-src");
    }

    #[test]
    fn self_allows_decoded_real_origin() {
        let s = store();
        s.load(policy("script-src", &["'self'"])).unwrap();
        assert!(s
            .validate(
                "/prefix/https://site.example/app.js",
                "https://proxy.example",
                "script-src"
            )
            .is_ok());
        assert!(s
            .validate(
                "/prefix/https://evil.example/app.js",
                "https://proxy.example",
                "script-src"
            )
            .is_err());
    }

    #[test]
    fn host_sources_match_the_real_url() {
        let s = store();
        s.load(policy("img-src", &["cdn.example"])).unwrap();
        assert!(s
            .validate(
                "https://proxy.example/prefix/https://cdn.example/a.png",
                "https://proxy.example",
                "img-src"
            )
            .is_ok());
    }

    #[test]
    fn absent_directive_and_unloaded_store_allow() {
        let s = store();
        assert!(s.validate("https://evil.example/", "https://proxy.example", "script-src").is_ok());
        s.load(policy("img-src", &["'none'"])).unwrap();
        assert!(s.validate("https://evil.example/", "https://proxy.example", "script-src").is_ok());
    }

    #[test]
    fn default_src_fallback_applies() {
        let s = store();
        s.load(policy("default-src", &["'none'"])).unwrap();
        let err = s
            .validate("https://site.example/a.js", "https://proxy.example", "script-src-elem")
            .unwrap_err();
        assert_eq!(err.directive, "script-src-elem");
        assert_eq!(err.rule, "'none'");
        assert!(s.get_rules("script-src-elem").is_none());
        assert_eq!(s.effective_rules("script-src-elem").unwrap().0, "default-src");
    }

    #[tokio::test]
    async fn second_load_is_fatal() {
        let (faults, mut rx) = FaultSink::channel();
        let s = PolicyStore::new(ProxyLocation::new(HREF, "/prefix/").unwrap(), faults);
        s.load_header("script-src 'self'").unwrap();
        assert!(matches!(
            s.load_header("script-src *"),
            Err(CspError::AlreadyLoaded)
        ));
        assert_eq!(s.get_rules("script-src").unwrap(), &["'self'".to_string()]);
        assert_eq!(rx.recv().await.unwrap().component, "csp-policy");
    }

    #[tokio::test]
    async fn hash_sources_check_fetched_body() {
        let body = b"console.log('hi')";
        let digest = STANDARD.encode(Sha256::digest(body));
        let fetcher = StaticFetcher::new();
        fetcher.insert(FetchResponse::ok("https://site.example/ok.js", &body[..]));
        fetcher.insert(FetchResponse::ok("https://site.example/bad.js", "tampered"));

        let s = store();
        let source = format!("'sha256-{digest}'");
        s.load(policy("script-src", &[source.as_str()])).unwrap();

        s.validate_hash("https://site.example/ok.js", "script-src", &fetcher)
            .await
            .unwrap();
        let err = s
            .validate_hash("https://site.example/bad.js", "script-src", &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, CspError::Violation(_)));

        let err = s
            .validate_hash("https://site.example/missing.js", "script-src", &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, CspError::Fetch { .. }));
    }

    #[tokio::test]
    async fn unrestricted_directive_skips_fetch() {
        let fetcher = StaticFetcher::new();
        let s = store();
        s.load(policy("img-src", &["*"])).unwrap();
        s.validate_hash("https://site.example/a.js", "script-src", &fetcher)
            .await
            .unwrap();
        assert_eq!(fetcher.calls(), 0);
    }
}
