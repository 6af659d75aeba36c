use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Directive name → ordered source expressions.
///
/// Directive names are stored lower-cased. Source expressions are kept
/// verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CspPolicy {
    directives: BTreeMap<String, Vec<String>>,
}

impl CspPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `directive` unless it is already present. Returns whether the
    /// directive was inserted.
    pub fn insert<I, S>(&mut self, directive: &str, sources: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = directive.trim().to_ascii_lowercase();
        if name.is_empty() || self.directives.contains_key(&name) {
            return false;
        }
        self.directives
            .insert(name, sources.into_iter().map(Into::into).collect());
        true
    }

    pub fn get(&self, directive: &str) -> Option<&[String]> {
        self.directives
            .get(&directive.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    pub fn contains(&self, directive: &str) -> bool {
        self.get(directive).is_some()
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.directives
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// The first directive in `directive`'s fallback chain that is present.
    pub fn effective(&self, directive: &str) -> Option<(&str, &[String])> {
        fallback_chain(directive)
            .into_iter()
            .find_map(|name| self.directives.get_key_value(name.as_str()))
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl<D, S> FromIterator<(D, Vec<S>)> for CspPolicy
where
    D: AsRef<str>,
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (D, Vec<S>)>>(iter: T) -> Self {
        let mut policy = Self::new();
        for (directive, sources) in iter {
            policy.insert(directive.as_ref(), sources);
        }
        policy
    }
}

/// Parse a `Content-Security-Policy` header value.
///
/// Several policies joined by `,` are merged; the first occurrence of a
/// directive wins, within one policy and across policies.
pub fn parse_header(value: &str) -> CspPolicy {
    let mut policy = CspPolicy::new();
    for directive in value.split(|c: char| c == ',' || c == ';') {
        let mut tokens = directive.split_ascii_whitespace();
        let Some(name) = tokens.next() else {
            continue;
        };
        if !policy.insert(name, tokens) {
            tracing::debug!(directive = name, "duplicate CSP directive ignored");
        }
    }
    policy
}

/// `directive` followed by the directives it falls back to, most specific
/// first.
pub fn fallback_chain(directive: &str) -> Vec<String> {
    let directive = directive.to_ascii_lowercase();
    let rest: &[&str] = match directive.as_str() {
        "script-src-elem" | "script-src-attr" => &["script-src", "default-src"],
        "style-src-elem" | "style-src-attr" => &["style-src", "default-src"],
        "worker-src" => &["child-src", "script-src", "default-src"],
        "frame-src" => &["child-src", "default-src"],
        "child-src" | "connect-src" | "font-src" | "img-src" | "manifest-src" | "media-src"
        | "object-src" | "prefetch-src" | "script-src" | "style-src" => &["default-src"],
        _ => &[],
    };

    let mut chain = Vec::with_capacity(rest.len() + 1);
    chain.push(directive.clone());
    chain.extend(rest.iter().map(|s| s.to_string()));
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_directives_and_sources() {
        let p = parse_header("default-src 'self'; Script-Src 'self' https://cdn.example ; img-src *");
        assert_eq!(p.len(), 3);
        assert_eq!(
            p.get("script-src").unwrap(),
            &["'self'".to_string(), "https://cdn.example".to_string()]
        );
        assert_eq!(p.get("IMG-SRC").unwrap(), &["*".to_string()]);
    }

    #[test]
    fn first_directive_wins() {
        let p = parse_header("script-src a.example; script-src b.example, script-src c.example");
        assert_eq!(p.get("script-src").unwrap(), &["a.example".to_string()]);
    }

    #[test]
    fn multiple_policies_merge() {
        let p = parse_header("script-src 'self', img-src data:");
        assert!(p.contains("script-src"));
        assert!(p.contains("img-src"));
    }

    #[test]
    fn empty_and_valueless_directives() {
        let p = parse_header(" ; ;upgrade-insecure-requests;");
        assert_eq!(p.len(), 1);
        assert!(p.get("upgrade-insecure-requests").unwrap().is_empty());
    }

    #[test]
    fn effective_follows_fallback_chain() {
        let p: CspPolicy = [("default-src", vec!["'none'"]), ("child-src", vec!["'self'"])]
            .into_iter()
            .collect();
        assert_eq!(p.effective("worker-src").unwrap().0, "child-src");
        assert_eq!(p.effective("script-src-elem").unwrap().0, "default-src");
        assert!(p.effective("base-uri").is_none());
    }

    #[test]
    fn serializes_as_plain_map() {
        let p: CspPolicy = [("script-src", vec!["'self'"])].into_iter().collect();
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json, serde_json::json!({"script-src": ["'self'"]}));
    }
}
