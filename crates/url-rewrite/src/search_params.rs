//! Sidecar query parameters that never clobber the site's own parameters.
//!
//! The proxy sometimes has to smuggle extra data through a rewritten URL
//! (e.g. the original referrer). The sidecar name is chosen by prepending
//! escape characters to a base name until it no longer collides with a
//! parameter the site already uses: `q`, `_q`, `__q`, ...

use url::form_urlencoded;
use url::Url;

use crate::error::SearchParamError;

/// Upper bound on escape repetitions tried before giving up.
pub const DEFAULT_MAX_ESCAPES: usize = 64;

/// Ordered query-string multimap. Keys keep first-insertion order; repeated
/// keys collect their values in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    entries: Vec<(String, Vec<String>)>,
}

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` query (without `?`).
    pub fn parse(query: &str) -> Self {
        let mut params = Self::new();
        for (name, value) in form_urlencoded::parse(query.as_bytes()) {
            params.append(name.into_owned(), value.into_owned());
        }
        params
    }

    pub fn from_url(url: &Url) -> Self {
        url.query().map(Self::parse).unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Add `value` under `name`, creating the key if needed.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Remove `name` and return its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        let idx = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Serialise back to a query string (without `?`).
    pub fn to_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, values) in &self.entries {
            for value in values {
                serializer.append_pair(name, value);
            }
        }
        serializer.finish()
    }
}

/// Insert `value` under the first free name in `base_name`, `e+base_name`,
/// `ee+base_name`, ... and return the name used. Gives up after
/// [`DEFAULT_MAX_ESCAPES`] escapes.
pub fn append_escaped(
    params: &mut SearchParams,
    base_name: &str,
    escape_char: &str,
    value: &str,
) -> Result<String, SearchParamError> {
    append_escaped_with_limit(params, base_name, escape_char, value, DEFAULT_MAX_ESCAPES)
}

/// [`append_escaped`] with a caller-chosen escape cap.
pub fn append_escaped_with_limit(
    params: &mut SearchParams,
    base_name: &str,
    escape_char: &str,
    value: &str,
    max_escapes: usize,
) -> Result<String, SearchParamError> {
    if escape_char.chars().count() != 1 {
        return Err(SearchParamError::InvalidEscapeChar(escape_char.to_string()));
    }

    for escapes in 0..=max_escapes {
        let name = format!("{}{}", escape_char.repeat(escapes), base_name);
        if !params.contains(&name) {
            tracing::debug!(base = base_name, name = %name, escapes, "sidecar parameter chosen");
            params.append(name.clone(), value);
            return Ok(name);
        }
    }

    Err(SearchParamError::EscapeLimit {
        base: base_name.to_string(),
        limit: max_escapes,
    })
}

/// Inject a sidecar parameter directly into `url`'s query.
pub fn append_escaped_to_url(
    url: &mut Url,
    base_name: &str,
    escape_char: &str,
    value: &str,
    max_escapes: usize,
) -> Result<String, SearchParamError> {
    let mut params = SearchParams::from_url(url);
    let name = append_escaped_with_limit(&mut params, base_name, escape_char, value, max_escapes)?;
    url.set_query(Some(&params.to_query_string()));
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_appends_pick_distinct_free_names() {
        let mut params = SearchParams::new();
        params.append("q", "x");

        let first = append_escaped(&mut params, "q", "_", "y").unwrap();
        let second = append_escaped(&mut params, "q", "_", "y").unwrap();

        assert_ne!(first, second);
        assert_ne!(first, "q");
        assert_ne!(second, "q");
        assert_eq!(first, "_q");
        assert_eq!(second, "__q");
        assert_eq!(params.get("q"), Some(&["x".to_string()][..]));
    }

    #[test]
    fn free_base_name_is_used_as_is() {
        let mut params = SearchParams::parse("a=1");
        assert_eq!(append_escaped(&mut params, "ref", "_", "r").unwrap(), "ref");
    }

    #[test]
    fn limit_turns_pathology_into_error() {
        let mut params = SearchParams::parse("q=1&_q=2&__q=3");
        let err = append_escaped_with_limit(&mut params, "q", "_", "v", 2).unwrap_err();
        assert_eq!(
            err,
            SearchParamError::EscapeLimit {
                base: "q".to_string(),
                limit: 2
            }
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn escape_char_must_be_single_char() {
        let mut params = SearchParams::new();
        assert!(matches!(
            append_escaped(&mut params, "q", "__", "v"),
            Err(SearchParamError::InvalidEscapeChar(_))
        ));
        assert!(matches!(
            append_escaped(&mut params, "q", "", "v"),
            Err(SearchParamError::InvalidEscapeChar(_))
        ));
    }

    #[test]
    fn parse_keeps_order_and_repeats() {
        let params = SearchParams::parse("b=1&a=2&b=3");
        let collected: Vec<(&str, Vec<&str>)> = params
            .iter()
            .map(|(k, v)| (k, v.iter().map(String::as_str).collect()))
            .collect();
        assert_eq!(collected, vec![("b", vec!["1", "3"]), ("a", vec!["2"])]);
        assert_eq!(params.to_query_string(), "b=1&b=3&a=2");
    }

    #[test]
    fn injects_into_url_query() {
        let mut url = Url::parse("https://site.example/search?q=rust").unwrap();
        let name = append_escaped_to_url(&mut url, "q", "_", "origin", DEFAULT_MAX_ESCAPES).unwrap();
        assert_eq!(name, "_q");
        assert_eq!(url.as_str(), "https://site.example/search?q=rust&_q=origin");
    }
}
