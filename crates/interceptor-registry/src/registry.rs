use crate::bundles;
use crate::descriptor::InterceptorDescriptor;

/// Which optional bundles to register on top of the core bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSelection {
    pub special_interception_features: Vec<String>,
    pub browser_extras: Vec<String>,
    pub os_extras: Vec<String>,
}

/// Ordered descriptor list. Registering a descriptor whose `global_prop` is
/// already present replaces the earlier one and moves it to the end. A getter
/// and a setter on the same accessor are distinct entries.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<InterceptorDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Core bundle, then special features, browser extras and OS extras, each
    /// in the order given. Unknown bundle names are logged and skipped.
    pub fn from_features(selection: &FeatureSelection) -> Self {
        let mut registry = Self::new();
        registry.extend(bundles::core());

        let groups: [(&str, &[String], fn(&str) -> Option<Vec<InterceptorDescriptor>>); 3] = [
            (
                "special_interception_features",
                &selection.special_interception_features,
                bundles::special_feature,
            ),
            ("browser_extras", &selection.browser_extras, bundles::browser_extra),
            ("os_extras", &selection.os_extras, bundles::os_extra),
        ];

        for (group, names, lookup) in groups {
            for name in names {
                match lookup(name) {
                    Some(descriptors) => {
                        tracing::debug!(group, bundle = %name, count = descriptors.len(), "bundle registered");
                        registry.extend(descriptors);
                    }
                    None => tracing::warn!(group, bundle = %name, "unknown interception bundle ignored"),
                }
            }
        }

        registry
    }

    pub fn register(&mut self, descriptor: InterceptorDescriptor) {
        if let Some(idx) = self
            .entries
            .iter()
            .position(|d| {
                d.global_prop == descriptor.global_prop && d.wrap.slot().overlaps(descriptor.wrap.slot())
            })
        {
            let replaced = self.entries.remove(idx);
            tracing::warn!(
                global_prop = %descriptor.global_prop,
                previous = replaced.wrap.name(),
                replacement = descriptor.wrap.name(),
                "duplicate interceptor; later registration wins"
            );
        }
        self.entries.push(descriptor);
    }

    pub fn extend(&mut self, descriptors: impl IntoIterator<Item = InterceptorDescriptor>) {
        for d in descriptors {
            self.register(d);
        }
    }

    pub fn get(&self, global_prop: &str) -> Option<&InterceptorDescriptor> {
        self.entries.iter().find(|d| d.global_prop == global_prop)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterceptorDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExposedContexts;
    use crate::descriptor::EscapeFix;
    use url_rewrite::UrlForm;

    #[test]
    fn last_write_wins_and_moves_to_end() {
        let mut r = Registry::new();
        r.register(InterceptorDescriptor::call("open").fix(EscapeFix::param(0, UrlForm::Full)));
        r.register(InterceptorDescriptor::call("fetch"));
        r.register(
            InterceptorDescriptor::call("open")
                .exposed_in(ExposedContexts::WINDOW)
                .fix(EscapeFix::param(0, UrlForm::Relative)),
        );

        let order: Vec<&str> = r.iter().map(|d| d.global_prop.as_str()).collect();
        assert_eq!(order, vec!["fetch", "open"]);
        let open = r.get("open").unwrap();
        assert_eq!(open.exposed, ExposedContexts::WINDOW);
        assert_eq!(open.escape_fixes, vec![EscapeFix::param(0, UrlForm::Relative)]);
    }

    #[test]
    fn getter_and_setter_coexist() {
        let mut r = Registry::new();
        r.register(InterceptorDescriptor::getter("document.cookie"));
        r.register(InterceptorDescriptor::setter_with("document.cookie", |_, v| Ok(v)));
        assert_eq!(r.len(), 2);
        r.register(InterceptorDescriptor::call("document.cookie"));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn core_bundle_is_always_present() {
        let r = Registry::from_features(&FeatureSelection::default());
        assert!(r.get("open").is_some());
        assert!(r.get("history.pushState").is_some());
        assert!(r.get("navigator.serviceWorker.register").is_none());
    }

    #[test]
    fn selected_bundles_register_in_order() {
        let selection = FeatureSelection {
            special_interception_features: vec!["serviceWorker".into(), "bogus".into()],
            browser_extras: vec!["chromium".into()],
            os_extras: vec!["android".into()],
        };
        let r = Registry::from_features(&selection);
        assert!(r.get("navigator.serviceWorker.register").is_some());
        assert!(r.get("navigation.navigate").is_some());
        assert!(r.get("navigator.share").is_some());

        let core_len = Registry::from_features(&FeatureSelection::default()).len();
        assert!(r.len() > core_len);
        let last = r.iter().last().unwrap();
        assert_eq!(last.global_prop, "navigator.share");
    }
}
