//! The host capability table interceptors are installed into.
//!
//! Each entry is keyed by its dotted global path (`history.pushState`,
//! `XMLHttpRequest.prototype.open`, ...) and holds a plain value, an
//! accessor pair, a function or a constructor. Installing an interceptor
//! replaces the entry with a wrapper around the original.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Identity of a prototype object. Constructors keep theirs when wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtoId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct HostObject {
    pub proto: ProtoId,
    pub fields: BTreeMap<String, HostValue>,
}

impl HostObject {
    pub fn new(proto: ProtoId) -> Self {
        Self {
            proto,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: HostValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(HostObject),
}

impl HostValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("`{0}` is not defined")]
    NotFound(String),

    #[error("`{0}` is not a function")]
    NotCallable(String),

    #[error("`{0}` is not a constructor")]
    NotConstructible(String),

    #[error("`{0}` has no setter")]
    ReadOnly(String),

    #[error("`{0}` has no getter")]
    WriteOnly(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("blocked: {0}")]
    Blocked(String),
}

/// A native callable.
pub type NativeFn = Arc<dyn Fn(&[HostValue]) -> Result<HostValue, HostError> + Send + Sync>;

pub fn native<F>(f: F) -> NativeFn
where
    F: Fn(&[HostValue]) -> Result<HostValue, HostError> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Clone)]
pub enum Capability {
    Value(HostValue),
    Accessor {
        get: Option<NativeFn>,
        set: Option<NativeFn>,
    },
    Function(NativeFn),
    Constructor {
        proto: ProtoId,
        construct: NativeFn,
    },
}

impl Capability {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Capability::Value(_) => "value",
            Capability::Accessor { .. } => "accessor",
            Capability::Function(_) => "function",
            Capability::Constructor { .. } => "constructor",
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Capability::Accessor { get, set } => f
                .debug_struct("Accessor")
                .field("get", &get.is_some())
                .field("set", &set.is_some())
                .finish(),
            Capability::Function(_) => f.write_str("Function"),
            Capability::Constructor { proto, .. } => {
                f.debug_struct("Constructor").field("proto", proto).finish_non_exhaustive()
            }
        }
    }
}

/// The capability table of one execution context.
#[derive(Debug, Default, Clone)]
pub struct HostEnvironment {
    capabilities: HashMap<String, Capability>,
}

impl HostEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, path: impl Into<String>, capability: Capability) -> &mut Self {
        self.capabilities.insert(path.into(), capability);
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.capabilities.contains_key(path)
    }

    pub fn capability(&self, path: &str) -> Option<&Capability> {
        self.capabilities.get(path)
    }

    pub(crate) fn replace(&mut self, path: &str, capability: Capability) {
        self.capabilities.insert(path.to_string(), capability);
    }

    pub fn get(&self, path: &str) -> Result<HostValue, HostError> {
        match self.lookup(path)? {
            Capability::Value(v) => Ok(v.clone()),
            Capability::Accessor { get: Some(get), .. } => get(&[]),
            Capability::Accessor { get: None, .. } => Err(HostError::WriteOnly(path.to_string())),
            Capability::Function(_) | Capability::Constructor { .. } => {
                Err(HostError::Type(format!("`{path}` is not a data property")))
            }
        }
    }

    pub fn set(&mut self, path: &str, value: HostValue) -> Result<(), HostError> {
        if matches!(self.capabilities.get(path), Some(Capability::Value(_))) {
            self.replace(path, Capability::Value(value));
            return Ok(());
        }
        match self.lookup(path)? {
            Capability::Accessor { set: Some(set), .. } => set(&[value]).map(|_| ()),
            _ => Err(HostError::ReadOnly(path.to_string())),
        }
    }

    pub fn call(&self, path: &str, args: &[HostValue]) -> Result<HostValue, HostError> {
        match self.lookup(path)? {
            Capability::Function(f) => f(args),
            _ => Err(HostError::NotCallable(path.to_string())),
        }
    }

    pub fn construct(&self, path: &str, args: &[HostValue]) -> Result<HostValue, HostError> {
        match self.lookup(path)? {
            Capability::Constructor { construct, .. } => construct(args),
            _ => Err(HostError::NotConstructible(path.to_string())),
        }
    }

    pub fn prototype_of(&self, path: &str) -> Option<ProtoId> {
        match self.capabilities.get(path)? {
            Capability::Constructor { proto, .. } => Some(*proto),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    fn lookup(&self, path: &str) -> Result<&Capability, HostError> {
        self.capabilities
            .get(path)
            .ok_or_else(|| HostError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_and_accessor_round_trip() {
        let mut env = HostEnvironment::new();
        env.define("name", Capability::Value("a".into()));
        env.set("name", "b".into()).unwrap();
        assert_eq!(env.get("name").unwrap(), HostValue::from("b"));

        env.define(
            "ro",
            Capability::Accessor {
                get: Some(native(|_| Ok(HostValue::Bool(true)))),
                set: None,
            },
        );
        assert_eq!(env.get("ro").unwrap(), HostValue::Bool(true));
        assert_eq!(env.set("ro", HostValue::Null), Err(HostError::ReadOnly("ro".into())));
    }

    #[test]
    fn call_and_construct_check_kind() {
        let mut env = HostEnvironment::new();
        env.define("f", Capability::Function(native(|args| Ok(args[0].clone()))));
        env.define(
            "C",
            Capability::Constructor {
                proto: ProtoId(7),
                construct: native(|_| Ok(HostValue::Object(HostObject::new(ProtoId(7))))),
            },
        );

        assert_eq!(env.call("f", &["x".into()]).unwrap(), HostValue::from("x"));
        assert_eq!(env.call("C", &[]), Err(HostError::NotCallable("C".into())));
        assert_eq!(env.construct("f", &[]), Err(HostError::NotConstructible("f".into())));
        assert_eq!(env.prototype_of("C"), Some(ProtoId(7)));
        assert_eq!(env.call("missing", &[]), Err(HostError::NotFound("missing".into())));
    }
}
