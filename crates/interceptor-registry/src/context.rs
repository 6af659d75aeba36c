use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// The kind of execution context a dispatcher runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextKind {
    Window,
    DedicatedWorker,
    SharedWorker,
    ServiceWorker,
}

impl ContextKind {
    fn bit(self) -> u8 {
        match self {
            ContextKind::Window => 1,
            ContextKind::DedicatedWorker => 1 << 1,
            ContextKind::SharedWorker => 1 << 2,
            ContextKind::ServiceWorker => 1 << 3,
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContextKind::Window => "window",
            ContextKind::DedicatedWorker => "dedicated-worker",
            ContextKind::SharedWorker => "shared-worker",
            ContextKind::ServiceWorker => "service-worker",
        })
    }
}

/// Set of context kinds a capability is exposed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExposedContexts(u8);

impl ExposedContexts {
    pub const WINDOW: Self = Self(1);
    pub const DEDICATED_WORKER: Self = Self(1 << 1);
    pub const SHARED_WORKER: Self = Self(1 << 2);
    pub const SERVICE_WORKER: Self = Self(1 << 3);
    /// Every worker kind.
    pub const WORKERS: Self = Self(0b1110);
    pub const NOT_SERVICE_WORKER: Self = Self(0b0111);
    pub const ALL: Self = Self(0b1111);

    pub fn contains(self, kind: ContextKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

impl BitOr for ExposedContexts {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Standardisation status of a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SupportLevel {
    Draft,
    Shipping,
    WidelyAvailable,
    Deprecated,
    Nonstandard,
}

/// Bitset of [`SupportLevel`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Supports(u8);

impl Supports {
    pub const NONE: Self = Self(0);
    pub const DRAFT: Self = Self(1);
    pub const SHIPPING: Self = Self(1 << 1);
    pub const WIDELY_AVAILABLE: Self = Self(1 << 2);
    pub const DEPRECATED: Self = Self(1 << 3);
    pub const NONSTANDARD: Self = Self(1 << 4);
    /// Anything a browser might still ship.
    pub const ANY: Self = Self(0b1_1111);

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Supports {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<SupportLevel> for Supports {
    fn from(level: SupportLevel) -> Self {
        match level {
            SupportLevel::Draft => Supports::DRAFT,
            SupportLevel::Shipping => Supports::SHIPPING,
            SupportLevel::WidelyAvailable => Supports::WIDELY_AVAILABLE,
            SupportLevel::Deprecated => Supports::DEPRECATED,
            SupportLevel::Nonstandard => Supports::NONSTANDARD,
        }
    }
}

impl FromIterator<SupportLevel> for Supports {
    fn from_iter<T: IntoIterator<Item = SupportLevel>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Supports::NONE, |acc, level| acc | level.into())
    }
}

/// What the platform reports about each capability, keyed by global path.
/// Capabilities without an entry are treated as supported.
#[derive(Debug, Clone, Default)]
pub struct PlatformSupport {
    reported: HashMap<String, Supports>,
}

impl PlatformSupport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, global_prop: impl Into<String>, supports: Supports) -> &mut Self {
        self.reported.insert(global_prop.into(), supports);
        self
    }

    pub fn get(&self, global_prop: &str) -> Option<Supports> {
        self.reported.get(global_prop).copied()
    }
}

impl<K, I> FromIterator<(K, I)> for PlatformSupport
where
    K: Into<String>,
    I: IntoIterator<Item = SupportLevel>,
{
    fn from_iter<T: IntoIterator<Item = (K, I)>>(iter: T) -> Self {
        let mut support = Self::new();
        for (prop, levels) in iter {
            support.report(prop, levels.into_iter().collect());
        }
        support
    }
}
