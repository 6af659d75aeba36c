use thiserror::Error;

use crate::descriptor::EscapeFix;
use crate::host::HostError;

/// Why a single descriptor could not be installed. The rest of the registry
/// still installs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterceptorInstallError {
    #[error("`{global_prop}`: {behaviour} cannot wrap a {found}")]
    KindMismatch {
        global_prop: String,
        behaviour: &'static str,
        found: &'static str,
    },

    #[error("`{global_prop}`: escape fix {fix:?} does not fit {behaviour}")]
    InvalidEscapeFix {
        global_prop: String,
        behaviour: &'static str,
        fix: EscapeFix,
    },

    #[error("`{global_prop}`: accessor has no {half}ter")]
    MissingAccessor {
        global_prop: String,
        half: &'static str,
    },

    #[error("`{global_prop}`: value hook failed")]
    ValueHook {
        global_prop: String,
        #[source]
        source: HostError,
    },
}

impl InterceptorInstallError {
    pub fn global_prop(&self) -> &str {
        match self {
            Self::KindMismatch { global_prop, .. }
            | Self::InvalidEscapeFix { global_prop, .. }
            | Self::MissingAccessor { global_prop, .. }
            | Self::ValueHook { global_prop, .. } => global_prop,
        }
    }
}
