//! Per-context filtering and installation of registered descriptors.
//!
//! The dispatcher walks the registry once when a context starts:
//!
//! ```text
//! Registered ──► Eligible ──► Installed ──► Active
//!      │             │
//!      ▼             ▼
//!   Excluded       Failed
//! ```
//!
//! Every descriptor is evaluated independently. A failed install is reported
//! to the fault sink and leaves the original capability in place; nothing is
//! marked `Active` until the whole registry has been processed.

use std::fmt;
use std::sync::Arc;

use fault_log::FaultSink;

use crate::context::{ContextKind, PlatformSupport};
use crate::descriptor::{EscapeFix, EscapeTarget, InterceptCx, InterceptorDescriptor, WrapSpec};
use crate::error::InterceptorInstallError;
use crate::host::{Capability, HostEnvironment, HostError, HostValue, NativeFn};
use crate::registry::Registry;

pub const COMPONENT: &str = "interceptor-registry";

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Why a descriptor was not installed in this context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    Skipped,
    NotExposed,
    Unsupported,
    MissingCapability,
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Exclusion::Skipped => "marked skip",
            Exclusion::NotExposed => "not exposed in this context",
            Exclusion::Unsupported => "platform support does not match",
            Exclusion::MissingCapability => "capability absent from host",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorState {
    Registered,
    Eligible,
    Excluded(Exclusion),
    Installed,
    Active,
    Failed(InterceptorInstallError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstallRecord {
    pub global_prop: String,
    pub behaviour: &'static str,
    pub state: DescriptorState,
}

/// Outcome of one [`Dispatcher::install`] run, in registry order.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    records: Vec<InstallRecord>,
}

impl InstallReport {
    pub fn records(&self) -> &[InstallRecord] {
        &self.records
    }

    /// State of the first record for `global_prop`.
    pub fn state_of(&self, global_prop: &str) -> Option<&DescriptorState> {
        self.records
            .iter()
            .find(|r| r.global_prop == global_prop)
            .map(|r| &r.state)
    }

    pub fn active(&self) -> impl Iterator<Item = &InstallRecord> {
        self.records
            .iter()
            .filter(|r| r.state == DescriptorState::Active)
    }

    pub fn failed(&self) -> impl Iterator<Item = &InstallRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.state, DescriptorState::Failed(_)))
    }

    pub fn excluded(&self) -> impl Iterator<Item = &InstallRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.state, DescriptorState::Excluded(_)))
    }

    pub fn is_clean(&self) -> bool {
        self.failed().next().is_none()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Dispatcher {
    kind: ContextKind,
    platform: PlatformSupport,
    faults: FaultSink,
}

impl Dispatcher {
    pub fn new(kind: ContextKind, faults: FaultSink) -> Self {
        Self {
            kind,
            platform: PlatformSupport::new(),
            faults,
        }
    }

    pub fn with_platform(mut self, platform: PlatformSupport) -> Self {
        self.platform = platform;
        self
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// `Ok` when `descriptor` should be installed into `env`.
    pub fn eligibility(
        &self,
        descriptor: &InterceptorDescriptor,
        env: &HostEnvironment,
    ) -> Result<(), Exclusion> {
        if descriptor.skip {
            return Err(Exclusion::Skipped);
        }
        if !descriptor.exposed.contains(self.kind) {
            return Err(Exclusion::NotExposed);
        }
        if let Some(reported) = self.platform.get(&descriptor.global_prop) {
            if !descriptor.supports.intersects(reported) {
                return Err(Exclusion::Unsupported);
            }
        }
        if !env.contains(&descriptor.global_prop) {
            return Err(Exclusion::MissingCapability);
        }
        Ok(())
    }

    /// Install every eligible descriptor of `registry` into `env`.
    pub fn install(
        &self,
        registry: &Registry,
        env: &mut HostEnvironment,
        cx: Arc<InterceptCx>,
    ) -> InstallReport {
        let mut records: Vec<InstallRecord> = registry
            .iter()
            .map(|d| InstallRecord {
                global_prop: d.global_prop.clone(),
                behaviour: d.wrap.name(),
                state: DescriptorState::Registered,
            })
            .collect();

        for (descriptor, record) in registry.iter().zip(records.iter_mut()) {
            record.state = match self.eligibility(descriptor, env) {
                Ok(()) => DescriptorState::Eligible,
                Err(reason) => {
                    tracing::debug!(
                        context = %self.kind,
                        global_prop = %descriptor.global_prop,
                        %reason,
                        "interceptor excluded"
                    );
                    DescriptorState::Excluded(reason)
                }
            };
        }

        for (descriptor, record) in registry.iter().zip(records.iter_mut()) {
            if record.state != DescriptorState::Eligible {
                continue;
            }
            record.state = match self.install_one(descriptor, env, &cx) {
                Ok(()) => DescriptorState::Installed,
                Err(err) => {
                    self.faults.report(
                        COMPONENT,
                        format!("interceptor for `{}` not installed", descriptor.global_prop),
                        Some(&err),
                    );
                    DescriptorState::Failed(err)
                }
            };
        }

        for record in &mut records {
            if record.state == DescriptorState::Installed {
                record.state = DescriptorState::Active;
            }
        }

        let report = InstallReport { records };
        tracing::info!(
            context = %self.kind,
            active = report.active().count(),
            excluded = report.excluded().count(),
            failed = report.failed().count(),
            "interceptors installed"
        );
        report
    }

    fn install_one(
        &self,
        descriptor: &InterceptorDescriptor,
        env: &mut HostEnvironment,
        cx: &Arc<InterceptCx>,
    ) -> Result<(), InterceptorInstallError> {
        let prop = &descriptor.global_prop;
        if let Some(fix) = descriptor
            .escape_fixes
            .iter()
            .find(|fix| !descriptor.wrap.accepts(fix))
        {
            return Err(InterceptorInstallError::InvalidEscapeFix {
                global_prop: prop.clone(),
                behaviour: descriptor.wrap.name(),
                fix: *fix,
            });
        }

        // Eligibility already checked presence.
        let Some(current) = env.capability(prop) else {
            return Ok(());
        };
        let wrapped = wrap(descriptor, current, cx)?;
        env.replace(prop, wrapped);
        tracing::debug!(context = %self.kind, global_prop = %prop, behaviour = descriptor.wrap.name(), "interceptor installed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wrapping
// ---------------------------------------------------------------------------

fn wrap(
    descriptor: &InterceptorDescriptor,
    current: &Capability,
    cx: &Arc<InterceptCx>,
) -> Result<Capability, InterceptorInstallError> {
    let prop = &descriptor.global_prop;
    let fixes = descriptor.escape_fixes.clone();
    let mismatch = || InterceptorInstallError::KindMismatch {
        global_prop: prop.clone(),
        behaviour: descriptor.wrap.name(),
        found: current.kind_name(),
    };

    match (descriptor.wrap, current) {
        (WrapSpec::Value(hook), Capability::Value(original)) => {
            let decoded = decode_return(cx, &fixes, original.clone());
            hook(cx, decoded)
                .map(Capability::Value)
                .map_err(|source| InterceptorInstallError::ValueHook {
                    global_prop: prop.clone(),
                    source,
                })
        }

        (WrapSpec::Call(hook), Capability::Function(original)) => {
            let original = original.clone();
            let cx = Arc::clone(cx);
            Ok(Capability::Function(Arc::new(move |args: &[HostValue]| -> Result<HostValue, HostError> {
                let args = encode_params(&cx, &fixes, EscapeTarget::Param, args);
                let out = match hook {
                    Some(hook) => hook(&cx, &original, args)?,
                    None => original(&args)?,
                };
                Ok(decode_return(&cx, &fixes, out))
            })))
        }

        (WrapSpec::Construction(hook), Capability::Constructor { proto, construct }) => {
            let original = construct.clone();
            let cx = Arc::clone(cx);
            let construct: NativeFn = Arc::new(move |args: &[HostValue]| -> Result<HostValue, HostError> {
                let args = encode_params(&cx, &fixes, EscapeTarget::ConstructorParam, args);
                match hook {
                    Some(hook) => hook(&cx, &original, args),
                    None => original(&args),
                }
            });
            Ok(Capability::Constructor {
                proto: *proto,
                construct,
            })
        }

        (WrapSpec::Getter(hook), Capability::Accessor { get, set }) => {
            let Some(original) = get.clone() else {
                return Err(InterceptorInstallError::MissingAccessor {
                    global_prop: prop.clone(),
                    half: "get",
                });
            };
            let cx = Arc::clone(cx);
            let get: NativeFn = Arc::new(move |args: &[HostValue]| -> Result<HostValue, HostError> {
                let value = decode_return(&cx, &fixes, original(args)?);
                match hook {
                    Some(hook) => hook(&cx, value),
                    None => Ok(value),
                }
            });
            Ok(Capability::Accessor {
                get: Some(get),
                set: set.clone(),
            })
        }

        (WrapSpec::Setter(hook), Capability::Accessor { get, set }) => {
            let Some(original) = set.clone() else {
                return Err(InterceptorInstallError::MissingAccessor {
                    global_prop: prop.clone(),
                    half: "set",
                });
            };
            let cx = Arc::clone(cx);
            let set: NativeFn = Arc::new(move |args: &[HostValue]| -> Result<HostValue, HostError> {
                let mut args = encode_params(&cx, &fixes, EscapeTarget::Param, args);
                if args.is_empty() {
                    args.push(HostValue::Undefined);
                }
                if let Some(hook) = hook {
                    let incoming = std::mem::take(&mut args[0]);
                    args[0] = hook(&cx, incoming)?;
                }
                original(&args)
            });
            Ok(Capability::Accessor {
                get: get.clone(),
                set: Some(set),
            })
        }

        _ => Err(mismatch()),
    }
}

/// Real → proxy for every argument named by a fix of `target`.
fn encode_params(
    cx: &InterceptCx,
    fixes: &[EscapeFix],
    target: EscapeTarget,
    args: &[HostValue],
) -> Vec<HostValue> {
    let mut args = args.to_vec();
    for fix in fixes.iter().filter(|f| f.targeting == target) {
        if let Some(arg) = fix.position.and_then(|pos| args.get_mut(pos)) {
            let value = std::mem::take(arg);
            *arg = cx.encode(value, fix.kind);
        }
    }
    args
}

/// Proxy → real for a produced value, once per return fix.
fn decode_return(cx: &InterceptCx, fixes: &[EscapeFix], mut value: HostValue) -> HostValue {
    for fix in fixes.iter().filter(|f| f.targeting == EscapeTarget::Return) {
        value = cx.decode(value, fix.kind);
    }
    value
}
