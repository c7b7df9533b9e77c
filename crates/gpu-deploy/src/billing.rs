//! Billing reconciliation after teardown.
//!
//! Terminating an instance does not prove the vendor stopped charging for
//! it. After a successful terminate the caller reconciles: providers that
//! cannot verify billing produce a [`ManualVerification`] pointing the
//! operator at the vendor console, the rest are asked for their billing
//! status. Retrying while billing is still active is up to the caller.

use serde::{Deserialize, Serialize};

use crate::context::CallContext;
use crate::providers::{BillingStatus, Provider, ProviderError};

/// Instruction to confirm billing out-of-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualVerification {
    /// Whether the operator has to check by hand.
    pub required: bool,
    /// Provider name.
    pub provider: String,
    /// Console to check.
    #[serde(rename = "consoleURL")]
    pub console_url: String,
}

/// Outcome of reconciling billing for a terminated instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The provider confirmed billing stopped.
    Stopped,
    /// The provider still reports the instance as billing; retry later.
    StillActive,
    /// The provider could not report a status; safety cannot be asserted.
    Unverifiable,
    /// The provider cannot verify billing at all.
    ManualVerificationRequired(ManualVerification),
}

impl Reconciliation {
    /// Whether re-checking cannot change the outcome.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::StillActive)
    }

    /// Whether billing is confirmed stopped.
    #[must_use]
    pub fn is_confirmed_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// The manual verification instruction, if one is required.
    #[must_use]
    pub fn manual_verification(&self) -> Option<&ManualVerification> {
        match self {
            Self::ManualVerificationRequired(m) => Some(m),
            _ => None,
        }
    }
}

impl std::fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::StillActive => write!(f, "still_active"),
            Self::Unverifiable => write!(f, "unverifiable"),
            Self::ManualVerificationRequired(_) => write!(f, "manual_verification_required"),
        }
    }
}

/// Whether `provider` needs the operator to confirm billing by hand.
#[must_use]
pub fn check_manual_verification<P>(provider: &P) -> ManualVerification
where
    P: Provider + ?Sized,
{
    ManualVerification {
        required: !provider.supports_billing_verification(),
        provider: provider.name().to_string(),
        console_url: provider.console_url().to_string(),
    }
}

/// Map a reported billing status to a reconciliation outcome.
#[must_use]
pub fn classify(status: BillingStatus) -> Reconciliation {
    match status {
        BillingStatus::Stopped => Reconciliation::Stopped,
        BillingStatus::Active => Reconciliation::StillActive,
        BillingStatus::Unknown => Reconciliation::Unverifiable,
    }
}

/// Reconcile billing for instance `id` after it has been terminated.
///
/// Makes at most one billing call.
///
/// # Errors
/// Propagates the provider's error from `get_billing_status` unchanged.
pub async fn reconcile<P>(
    provider: &P,
    ctx: &CallContext,
    id: &str,
) -> Result<Reconciliation, ProviderError>
where
    P: Provider + ?Sized,
{
    let manual = check_manual_verification(provider);
    if manual.required {
        return Ok(Reconciliation::ManualVerificationRequired(manual));
    }
    let status = provider.get_billing_status(ctx, id).await?;
    Ok(classify(status))
}
