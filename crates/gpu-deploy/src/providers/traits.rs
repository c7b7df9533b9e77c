//! Provider trait and common types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::CallContext;

/// Errors that can occur during provider operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The requested offer is not in the provider's catalog.
    #[error("Offer not found: {0}")]
    OfferNotFound(String),

    /// Spot pricing was requested for an offer that has none.
    #[error("Spot pricing not available for offer: {0}")]
    SpotNotAvailable(String),

    /// The instance is unknown to this provider.
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Credentials were rejected.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The vendor has no capacity for the requested offer.
    #[error("Insufficient capacity: {0}")]
    InsufficientCapacity(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// The call's deadline elapsed before it completed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The call was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// Unclassified vendor or transport failure.
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Fieldless discriminant of [`ProviderError`], for branching without matching payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No offer with the requested ID.
    OfferNotFound,
    /// Spot pricing requested on an offer without it.
    SpotNotAvailable,
    /// No instance with the requested ID.
    InstanceNotFound,
    /// Credential rejected.
    AuthenticationFailed,
    /// Vendor has no capacity for the request.
    InsufficientCapacity,
    /// Vendor is throttling requests.
    RateLimited,
    /// The call's deadline elapsed.
    DeadlineExceeded,
    /// The call was cancelled.
    Cancelled,
    /// Any other failure talking to the vendor.
    Transport,
}

impl ProviderError {
    /// The kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OfferNotFound(_) => ErrorKind::OfferNotFound,
            Self::SpotNotAvailable(_) => ErrorKind::SpotNotAvailable,
            Self::InstanceNotFound(_) => ErrorKind::InstanceNotFound,
            Self::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            Self::InsufficientCapacity(_) => ErrorKind::InsufficientCapacity,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Whether the error came from the caller's context rather than the vendor.
    #[must_use]
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::Cancelled)
    }
}

/// Instance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Vendor is still provisioning the instance.
    Pending,
    /// Instance is running and billable.
    Running,
    /// Instance has been terminated.
    Terminated,
    /// Instance failed on the vendor side.
    Error,
}

impl InstanceStatus {
    /// Whether the vendor is (or may be) charging for the instance.
    #[must_use]
    pub fn is_billable(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Terminated => write!(f, "terminated"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Billing status as reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    /// The instance is accruing cost.
    Active,
    /// The instance is not accruing cost.
    Stopped,
    /// The vendor could not say.
    Unknown,
}

impl std::fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Stopped => write!(f, "stopped"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A priced compute slot advertised by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    /// Offer ID, unique within one catalog query.
    #[serde(rename = "offerID")]
    pub offer_id: String,
    /// Provider name.
    pub provider: String,
    /// GPU model (e.g., "A100 40GB", "H100 80GB").
    pub gpu: String,
    /// GPU memory in GB.
    #[serde(rename = "vram")]
    pub vram_gb: u32,
    /// Region the offer is bound to.
    pub region: String,
    /// On-demand hourly price.
    pub on_demand_price: Decimal,
    /// Spot hourly price, if the offer can run as spot.
    pub spot_price: Option<Decimal>,
    /// Storage price per GB-month.
    pub storage_price: Decimal,
    /// Egress price per GB.
    pub egress_price: Decimal,
    /// Whether the offer can currently be rented.
    pub available: bool,
}

impl Offer {
    /// Hourly price for the requested pricing mode, if the offer supports it.
    #[must_use]
    pub fn price(&self, spot: bool) -> Option<Decimal> {
        if spot {
            self.spot_price
        } else {
            Some(self.on_demand_price)
        }
    }
}

/// Criteria for narrowing an offer catalog. Absent or zero fields impose no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferFilter {
    /// Exact GPU model.
    pub gpu_type: Option<String>,
    /// Exact region.
    pub region: Option<String>,
    /// Only offers with a spot price.
    pub spot_only: bool,
    /// Minimum GPU memory in GB.
    #[serde(rename = "minVRAM")]
    pub min_vram_gb: u32,
}

/// Request to create a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    /// Offer to rent.
    #[serde(rename = "offerID")]
    pub offer_id: String,
    /// Rent at the spot price.
    pub spot: bool,
    /// Cloud-init user data.
    pub cloud_init: String,
    /// Boot disk size in GB.
    #[serde(rename = "diskSizeGB")]
    pub disk_size_gb: u32,
}

/// A rented instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Unique instance identifier.
    pub id: String,
    /// Provider name.
    pub provider: String,
    /// Current status.
    pub status: InstanceStatus,
    /// GPU model.
    pub gpu: String,
    /// Region.
    pub region: String,
    /// Hourly rate, fixed at creation.
    pub hourly_rate: Decimal,
    /// Whether the instance runs at the spot price.
    pub spot: bool,
    /// Public IP address, once assigned.
    #[serde(rename = "publicIP")]
    pub public_ip: Option<String>,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
}

/// Result of a credential probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    /// Whether the credential is valid.
    pub valid: bool,
    /// Account email.
    pub email: String,
    /// Account balance, when the vendor exposes it.
    pub balance: Option<Decimal>,
    /// Currency of `balance`.
    pub balance_currency: String,
}

/// Trait for GPU cloud providers.
///
/// Every network-facing operation takes a [`CallContext`] and must fail with
/// [`ProviderError::DeadlineExceeded`] or [`ProviderError::Cancelled`] as soon
/// as the context fires, even if the underlying call would later succeed.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Web console where an operator can inspect billing by hand.
    fn console_url(&self) -> &str;

    /// Whether this vendor's billing status is known to reflect termination.
    ///
    /// A static capability, not a network call.
    fn supports_billing_verification(&self) -> bool;

    /// List available offers matching `filter`, in catalog order.
    async fn get_offers(
        &self,
        ctx: &CallContext,
        filter: &OfferFilter,
    ) -> Result<Vec<Offer>, ProviderError>;

    /// Create a new instance from an offer.
    ///
    /// The returned instance may be `Pending` on vendors that provision
    /// asynchronously.
    async fn create_instance(
        &self,
        ctx: &CallContext,
        req: &CreateRequest,
    ) -> Result<Instance, ProviderError>;

    /// Get an instance by ID.
    async fn get_instance(&self, ctx: &CallContext, id: &str) -> Result<Instance, ProviderError>;

    /// Terminate an instance.
    ///
    /// Succeeds for instances that are already terminated or unknown.
    async fn terminate_instance(&self, ctx: &CallContext, id: &str) -> Result<(), ProviderError>;

    /// Billing status of an instance. Unknown or terminated IDs are `Stopped`.
    ///
    /// `Pending` instances report `Active` as well as `Running` ones, unlike
    /// a plain "active iff running" rule: vendors bill from allocation, not
    /// from boot.
    async fn get_billing_status(
        &self,
        ctx: &CallContext,
        id: &str,
    ) -> Result<BillingStatus, ProviderError>;

    /// Probe the configured credential.
    async fn validate_api_key(&self, ctx: &CallContext) -> Result<AccountInfo, ProviderError>;
}
