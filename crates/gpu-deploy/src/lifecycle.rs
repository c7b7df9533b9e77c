//! Instance lifecycle shared by provider implementations.
//!
//! [`InstanceTable`] owns a provider's local view of its instances behind a
//! single mutex. Only lifecycle operations are exposed, so a terminate and a
//! concurrent read can never observe a half-updated record, and termination
//! stays a one-way transition.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::context::CallContext;
use crate::providers::{
    BillingStatus, CreateRequest, Instance, InstanceStatus, Offer, Provider, ProviderError,
};

/// Default polling interval for [`wait_until_running`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest interval [`wait_until_running`] sleeps between polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Hourly rate an instance created from `offer` is pinned to.
///
/// # Errors
/// Returns `SpotNotAvailable` if `spot` is requested and the offer has no spot price.
pub fn hourly_rate_for(offer: &Offer, spot: bool) -> Result<Decimal, ProviderError> {
    offer
        .price(spot)
        .ok_or_else(|| ProviderError::SpotNotAvailable(offer.offer_id.clone()))
}

/// A provider's table of known instances.
#[derive(Debug, Default)]
pub struct InstanceTable {
    instances: Mutex<HashMap<String, Instance>>,
}

impl InstanceTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instance>> {
        // Every mutation completes inside one statement, so a poisoned map is still consistent.
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and record an instance for `req` from the matched `offer`.
    ///
    /// # Errors
    /// Returns `SpotNotAvailable` if spot pricing was requested but the offer has none.
    pub fn create(
        &self,
        provider: &str,
        offer: &Offer,
        req: &CreateRequest,
        status: InstanceStatus,
    ) -> Result<Instance, ProviderError> {
        let hourly_rate = hourly_rate_for(offer, req.spot)?;
        let instance = Instance {
            id: format!("{provider}-{}", uuid::Uuid::new_v4()),
            provider: provider.to_string(),
            status,
            gpu: offer.gpu.clone(),
            region: offer.region.clone(),
            hourly_rate,
            spot: req.spot,
            public_ip: None,
            created_at: Utc::now(),
        };
        self.lock().insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    /// Record an instance as-is, replacing any existing entry with the same ID.
    pub fn insert(&self, instance: Instance) {
        self.lock().insert(instance.id.clone(), instance);
    }

    /// Look up an instance.
    ///
    /// # Errors
    /// Returns `InstanceNotFound` for IDs this table has never seen.
    pub fn get(&self, id: &str) -> Result<Instance, ProviderError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::InstanceNotFound(id.to_string()))
    }

    /// Mark an instance terminated.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// instance was already terminated or is unknown.
    pub fn terminate(&self, id: &str) -> bool {
        match self.lock().get_mut(id) {
            Some(instance) if instance.status != InstanceStatus::Terminated => {
                instance.status = InstanceStatus::Terminated;
                true
            }
            _ => false,
        }
    }

    /// Billing status derived from local status: `Active` while billable,
    /// `Stopped` otherwise, including for unknown IDs.
    #[must_use]
    pub fn billing_status(&self, id: &str) -> BillingStatus {
        match self.lock().get(id) {
            Some(instance) if instance.status.is_billable() => BillingStatus::Active,
            _ => BillingStatus::Stopped,
        }
    }

    /// Override an instance's status (administrative / test use).
    ///
    /// # Errors
    /// Returns `InstanceNotFound` for unknown IDs.
    pub fn set_status(&self, id: &str, status: InstanceStatus) -> Result<(), ProviderError> {
        let mut instances = self.lock();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| ProviderError::InstanceNotFound(id.to_string()))?;
        instance.status = status;
        Ok(())
    }

    /// Set an instance's public IP once the vendor assigns one.
    ///
    /// # Errors
    /// Returns `InstanceNotFound` for unknown IDs.
    pub fn set_public_ip(&self, id: &str, ip: impl Into<String>) -> Result<(), ProviderError> {
        let mut instances = self.lock();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| ProviderError::InstanceNotFound(id.to_string()))?;
        instance.public_ip = Some(ip.into());
        Ok(())
    }

    /// Number of known instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every instance.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Poll `get_instance` until the instance leaves `Pending`.
///
/// `poll_interval` is raised to at least [`MIN_POLL_INTERVAL`], so a zero
/// interval still yields to the runtime between polls.
///
/// # Errors
/// Returns `DeadlineExceeded`/`Cancelled` when `ctx` fires, the provider's
/// error if a poll fails, or `Transport` if the instance ends up
/// `Terminated` or `Error` instead of `Running`.
pub async fn wait_until_running<P>(
    provider: &P,
    ctx: &CallContext,
    id: &str,
    poll_interval: Duration,
) -> Result<Instance, ProviderError>
where
    P: Provider + ?Sized,
{
    let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
    loop {
        let instance = provider.get_instance(ctx, id).await?;
        match instance.status {
            InstanceStatus::Running => return Ok(instance),
            InstanceStatus::Pending => ctx.sleep(poll_interval).await?,
            status => {
                return Err(ProviderError::Transport(format!(
                    "instance {id} became {status} while provisioning"
                )))
            }
        }
    }
}
