//! In-memory reference provider.
//!
//! [`MockProvider`] implements the [`Provider`] contract over an in-memory
//! catalog and instance table. It doubles as a deterministic test double:
//! any operation can be forced to fail or slowed down, every call is
//! recorded, and the instance table can be seeded directly.
//!
//! ## Example
//!
//! ```ignore
//! use gpu_deploy::providers::mock::{MockConfig, MockProvider, Operation};
//! use gpu_deploy::{CallContext, NoopLogger, ProviderError};
//!
//! let provider = MockProvider::new(MockConfig::default(), NoopLogger::shared());
//! provider.set_error(Operation::CreateInstance, ProviderError::InsufficientCapacity("a100".into()));
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::traits::{
    AccountInfo, BillingStatus, CreateRequest, Instance, InstanceStatus, Offer, OfferFilter,
    Provider, ProviderError,
};
use crate::context::CallContext;
use crate::lifecycle::InstanceTable;
use crate::logging::{Logger, NoopLogger};
use crate::offers::filter_offers;

/// Default provider name.
pub const DEFAULT_NAME: &str = "mock";

/// Default console URL.
pub const DEFAULT_CONSOLE_URL: &str = "https://console.mock.example.com/billing";

/// Provider operations, for error/delay injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `get_offers`
    GetOffers,
    /// `create_instance`
    CreateInstance,
    /// `get_instance`
    GetInstance,
    /// `terminate_instance`
    TerminateInstance,
    /// `get_billing_status`
    GetBillingStatus,
    /// `validate_api_key`
    ValidateApiKey,
}

/// A recorded provider call and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    /// Offer listing with its filter.
    GetOffers(OfferFilter),
    /// Instance creation with its request.
    CreateInstance(CreateRequest),
    /// Instance lookup by ID.
    GetInstance(String),
    /// Termination by ID.
    TerminateInstance(String),
    /// Billing check by ID.
    GetBillingStatus(String),
    /// Credential check.
    ValidateApiKey,
}

impl RecordedCall {
    /// The operation this call was made to.
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::GetOffers(_) => Operation::GetOffers,
            Self::CreateInstance(_) => Operation::CreateInstance,
            Self::GetInstance(_) => Operation::GetInstance,
            Self::TerminateInstance(_) => Operation::TerminateInstance,
            Self::GetBillingStatus(_) => Operation::GetBillingStatus,
            Self::ValidateApiKey => Operation::ValidateApiKey,
        }
    }
}

/// Reference provider configuration.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Provider name.
    pub name: String,
    /// Console URL for manual billing checks.
    pub console_url: String,
    /// Offer catalog, in the order offers are returned.
    pub offers: Vec<Offer>,
    /// Whether billing status can be trusted after termination.
    pub supports_billing_verification: bool,
    /// Account returned by `validate_api_key`; `None` uses [`default_account`].
    pub account_info: Option<AccountInfo>,
    /// Errors injected per operation.
    pub errors: HashMap<Operation, ProviderError>,
    /// Delays injected per operation.
    pub delays: HashMap<Operation, Duration>,
    /// Status new instances start in.
    pub initial_status: InstanceStatus,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            console_url: DEFAULT_CONSOLE_URL.to_string(),
            offers: default_offers(),
            supports_billing_verification: true,
            account_info: None,
            errors: HashMap::new(),
            delays: HashMap::new(),
            initial_status: InstanceStatus::Running,
        }
    }
}

/// The built-in catalog: two available offers (one with spot pricing) and one
/// unavailable offer.
#[must_use]
pub fn default_offers() -> Vec<Offer> {
    vec![
        Offer {
            offer_id: "mock-a100-40gb".to_string(),
            provider: DEFAULT_NAME.to_string(),
            gpu: "A100 40GB".to_string(),
            vram_gb: 40,
            region: "us-east-1".to_string(),
            on_demand_price: Decimal::new(100, 2),
            spot_price: None,
            storage_price: Decimal::new(10, 2),
            egress_price: Decimal::new(1, 2),
            available: true,
        },
        Offer {
            offer_id: "mock-h100-80gb".to_string(),
            provider: DEFAULT_NAME.to_string(),
            gpu: "H100 80GB".to_string(),
            vram_gb: 80,
            region: "us-west-2".to_string(),
            on_demand_price: Decimal::new(250, 2),
            spot_price: Some(Decimal::new(125, 2)),
            storage_price: Decimal::new(10, 2),
            egress_price: Decimal::new(1, 2),
            available: true,
        },
        Offer {
            offer_id: "mock-l40s-48gb".to_string(),
            provider: DEFAULT_NAME.to_string(),
            gpu: "L40S 48GB".to_string(),
            vram_gb: 48,
            region: "eu-central-1".to_string(),
            on_demand_price: Decimal::new(90, 2),
            spot_price: Some(Decimal::new(45, 2)),
            storage_price: Decimal::new(8, 2),
            egress_price: Decimal::new(1, 2),
            available: false,
        },
    ]
}

/// Account returned when no override is configured.
#[must_use]
pub fn default_account() -> AccountInfo {
    AccountInfo {
        valid: true,
        email: "mock@example.com".to_string(),
        balance: Some(Decimal::new(10000, 2)),
        balance_currency: "USD".to_string(),
    }
}

#[derive(Debug, Default)]
struct Controls {
    errors: HashMap<Operation, ProviderError>,
    delays: HashMap<Operation, Duration>,
    calls: Vec<RecordedCall>,
    counts: HashMap<Operation, usize>,
    billing_overrides: HashMap<String, BillingStatus>,
}

/// In-memory reference provider.
pub struct MockProvider {
    name: String,
    console_url: String,
    offers: Vec<Offer>,
    supports_billing_verification: bool,
    account_info: AccountInfo,
    initial_status: InstanceStatus,
    instances: InstanceTable,
    controls: Mutex<Controls>,
    logger: Arc<dyn Logger>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(MockConfig::default(), NoopLogger::shared())
    }
}

impl MockProvider {
    /// Create a provider from `config`.
    ///
    /// Catalog offers are stamped with the configured provider name.
    #[must_use]
    pub fn new(config: MockConfig, logger: Arc<dyn Logger>) -> Self {
        let offers = config
            .offers
            .into_iter()
            .map(|mut offer| {
                offer.provider.clone_from(&config.name);
                offer
            })
            .collect();

        Self {
            offers,
            supports_billing_verification: config.supports_billing_verification,
            account_info: config.account_info.unwrap_or_else(default_account),
            initial_status: config.initial_status,
            instances: InstanceTable::new(),
            controls: Mutex::new(Controls {
                errors: config.errors,
                delays: config.delays,
                ..Controls::default()
            }),
            logger,
            name: config.name,
            console_url: config.console_url,
        }
    }

    fn controls(&self) -> MutexGuard<'_, Controls> {
        self.controls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `call`, then apply any injected delay and error for its operation.
    async fn enter(&self, ctx: &CallContext, call: RecordedCall) -> Result<(), ProviderError> {
        let op = call.operation();
        let delay = {
            let mut controls = self.controls();
            controls.calls.push(call);
            *controls.counts.entry(op).or_default() += 1;
            controls.delays.get(&op).copied()
        };

        ctx.check()?;
        if let Some(delay) = delay {
            ctx.sleep(delay).await?;
        }

        let injected = self.controls().errors.get(&op).cloned();
        match injected {
            Some(err) => {
                self.logger.debug(
                    "Returning injected error",
                    &[("operation", &format!("{op:?}")), ("error", &err)],
                );
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Force every call to `op` to fail with `err` until cleared.
    pub fn set_error(&self, op: Operation, err: ProviderError) {
        self.controls().errors.insert(op, err);
    }

    /// Stop failing calls to `op`.
    pub fn clear_error(&self, op: Operation) {
        self.controls().errors.remove(&op);
    }

    /// Delay every call to `op` by `delay` until cleared.
    pub fn set_delay(&self, op: Operation, delay: Duration) {
        self.controls().delays.insert(op, delay);
    }

    /// Stop delaying calls to `op`.
    pub fn clear_delay(&self, op: Operation) {
        self.controls().delays.remove(&op);
    }

    /// Every recorded call, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.controls().calls.clone()
    }

    /// Recorded calls to `op`, oldest first.
    #[must_use]
    pub fn calls_to(&self, op: Operation) -> Vec<RecordedCall> {
        self.controls()
            .calls
            .iter()
            .filter(|c| c.operation() == op)
            .cloned()
            .collect()
    }

    /// Number of calls made to `op`.
    #[must_use]
    pub fn call_count(&self, op: Operation) -> usize {
        self.controls().counts.get(&op).copied().unwrap_or(0)
    }

    /// Seed an instance directly into the table.
    pub fn add_instance(&self, instance: Instance) {
        self.instances.insert(instance);
    }

    /// Override an instance's status.
    ///
    /// # Errors
    /// Returns `InstanceNotFound` for unknown IDs.
    pub fn set_instance_status(
        &self,
        id: &str,
        status: InstanceStatus,
    ) -> Result<(), ProviderError> {
        self.instances.set_status(id, status)
    }

    /// Assign a public IP to an instance.
    ///
    /// # Errors
    /// Returns `InstanceNotFound` for unknown IDs.
    pub fn set_public_ip(&self, id: &str, ip: impl Into<String>) -> Result<(), ProviderError> {
        self.instances.set_public_ip(id, ip)
    }

    /// Make `get_billing_status` report `status` for `id` regardless of instance status.
    pub fn set_billing_status(&self, id: impl Into<String>, status: BillingStatus) {
        self.controls().billing_overrides.insert(id.into(), status);
    }

    /// Remove a billing override.
    pub fn clear_billing_status(&self, id: &str) {
        self.controls().billing_overrides.remove(id);
    }

    /// Number of instances in the table.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Clear injected errors and delays, billing overrides, call records and
    /// the instance table. Name, console URL and catalog are kept.
    pub fn reset(&self) {
        *self.controls() = Controls::default();
        self.instances.clear();
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn console_url(&self) -> &str {
        &self.console_url
    }

    fn supports_billing_verification(&self) -> bool {
        self.supports_billing_verification
    }

    async fn get_offers(
        &self,
        ctx: &CallContext,
        filter: &OfferFilter,
    ) -> Result<Vec<Offer>, ProviderError> {
        self.enter(ctx, RecordedCall::GetOffers(filter.clone())).await?;
        Ok(filter_offers(&self.offers, filter))
    }

    async fn create_instance(
        &self,
        ctx: &CallContext,
        req: &CreateRequest,
    ) -> Result<Instance, ProviderError> {
        self.enter(ctx, RecordedCall::CreateInstance(req.clone())).await?;

        // Matches against every registered offer, available or not.
        let offer = self
            .offers
            .iter()
            .find(|o| o.offer_id == req.offer_id)
            .ok_or_else(|| ProviderError::OfferNotFound(req.offer_id.clone()))?;

        let instance = self
            .instances
            .create(&self.name, offer, req, self.initial_status)?;

        self.logger.info(
            "Instance created",
            &[
                ("instance_id", &instance.id),
                ("offer_id", &offer.offer_id),
                ("hourly_rate", &instance.hourly_rate),
                ("spot", &instance.spot),
                ("status", &instance.status),
            ],
        );
        Ok(instance)
    }

    async fn get_instance(&self, ctx: &CallContext, id: &str) -> Result<Instance, ProviderError> {
        self.enter(ctx, RecordedCall::GetInstance(id.to_string())).await?;
        self.instances.get(id)
    }

    async fn terminate_instance(&self, ctx: &CallContext, id: &str) -> Result<(), ProviderError> {
        self.enter(ctx, RecordedCall::TerminateInstance(id.to_string())).await?;
        if self.instances.terminate(id) {
            self.logger.info("Instance terminated", &[("instance_id", &id)]);
        } else {
            self.logger
                .debug("Terminate was a no-op", &[("instance_id", &id)]);
        }
        Ok(())
    }

    async fn get_billing_status(
        &self,
        ctx: &CallContext,
        id: &str,
    ) -> Result<BillingStatus, ProviderError> {
        self.enter(ctx, RecordedCall::GetBillingStatus(id.to_string())).await?;
        let overridden = self.controls().billing_overrides.get(id).copied();
        Ok(overridden.unwrap_or_else(|| self.instances.billing_status(id)))
    }

    async fn validate_api_key(&self, ctx: &CallContext) -> Result<AccountInfo, ProviderError> {
        self.enter(ctx, RecordedCall::ValidateApiKey).await?;
        if !self.account_info.valid {
            return Err(ProviderError::AuthenticationFailed(format!(
                "{} rejected the configured credential",
                self.name
            )));
        }
        Ok(self.account_info.clone())
    }
}
