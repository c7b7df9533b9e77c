//! Deploy and teardown flows composed from the provider and state primitives.
//!
//! Deploy: `create_instance` → build record → `save`. A failed create never
//! writes state, and a failed save after a successful create terminates the
//! instance so nothing bills without a record. That cleanup runs on its own
//! bounded context, so it still happens when the caller's context has fired.
//!
//! Teardown: `terminate_instance` → billing reconciliation → `clear`. The
//! record is kept while the provider still reports billing, so retrying
//! teardown is always safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::billing::{self, Reconciliation};
use crate::config::DeployConfig;
use crate::context::CallContext;
use crate::lifecycle::{self, DEFAULT_POLL_INTERVAL};
use crate::logging::Logger;
use crate::providers::{CreateRequest, Instance, Provider, ProviderError};
use crate::state::{DeadmanState, ModelState, State, StateError, StateStore};

/// Status recorded for a model that has not been pulled yet.
pub const MODEL_STATUS_PENDING: &str = "pending";

/// Deadline for terminating an instance whose record could not be saved.
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from deploy and teardown flows.
#[derive(Error, Debug)]
pub enum DeployError {
    /// Provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// State persistence failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// A deployment is already tracked.
    #[error("Deployment already active on instance {instance_id}; tear it down first")]
    AlreadyDeployed { instance_id: String },

    /// The instance was created but its record could not be saved.
    #[error("Instance {instance_id} was created but could not be recorded: {source}")]
    Untracked {
        instance_id: String,
        #[source]
        source: StateError,
    },
}

/// What to deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployPlan {
    /// Instance to create.
    pub request: CreateRequest,
    /// Model to serve, if any.
    pub model: Option<String>,
    /// Deadman timeout; `None` leaves the deadman record unset.
    pub deadman_timeout_hours: Option<u32>,
    /// Currency the cost record is kept in.
    pub currency: String,
}

impl DeployPlan {
    /// A plan carrying the deadman timeout and currency from `config`.
    #[must_use]
    pub fn from_config(
        request: CreateRequest,
        model: Option<String>,
        config: &DeployConfig,
    ) -> Self {
        Self {
            request,
            model,
            deadman_timeout_hours: Some(config.deadman_timeout_hours),
            currency: config.currency.clone(),
        }
    }
}

/// Result of a teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownReport {
    /// No deployment was tracked.
    NothingToDo,
    /// The instance was terminated and billing reconciled.
    Terminated {
        instance_id: String,
        reconciliation: Reconciliation,
        /// Whether the record was cleared.
        state_cleared: bool,
    },
}

/// Runs deployment flows against one provider and one state store.
pub struct Deployer<P: Provider + ?Sized> {
    provider: Arc<P>,
    store: StateStore,
    logger: Arc<dyn Logger>,
    poll_interval: Duration,
    cleanup_timeout: Duration,
}

impl<P: Provider + ?Sized> Deployer<P> {
    /// Create a deployer.
    pub fn new(provider: Arc<P>, store: StateStore, logger: Arc<dyn Logger>) -> Self {
        Self {
            provider,
            store,
            logger,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
        }
    }

    /// Create a deployer using the state store and request timeout from `config`.
    pub fn from_config(provider: Arc<P>, config: &DeployConfig, logger: Arc<dyn Logger>) -> Self {
        let store = config.state_store(Arc::clone(&logger));
        Self::new(provider, store, logger).with_cleanup_timeout(config.request_timeout())
    }

    /// Interval between polls in [`Deployer::wait_until_ready`].
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Deadline for terminating an instance that could not be recorded.
    #[must_use]
    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    /// The provider.
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The state store.
    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Create an instance and record it as the active deployment.
    ///
    /// # Errors
    /// Returns `AlreadyDeployed` if an instance is already tracked, the
    /// provider's error if creation fails (nothing is saved), or `Untracked`
    /// if the record could not be saved after creation.
    pub async fn deploy(&self, ctx: &CallContext, plan: DeployPlan) -> Result<State, DeployError> {
        if let Some(existing) = self.store.load().await? {
            if let Some(instance) = existing.instance {
                return Err(DeployError::AlreadyDeployed {
                    instance_id: instance.id,
                });
            }
        }

        let instance = self.provider.create_instance(ctx, &plan.request).await?;
        self.logger.info(
            "Instance created",
            &[
                ("provider", &self.provider.name()),
                ("instance_id", &instance.id),
                ("hourly_rate", &instance.hourly_rate),
            ],
        );

        let state = build_state(&instance, &plan, Utc::now());
        if let Err(source) = self.store.save(&state).await {
            self.abandon(&instance, &source).await;
            return Err(DeployError::Untracked {
                instance_id: instance.id,
                source,
            });
        }

        Ok(state)
    }

    /// Terminate an instance that could not be recorded.
    ///
    /// Uses a fresh context: the caller's may already have been cancelled or
    /// run out of time during create or save.
    async fn abandon(&self, instance: &Instance, cause: &StateError) {
        self.logger.error(
            "Failed to record instance, terminating it",
            &[("instance_id", &instance.id), ("error", cause)],
        );
        let cleanup = CallContext::with_timeout(self.cleanup_timeout);
        if let Err(e) = self.provider.terminate_instance(&cleanup, &instance.id).await {
            self.logger.error(
                "Failed to terminate unrecorded instance; check the provider console",
                &[
                    ("instance_id", &instance.id),
                    ("console_url", &self.provider.console_url()),
                    ("error", &e),
                ],
            );
        }
    }

    /// Wait for the tracked instance to finish provisioning and record its
    /// public IP.
    ///
    /// Returns `None` if no instance is tracked.
    ///
    /// # Errors
    /// Returns the provider's error if the instance fails to come up or `ctx`
    /// fires first, or a state error.
    pub async fn wait_until_ready(
        &self,
        ctx: &CallContext,
    ) -> Result<Option<Instance>, DeployError> {
        let Some(tracked) = self.store.load().await?.and_then(|state| state.instance) else {
            return Ok(None);
        };

        let provider = self.provider.as_ref();
        let instance =
            lifecycle::wait_until_running(provider, ctx, &tracked.id, self.poll_interval).await?;
        self.logger.info(
            "Instance running",
            &[
                ("instance_id", &instance.id),
                ("public_ip", &instance.public_ip.as_deref().unwrap_or("-")),
            ],
        );

        if instance.public_ip.is_some() {
            let public_ip = instance.public_ip.clone();
            self.store
                .update(|state| {
                    if let Some(record) = state.instance.as_mut() {
                        record.public_ip = public_ip;
                    }
                })
                .await?;
        }
        Ok(Some(instance))
    }

    /// Terminate the tracked instance, reconcile billing and clear the record.
    ///
    /// # Errors
    /// Returns the provider's error from termination or the billing check,
    /// or a state error; the record is left in place in every error case.
    pub async fn teardown(&self, ctx: &CallContext) -> Result<TeardownReport, DeployError> {
        let Some(state) = self.store.load().await? else {
            return Ok(TeardownReport::NothingToDo);
        };
        let Some(instance) = state.instance else {
            self.store.clear().await?;
            return Ok(TeardownReport::NothingToDo);
        };

        self.provider.terminate_instance(ctx, &instance.id).await?;
        let reconciliation = billing::reconcile(self.provider.as_ref(), ctx, &instance.id).await?;

        match &reconciliation {
            Reconciliation::Stopped => {
                self.logger
                    .info("Billing confirmed stopped", &[("instance_id", &instance.id)]);
            }
            Reconciliation::StillActive => {
                self.logger.warn(
                    "Provider still reports billing; keeping state for retry",
                    &[("instance_id", &instance.id)],
                );
            }
            Reconciliation::Unverifiable => {
                self.logger.warn(
                    "Provider could not report billing status; verify manually",
                    &[
                        ("instance_id", &instance.id),
                        ("console_url", &self.provider.console_url()),
                    ],
                );
            }
            Reconciliation::ManualVerificationRequired(manual) => {
                self.logger.warn(
                    "Provider cannot verify billing; confirm in console",
                    &[
                        ("provider", &manual.provider),
                        ("console_url", &manual.console_url),
                    ],
                );
            }
        }

        let state_cleared = reconciliation.is_terminal();
        if state_cleared {
            self.store.clear().await?;
        }

        Ok(TeardownReport::Terminated {
            instance_id: instance.id,
            reconciliation,
            state_cleared,
        })
    }

    /// Record a heartbeat on the tracked deployment.
    ///
    /// Returns `None` if no deployment is tracked.
    ///
    /// # Errors
    /// Returns a state error if the record cannot be read or written.
    pub async fn heartbeat(&self, now: DateTime<Utc>) -> Result<Option<State>, DeployError> {
        let updated = self
            .store
            .update(|state| {
                if let Some(deadman) = state.deadman.as_mut() {
                    deadman.heartbeat(now);
                }
            })
            .await?;
        Ok(updated)
    }

    /// Recompute the accumulated cost of the tracked deployment.
    ///
    /// # Errors
    /// Returns a state error if the record cannot be read or written.
    pub async fn refresh_cost(&self, now: DateTime<Utc>) -> Result<Option<State>, DeployError> {
        let updated = self
            .store
            .update(|state| {
                if let (Some(instance), Some(cost)) = (state.instance.as_ref(), state.cost.as_mut())
                {
                    cost.accrue(instance.created_at, now);
                }
            })
            .await?;
        Ok(updated)
    }

    /// Whether the tracked deployment's deadman record has lapsed.
    ///
    /// # Errors
    /// Returns a state error if the record cannot be read.
    pub async fn deadman_expired(&self, now: DateTime<Utc>) -> Result<bool, DeployError> {
        let expired = self
            .store
            .load()
            .await?
            .and_then(|state| state.deadman)
            .is_some_and(|deadman| deadman.is_expired(now));
        Ok(expired)
    }
}

/// Fresh record for a newly created instance.
fn build_state(instance: &Instance, plan: &DeployPlan, now: DateTime<Utc>) -> State {
    let mut state = State::for_instance(instance, plan.currency.clone());
    state.model = plan.model.as_ref().map(|name| ModelState {
        name: name.clone(),
        status: MODEL_STATUS_PENDING.to_string(),
    });
    state.deadman = plan
        .deadman_timeout_hours
        .map(|hours| DeadmanState::new(hours, now));
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NoopLogger;
    use crate::providers::mock::{MockConfig, MockProvider, Operation};
    use crate::providers::{AccountInfo, BillingStatus, InstanceStatus, Offer, OfferFilter};
    use crate::state::InstanceState;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn plan(offer_id: &str) -> DeployPlan {
        DeployPlan {
            request: CreateRequest {
                offer_id: offer_id.to_string(),
                spot: false,
                cloud_init: String::new(),
                disk_size_gb: 100,
            },
            model: Some("llama3:8b".to_string()),
            deadman_timeout_hours: Some(2),
            currency: "USD".to_string(),
        }
    }

    fn deployer(dir: &TempDir, config: MockConfig) -> Deployer<MockProvider> {
        let provider = Arc::new(MockProvider::new(config, NoopLogger::shared()));
        let store = StateStore::new(dir.path().join("state.json"), NoopLogger::shared());
        Deployer::new(provider, store, NoopLogger::shared())
    }

    #[tokio::test]
    async fn test_deploy_records_state() {
        let dir = TempDir::new().unwrap();
        let deployer = deployer(&dir, MockConfig::default());
        let ctx = CallContext::background();

        let state = deployer.deploy(&ctx, plan("mock-a100-40gb")).await.unwrap();

        assert_eq!(deployer.store().load().await.unwrap(), Some(state.clone()));
        assert_eq!(state.cost.as_ref().unwrap().hourly_rate, dec!(1.00));
        assert_eq!(state.model.as_ref().unwrap().status, MODEL_STATUS_PENDING);
        assert_eq!(state.deadman.as_ref().unwrap().timeout_hours, 2);
    }

    #[tokio::test]
    async fn test_failed_create_saves_nothing() {
        let dir = TempDir::new().unwrap();
        let deployer = deployer(&dir, MockConfig::default());
        deployer.provider().set_error(
            Operation::CreateInstance,
            ProviderError::InsufficientCapacity("sold out".to_string()),
        );

        let err = deployer
            .deploy(&CallContext::background(), plan("mock-a100-40gb"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeployError::Provider(ProviderError::InsufficientCapacity(_))
        ));
        assert!(deployer.store().load().await.unwrap().is_none());
        assert!(!deployer.store().path().exists());
    }

    #[tokio::test]
    async fn test_refuses_second_deployment() {
        let dir = TempDir::new().unwrap();
        let deployer = deployer(&dir, MockConfig::default());
        let ctx = CallContext::background();
        deployer.deploy(&ctx, plan("mock-a100-40gb")).await.unwrap();

        let err = deployer.deploy(&ctx, plan("mock-h100-80gb")).await.unwrap_err();

        assert!(matches!(err, DeployError::AlreadyDeployed { .. }));
        assert_eq!(deployer.provider().call_count(Operation::CreateInstance), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unrecordable_instance_is_terminated() {
        let dir = TempDir::new().unwrap();
        // Dangling parent symlink: loads find nothing, saves cannot create the directory.
        let parent = dir.path().join("state-dir");
        std::os::unix::fs::symlink(dir.path().join("gone"), &parent).unwrap();
        let provider = Arc::new(MockProvider::default());
        let store = StateStore::new(parent.join("state.json"), NoopLogger::shared());
        let deployer = Deployer::new(provider, store, NoopLogger::shared());
        let ctx = CallContext::background();

        let err = deployer.deploy(&ctx, plan("mock-a100-40gb")).await.unwrap_err();

        let instance_id = match err {
            DeployError::Untracked { instance_id, .. } => instance_id,
            other => panic!("expected Untracked, got {other:?}"),
        };
        let instance = deployer.provider().get_instance(&ctx, &instance_id).await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Terminated);
    }

    /// Cancels the caller's context as soon as the instance exists.
    struct CancelsAfterCreate(MockProvider);

    #[async_trait::async_trait]
    impl Provider for CancelsAfterCreate {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn console_url(&self) -> &str {
            self.0.console_url()
        }

        fn supports_billing_verification(&self) -> bool {
            self.0.supports_billing_verification()
        }

        async fn get_offers(
            &self,
            ctx: &CallContext,
            filter: &OfferFilter,
        ) -> Result<Vec<Offer>, ProviderError> {
            self.0.get_offers(ctx, filter).await
        }

        async fn create_instance(
            &self,
            ctx: &CallContext,
            req: &CreateRequest,
        ) -> Result<Instance, ProviderError> {
            let instance = self.0.create_instance(ctx, req).await?;
            ctx.cancel();
            Ok(instance)
        }

        async fn get_instance(
            &self,
            ctx: &CallContext,
            id: &str,
        ) -> Result<Instance, ProviderError> {
            self.0.get_instance(ctx, id).await
        }

        async fn terminate_instance(
            &self,
            ctx: &CallContext,
            id: &str,
        ) -> Result<(), ProviderError> {
            self.0.terminate_instance(ctx, id).await
        }

        async fn get_billing_status(
            &self,
            ctx: &CallContext,
            id: &str,
        ) -> Result<BillingStatus, ProviderError> {
            self.0.get_billing_status(ctx, id).await
        }

        async fn validate_api_key(&self, ctx: &CallContext) -> Result<AccountInfo, ProviderError> {
            self.0.validate_api_key(ctx).await
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unrecordable_instance_is_terminated_after_caller_cancels() {
        let dir = TempDir::new().unwrap();
        let parent = dir.path().join("state-dir");
        std::os::unix::fs::symlink(dir.path().join("gone"), &parent).unwrap();
        let provider = Arc::new(CancelsAfterCreate(MockProvider::default()));
        let store = StateStore::new(parent.join("state.json"), NoopLogger::shared());
        let deployer = Deployer::new(provider, store, NoopLogger::shared());
        let ctx = CallContext::with_timeout(std::time::Duration::from_secs(30));

        let err = deployer.deploy(&ctx, plan("mock-a100-40gb")).await.unwrap_err();

        assert!(matches!(ctx.check(), Err(ProviderError::Cancelled)));
        let instance_id = match err {
            DeployError::Untracked { instance_id, .. } => instance_id,
            other => panic!("expected Untracked, got {other:?}"),
        };
        let inner = &deployer.provider().0;
        let instance = inner
            .get_instance(&CallContext::background(), &instance_id)
            .await
            .unwrap();
        assert_eq!(instance.status, InstanceStatus::Terminated);
        assert_eq!(inner.call_count(Operation::TerminateInstance), 1);
    }

    #[test]
    fn test_plan_from_config() {
        let config = DeployConfig {
            deadman_timeout_hours: 6,
            currency: "EUR".to_string(),
            ..DeployConfig::default()
        };
        let request = plan("mock-a100-40gb").request;

        let plan = DeployPlan::from_config(request.clone(), None, &config);

        assert_eq!(plan.request, request);
        assert_eq!(plan.model, None);
        assert_eq!(plan.deadman_timeout_hours, Some(6));
        assert_eq!(plan.currency, "EUR");
    }

    #[tokio::test]
    async fn test_from_config_uses_configured_store() {
        let dir = TempDir::new().unwrap();
        let config = DeployConfig {
            state_path: dir.path().join("nested").join("state.json"),
            ..DeployConfig::default()
        };
        let deployer = Deployer::from_config(
            Arc::new(MockProvider::default()),
            &config,
            NoopLogger::shared(),
        );
        let request = plan("mock-a100-40gb").request;

        let state = deployer
            .deploy(
                &config.call_context(),
                DeployPlan::from_config(request, None, &config),
            )
            .await
            .unwrap();

        assert_eq!(deployer.store().path(), config.state_path.as_path());
        assert!(config.state_path.exists());
        assert_eq!(state.cost.unwrap().currency, "USD");
        assert_eq!(state.deadman.unwrap().timeout_hours, 4);
    }

    #[tokio::test]
    async fn test_wait_until_ready_records_public_ip() {
        let dir = TempDir::new().unwrap();
        let config = MockConfig {
            initial_status: InstanceStatus::Pending,
            ..MockConfig::default()
        };
        let deployer =
            deployer(&dir, config).with_poll_interval(std::time::Duration::from_millis(5));
        let ctx = CallContext::with_timeout(std::time::Duration::from_secs(5));
        let state = deployer.deploy(&ctx, plan("mock-a100-40gb")).await.unwrap();
        let id = state.instance.unwrap().id;
        assert!(state.cost.is_some());

        let provider = Arc::clone(&deployer.provider);
        let promote = {
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                provider.set_public_ip(&id, "203.0.113.20").unwrap();
                provider
                    .set_instance_status(&id, InstanceStatus::Running)
                    .unwrap();
            })
        };

        let ready = deployer.wait_until_ready(&ctx).await.unwrap().unwrap();
        promote.await.unwrap();

        assert_eq!(ready.status, InstanceStatus::Running);
        let record = deployer.store().load().await.unwrap().unwrap().instance.unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.public_ip.as_deref(), Some("203.0.113.20"));
    }

    #[tokio::test]
    async fn test_wait_until_ready_without_deployment() {
        let dir = TempDir::new().unwrap();
        let deployer = deployer(&dir, MockConfig::default());
        let ready = deployer
            .wait_until_ready(&CallContext::background())
            .await
            .unwrap();
        assert!(ready.is_none());
    }

    #[tokio::test]
    async fn test_teardown_clears_when_billing_stopped() {
        let dir = TempDir::new().unwrap();
        let deployer = deployer(&dir, MockConfig::default());
        let ctx = CallContext::background();
        let state = deployer.deploy(&ctx, plan("mock-a100-40gb")).await.unwrap();
        let id = state.instance.unwrap().id;

        let report = deployer.teardown(&ctx).await.unwrap();

        assert_eq!(
            report,
            TeardownReport::Terminated {
                instance_id: id,
                reconciliation: Reconciliation::Stopped,
                state_cleared: true,
            }
        );
        assert!(deployer.store().load().await.unwrap().is_none());
        assert_eq!(deployer.teardown(&ctx).await.unwrap(), TeardownReport::NothingToDo);
    }

    #[tokio::test]
    async fn test_teardown_keeps_state_while_billing_active() {
        let dir = TempDir::new().unwrap();
        let deployer = deployer(&dir, MockConfig::default());
        let ctx = CallContext::background();
        let state = deployer.deploy(&ctx, plan("mock-a100-40gb")).await.unwrap();
        let id = state.instance.unwrap().id;
        deployer
            .provider()
            .set_billing_status(id.clone(), BillingStatus::Active);

        let report = deployer.teardown(&ctx).await.unwrap();
        assert!(matches!(
            report,
            TeardownReport::Terminated {
                reconciliation: Reconciliation::StillActive,
                state_cleared: false,
                ..
            }
        ));
        assert!(deployer.store().load().await.unwrap().is_some());

        deployer.provider().clear_billing_status(&id);
        let report = deployer.teardown(&ctx).await.unwrap();
        assert!(matches!(
            report,
            TeardownReport::Terminated {
                state_cleared: true,
                ..
            }
        ));
        assert_eq!(
            deployer.provider().call_count(Operation::TerminateInstance),
            2
        );
    }

    #[tokio::test]
    async fn test_teardown_without_verification_needs_manual_check() {
        let dir = TempDir::new().unwrap();
        let config = MockConfig {
            name: "bare".to_string(),
            supports_billing_verification: false,
            ..MockConfig::default()
        };
        let deployer = deployer(&dir, config);
        let ctx = CallContext::background();
        deployer.deploy(&ctx, plan("mock-a100-40gb")).await.unwrap();

        let report = deployer.teardown(&ctx).await.unwrap();

        let TeardownReport::Terminated { reconciliation, .. } = report else {
            panic!("expected Terminated");
        };
        let manual = reconciliation.manual_verification().unwrap();
        assert!(manual.required);
        assert_eq!(manual.provider, "bare");
        assert_eq!(deployer.provider().call_count(Operation::GetBillingStatus), 0);
    }

    #[tokio::test]
    async fn test_teardown_failure_keeps_state() {
        let dir = TempDir::new().unwrap();
        let deployer = deployer(&dir, MockConfig::default());
        let ctx = CallContext::background();
        deployer.deploy(&ctx, plan("mock-a100-40gb")).await.unwrap();
        deployer.provider().set_error(
            Operation::TerminateInstance,
            ProviderError::Transport("connection reset".to_string()),
        );

        assert!(deployer.teardown(&ctx).await.is_err());
        assert!(deployer.store().load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_and_cost_refresh() {
        let dir = TempDir::new().unwrap();
        let deployer = deployer(&dir, MockConfig::default());
        let ctx = CallContext::background();
        let state = deployer.deploy(&ctx, plan("mock-h100-80gb")).await.unwrap();
        let created_at = state.instance.as_ref().unwrap().created_at;
        let started = state.deadman.as_ref().unwrap().last_heartbeat;

        let later = started + Duration::hours(1);
        let updated = deployer.heartbeat(later).await.unwrap().unwrap();
        assert_eq!(updated.deadman.unwrap().last_heartbeat, later);

        let updated = deployer.heartbeat(started).await.unwrap().unwrap();
        assert_eq!(updated.deadman.unwrap().last_heartbeat, later);

        let updated = deployer
            .refresh_cost(created_at + Duration::hours(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.cost.unwrap().accumulated, dec!(5.00));

        assert!(!deployer.deadman_expired(later).await.unwrap());
        assert!(deployer
            .deadman_expired(later + Duration::hours(2))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_heartbeat_without_deployment() {
        let dir = TempDir::new().unwrap();
        let deployer = deployer(&dir, MockConfig::default());
        assert!(deployer.heartbeat(Utc::now()).await.unwrap().is_none());
        assert!(!deployer.deadman_expired(Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_teardown_of_instance_less_record() {
        let dir = TempDir::new().unwrap();
        let deployer = deployer(&dir, MockConfig::default());
        let stale = State {
            model: Some(ModelState {
                name: "orphan".to_string(),
                status: "ready".to_string(),
            }),
            ..State::default()
        };
        deployer.store().save(&stale).await.unwrap();

        let report = deployer.teardown(&CallContext::background()).await.unwrap();

        assert_eq!(report, TeardownReport::NothingToDo);
        assert!(deployer.store().load().await.unwrap().is_none());
        assert_eq!(deployer.provider().call_count(Operation::TerminateInstance), 0);
    }

    #[test]
    fn test_build_state_without_optional_parts() {
        let instance = Instance {
            id: "i-1".to_string(),
            provider: "mock".to_string(),
            status: InstanceStatus::Running,
            gpu: "A100 40GB".to_string(),
            region: "us-east-1".to_string(),
            hourly_rate: dec!(1.00),
            spot: true,
            public_ip: Some("198.51.100.4".to_string()),
            created_at: Utc::now(),
        };
        let plan = DeployPlan {
            model: None,
            deadman_timeout_hours: None,
            ..plan("mock-a100-40gb")
        };
        let state = build_state(&instance, &plan, Utc::now());
        assert_eq!(
            state.instance,
            Some(InstanceState::from_instance(&instance))
        );
        assert!(state.model.is_none());
        assert!(state.deadman.is_none());
    }
}
