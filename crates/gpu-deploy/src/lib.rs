//! Rented GPU instance lifecycle, billing reconciliation and deployment state.
//!
//! This crate sits between vendor network clients and the commands that
//! deploy and tear down a single rented GPU instance. It guarantees one
//! lifecycle and error model across vendors, and that the renter is never
//! left billing on an instance it believes is gone.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   get_offers / create / terminate / billing   ┌────────────────┐
//! │   Deployer   │──────────────────────────────────────────────►│    Provider    │
//! │ deploy       │                                               │  (per vendor,  │
//! │ teardown     │◄──────────────── Reconciliation ──────────────│   or mock)     │
//! └──────┬───────┘                                               └────────────────┘
//!        │ save / load / clear (atomic replace)
//!        ▼
//! ┌──────────────┐
//! │  StateStore  │  instance · model · wireGuard · cost · deadman
//! └──────────────┘
//! ```
//!
//! - [`providers::Provider`] - capability contract every vendor implements
//! - [`providers::mock::MockProvider`] - in-memory reference provider
//! - [`lifecycle::InstanceTable`] - instance bookkeeping shared by providers
//! - [`billing`] - post-teardown billing reconciliation
//! - [`state::StateStore`] - crash-consistent single-deployment record
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gpu_deploy::{CallContext, DeployConfig, Deployer, DeployPlan, TracingLogger};
//! use gpu_deploy::providers::mock::MockProvider;
//!
//! let config = DeployConfig::default().with_env_overrides()?;
//! let logger = TracingLogger::shared("deploy");
//! let deployer = Deployer::from_config(Arc::new(MockProvider::default()), &config, logger);
//!
//! let plan = DeployPlan::from_config(request, Some("llama3:8b".into()), &config);
//! let state = deployer.deploy(&config.call_context(), plan).await?;
//! deployer.wait_until_ready(&config.call_context()).await?;
//!
//! // Later
//! let report = deployer.teardown(&config.call_context()).await?;
//! ```

pub mod billing;
pub mod config;
pub mod context;
pub mod deploy;
pub mod lifecycle;
pub mod logging;
pub mod offers;
pub mod providers;
pub mod state;

pub use billing::{ManualVerification, Reconciliation};
pub use config::DeployConfig;
pub use context::CallContext;
pub use deploy::{DeployError, DeployPlan, Deployer, TeardownReport};
pub use logging::{Logger, NoopLogger, TracingLogger};
pub use providers::traits::{
    AccountInfo, BillingStatus, CreateRequest, ErrorKind, Instance, InstanceStatus, Offer,
    OfferFilter, Provider, ProviderError,
};
pub use state::{
    CostState, DeadmanState, InstanceState, InstanceType, ModelState, State, StateError,
    StateStore, WireGuardState,
};
