//! GPU provider contract and implementations.
//!
//! This module contains the [`Provider`] trait shared by every vendor and
//! the in-memory [`mock::MockProvider`] reference implementation.

pub mod mock;
pub mod traits;

pub use traits::{
    AccountInfo, BillingStatus, CreateRequest, ErrorKind, Instance, InstanceStatus, Offer,
    OfferFilter, Provider, ProviderError,
};
