//! Offer catalog filtering.

use crate::providers::{Offer, OfferFilter};

impl OfferFilter {
    /// Filter on GPU model.
    #[must_use]
    pub fn with_gpu_type(mut self, gpu_type: impl Into<String>) -> Self {
        self.gpu_type = Some(gpu_type.into());
        self
    }

    /// Filter on region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Only keep offers that can run as spot.
    #[must_use]
    pub fn spot_only(mut self) -> Self {
        self.spot_only = true;
        self
    }

    /// Require at least `gb` of GPU memory.
    #[must_use]
    pub fn with_min_vram(mut self, gb: u32) -> Self {
        self.min_vram_gb = gb;
        self
    }

    /// Whether `offer` satisfies every criterion of this filter.
    ///
    /// Unavailable offers never match, whatever the filter says.
    #[must_use]
    pub fn matches(&self, offer: &Offer) -> bool {
        if !offer.available {
            return false;
        }
        if let Some(ref gpu) = self.gpu_type {
            if !gpu.is_empty() && offer.gpu != *gpu {
                return false;
            }
        }
        if let Some(ref region) = self.region {
            if !region.is_empty() && offer.region != *region {
                return false;
            }
        }
        if self.spot_only && offer.spot_price.is_none() {
            return false;
        }
        offer.vram_gb >= self.min_vram_gb
    }
}

/// Apply `filter` to `catalog`, keeping catalog order.
#[must_use]
pub fn filter_offers<'a, I>(catalog: I, filter: &OfferFilter) -> Vec<Offer>
where
    I: IntoIterator<Item = &'a Offer>,
{
    catalog
        .into_iter()
        .filter(|o| filter.matches(o))
        .cloned()
        .collect()
}
