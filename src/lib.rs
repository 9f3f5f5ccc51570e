//! Batch geocoder for Taiwanese service-organization addresses: normalizes
//! messy registry addresses, fans each one out into candidate queries and
//! walks a provider fallback ladder until something plausible sticks.

pub mod cache;
pub mod candidates;
pub mod config;
pub mod errors;
pub mod normalize;
pub mod provider;
pub mod records;
pub mod region;
pub mod resilience;
pub mod resolver;
pub mod zh_num;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::cache::ResultCache;
pub use crate::config::AppConfig;
pub use crate::errors::{AppError, AppResult};
pub use crate::provider::{GeocodeProvider, NominatimClient, OpenCageClient, ProviderHit};
pub use crate::records::{Batch, Record, ResolvedBatch, ResolvedRecord};
pub use crate::resilience::{BackoffPolicy, RateLimiter};
pub use crate::resolver::{ResolveStats, Resolver};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,tw_geocoder=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
