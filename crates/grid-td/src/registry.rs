//! Adapter construction by exchange name.

use std::sync::Arc;

use grid_core::config::AccountConfig;
use grid_core::{GridError, GridResult};
use tracing::info;

use crate::ExchangeAdapter;
use crate::bitget::BitgetAdapter;
use crate::mexc::MexcAdapter;

/// Exchanges `create_adapter` knows how to build.
pub const SUPPORTED_EXCHANGES: &[&str] = &["mexc", "bitget"];

/// Build and connect the adapter named by `config.exchange`.
pub async fn create_adapter(config: &AccountConfig) -> GridResult<Arc<dyn ExchangeAdapter>> {
    let adapter: Arc<dyn ExchangeAdapter> = match config.exchange.to_ascii_lowercase().as_str() {
        "mexc" => Arc::new(MexcAdapter::connect(config).await?),
        "bitget" => Arc::new(BitgetAdapter::connect(config).await?),
        other => {
            return Err(GridError::Config(format!(
                "{}: unsupported exchange '{other}' (expected one of {SUPPORTED_EXCHANGES:?})",
                config.name
            )));
        }
    };
    info!("[registry] {} connected to {}", config.name, adapter.name());
    Ok(adapter)
}
