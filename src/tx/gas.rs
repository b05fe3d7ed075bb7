//! Gas estimation and pricing for EVM escrow calls

use crate::chain::{ChainProvider, GasPrice};
use crate::error::ResolverResult;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use tracing::debug;

/// Gas estimator for transactions
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new() -> Self {
        Self {
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
        }
    }

    /// Node estimate plus the limit buffer
    pub async fn estimate_gas(
        &self,
        provider: &ChainProvider,
        tx: &TypedTransaction,
    ) -> ResolverResult<U256> {
        let estimate = provider.estimate_gas(tx).await?;
        Ok(self.with_limit_buffer(estimate))
    }

    pub fn with_limit_buffer(&self, gas: U256) -> U256 {
        gas + gas * self.gas_limit_buffer_percent / 100
    }

    /// Get buffered gas price for a chain
    pub async fn get_gas_price(&self, provider: &ChainProvider) -> ResolverResult<GasPrice> {
        let buffered = self.with_price_buffer(provider.get_gas_price().await?);
        debug!("Gas price for chain {}: {:?}", provider.chain_id(), buffered);
        Ok(buffered)
    }

    pub fn with_price_buffer(&self, gas_price: GasPrice) -> GasPrice {
        let pct = self.gas_price_buffer_percent;
        match gas_price {
            GasPrice::Legacy(price) => GasPrice::Legacy(price + price * pct / 100),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: max_fee_per_gas + max_fee_per_gas * pct / 100,
                max_priority_fee_per_gas: max_priority_fee_per_gas
                    + max_priority_fee_per_gas * pct / 100,
            },
        }
    }

    /// Worst-case cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        match gas_price {
            GasPrice::Legacy(price) => gas_limit * *price,
            GasPrice::Eip1559 { max_fee_per_gas, .. } => gas_limit * *max_fee_per_gas,
        }
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new()
    }
}
