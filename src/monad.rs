//! Monad audit-contract client.
//!
//! Wraps the `KinicMemoryLog` contract: every insert/search/chat flow writes
//! one compact metadata record via `logMemory`, and the cache reads the log
//! back through `getTotalMemories`/`getMemory` plus the `MemoryLogged` event
//! stream.
//!
//! Writes serialize on a single signer mutex so transaction nonces stay
//! monotonic; reads go straight to the provider and never touch the lock.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ChainConfig;
use crate::error::GatewayError;
use crate::models::{AuditRecord, OpType};

/// Contract byte bounds, enforced before submission.
const TITLE_MAX_BYTES: usize = 100;
const SUMMARY_MAX_BYTES: usize = 200;

/// Gas safety margin applied on top of the node's estimate.
const GAS_MARGIN_NUM: u64 = 12;
const GAS_MARGIN_DEN: u64 = 10;

sol! {
    #[sol(rpc)]
    contract KinicMemoryLog {
        function logMemory(
            uint8 opType,
            string title,
            string summary,
            string tags,
            bytes32 contentHash
        ) external returns (uint256);

        function getMemory(uint256 id)
            external
            view
            returns (
                address user,
                uint8 opType,
                string title,
                string summary,
                string tags,
                bytes32 contentHash,
                uint256 timestamp
            );

        function getTotalMemories() external view returns (uint256);

        event MemoryLogged(
            uint256 indexed id,
            address indexed user,
            uint8 opType,
            string title,
            string tags
        );
    }
}

/// Seam over the audit log so the pipeline and cache can run against mocks.
#[async_trait]
pub trait ChainLog: Send + Sync {
    /// Submit one audit record; resolves to the transaction hash once the
    /// receipt is observed.
    async fn write_log(
        &self,
        op_type: OpType,
        title: &str,
        summary: &str,
        tags: &str,
        fingerprint: &str,
    ) -> Result<String, GatewayError>;

    /// Total number of records on chain.
    async fn total(&self) -> Result<u64, GatewayError>;

    /// Fetch one record by its sequence id.
    async fn record(&self, id: u64) -> Result<AuditRecord, GatewayError>;

    /// Scan `MemoryLogged` events from `from_block` to the latest block.
    /// Returns the record ids seen (ascending) and the latest block scanned.
    async fn event_ids(&self, from_block: u64) -> Result<(Vec<u64>, u64), GatewayError>;

    /// Cheap liveness probe of the RPC endpoint.
    async fn health(&self) -> Result<(), GatewayError>;

    /// Address of the signing wallet.
    fn signer_address(&self) -> String;

    /// Address of the audit contract.
    fn contract_address(&self) -> String;
}

pub struct MonadLogger {
    provider: DynProvider,
    contract: KinicMemoryLog::KinicMemoryLogInstance<DynProvider>,
    address: Address,
    signer: Address,
    /// Serializes writes for nonce monotonicity.
    write_lock: Mutex<()>,
    confirmations: u64,
    submit_timeout: Duration,
    receipt_timeout: Duration,
}

impl MonadLogger {
    pub fn new(config: &ChainConfig) -> anyhow::Result<Self> {
        let signer: PrivateKeySigner = config
            .signer_key
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid signer key: {e}"))?;
        let signer_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(config.rpc_url.parse()?)
            .erased();

        let address: Address = config
            .contract_address
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid contract address: {e}"))?;
        let contract = KinicMemoryLog::new(address, provider.clone());

        info!(contract = %address, signer = %signer_address, "chain log client ready");

        Ok(Self {
            provider,
            contract,
            address,
            signer: signer_address,
            write_lock: Mutex::new(()),
            confirmations: config.confirmations,
            submit_timeout: Duration::from_secs(config.submit_timeout_secs),
            receipt_timeout: Duration::from_secs(config.receipt_timeout_secs),
        })
    }
}

#[async_trait]
impl ChainLog for MonadLogger {
    async fn write_log(
        &self,
        op_type: OpType,
        title: &str,
        summary: &str,
        tags: &str,
        fingerprint: &str,
    ) -> Result<String, GatewayError> {
        if title.is_empty() {
            return Err(GatewayError::internal("audit title must not be empty"));
        }
        let title = truncate_to_bytes(title, TITLE_MAX_BYTES);
        let summary = truncate_to_bytes(summary, SUMMARY_MAX_BYTES);
        let content_hash: B256 = fingerprint
            .parse()
            .map_err(|_| GatewayError::internal(format!("invalid fingerprint: {fingerprint}")))?;

        // Nonce discipline: one write at a time per signer.
        let _guard = self.write_lock.lock().await;

        let call = self.contract.logMemory(
            op_type.as_u8(),
            title.to_string(),
            summary.to_string(),
            tags.to_string(),
            content_hash,
        );

        let gas = call
            .estimate_gas()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;
        let padded = gas.saturating_mul(GAS_MARGIN_NUM) / GAS_MARGIN_DEN;

        debug!(op = op_type.as_u8(), gas, padded, "submitting logMemory");

        let pending = tokio::time::timeout(self.submit_timeout, call.gas(padded).send())
            .await
            .map_err(|_| GatewayError::Timeout("transaction submission timed out".into()))?
            .map_err(|e| classify_chain_error(&e.to_string()))?;

        let receipt = pending
            .with_required_confirmations(self.confirmations)
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;

        if !receipt.status() {
            return Err(GatewayError::Reverted(
                "transaction included with status 0".into(),
            ));
        }

        Ok(format!("{:#x}", receipt.transaction_hash))
    }

    async fn total(&self) -> Result<u64, GatewayError> {
        let total: U256 = self
            .contract
            .getTotalMemories()
            .call()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;
        Ok(total.to::<u64>())
    }

    async fn record(&self, id: u64) -> Result<AuditRecord, GatewayError> {
        let ret = self
            .contract
            .getMemory(U256::from(id))
            .call()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;

        Ok(AuditRecord {
            id,
            user: ret.user.to_string(),
            op_type: ret.opType,
            title: ret.title,
            summary: ret.summary,
            tags: ret.tags,
            content_hash: ret.contentHash.to_string(),
            timestamp: ret.timestamp.to::<u64>(),
        })
    }

    async fn event_ids(&self, from_block: u64) -> Result<(Vec<u64>, u64), GatewayError> {
        let latest = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;
        if latest < from_block {
            return Ok((Vec::new(), latest));
        }

        let filter = Filter::new()
            .address(self.address)
            .event_signature(KinicMemoryLog::MemoryLogged::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(latest);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| classify_chain_error(&e.to_string()))?;

        let mut ids: Vec<u64> = logs
            .iter()
            .filter_map(|log| {
                log.log_decode::<KinicMemoryLog::MemoryLogged>()
                    .ok()
                    .map(|event| event.inner.data.id.to::<u64>())
            })
            .collect();
        ids.sort_unstable();
        Ok((ids, latest))
    }

    async fn health(&self) -> Result<(), GatewayError> {
        self.provider
            .get_chain_id()
            .await
            .map(|_| ())
            .map_err(|e| classify_chain_error(&e.to_string()))
    }

    fn signer_address(&self) -> String {
        self.signer.to_string()
    }

    fn contract_address(&self) -> String {
        self.address.to_string()
    }
}

/// Cut a string to at most `max` bytes without splitting a UTF-8 sequence.
fn truncate_to_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Map a provider/contract error message onto the gateway taxonomy.
fn classify_chain_error(detail: &str) -> GatewayError {
    let lower = detail.to_lowercase();
    if lower.contains("insufficient funds") || lower.contains("insufficient balance") {
        GatewayError::InsufficientFunds(detail.to_string())
    } else if lower.contains("revert") {
        GatewayError::Reverted(extract_revert_reason(detail))
    } else if lower.contains("timed out") || lower.contains("timeout") {
        GatewayError::Timeout(detail.to_string())
    } else {
        GatewayError::RemoteUnavailable {
            backend: "monad",
            detail: detail.to_string(),
        }
    }
}

/// Pull the human-readable reason out of a revert message when one exists.
fn extract_revert_reason(detail: &str) -> String {
    for marker in ["reverted with reason string '", "revert: "] {
        if let Some(start) = detail.find(marker) {
            let rest = &detail[start + marker.len()..];
            let end = rest.find('\'').unwrap_or(rest.len());
            return rest[..end].to_string();
        }
    }
    detail.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_to_bytes("hello", 100), "hello");
        assert_eq!(truncate_to_bytes("hello", 3), "hel");
        // 'é' is two bytes; cutting inside it must back off.
        let s = "caté";
        assert_eq!(truncate_to_bytes(s, 4), "cat");
        assert_eq!(truncate_to_bytes(s, 5), "caté");
    }

    #[test]
    fn insufficient_funds_classified() {
        let err = classify_chain_error("server returned an error: insufficient funds for gas");
        assert_eq!(err.kind(), "KindInsufficientFunds");
    }

    #[test]
    fn revert_reason_is_extracted() {
        let err = classify_chain_error(
            "execution reverted with reason string 'Title required' during call",
        );
        match err {
            GatewayError::Reverted(reason) => assert_eq!(reason, "Title required"),
            other => panic!("expected Reverted, got {other:?}"),
        }
    }

    #[test]
    fn timeout_classified() {
        let err = classify_chain_error("request timed out waiting for receipt");
        assert_eq!(err.kind(), "KindTimeout");
    }

    #[test]
    fn transport_errors_default_to_unavailable() {
        let err = classify_chain_error("connection refused (os error 111)");
        assert_eq!(err.kind(), "KindRemoteUnavailable");
        assert_eq!(err.backend(), Some("monad"));
    }
}
