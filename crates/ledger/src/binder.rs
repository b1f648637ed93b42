use std::time::Duration;

use alloy_primitives::B256;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::LedgerError;

/// Errors the underlying transaction submission can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendTxError {
    #[error("nonce too low")]
    NonceTooLow,

    #[error("nonce too high")]
    NonceTooHigh,

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// The raw submission path the binder serializes over.
#[async_trait]
pub trait TransactionSender: Send + Sync {
    /// Submits a payload at a nonce, returning the transaction hash.
    async fn send(&self, nonce: u64, payload: Vec<u8>) -> Result<B256, SendTxError>;

    /// The account's next pending nonce.
    async fn pending_nonce(&self) -> Result<u64, SendTxError>;
}

/// Serializes transaction submission with explicit nonce tracking.
///
/// Submissions go out one at a time under a single lock. Nonce anomalies
/// are recovered locally: too-low bumps the nonce, too-high refreshes it
/// from the sender, and recovery is bounded so a persistent anomaly
/// surfaces after roughly a minute instead of spinning forever.
#[derive(Debug)]
pub struct TxBinder<S> {
    sender: S,
    nonce: Mutex<u64>,
    retry_delay: Duration,
    max_retries: u32,
}

impl<S: TransactionSender> TxBinder<S> {
    /// Creates a binder, seeding the nonce from the sender.
    pub async fn new(sender: S) -> Result<Self, LedgerError> {
        let nonce = sender
            .pending_nonce()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;
        Ok(Self {
            sender,
            nonce: Mutex::new(nonce),
            retry_delay: Duration::from_secs(1),
            max_retries: 60,
        })
    }

    /// Overrides the retry pacing. Test hook.
    pub fn with_retry(mut self, delay: Duration, retries: u32) -> Self {
        self.retry_delay = delay;
        self.max_retries = retries;
        self
    }

    /// Submits a payload, recovering from nonce anomalies.
    pub async fn send_tx(&self, payload: Vec<u8>) -> Result<B256, LedgerError> {
        let mut nonce = self.nonce.lock().await;
        let mut last_error = SendTxError::Rejected("no attempts".to_string());

        for attempt in 0..self.max_retries {
            match self.sender.send(*nonce, payload.clone()).await {
                Ok(hash) => {
                    *nonce += 1;
                    return Ok(hash);
                }
                Err(SendTxError::NonceTooLow) => {
                    tracing::warn!(nonce = *nonce, attempt, "nonce too low, bumping");
                    *nonce += 1;
                    last_error = SendTxError::NonceTooLow;
                }
                Err(SendTxError::NonceTooHigh) => {
                    let refreshed = self
                        .sender
                        .pending_nonce()
                        .await
                        .map_err(|e| LedgerError::Rpc(e.to_string()))?;
                    tracing::warn!(nonce = *nonce, refreshed, attempt, "nonce too high, refreshing");
                    *nonce = refreshed;
                    last_error = SendTxError::NonceTooHigh;
                }
                Err(SendTxError::Rejected(reason)) => {
                    return Err(LedgerError::Rpc(reason));
                }
            }
            tokio::time::sleep(self.retry_delay).await;
        }
        Err(LedgerError::Nonce(last_error.to_string()))
    }
}
