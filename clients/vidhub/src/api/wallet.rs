//! Creator wallet: earnings balance, its ledger, and payouts.

use crate::api::client::ApiClient;
use crate::api::error::ApiError;
use crate::api::types::{PagedStream, Paginated};
use http::Method;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: String,
    pub balance: f64,
    /// Held back for withdrawals in flight.
    #[serde(default)]
    pub locked_balance: f64,
    #[serde(default)]
    pub total_withdrawn: f64,
}

impl Wallet {
    pub fn available(&self) -> f64 {
        (self.balance - self.locked_balance).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionDirection {
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionReason {
    Earning,
    Withdrawal,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransaction {
    pub id: String,
    #[serde(rename = "type")]
    pub direction: TransactionDirection,
    #[serde(rename = "subType")]
    pub reason: TransactionReason,
    pub amount: f64,
    pub status: TransactionStatus,
    #[serde(default)]
    pub reference_id: Option<String>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Pending,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payout {
    pub id: String,
    pub amount: f64,
    pub status: PayoutStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default, rename = "razorpayPayoutId")]
    pub gateway_payout_id: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub payout: Payout,
    pub transaction: WalletTransaction,
}

impl ApiClient {
    #[instrument(skip(self))]
    pub async fn get_wallet(&self) -> Result<Wallet, ApiError> {
        self.request_json(Method::GET, "/wallet", None, None::<&()>, "wallet")
            .await
    }

    /// Returns a paginated stream over the wallet ledger, newest first.
    #[instrument(skip(self))]
    pub fn list_wallet_transactions(
        &self,
        page_size: u32,
    ) -> impl Stream<Item = Result<WalletTransaction, ApiError>> + use<'_> {
        PagedStream::new(move |page| async move {
            let page = page.to_string();
            let limit = page_size.to_string();
            let transactions: Paginated<WalletTransaction> = self
                .request_json(
                    Method::GET,
                    "/wallet/transactions",
                    Some(&[("page", page.as_str()), ("limit", limit.as_str())]),
                    None::<&()>,
                    "wallet transactions",
                )
                .await?;
            tracing::debug!(
                total = transactions.meta.total,
                returned_items = transactions.data.len(),
                "fetched wallet transactions"
            );
            Ok(transactions.into_page())
        })
    }

    /// Requests a payout of `amount` to the account's bank details.
    #[instrument(skip(self))]
    pub async fn request_withdrawal(&self, amount: f64) -> Result<Withdrawal, ApiError> {
        #[derive(Serialize)]
        struct Withdraw {
            amount: f64,
        }

        if !amount.is_finite() || amount <= 0.0 {
            return Err(ApiError::InvalidInput(format!(
                "withdrawal amount must be positive, got {amount}"
            )));
        }
        let withdrawal: Withdrawal = self
            .request_json(
                Method::POST,
                "/wallet/withdraw",
                None,
                Some(&Withdraw { amount }),
                "withdrawal",
            )
            .await?;
        tracing::info!(payout = %withdrawal.payout.id, amount, "requested withdrawal");
        Ok(withdrawal)
    }
}
