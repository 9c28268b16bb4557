//! Payment orders for one-time purchases and subscriptions.
//!
//! Paying is a three-step exchange: the backend creates an order, an external checkout collects
//! the money and hands back a signed confirmation, and the backend verifies that confirmation.
//! See [`crate::purchase`] for the flow that ties these together.

use crate::api::client::ApiClient;
use crate::api::error::ApiError;
use http::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    VideoPurchase,
    PlaylistPurchase,
    Subscription,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VideoPurchase => write!(f, "VIDEO_PURCHASE"),
            Self::PlaylistPurchase => write!(f, "PLAYLIST_PURCHASE"),
            Self::Subscription => write!(f, "SUBSCRIPTION"),
        }
    }
}

/// An order created by the backend, ready to be handed to the checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrder {
    /// Gateway order id. Older backends send it as `id`.
    #[serde(alias = "id")]
    pub order_id: String,
    /// Amount in the smallest currency unit.
    pub amount: u64,
    pub currency: String,
    /// Public checkout key to open the checkout with.
    #[serde(default)]
    pub key: Option<String>,
}

/// What the checkout hands back after collecting a payment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    #[serde(rename = "razorpayOrderId")]
    pub order_id: String,
    #[serde(rename = "razorpayPaymentId")]
    pub payment_id: String,
    #[serde(rename = "razorpaySignature")]
    pub signature: String,
}

impl fmt::Debug for PaymentConfirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentConfirmation")
            .field("order_id", &self.order_id)
            .field("payment_id", &self.payment_id)
            .field("signature", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl ApiClient {
    /// Creates an order for `kind`. `reference_id` names the video, playlist, or plan bought.
    #[instrument(skip(self))]
    pub async fn create_order(
        &self,
        kind: TransactionType,
        reference_id: &str,
    ) -> Result<PaymentOrder, ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct CreateOrder<'a> {
            #[serde(rename = "type")]
            kind: TransactionType,
            reference_id: &'a str,
        }

        let order: PaymentOrder = self
            .request_json(
                Method::POST,
                "/payments/create-order",
                None,
                Some(&CreateOrder { kind, reference_id }),
                "payment order",
            )
            .await?;
        tracing::debug!(order_id = %order.order_id, amount = order.amount, "created order");
        Ok(order)
    }

    /// Asks the backend to verify a checkout confirmation.
    ///
    /// An `Ok` answer may still report `success: false`; callers must check it.
    #[instrument(skip(self), ret)]
    pub async fn verify_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<VerifyPaymentResponse, ApiError> {
        self.request_json(
            Method::POST,
            "/payments/verify",
            None,
            Some(confirmation),
            "payment verification",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::tests::{build_client, tokens};
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;

    #[test]
    fn order_accepts_either_id_field() {
        let modern: PaymentOrder = serde_json::from_str(
            r#"{"orderId":"order_1","amount":4900,"currency":"INR","key":"rzp_test"}"#,
        )
        .unwrap();
        let legacy: PaymentOrder =
            serde_json::from_str(r#"{"id":"order_1","amount":4900,"currency":"INR"}"#).unwrap();
        assert_eq!(modern.order_id, legacy.order_id);
        assert_eq!(legacy.key, None);
    }

    #[test]
    fn confirmation_signature_is_not_printed() {
        let confirmation = PaymentConfirmation {
            order_id: "o".to_string(),
            payment_id: "p".to_string(),
            signature: "very-secret".to_string(),
        };
        assert!(!format!("{confirmation:?}").contains("very-secret"));
    }

    #[tokio::test]
    async fn create_order_sends_type_and_reference() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/payments/create-order")
            .match_header("authorization", "Bearer a")
            .match_body(Matcher::Json(serde_json::json!({
                "type": "PLAYLIST_PURCHASE",
                "referenceId": "p1",
            })))
            .with_status(201)
            .with_body(r#"{"orderId":"order_9","amount":19900,"currency":"INR"}"#)
            .create_async()
            .await;

        let client = build_client(&server);
        client.set_session(tokens("a", "r")).await;
        let order = client
            .create_order(TransactionType::PlaylistPurchase, "p1")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(order.order_id, "order_9");
        assert_eq!(order.amount, 19900);
    }

    #[tokio::test]
    async fn verify_uses_gateway_field_names() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/payments/verify")
            .match_body(Matcher::Json(serde_json::json!({
                "razorpayOrderId": "order_9",
                "razorpayPaymentId": "pay_1",
                "razorpaySignature": "sig",
            })))
            .with_status(201)
            .with_body(r#"{"success":true,"message":"Payment verified"}"#)
            .create_async()
            .await;

        let client = build_client(&server);
        let response = client
            .verify_payment(&PaymentConfirmation {
                order_id: "order_9".to_string(),
                payment_id: "pay_1".to_string(),
                signature: "sig".to_string(),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(response.success);
    }
}
