//! Unlocking content by paying for it.
//!
//! [`PurchaseFlow::unlock`] creates an order for an [`UnlockOffer`], hands it to a [`Checkout`]
//! to collect the money, has the backend verify the payment, and then resolves access again.
//! A failure before the payment is verified is a [`ApiError::PurchaseFailed`] and leaves the
//! viewer as it was. Once it is verified the purchase is kept, even if resolving again fails.

use crate::api::ApiClient;
use crate::api::error::ApiError;
use crate::api::payments::{PaymentConfirmation, PaymentOrder, TransactionType};
use crate::api::users::SubscriptionPlan;
use crate::entitlement::{ContentItem, EntitlementResolver, Resolution, UnlockOffer, Viewer};
use std::future::Future;
use tracing::instrument;

/// The external payment checkout.
///
/// Gets an order created by the backend and returns the gateway's signed confirmation once the
/// viewer has paid, or an error if they did not.
pub trait Checkout {
    fn collect(
        &self,
        order: &PaymentOrder,
    ) -> impl Future<Output = eyre::Result<PaymentConfirmation>> + Send;
}

/// Runs purchases for one viewer.
#[derive(Debug)]
pub struct PurchaseFlow<'a, C> {
    client: &'a ApiClient,
    checkout: &'a C,
}

impl<'a, C: Checkout> PurchaseFlow<'a, C> {
    pub fn new(client: &'a ApiClient, checkout: &'a C) -> Self {
        Self { client, checkout }
    }

    /// Buys `offer` and resolves access to `item` again.
    ///
    /// On success the purchase is recorded on `viewer` (or their plan upgraded, for a
    /// subscription) and the fresh resolution is returned. A [`ApiError::PurchaseFailed`] leaves
    /// `viewer` untouched. Any other error comes from resolving again after a verified payment,
    /// in which case the purchase has already been recorded on `viewer`.
    #[instrument(
        skip_all,
        fields(item = %item.id, purchase = %offer.purchase, price = %offer.price)
    )]
    pub async fn unlock(
        &self,
        item: &ContentItem,
        viewer: &mut Viewer,
        offer: &UnlockOffer,
    ) -> Result<Resolution, ApiError> {
        if viewer.is_anonymous() {
            return Err(ApiError::purchase_failed("log in to purchase"));
        }
        let plan = match offer.purchase {
            TransactionType::Subscription => Some(subscription_plan(&offer.reference_id)?),
            TransactionType::VideoPurchase | TransactionType::PlaylistPurchase => None,
        };

        let order = self
            .client
            .create_order(offer.purchase, &offer.reference_id)
            .await
            .map_err(|e| failed("create order", e))?;

        let confirmation = match self.checkout.collect(&order).await {
            Ok(confirmation) => confirmation,
            Err(e) => {
                tracing::warn!(order_id = %order.order_id, error = %e, "checkout did not complete");
                return Err(ApiError::PurchaseFailed {
                    reason: "checkout did not complete".to_string(),
                    source: Some(e.into()),
                });
            }
        };
        if confirmation.order_id != order.order_id {
            return Err(ApiError::purchase_failed(format!(
                "checkout confirmed order {} instead of {}",
                confirmation.order_id, order.order_id
            )));
        }

        let verified = self
            .client
            .verify_payment(&confirmation)
            .await
            .map_err(|e| failed("verify payment", e))?;
        if !verified.success {
            return Err(ApiError::purchase_failed(if verified.message.is_empty() {
                "payment was not verified".to_string()
            } else {
                verified.message
            }));
        }
        tracing::info!(order_id = %order.order_id, "payment verified");

        match plan {
            Some(plan) => viewer.plan = plan,
            None => viewer.record_purchase(&offer.reference_id),
        }
        EntitlementResolver::new(self.client)
            .resolve(item, viewer)
            .await
    }
}

fn failed(step: &str, e: ApiError) -> ApiError {
    tracing::warn!(error = %e, "{step} failed");
    ApiError::PurchaseFailed {
        reason: format!("could not {step}"),
        source: Some(Box::new(e)),
    }
}

fn subscription_plan(reference_id: &str) -> Result<SubscriptionPlan, ApiError> {
    match reference_id {
        "BASIC" => Ok(SubscriptionPlan::Basic),
        "PREMIUM" => Ok(SubscriptionPlan::Premium),
        other => Err(ApiError::purchase_failed(format!(
            "'{other}' is not a plan that can be bought"
        ))),
    }
}
