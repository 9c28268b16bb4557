//! Access gating for paid and subscription-only content.
//!
//! Whether a viewer may watch something is decided from three inputs, all passed explicitly:
//! the item's [`AccessTier`], who owns it, and the [`Viewer`] (their id, subscription plan, and
//! the purchases confirmed during this session). The backend stays the authority: for videos,
//! the [`EntitlementResolver`] asks for a signed playback URL, and the backend's answer overrides
//! the local rules in both directions.
//!
//! Decisions are never cached. Resolve again whenever the viewer or the item changes, and right
//! after a purchase went through.

use crate::api::error::ApiError;
use crate::api::payments::TransactionType;
use crate::api::users::{SubscriptionPlan, User};
use crate::api::videos::{ProcessingStatus, SignedUrl};
use crate::api::ApiClient;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use tracing::instrument;

/// A non-negative, finite amount of money in the platform currency.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Price(f64);

impl Price {
    pub const ZERO: Price = Price(0.0);

    pub fn new(amount: f64) -> Result<Self, ApiError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(ApiError::InvalidInput(format!(
                "price must be a non-negative amount, got {amount}"
            )));
        }
        Ok(Self(amount))
    }

    pub fn amount(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// How an item is gated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AccessTier {
    Free,
    /// Unlocked by a one-time purchase.
    Paid { price: Price },
    /// Unlocked by any paid subscription plan.
    SubscriptionOnly,
    /// Unlocked by a paid subscription plan or by a one-time purchase.
    PaidAndSubscription { price: Price },
}

impl AccessTier {
    pub fn price(self) -> Option<Price> {
        match self {
            Self::Paid { price } | Self::PaidAndSubscription { price } => Some(price),
            Self::Free | Self::SubscriptionOnly => None,
        }
    }

    pub fn flags(self) -> AccessFlags {
        AccessFlags {
            is_paid: self.price().is_some(),
            price: Some(self.price().unwrap_or(Price::ZERO).amount()),
            is_subscription_only: matches!(
                self,
                Self::SubscriptionOnly | Self::PaidAndSubscription { .. }
            ),
        }
    }
}

/// The gating flags as the backend sends them.
///
/// Use [`AccessFlags::tier`] to turn them into an [`AccessTier`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessFlags {
    #[serde(default)]
    pub is_paid: bool,
    #[serde(default, deserialize_with = "lenient_price")]
    pub price: Option<f64>,
    #[serde(default)]
    pub is_subscription_only: bool,
}

impl AccessFlags {
    /// A paid item without a price is treated as costing nothing; the price of a free item is
    /// ignored.
    pub fn tier(&self) -> Result<AccessTier, ApiError> {
        let price = || Price::new(self.price.unwrap_or(0.0));
        Ok(match (self.is_paid, self.is_subscription_only) {
            (false, false) => AccessTier::Free,
            (false, true) => AccessTier::SubscriptionOnly,
            (true, false) => AccessTier::Paid { price: price()? },
            (true, true) => AccessTier::PaidAndSubscription { price: price()? },
        })
    }
}

// decimal columns come back as strings ("49.00") from some endpoints
fn lenient_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPrice {
        Number(f64),
        Text(String),
    }

    match Option::<RawPrice>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawPrice::Number(n)) => Ok(Some(n)),
        Some(RawPrice::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid price '{s}'"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Video,
    Playlist,
}

impl ContentKind {
    /// The transaction that buys one item of this kind.
    pub fn purchase_type(self) -> TransactionType {
        match self {
            Self::Video => TransactionType::VideoPurchase,
            Self::Playlist => TransactionType::PlaylistPurchase,
        }
    }
}

/// The gating-relevant view of a video or playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub id: String,
    pub owner_id: String,
    pub kind: ContentKind,
    pub tier: AccessTier,
    /// Encoding status; always `None` for playlists.
    pub status: Option<ProcessingStatus>,
}

/// Who is asking for access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    /// `None` for anonymous viewers.
    pub id: Option<String>,
    pub plan: SubscriptionPlan,
    /// Items bought and verified during this session.
    purchases: BTreeSet<String>,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(id: impl Into<String>, plan: SubscriptionPlan) -> Self {
        Self {
            id: Some(id.into()),
            plan,
            purchases: BTreeSet::new(),
        }
    }

    pub fn from_user(user: &User) -> Self {
        Self::new(user.id.clone(), user.subscription_plan)
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_none()
    }

    pub fn owns(&self, item: &ContentItem) -> bool {
        self.id
            .as_deref()
            .is_some_and(|id| !id.is_empty() && id == item.owner_id)
    }

    pub fn has_purchased(&self, item_id: &str) -> bool {
        self.purchases.contains(item_id)
    }

    /// Records a verified purchase so that the next resolution unlocks the item.
    pub(crate) fn record_purchase(&mut self, item_id: &str) {
        self.purchases.insert(item_id.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessReason {
    Owner,
    FreeContent,
    Subscribed,
    UnlockedViaPurchase,
    Locked,
}

impl fmt::Display for AccessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => write!(f, "OWNER"),
            Self::FreeContent => write!(f, "FREE_CONTENT"),
            Self::Subscribed => write!(f, "SUBSCRIBED"),
            Self::UnlockedViaPurchase => write!(f, "UNLOCKED_VIA_PURCHASE"),
            Self::Locked => write!(f, "LOCKED"),
        }
    }
}

/// What it takes to unlock a locked item.
#[derive(Debug, Clone, PartialEq)]
pub struct UnlockOffer {
    pub price: Price,
    pub purchase: TransactionType,
    /// The item id for item purchases, the plan for subscriptions.
    pub reference_id: String,
}

impl UnlockOffer {
    fn for_item(item: &ContentItem, price: Price) -> Self {
        Self {
            price,
            purchase: item.kind.purchase_type(),
            reference_id: item.id.clone(),
        }
    }

    fn for_subscription(plan: SubscriptionPlan) -> Self {
        Self {
            // plan prices are fixed, well-formed constants
            price: Price(plan.monthly_price()),
            purchase: TransactionType::Subscription,
            reference_id: plan.to_string(),
        }
    }

    /// The cheapest way to unlock `item`, if money can unlock it at all.
    pub fn cheapest_for(item: &ContentItem) -> Option<Self> {
        match item.tier {
            AccessTier::Paid { price } | AccessTier::PaidAndSubscription { price } => {
                Some(Self::for_item(item, price))
            }
            AccessTier::SubscriptionOnly => Some(Self::for_subscription(SubscriptionPlan::Basic)),
            AccessTier::Free => None,
        }
    }
}

/// The outcome of one access check. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDecision {
    reason: AccessReason,
    unlock: Option<UnlockOffer>,
}

impl AccessDecision {
    fn granted_because(reason: AccessReason) -> Self {
        debug_assert_ne!(reason, AccessReason::Locked);
        Self {
            reason,
            unlock: None,
        }
    }

    fn locked(unlock: Option<UnlockOffer>) -> Self {
        Self {
            reason: AccessReason::Locked,
            unlock,
        }
    }

    pub fn granted(&self) -> bool {
        self.reason != AccessReason::Locked
    }

    pub fn reason(&self) -> AccessReason {
        self.reason
    }

    /// How to unlock the item; only set when access is not granted.
    pub fn unlock(&self) -> Option<&UnlockOffer> {
        self.unlock.as_ref()
    }
}

/// Decides access from local knowledge alone. First matching rule wins:
///
/// 1. the viewer owns the item
/// 2. the item is free
/// 3. the item is subscription-only and the viewer has a paid plan, even if the item can also
///    be bought
/// 4. the viewer bought the item during this session
/// 5. otherwise it is locked, with the cheapest [`UnlockOffer`]
pub fn resolve_access(item: &ContentItem, viewer: &Viewer) -> AccessDecision {
    if viewer.owns(item) {
        return AccessDecision::granted_because(AccessReason::Owner);
    }
    match item.tier {
        AccessTier::Free => AccessDecision::granted_because(AccessReason::FreeContent),
        AccessTier::SubscriptionOnly | AccessTier::PaidAndSubscription { .. }
            if viewer.plan.is_paid() =>
        {
            AccessDecision::granted_because(AccessReason::Subscribed)
        }
        _ if viewer.has_purchased(&item.id) => {
            AccessDecision::granted_because(AccessReason::UnlockedViaPurchase)
        }
        _ => AccessDecision::locked(UnlockOffer::cheapest_for(item)),
    }
}

/// Where signed playback URLs come from.
pub trait PlaybackSource {
    /// Requests a signed playback URL; see [`ApiClient::signed_playback_url`] for the error
    /// contract.
    fn signed_playback_url(
        &self,
        video_id: &str,
    ) -> impl Future<Output = Result<SignedUrl, ApiError>> + Send;
}

impl PlaybackSource for ApiClient {
    fn signed_playback_url(
        &self,
        video_id: &str,
    ) -> impl Future<Output = Result<SignedUrl, ApiError>> + Send {
        ApiClient::signed_playback_url(self, video_id)
    }
}

/// A resolved access decision, plus a playback URL if the item is a video the viewer may watch.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub decision: AccessDecision,
    pub playback: Option<SignedUrl>,
}

impl Resolution {
    fn without_playback(decision: AccessDecision) -> Self {
        Self {
            decision,
            playback: None,
        }
    }
}

/// Resolves access against the backend.
#[derive(Debug)]
pub struct EntitlementResolver<'a, S> {
    source: &'a S,
}

impl<'a, S: PlaybackSource> EntitlementResolver<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Resolves access for `viewer` to `item`, fetching a signed playback URL for videos.
    ///
    /// For videos the backend has the last word:
    ///
    /// - a `403` on the signed URL locks the item, even if the local rules granted it
    /// - a signed URL for an item the local rules locked means the viewer bought it in an
    ///   earlier session, so it is granted as [`AccessReason::UnlockedViaPurchase`]
    /// - a `404` is returned as [`ApiError::NotFound`]; it is not a locked state
    ///
    /// Anonymous viewers cannot own purchases, so a locked item is not checked with the
    /// backend for them.
    #[instrument(skip_all, fields(item = %item.id, viewer = ?viewer.id))]
    pub async fn resolve(
        &self,
        item: &ContentItem,
        viewer: &Viewer,
    ) -> Result<Resolution, ApiError> {
        let decision = resolve_access(item, viewer);
        tracing::debug!(reason = %decision.reason(), "resolved access locally");

        if item.kind != ContentKind::Video {
            return Ok(Resolution::without_playback(decision));
        }
        if !decision.granted() && viewer.is_anonymous() {
            return Ok(Resolution::without_playback(decision));
        }

        match self.source.signed_playback_url(&item.id).await {
            Ok(url) => {
                let decision = if decision.granted() {
                    decision
                } else {
                    tracing::debug!("backend issued playback URL for locally locked item");
                    AccessDecision::granted_because(AccessReason::UnlockedViaPurchase)
                };
                Ok(Resolution {
                    decision,
                    playback: Some(url),
                })
            }
            Err(ApiError::NotEntitled { message }) => {
                tracing::debug!(reason = %message, "backend refused playback, item is locked");
                Ok(Resolution::without_playback(AccessDecision::locked(
                    UnlockOffer::cheapest_for(item),
                )))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::tests::build_client;
    use crate::api::error::ErrorKind;
    use mockito::Server;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    const ALL_TIERS: [AccessTier; 4] = [
        AccessTier::Free,
        AccessTier::Paid { price: Price(5.0) },
        AccessTier::SubscriptionOnly,
        AccessTier::PaidAndSubscription { price: Price(5.0) },
    ];

    fn item(kind: ContentKind, tier: AccessTier) -> ContentItem {
        ContentItem {
            id: "item-1".to_string(),
            owner_id: "creator".to_string(),
            kind,
            tier,
            status: (kind == ContentKind::Video).then_some(ProcessingStatus::Completed),
        }
    }

    fn video(tier: AccessTier) -> ContentItem {
        item(ContentKind::Video, tier)
    }

    fn viewers() -> Vec<Viewer> {
        vec![
            Viewer::anonymous(),
            Viewer::new("someone", SubscriptionPlan::Free),
            Viewer::new("someone", SubscriptionPlan::Basic),
            Viewer::new("someone", SubscriptionPlan::Premium),
            Viewer::new("creator", SubscriptionPlan::Free),
        ]
    }

    /// Hands out scripted answers and remembers what was asked.
    struct ScriptedSource {
        answer: fn() -> Result<SignedUrl, ApiError>,
        requested: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(answer: fn() -> Result<SignedUrl, ApiError>) -> Self {
            Self {
                answer,
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> usize {
            self.requested.lock().unwrap().len()
        }
    }

    impl PlaybackSource for ScriptedSource {
        fn signed_playback_url(
            &self,
            video_id: &str,
        ) -> impl Future<Output = Result<SignedUrl, ApiError>> + Send {
            self.requested.lock().unwrap().push(video_id.to_string());
            let answer = (self.answer)();
            async move { answer }
        }
    }

    fn signed() -> Result<SignedUrl, ApiError> {
        Ok(SignedUrl {
            url: "https://cdn.example.com/v/item-1.m3u8?sig=abc".to_string(),
            expires_at: None,
        })
    }

    fn forbidden() -> Result<SignedUrl, ApiError> {
        Err(ApiError::NotEntitled {
            message: "purchase required".to_string(),
        })
    }

    fn missing() -> Result<SignedUrl, ApiError> {
        Err(ApiError::NotFound {
            message: "video not found".to_string(),
        })
    }

    #[test]
    fn free_content_is_granted_to_everyone() {
        for viewer in viewers() {
            let decision = resolve_access(&video(AccessTier::Free), &viewer);
            assert!(decision.granted(), "{viewer:?}");
            assert!(decision.unlock().is_none());
        }
    }

    #[test]
    fn owner_is_granted_regardless_of_tier() {
        let owner = Viewer::new("creator", SubscriptionPlan::Free);
        for tier in ALL_TIERS {
            for kind in [ContentKind::Video, ContentKind::Playlist] {
                let decision = resolve_access(&item(kind, tier), &owner);
                assert_eq!(decision.reason(), AccessReason::Owner, "{tier:?}");
            }
        }
    }

    #[test]
    fn subscription_beats_one_time_price() {
        let premium = Viewer::new("fan", SubscriptionPlan::Premium);
        for tier in [
            AccessTier::SubscriptionOnly,
            AccessTier::PaidAndSubscription { price: Price(5.0) },
        ] {
            let decision = resolve_access(&video(tier), &premium);
            assert_eq!(decision.reason(), AccessReason::Subscribed);
        }

        // a subscription does not unlock items that are only sold one at a time
        let decision = resolve_access(&video(AccessTier::Paid { price: Price(5.0) }), &premium);
        assert_eq!(decision.reason(), AccessReason::Locked);
    }

    #[test]
    fn anonymous_viewer_sees_unlock_price() {
        let decision = resolve_access(
            &video(AccessTier::Paid {
                price: Price(49.5),
            }),
            &Viewer::anonymous(),
        );
        assert!(!decision.granted());
        assert_eq!(decision.reason(), AccessReason::Locked);
        assert_eq!(
            decision.unlock(),
            Some(&UnlockOffer {
                price: Price(49.5),
                purchase: TransactionType::VideoPurchase,
                reference_id: "item-1".to_string(),
            })
        );
    }

    #[test]
    fn locked_offers_match_item_kind() {
        let free_plan = Viewer::new("someone", SubscriptionPlan::Free);

        let playlist = item(ContentKind::Playlist, AccessTier::Paid { price: Price(20.0) });
        let offer = resolve_access(&playlist, &free_plan).unlock().cloned().unwrap();
        assert_eq!(offer.purchase, TransactionType::PlaylistPurchase);
        assert_eq!(offer.price, Price(20.0));

        let offer = resolve_access(&video(AccessTier::SubscriptionOnly), &free_plan)
            .unlock()
            .cloned()
            .unwrap();
        assert_eq!(offer.purchase, TransactionType::Subscription);
        assert_eq!(offer.reference_id, "BASIC");
        assert_eq!(offer.price, Price(9.99));

        // both ways in, the one-time purchase is offered
        let offer = resolve_access(
            &video(AccessTier::PaidAndSubscription { price: Price(3.0) }),
            &free_plan,
        )
        .unlock()
        .cloned()
        .unwrap();
        assert_eq!(offer.purchase, TransactionType::VideoPurchase);
    }

    #[test]
    fn recorded_purchase_unlocks() {
        let mut viewer = Viewer::new("buyer", SubscriptionPlan::Free);
        let paid = item(ContentKind::Playlist, AccessTier::Paid { price: Price(1.0) });
        assert!(!resolve_access(&paid, &viewer).granted());

        viewer.record_purchase("item-1");
        assert_eq!(
            resolve_access(&paid, &viewer).reason(),
            AccessReason::UnlockedViaPurchase
        );
    }

    #[test]
    fn flags_convert_to_tiers() {
        let flags = |is_paid, price, is_subscription_only| AccessFlags {
            is_paid,
            price,
            is_subscription_only,
        };
        assert_eq!(flags(false, Some(10.0), false).tier().unwrap(), AccessTier::Free);
        assert_eq!(
            flags(true, None, false).tier().unwrap(),
            AccessTier::Paid { price: Price::ZERO }
        );
        assert_eq!(
            flags(true, Some(2.5), true).tier().unwrap(),
            AccessTier::PaidAndSubscription { price: Price(2.5) }
        );
        assert_eq!(
            flags(false, None, true).tier().unwrap(),
            AccessTier::SubscriptionOnly
        );
        assert!(flags(true, Some(-1.0), false).tier().is_err());
        assert!(flags(true, Some(f64::NAN), false).tier().is_err());

        for tier in ALL_TIERS {
            assert_eq!(tier.flags().tier().unwrap(), tier);
        }
    }

    #[test]
    fn price_may_arrive_as_string() {
        let flags: AccessFlags =
            serde_json::from_str(r#"{"isPaid":true,"price":"49.00"}"#).unwrap();
        assert_eq!(flags.tier().unwrap(), AccessTier::Paid { price: Price(49.0) });

        let flags: AccessFlags = serde_json::from_str(r#"{"price":null}"#).unwrap();
        assert_eq!(flags, AccessFlags::default());

        assert!(serde_json::from_str::<AccessFlags>(r#"{"price":"lots"}"#).is_err());
    }

    #[tokio::test]
    async fn granted_video_gets_signed_url() {
        let source = ScriptedSource::new(signed);
        let resolution = EntitlementResolver::new(&source)
            .resolve(&video(AccessTier::Free), &Viewer::anonymous())
            .await
            .unwrap();

        assert_eq!(resolution.decision.reason(), AccessReason::FreeContent);
        assert_eq!(resolution.playback, signed().ok());
        assert_eq!(source.requests(), 1);
    }

    #[tokio::test]
    async fn forbidden_signed_url_locks_without_error() {
        let source = ScriptedSource::new(forbidden);
        let subscriber = Viewer::new("fan", SubscriptionPlan::Basic);
        let resolution = EntitlementResolver::new(&source)
            .resolve(&video(AccessTier::SubscriptionOnly), &subscriber)
            .await
            .unwrap();

        assert!(!resolution.decision.granted());
        assert_eq!(resolution.decision.reason(), AccessReason::Locked);
        assert!(resolution.decision.unlock().is_some());
        assert_eq!(resolution.playback, None);
    }

    #[tokio::test]
    async fn missing_video_is_terminal_not_found() {
        let source = ScriptedSource::new(missing);
        let err = EntitlementResolver::new(&source)
            .resolve(&video(AccessTier::Free), &Viewer::anonymous())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.is_user_visible());
    }

    #[tokio::test]
    async fn backend_purchase_unlocks_locally_locked_video() {
        let source = ScriptedSource::new(signed);
        let buyer = Viewer::new("buyer", SubscriptionPlan::Free);
        let resolution = EntitlementResolver::new(&source)
            .resolve(&video(AccessTier::Paid { price: Price(5.0) }), &buyer)
            .await
            .unwrap();

        assert_eq!(
            resolution.decision.reason(),
            AccessReason::UnlockedViaPurchase
        );
        assert!(resolution.playback.is_some());
    }

    #[tokio::test]
    async fn anonymous_locked_video_skips_backend() {
        let source = ScriptedSource::new(signed);
        let resolution = EntitlementResolver::new(&source)
            .resolve(
                &video(AccessTier::Paid { price: Price(5.0) }),
                &Viewer::anonymous(),
            )
            .await
            .unwrap();

        assert_eq!(resolution.decision.reason(), AccessReason::Locked);
        assert_eq!(source.requests(), 0);
    }

    #[tokio::test]
    async fn playlists_never_request_playback() {
        let source = ScriptedSource::new(signed);
        let resolution = EntitlementResolver::new(&source)
            .resolve(
                &item(ContentKind::Playlist, AccessTier::Free),
                &Viewer::anonymous(),
            )
            .await
            .unwrap();

        assert!(resolution.decision.granted());
        assert_eq!(resolution.playback, None);
        assert_eq!(source.requests(), 0);
    }

    #[tokio::test]
    async fn api_client_is_a_playback_source() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/video/item-1/stream-url")
            .with_status(404)
            .with_body(r#"{"statusCode":404,"message":"Video not found"}"#)
            .create_async()
            .await;

        let client = build_client(&server);
        let err = EntitlementResolver::new(&client)
            .resolve(&video(AccessTier::Free), &Viewer::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
