//! Exposure tokens.
//!
//! A token is `hex(sha256("<item_id>/<secret>"))`. It is never stored: the
//! issuer verifies a presented token by recomputing it. Without the secret a
//! buyer cannot derive the token for an item, so a purchase request has to go
//! through [`TokenIssuer::expose`], which only hands out tokens while the
//! sale window is open.

use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use flashsale_core::types::{Exposure, Item, ItemId};
use sha2::{Digest, Sha256};
use std::fmt;

/// Mints and verifies exposure tokens with an injected secret.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl TokenIssuer {
    /// Create an issuer for `secret`.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Token bound to `item_id`.
    #[must_use]
    pub fn mint(&self, item_id: ItemId) -> String {
        let mut hasher = Sha256::new();
        hasher.update(item_id.to_string().as_bytes());
        hasher.update(b"/");
        hasher.update(self.secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether `token` is the token of `item_id`.
    ///
    /// A missing token is treated like a forged one.
    #[must_use]
    pub fn verify(&self, item_id: ItemId, token: Option<&str>) -> bool {
        let Some(token) = token else {
            return false;
        };
        constant_time_eq(self.mint(item_id).as_bytes(), token.as_bytes())
    }

    /// Hand out a token if `now` lies inside the item's sale window.
    ///
    /// Both window bounds are inclusive. Stock is not consulted: a sold-out
    /// sale still exposes its token and submissions come back `Closed`.
    #[must_use]
    pub fn expose(&self, item: &Item, now: DateTime<Utc>) -> Exposure {
        if item.in_window(now) {
            Exposure::Open {
                item_id: item.id,
                token: self.mint(item.id),
            }
        } else {
            Exposure::Closed {
                item_id: item.id,
                now,
                start_time: item.start_time,
                end_time: item.end_time,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use flashsale_testing::{open_item, test_epoch};
    use proptest::prelude::*;

    #[test]
    fn mint_is_deterministic_and_item_bound() {
        let issuer = TokenIssuer::new("s3cret");
        let token = issuer.mint(ItemId::new(1000));
        assert_eq!(token, issuer.mint(ItemId::new(1000)));
        assert_eq!(token.len(), 64);
        assert!(issuer.verify(ItemId::new(1000), Some(&token)));
        assert!(!issuer.verify(ItemId::new(1001), Some(&token)));
    }

    #[test]
    fn missing_token_fails() {
        assert!(!TokenIssuer::new("s3cret").verify(ItemId::new(1000), None));
    }

    #[test]
    fn tokens_depend_on_secret() {
        let item = ItemId::new(1000);
        let token = TokenIssuer::new("a").mint(item);
        assert!(!TokenIssuer::new("b").verify(item, Some(&token)));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let issuer = TokenIssuer::new("s3cret");
        let item = open_item(1000, 10, test_epoch());

        assert!(issuer.expose(&item, item.start_time).is_exposed());
        assert!(issuer.expose(&item, item.end_time).is_exposed());
        assert!(!issuer.expose(&item, item.start_time - Duration::milliseconds(1)).is_exposed());
        assert!(!issuer.expose(&item, item.end_time + Duration::milliseconds(1)).is_exposed());
    }

    #[test]
    fn closed_exposure_reports_window() {
        let issuer = TokenIssuer::new("s3cret");
        let item = open_item(1000, 10, test_epoch());
        let late = item.end_time + Duration::seconds(1);

        assert_eq!(
            issuer.expose(&item, late),
            Exposure::Closed {
                item_id: item.id,
                now: late,
                start_time: item.start_time,
                end_time: item.end_time,
            }
        );
    }

    #[test]
    fn debug_hides_secret() {
        let rendered = format!("{:?}", TokenIssuer::new("s3cret"));
        assert!(!rendered.contains("s3cret"));
    }

    proptest! {
        #[test]
        fn forged_tokens_never_verify(item in any::<i64>(), forged in "[0-9a-f]{0,80}") {
            let issuer = TokenIssuer::new("s3cret");
            let item = ItemId::new(item);
            prop_assume!(forged != issuer.mint(item));
            prop_assert!(!issuer.verify(item, Some(&forged)));
        }

        #[test]
        fn minted_tokens_always_verify(item in any::<i64>()) {
            let issuer = TokenIssuer::new("s3cret");
            let item = ItemId::new(item);
            let token = issuer.mint(item);
            prop_assert!(issuer.verify(item, Some(&token)));
        }
    }
}
