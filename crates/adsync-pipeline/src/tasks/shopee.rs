//! Shopee order pull.
//!
//! Each bound shop's token is checked with the shop-info probe first and
//! renewed when Shopee rejects it, so the pull itself runs on a working
//! token. Renewed tokens are written back per owner in one call once every
//! shop has been pulled.

use std::collections::BTreeMap;

use adsync_core::{DateRange, Platform};
use adsync_db::{AccountToken, CredentialStore, DocumentStore, OwnerCredentialUpdate, WriteOp};
use adsync_platforms::shopee::{normalize_order, parse_shop_id};
use adsync_platforms::{ShopeeClient, TokenAuthority, TokenSubject};
use anyhow::Context;
use chrono::Utc;

use super::{platform_id, replace_ops, upsert_batch};
use crate::runner::{BatchRunner, RunSummary, WorkItem};

pub const ORDERS_COLLECTION: &str = "shopee_orders";

/// A shop whose token passed the probe, possibly after a refresh.
#[derive(Debug, Clone)]
struct ReadyShop {
    shop_id: i64,
    access_token: String,
    renewed: Option<OwnerCredentialUpdate>,
}

impl WorkItem for ReadyShop {
    fn key(&self) -> String {
        format!("shop {}", self.shop_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderReport {
    pub summary: RunSummary,
    /// Owners whose renewed token was written back.
    pub renewed: u64,
}

async fn prepare_shop(client: &ShopeeClient, shop: &AccountToken) -> anyhow::Result<Vec<ReadyShop>> {
    let shop_id = parse_shop_id(&shop.account_id)?;
    let subject = TokenSubject::new(shop.access_token.as_str())
        .with_refresh_token(shop.refresh_token.clone())
        .for_account(shop.account_id.as_str());

    if client.probe(&subject).await?.is_valid() {
        return Ok(vec![ReadyShop {
            shop_id,
            access_token: shop.access_token.clone(),
            renewed: None,
        }]);
    }

    tracing::info!(shop_id, "shopee token rejected, refreshing");
    let grant = client
        .refresh(&subject)
        .await
        .with_context(|| format!("refreshing token of shop {shop_id}"))?;
    let renewed = OwnerCredentialUpdate {
        user_id: shop.user_id,
        access_token: grant.access_token.clone(),
        refresh_token: grant.refresh_token.clone(),
        token_expires_at: grant.expires_at(Utc::now()),
    };
    Ok(vec![ReadyShop {
        shop_id,
        access_token: grant.access_token,
        renewed: Some(renewed),
    }])
}

async fn pull_orders(
    client: &ShopeeClient,
    shop: &ReadyShop,
    range: DateRange,
) -> anyhow::Result<Vec<WriteOp>> {
    let serials = client
        .fetch_order_list(&shop.access_token, shop.shop_id, range)
        .await?;
    if serials.is_empty() {
        tracing::debug!(shop_id = shop.shop_id, "no orders in range");
        return Ok(Vec::new());
    }
    let details = client
        .fetch_order_details(&shop.access_token, shop.shop_id, &serials)
        .await?;
    tracing::debug!(
        shop_id = shop.shop_id,
        serials = serials.len(),
        details = details.len(),
        "shopee orders fetched"
    );
    replace_ops(
        &shop.key(),
        details
            .into_iter()
            .map(|detail| normalize_order(shop.shop_id, detail).map(Some)),
    )
}

/// Last renewal per owner; shops of one owner share a credential.
fn owner_updates(shops: &[ReadyShop]) -> Vec<OwnerCredentialUpdate> {
    let mut by_owner = BTreeMap::new();
    for update in shops.iter().filter_map(|s| s.renewed.clone()) {
        by_owner.insert(update.user_id, update);
    }
    by_owner.into_values().collect()
}

/// Pull the orders created within `range` for every bound shop into
/// `shopee_orders`.
///
/// # Errors
///
/// Fails when the shop list cannot be loaded or the renewed tokens cannot
/// be written back.
pub async fn sync_orders(
    store: &dyn DocumentStore,
    credentials: &dyn CredentialStore,
    client: &ShopeeClient,
    runner: &BatchRunner,
    range: DateRange,
) -> anyhow::Result<OrderReport> {
    let platform_id = platform_id(credentials, Platform::Shopee).await?;
    let shops = credentials.list_account_tokens(platform_id).await?;
    tracing::info!(
        shops = shops.len(),
        start = %range.start_str(),
        end = %range.end_str(),
        "pulling shopee orders"
    );

    let (ready, checked) = runner
        .collect(&shops, |shop| prepare_shop(client, shop))
        .await;

    let mut summary = runner
        .run(
            &ready,
            |shop| pull_orders(client, shop, range),
            |ops| upsert_batch(store, ORDERS_COLLECTION, ops),
        )
        .await;
    summary.failed_items += checked.failed_items;

    let updates = owner_updates(&ready);
    let renewed = if updates.is_empty() {
        0
    } else {
        credentials
            .apply_owner_updates(platform_id, &updates)
            .await
            .context("writing back renewed shopee tokens")?
    };
    tracing::info!(renewed, "shopee tokens written back");

    Ok(OrderReport { summary, renewed })
}

#[cfg(test)]
mod tests {
    use adsync_core::{ShopeeConfig, ShopeeEnv};
    use adsync_db::MemoryDocumentStore;
    use chrono::NaiveDate;
    use serde_json::json;
    use tracing_test::traced_test;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::testing::{credential, test_fetcher, FakeCredentialStore};

    fn client(server: &MockServer) -> ShopeeClient {
        let config = ShopeeConfig {
            env: ShopeeEnv::Testing,
            base_url: server.uri(),
            partner_id: 1000,
            secret_key: "partner-secret".to_owned(),
            api_version: "v2".to_owned(),
        };
        ShopeeClient::new(test_fetcher(), config)
    }

    fn range() -> DateRange {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        DateRange::new(day, day).unwrap()
    }

    async fn mount_shop_info(server: &MockServer, token: &str, status: u16) {
        let body = if status == 200 {
            json!({"error": "", "message": "", "shop_name": "Demo"})
        } else {
            json!({"error": "invalid_acceess_token", "message": "Invalid access_token."})
        };
        Mock::given(method("GET"))
            .and(path("/api/v2/shop/get_shop_info"))
            .and(query_param("access_token", token))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_orders(server: &MockServer, token: &str, serials: &[&str]) {
        let list: Vec<_> = serials.iter().map(|sn| json!({"order_sn": sn})).collect();
        let details: Vec<_> = serials
            .iter()
            .map(|sn| json!({"order_sn": sn, "order_status": "COMPLETED"}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/api/v2/order/get_order_list"))
            .and(query_param("access_token", token))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": "",
                "response": {"more": false, "next_cursor": "", "order_list": list}
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/order/get_order_detail"))
            .and(query_param("access_token", token))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": "",
                "response": {"order_list": details}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn orders_are_upserted_by_serial_number() {
        let server = MockServer::start().await;
        mount_shop_info(&server, "a1", 200).await;
        mount_orders(&server, "a1", &["SN1", "SN2"]).await;
        let store = MemoryDocumentStore::new();
        let credentials = FakeCredentialStore::new()
            .with_credential(credential(1, 1, Platform::Shopee, "a1"))
            .with_accounts(1, &["42"]);
        let runner = BatchRunner::new(10, 5);
        let client = client(&server);

        let report = sync_orders(&store, &credentials, &client, &runner, range())
            .await
            .unwrap();
        sync_orders(&store, &credentials, &client, &runner, range())
            .await
            .unwrap();

        let orders = store.documents(ORDERS_COLLECTION);
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o["shop_id"] == 42));
        assert_eq!(report.summary.records, 2);
        assert_eq!(report.renewed, 0);
        assert_eq!(credentials.write_calls(), 0);
    }

    #[tokio::test]
    async fn rejected_token_is_refreshed_and_written_back_once() {
        let server = MockServer::start().await;
        mount_shop_info(&server, "a1", 403).await;
        Mock::given(method("POST"))
            .and(path("/api/v2/auth/access_token/get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": "", "access_token": "a2", "refresh_token": "r2", "expire_in": 14400
            })))
            .mount(&server)
            .await;
        mount_orders(&server, "a2", &["SN1"]).await;
        let store = MemoryDocumentStore::new();
        let credentials = FakeCredentialStore::new()
            .with_credential(credential(1, 1, Platform::Shopee, "a1"))
            .with_accounts(1, &["42", "43"]);

        let report = sync_orders(
            &store,
            &credentials,
            &client(&server),
            &BatchRunner::new(10, 5),
            range(),
        )
        .await
        .unwrap();

        assert_eq!(store.documents(ORDERS_COLLECTION).len(), 1);
        assert_eq!(report.renewed, 1);
        assert_eq!(credentials.write_calls(), 1);
        let updates = credentials.owner_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.user_id, 1);
        assert_eq!(updates[0].1.access_token, "a2");
        assert_eq!(updates[0].1.refresh_token.as_deref(), Some("r2"));
    }

    #[tokio::test]
    #[traced_test]
    async fn shop_with_unusable_binding_is_skipped() {
        let server = MockServer::start().await;
        mount_shop_info(&server, "a1", 200).await;
        mount_orders(&server, "a1", &["SN1"]).await;
        let store = MemoryDocumentStore::new();
        let credentials = FakeCredentialStore::new()
            .with_credential(credential(1, 1, Platform::Shopee, "a1"))
            .with_accounts(1, &["not-a-shop", "42"]);

        let report = sync_orders(
            &store,
            &credentials,
            &client(&server),
            &BatchRunner::new(10, 5),
            range(),
        )
        .await
        .unwrap();

        assert_eq!(report.summary.failed_items, 1);
        assert_eq!(store.documents(ORDERS_COLLECTION).len(), 1);
        assert!(logs_contain("not-a-shop"));
    }

    #[test]
    fn owner_updates_keep_one_entry_per_owner() {
        let renewal = |user_id, token: &str| OwnerCredentialUpdate {
            user_id,
            access_token: token.to_owned(),
            refresh_token: None,
            token_expires_at: Some(Utc::now()),
        };
        let shop = |shop_id, renewed| ReadyShop {
            shop_id,
            access_token: "t".to_owned(),
            renewed,
        };
        let shops = vec![
            shop(1, Some(renewal(7, "x"))),
            shop(2, None),
            shop(3, Some(renewal(7, "y"))),
            shop(4, Some(renewal(8, "z"))),
        ];

        let updates = owner_updates(&shops);

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].access_token, "y");
        assert_eq!(updates[1].user_id, 8);
    }
}
