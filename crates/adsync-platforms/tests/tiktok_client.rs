//! Integration tests for the TikTok report, ad listing and asset endpoints.

mod common;

use std::time::Duration;

use adsync_core::{DateRange, Level, SchedulerType, TikTokConfig};
use adsync_platforms::tiktok::metrics::DAILY_METRICS;
use adsync_platforms::tiktok::AssetKind;
use adsync_platforms::{PlatformError, TikTokClient, TokenAuthority, TokenStatus, TokenSubject};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use common::{query_value, test_fetcher, RecordingSleeper};

const REPORT_PATH: &str = "/v1.3/report/integrated/get/";

fn client(server: &MockServer) -> (TikTokClient, std::sync::Arc<RecordingSleeper>) {
    let (fetcher, sleeper) = test_fetcher(2);
    let config = TikTokConfig {
        base_url: server.uri(),
        api_version: "v1.3".to_owned(),
        app_id: "app".to_owned(),
        secret: "secret".to_owned(),
    };
    (TikTokClient::new(fetcher, config), sleeper)
}

fn range() -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
    )
    .unwrap()
}

fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"code": 0, "message": "OK", "data": data}))
}

/// Answers each report chunk with value "1" for exactly the metrics it asked for.
fn echo_requested_metrics(request: &Request) -> ResponseTemplate {
    let requested: Vec<String> =
        serde_json::from_str(&query_value(request, "metrics").unwrap_or_default()).unwrap_or_default();
    let metrics: Map<String, Value> = requested
        .into_iter()
        .map(|m| (m, Value::String("1".to_owned())))
        .collect();
    ok(json!({
        "list": [{
            "dimensions": {"campaign_id": "C1", "stat_time_day": "2024-01-01 00:00:00"},
            "metrics": metrics
        }],
        "page_info": {"page": 1, "total_page": 1}
    }))
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[tokio::test]
async fn metric_chunks_are_fetched_separately_and_merged_per_key() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(REPORT_PATH))
        .and(header("Access-Token", "tok"))
        .and(query_param("data_level", "AUCTION_CAMPAIGN"))
        .and(query_param("dimensions", r#"["campaign_id","stat_time_day"]"#))
        .respond_with(echo_requested_metrics)
        .expect(5)
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let rows = client
        .fetch_metrics("ADV", "tok", range(), Level::Campaign, SchedulerType::Daily)
        .await
        .unwrap();

    assert_eq!(rows.len(), 1, "chunks sharing a key must merge into one row");
    assert_eq!(rows[0].metrics.len(), DAILY_METRICS.len());
    assert_eq!(rows[0].dimensions["campaign_id"], "C1");
}

#[tokio::test]
async fn report_pages_are_walked_by_page_number() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(REPORT_PATH))
        .and(query_param("page", "1"))
        .respond_with(ok(json!({
            "list": [{"dimensions": {"ad_id": "A1"}, "metrics": {"reach": "10"}}],
            "page_info": {"page": 1, "total_page": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(REPORT_PATH))
        .and(query_param("page", "2"))
        .respond_with(ok(json!({
            "list": [{"dimensions": {"ad_id": "A2"}, "metrics": {"reach": "20"}}],
            "page_info": {"page": 2, "total_page": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let rows = client
        .fetch_metrics("ADV", "tok", range(), Level::Ad, SchedulerType::Live)
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].dimensions["ad_id"], "A2");
}

#[tokio::test]
async fn throttling_code_is_retried_after_the_default_delay() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(REPORT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": 40100, "message": "Too many requests"})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(REPORT_PATH))
        .respond_with(ok(json!({"list": [], "page_info": {"page": 1, "total_page": 1}})))
        .mount(&server)
        .await;

    let (client, sleeper) = client(&server);
    let rows = client
        .fetch_metrics("ADV", "tok", range(), Level::Account, SchedulerType::Live)
        .await
        .unwrap();

    assert!(rows.is_empty());
    assert_eq!(sleeper.slept(), vec![Duration::from_secs(10)]);
}

#[tokio::test]
async fn other_error_codes_fail_the_whole_pull() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(REPORT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": 40002, "message": "Invalid metric"})),
        )
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let result = client
        .fetch_metrics("ADV", "tok", range(), Level::Campaign, SchedulerType::Daily)
        .await;

    match result {
        Err(PlatformError::Api { code, message, .. }) => {
            assert_eq!(code, "40002");
            assert_eq!(message, "Invalid metric");
        }
        other => panic!("expected Api error, got: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Ads and assets
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ads_are_listed_with_a_creation_filter() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.3/ad/get/"))
        .and(query_param("advertiser_id", "ADV"))
        .and(|request: &Request| {
            query_value(request, "filtering")
                .is_some_and(|f| f.contains("creation_filter_start_time"))
        })
        .respond_with(ok(json!({
            "list": [{"ad_id": "1", "video_id": "v1"}, {"ad_id": "2", "image_ids": ["i1"]}],
            "page_info": {"page": 1, "total_page": 1}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let ads = client.fetch_ads("ADV", "tok").await.unwrap();
    assert_eq!(ads.len(), 2);
}

#[tokio::test]
async fn asset_details_are_requested_twenty_ids_at_a_time() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.3/file/video/ad/info/"))
        .respond_with(|request: &Request| {
            let ids: Vec<String> =
                serde_json::from_str(&query_value(request, "video_ids").unwrap_or_default())
                    .unwrap_or_default();
            assert!(ids.len() <= 20, "chunk of {} ids", ids.len());
            let list: Vec<Value> = ids
                .into_iter()
                .map(|id| json!({"video_id": id, "preview_url": "https://v"}))
                .collect();
            ok(json!({"list": list}))
        })
        .expect(3)
        .mount(&server)
        .await;

    let ids: Vec<String> = (0..45).map(|i| format!("v{i}")).collect();
    let (client, _) = client(&server);
    let details = client
        .fetch_content_details("ADV", "tok", AssetKind::Video, &ids)
        .await
        .unwrap();
    assert_eq!(details.len(), 45);
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[tokio::test]
async fn probe_maps_auth_codes_to_invalid() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.3/oauth2/advertiser/get/"))
        .and(header("Access-Token", "live"))
        .respond_with(ok(json!({"list": [{"advertiser_id": "ADV"}]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.3/oauth2/advertiser/get/"))
        .and(header("Access-Token", "dead"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": 40105, "message": "Access token is incorrect or has been revoked."})),
        )
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    assert_eq!(
        client.probe(&TokenSubject::new("live")).await.unwrap(),
        TokenStatus::Valid
    );
    assert_eq!(
        client.probe(&TokenSubject::new("dead")).await.unwrap(),
        TokenStatus::Invalid
    );
}

#[tokio::test]
async fn refresh_reads_the_new_token_pair() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.3/oauth2/refresh_token/"))
        .and(query_param("grant_type", "refresh_token"))
        .and(query_param("refresh_token", "r1"))
        .respond_with(ok(json!({
            "access_token": "a2",
            "refresh_token": "r2",
            "access_token_expire_in": 86400
        })))
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let subject = TokenSubject::new("a1").with_refresh_token(Some("r1".to_owned()));
    let grant = client.refresh(&subject).await.unwrap();

    assert_eq!(grant.access_token, "a2");
    assert_eq!(grant.refresh_token.as_deref(), Some("r2"));
    assert_eq!(grant.expires_in, Some(86400));
}

#[tokio::test]
async fn refresh_without_a_lifetime_leaves_expiry_unset() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.3/oauth2/refresh_token/"))
        .respond_with(ok(json!({"access_token": "a2"})))
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let subject = TokenSubject::new("a1").with_refresh_token(Some("r1".to_owned()));
    let grant = client.refresh(&subject).await.unwrap();

    assert_eq!(grant.refresh_token.as_deref(), Some("r1"));
    assert_eq!(grant.expires_in, None);
    assert_eq!(grant.expires_at(Utc::now()), None);
}
