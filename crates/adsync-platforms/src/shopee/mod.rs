//! Shopee Open Platform v2 adapter.
//!
//! Every call is signed (see [`sign`]). Shopee reports failures as
//! `{"error": "<code>", "message": "..."}` alongside an HTTP status; an empty
//! `error` means success.

pub mod sign;

use adsync_core::{DateRange, OrderDocument, Platform, ShapeError, ShopeeConfig};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::PlatformError;
use crate::fetch::{HttpFetcher, RawResponse};
use crate::pagination::{fetch_all, Page, MAX_PAGES};
use crate::token::{TokenAuthority, TokenGrant, TokenStatus, TokenSubject};

use self::sign::{ShopAuth, Signer};

/// Longest window `get_order_list` accepts.
pub const ORDER_WINDOW_DAYS: u32 = 15;

/// Most serial numbers `get_order_detail` accepts per request.
pub const ORDER_DETAIL_CHUNK_SIZE: usize = 50;

const ORDER_PAGE_SIZE: u32 = 100;

/// Detail chunks in flight at once for one shop.
const DETAIL_CONCURRENCY: usize = 5;

const ORDER_DETAIL_FIELDS: &str = "buyer_user_id,buyer_username,estimated_shipping_fee,\
recipient_address,actual_shipping_fee,goods_to_declare,note,note_update_time,item_list,\
pay_time,dropshipper,dropshipper_phone,split_up,buyer_cancel_reason,cancel_by,cancel_reason,\
actual_shipping_fee_confirmed,buyer_cpf_id,fulfillment_flag,pickup_done_time,package_list,\
shipping_carrier,payment_method,total_amount,invoice_data,order_chargeable_weight_gram,\
return_request_due_date,edt";

#[derive(Debug, Deserialize)]
struct ErrorFields {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Wrapped<T> {
    response: Option<T>,
}

#[derive(Debug, Deserialize)]
struct OrderListResponse {
    #[serde(default)]
    more: bool,
    #[serde(default)]
    next_cursor: String,
    #[serde(default)]
    order_list: Vec<OrderSn>,
}

#[derive(Debug, Deserialize)]
struct OrderSn {
    order_sn: String,
}

#[derive(Debug, Deserialize)]
struct OrderDetailResponse {
    #[serde(default)]
    order_list: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    refresh_token: String,
    expire_in: i64,
}

/// Unix seconds stamped into each signature.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Clone)]
pub struct ShopeeClient {
    fetcher: HttpFetcher,
    config: ShopeeConfig,
    clock: Clock,
}

impl ShopeeClient {
    #[must_use]
    pub fn new(fetcher: HttpFetcher, config: ShopeeConfig) -> Self {
        Self {
            fetcher,
            config,
            clock: Arc::new(|| Utc::now().timestamp()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn path(&self, endpoint: &str) -> String {
        format!("/api/{}/{endpoint}", self.config.api_version)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn signer(&self) -> Result<Signer, PlatformError> {
        Signer::new(&self.config.secret_key, self.config.partner_id)
    }

    /// Signed query for one attempt, stamped with the current time.
    fn query(
        &self,
        signer: &Signer,
        path: &str,
        shop: Option<ShopAuth<'_>>,
    ) -> Vec<(&'static str, String)> {
        signer.query(path, (self.clock)(), shop)
    }

    /// Signed shop-level GET, unwrapped from Shopee's `response` field.
    async fn shop_get<T: DeserializeOwned>(
        &self,
        context: &str,
        endpoint: &str,
        shop: ShopAuth<'_>,
        params: &[(&str, String)],
    ) -> Result<T, PlatformError> {
        let path = self.path(endpoint);
        let url = self.url(&path);
        let signer = self.signer()?;

        let raw = self
            .fetcher
            .send(context, |client| {
                client
                    .get(&url)
                    .query(&self.query(&signer, &path, Some(shop)))
                    .query(params)
            })
            .await?;
        let wrapped: Wrapped<T> = shopee_json(context, raw)?;
        wrapped
            .response
            .ok_or_else(|| ShapeError::missing("response").into())
    }

    /// Serial numbers of orders created within `range`.
    ///
    /// The range is walked in windows of at most [`ORDER_WINDOW_DAYS`] days,
    /// each paginated by cursor.
    ///
    /// # Errors
    ///
    /// Any Shopee error, transport or pagination failure.
    pub async fn fetch_order_list(
        &self,
        access_token: &str,
        shop_id: i64,
        range: DateRange,
    ) -> Result<Vec<String>, PlatformError> {
        let shop = ShopAuth {
            access_token,
            shop_id,
        };
        let mut serials = Vec::new();

        for window in range.split(ORDER_WINDOW_DAYS) {
            let (time_from, time_to) = window_bounds(window);
            let context = format!(
                "shopee order list for shop {shop_id} {}..{}",
                window.start_str(),
                window.end_str()
            );

            let page = fetch_all(&context, MAX_PAGES, |cursor| {
                let context = context.clone();
                let params = vec![
                    ("time_range_field", "create_time".to_owned()),
                    ("time_from", time_from.to_string()),
                    ("time_to", time_to.to_string()),
                    ("page_size", ORDER_PAGE_SIZE.to_string()),
                    ("cursor", cursor.unwrap_or_default()),
                ];
                async move {
                    let list: OrderListResponse = self
                        .shop_get(&context, "order/get_order_list", shop, &params)
                        .await?;
                    Ok(Page {
                        items: list.order_list.into_iter().map(|o| o.order_sn).collect(),
                        next: list.more.then_some(list.next_cursor),
                    })
                }
            })
            .await?;
            serials.extend(page);
        }
        Ok(serials)
    }

    async fn fetch_detail_chunk(
        &self,
        shop: ShopAuth<'_>,
        chunk: &[String],
    ) -> Result<Vec<Value>, PlatformError> {
        let context = format!("shopee order detail for shop {}", shop.shop_id);
        let params = [
            ("order_sn_list", chunk.join(",")),
            ("response_optional_fields", ORDER_DETAIL_FIELDS.to_owned()),
        ];
        let detail: OrderDetailResponse = self
            .shop_get(&context, "order/get_order_detail", shop, &params)
            .await?;
        Ok(detail.order_list)
    }

    /// Full order payloads for `serials`, requested
    /// [`ORDER_DETAIL_CHUNK_SIZE`] at a time with a few chunks in flight.
    ///
    /// # Errors
    ///
    /// The first failing chunk's error.
    pub async fn fetch_order_details(
        &self,
        access_token: &str,
        shop_id: i64,
        serials: &[String],
    ) -> Result<Vec<Value>, PlatformError> {
        let shop = ShopAuth {
            access_token,
            shop_id,
        };
        let chunks: Vec<Vec<Value>> = stream::iter(serials.chunks(ORDER_DETAIL_CHUNK_SIZE))
            .map(|chunk| self.fetch_detail_chunk(shop, chunk))
            .buffered(DETAIL_CONCURRENCY)
            .try_collect()
            .await?;
        Ok(chunks.into_iter().flatten().collect())
    }
}

#[async_trait]
impl TokenAuthority for ShopeeClient {
    fn platform(&self) -> Platform {
        Platform::Shopee
    }

    async fn refresh(&self, subject: &TokenSubject) -> Result<TokenGrant, PlatformError> {
        let context = "shopee token refresh";
        let refresh_token = subject.require_refresh_token()?;
        let shop_id = parse_shop_id(subject.require_account()?)?;
        let path = self.path("auth/access_token/get");
        let url = self.url(&path);
        let signer = self.signer()?;
        let body = json!({
            "shop_id": shop_id,
            "refresh_token": refresh_token,
            "partner_id": self.config.partner_id,
        });

        let raw = self
            .fetcher
            .send(context, |client| {
                client
                    .post(&url)
                    .query(&self.query(&signer, &path, None))
                    .json(&body)
            })
            .await?;
        let token: AccessTokenResponse = shopee_json(context, raw)?;

        Ok(TokenGrant {
            access_token: token.access_token,
            refresh_token: Some(token.refresh_token),
            expires_in: Some(token.expire_in),
        })
    }

    /// Calls `get_shop_info` for the subject's shop; 401/403 means the token
    /// no longer works for it.
    async fn probe(&self, subject: &TokenSubject) -> Result<TokenStatus, PlatformError> {
        let context = "shopee shop info";
        let shop_id = parse_shop_id(subject.require_account()?)?;
        let path = self.path("shop/get_shop_info");
        let url = self.url(&path);
        let signer = self.signer()?;
        let shop = ShopAuth {
            access_token: &subject.access_token,
            shop_id,
        };

        let raw = self
            .fetcher
            .send(context, |client| {
                client.get(&url).query(&self.query(&signer, &path, Some(shop)))
            })
            .await?;

        match raw.status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(TokenStatus::Invalid),
            _ => {
                shopee_json::<Value>(context, raw)?;
                Ok(TokenStatus::Valid)
            }
        }
    }

    fn per_account(&self) -> bool {
        true
    }
}

/// Parse a Shopee response, turning a non-empty `error` into
/// [`PlatformError::Api`].
fn shopee_json<T: DeserializeOwned>(context: &str, raw: RawResponse) -> Result<T, PlatformError> {
    if let Ok(fields) = raw.json::<ErrorFields>(context) {
        if !fields.error.is_empty() {
            return Err(PlatformError::api(context, fields.error, fields.message));
        }
    }
    raw.require_success(context)?.json(context)
}

/// Epoch seconds of the first and last second of `window`, in UTC.
fn window_bounds(window: DateRange) -> (i64, i64) {
    let from = window.start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
    let to = window
        .end
        .and_hms_opt(23, 59, 59)
        .map_or(from, |end| end.and_utc().timestamp());
    (from, to)
}

/// # Errors
///
/// Returns [`ShapeError`] when the bound account id is not a Shopee shop id.
pub fn parse_shop_id(account_id: &str) -> Result<i64, ShapeError> {
    account_id
        .trim()
        .parse::<i64>()
        .map_err(|e| ShapeError::new("shop_id", format!("\"{account_id}\" is not a shop id: {e}")))
}

/// Wrap one `get_order_detail` entry as an order document.
///
/// # Errors
///
/// Returns [`ShapeError`] when the entry has no `order_sn`.
pub fn normalize_order(shop_id: i64, detail: Value) -> Result<OrderDocument, ShapeError> {
    let order_sn = detail
        .get("order_sn")
        .and_then(Value::as_str)
        .filter(|sn| !sn.is_empty())
        .ok_or_else(|| ShapeError::missing("order_sn"))?
        .to_owned();
    Ok(OrderDocument {
        order_sn,
        shop_id,
        detail,
        updated_at: Utc::now(),
    })
}
