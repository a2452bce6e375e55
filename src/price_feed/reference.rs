use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::price_feed::fixed_point::{FixedPoint, ReferenceValue};

/// Delay applied when a 429 carries no usable `retry-after`
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Source of the off-chain reference value.
///
/// Implementations translate their provider's payloads and rate-limit signals
/// into `FetchError`; they never retry on their own.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, network: &str, asset: &str) -> Result<ReferenceValue, FetchError>;
}

/// GeckoTerminal-style token price endpoint.
///
/// The URL template carries `{network}` and `{token_address}` placeholders and
/// the price is read from `data.attributes.token_prices[<lowercased address>]`.
pub struct GeckoTerminalSource {
    client: Client,
    url_template: String,
    scale: u32,
}

impl GeckoTerminalSource {
    pub fn new(url_template: impl Into<String>, scale: u32, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url_template: url_template.into(),
            scale,
        })
    }

    fn url_for(&self, network: &str, asset: &str) -> String {
        self.url_template
            .replace("{network}", network)
            .replace("{token_address}", asset)
    }

    fn extract_price(&self, body: &Value, asset: &str) -> Result<FixedPoint, FetchError> {
        let key = asset.to_lowercase();
        let raw = body
            .pointer("/data/attributes/token_prices")
            .and_then(|prices| prices.get(&key))
            .ok_or_else(|| FetchError::Malformed(format!("token price for {} not found in response", key)))?;

        let literal = match raw {
            Value::String(s) => s.clone(),
            // serde_json holds numbers as f64; only decimal strings are exact
            Value::Number(n) => {
                return Err(FetchError::Malformed(format!(
                    "numeric price {} for {}; expected a decimal string",
                    n, key
                )))
            }
            other => {
                return Err(FetchError::Malformed(format!(
                    "unexpected price value for {}: {}",
                    key, other
                )))
            }
        };

        FixedPoint::parse(&literal, self.scale)
            .map_err(|e| FetchError::Malformed(format!("price {:?} for {}: {}", literal, key, e)))
    }
}

#[async_trait]
impl ReferenceSource for GeckoTerminalSource {
    fn name(&self) -> &'static str {
        "geckoterminal"
    }

    async fn fetch(&self, network: &str, asset: &str) -> Result<ReferenceValue, FetchError> {
        if network.trim().is_empty() || asset.trim().is_empty() {
            return Err(FetchError::Malformed(
                "network and asset identifiers must be non-empty".to_string(),
            ));
        }

        let url = self.url_for(network, asset);
        debug!("Fetching reference price from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Unavailable(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            warn!(
                "⏳ Rate limit exceeded at {}, provider asks for {}s",
                self.name(),
                retry_after.as_secs()
            );
            return Err(FetchError::Throttled { retry_after });
        }

        if !status.is_success() {
            return Err(FetchError::Unavailable(format!(
                "{} responded with {}",
                self.name(),
                status
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(format!("invalid JSON body: {}", e)))?;

        let value = self.extract_price(&body, asset)?;
        info!("✓ Fetched reference price for {}: {}", asset, value);

        Ok(ReferenceValue::new(asset, value))
    }
}

/// Seconds from a `retry-after` header, falling back to 60s
pub fn parse_retry_after(header: Option<&str>) -> Duration {
    header
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use axum::{
        extract::Path,
        http::{HeaderMap, HeaderValue, StatusCode as HttpStatus},
        response::IntoResponse,
        routing::get,
        Json, Router,
    };

    const TOKEN: &str = "0xAbC0000000000000000000000000000000000DeF";

    async fn ok_handler(Path((network, token)): Path<(String, String)>) -> impl IntoResponse {
        assert_eq!(network, "ethereum");
        let mut prices = serde_json::Map::new();
        prices.insert(token.to_lowercase(), Value::from("105.123456789"));
        Json(serde_json::json!({
            "data": {
                "id": "prices",
                "attributes": { "token_prices": prices }
            }
        }))
    }

    async fn throttled(retry_after: Option<&'static str>) -> impl IntoResponse {
        let mut headers = HeaderMap::new();
        if let Some(value) = retry_after {
            headers.insert("retry-after", HeaderValue::from_static(value));
        }
        (HttpStatus::TOO_MANY_REQUESTS, headers, "slow down")
    }

    async fn spawn_provider() -> String {
        let app = Router::new()
            .route("/ok/:network/:token", get(ok_handler))
            .route("/throttle/:network/:token", get(|| throttled(Some("30"))))
            .route("/throttle-garbled/:network/:token", get(|| throttled(Some("soon"))))
            .route("/throttle-bare/:network/:token", get(|| throttled(None)))
            .route(
                "/missing/:network/:token",
                get(|| async { Json(serde_json::json!({"data": {"attributes": {"token_prices": {}}}})) }),
            )
            .route(
                "/garbage/:network/:token",
                get(|| async { Json(serde_json::json!({"data": {"attributes": {"token_prices": {"0xabc0000000000000000000000000000000000def": "n/a"}}}})) }),
            )
            .route(
                "/down/:network/:token",
                get(|| async { (HttpStatus::INTERNAL_SERVER_ERROR, "boom") }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn source(base: &str, route: &str) -> GeckoTerminalSource {
        GeckoTerminalSource::new(
            format!("{}/{}/{{network}}/{{token_address}}", base, route),
            8,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("30")), Duration::from_secs(30));
        assert_eq!(parse_retry_after(Some(" 7 ")), Duration::from_secs(7));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), DEFAULT_RETRY_AFTER);
        assert_eq!(parse_retry_after(None), DEFAULT_RETRY_AFTER);
    }

    #[tokio::test]
    async fn test_fetch_reads_lowercased_price_key() {
        let base = spawn_provider().await;
        let value = source(&base, "ok").fetch("ethereum", TOKEN).await.unwrap();

        assert_eq!(value.asset, TOKEN);
        // truncated to 8 decimals
        assert_eq!(value.value.mantissa(), U256::from(10_512_345_678u64));
    }

    #[tokio::test]
    async fn test_fetch_maps_429_to_throttled() {
        let base = spawn_provider().await;

        let err = source(&base, "throttle").fetch("ethereum", TOKEN).await.unwrap_err();
        assert_eq!(err, FetchError::Throttled { retry_after: Duration::from_secs(30) });

        let err = source(&base, "throttle-garbled").fetch("ethereum", TOKEN).await.unwrap_err();
        assert_eq!(err, FetchError::Throttled { retry_after: DEFAULT_RETRY_AFTER });

        let err = source(&base, "throttle-bare").fetch("ethereum", TOKEN).await.unwrap_err();
        assert_eq!(err, FetchError::Throttled { retry_after: DEFAULT_RETRY_AFTER });
    }

    #[tokio::test]
    async fn test_fetch_classifies_bad_payloads() {
        let base = spawn_provider().await;

        let err = source(&base, "missing").fetch("ethereum", TOKEN).await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));

        let err = source(&base, "garbage").fetch("ethereum", TOKEN).await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));

        let err = source(&base, "down").fetch("ethereum", TOKEN).await.unwrap_err();
        assert!(matches!(err, FetchError::Unavailable(_)));
    }

    #[test]
    fn test_numeric_price_rejected() {
        let src = source("http://127.0.0.1:9", "ok");
        let key = TOKEN.to_lowercase();
        for price in [serde_json::json!(0.0000001), serde_json::json!(105.5), serde_json::json!(105)] {
            let mut prices = serde_json::Map::new();
            prices.insert(key.clone(), price);
            let body = serde_json::json!({"data": {"attributes": {"token_prices": prices}}});

            let err = src.extract_price(&body, TOKEN).unwrap_err();
            assert!(
                matches!(&err, FetchError::Malformed(msg) if msg.contains("decimal string")),
                "{err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_fetch_rejects_empty_identifiers() {
        let src = source("http://127.0.0.1:9", "ok");
        assert!(matches!(src.fetch("", TOKEN).await, Err(FetchError::Malformed(_))));
        assert!(matches!(src.fetch("ethereum", " ").await, Err(FetchError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_is_unavailable() {
        let src = source("http://127.0.0.1:9", "ok");
        let err = src.fetch("ethereum", TOKEN).await.unwrap_err();
        assert!(matches!(err, FetchError::Unavailable(_)));
    }
}
