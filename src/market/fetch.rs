use crate::{Result, SolashenError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Symbol to price, as returned by one mirror
pub type PriceTable = HashMap<String, f64>;

#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Fetch every price the mirror at `url` reports
    async fn fetch(&self, url: &str) -> Result<PriceTable>;
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    symbol: String,
    price: String,
}

/// Parse a `[{symbol, price}]` body where prices are decimal strings
pub fn parse_ticker_body(body: &str) -> Result<PriceTable> {
    let entries: Vec<TickerEntry> = serde_json::from_str(body)
        .map_err(|e| SolashenError::MarketFeed(format!("Malformed response: {}", e)))?;

    entries
        .into_iter()
        .map(|entry| {
            let price = entry.price.trim().parse::<f64>().map_err(|_| {
                SolashenError::MarketFeed(format!(
                    "Unparsable price {:?} for {}",
                    entry.price, entry.symbol
                ))
            })?;
            Ok((entry.symbol, price))
        })
        .collect()
}

#[derive(Clone)]
pub struct HttpPriceFetcher {
    client: Client,
}

impl HttpPriceFetcher {
    /// Client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            SolashenError::MarketFeed(format!("Failed to build HTTP client: {}", e))
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PriceFetcher for HttpPriceFetcher {
    async fn fetch(&self, url: &str) -> Result<PriceTable> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SolashenError::MarketFeed(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SolashenError::MarketFeed(format!("API failed: {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SolashenError::MarketFeed(format!("Failed to read body: {}", e)))?;
        parse_ticker_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ticker_body() {
        let table = parse_ticker_body(
            r#"[{"symbol":"SOLUSDT","price":"142.51000000"},{"symbol":"BTCUSDT","price":"67012.4"}]"#,
        )
        .unwrap();
        assert_eq!(table["SOLUSDT"], 142.51);
        assert_eq!(table["BTCUSDT"], 67012.4);
    }

    #[test]
    fn test_parse_rejects_bad_bodies() {
        assert!(parse_ticker_body(r#"{"code":-1121,"msg":"Invalid symbol."}"#).is_err());
        assert!(parse_ticker_body(r#"[{"symbol":"SOLUSDT","price":"n/a"}]"#).is_err());
    }

    #[tokio::test]
    async fn test_request_timeout_is_enforced() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let fetcher = HttpPriceFetcher::new(Duration::from_millis(200)).unwrap();
        let started = std::time::Instant::now();
        let result = fetcher
            .fetch(&format!("http://{}/api/v3/ticker/price", addr))
            .await;

        assert!(matches!(result, Err(SolashenError::MarketFeed(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
