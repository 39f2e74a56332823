use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use crate::config::{Config, FETCH_BATCH_SIZE, HTTP_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::trade::messages::{FetchResponse, RawListing, SearchRequest, SearchResponse};
use crate::types::Game;

/// Request/response contract of the trade marketplace.
#[async_trait]
pub trait TradeApi: Send + Sync {
    async fn search(&self, league: &str, query: &SearchRequest) -> Result<SearchResponse>;

    /// At most `FETCH_BATCH_SIZE` ids per call. Listings gone since the search are omitted.
    async fn fetch(&self, search_id: &str, ids: &[String]) -> Result<Vec<RawListing>>;
}

pub struct HttpTradeClient {
    client: reqwest::Client,
    base_url: Url,
    game: Game,
}

impl HttpTradeClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(cfg.user_agent.clone())
            .build()?;
        let base_url = Url::parse(&cfg.trade_api_url)
            .map_err(|e| AppError::Config(format!("TRADE_API_URL is not a valid URL: {e}")))?;
        Ok(Self { client, base_url, game: cfg.game })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Config("TRADE_API_URL cannot be a base URL".to_string()))?
            .pop_if_empty()
            .push("api")
            .push(self.game.trade_path())
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl TradeApi for HttpTradeClient {
    async fn search(&self, league: &str, query: &SearchRequest) -> Result<SearchResponse> {
        let url = self.endpoint(&["search", league])?;
        let resp = self.client.post(url).json(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::TradeApi { status: status.as_u16(), body });
        }
        let search: SearchResponse = resp.json().await?;
        debug!(
            search_id = %search.id,
            returned = search.result.len(),
            total = search.total,
            "Trade search for '{}' returned {} of {} ids",
            query.query.base_type,
            search.result.len(),
            search.total,
        );
        Ok(search)
    }

    async fn fetch(&self, search_id: &str, ids: &[String]) -> Result<Vec<RawListing>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > FETCH_BATCH_SIZE {
            return Err(AppError::TradeApi {
                status: 400,
                body: format!("fetch accepts at most {FETCH_BATCH_SIZE} ids, got {}", ids.len()),
            });
        }

        let joined = ids.join(",");
        let mut url = self.endpoint(&["fetch", &joined])?;
        url.query_pairs_mut().append_pair("query", search_id);

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::TradeApi { status: status.as_u16(), body });
        }
        let fetched: FetchResponse = resp.json().await?;
        Ok(fetched.into_listings())
    }
}
