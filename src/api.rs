use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Response, Url};

use crate::config::ApiConfig;
use crate::errors::AppError;
use crate::models::{ChatTurnRequest, HealthResponse, LegacyTurnResponse, RestaurantDetail, Tone};

/// Thin wrapper over the backend's HTTP endpoints.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<ApiConfig>,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        if config.tunnel_bypass {
            headers.insert("bypass-tunnel-reminder", HeaderValue::from_static("true"));
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, config: Arc::new(config) })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// POST `/chat/stream`. Returns the response once headers arrived with a
    /// 2xx status. The body is left unread.
    pub async fn open_chat_stream(&self, request: &ChatTurnRequest) -> Result<Response, AppError> {
        let resp = self
            .http
            .post(self.config.url("/chat/stream"))
            .timeout(self.config.chat_timeout)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp)
    }

    /// POST `/chat`, the older one-shot variant of the turn protocol.
    pub async fn post_chat(&self, request: &ChatTurnRequest) -> Result<LegacyTurnResponse, AppError> {
        let resp = self
            .http
            .post(self.config.url("/chat"))
            .timeout(self.config.chat_timeout)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<LegacyTurnResponse>().await?)
    }

    /// GET `/health`. `Ok(true)` only for `{"status":"healthy"}`.
    pub async fn check_health(&self, timeout: Duration) -> Result<bool, AppError> {
        let resp = self
            .http
            .get(self.config.url("/health"))
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<HealthResponse>().await?.is_healthy())
    }

    /// GET `/restaurant/{name}?topic=&tone=`
    pub async fn fetch_restaurant(
        &self,
        name: &str,
        topic: Option<&str>,
        tone: Tone,
    ) -> Result<RestaurantDetail, AppError> {
        let url = self.restaurant_url(name, topic, tone)?;
        let resp = self.http.get(url).send().await?.error_for_status()?;
        Ok(resp.json::<RestaurantDetail>().await?)
    }

    fn restaurant_url(&self, name: &str, topic: Option<&str>, tone: Tone) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| AppError::Config(format!("Invalid API URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("API URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push("restaurant")
            .push(name);
        {
            let mut query = url.query_pairs_mut();
            if let Some(topic) = topic {
                query.append_pair("topic", topic);
            }
            query.append_pair("tone", tone.as_str());
        }
        Ok(url)
    }
}
