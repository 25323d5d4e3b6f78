use std::future::Future;

use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;

use crate::api::models::{ChatLog, ChatLogList, ContactPage};
use crate::error::{Error, Result};

/// REST operations the reconcilers need.
pub trait Backend: Send + Sync + 'static {
    fn contacts(&self, page: u32, per_page: u32) -> impl Future<Output = Result<ContactPage>> + Send;

    fn chat_logs(&self, contact_id: &str) -> impl Future<Output = Result<Vec<ChatLog>>> + Send;
}

pub struct ApiClient {
    pub http: HttpClient,
    base_api: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let http = HttpClient::builder()
            .user_agent(concat!("engage-live/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_http(http, base_url, token))
    }

    pub fn with_http(http: HttpClient, base_url: &str, token: Option<String>) -> Self {
        Self {
            http,
            base_api: Self::base_api(base_url),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn base_api(base_url: &str) -> String {
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.ends_with("/api") { trimmed.to_string() } else { format!("{}/api", trimmed) }
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_api, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        what: &'static str,
        req: reqwest::RequestBuilder,
    ) -> Result<T> {
        let resp = self.with_auth(req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            log::warn!("{what}: server answered HTTP {status}");
            return Err(Error::Status(status));
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::decode(what, e))
    }

    /// Reach the server's ping endpoint and report the HTTP status.
    pub async fn ping(&self) -> Result<u16> {
        let resp = self.with_auth(self.http.get(self.endpoint("ping"))).send().await?;
        Ok(resp.status().as_u16())
    }

    pub async fn contacts(&self, page: u32, per_page: u32) -> Result<ContactPage> {
        let req = self
            .http
            .get(self.endpoint("contacts"))
            .query(&[("page", page), ("per_page", per_page)]);
        let page: ContactPage = self.get_json("contact page", req).await?;
        log::debug!("fetched {} contacts (total {})", page.items.len(), page.total_count);
        Ok(page)
    }

    pub async fn chat_logs(&self, contact_id: &str) -> Result<Vec<ChatLog>> {
        let url = self.chat_logs_url(contact_id)?;
        let list: ChatLogList = self.get_json("chat log list", self.http.get(url)).await?;
        log::debug!("fetched {} chat logs for contact {contact_id}", list.chatlogs.len());
        Ok(list.chatlogs)
    }

    fn chat_logs_url(&self, contact_id: &str) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.endpoint("chatlogs/contact"))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("base URL {} cannot carry a path", self.base_api)))?
            .push(contact_id);
        Ok(url)
    }
}

impl Backend for ApiClient {
    async fn contacts(&self, page: u32, per_page: u32) -> Result<ContactPage> {
        ApiClient::contacts(self, page, per_page).await
    }

    async fn chat_logs(&self, contact_id: &str) -> Result<Vec<ChatLog>> {
        ApiClient::chat_logs(self, contact_id).await
    }
}
