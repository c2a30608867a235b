//! `PagingService` over the book server's JSON API.

use async_trait::async_trait;
use bookspread_core::config::ServerConfig;
use bookspread_core::{
    DocumentId, ImagePayload, PagingService, RemoteError, RemotePage, SpreadSnapshot,
};
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, COOKIE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url {url:?}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("server url {0:?} cannot carry a path")]
    NotABase(String),

    #[error("cookie is not a valid header value")]
    Cookie(#[from] InvalidHeaderValue),

    #[error("failed to build http client")]
    Build(#[from] reqwest::Error),
}

pub struct HttpPagingService {
    client: reqwest::Client,
    base: Url,
}

impl HttpPagingService {
    pub fn new(config: &ServerConfig) -> Result<Self, ClientError> {
        let base = Url::parse(&config.base_url).map_err(|source| ClientError::BaseUrl {
            url: config.base_url.clone(),
            source,
        })?;
        if base.cannot_be_a_base() {
            return Err(ClientError::NotABase(config.base_url.clone()));
        }

        let mut headers = HeaderMap::new();
        if let Some(cookie) = &config.cookie {
            let mut value = HeaderValue::from_str(cookie)?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, document: &DocumentId, tail: &[&str]) -> Url {
        let mut url = self.base.clone();
        // `new` rejects cannot-be-a-base urls, so this always succeeds.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["api", "book", document.as_str()])
                .extend(tail);
        }
        url
    }

    async fn get(&self, url: Url) -> Result<Value, RemoteError> {
        debug!(%url, "request");
        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;
        parse_envelope(status, &body)
    }

    async fn spread(&self, url: Url) -> Result<SpreadSnapshot, RemoteError> {
        let body: SpreadBody = decode(self.get(url).await?)?;
        Ok(body.into())
    }
}

#[async_trait]
impl PagingService for HttpPagingService {
    #[instrument(skip(self, document), fields(document = %document))]
    async fn initialize(&self, document: &DocumentId) -> Result<usize, RemoteError> {
        let body: InitBody = decode(self.get(self.endpoint(document, &["initialize"])).await?)?;
        Ok(body.total_pages)
    }

    async fn current_spread(&self, document: &DocumentId) -> Result<SpreadSnapshot, RemoteError> {
        self.spread(self.endpoint(document, &["current-spread"]))
            .await
    }

    async fn navigate_next(&self, document: &DocumentId) -> Result<SpreadSnapshot, RemoteError> {
        self.spread(self.endpoint(document, &["navigate", "next"]))
            .await
    }

    async fn navigate_prev(&self, document: &DocumentId) -> Result<SpreadSnapshot, RemoteError> {
        self.spread(self.endpoint(document, &["navigate", "prev"]))
            .await
    }

    async fn goto(
        &self,
        document: &DocumentId,
        page: usize,
    ) -> Result<SpreadSnapshot, RemoteError> {
        let page = page.to_string();
        self.spread(self.endpoint(document, &["goto", &page])).await
    }

    #[instrument(skip(self, document), fields(document = %document))]
    async fn fetch_page(
        &self,
        document: &DocumentId,
        page: usize,
    ) -> Result<ImagePayload, RemoteError> {
        let segment = page.to_string();
        let body: PageImageBody =
            decode(self.get(self.endpoint(document, &["page", &segment])).await?)?;
        if body.page_num != page {
            return Err(RemoteError::Decode(format!(
                "asked for page {page}, got page {}",
                body.page_num
            )));
        }
        Ok(ImagePayload::from(body.image))
    }

    async fn cleanup(&self, document: &DocumentId) -> Result<(), RemoteError> {
        self.get(self.endpoint(document, &["cleanup"])).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct InitBody {
    total_pages: usize,
}

#[derive(Debug, Deserialize)]
struct SpreadBody {
    current_page_num: usize,
    #[serde(default)]
    total_pages: Option<usize>,
    #[serde(default)]
    left_page: Option<PageBody>,
    #[serde(default)]
    right_page: Option<PageBody>,
}

#[derive(Debug, Deserialize)]
struct PageBody {
    page_number: usize,
    #[serde(default)]
    image_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageImageBody {
    page_num: usize,
    image: String,
}

impl From<PageBody> for RemotePage {
    fn from(body: PageBody) -> Self {
        RemotePage {
            page_number: body.page_number,
            image: body
                .image_data
                .filter(|data| !data.is_empty())
                .map(ImagePayload::from),
        }
    }
}

impl From<SpreadBody> for SpreadSnapshot {
    fn from(body: SpreadBody) -> Self {
        SpreadSnapshot {
            current_page: body.current_page_num,
            total_pages: body.total_pages,
            left: body.left_page.map(Into::into),
            right: body.right_page.map(Into::into),
        }
    }
}

fn transport(err: reqwest::Error) -> RemoteError {
    RemoteError::Transport(err.to_string())
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, RemoteError> {
    serde_json::from_value(value).map_err(|err| RemoteError::Decode(err.to_string()))
}

/// Splits a response into its `success` payload or the server's `error`
/// message. The server reports failures with arbitrary status codes, so the
/// body decides, not the status.
fn parse_envelope(status: StatusCode, body: &[u8]) -> Result<Value, RemoteError> {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) if status.is_success() => return Err(RemoteError::Decode(err.to_string())),
        Err(_) => {
            return Err(RemoteError::Service {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_owned(),
            })
        }
    };

    if value.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(value);
    }

    let message = value
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("unexpected response with status {status}"));
    Err(RemoteError::Service {
        status: status.as_u16(),
        message,
    })
}
