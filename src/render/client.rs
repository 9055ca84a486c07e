use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::render::settings::{validate_api_url, RenderSettings, SettingsError};
use crate::transport::{
    default_transport, HttpRequest, HttpResponse, RequestBody, SharedRenderTransport,
    TransportError,
};

pub const SYSTEM_STATS_PATH: &str = "system_stats";
pub const UPLOAD_IMAGE_PATH: &str = "upload/image";
pub const PROMPT_PATH: &str = "prompt";
pub const HISTORY_PATH: &str = "history";
pub const VIEW_PATH: &str = "view";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    #[error("render server at {url} is unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("render server at {url} answered HTTP {status}")]
    Unhealthy { url: String, status: u16 },
}

#[derive(Debug, Error)]
pub enum ClientInitError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Thin handle on the render server's HTTP surface. Every request carries the
/// optional bearer token; stage modules interpret the responses.
#[derive(Clone)]
pub struct RenderClient {
    transport: SharedRenderTransport,
    base_url: String,
    api_key: Option<String>,
}

impl RenderClient {
    pub fn new(transport: SharedRenderTransport, base_url: &Url, api_key: Option<String>) -> Self {
        Self {
            transport,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn from_settings(settings: &RenderSettings) -> Result<Self, ClientInitError> {
        let base_url = validate_api_url(settings.credentials.api_url.as_str())?;
        let transport = default_transport(settings.request_timeout(), settings.connect_timeout())?;
        Ok(Self::new(
            transport,
            &base_url,
            settings.credentials.api_key.clone(),
        ))
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn view_url(&self, filename: &str, subfolder: &str, container_class: &str) -> String {
        let base = self.endpoint(VIEW_PATH);
        match Url::parse_with_params(
            base.as_str(),
            &[
                ("filename", filename),
                ("subfolder", subfolder),
                ("type", container_class),
            ],
        ) {
            Ok(url) => url.to_string(),
            Err(_) => base,
        }
    }

    pub fn get(&self, path: &str) -> Result<HttpResponse, TransportError> {
        self.send(HttpRequest::get(self.endpoint(path)))
    }

    pub fn get_url(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.send(HttpRequest::get(url))
    }

    pub fn post(&self, path: &str, body: RequestBody) -> Result<HttpResponse, TransportError> {
        self.send(HttpRequest::post(self.endpoint(path), body))
    }

    /// Unauthenticated fetch of an arbitrary URL, used for caller-supplied
    /// input locations. The render server token is never sent to them.
    pub fn fetch_external(&self, url: &str) -> Result<HttpResponse, TransportError> {
        debug!(url, "fetching external input");
        self.transport.send(&HttpRequest::get(url))
    }

    pub fn probe(&self) -> Result<(), ConnectivityError> {
        let url = self.endpoint(SYSTEM_STATS_PATH);
        let resp = self
            .get(SYSTEM_STATS_PATH)
            .map_err(|source| ConnectivityError::Unreachable {
                url: url.clone(),
                source,
            })?;
        if !resp.is_success() {
            return Err(ConnectivityError::Unhealthy {
                url,
                status: resp.status,
            });
        }
        info!(base_url = %self.base_url, "render server reachable");
        Ok(())
    }

    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let request = request.with_bearer_token(self.api_key.as_deref());
        debug!(method = request.method.as_str(), url = %request.url, "render server request");
        self.transport.send(&request)
    }
}
