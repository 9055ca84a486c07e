use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{multipart, Client};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartFile {
    pub field: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartBody {
    pub file: MultipartFile,
    pub text_fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(MultipartBody),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub bearer_token: Option<String>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            bearer_token: None,
            body: RequestBody::Empty,
        }
    }

    pub fn post(url: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            bearer_token: None,
            body,
        }
    }

    pub fn with_bearer_token(mut self, token: Option<&str>) -> Self {
        self.bearer_token = token
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(self.body.as_slice())
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(self.body.as_slice()).to_string()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("http client init failed: {0}")]
    ClientInit(String),
    #[error("invalid mime '{mime}': {message}")]
    InvalidMime { mime: String, message: String },
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("HTTP body read failed: {0}")]
    Body(String),
}

pub trait RenderTransport: Send + Sync + 'static {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

pub type SharedRenderTransport = Arc<dyn RenderTransport>;

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::ClientInit(e.to_string()))?;
        Ok(Self { client })
    }
}

impl RenderTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(request.url.as_str()),
            HttpMethod::Post => self.client.post(request.url.as_str()),
        };
        if let Some(token) = request.bearer_token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(payload) => builder.json(payload),
            RequestBody::Multipart(body) => builder.multipart(build_form(body)?),
        };

        let resp = builder
            .send()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .map_err(|e| TransportError::Body(e.to_string()))?;
        Ok(HttpResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

fn build_form(body: &MultipartBody) -> Result<multipart::Form, TransportError> {
    let file = &body.file;
    let part = multipart::Part::bytes(file.bytes.clone())
        .file_name(file.file_name.clone())
        .mime_str(file.mime_type.as_str())
        .map_err(|e| TransportError::InvalidMime {
            mime: file.mime_type.clone(),
            message: e.to_string(),
        })?;
    let mut form = multipart::Form::new().part(file.field.clone(), part);
    for (name, value) in body.text_fields.iter() {
        form = form.text(name.clone(), value.clone());
    }
    Ok(form)
}

pub fn default_transport(
    request_timeout: Duration,
    connect_timeout: Duration,
) -> Result<SharedRenderTransport, TransportError> {
    Ok(Arc::new(ReqwestTransport::new(request_timeout, connect_timeout)?))
}
