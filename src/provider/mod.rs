//! Blocking client for the Kakao REST API (`kapi`).

pub mod calendar;
pub mod message;

use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, error};

pub use calendar::{CreateSubCalendar, DeleteSubCalendar, UpdateSubCalendar};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Kakao API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected Kakao API response: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub struct KakaoApi {
    http: Client,
    base: String,
}

impl KakaoApi {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn get(&self, path: &str, access_token: &str) -> RequestBuilder {
        self.http.get(self.url(path)).bearer_auth(access_token)
    }

    fn post(&self, path: &str, access_token: &str) -> RequestBuilder {
        self.http.post(self.url(path)).bearer_auth(access_token)
    }

    fn delete(&self, path: &str, access_token: &str) -> RequestBuilder {
        self.http.delete(self.url(path)).bearer_auth(access_token)
    }

    /// Send the request and decode the body. Non-2xx responses become
    /// [`ApiError::Status`] carrying the raw body; an empty 2xx body is `{}`.
    fn send(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request.send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            error!(status = status.as_u16(), %body, "Kakao API request failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!(status = status.as_u16(), "Kakao API request succeeded");
        if body.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        Ok(serde_json::from_str(&body)?)
    }
}
