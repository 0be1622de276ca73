//! Thin HTTP client over the gateway's admin plane (`gateway::admin`).
//! The CLI only needs to know the wire shapes it POSTs/GETs — it never
//! links against gateway internals.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdminClientError {
    #[error("request to gateway admin API failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway rejected the request ({status}): {error}")]
    Gateway { status: u16, error: String, code: Option<String> },
}

/// Mirrors `aussie_gateway::error::ErrorResponse` — the admin plane's
/// error body shape.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    code: Option<String>,
    status: u16,
}

/// Mirrors `aussie_gateway::responses::Success<T>`.
#[derive(Debug, Deserialize)]
struct SuccessEnvelope<T> {
    data: T,
}

pub struct AdminClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl AdminClient {
    pub fn new(base_url: String, bearer_token: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.trim_end_matches('/').to_string(), bearer_token }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn handle<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AdminClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let body: ErrorResponse = response
                .json()
                .await
                .unwrap_or(ErrorResponse { error: status.to_string(), code: None, status: status.as_u16() });
            Err(AdminClientError::Gateway { status: body.status, error: body.error, code: body.code })
        }
    }

    async fn handle_no_content(response: reqwest::Response) -> Result<(), AdminClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body: ErrorResponse = response
                .json()
                .await
                .unwrap_or(ErrorResponse { error: status.to_string(), code: None, status: status.as_u16() });
            Err(AdminClientError::Gateway { status: body.status, error: body.error, code: body.code })
        }
    }

    /// GETs a `Success<T>`-wrapped endpoint and unwraps the envelope.
    pub async fn get_wrapped<T: DeserializeOwned>(&self, path: &str) -> Result<T, AdminClientError> {
        let response = self.authed(self.http.get(self.url(path))).send().await?;
        let envelope: SuccessEnvelope<T> = Self::handle(response).await?;
        Ok(envelope.data)
    }

    /// POSTs a JSON body to a `Created<T>` endpoint and returns the raw body.
    pub async fn post_created<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AdminClientError> {
        let response = self.authed(self.http.post(self.url(path))).json(body).send().await?;
        Self::handle(response).await
    }

    /// POSTs a JSON body to a `Success<T>` endpoint and unwraps the envelope.
    pub async fn post_wrapped<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AdminClientError> {
        let response = self.authed(self.http.post(self.url(path))).json(body).send().await?;
        let envelope: SuccessEnvelope<T> = Self::handle(response).await?;
        Ok(envelope.data)
    }

    /// POSTs with no body, expecting `204 No Content`.
    pub async fn post_no_content(&self, path: &str) -> Result<(), AdminClientError> {
        let response = self.authed(self.http.post(self.url(path))).send().await?;
        Self::handle_no_content(response).await
    }

    /// PUTs a JSON body to a `Success<T>` endpoint and unwraps the envelope.
    pub async fn put_wrapped<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AdminClientError> {
        let response = self.authed(self.http.put(self.url(path))).json(body).send().await?;
        let envelope: SuccessEnvelope<T> = Self::handle(response).await?;
        Ok(envelope.data)
    }

    /// DELETEs, expecting `204 No Content`.
    pub async fn delete(&self, path: &str) -> Result<(), AdminClientError> {
        let response = self.authed(self.http.delete(self.url(path))).send().await?;
        Self::handle_no_content(response).await
    }
}
