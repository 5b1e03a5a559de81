use crate::domain::models::{ActiveSession, SessionHandle};
use crate::infrastructure::config::GatewayConfig;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;
use url::Url;

const SESSIONS_PATH: &[&str] = &["api", "focus-sessions"];

/// Remote authority for focus sessions.
#[async_trait]
pub trait SessionGateway: Send + Sync {
    /// Fails with `GatewayUnreachable` or `GatewayRejected`.
    async fn start_focus_session(
        &self,
        context_id: Option<&str>,
        duration_seconds: u32,
    ) -> Result<SessionHandle, InfraError>;

    async fn end_session(
        &self,
        session_id: &str,
        completed: bool,
        interrupted: bool,
    ) -> Result<(), InfraError>;

    async fn get_active_session(&self) -> Result<Option<ActiveSession>, InfraError>;
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    context_id: Option<&'a str>,
    duration_seconds: u32,
}

#[derive(Debug, serde::Serialize)]
struct EndSessionRequest {
    completed: bool,
    interrupted: bool,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload {
    id: String,
    started_at: DateTime<Utc>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveSessionPayload {
    id: String,
    started_at: DateTime<Utc>,
    target_duration_seconds: u32,
    context_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReqwestSessionGateway {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl ReqwestSessionGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, InfraError> {
        let base_url = Url::parse(config.base_url.trim()).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid gateway base url: {error}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(format!(
                "gateway base url cannot be a base: {base_url}"
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|error| {
                InfraError::InvalidConfig(format!("failed building http client: {error}"))
            })?;

        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.clone(),
        })
    }

    fn endpoint(&self, tail: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("gateway base url cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.extend(SESSIONS_PATH);
            segments.extend(tail);
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        action: &str,
    ) -> Result<(StatusCode, String), InfraError> {
        let response = self.authorize(request).send().await.map_err(|error| {
            InfraError::GatewayUnreachable(format!("network error while {action}: {error}"))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::GatewayUnreachable(format!(
                "failed reading response while {action}: {error}"
            ))
        })?;
        Ok((status, body))
    }
}

/// Maps a non-success HTTP status onto the gateway failure taxonomy: server
/// and throttling failures are transient, every other client error is a
/// refusal.
pub fn gateway_http_error(status: StatusCode, body: &str, action: &str) -> InfraError {
    let message = if body.trim().is_empty() {
        format!("{action}: http {}", status.as_u16())
    } else {
        format!("{action}: http {}; body={}", status.as_u16(), body.trim())
    };
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        InfraError::GatewayUnreachable(message)
    } else {
        InfraError::GatewayRejected(message)
    }
}

fn parse_session_handle(body: &str) -> Result<SessionHandle, InfraError> {
    let parsed: SessionPayload = serde_json::from_str(body).map_err(|error| {
        InfraError::GatewayRejected(format!("invalid session payload: {error}; body={body}"))
    })?;
    let handle = SessionHandle {
        id: parsed.id.trim().to_string(),
        started_at: parsed.started_at,
    };
    handle.validate().map_err(InfraError::GatewayRejected)?;
    Ok(handle)
}

fn parse_active_session(body: &str) -> Result<Option<ActiveSession>, InfraError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let parsed: Option<ActiveSessionPayload> = serde_json::from_str(body).map_err(|error| {
        InfraError::GatewayRejected(format!("invalid active session payload: {error}; body={body}"))
    })?;
    let Some(parsed) = parsed else {
        return Ok(None);
    };

    let session = ActiveSession {
        id: parsed.id.trim().to_string(),
        started_at: parsed.started_at,
        target_duration_seconds: parsed.target_duration_seconds,
        context_id: parsed
            .context_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
    };
    session.validate().map_err(InfraError::GatewayRejected)?;
    Ok(Some(session))
}

#[async_trait]
impl SessionGateway for ReqwestSessionGateway {
    async fn start_focus_session(
        &self,
        context_id: Option<&str>,
        duration_seconds: u32,
    ) -> Result<SessionHandle, InfraError> {
        let action = "starting focus session";
        let request = StartSessionRequest {
            context_id: context_id.map(str::trim).filter(|value| !value.is_empty()),
            duration_seconds,
        };
        let (status, body) = self
            .send(self.client.post(self.endpoint(&[])?).json(&request), action)
            .await?;

        if !status.is_success() {
            return Err(gateway_http_error(status, &body, action));
        }
        parse_session_handle(&body)
    }

    async fn end_session(
        &self,
        session_id: &str,
        completed: bool,
        interrupted: bool,
    ) -> Result<(), InfraError> {
        let action = "ending focus session";
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(InfraError::InvalidState("session id must not be empty".to_string()));
        }
        let request = EndSessionRequest {
            completed,
            interrupted,
        };
        let (status, body) = self
            .send(
                self.client
                    .post(self.endpoint(&[session_id, "end"])?)
                    .json(&request),
                action,
            )
            .await?;

        if !status.is_success() {
            return Err(gateway_http_error(status, &body, action));
        }
        Ok(())
    }

    async fn get_active_session(&self) -> Result<Option<ActiveSession>, InfraError> {
        let action = "querying active focus session";
        let (status, body) = self
            .send(self.client.get(self.endpoint(&["active"])?), action)
            .await?;

        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(gateway_http_error(status, &body, action));
        }
        parse_active_session(&body)
    }
}
