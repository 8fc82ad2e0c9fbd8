//! REST API client.
//!
//! One method per endpoint the core needs. Responses map onto the
//! semantic error taxonomy; the client itself never retries (rate limits
//! are the caller's responsibility, and the only retry loop in the crate
//! is the login loop in the session manager).

use parking_lot::RwLock;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::types::{Channel, Invite, Message, ServerPayload};

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// REST API client.
///
/// The bot-identity header (the configured bot name) is fixed at
/// construction and sent on every request.
#[derive(Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    /// Session token; set once login succeeds, attached to every
    /// subsequent request.
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// Build a client from the configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(format!(
                "{} (accord {})",
                config.bot_name,
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    /// Attach the session token used for authenticated endpoints.
    pub fn set_token(&self, token: &str) {
        *self.token.write() = Some(token.to_string());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Low-level: the single request funnel
    // ─────────────────────────────────────────────────────────────────────

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        let response = self.send(method, path, body).await?;
        let bytes = Self::check_status(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn request_no_response(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<()> {
        let response = self.send(method, path, body).await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(?method, path, "REST request");

        let mut req = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };

        if let Some(token) = self.token.read().as_deref() {
            req = req.header("Authorization", token);
        }

        if let Some(b) = body {
            req = req.json(b);
        }

        Ok(req.send().await?)
    }

    /// Map a non-success status onto the error taxonomy.
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            // retry_after lives in the body; fall back to the header.
            let header = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok());

            #[derive(Deserialize)]
            struct RateLimitBody {
                retry_after: Option<f64>,
            }

            let body: Option<RateLimitBody> = response.json().await.ok();
            let retry_after = body
                .and_then(|b| b.retry_after)
                .or(header)
                .unwrap_or(1.0);
            return Err(Error::RateLimited { retry_after });
        }

        match status {
            StatusCode::UNAUTHORIZED => Err(Error::InvalidAuthentication),
            StatusCode::FORBIDDEN => Err(Error::NoPermission),
            StatusCode::NOT_FOUND => Err(Error::NotFound),
            other => Err(Error::HttpStatus(other.as_u16())),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Authentication
    // ─────────────────────────────────────────────────────────────────────

    /// Log in with email and password, returning a session token.
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct LoginResponse {
            token: String,
        }

        let body = json!({ "email": email, "password": password });
        let resp: LoginResponse = self.request(Method::Post, "/auth/login", Some(&body)).await?;
        Ok(resp.token)
    }

    /// Fetch the gateway WebSocket URL.
    pub async fn gateway(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct GatewayResponse {
            url: String,
        }

        let resp: GatewayResponse = self.request(Method::Get, "/gateway", None).await?;
        Ok(resp.url)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Channels and messages
    // ─────────────────────────────────────────────────────────────────────

    /// Fetch a channel by id.
    pub async fn channel(&self, channel_id: u64) -> Result<Channel> {
        self.request(Method::Get, &format!("/channels/{channel_id}"), None)
            .await
    }

    /// Open (or fetch) the private channel with a user.
    pub async fn create_private(&self, recipient_id: u64) -> Result<Channel> {
        let body = json!({ "recipient_id": recipient_id.to_string() });
        self.request(Method::Post, "/users/@me/channels", Some(&body))
            .await
    }

    /// Send a text message to a channel.
    pub async fn send_message(
        &self,
        channel_id: u64,
        content: &str,
        tts: bool,
    ) -> Result<Message> {
        let body = json!({ "content": content, "tts": tts, "mentions": [] });
        self.request(
            Method::Post,
            &format!("/channels/{channel_id}/messages"),
            Some(&body),
        )
        .await
    }

    /// Send a file (with optional accompanying text) to a channel.
    pub async fn send_file(
        &self,
        channel_id: u64,
        filename: &str,
        bytes: Vec<u8>,
        content: Option<&str>,
    ) -> Result<Message> {
        let url = format!("{}/channels/{channel_id}/messages", self.base_url);

        let mut form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string()),
        );
        if let Some(text) = content {
            form = form.text("content", text.to_string());
        }

        let mut req = self.client.post(&url).multipart(form);
        if let Some(token) = self.token.read().as_deref() {
            req = req.header("Authorization", token);
        }

        let response = req.send().await?;
        let bytes = Self::check_status(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Invites and servers
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve an invite code (or full invite URL) to its summary.
    pub async fn resolve_invite(&self, invite: &str) -> Result<Invite> {
        let code = Self::invite_code(invite);
        self.request(Method::Get, &format!("/invite/{code}"), None)
            .await
    }

    /// Accept an invite, joining its server.
    pub async fn join_server(&self, invite: &str) -> Result<Invite> {
        let code = Self::invite_code(invite);
        self.request(Method::Post, &format!("/invite/{code}"), None)
            .await
    }

    /// Revoke an invite.
    pub async fn delete_invite(&self, invite: &str) -> Result<()> {
        let code = Self::invite_code(invite);
        self.request_no_response(Method::Delete, &format!("/invite/{code}"), None)
            .await
    }

    /// Create a new server owned by the bot account.
    pub async fn create_server(&self, name: &str, region: &str) -> Result<ServerPayload> {
        let body = json!({ "name": name, "region": region });
        self.request(Method::Post, "/guilds", Some(&body)).await
    }

    fn invite_code(invite: &str) -> &str {
        invite
            .rsplit('/')
            .next()
            .unwrap_or(invite)
    }

    // ─────────────────────────────────────────────────────────────────────
    // OAuth applications
    // ─────────────────────────────────────────────────────────────────────

    /// Create an OAuth application, returning its raw description
    /// (id and secret included).
    pub async fn create_oauth_application(&self, name: &str) -> Result<serde_json::Value> {
        let body = json!({ "name": name });
        self.request(Method::Post, "/oauth2/applications", Some(&body))
            .await
    }

    /// Update an OAuth application.
    pub async fn update_oauth_application(
        &self,
        application_id: u64,
        name: &str,
        redirect_uris: &[String],
        description: Option<&str>,
    ) -> Result<serde_json::Value> {
        let body = json!({
            "name": name,
            "redirect_uris": redirect_uris,
            "description": description.unwrap_or(""),
        });
        self.request(
            Method::Put,
            &format!("/oauth2/applications/{application_id}"),
            Some(&body),
        )
        .await
    }
}
