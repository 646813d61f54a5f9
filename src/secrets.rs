use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_SITE_URL: &str = "https://app.infisical.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Infisical universal-auth settings used when no inline bot token is configured.
#[derive(Debug, Deserialize, Clone)]
pub struct InfisicalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub project_id: String,
    pub environment: String,
    #[serde(default = "default_secret_type")]
    pub secret_type: String,
    /// Full path of the secret holding the bot token, e.g. `/telegram/BOT_TOKEN`
    pub bot_token_key_path: String,
    #[serde(default = "default_site_url")]
    pub site_url: String,
}

fn default_secret_type() -> String {
    "shared".to_string()
}

fn default_site_url() -> String {
    DEFAULT_SITE_URL.to_string()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SecretResponse {
    secret: Secret,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Secret {
    secret_value: String,
}

/// Splits `/dir/sub/KEY` into (`/dir/sub`, `KEY`).
fn split_key_path(key_path: &str) -> (String, String) {
    let trimmed = key_path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((dir, key)) => {
            let dir = if dir.is_empty() { "/" } else { dir };
            let dir = if dir.starts_with('/') {
                dir.to_string()
            } else {
                format!("/{}", dir)
            };
            (dir, key.to_string())
        }
        None => ("/".to_string(), trimmed.to_string()),
    }
}

impl InfisicalConfig {
    /// Authenticate with client credentials and read the bot token secret.
    pub async fn fetch_bot_token(&self) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = self.site_url.trim_end_matches('/');

        info!("Retrieving bot token from Infisical ({})", base_url);

        let login_url = format!("{}/api/v1/auth/universal-auth/login", base_url);
        let response = client
            .post(&login_url)
            .json(&LoginRequest {
                client_id: &self.client_id,
                client_secret: &self.client_secret,
            })
            .send()
            .await
            .context("Failed to authenticate with Infisical")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Failed to authenticate with Infisical ({}): {}",
                status,
                error_body
            );
        }

        let login: LoginResponse = response
            .json()
            .await
            .context("Failed to parse Infisical login response")?;

        let (secret_path, secret_key) = split_key_path(&self.bot_token_key_path);
        debug!("Reading secret '{}' at path '{}'", secret_key, secret_path);

        let secret_url = format!("{}/api/v3/secrets/raw/{}", base_url, secret_key);
        let response = client
            .get(&secret_url)
            .bearer_auth(&login.access_token)
            .query(&[
                ("workspaceId", self.project_id.as_str()),
                ("environment", self.environment.as_str()),
                ("secretPath", secret_path.as_str()),
                ("type", self.secret_type.as_str()),
            ])
            .send()
            .await
            .context("Failed to retrieve telegram bot token from Infisical")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Failed to retrieve telegram bot token from Infisical ({}): {}",
                status,
                error_body
            );
        }

        let secret: SecretResponse = response
            .json()
            .await
            .context("Failed to parse Infisical secret response")?;

        if secret.secret.secret_value.trim().is_empty() {
            anyhow::bail!("Infisical secret '{}' is empty", self.bot_token_key_path);
        }

        Ok(secret.secret.secret_value)
    }
}
