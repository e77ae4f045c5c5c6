use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::types::Config;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Where Google API bearer tokens come from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    Static(String),
    /// The GCE / Cloud Run metadata server, queried on every call.
    MetadataServer { url: String },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl TokenSource {
    pub fn from_config(cfg: &Config) -> Self {
        match &cfg.access_token {
            Some(token) => TokenSource::Static(token.clone()),
            None => TokenSource::metadata_server(),
        }
    }

    pub fn metadata_server() -> Self {
        TokenSource::MetadataServer {
            url: METADATA_TOKEN_URL.to_string(),
        }
    }

    pub async fn token(&self, client: &reqwest::Client) -> Result<String> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::MetadataServer { url } => {
                let res = client
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .context("Failed to reach metadata server")?;
                if !res.status().is_success() {
                    return Err(anyhow!("metadata server returned {}", res.status()));
                }
                let body: TokenResponse = res
                    .json()
                    .await
                    .context("Invalid metadata token response")?;
                Ok(body.access_token)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config_with_env, MockEnvironment};

    #[test]
    fn test_source_from_config() {
        let cfg = load_config_with_env(&MockEnvironment::new().with_var("GOOGLE_ACCESS_TOKEN", "abc")).unwrap();
        assert!(matches!(TokenSource::from_config(&cfg), TokenSource::Static(t) if t == "abc"));

        let cfg = load_config_with_env(&MockEnvironment::new()).unwrap();
        assert!(matches!(TokenSource::from_config(&cfg), TokenSource::MetadataServer { .. }));
    }

    #[tokio::test]
    async fn test_metadata_server_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/token")
            .match_header("metadata-flavor", "Google")
            .with_status(200)
            .with_body(r#"{"access_token": "from-metadata", "expires_in": 3599, "token_type": "Bearer"}"#)
            .create_async()
            .await;

        let source = TokenSource::MetadataServer { url: format!("{}/token", server.url()) };
        let token = source.token(&reqwest::Client::new()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(token, "from-metadata");
    }

    #[tokio::test]
    async fn test_metadata_server_failure() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/token").with_status(404).create_async().await;

        let source = TokenSource::MetadataServer { url: format!("{}/token", server.url()) };
        let err = source.token(&reqwest::Client::new()).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
