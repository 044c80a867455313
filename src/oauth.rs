// OAuth Core - PKCE authorization flow and encrypted token storage
//
// Supports the OpenAI (Codex-style PKCE), Google, and Anthropic providers.
// The PKCE verifier is 32 random bytes URL-safe encoded, the challenge its
// base64url SHA-256; state is an independent 32-byte random bound to the
// (user, provider) pair. Verifiers are wiped after a successful exchange.
// Stored tokens are AES-256-GCM encrypted when a key is configured,
// plaintext otherwise (development mode, logged at init).

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, Context};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::config::{OAuthClient, OAuthSettings};
use crate::errors::ApiError;
use crate::types::OAuthTokenRecord;

/// Providers with an OAuth flow
pub const SUPPORTED_PROVIDERS: &[&str] = &["openai", "google", "anthropic"];

// ---------------------------------------------------------------------------
// Token encryption
// ---------------------------------------------------------------------------

/// Symmetric cipher for tokens at rest. Without a key both directions are
/// the identity function.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Option<Aes256Gcm>,
}

impl TokenCipher {
    /// Build from a 64-hex-char key; None selects plaintext mode
    pub fn new(hex_key: Option<&str>) -> anyhow::Result<Self> {
        match hex_key {
            Some(hex_key) => {
                let key_bytes = hex::decode(hex_key).context("decoding token encryption key")?;
                if key_bytes.len() != 32 {
                    return Err(anyhow!("token encryption key must be 32 bytes"));
                }
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
                Ok(Self {
                    cipher: Some(cipher),
                })
            }
            None => {
                warn!("no token encryption key configured, storing OAuth tokens in plaintext");
                Ok(Self { cipher: None })
            }
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> anyhow::Result<String> {
        let Some(cipher) = &self.cipher else {
            return Ok(plaintext.to_string());
        };
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| anyhow!("token encryption failed"))?;
        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }

    pub fn decrypt(&self, stored: &str) -> anyhow::Result<String> {
        let Some(cipher) = &self.cipher else {
            return Ok(stored.to_string());
        };
        let combined = STANDARD.decode(stored).context("decoding stored token")?;
        if combined.len() < 12 {
            return Err(anyhow!("stored token too short"));
        }
        let (nonce, ciphertext) = combined.split_at(12);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("token decryption failed"))?;
        String::from_utf8(plaintext).context("decrypted token is not UTF-8")
    }
}

// ---------------------------------------------------------------------------
// PKCE primitives
// ---------------------------------------------------------------------------

/// 32 random bytes, URL-safe encoded (43 chars)
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// challenge = base64url(SHA-256(verifier))
pub fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Random state token bound to one authorization attempt
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// ---------------------------------------------------------------------------
// Provider endpoints
// ---------------------------------------------------------------------------

struct ProviderEndpoints {
    authorize_url: &'static str,
    token_url: &'static str,
    scope: &'static str,
}

fn endpoints_for(provider: &str) -> Option<ProviderEndpoints> {
    match provider {
        "openai" => Some(ProviderEndpoints {
            authorize_url: "https://auth.openai.com/oauth/authorize",
            token_url: "https://auth.openai.com/oauth/token",
            scope: "openid profile email offline_access",
        }),
        "google" => Some(ProviderEndpoints {
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
            token_url: "https://oauth2.googleapis.com/token",
            scope: "openid email https://www.googleapis.com/auth/generative-language.retriever",
        }),
        "anthropic" => Some(ProviderEndpoints {
            authorize_url: "https://claude.ai/oauth/authorize",
            token_url: "https://console.anthropic.com/v1/oauth/token",
            scope: "org:create_api_key user:profile",
        }),
        _ => None,
    }
}

/// Build the user-facing authorization URL
fn build_authorize_url(
    endpoints: &ProviderEndpoints,
    client: &OAuthClient,
    state: &str,
    challenge: &str,
) -> String {
    let mut url = url::Url::parse(endpoints.authorize_url).expect("static authorize URL is valid");
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("response_type", "code");
        if let Some(client_id) = &client.client_id {
            pairs.append_pair("client_id", client_id);
        }
        if let Some(redirect_uri) = &client.redirect_uri {
            pairs.append_pair("redirect_uri", redirect_uri);
        }
        pairs.append_pair("scope", endpoints.scope);
        pairs.append_pair("state", state);
        pairs.append_pair("code_challenge", challenge);
        pairs.append_pair("code_challenge_method", "S256");
    }
    url.to_string()
}

/// Pull an email claim out of an OIDC id_token without verification;
/// verification is the auth layer's concern, this is display metadata only
fn email_from_id_token(id_token: &str) -> Option<String> {
    let parts: Vec<&str> = id_token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let decoded = URL_SAFE_NO_PAD.decode(parts[1].trim_end_matches('=')).ok()?;
    let payload: Value = serde_json::from_slice(&decoded).ok()?;
    payload["email"].as_str().map(str::to_string)
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Outcome of a successful authorization-URL request
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuthorizeOutcome {
    pub authorization_url: String,
    pub state: String,
}

/// Outcome of a code exchange or status check
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub provider: String,
    pub email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// OAuth flows plus encrypted token persistence
pub struct OAuthService {
    pool: PgPool,
    settings: OAuthSettings,
    cipher: TokenCipher,
    client: reqwest::Client,
}

impl OAuthService {
    pub fn new(pool: PgPool, settings: OAuthSettings, cipher: TokenCipher) -> Self {
        Self {
            pool,
            settings,
            cipher,
            client: reqwest::Client::new(),
        }
    }

    fn client_for(&self, provider: &str) -> Result<&OAuthClient, ApiError> {
        if !SUPPORTED_PROVIDERS.contains(&provider) {
            return Err(ApiError::InvalidInput(format!(
                "unsupported provider: {provider}"
            )));
        }
        let client = self
            .settings
            .client_for(provider)
            .ok_or_else(|| ApiError::InvalidInput(format!("unsupported provider: {provider}")))?;
        if !client.is_configured() {
            return Err(ApiError::InvalidInput(format!(
                "OAuth credentials for {provider} are not configured"
            )));
        }
        Ok(client)
    }

    /// Begin the flow: generate state + verifier, persist them, return the
    /// authorization URL
    pub async fn authorize(&self, provider: &str, user: &str) -> Result<AuthorizeOutcome, ApiError> {
        let client = self.client_for(provider)?;
        let endpoints =
            endpoints_for(provider).ok_or_else(|| ApiError::NotFound("provider".to_string()))?;

        let verifier = generate_verifier();
        let challenge = pkce_challenge(&verifier);
        let state = generate_state();

        sqlx::query(
            "INSERT INTO oauth_tokens (user_name, provider, pkce_verifier, state_token) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_name, provider) \
             DO UPDATE SET pkce_verifier = $3, state_token = $4, updated_at = now()",
        )
        .bind(user)
        .bind(provider)
        .bind(&verifier)
        .bind(&state)
        .execute(&self.pool)
        .await?;

        let authorization_url = build_authorize_url(&endpoints, client, &state, &challenge);
        Ok(AuthorizeOutcome {
            authorization_url,
            state,
        })
    }

    /// Exchange the authorization code. The state must match the stored one
    /// for this (user, provider); the verifier is wiped afterwards.
    pub async fn exchange_code(
        &self,
        provider: &str,
        user: &str,
        code: &str,
        state: &str,
    ) -> Result<ConnectionStatus, ApiError> {
        let client = self.client_for(provider)?;
        let endpoints =
            endpoints_for(provider).ok_or_else(|| ApiError::NotFound("provider".to_string()))?;

        let record = self
            .load_record(user, provider)
            .await?
            .ok_or_else(|| ApiError::InvalidInput("no authorization in progress".to_string()))?;

        if record.state_token.as_deref() != Some(state) {
            return Err(ApiError::InvalidInput("state token mismatch".to_string()));
        }
        let verifier = record
            .pkce_verifier
            .ok_or_else(|| ApiError::InvalidInput("no authorization in progress".to_string()))?;

        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("code_verifier", verifier),
        ];
        if let Some(client_id) = &client.client_id {
            form.push(("client_id", client_id.clone()));
        }
        if let Some(client_secret) = &client.client_secret {
            form.push(("client_secret", client_secret.clone()));
        }
        if let Some(redirect_uri) = &client.redirect_uri {
            form.push(("redirect_uri", redirect_uri.clone()));
        }

        let response = self
            .client
            .post(endpoints.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ApiError::Provider {
                provider: provider.to_string(),
                message: e.to_string(),
                status_code: None,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Provider {
                provider: provider.to_string(),
                message: format!(
                    "token exchange returned {status}: {}",
                    body.chars().take(300).collect::<String>()
                ),
                status_code: Some(status.as_u16()),
            });
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        let access_token = data["access_token"]
            .as_str()
            .ok_or_else(|| ApiError::Internal("token response missing access_token".to_string()))?;
        let refresh_token = data["refresh_token"].as_str();
        let expires_at = data["expires_in"]
            .as_i64()
            .map(|secs| Utc::now() + Duration::seconds(secs));
        let scope = data["scope"].as_str();
        let email = data["id_token"].as_str().and_then(email_from_id_token);

        self.store_tokens(
            user,
            provider,
            access_token,
            refresh_token,
            expires_at,
            scope,
            email.as_deref(),
        )
        .await?;

        info!("OAuth connected: user={user} provider={provider}");
        Ok(ConnectionStatus {
            connected: true,
            provider: provider.to_string(),
            email,
            expires_at,
        })
    }

    /// Connection status for one (user, provider)
    pub async fn status(&self, provider: &str, user: &str) -> Result<ConnectionStatus, ApiError> {
        if !SUPPORTED_PROVIDERS.contains(&provider) {
            return Err(ApiError::InvalidInput(format!(
                "unsupported provider: {provider}"
            )));
        }
        let record = self.load_record(user, provider).await?;
        let connected = record
            .as_ref()
            .map(|r| !r.access_token.is_empty())
            .unwrap_or(false);
        Ok(ConnectionStatus {
            connected,
            provider: provider.to_string(),
            email: record.as_ref().and_then(|r| r.email.clone()),
            expires_at: record.and_then(|r| r.expires_at),
        })
    }

    /// Drop stored credentials
    pub async fn disconnect(&self, provider: &str, user: &str) -> Result<bool, ApiError> {
        if !SUPPORTED_PROVIDERS.contains(&provider) {
            return Err(ApiError::InvalidInput(format!(
                "unsupported provider: {provider}"
            )));
        }
        let result =
            sqlx::query("DELETE FROM oauth_tokens WHERE user_name = $1 AND provider = $2")
                .bind(user)
                .bind(provider)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Decrypted, unexpired access token for per-request provider injection.
    /// An expired token is refreshed when a refresh token exists.
    pub async fn get_valid_token(&self, provider: &str, user: &str) -> Option<String> {
        let record = self.load_record(user, provider).await.ok()??;
        if record.access_token.is_empty() {
            return None;
        }

        let expired = record
            .expires_at
            .map(|at| at <= Utc::now())
            .unwrap_or(false);

        if !expired {
            return match self.cipher.decrypt(&record.access_token) {
                Ok(token) => Some(token),
                Err(err) => {
                    warn!("failed to decrypt stored token for {provider}: {err}");
                    None
                }
            };
        }

        let refresh_token = record.refresh_token.as_deref()?;
        let refresh_token = self.cipher.decrypt(refresh_token).ok()?;
        match self.refresh(provider, user, &refresh_token).await {
            Ok(token) => Some(token),
            Err(err) => {
                warn!("token refresh failed for {provider}: {err}");
                None
            }
        }
    }

    async fn refresh(
        &self,
        provider: &str,
        user: &str,
        refresh_token: &str,
    ) -> Result<String, ApiError> {
        let client = self.client_for(provider)?;
        let endpoints =
            endpoints_for(provider).ok_or_else(|| ApiError::NotFound("provider".to_string()))?;

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        if let Some(client_id) = &client.client_id {
            form.push(("client_id", client_id.clone()));
        }
        if let Some(client_secret) = &client.client_secret {
            form.push(("client_secret", client_secret.clone()));
        }

        let response = self
            .client
            .post(endpoints.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ApiError::Provider {
                provider: provider.to_string(),
                message: e.to_string(),
                status_code: None,
            })?
            .error_for_status()
            .map_err(|e| ApiError::Provider {
                provider: provider.to_string(),
                message: e.to_string(),
                status_code: e.status().map(|s| s.as_u16()),
            })?;

        let data: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let access_token = data["access_token"]
            .as_str()
            .ok_or_else(|| ApiError::Internal("refresh response missing access_token".to_string()))?;
        let new_refresh = data["refresh_token"].as_str();
        let expires_at = data["expires_in"]
            .as_i64()
            .map(|secs| Utc::now() + Duration::seconds(secs));

        self.store_tokens(user, provider, access_token, new_refresh, expires_at, None, None)
            .await?;
        Ok(access_token.to_string())
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_tokens(
        &self,
        user: &str,
        provider: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        scope: Option<&str>,
        email: Option<&str>,
    ) -> Result<(), ApiError> {
        let encrypted_access = self
            .cipher
            .encrypt(access_token)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let encrypted_refresh = match refresh_token {
            Some(token) => Some(
                self.cipher
                    .encrypt(token)
                    .map_err(|e| ApiError::Internal(e.to_string()))?,
            ),
            None => None,
        };

        // Successful exchange wipes the PKCE verifier and state token
        sqlx::query(
            "INSERT INTO oauth_tokens \
                 (user_name, provider, access_token, refresh_token, expires_at, scope, email, \
                  pkce_verifier, state_token) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, NULL) \
             ON CONFLICT (user_name, provider) DO UPDATE SET \
                 access_token = $3, \
                 refresh_token = COALESCE($4, oauth_tokens.refresh_token), \
                 expires_at = $5, \
                 scope = COALESCE($6, oauth_tokens.scope), \
                 email = COALESCE($7, oauth_tokens.email), \
                 pkce_verifier = NULL, \
                 state_token = NULL, \
                 updated_at = now()",
        )
        .bind(user)
        .bind(provider)
        .bind(encrypted_access)
        .bind(encrypted_refresh)
        .bind(expires_at)
        .bind(scope)
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_record(
        &self,
        user: &str,
        provider: &str,
    ) -> Result<Option<OAuthTokenRecord>, ApiError> {
        let record = sqlx::query_as::<_, OAuthTokenRecord>(
            "SELECT user_name, provider, access_token, refresh_token, expires_at, \
                    pkce_verifier, state_token, scope, email \
             FROM oauth_tokens WHERE user_name = $1 AND provider = $2",
        )
        .bind(user)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_round_trip_with_key() {
        let key = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
        let cipher = TokenCipher::new(Some(key)).unwrap();
        let token = "sk-secret-token-value";
        let encrypted = cipher.encrypt(token).unwrap();
        assert_ne!(encrypted, token);
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), token);
    }

    #[test]
    fn cipher_without_key_is_identity() {
        let cipher = TokenCipher::new(None).unwrap();
        assert_eq!(cipher.encrypt("abc").unwrap(), "abc");
        assert_eq!(cipher.decrypt("abc").unwrap(), "abc");
    }

    #[test]
    fn cipher_rejects_short_keys() {
        assert!(TokenCipher::new(Some("deadbeef")).is_err());
        assert!(TokenCipher::new(Some("zz")).is_err());
    }

    #[test]
    fn cipher_rejects_tampered_ciphertext() {
        let key = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
        let cipher = TokenCipher::new(Some(key)).unwrap();
        let mut encrypted = cipher.encrypt("token").unwrap();
        // flip a character near the end of the base64 payload
        let flipped = if encrypted.pop() == Some('A') { 'B' } else { 'A' };
        encrypted.push(flipped);
        assert!(cipher.decrypt(&encrypted).is_err());
    }

    #[test]
    fn pkce_challenge_matches_rfc7636_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            pkce_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn verifier_and_state_are_long_and_urlsafe() {
        let verifier = generate_verifier();
        let state = generate_state();
        assert_eq!(verifier.len(), 43);
        assert!(state.len() >= 43);
        assert_ne!(generate_verifier(), verifier);
        for c in verifier.chars().chain(state.chars()) {
            assert!(c.is_ascii_alphanumeric() || c == '-' || c == '_');
        }
    }

    #[test]
    fn authorize_url_carries_pkce_parameters() {
        let endpoints = endpoints_for("openai").unwrap();
        let client = OAuthClient {
            client_id: Some("client-1".to_string()),
            client_secret: None,
            redirect_uri: Some("http://localhost:8080/callback".to_string()),
        };
        let url = build_authorize_url(&endpoints, &client, "state-x", "challenge-y");
        assert!(url.starts_with("https://auth.openai.com/oauth/authorize?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("state=state-x"));
        assert!(url.contains("code_challenge=challenge-y"));
        assert!(url.contains("code_challenge_method=S256"));
    }

    #[test]
    fn email_extraction_from_id_token() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"email":"user@lab.example"}"#);
        let id_token = format!("h.{payload}.s");
        assert_eq!(
            email_from_id_token(&id_token).as_deref(),
            Some("user@lab.example")
        );
        assert!(email_from_id_token("broken").is_none());
    }

    #[test]
    fn unknown_provider_has_no_endpoints() {
        assert!(endpoints_for("cohere").is_none());
        assert!(endpoints_for("openai").is_some());
        assert!(endpoints_for("google").is_some());
        assert!(endpoints_for("anthropic").is_some());
    }
}
