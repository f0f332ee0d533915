//! Access token providers for Google APIs.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{DriveError, Result};
use crate::models::{CredentialsFile, ServiceAccountCredentials, TokenResponse};
use crate::user_auth::{FileTokenStore, InstalledAppAuthenticator};

/// Google OAuth2 token endpoint.
pub const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Google OAuth2 authorization endpoint.
pub const AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

/// Scope limited to files this application created or opened.
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Anything that can hand out a bearer token for Drive requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get a valid access token, refreshing or re-authorizing if necessary.
    async fn access_token(&self) -> Result<String>;
}

/// Build the right authenticator for a credentials file.
///
/// OAuth client secrets (`installed` or `web`) get the user-consent flow
/// with tokens persisted to `token_file`; service account keys get
/// JWT-bearer authentication and ignore `token_file`.
pub fn load_authenticator<P, T>(
    credential_file: P,
    token_file: T,
    scope: &str,
) -> Result<Arc<dyn TokenProvider>>
where
    P: AsRef<Path>,
    T: AsRef<Path>,
{
    let content = fs::read_to_string(credential_file.as_ref())?;
    let credentials: CredentialsFile = serde_json::from_str(&content).map_err(|e| {
        DriveError::AuthenticationError(format!(
            "{} is neither an OAuth client secrets file nor a service account key: {}",
            credential_file.as_ref().display(),
            e
        ))
    })?;

    match credentials {
        CredentialsFile::ServiceAccount(credentials) => {
            debug!(email = %credentials.client_email, "Using service account credentials");
            Ok(Arc::new(ServiceAccountAuthenticator::new(credentials, scope)))
        }
        CredentialsFile::Installed { installed: secret } | CredentialsFile::Web { web: secret } => {
            debug!(client_id = %secret.client_id, "Using OAuth client credentials");
            let store = FileTokenStore::new(token_file.as_ref());
            Ok(Arc::new(InstalledAppAuthenticator::new(
                &secret,
                scope,
                Box::new(store),
            )?))
        }
    }
}

/// JWT claims for service account authentication.
#[derive(Debug, Serialize)]
struct Claims {
    iss: String,   // Issuer (service account email)
    scope: String, // OAuth scope
    aud: String,   // Audience (token endpoint)
    exp: u64,      // Expiration time
    iat: u64,      // Issued at
}

/// Cached access token with expiration.
#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: SystemTime,
}

/// Authenticator for Google APIs using service account credentials.
#[derive(Clone)]
pub struct ServiceAccountAuthenticator {
    credentials: Arc<ServiceAccountCredentials>,
    scope: String,
    client: Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl ServiceAccountAuthenticator {
    /// Create a new authenticator from credentials.
    pub fn new(credentials: ServiceAccountCredentials, scope: &str) -> Self {
        Self {
            credentials: Arc::new(credentials),
            scope: scope.to_string(),
            client: Client::new(),
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    fn token_uri(&self) -> &str {
        self.credentials.token_uri.as_deref().unwrap_or(TOKEN_URI)
    }

    /// Refresh the access token using JWT assertion.
    async fn refresh_token(&self) -> Result<CachedToken> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| DriveError::AuthenticationError(e.to_string()))?
            .as_secs();

        let claims = Claims {
            iss: self.credentials.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.token_uri().to_string(),
            iat: now,
            exp: now + 3600, // 1 hour
        };

        // Create JWT
        let header = Header::new(Algorithm::RS256);
        let key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())?;
        let jwt = encode(&header, &claims, &key)?;

        // Exchange JWT for access token
        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", jwt.as_str()),
        ];

        let response = self
            .client
            .post(self.token_uri())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::TokenRefreshError(format!(
                "Status {}: {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response.json().await?;
        info!(email = %self.credentials.client_email, "Obtained service account token");

        let expires_at = SystemTime::now() + Duration::from_secs(token_response.expires_in);

        Ok(CachedToken {
            access_token: token_response.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountAuthenticator {
    async fn access_token(&self) -> Result<String> {
        // Check if we have a valid cached token
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                // Add 60 second buffer before expiration
                let buffer = Duration::from_secs(60);
                if token.expires_at > SystemTime::now() + buffer {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let new_token = self.refresh_token().await?;

        {
            let mut cached = self.cached_token.write().await;
            *cached = Some(new_token.clone());
        }

        Ok(new_token.access_token)
    }
}

/// A fixed token, for tests and for callers that manage tokens themselves.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
