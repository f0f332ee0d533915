//! User-delegated OAuth2 credentials for installed applications.
//!
//! The persisted token moves through four states, see [`TokenState`]. Each
//! state has one handler in [`InstalledAppAuthenticator`]:
//!
//! - `Valid`: used as-is
//! - `ExpiredRefreshable`: refresh-token grant, then persisted
//! - `ExpiredUnrefreshable` / `Missing`: interactive browser consent, then persisted
//!
//! Storage, time and consent sit behind traits so the transitions can be
//! driven without a browser or a real clock.

use std::convert::Infallible;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, PkceCodeChallenge, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::auth::{TokenProvider, AUTH_URI, TOKEN_URI};
use crate::error::{DriveError, Result};
use crate::models::{OAuthClientSecret, StoredToken};

/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// OAuth client with authorization and token endpoints configured.
pub type OAuthClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

// ============================================================================
// Seams
// ============================================================================

/// Persistence for the authorized-user token.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredToken>>;
    fn save(&self, token: &StoredToken) -> Result<()>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Tokens granted by the authorization server.
#[derive(Debug, Clone)]
pub struct Grant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<StdDuration>,
    pub scopes: Vec<String>,
}

impl Grant {
    fn from_response<R: TokenResponse>(response: &R) -> Self {
        Self {
            access_token: response.access_token().secret().to_string(),
            refresh_token: response.refresh_token().map(|t| t.secret().to_string()),
            expires_in: response.expires_in(),
            scopes: response
                .scopes()
                .map(|scopes| scopes.iter().map(|s| (**s).clone()).collect())
                .unwrap_or_default(),
        }
    }
}

/// Obtains a fresh grant by asking the user.
#[async_trait]
pub trait ConsentFlow: Send + Sync {
    async fn authorize(&self, client: &OAuthClient, scope: &str) -> Result<Grant>;
}

// ============================================================================
// FileTokenStore
// ============================================================================

/// Keeps the token as JSON in a local file (`token.json` by default).
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<StoredToken>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No stored token");
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let token: StoredToken = serde_json::from_str(&content)?;
        debug!(path = %self.path.display(), "Loaded stored token");
        Ok(Some(token))
    }

    fn save(&self, token: &StoredToken) -> Result<()> {
        let json = serde_json::to_string_pretty(token)?;
        fs::write(&self.path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        debug!(path = %self.path.display(), "Saved token");
        Ok(())
    }
}

// ============================================================================
// TokenState
// ============================================================================

/// Where a persisted token stands relative to `now`.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenState {
    /// Nothing usable on disk, or a token granted for a different scope.
    Missing,
    Valid(StoredToken),
    ExpiredRefreshable(StoredToken),
    ExpiredUnrefreshable(StoredToken),
}

impl TokenState {
    pub fn classify(token: Option<StoredToken>, now: DateTime<Utc>, scope: &str) -> Self {
        let Some(token) = token else {
            return Self::Missing;
        };

        // An empty scope list means the file did not record scopes.
        if !token.scopes.is_empty() && !token.scopes.iter().any(|s| s == scope) {
            return Self::Missing;
        }

        let expired = match (&token.token, token.expiry) {
            (None, _) => true,
            (Some(_), Some(expiry)) => expiry <= now + Duration::seconds(EXPIRY_SKEW_SECS),
            (Some(_), None) => false,
        };

        if !expired {
            Self::Valid(token)
        } else if token.refresh_token.is_some() {
            Self::ExpiredRefreshable(token)
        } else {
            Self::ExpiredUnrefreshable(token)
        }
    }
}

// ============================================================================
// InstalledAppAuthenticator
// ============================================================================

/// Token provider for OAuth client secrets of the `installed` / `web` kind.
pub struct InstalledAppAuthenticator {
    oauth: OAuthClient,
    client_id: String,
    client_secret: Option<String>,
    token_uri: String,
    scope: String,
    http: reqwest::Client,
    store: Box<dyn TokenStore>,
    clock: Box<dyn Clock>,
    consent: Box<dyn ConsentFlow>,
    current: Mutex<Option<StoredToken>>,
}

impl InstalledAppAuthenticator {
    pub fn new(secret: &OAuthClientSecret, scope: &str, store: Box<dyn TokenStore>) -> Result<Self> {
        let auth_uri = secret.auth_uri.as_deref().unwrap_or(AUTH_URI);
        let token_uri = secret.token_uri.as_deref().unwrap_or(TOKEN_URI);

        let mut oauth = BasicClient::new(ClientId::new(secret.client_id.clone()))
            .set_auth_uri(AuthUrl::new(auth_uri.to_string()).map_err(|e| {
                DriveError::AuthenticationError(format!("Invalid auth URI {}: {}", auth_uri, e))
            })?)
            .set_token_uri(TokenUrl::new(token_uri.to_string()).map_err(|e| {
                DriveError::AuthenticationError(format!("Invalid token URI {}: {}", token_uri, e))
            })?)
            .set_auth_type(AuthType::RequestBody);
        if let Some(client_secret) = &secret.client_secret {
            oauth = oauth.set_client_secret(ClientSecret::new(client_secret.clone()));
        }

        // The token endpoint must not be followed through redirects.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            oauth,
            client_id: secret.client_id.clone(),
            client_secret: secret.client_secret.clone(),
            token_uri: token_uri.to_string(),
            scope: scope.to_string(),
            http,
            store,
            clock: Box::new(SystemClock),
            consent: Box::new(LoopbackConsent),
            current: Mutex::new(None),
        })
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_consent(mut self, consent: Box<dyn ConsentFlow>) -> Self {
        self.consent = consent;
        self
    }

    async fn on_refreshable(&self, token: StoredToken) -> Result<StoredToken> {
        info!("Refreshing access token");
        let refresh_token = token.refresh_token.clone().unwrap_or_default();

        let response = self
            .oauth
            .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
            .request_async(&self.http)
            .await
            .map_err(|e| DriveError::TokenRefreshError(e.to_string()))?;

        let mut grant = Grant::from_response(&response);
        if grant.refresh_token.is_none() {
            grant.refresh_token = Some(refresh_token);
        }
        if grant.scopes.is_empty() {
            grant.scopes = token.scopes;
        }
        self.persist(grant)
    }

    async fn on_unrefreshable(&self, _token: StoredToken) -> Result<StoredToken> {
        warn!("Stored token expired and has no refresh token; asking for consent again");
        self.on_missing().await
    }

    async fn on_missing(&self) -> Result<StoredToken> {
        info!("Requesting user authorization");
        let grant = self.consent.authorize(&self.oauth, &self.scope).await?;
        self.persist(grant)
    }

    fn persist(&self, grant: Grant) -> Result<StoredToken> {
        let now = self.clock.now();
        let expiry = grant.expires_in.and_then(|d| {
            Duration::from_std(d).ok().map(|d| now + d)
        });
        let scopes = if grant.scopes.is_empty() {
            vec![self.scope.clone()]
        } else {
            grant.scopes
        };

        let token = StoredToken {
            token: Some(grant.access_token),
            refresh_token: grant.refresh_token,
            token_uri: Some(self.token_uri.clone()),
            client_id: Some(self.client_id.clone()),
            client_secret: self.client_secret.clone(),
            scopes,
            expiry,
        };
        self.store.save(&token)?;
        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for InstalledAppAuthenticator {
    async fn access_token(&self) -> Result<String> {
        let mut current = self.current.lock().await;

        let candidate = match current.take() {
            Some(token) => Some(token),
            None => self.store.load()?,
        };

        let token = match TokenState::classify(candidate, self.clock.now(), &self.scope) {
            TokenState::Valid(token) => token,
            TokenState::ExpiredRefreshable(token) => self.on_refreshable(token).await?,
            TokenState::ExpiredUnrefreshable(token) => self.on_unrefreshable(token).await?,
            TokenState::Missing => self.on_missing().await?,
        };

        let access_token = token.token.clone().ok_or_else(|| {
            DriveError::AuthenticationError("Authorization server returned no access token".into())
        })?;
        *current = Some(token);
        Ok(access_token)
    }
}

// ============================================================================
// LoopbackConsent
// ============================================================================

/// Browser consent with the redirect caught by a one-shot localhost listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackConsent;

/// Query parameters of the authorization redirect.
#[derive(Debug, PartialEq, Eq)]
pub enum RedirectParams {
    Code { code: String, state: String },
    Denied(String),
}

/// Parse the request target of the redirect, e.g. `/?code=..&state=..`.
///
/// Returns `None` for requests that are not the redirect (favicon and the like).
pub fn parse_redirect(target: &str) -> Option<RedirectParams> {
    let url = url::Url::parse(&format!("http://127.0.0.1{}", target)).ok()?;
    let mut code = None;
    let mut state = None;
    let mut error = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            "error" => error = Some(value.to_string()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Some(RedirectParams::Denied(error));
    }
    Some(RedirectParams::Code {
        code: code?,
        state: state.unwrap_or_default(),
    })
}

const SUCCESS_PAGE: &str =
    "<html><body>The authentication flow has completed. You may close this window.</body></html>";
const DENIED_PAGE: &str = "<html><body>Authorization was denied.</body></html>";
const STATE_MISMATCH_PAGE: &str = "<html><body>State mismatch.</body></html>";

/// Decide the response to one request on the redirect listener, and the
/// consent outcome it carries, if any.
fn handle_redirect(
    target: &str,
    expected_state: &str,
) -> (StatusCode, &'static str, Option<Result<String>>) {
    match parse_redirect(target) {
        Some(RedirectParams::Code { code, state }) if state == expected_state => {
            (StatusCode::OK, SUCCESS_PAGE, Some(Ok(code)))
        }
        Some(RedirectParams::Code { .. }) => (
            StatusCode::BAD_REQUEST,
            STATE_MISMATCH_PAGE,
            Some(Err(DriveError::ConsentError(
                "State parameter did not match the authorization request".into(),
            ))),
        ),
        Some(RedirectParams::Denied(error)) => (
            StatusCode::OK,
            DENIED_PAGE,
            Some(Err(DriveError::ConsentError(error))),
        ),
        None => (StatusCode::NOT_FOUND, "", None),
    }
}

fn html_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

/// Localhost HTTP listener that catches the authorization redirect.
pub struct RedirectListener {
    listener: TcpListener,
    port: u16,
}

impl RedirectListener {
    /// Bind to an ephemeral port on 127.0.0.1.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        debug!(port, "Redirect listener bound");
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    /// Serve requests until one carries the redirect, then return its code.
    ///
    /// Requests without redirect parameters get a 404 and are ignored. A
    /// denied consent or a `state` other than `expected_state` ends the wait
    /// with `ConsentError`.
    pub async fn wait_for_code(self, expected_state: &str) -> Result<String> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Result<String>>();
        let expected_state = Arc::new(expected_state.to_string());

        loop {
            tokio::select! {
                outcome = rx.recv() => {
                    return outcome.unwrap_or_else(|| {
                        Err(DriveError::ConsentError("Redirect listener closed".into()))
                    });
                }
                accepted = self.listener.accept() => {
                    let (stream, addr) = accepted?;
                    debug!(%addr, "Redirect listener accepted connection");

                    let tx = tx.clone();
                    let expected_state = expected_state.clone();
                    let service = service_fn(move |req: Request<Incoming>| {
                        let target = req
                            .uri()
                            .path_and_query()
                            .map(|pq| pq.as_str())
                            .unwrap_or("/");
                        let (status, body, outcome) = handle_redirect(target, &expected_state);
                        if let Some(outcome) = outcome {
                            let _ = tx.send(outcome);
                        }
                        async move { Ok::<_, Infallible>(html_response(status, body)) }
                    });

                    tokio::spawn(async move {
                        if let Err(e) = http1::Builder::new()
                            .keep_alive(false)
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            warn!("Redirect listener connection error: {}", e);
                        }
                    });
                }
            }
        }
    }
}

#[async_trait]
impl ConsentFlow for LoopbackConsent {
    async fn authorize(&self, client: &OAuthClient, scope: &str) -> Result<Grant> {
        let listener = RedirectListener::bind().await?;
        let redirect = RedirectUrl::new(listener.redirect_uri())
            .map_err(|e| DriveError::ConsentError(e.to_string()))?;
        let client = client.clone().set_redirect_uri(redirect);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf) = client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(scope.to_string()))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce_challenge)
            .url();

        eprintln!(
            "Please visit this URL to authorize this application: {}",
            auth_url
        );
        if let Err(e) = webbrowser::open(auth_url.as_str()) {
            warn!("Could not open a browser: {}", e);
        }

        let code = listener.wait_for_code(csrf.secret()).await?;

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let response = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(&http)
            .await
            .map_err(|e| DriveError::AuthenticationError(e.to_string()))?;

        info!("User authorization granted");
        Ok(Grant::from_response(&response))
    }
}
