/// Authorization code grant: URL construction, code capture, token exchange
use crate::error::{FlowError, Result};
use crate::pkce::PkcePair;
use crate::state::{unix_now, FlowState, Token};
use rand::Rng;
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

/// Query parameters delivered to the redirect URL
pub type CallbackParams = HashMap<String, String>;

/// Obtains the redirect parameters for an authorization URL
///
/// The browser implementation lives in [`crate::callback`]. Embedded web
/// views are supplied by the host toolkit and must return
/// [`FlowError::AuthWindowClosed`] when the user closes the view early.
pub trait CodeCaptor {
    fn capture(&mut self, authorization_url: &Url, redirect_url: &Url) -> Result<CallbackParams>;
}

/// Performs the network side of the flow
pub trait TokenProvider: Send + Sync {
    /// Run the full authorization code flow, capturing the code through `captor`
    fn fetch(&self, state: &FlowState, captor: &mut dyn CodeCaptor) -> Result<Token>;

    /// Exchange a refresh token for a new token
    fn refresh(&self, state: &FlowState, refresh_token: &str) -> Result<Token>;
}

/// HTTP implementation of the authorization code and refresh token grants
#[derive(Debug, Clone)]
pub struct AuthorizationCodeProvider {
    http: reqwest::blocking::Client,
}

impl AuthorizationCodeProvider {
    pub fn new() -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("codeflow/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http))
    }

    pub fn with_client(http: reqwest::blocking::Client) -> Self {
        Self { http }
    }

    /// Build the authorization URL the user is sent to
    pub fn authorization_url(
        state: &FlowState,
        csrf_state: &str,
        pkce: Option<&PkcePair>,
    ) -> Result<Url> {
        let mut url = parse_url("authorization", &state.auth_url)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", state.client_id.trim())
                .append_pair("redirect_uri", state.redirect_url.trim());
            if !state.scope.trim().is_empty() {
                query.append_pair("scope", state.scope.trim());
            }
            query.append_pair("state", csrf_state);
            if let Some(pkce) = pkce {
                query
                    .append_pair("code_challenge", pkce.challenge())
                    .append_pair("code_challenge_method", PkcePair::METHOD);
            }
        }
        Ok(url)
    }

    fn request_token(&self, token_url: Url, form: &[(&str, &str)]) -> Result<Token> {
        let response = self
            .http
            .post(token_url)
            .header(ACCEPT, "application/json")
            .form(form)
            .send()?;

        let status = response.status().as_u16();
        let body = response.text()?;
        parse_token_response(status, &body, unix_now())
    }
}

impl TokenProvider for AuthorizationCodeProvider {
    fn fetch(&self, state: &FlowState, captor: &mut dyn CodeCaptor) -> Result<Token> {
        let token_url = parse_url("token", &state.token_url)?;
        let redirect_url = parse_url("redirect", &state.redirect_url)?;

        let csrf_state = match state.state.trim() {
            "" => random_state(),
            configured => configured.to_string(),
        };
        let pkce = state.use_pkce.then(PkcePair::generate);
        let authorization_url = Self::authorization_url(state, &csrf_state, pkce.as_ref())?;

        debug!(url = %authorization_url, "capturing authorization code");
        let params = captor.capture(&authorization_url, &redirect_url)?;
        let code = authorization_code(&params, &csrf_state)?;

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", state.redirect_url.trim()),
            ("client_id", state.client_id.trim()),
        ];
        if !state.client_secret.is_empty() {
            form.push(("client_secret", state.client_secret.as_str()));
        }
        if let Some(pkce) = &pkce {
            form.push(("code_verifier", pkce.verifier()));
        }

        debug!(url = %token_url, "exchanging authorization code");
        self.request_token(token_url, &form)
    }

    fn refresh(&self, state: &FlowState, refresh_token: &str) -> Result<Token> {
        let token_url = parse_url("token", &state.token_url)?;

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", state.client_id.trim()),
        ];
        if !state.client_secret.is_empty() {
            form.push(("client_secret", state.client_secret.as_str()));
        }
        if !state.scope.trim().is_empty() {
            form.push(("scope", state.scope.trim()));
        }

        debug!(url = %token_url, "refreshing access token");
        let mut token = self.request_token(token_url, &form)?;
        // Servers may omit the refresh token when it is not rotated
        token
            .refresh_token
            .get_or_insert_with(|| refresh_token.to_string());
        Ok(token)
    }
}

/// Parse and validate one of the configured endpoint URLs
pub(crate) fn parse_url(field: &'static str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|source| FlowError::MalformedUrl { field, source })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FlowError::InvalidUrl {
            field,
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

fn random_state() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Extract the code from redirect parameters, checking the CSRF state
pub(crate) fn authorization_code(params: &CallbackParams, expected_state: &str) -> Result<String> {
    if let Some(error) = params.get("error") {
        let reason = match params.get("error_description") {
            Some(description) => format!("{}: {}", error, description),
            None => error.clone(),
        };
        return Err(FlowError::NoAuthorizationGrant(reason));
    }

    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Err(FlowError::InvalidState);
    }

    params
        .get("code")
        .filter(|code| !code.is_empty())
        .cloned()
        .ok_or_else(|| FlowError::NoAuthorizationGrant("no code in redirect".into()))
}

/// Parse a token endpoint response body (JSON, or form-encoded as some
/// providers still answer)
pub(crate) fn parse_token_response(status: u16, body: &str, now: u64) -> Result<Token> {
    let fields: HashMap<String, Value> = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        _ => url::form_urlencoded::parse(body.as_bytes())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect(),
    };
    let text = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.is_empty())
    };

    if let Some(error) = text("error") {
        return Err(FlowError::AccessTokenDenied {
            error,
            description: text("error_description"),
        });
    }

    if !(200..300).contains(&status) {
        let body = body.trim();
        return Err(FlowError::AccessTokenDenied {
            error: format!("HTTP {}", status),
            description: (!body.is_empty()).then(|| body.chars().take(200).collect()),
        });
    }

    let access_token = text("access_token").ok_or_else(|| FlowError::AccessTokenDenied {
        error: "missing access_token".into(),
        description: None,
    })?;

    let expires_in = fields.get("expires_in").and_then(|v| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });

    Ok(Token {
        access_token,
        refresh_token: text("refresh_token"),
        token_type: text("token_type").unwrap_or_else(|| "Bearer".to_string()),
        expires_at: expires_in.map(|secs| now.saturating_add(secs)),
        scope: text("scope"),
    })
}
