//! Caller identity for outbound requests.
//!
//! | Provided value | Header |
//! |---|---|
//! | bearer token | `Authorization: Bearer <token>` |
//! | operator id | `X-Operator-Id: <id>` |
//!
//! Both are optional; a request with neither is anonymous.

use std::sync::RwLock;

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const OPERATOR_HEADER: &str = "X-Operator-Id";

/// Source of the current session's credentials.
pub trait SessionContext: Send + Sync {
    fn bearer_token(&self) -> Option<String> {
        None
    }

    fn operator_id(&self) -> Option<String> {
        None
    }
}

/// No credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousSession;

impl SessionContext for AnonymousSession {}

/// Credentials set by the host application at login and cleared at logout.
#[derive(Debug, Default)]
pub struct OperatorSession {
    inner: RwLock<Credentials>,
}

#[derive(Debug, Default, Clone)]
struct Credentials {
    token: Option<String>,
    operator: Option<String>,
}

impl OperatorSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(&self, token: impl Into<String>, operator_id: impl Into<String>) {
        if let Ok(mut creds) = self.inner.write() {
            creds.token = Some(token.into());
            creds.operator = Some(operator_id.into());
        }
    }

    pub fn logout(&self) {
        if let Ok(mut creds) = self.inner.write() {
            *creds = Credentials::default();
        }
    }

    fn read(&self) -> Credentials {
        self.inner.read().map(|c| c.clone()).unwrap_or_default()
    }
}

impl SessionContext for OperatorSession {
    fn bearer_token(&self) -> Option<String> {
        self.read().token
    }

    fn operator_id(&self) -> Option<String> {
        self.read().operator
    }
}

/// Headers contributed by `session`.
pub fn session_headers(session: &dyn SessionContext) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    if let Some(token) = session.bearer_token() {
        headers.push((AUTHORIZATION_HEADER.to_string(), format!("Bearer {token}")));
    }
    if let Some(operator) = session.operator_id() {
        headers.push((OPERATOR_HEADER.to_string(), operator));
    }
    headers
}
