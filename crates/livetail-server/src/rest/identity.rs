//! Client identity resolution.
//!
//! A request is mapped to a stable [`ClientId`] by, in order:
//! 1. the identity header (`x-user-id` by default)
//! 2. a signed identity cookie
//! 3. a freshly minted id, which is then set as a signed cookie on the response

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum::response::{IntoResponseParts, ResponseParts};
use axum_extra::extract::cookie::{Cookie, Key, SignedCookieJar};
use livetail_core::ClientId;
use sha2::{Digest, Sha512};
use tracing::debug;

use crate::config::IdentityConfig;

/// Resolves requests to client ids.
#[derive(Clone)]
pub struct IdentityResolver {
    cookie_name: String,
    header_name: String,
    key: Key,
}

impl IdentityResolver {
    /// Build a resolver. The cookie signing key is derived from the
    /// configured secret, so ids survive restarts as long as the secret does.
    pub fn new(config: &IdentityConfig) -> Self {
        let digest = Sha512::digest(config.cookie_secret.as_bytes());
        Self {
            cookie_name: config.cookie_name.clone(),
            header_name: config.header_name.to_ascii_lowercase(),
            key: Key::from(digest.as_slice()),
        }
    }

    /// Resolve the caller of a request.
    pub fn resolve(&self, headers: &HeaderMap) -> ClientIdentity {
        if let Some(id) = headers
            .get(self.header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return ClientIdentity::existing(ClientId::from(id));
        }

        let jar = SignedCookieJar::from_headers(headers, self.key.clone());
        if let Some(cookie) = jar.get(&self.cookie_name) {
            return ClientIdentity::existing(ClientId::from(cookie.value()));
        }

        let id = ClientId::new();
        debug!(client_id = %id, "minted client id");
        let cookie = Cookie::build((self.cookie_name.clone(), id.to_string()))
            .http_only(true)
            .path("/");
        ClientIdentity {
            id,
            jar: Some(jar.add(cookie)),
        }
    }
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("cookie_name", &self.cookie_name)
            .field("header_name", &self.header_name)
            .finish_non_exhaustive()
    }
}

/// The resolved caller of a request.
///
/// Also usable as a response part: when the id was minted for this request,
/// it sets the identity cookie.
pub struct ClientIdentity {
    /// Caller id.
    pub id: ClientId,
    jar: Option<SignedCookieJar>,
}

impl ClientIdentity {
    fn existing(id: ClientId) -> Self {
        Self { id, jar: None }
    }

    /// Whether the id was minted while handling this request.
    pub fn is_new(&self) -> bool {
        self.jar.is_some()
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("id", &self.id)
            .field("is_new", &self.is_new())
            .finish()
    }
}

impl<S> FromRequestParts<S> for ClientIdentity
where
    Arc<IdentityResolver>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resolver = Arc::<IdentityResolver>::from_ref(state);
        Ok(resolver.resolve(&parts.headers))
    }
}

impl IntoResponseParts for ClientIdentity {
    type Error = Infallible;

    fn into_response_parts(self, res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        match self.jar {
            Some(jar) => jar.into_response_parts(res),
            None => Ok(res),
        }
    }
}
