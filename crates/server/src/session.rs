//! Ephemeral per-login session storage.
//!
//! A login spans two requests: the login redirect saves `state`, `nonce` and the
//! caller's redirect URL, and the provider callback reads them back. The HTTP
//! implementation keeps them in cookies named `{scope}-{key}` so that two providers'
//! in-flight logins in the same browser never collide.

use crate::error::EnvError;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use std::collections::HashMap;

/// Key/value storage scoped to a single login attempt.
pub trait Env: Send + Sync {
    fn save(&mut self, key: &str, value: &str) -> Result<(), EnvError>;
    fn load(&self, key: &str) -> Result<String, EnvError>;
}

/// Cookie-backed [`Env`].
///
/// `load` reads the cookies of the incoming request; `save` queues cookies on the
/// response. The jar returned by [`HttpEnv::into_jar`] must be part of the response
/// for saved values to reach the browser.
#[derive(Debug, Clone)]
pub struct HttpEnv {
    scope: String,
    jar: CookieJar,
}

impl HttpEnv {
    pub fn new(scope: impl Into<String>, jar: CookieJar) -> Self {
        Self {
            scope: scope.into(),
            jar,
        }
    }

    pub fn cookie_name(&self, key: &str) -> String {
        format!("{}-{}", self.scope, key)
    }

    pub fn into_jar(self) -> CookieJar {
        self.jar
    }
}

impl Env for HttpEnv {
    fn save(&mut self, key: &str, value: &str) -> Result<(), EnvError> {
        // Session cookie: no Max-Age, the browser drops it with the session.
        let cookie = Cookie::build((self.cookie_name(key), value.to_string()))
            .http_only(true)
            .path("/")
            .build();
        let jar = std::mem::take(&mut self.jar);
        self.jar = jar.add(cookie);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<String, EnvError> {
        let name = self.cookie_name(key);
        self.jar
            .get(&name)
            .map(|c| c.value().to_string())
            .ok_or(EnvError::NotFound(name))
    }
}

/// In-process [`Env`], for callers that carry the session themselves.
#[derive(Debug, Clone, Default)]
pub struct MemoryEnv {
    values: HashMap<String, String>,
}

impl MemoryEnv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Env for MemoryEnv {
    fn save(&mut self, key: &str, value: &str) -> Result<(), EnvError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<String, EnvError> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| EnvError::NotFound(key.to_string()))
    }
}
