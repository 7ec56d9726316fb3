//! Bearer token acquisition.
//!
//! The client asks its [`TokenProvider`] for a token on the first command and
//! caches the result for its lifetime.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::future::BoxFuture;
use tower::BoxError;

/// Supplies the bearer token sent in the auth header.
pub trait TokenProvider: Send + Sync + 'static {
    fn token(&self) -> BoxFuture<'_, Result<String, BoxError>>;
}

/// A token known up front.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> BoxFuture<'_, Result<String, BoxError>> {
        let token = self.0.clone();
        Box::pin(async move { Ok(token) })
    }
}

/// A token derived from a username and password for deployments that accept
/// `Cassandra:<base64 username>:<base64 password>`. No network call is made.
#[derive(Clone)]
pub struct UsernamePasswordToken {
    username: String,
    password: String,
}

impl UsernamePasswordToken {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn encode(&self) -> String {
        format!(
            "Cassandra:{}:{}",
            STANDARD.encode(&self.username),
            STANDARD.encode(&self.password)
        )
    }
}

impl std::fmt::Debug for UsernamePasswordToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsernamePasswordToken")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl TokenProvider for UsernamePasswordToken {
    fn token(&self) -> BoxFuture<'_, Result<String, BoxError>> {
        Box::pin(async move { Ok(self.encode()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        assert_eq!(StaticToken::new("AstraCS:abc").token().await.unwrap(), "AstraCS:abc");
    }

    #[tokio::test]
    async fn test_username_password_token() {
        let provider = UsernamePasswordToken::new("cassandra", "s3cret");
        assert_eq!(
            provider.token().await.unwrap(),
            "Cassandra:Y2Fzc2FuZHJh:czNjcmV0"
        );
    }

    #[test]
    fn test_debug_hides_secrets() {
        let rendered = format!("{:?}", UsernamePasswordToken::new("user", "hunter2"));
        assert!(!rendered.contains("hunter2"));
        assert!(!format!("{:?}", StaticToken::new("hunter2")).contains("hunter2"));
    }
}
