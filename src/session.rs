//! Session identity
//!
//! One conversation token per client. The token lives in the page's
//! `session_id` query parameter so it survives reloads, and is replaced
//! wholesale when the user asks for a new session.

use rand::Rng;
use url::Url;

use crate::backend::ConversationBackend;
use crate::Result;

/// Query parameter carrying the session token
pub const SESSION_QUERY_PARAM: &str = "session_id";

/// Prefix of locally minted tokens
const TOKEN_PREFIX: &str = "chat";

/// Length of the random token suffix
const SUFFIX_LEN: usize = 9;

const SUFFIX_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// The page's navigation state
pub trait NavigationState: Send {
    /// Read a query parameter; empty values count as absent
    fn query_param(&self, key: &str) -> Option<String>;

    /// Rewrite a query parameter in place without navigating
    fn replace_query_param(&mut self, key: &str, value: &str);
}

/// [`NavigationState`] backed by a plain URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrl {
    url: Url,
}

impl PageUrl {
    /// Wrap an already parsed URL
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self { url }
    }

    /// Parse a page URL
    ///
    /// # Errors
    ///
    /// Returns error if `raw` is not an absolute URL
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(Self::new(Url::parse(raw)?))
    }

    /// Current URL, including any rewritten query
    #[must_use]
    pub const fn as_url(&self) -> &Url {
        &self.url
    }
}

impl NavigationState for PageUrl {
    fn query_param(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
    }

    fn replace_query_param(&mut self, key: &str, value: &str) {
        let others: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(k, _)| k != key)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        self.url
            .query_pairs_mut()
            .clear()
            .extend_pairs(others)
            .append_pair(key, value);
    }
}

/// Owns the active conversation token
pub struct SessionIdentity {
    navigation: Box<dyn NavigationState>,
    token: Option<String>,
}

impl SessionIdentity {
    /// Create an identity over the page's navigation state
    ///
    /// Nothing is read until [`current`](Self::current) is first called.
    #[must_use]
    pub fn new(navigation: Box<dyn NavigationState>) -> Self {
        Self {
            navigation,
            token: None,
        }
    }

    /// Active token, resumed from the URL or minted on first access
    pub fn current(&mut self) -> String {
        if let Some(token) = &self.token {
            return token.clone();
        }

        let token = if let Some(existing) = self.navigation.query_param(SESSION_QUERY_PARAM) {
            tracing::debug!(session = %existing, "resumed session from url");
            existing
        } else {
            let minted = generate_token();
            self.navigation
                .replace_query_param(SESSION_QUERY_PARAM, &minted);
            tracing::info!(session = %minted, "started new local session");
            minted
        };

        self.token = Some(token.clone());
        token
    }

    /// Active token without lazily creating one
    #[must_use]
    pub fn peek(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Replace the token with a fresh one issued by the backend
    ///
    /// The active token is untouched when the backend call fails.
    ///
    /// # Errors
    ///
    /// Returns error if the backend doesn't issue a new session
    pub async fn rotate(&mut self, backend: &dyn ConversationBackend) -> Result<String> {
        let token = backend.new_session().await?;

        self.navigation
            .replace_query_param(SESSION_QUERY_PARAM, &token);
        let previous = self.token.replace(token.clone());
        tracing::info!(session = %token, previous = ?previous, "session rotated");

        Ok(token)
    }
}

/// Mint a `chat-<millis>-<suffix>` token
///
/// Unique enough to keep two tabs apart; not a secret.
#[must_use]
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())]))
        .collect();

    format!(
        "{TOKEN_PREFIX}-{}-{suffix}",
        chrono::Utc::now().timestamp_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_shape() {
        let token = generate_token();
        let mut parts = token.splitn(3, '-');

        assert_eq!(parts.next(), Some("chat"));
        assert!(parts.next().unwrap().chars().all(|c| c.is_ascii_digit()));
        let suffix = parts.next().unwrap();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_replace_keeps_other_params() {
        let mut page = PageUrl::parse("http://localhost:8000/?lang=en&session_id=old").unwrap();
        page.replace_query_param(SESSION_QUERY_PARAM, "new");

        assert_eq!(page.query_param("lang").as_deref(), Some("en"));
        assert_eq!(page.query_param(SESSION_QUERY_PARAM).as_deref(), Some("new"));
        assert_eq!(
            page.as_url().query_pairs().filter(|(k, _)| k == SESSION_QUERY_PARAM).count(),
            1
        );
    }

    #[test]
    fn test_empty_param_is_absent() {
        let page = PageUrl::parse("http://localhost:8000/?session_id=").unwrap();
        assert!(page.query_param(SESSION_QUERY_PARAM).is_none());
    }

    #[test]
    fn test_current_resumes_from_url() {
        let page = PageUrl::parse("http://localhost:8000/?session_id=abc-123").unwrap();
        let mut identity = SessionIdentity::new(Box::new(page));

        assert!(identity.peek().is_none());
        assert_eq!(identity.current(), "abc-123");
        assert_eq!(identity.peek(), Some("abc-123"));
    }
}
