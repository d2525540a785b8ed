//! HTTP session providers

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::ports::SessionProvider;

const API_KEY_HEADER: &str = "x-api-key";
const CLIENT_VERSION_HEADER: &str = "x-cli-version";

/// Session that attaches API key, bearer token and client version headers
///
/// The token is taken as given; obtaining and refreshing it is the caller's job.
#[derive(Clone, Debug)]
pub struct HttpSession {
    client: reqwest::Client,
}

impl HttpSession {
    /// Build a session from header material
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static(CLIENT_VERSION_HEADER),
            header_value(&config.client_version, "session.client_version")?,
        );
        if let Some(api_key) = &config.api_key {
            let mut value = header_value(api_key, "session.api_key")?;
            value.set_sensitive(true);
            headers.insert(HeaderName::from_static(API_KEY_HEADER), value);
        }
        if let Some(token) = &config.token {
            let mut value = header_value(&format!("Bearer {token}"), "session.token")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(config.accept_invalid_certs);
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self { client })
    }

    /// Wrap an already-configured client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl SessionProvider for HttpSession {
    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client.get(url)
    }
}

/// Session without credentials, for pre-signed temporary URLs
#[derive(Clone, Debug, Default)]
pub struct AnonymousSession {
    client: reqwest::Client,
}

impl AnonymousSession {
    /// Create a session with a default client
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionProvider for AnonymousSession {
    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client.get(url)
    }
}

fn header_value(value: &str, key: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::Config {
        message: format!("invalid header value: {e}"),
        key: Some(key.to_string()),
    })
}
