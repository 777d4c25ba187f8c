//! Remote settings source fetched over HTTPS.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use super::error::BoxError;
use super::format::Format;
use super::source::{Loader, SettingEntry};
use super::LoadError;

/// Bytes returned by a [`Fetch`] implementation.
#[derive(Debug, Clone, Default)]
pub struct Fetched {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// Connection, TLS or timeout failure. Worth retrying.
    #[error("request failed: {0}")]
    Transport(#[source] BoxError),

    #[error("server responded with HTTP {0}")]
    Status(u16),
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status(code) => *code >= 500 || *code == 429,
        }
    }
}

/// Fetches the bytes behind a URL.
pub trait Fetch: Send + Sync + fmt::Debug {
    /// Implementations must give up once `timeout` has elapsed.
    fn fetch(&self, url: &Url, timeout: Duration) -> Result<Fetched, FetchError>;
}

/// Timeouts and retry policy for remote sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RemoteOptions {
    /// Overall budget for all attempts, in milliseconds.
    pub timeout_ms: u64,
    /// Additional attempts after the first failure.
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries: 3,
            retry_delay_ms: 500,
        }
    }
}

impl RemoteOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Blocking HTTPS client. Plaintext HTTP and TLS versions older than 1.2 are refused.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(options: &RemoteOptions) -> Result<Self, reqwest::Error> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(format!("layerconf/{}", env!("CARGO_PKG_VERSION")))
            .https_only(true)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .timeout(options.timeout())
            .build()?;
        Ok(Self { http })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &Url, timeout: Duration) -> Result<Fetched, FetchError> {
        let response = self
            .http
            .get(url.clone())
            .timeout(timeout)
            .send()
            .map_err(|e| FetchError::Transport(Box::new(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .map_err(|e| FetchError::Transport(Box::new(e)))?
            .to_vec();

        Ok(Fetched { body, content_type })
    }
}

/// Loads settings from a document served over HTTPS.
///
/// The format comes from, in order: an explicit format, a `type` query
/// parameter, the response `Content-Type`, then the URL path extension.
#[derive(Debug, Clone)]
pub struct RemoteLoader {
    url: String,
    format: Option<Format>,
    options: RemoteOptions,
    fetcher: Option<Arc<dyn Fetch>>,
}

impl RemoteLoader {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: None,
            options: RemoteOptions::default(),
            fetcher: None,
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: RemoteOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    fn fetcher(&self) -> Result<Arc<dyn Fetch>, LoadError> {
        match &self.fetcher {
            Some(fetcher) => Ok(Arc::clone(fetcher)),
            None => HttpFetcher::new(&self.options)
                .map(|f| Arc::new(f) as Arc<dyn Fetch>)
                .map_err(|e| LoadError::unreachable(&self.url, e)),
        }
    }

    fn fetch_with_retries(&self, url: &Url) -> Result<Fetched, LoadError> {
        let fetcher = self.fetcher()?;
        let deadline = Instant::now() + self.options.timeout();
        let attempts = self.options.retries + 1;

        let mut attempt = 1;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let err = match fetcher.fetch(url, remaining) {
                Ok(fetched) => return Ok(fetched),
                Err(FetchError::Status(404)) => {
                    return Err(LoadError::not_found(&self.url, FetchError::Status(404)));
                }
                Err(err) => err,
            };

            let delay = self.options.retry_delay();
            let out_of_time = Instant::now() + delay >= deadline;
            if !err.is_retryable() || attempt >= attempts || out_of_time {
                return Err(LoadError::unreachable(
                    &self.url,
                    format!("{err} (after {attempt} attempt(s))"),
                ));
            }

            warn!(url = %self.url, attempt, error = %err, "settings fetch failed, retrying");
            thread::sleep(delay);
            attempt += 1;
        }
    }
}

impl Loader for RemoteLoader {
    fn locator(&self) -> String {
        self.url.clone()
    }

    fn load(&self) -> Result<Vec<SettingEntry>, LoadError> {
        let url = Url::parse(&self.url).map_err(|e| LoadError::not_found(&self.url, e))?;
        if url.scheme() != "https" {
            return Err(LoadError::insecure(
                &self.url,
                format!("scheme '{}' is not allowed, use https", url.scheme()),
            ));
        }

        info!(url = %self.url, "fetching remote settings");
        let fetched = self.fetch_with_retries(&url)?;

        let format = self
            .format
            .or_else(|| query_format(&url))
            .or_else(|| fetched.content_type.as_deref().and_then(Format::from_content_type))
            .or_else(|| Format::from_path(url.path()))
            .ok_or_else(|| {
                LoadError::unsupported_format(&self.url, "cannot determine content type")
            })?;

        let text = String::from_utf8(fetched.body).map_err(|e| LoadError::parse(&self.url, e))?;
        format.parse_entries(&text, &self.url)
    }
}

fn query_format(url: &Url) -> Option<Format> {
    url.query_pairs()
        .find(|(key, _)| key == "type")
        .and_then(|(_, value)| Format::from_content_type(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::LoadErrorKind;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Replays canned responses, one per call, and counts calls.
    #[derive(Debug, Default)]
    struct ScriptedFetcher {
        responses: Mutex<Vec<Result<Fetched, FetchError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedFetcher {
        fn new(mut responses: Vec<Result<Fetched, FetchError>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock()
        }
    }

    impl Fetch for ScriptedFetcher {
        fn fetch(&self, _url: &Url, _timeout: Duration) -> Result<Fetched, FetchError> {
            *self.calls.lock() += 1;
            self.responses
                .lock()
                .pop()
                .unwrap_or_else(|| Err(FetchError::Transport("no more responses".into())))
        }
    }

    fn body(text: &str, content_type: Option<&str>) -> Result<Fetched, FetchError> {
        Ok(Fetched {
            body: text.as_bytes().to_vec(),
            content_type: content_type.map(str::to_string),
        })
    }

    fn fast_options() -> RemoteOptions {
        RemoteOptions {
            timeout_ms: 5_000,
            retries: 2,
            retry_delay_ms: 1,
        }
    }

    #[test]
    fn test_loads_using_content_type_header() {
        let fetcher = ScriptedFetcher::new(vec![body(
            r#"{"REMOTE_VALUE": 3}"#,
            Some("application/json; charset=utf-8"),
        )]);
        let loader = RemoteLoader::new("https://config.example.com/settings")
            .with_options(fast_options())
            .with_fetcher(fetcher.clone());

        let entries = loader.load().unwrap();

        assert_eq!(entries, vec![SettingEntry::new("REMOTE_VALUE", json!(3))]);
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_format_from_path_when_no_header() {
        let fetcher = ScriptedFetcher::new(vec![body("REMOTE_VALUE: true\n", None)]);
        let loader = RemoteLoader::new("https://config.example.com/prod.yaml")
            .with_options(fast_options())
            .with_fetcher(fetcher);

        let entries = loader.load().unwrap();

        assert_eq!(entries, vec![SettingEntry::new("REMOTE_VALUE", json!(true))]);
    }

    #[test]
    fn test_plaintext_http_is_rejected_before_fetching() {
        let fetcher = ScriptedFetcher::new(vec![body("{}", Some("application/json"))]);
        let loader = RemoteLoader::new("http://config.example.com/settings.json")
            .with_fetcher(fetcher.clone());

        let err = loader.load().unwrap_err();

        assert_eq!(err.kind, LoadErrorKind::Insecure);
        assert_eq!(fetcher.calls(), 0);
    }

    #[test]
    fn test_retries_then_succeeds() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::Transport("connection reset".into())),
            Err(FetchError::Status(503)),
            body(r#"{"VALUE": 1}"#, Some("application/json")),
        ]);
        let loader = RemoteLoader::new("https://config.example.com/settings.json")
            .with_options(fast_options())
            .with_fetcher(fetcher.clone());

        assert!(loader.load().is_ok());
        assert_eq!(fetcher.calls(), 3);
    }

    #[test]
    fn test_unreachable_after_retries_exhausted() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let loader = RemoteLoader::new("https://config.example.com/settings.json")
            .with_options(fast_options())
            .with_fetcher(fetcher.clone());

        let err = loader.load().unwrap_err();

        assert_eq!(err.kind, LoadErrorKind::Unreachable);
        assert_eq!(fetcher.calls(), 3);
    }

    #[test]
    fn test_client_errors_are_not_retried() {
        let fetcher = ScriptedFetcher::new(vec![Err(FetchError::Status(403))]);
        let loader = RemoteLoader::new("https://config.example.com/settings.json")
            .with_options(fast_options())
            .with_fetcher(fetcher.clone());

        let err = loader.load().unwrap_err();

        assert_eq!(err.kind, LoadErrorKind::Unreachable);
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_missing_document_is_not_found() {
        let fetcher = ScriptedFetcher::new(vec![Err(FetchError::Status(404))]);
        let loader = RemoteLoader::new("https://config.example.com/settings.json")
            .with_options(fast_options())
            .with_fetcher(fetcher);

        assert_eq!(loader.load().unwrap_err().kind, LoadErrorKind::NotFound);
    }

    #[test]
    fn test_malformed_content_is_parse_error() {
        let fetcher = ScriptedFetcher::new(vec![body("{not json", Some("application/json"))]);
        let loader = RemoteLoader::new("https://config.example.com/settings.json")
            .with_options(fast_options())
            .with_fetcher(fetcher);

        assert_eq!(loader.load().unwrap_err().kind, LoadErrorKind::ParseError);
    }

    #[test]
    fn test_type_query_parameter_wins_over_header() {
        let fetcher = ScriptedFetcher::new(vec![body("VALUE = 2\n", Some("text/plain"))]);
        let loader = RemoteLoader::new("https://config.example.com/settings?type=toml")
            .with_options(fast_options())
            .with_fetcher(fetcher);

        assert_eq!(
            loader.load().unwrap(),
            vec![SettingEntry::new("VALUE", json!(2))]
        );
    }

    /// Takes `latency` per request, or gives up at the timeout it is handed.
    #[derive(Debug)]
    struct SlowFetcher {
        latency: Duration,
        calls: Mutex<Vec<Duration>>,
    }

    impl Fetch for SlowFetcher {
        fn fetch(&self, _url: &Url, timeout: Duration) -> Result<Fetched, FetchError> {
            self.calls.lock().push(timeout);
            if timeout < self.latency {
                thread::sleep(timeout);
                return Err(FetchError::Transport("operation timed out".into()));
            }
            thread::sleep(self.latency);
            Err(FetchError::Status(503))
        }
    }

    #[test]
    fn test_retries_stay_within_overall_timeout() {
        let fetcher = Arc::new(SlowFetcher {
            latency: Duration::from_millis(300),
            calls: Mutex::new(Vec::new()),
        });
        let loader = RemoteLoader::new("https://config.example.com/settings.json")
            .with_options(RemoteOptions {
                timeout_ms: 400,
                retries: 5,
                retry_delay_ms: 1,
            })
            .with_fetcher(fetcher.clone());

        let started = Instant::now();
        let err = loader.load().unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err.kind, LoadErrorKind::Unreachable);
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
        let budgets = fetcher.calls.lock();
        assert_eq!(budgets.len(), 2);
        assert!(budgets[1] < Duration::from_millis(400));
    }
}
