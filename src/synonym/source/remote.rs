//! Synonym rules served over HTTP.
//!
//! Change detection is a conditional `HEAD` request carrying the validators
//! of the last compiled content. `304 Not Modified` means unchanged, a
//! success status is compared against the stored validators, anything else is
//! an error. Endpoints that send neither `Last-Modified` nor `ETag` fall back
//! to fetching the body and comparing its CRC32.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};

use crate::error::{Result, SynonymError};
use crate::synonym::config::{CompileOptions, SourceKind};
use crate::synonym::dictionary::{Fingerprint, SynonymDictionary};
use crate::synonym::rules::DictionaryBuilder;

use super::SourceHandle;

/// Status and validators of a remote response; `body` is set for `GET`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub body: Option<String>,
}

impl RemoteResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn validators(&self) -> Option<Fingerprint> {
        if self.last_modified.is_none() && self.etag.is_none() {
            return None;
        }
        Some(Fingerprint::Http {
            last_modified: self.last_modified.clone(),
            etag: self.etag.clone(),
        })
    }
}

/// HTTP-capable fetch primitive used by [`RemoteSource`].
pub trait Transport: Send + Sync {
    /// Issue a `HEAD` request, optionally conditional.
    fn head(
        &self,
        url: &str,
        if_modified_since: Option<&str>,
        if_none_match: Option<&str>,
    ) -> Result<RemoteResponse>;

    /// Issue a `GET` request and return the decoded body.
    fn get(&self, url: &str) -> Result<RemoteResponse>;
}

/// [`Transport`] backed by a blocking reqwest client.
///
/// Requests only ever run on reload worker threads or during factory
/// construction, never on an async executor.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SynonymError::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(HttpTransport { client })
    }

    fn header(response: &reqwest::blocking::Response, name: reqwest::header::HeaderName) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

impl Transport for HttpTransport {
    fn head(
        &self,
        url: &str,
        if_modified_since: Option<&str>,
        if_none_match: Option<&str>,
    ) -> Result<RemoteResponse> {
        let mut request = self.client.head(url);
        if let Some(value) = if_modified_since {
            request = request.header(IF_MODIFIED_SINCE, value);
        }
        if let Some(value) = if_none_match {
            request = request.header(IF_NONE_MATCH, value);
        }

        let response = request
            .send()
            .map_err(|e| SynonymError::transport(format!("HEAD {url} failed: {e}")))?;

        Ok(RemoteResponse {
            status: response.status().as_u16(),
            last_modified: Self::header(&response, LAST_MODIFIED),
            etag: Self::header(&response, ETAG),
            body: None,
        })
    }

    fn get(&self, url: &str) -> Result<RemoteResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| SynonymError::transport(format!("GET {url} failed: {e}")))?;

        let status = response.status().as_u16();
        let last_modified = Self::header(&response, LAST_MODIFIED);
        let etag = Self::header(&response, ETAG);
        // text() honors the charset of the Content-Type header.
        let body = response
            .text()
            .map_err(|e| SynonymError::transport(format!("GET {url} body failed: {e}")))?;

        Ok(RemoteResponse {
            status,
            last_modified,
            etag,
            body: Some(body),
        })
    }
}

/// A rule file served from an `http(s)://` endpoint.
pub struct RemoteSource {
    url: String,
    options: CompileOptions,
    builder: Arc<dyn DictionaryBuilder>,
    transport: Arc<dyn Transport>,
}

impl RemoteSource {
    /// Create a source for the given URL.
    pub fn new(
        url: String,
        options: CompileOptions,
        builder: Arc<dyn DictionaryBuilder>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        RemoteSource {
            url,
            options,
            builder,
            transport,
        }
    }

    fn fetch(&self) -> Result<(String, Fingerprint)> {
        let response = self.transport.get(&self.url)?;
        if !response.is_success() {
            return Err(status_error("GET", &self.url, response.status));
        }

        let body = response.body.clone().unwrap_or_default();
        let fingerprint = response
            .validators()
            .unwrap_or_else(|| Fingerprint::Content(crc32fast::hash(body.as_bytes())));
        Ok((body, fingerprint))
    }
}

fn status_error(method: &str, url: &str, status: u16) -> SynonymError {
    if status == 404 {
        SynonymError::not_found(url)
    } else {
        SynonymError::transport(format!("{method} {url} returned status {status}"))
    }
}

impl SourceHandle for RemoteSource {
    fn location(&self) -> &str {
        &self.url
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Remote
    }

    fn options(&self) -> &CompileOptions {
        &self.options
    }

    fn has_changed(&self, last: Option<&Fingerprint>) -> Result<bool> {
        let (if_modified_since, if_none_match) = match last {
            Some(Fingerprint::Http {
                last_modified,
                etag,
            }) => (last_modified.as_deref(), etag.as_deref()),
            _ => (None, None),
        };

        let response = self
            .transport
            .head(&self.url, if_modified_since, if_none_match)?;

        if response.status == 304 {
            return Ok(false);
        }
        if !response.is_success() {
            return Err(status_error("HEAD", &self.url, response.status));
        }

        match response.validators() {
            Some(current) => Ok(last != Some(&current)),
            None => {
                let (_, current) = self.fetch()?;
                Ok(last != Some(&current))
            }
        }
    }

    fn fetch_and_compile(&self) -> Result<SynonymDictionary> {
        let (body, fingerprint) = self.fetch()?;
        let dictionary = self.builder.compile(&body, &self.options)?;
        Ok(dictionary.with_fingerprint(fingerprint))
    }
}

impl fmt::Debug for RemoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSource")
            .field("url", &self.url)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::synonym::rules::RuleDictionaryBuilder;

    /// In-process endpoint serving whatever the test puts in it.
    #[derive(Default)]
    pub(crate) struct MockTransport {
        pub(crate) state: Mutex<MockState>,
    }

    #[derive(Default)]
    pub(crate) struct MockState {
        pub(crate) status: u16,
        pub(crate) body: String,
        pub(crate) last_modified: Option<String>,
        pub(crate) etag: Option<String>,
        pub(crate) heads: usize,
        pub(crate) gets: usize,
    }

    impl MockTransport {
        pub(crate) fn serving(body: &str, last_modified: Option<&str>) -> Self {
            let transport = MockTransport::default();
            transport.set(200, body, last_modified);
            transport
        }

        pub(crate) fn set(&self, status: u16, body: &str, last_modified: Option<&str>) {
            let mut state = self.state.lock();
            state.status = status;
            state.body = body.to_string();
            state.last_modified = last_modified.map(str::to_string);
        }
    }

    impl Transport for MockTransport {
        fn head(
            &self,
            _url: &str,
            if_modified_since: Option<&str>,
            _if_none_match: Option<&str>,
        ) -> Result<RemoteResponse> {
            let mut state = self.state.lock();
            state.heads += 1;
            let not_modified = state.status == 200
                && if_modified_since.is_some()
                && if_modified_since == state.last_modified.as_deref();
            Ok(RemoteResponse {
                status: if not_modified { 304 } else { state.status },
                last_modified: state.last_modified.clone(),
                etag: state.etag.clone(),
                body: None,
            })
        }

        fn get(&self, _url: &str) -> Result<RemoteResponse> {
            let mut state = self.state.lock();
            state.gets += 1;
            Ok(RemoteResponse {
                status: state.status,
                last_modified: state.last_modified.clone(),
                etag: state.etag.clone(),
                body: Some(state.body.clone()),
            })
        }
    }

    fn remote(transport: Arc<MockTransport>) -> RemoteSource {
        RemoteSource::new(
            "http://synonyms.example/rules.txt".to_string(),
            CompileOptions {
                expand: true,
                ..Default::default()
            },
            Arc::new(RuleDictionaryBuilder::new()),
            transport,
        )
    }

    #[test]
    fn test_validators_drive_change_detection() {
        let transport = Arc::new(MockTransport::serving("a,b", Some("Mon, 01 Jan 2024")));
        let source = remote(transport.clone());

        let dict = source.fetch_and_compile().unwrap();
        assert_eq!(dict.expand("a").len(), 2);
        assert!(!source.has_changed(Some(dict.fingerprint())).unwrap());

        transport.set(200, "a,b,c", Some("Tue, 02 Jan 2024"));
        assert!(source.has_changed(Some(dict.fingerprint())).unwrap());
        // Validators were enough; no body was fetched for the probe.
        assert_eq!(transport.state.lock().gets, 1);
    }

    #[test]
    fn test_not_found_is_error() {
        let transport = Arc::new(MockTransport::serving("a,b", Some("Mon, 01 Jan 2024")));
        let source = remote(transport.clone());
        let dict = source.fetch_and_compile().unwrap();

        transport.set(404, "", None);
        let err = source.has_changed(Some(dict.fingerprint())).unwrap_err();
        assert!(err.to_string().contains("Not found"));
        assert!(source.fetch_and_compile().is_err());
    }

    #[test]
    fn test_content_digest_without_validators() {
        let transport = Arc::new(MockTransport::serving("a,b", None));
        let source = remote(transport.clone());

        let dict = source.fetch_and_compile().unwrap();
        assert!(matches!(dict.fingerprint(), Fingerprint::Content(_)));
        assert!(!source.has_changed(Some(dict.fingerprint())).unwrap());

        transport.set(200, "a,b,c", None);
        assert!(source.has_changed(Some(dict.fingerprint())).unwrap());
    }

    #[test]
    fn test_server_error_status() {
        let transport = Arc::new(MockTransport::default());
        transport.set(503, "", None);
        let err = remote(transport).fetch_and_compile().unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
