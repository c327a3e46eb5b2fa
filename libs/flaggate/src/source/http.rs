use super::{FetchOutcome, FlagSource, RegistryDocument, SourceError};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, StatusCode, header};
use http_body_util::{BodyExt, Empty, Limited};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};
use url::Url;

/// Default cap on the registry document size
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Native roots are loaded once per process
static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

/// Registry reached over HTTP(S).
///
/// Sends `GET <endpoint>?since=<version>` with `If-None-Match: "<version>"`
/// once a version is known; `304 Not Modified` maps to
/// [`FetchOutcome::NotModified`].
pub struct HttpFlagSource {
    endpoint: Url,
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
    max_body_size: usize,
}

impl std::fmt::Debug for HttpFlagSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFlagSource")
            .field("endpoint", &self.endpoint.as_str())
            .field("max_body_size", &self.max_body_size)
            .finish_non_exhaustive()
    }
}

impl HttpFlagSource {
    /// Create a source for `endpoint`
    ///
    /// # Errors
    /// Returns `SourceError::Transport` if the endpoint is not a valid URL or
    /// TLS cannot be configured.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SourceError> {
        let endpoint = endpoint.into();
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| SourceError::Transport(format!("invalid endpoint '{endpoint}': {e}")))?;

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_client_config()?)
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            endpoint,
            client,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        })
    }

    #[must_use]
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request_url(&self, since: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        if let Some(version) = since {
            url.query_pairs_mut().append_pair("since", version);
        }
        url
    }
}

#[async_trait]
impl FlagSource for HttpFlagSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch_flags(&self, since: Option<&str>) -> Result<FetchOutcome, SourceError> {
        let mut request = Request::builder()
            .method(Method::GET)
            .uri(self.request_url(since).as_str())
            .header(header::ACCEPT, "application/json");
        if let Some(version) = since {
            request = request.header(header::IF_NONE_MATCH, format!("\"{version}\""));
        }
        let request = request
            .body(Empty::<Bytes>::new())
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body = Limited::new(response.into_body(), self.max_body_size)
            .collect()
            .await
            .map_err(|e| SourceError::Transport(format!("failed to read body: {e}")))?
            .to_bytes();

        let document = RegistryDocument::from_slice(&body)?;
        if since == Some(document.version.as_str()) {
            return Ok(FetchOutcome::NotModified);
        }
        Ok(document.into_outcome())
    }
}

fn native_roots() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(|| {
        let result = rustls_native_certs::load_native_certs();
        for err in &result.errors {
            tracing::warn!(error = %err, "error loading native root certificate");
        }
        if result.certs.is_empty() {
            tracing::warn!("no native root CA certificates found; HTTPS registries will fail");
        }
        result.certs
    })
}

/// TLS client config over the OS trust store.
///
/// An empty trust store is not an error here: plain HTTP registries keep working.
fn tls_client_config() -> Result<rustls::ClientConfig, SourceError> {
    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native_roots().iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }

    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| SourceError::Transport(format!("failed to set TLS protocol versions: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(config)
}
