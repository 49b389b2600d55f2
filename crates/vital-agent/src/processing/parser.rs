use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::config::ParsingConfig;
use crate::error::ParseError;
use crate::processing::language::detect_language;
use crate::types::{DocumentFormat, Language, ParsedDocument};

/// The cloud document-parsing service boundary. Behind a trait so tests and
/// alternate deployments can swap the backend.
#[async_trait]
pub trait ParsingService: Send + Sync {
    /// Extract structured text from raw document bytes. One attempt — retry
    /// policy belongs to the caller, not this component.
    async fn parse(&self, bytes: &[u8], format: DocumentFormat) -> Result<String, ParseError>;
}

/// JSON-over-HTTP client for the hosted parsing service.
pub struct RemoteParsingService {
    client: Client,
    endpoint: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ParseResponse {
    text: String,
}

#[derive(Deserialize)]
struct ParseErrorResponse {
    message: Option<String>,
}

impl RemoteParsingService {
    pub fn new(config: &ParsingConfig) -> Result<Self, ParseError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ParseError::ServiceUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ParsingService for RemoteParsingService {
    async fn parse(&self, bytes: &[u8], format: DocumentFormat) -> Result<String, ParseError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("format", format.label())])
            .header("x-api-key", &self.api_key)
            .header("content-type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ParseError::ServiceUnavailable(format!("request timed out: {}", e))
                } else {
                    ParseError::ServiceUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ParseErrorResponse>()
                .await
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return if status.is_client_error() {
                Err(ParseError::Rejected(detail))
            } else {
                Err(ParseError::ServiceUnavailable(detail))
            };
        }

        let parsed: ParseResponse = response
            .json()
            .await
            .map_err(|e| ParseError::InvalidResponse(e.to_string()))?;
        Ok(parsed.text)
    }
}

/// Normalizes a file path, reads the document, parses it through the
/// service, and detects its language.
pub struct DocumentPreprocessor {
    service: std::sync::Arc<dyn ParsingService>,
    ambiguous_default: Language,
}

impl DocumentPreprocessor {
    pub fn new(
        service: std::sync::Arc<dyn ParsingService>,
        ambiguous_default: Language,
    ) -> Self {
        Self { service, ambiguous_default }
    }

    /// Parse one document. Fails with [`ParseError`] and is never retried
    /// here; a failed document can be re-submitted wholesale by the caller.
    pub async fn parse(&self, file_path: &Path) -> Result<ParsedDocument, ParseError> {
        // Canonical absolute form: the same file reached via different
        // relative paths must produce the same document identity.
        let canonical = file_path
            .canonicalize()
            .map_err(|_| ParseError::NotFound(file_path.to_path_buf()))?;

        let extension = canonical
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        let format = DocumentFormat::from_extension(&extension)
            .ok_or(ParseError::UnsupportedFormat(extension))?;

        let bytes = std::fs::read(&canonical)
            .map_err(|source| ParseError::Io { path: canonical.clone(), source })?;

        let text = self.service.parse(&bytes, format).await?;
        let language = detect_language(&text, self.ambiguous_default);

        tracing::info!(
            path = %canonical.display(),
            format = ?format,
            language = ?language,
            chars = text.chars().count(),
            "document parsed"
        );

        Ok(ParsedDocument { path: canonical, format, language, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    struct FixedParser(&'static str);

    #[async_trait]
    impl ParsingService for FixedParser {
        async fn parse(&self, _bytes: &[u8], _format: DocumentFormat) -> Result<String, ParseError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingParser;

    #[async_trait]
    impl ParsingService for FailingParser {
        async fn parse(&self, _bytes: &[u8], _format: DocumentFormat) -> Result<String, ParseError> {
            Err(ParseError::ServiceUnavailable("upstream 503".into()))
        }
    }

    fn temp_doc(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn parses_and_detects_language() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_doc(&dir, "guide.txt", "placeholder");
        let pre = DocumentPreprocessor::new(
            Arc::new(FixedParser("高血压患者应注意低盐饮食。")),
            Language::Chinese,
        );

        let doc = pre.parse(&path).await.unwrap();
        assert_eq!(doc.language, Language::Chinese);
        assert_eq!(doc.format, DocumentFormat::Text);
        assert!(doc.path.is_absolute());
    }

    #[tokio::test]
    async fn relative_and_absolute_paths_share_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_doc(&dir, "same.txt", "x");
        let pre = DocumentPreprocessor::new(Arc::new(FixedParser("body text")), Language::Chinese);

        let via_absolute = pre.parse(&path).await.unwrap();
        let dotted = dir.path().join(".").join("same.txt");
        let via_dotted = pre.parse(&dotted).await.unwrap();
        assert_eq!(via_absolute.path, via_dotted.path);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let pre = DocumentPreprocessor::new(Arc::new(FixedParser("")), Language::Chinese);
        let err = pre.parse(Path::new("/no/such/file.pdf")).await.unwrap_err();
        assert!(matches!(err, ParseError::NotFound(_)));
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_doc(&dir, "binary.exe", "MZ");
        let pre = DocumentPreprocessor::new(Arc::new(FixedParser("")), Language::Chinese);
        let err = pre.parse(&path).await.unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn service_failure_surfaces_unretried() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_doc(&dir, "doc.pdf", "%PDF-1.4");
        let pre = DocumentPreprocessor::new(Arc::new(FailingParser), Language::Chinese);
        let err = pre.parse(&path).await.unwrap_err();
        assert!(matches!(err, ParseError::ServiceUnavailable(_)));
    }
}
