//! HTTP section source for the statute API.

use std::time::Duration;

use async_trait::async_trait;
use citeguard_core::{CodeId, FetchOutcome, SectionPayload, SectionSource, SourceError};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<SyncError> for SourceError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Http(e) => SourceError::transport(e),
            SyncError::Server { status, body } => SourceError::Status { status, body },
            SyncError::Json(e) => SourceError::Decode(e.to_string()),
        }
    }
}

/// Client for `GET {base}/codes/{code}/sections/{section}`.
pub struct HttpSectionSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSectionSource {
    /// Create a source for the given API base URL.
    ///
    /// `base_url` should be like `http://localhost:8000`; a trailing slash is trimmed.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Same as [`new`](Self::new) with a per-request timeout on the client.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn section_url(&self, code: CodeId, section: &str) -> String {
        format!(
            "{}/codes/{}/sections/{}",
            self.base_url,
            code.abbreviation(),
            section
        )
    }

    /// Fetch one section. 404 means the section does not exist.
    pub async fn get_section(
        &self,
        code: CodeId,
        section: &str,
    ) -> Result<FetchOutcome, SyncError> {
        let url = self.section_url(code, section);

        debug!(url = %url, "fetching section");
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            info!(code = %code, section, "section not found upstream");
            return Ok(FetchOutcome::NotFound);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await?;
        let payload: SectionPayload = serde_json::from_str(&text)?;
        debug!(
            code = %payload.code,
            section = %payload.section,
            content_len = payload.content.len(),
            "section fetched"
        );
        Ok(FetchOutcome::Found(payload))
    }
}

#[async_trait]
impl SectionSource for HttpSectionSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_section(
        &self,
        code: CodeId,
        section: &str,
    ) -> Result<FetchOutcome, SourceError> {
        Ok(self.get_section(code, section).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve a single canned response; the handle yields the request line.
    async fn serve_once(status: u16, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = sock.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();

            let reason = match status {
                200 => "OK",
                404 => "Not Found",
                _ => "Internal Server Error",
            };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\n\
                 content-type: application/json\r\n\
                 content-length: {}\r\n\
                 connection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            sock.shutdown().await.ok();
            request.lines().next().unwrap_or_default().to_string()
        });
        (format!("http://{addr}/"), handle)
    }

    const PEN_187: &str = r#"{
        "code": "PEN",
        "section": "187",
        "content": "Murder is the unlawful killing of a human being, or a fetus, with malice aforethought.",
        "legislative_history": "Amended by Stats. 1996, Ch. 598, Sec. 1.",
        "url": "https://leginfo.legislature.ca.gov/faces/codes_displaySection.xhtml?sectionNum=187.&lawCode=PEN",
        "division": null,
        "part": "1",
        "chapter": "1",
        "article": null
    }"#;

    #[test]
    fn trailing_slash_trimmed() {
        let source = HttpSectionSource::new("http://localhost:8000/");
        assert_eq!(source.base_url(), "http://localhost:8000");
        assert_eq!(
            source.section_url(CodeId::Ccp, "1234.5"),
            "http://localhost:8000/codes/CCP/sections/1234.5"
        );
    }

    #[tokio::test]
    async fn ok_response_is_found() {
        let (base, server) = serve_once(200, PEN_187).await;
        let source = HttpSectionSource::new(&base);

        let payload = match source.fetch_section(CodeId::Pen, "187").await.unwrap() {
            FetchOutcome::Found(payload) => payload,
            other => panic!("expected Found, got {other:?}"),
        };
        assert_eq!(payload.code, "PEN");
        assert_eq!(payload.part.as_deref(), Some("1"));
        assert!(!payload.is_multi_version);

        let request_line = server.await.unwrap();
        assert_eq!(request_line, "GET /codes/PEN/sections/187 HTTP/1.1");
    }

    #[tokio::test]
    async fn not_found_response() {
        let (base, _server) = serve_once(404, r#"{"detail": "Section not found"}"#).await;
        let source = HttpSectionSource::new(&base);
        let outcome = source.fetch_section(CodeId::Evid, "9999").await.unwrap();
        assert_eq!(outcome, FetchOutcome::NotFound);
    }

    #[tokio::test]
    async fn server_error_is_status_error() {
        let (base, _server) = serve_once(500, "database unavailable").await;
        let source = HttpSectionSource::new(&base);

        let err = source.get_section(CodeId::Pen, "187").await.unwrap_err();
        assert!(matches!(err, SyncError::Server { status: 500, .. }));

        let err = SourceError::from(err);
        assert!(matches!(
            err,
            SourceError::Status { status: 500, ref body } if body == "database unavailable"
        ));
    }

    #[tokio::test]
    async fn mismatched_code_is_passed_through() {
        let body = r#"{"code": "FAM", "section": "187", "content": "Something else."}"#;
        let (base, _server) = serve_once(200, body).await;
        let source = HttpSectionSource::new(&base);
        match source.fetch_section(CodeId::Pen, "187").await.unwrap() {
            FetchOutcome::Found(payload) => assert_eq!(payload.code, "FAM"),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let (base, _server) = serve_once(200, "not json").await;
        let source = HttpSectionSource::new(&base);
        let err = source.fetch_section(CodeId::Pen, "187").await.unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source =
            HttpSectionSource::with_timeout(&format!("http://{addr}"), Duration::from_secs(2))
                .unwrap();
        let err = source.fetch_section(CodeId::Pen, "187").await.unwrap_err();
        assert!(matches!(err, SourceError::Transport(_)));
    }
}
