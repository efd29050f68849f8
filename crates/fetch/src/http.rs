//! HTTP(S) fetcher backed by reqwest.

use futures_util::StreamExt;
use percent_encoding::percent_decode_str;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::{Client, Url};
use tracing::debug;

use crate::{FetchError, FetchFuture, FetchRequest, FetchedFile, Fetcher};

/// Downloads a URL into memory, enforcing the request's size cap while
/// streaming.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher with a default client.
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("parcel/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Creates a fetcher using an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: FetchRequest) -> FetchFuture {
        let client = self.client.clone();
        Box::pin(async move { download(&client, &request).await })
    }
}

async fn download(client: &Client, request: &FetchRequest) -> Result<FetchedFile, FetchError> {
    let url = Url::parse(&request.url)
        .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", request.url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }

    let response = client.get(url.clone()).send().await?.error_for_status()?;
    let limit = request.limit();

    if let (Some(limit), Some(len)) = (limit, response.content_length())
        && len > limit
    {
        return Err(FetchError::SizeExceeded { limit });
    }

    let name = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_file_name)
        .unwrap_or_else(|| url_file_name(&url));

    let mut content = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if let Some(limit) = limit
            && (content.len() + chunk.len()) as u64 > limit
        {
            return Err(FetchError::SizeExceeded { limit });
        }
        content.extend_from_slice(&chunk);
    }

    debug!(url = %url, name = %name, bytes = content.len(), "fetch complete");
    Ok(FetchedFile::new(name, content))
}

/// Extracts the file name from a `Content-Disposition` value.
///
/// `filename*` (RFC 5987) wins over `filename`.
fn disposition_file_name(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';').map(str::trim) {
        let Some((key, val)) = part.split_once('=') else {
            continue;
        };
        let val = val.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = val.split_once("''").map_or(val, |(_, rest)| rest);
                let decoded = percent_decode_str(encoded).decode_utf8_lossy();
                if !decoded.is_empty() {
                    return Some(decoded.into_owned());
                }
            }
            "filename" if !val.is_empty() => plain = Some(val.to_string()),
            _ => {}
        }
    }
    plain
}

/// Derives a file name from the last URL path segment, falling back to the
/// host name.
fn url_file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .or_else(|| url.host_str().map(|host| format!("{host}.html")))
        .unwrap_or_else(|| "file".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(url: String, max_size: u64) -> FetchRequest {
        FetchRequest {
            url,
            max_size,
            privileged: false,
        }
    }

    #[test]
    fn name_from_url_path() {
        let url = Url::parse("https://example.org/files/My%20Video.mp4?x=1").unwrap();
        assert_eq!(url_file_name(&url), "My Video.mp4");
    }

    #[test]
    fn name_falls_back_to_host() {
        let url = Url::parse("https://fsf.org/").unwrap();
        assert_eq!(url_file_name(&url), "fsf.org.html");
    }

    #[test]
    fn disposition_names() {
        assert_eq!(
            disposition_file_name(r#"attachment; filename="report.pdf""#).as_deref(),
            Some("report.pdf")
        );
        assert_eq!(
            disposition_file_name("attachment; filename=a.txt; filename*=UTF-8''caf%C3%A9.txt")
                .as_deref(),
            Some("café.txt")
        );
        assert_eq!(disposition_file_name("inline"), None);
    }

    #[tokio::test]
    async fn fetches_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/archive.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 64]))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let file = fetcher
            .fetch(request(format!("{}/data/archive.zip", server.uri()), 1024))
            .await
            .unwrap();
        assert_eq!(file.name, "archive.zip");
        assert_eq!(file.size, 64);
        assert_eq!(file.content, vec![1u8; 64]);
    }

    #[tokio::test]
    async fn uses_content_disposition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Disposition", "attachment; filename=\"song.ogg\"")
                    .set_body_bytes(b"ogg".to_vec()),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let file = fetcher
            .fetch(request(format!("{}/download", server.uri()), 1024))
            .await
            .unwrap();
        assert_eq!(file.name, "song.ogg");
    }

    #[tokio::test]
    async fn rejects_oversized_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let result = fetcher
            .fetch(request(format!("{}/big.bin", server.uri()), 1024))
            .await;
        assert!(matches!(result, Err(FetchError::SizeExceeded { limit: 1024 })));
    }

    #[tokio::test]
    async fn privileged_bypasses_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let mut req = request(format!("{}/big.bin", server.uri()), 1024);
        req.privileged = true;
        let file = fetcher.fetch(req).await.unwrap();
        assert_eq!(file.size, 2048);
    }

    #[tokio::test]
    async fn http_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let result = fetcher
            .fetch(request(format!("{}/missing", server.uri()), 1024))
            .await;
        assert!(matches!(result, Err(FetchError::Http(_))));
    }

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let fetcher = HttpFetcher::new().unwrap();
        let result = fetcher
            .fetch(request("ftp://example.org/a".into(), 1024))
            .await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }
}
