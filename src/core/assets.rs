//! Study image lookup used by the image viewer.

use std::time::Duration;

use thiserror::Error;

use crate::api::ImageUrlResponse;
use crate::utils::url::construct_resource_url;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("invalid image URL endpoint for patient {0}")]
    InvalidUrl(String),
    #[error("image URL request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("image service responded with status {0}")]
    Status(u16),
}

pub struct AssetClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl AssetClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Signed URL of the patient's latest study image.
    pub async fn image_url(&self, patient_id: &str) -> Result<String, AssetError> {
        let url = construct_resource_url(&self.base_url, "image-url", patient_id)
            .ok_or_else(|| AssetError::InvalidUrl(patient_id.to_string()))?;
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        if !response.status().is_success() {
            return Err(AssetError::Status(response.status().as_u16()));
        }
        let body: ImageUrlResponse = response.json().await?;
        Ok(body.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.expect("write");
        });
        format!("http://{addr}")
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("client")
    }

    #[tokio::test]
    async fn returns_url_field() {
        let base = serve_once("200 OK", r#"{"url":"https://images.example/x.png"}"#).await;
        let assets = AssetClient::new(client(), base, Duration::from_secs(2));
        let url = assets.image_url("p-1").await.expect("url");
        assert_eq!(url, "https://images.example/x.png");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let base = serve_once("404 Not Found", r#"{"detail":"no image"}"#).await;
        let assets = AssetClient::new(client(), base, Duration::from_secs(2));
        assert!(matches!(
            assets.image_url("p-1").await,
            Err(AssetError::Status(404))
        ));
    }
}
