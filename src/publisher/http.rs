use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tokio::time::timeout;
use tracing::info;

use super::{CrlPublication, CrlPublisher, PublishError};

pub const CRL_CONTENT_TYPE: &str = "application/pkix-crl";

/// POSTs every CRL to a remote endpoint such as an OCSP responder's CRL intake.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: Client,
    url: Url,
    request_timeout: Duration,
}

impl HttpPublisher {
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, PublishError> {
        let url = Url::parse(url).map_err(|e| PublishError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self {
            client: Client::new(),
            url,
            request_timeout,
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl CrlPublisher for HttpPublisher {
    fn name(&self) -> &str {
        "http"
    }

    async fn publish(&self, publication: &CrlPublication) -> Result<(), PublishError> {
        let request = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, CRL_CONTENT_TYPE)
            .header("X-CRL-Issuing-Point", publication.issuing_point.as_str())
            .header("X-CRL-Number", publication.crl_number.to_string())
            .header("X-CRL-Delta", publication.is_delta.to_string())
            .body(publication.der.clone());

        let response = match timeout(self.request_timeout, request.send()).await {
            Ok(result) => result?,
            Err(_) => return Err(PublishError::Timeout),
        };

        if !response.status().is_success() {
            return Err(PublishError::Rejected(response.status().as_u16()));
        }

        info!(
            issuing_point = %publication.issuing_point,
            crl_number = %publication.crl_number,
            "Published CRL to {}",
            self.url
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;
    use x509_parser::num_bigint::BigUint;

    fn publication() -> CrlPublication {
        CrlPublication {
            issuing_point: "MasterCRL".to_string(),
            der: vec![0x30, 0x03, 0x02, 0x01, 0x07],
            is_delta: false,
            crl_number: BigUint::from(7u8),
            this_update: time::macros::datetime!(2024-06-17 12:00 UTC),
        }
    }

    /// Reads one request, headers and body, and returns it as text plus body bytes.
    async fn read_request(stream: &mut TcpStream) -> (String, Vec<u8>) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before the request was complete");
            buf.extend_from_slice(&chunk[..n]);

            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .map(|value| value.trim().parse::<usize>().unwrap())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return (head, buf[end + 4..end + 4 + length].to_vec());
            }
        }
    }

    /// Answers a single request with `status` and hands back what was received.
    async fn respond_once(status: &'static str) -> (String, JoinHandle<(String, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/crl", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let response =
                format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            request
        });
        (url, handle)
    }

    #[test]
    fn test_rejects_invalid_url() {
        let result = HttpPublisher::new("not a url", Duration::from_secs(1));
        assert!(matches!(result, Err(PublishError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_posts_der_with_crl_headers() {
        let (url, server) = respond_once("200 OK").await;
        let publisher = HttpPublisher::new(&url, Duration::from_secs(5)).unwrap();
        assert_eq!(publisher.name(), "http");

        publisher.publish(&publication()).await.unwrap();

        let (head, body) = server.await.unwrap();
        assert!(head.starts_with("post /crl"));
        assert!(head.contains("content-type: application/pkix-crl"));
        assert!(head.contains("x-crl-issuing-point: mastercrl"));
        assert!(head.contains("x-crl-number: 7"));
        assert!(head.contains("x-crl-delta: false"));
        assert_eq!(body, publication().der);
    }

    #[tokio::test]
    async fn test_error_status_is_rejected() {
        let (url, server) = respond_once("503 Service Unavailable").await;
        let publisher = HttpPublisher::new(&url, Duration::from_secs(5)).unwrap();

        let result = publisher.publish(&publication()).await;
        assert!(matches!(result, Err(PublishError::Rejected(503))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/crl", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            // hold the connection open without answering
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let publisher = HttpPublisher::new(&url, Duration::from_millis(100)).unwrap();
        let result = publisher.publish(&publication()).await;
        assert!(matches!(result, Err(PublishError::Timeout)));
        server.abort();
    }
}
