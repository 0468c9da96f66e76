use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

#[async_trait]
pub trait CalendarFeedClient: Send + Sync {
    async fn fetch_feed(&self, calendar_url: &str) -> Result<String, InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestCalendarFeedClient {
    client: Client,
}

impl ReqwestCalendarFeedClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Parses the configured URL; `webcal://` subscriptions are fetched over https.
    pub fn feed_url(calendar_url: &str) -> Result<Url, InfraError> {
        let trimmed = calendar_url.trim();
        if trimmed.is_empty() {
            return Err(InfraError::Fetch("calendar url must not be empty".to_string()));
        }
        let url = Url::parse(trimmed)
            .map_err(|error| InfraError::Fetch(format!("invalid calendar url '{trimmed}': {error}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            "webcal" | "webcals" => {
                let rest = &trimmed[url.scheme().len()..];
                Url::parse(&format!("https{rest}")).map_err(|error| {
                    InfraError::Fetch(format!("invalid calendar url '{trimmed}': {error}"))
                })
            }
            other => Err(InfraError::Fetch(format!(
                "unsupported calendar url scheme '{other}'"
            ))),
        }
    }

    fn http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("calendar server error: http {}", status.as_u16())
        } else {
            format!("calendar server error: http {}; body={body}", status.as_u16())
        };
        InfraError::Fetch(message)
    }
}

#[async_trait]
impl CalendarFeedClient for ReqwestCalendarFeedClient {
    async fn fetch_feed(&self, calendar_url: &str) -> Result<String, InfraError> {
        let url = Self::feed_url(calendar_url)?;
        tracing::debug!(%url, "fetching calendar feed");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| InfraError::Fetch(format!("network error while fetching calendar feed: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Fetch(format!("failed reading calendar feed response: {error}")))?;

        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind local listener");
        let address = listener.local_addr().expect("local address");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept connection");
            let mut request = vec![0_u8; 4096];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: text/calendar\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            let _ = socket.shutdown().await;
        });
        format!("http://{address}/calendar.ics")
    }

    #[tokio::test]
    async fn fetch_feed_returns_body_on_success() {
        let url = serve_once("200 OK", "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n").await;
        let client = ReqwestCalendarFeedClient::new();

        let body = client.fetch_feed(&url).await.expect("fetch succeeds");
        assert_eq!(body, "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n");
    }

    #[tokio::test]
    async fn fetch_feed_reports_http_status_and_body() {
        let url = serve_once("404 Not Found", "no such calendar").await;
        let client = ReqwestCalendarFeedClient::new();

        let error = client.fetch_feed(&url).await.expect_err("fetch fails");
        let message = error.to_string();
        assert!(matches!(error, InfraError::Fetch(_)));
        assert!(message.contains("http 404"), "{message}");
        assert!(message.contains("no such calendar"), "{message}");
    }

    #[tokio::test]
    async fn fetch_feed_reports_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind local listener");
        let address = listener.local_addr().expect("local address");
        drop(listener);

        let client = ReqwestCalendarFeedClient::new();
        let error = client
            .fetch_feed(&format!("http://{address}/calendar.ics"))
            .await
            .expect_err("fetch fails");
        assert!(error.to_string().contains("network error"));
    }

    #[test]
    fn webcal_urls_are_fetched_over_https() {
        let url = ReqwestCalendarFeedClient::feed_url("webcal://example.com/team.ics")
            .expect("valid url");
        assert_eq!(url.as_str(), "https://example.com/team.ics");
    }

    #[test]
    fn rejects_empty_and_unsupported_urls() {
        assert!(ReqwestCalendarFeedClient::feed_url("   ").is_err());
        assert!(ReqwestCalendarFeedClient::feed_url("not a url").is_err());
        assert!(ReqwestCalendarFeedClient::feed_url("ftp://example.com/a.ics").is_err());
    }
}
