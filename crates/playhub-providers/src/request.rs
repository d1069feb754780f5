//! Shared HTTP plumbing: hard per-request timeouts, bounded exponential
//! backoff for idempotent GETs, no retry on client or auth errors.

use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::ProviderError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

#[derive(Clone)]
pub(crate) struct HttpClient {
    http: reqwest::Client,
}

impl HttpClient {
    pub(crate) fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// GET returning the raw body. Transient failures (transport errors,
    /// timeouts, 5xx) are retried with exponential backoff; a 4xx is
    /// surfaced immediately so the caller can take the refresh path.
    pub(crate) async fn get_with_retry(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<String, ProviderError> {
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        let mut last_err = ProviderError::Timeout;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.get_once(url, headers.clone()).await {
                Ok(body) => return Ok(body),
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) => {
                    tracing::debug!(url, attempt, "GET failed, will retry: {e}");
                    last_err = e;
                }
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
            }
        }
        Err(last_err)
    }

    async fn get_once(&self, url: &str, headers: HeaderMap) -> Result<String, ProviderError> {
        let resp = self
            .http
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        let body = resp.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: truncate(&body),
            });
        }
        Ok(body)
    }

    /// Form POST used by token endpoints. Not retried: token exchange is
    /// one-shot, the caller decides what a failure means.
    pub(crate) async fn post_form(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<(u16, String), ProviderError> {
        let resp = self
            .http
            .post(url)
            .form(params)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(map_transport_error)?;
        Ok((status, body))
    }
}

fn is_retryable(err: &ProviderError) -> bool {
    match err {
        ProviderError::Timeout => true,
        ProviderError::Http(_) => true,
        ProviderError::ApiError { status, .. } => *status >= 500,
        _ => false,
    }
}

fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Http(e)
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 512;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(is_retryable(&ProviderError::Timeout));
        assert!(is_retryable(&ProviderError::ApiError {
            status: 503,
            message: String::new()
        }));
        assert!(!is_retryable(&ProviderError::ApiError {
            status: 401,
            message: String::new()
        }));
        assert!(!is_retryable(&ProviderError::ApiError {
            status: 404,
            message: String::new()
        }));
        assert!(!is_retryable(&ProviderError::AuthRequired));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let body = "é".repeat(600);
        let out = truncate(&body);
        assert!(out.len() <= 520);
        assert!(out.ends_with('…'));
    }
}
