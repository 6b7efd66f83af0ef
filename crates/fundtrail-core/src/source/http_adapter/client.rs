use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::StatusCode;
use tracing::{debug, trace};

use crate::error::{CoreError, SourceError};
use crate::types::{Address, AddressActivity, AddressSnapshot};

use super::super::AddressSource;
use super::connection::parse_connection;
use super::parsing::{parse_address_activity, parse_address_history};

/// Longest error body kept in a [`SourceError::Status`].
const ERROR_BODY_CAP: usize = 512;

/// Separator the `multiaddr` endpoint expects between addresses.
const MULTIADDR_SEPARATOR: &str = "|";

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Explorer client over HTTP(S) for the `rawaddr` and `multiaddr`
/// endpoints.
///
/// Each method performs exactly one request. HTTP 429 is reported as
/// [`SourceError::Throttled`]; wrap the client in a
/// [`RateLimitedSource`](crate::source::RateLimitedSource) for pacing and
/// retries.
pub struct HttpAddressSource {
    client: reqwest::Client,
    base_url: String,
    limiter: Option<DirectRateLimiter>,
}

impl HttpAddressSource {
    /// Create a client for `base_url` (`http://...` or `https://...`).
    ///
    /// If `requests_per_second` is set, outbound requests are additionally
    /// held to that rate, independently of the pacing wrapper.
    pub fn new(base_url: &str, requests_per_second: Option<u32>) -> Result<Self, CoreError> {
        let base_url = parse_connection(base_url)?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("fundtrail/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoreError::InvalidConfig(format!("build HTTP client: {e}")))?;

        let limiter = match requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::InvalidConfig("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self {
            client,
            base_url,
            limiter,
        })
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String, SourceError> {
        self.wait_for_rate_limit().await;
        let url = format!("{}/{path}", self.base_url);
        debug!(http.url = %url, http.query = ?query, "explorer request");

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            debug!(http.url = %url, %status, "explorer throttled request");
            return Err(SourceError::Throttled);
        }

        let body = response.text().await?;
        debug!(http.url = %url, %status, body_len = body.len(), "explorer response");
        trace!(http.url = %url, body = %body, "explorer response body");

        if !status.is_success() {
            let mut body = body;
            if body.len() > ERROR_BODY_CAP {
                let mut cut = ERROR_BODY_CAP;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl AddressSource for HttpAddressSource {
    async fn address_history(
        &self,
        address: &Address,
        limit: usize,
    ) -> Result<AddressSnapshot, SourceError> {
        let body = self
            .get(
                &format!("rawaddr/{address}"),
                &[("limit", limit.to_string())],
            )
            .await?;
        parse_address_history(address, &body)
    }

    async fn address_activity(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<AddressActivity>, SourceError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let active = addresses
            .iter()
            .map(Address::as_str)
            .collect::<Vec<_>>()
            .join(MULTIADDR_SEPARATOR);
        let body = self.get("multiaddr", &[("active", active)]).await?;
        parse_address_activity(addresses, &body)
    }
}
