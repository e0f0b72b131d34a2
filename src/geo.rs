/// Best-effort geolocation of proxy hosts.
///
/// Never errors: any failure degrades to a placeholder so one bad proxy
/// only affects its own field in the settings view.
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GeoConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyCountry {
    pub country: String,
    pub success: bool,
}

impl ProxyCountry {
    fn placeholder(text: &str) -> Self {
        Self {
            country: text.to_string(),
            success: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeoResponse {
    status: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeoLocator {
    client: reqwest::Client,
    endpoint: String,
}

impl GeoLocator {
    pub fn new(config: &GeoConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "geo: falling back to default http client");
                reqwest::Client::new()
            });
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve where `host` is. Only the host is looked up; the proxy itself
    /// is not dialled.
    pub async fn lookup(&self, host: &str) -> ProxyCountry {
        let host = host.trim();
        if host.is_empty() {
            return ProxyCountry::placeholder("No host provided");
        }

        let Some(url) = self.url_for(host) else {
            return ProxyCountry::placeholder("Proxy configured");
        };
        let result = self
            .client
            .get(url)
            .query(&[("fields", "status,country,countryCode,city,isp")])
            .send()
            .await;
        let resp = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!(host, status = %r.status(), "geo: lookup rejected");
                return ProxyCountry::placeholder("Proxy configured");
            }
            Err(e) => {
                tracing::warn!(host, error = %e, "geo: lookup failed");
                return ProxyCountry::placeholder("Proxy configured");
            }
        };

        match resp.json::<GeoResponse>().await {
            Ok(geo) => match format_country(&geo) {
                Some(country) => ProxyCountry {
                    country,
                    success: true,
                },
                None => ProxyCountry::placeholder("Proxy configured"),
            },
            Err(e) => {
                tracing::warn!(host, error = %e, "geo: unreadable response");
                ProxyCountry::placeholder("Proxy configured")
            }
        }
    }

    /// The endpoint with `host` appended as one escaped path segment.
    fn url_for(&self, host: &str) -> Option<reqwest::Url> {
        let mut url = match reqwest::Url::parse(&self.endpoint) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "geo: invalid endpoint");
                return None;
            }
        };
        match url.path_segments_mut() {
            Ok(mut segments) => {
                segments.pop_if_empty().push(host);
            }
            Err(()) => {
                tracing::warn!(endpoint = %self.endpoint, "geo: endpoint cannot take a path");
                return None;
            }
        }
        Some(url)
    }
}

/// `"CC - Country (City)"`, city omitted when unknown.
fn format_country(geo: &GeoResponse) -> Option<String> {
    if geo.status != "success" {
        return None;
    }
    let code = geo.country_code.as_deref().unwrap_or("??");
    let country = geo.country.as_deref()?;
    Some(match geo.city.as_deref().filter(|c| !c.is_empty()) {
        Some(city) => format!("{code} - {country} ({city})"),
        None => format!("{code} - {country}"),
    })
}
