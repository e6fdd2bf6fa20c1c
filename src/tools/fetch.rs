//! Page scraping: fetch each search hit and keep the text of its `<p>` elements.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use serde::Serialize;

use crate::core::config::settings::FetchSettings;
use crate::core::errors::RagError;

const MAX_REDIRECTS: usize = 5;

/// Paragraph text scraped from one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageContent {
    pub url: String,
    pub paragraphs: Vec<String>,
}

impl PageContent {
    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// One entry per input URL, in input order. Pages that could not be
    /// fetched come back with no paragraphs.
    async fn fetch_all(&self, urls: &[String]) -> Vec<PageContent>;
}

pub struct HttpPageFetcher {
    client: Client,
    settings: FetchSettings,
    denylist: Vec<String>,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl HttpPageFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, RagError> {
        // Redirects are followed by hand so every hop is validated.
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .redirect(Policy::none())
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(settings.timeout_secs.min(30)))
            .build()
            .map_err(RagError::internal)?;

        let limiter = Quota::with_period(Duration::from_millis(settings.interval_ms))
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));

        Ok(Self {
            client,
            denylist: effective_denylist(&settings),
            settings,
            limiter,
        })
    }

    pub async fn fetch_page(&self, url: &str) -> Result<PageContent, RagError> {
        let mut target = Url::parse(url)
            .map_err(|err| RagError::BadRequest(format!("Invalid URL {}: {}", url, err)))?;

        let mut hops = 0;
        let response = loop {
            validate_fetch_target(&target, &self.denylist, self.settings.block_private_hosts)
                .await?;

            let response = self
                .client
                .get(target.clone())
                .send()
                .await
                .map_err(RagError::upstream)?;
            if !response.status().is_redirection() {
                break response;
            }

            hops += 1;
            if hops > MAX_REDIRECTS {
                return Err(RagError::Upstream(format!("Too many redirects from {}", url)));
            }
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| {
                    RagError::Upstream(format!("Redirect from {} without a location", target))
                })?;
            let next = target
                .join(location)
                .map_err(|err| RagError::Upstream(format!("Bad redirect {}: {}", location, err)))?;
            tracing::debug!("Following redirect {} -> {}", target, next);
            target = next;
        };

        if !response.status().is_success() {
            return Err(RagError::Upstream(format!(
                "Fetch of {} failed: {}",
                url,
                response.status()
            )));
        }

        let max_bytes = self.settings.max_bytes;
        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(RagError::upstream)?;
            if bytes.len().saturating_add(chunk.len()) > max_bytes {
                tracing::debug!("Truncating {} at {} bytes", url, max_bytes);
                let room = max_bytes.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..room.min(chunk.len())]);
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        let html = String::from_utf8_lossy(&bytes);
        Ok(PageContent {
            url: url.to_string(),
            paragraphs: extract_paragraphs(&html),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_all(&self, urls: &[String]) -> Vec<PageContent> {
        let mut pages = Vec::with_capacity(urls.len());
        for url in urls {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let page = match self.fetch_page(url).await {
                Ok(page) => {
                    tracing::debug!("Scraped {} paragraphs from {}", page.paragraphs.len(), url);
                    page
                }
                Err(err) => {
                    tracing::warn!("Error fetching {}: {}", url, err);
                    PageContent {
                        url: url.clone(),
                        paragraphs: Vec::new(),
                    }
                }
            };
            pages.push(page);
        }
        pages
    }
}

/// Text of every `<p>` element, whitespace-normalized, empty ones dropped.
pub fn extract_paragraphs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("p") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .map(|element| {
            element
                .text()
                .map(str::trim)
                .filter(|piece| !piece.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|text| !text.is_empty())
        .collect()
}

/// The denylist always applies; address checks only with `block_private`.
async fn validate_fetch_target(
    parsed: &Url,
    denylist: &[String],
    block_private: bool,
) -> Result<(), RagError> {
    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(RagError::BadRequest(
            "Only http/https URLs are supported".to_string(),
        ));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| RagError::BadRequest("URL host is missing".to_string()))?;

    if is_denied_host(host, denylist) {
        return Err(RagError::Forbidden(format!("host {} is not allowed", host)));
    }
    if !block_private {
        return Ok(());
    }

    let bare_host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare_host.parse::<IpAddr>() {
        return ensure_public_ip(ip);
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let mut has_resolution = false;
    let addresses = tokio::net::lookup_host((host, port))
        .await
        .map_err(RagError::upstream)?;
    for address in addresses {
        has_resolution = true;
        ensure_public_ip(address.ip())?;
    }
    if !has_resolution {
        return Err(RagError::BadRequest(
            "URL host could not be resolved".to_string(),
        ));
    }

    Ok(())
}

fn is_denied_host(host: &str, denylist: &[String]) -> bool {
    let bare_host = host.trim_start_matches('[').trim_end_matches(']');
    denylist
        .iter()
        .any(|pattern| host_matches_pattern(bare_host, pattern))
}

fn ensure_public_ip(ip: IpAddr) -> Result<(), RagError> {
    if is_blocked_ip(ip) {
        return Err(RagError::Forbidden(format!("address {} is not public", ip)));
    }
    Ok(())
}

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_multicast()
        || (octets[0] == 100 && (64..=127).contains(&octets[1]))
        || octets[0] == 0
        || (octets[0] & 0b1111_0000) == 0b1111_0000
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(mapped);
    }

    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || ip.is_unique_local()
        || ip.is_unicast_link_local()
}

fn effective_denylist(settings: &FetchSettings) -> Vec<String> {
    if !settings.url_denylist.is_empty() {
        return settings.url_denylist.clone();
    }

    ["localhost", "*.localhost", "*.local", "*.internal"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn host_matches_pattern(host: &str, pattern: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();

    if pattern.contains('*') {
        if pattern.starts_with('*') {
            let suffix = pattern.trim_start_matches('*');
            return host.ends_with(suffix);
        }
        let prefix = pattern.trim_end_matches('*');
        return host.starts_with(prefix);
    }
    host == pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_paragraph_text_only() {
        let html = r#"
            <html>
            <head><title>Title</title><script>var x = 1;</script></head>
            <body>
                <h1>Heading</h1>
                <p>First   paragraph.</p>
                <div><p>Second <b>bold</b> paragraph.</p></div>
                <p>   </p>
                <p>
                    Third
                </p>
            </body>
            </html>
        "#;

        let paragraphs = extract_paragraphs(html);
        assert_eq!(
            paragraphs,
            vec![
                "First   paragraph.".to_string(),
                "Second bold paragraph.".to_string(),
                "Third".to_string(),
            ]
        );
    }

    #[test]
    fn page_without_paragraphs_is_empty() {
        assert!(extract_paragraphs("<html><body><div>no p here</div></body></html>").is_empty());
        assert!(extract_paragraphs("").is_empty());
    }

    #[test]
    fn blocks_private_and_loopback_ipv4() {
        assert!(is_blocked_ip(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
        assert!(is_blocked_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));
        assert!(is_blocked_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
        assert!(is_blocked_ip(IpAddr::V4(Ipv4Addr::new(100, 64, 0, 1))));
    }

    #[test]
    fn allows_public_addresses() {
        assert!(!is_blocked_ip(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
        assert!(!is_blocked_ip(IpAddr::V6(
            "2606:4700::1111".parse().expect("valid IPv6")
        )));
    }

    #[test]
    fn blocks_private_ipv6_ranges() {
        assert!(is_blocked_ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_blocked_ip(IpAddr::V6(
            "fc00::1".parse().expect("valid IPv6")
        )));
        assert!(is_blocked_ip(IpAddr::V6(
            "::ffff:192.168.0.1".parse().expect("valid IPv6")
        )));
    }

    #[test]
    fn denylist_matches_wildcards() {
        let denylist = effective_denylist(&FetchSettings::default());
        assert!(is_denied_host("localhost", &denylist));
        assert!(is_denied_host("api.localhost", &denylist));
        assert!(is_denied_host("printer.local", &denylist));
        assert!(!is_denied_host("example.com", &denylist));
        assert!(is_denied_host("[::1]", &["::1".to_string()]));
        assert!(host_matches_pattern("192.168.1.10", "192.168.*"));
    }

    /// Serves canned responses keyed by request path on a loopback port.
    async fn serve(routes: Vec<(&'static str, String)>) -> std::net::SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&request);
                let path = request.split_whitespace().nth(1).unwrap_or("/");
                let response = routes
                    .iter()
                    .find(|(route, _)| *route == path)
                    .map(|(_, response)| response.clone())
                    .unwrap_or_else(|| respond("404 Not Found", "", ""));
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        addr
    }

    fn respond(status: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\n{}Content-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            headers,
            body.len(),
            body
        )
    }

    fn redirect(location: &str) -> String {
        respond("302 Found", &format!("Location: {}\r\n", location), "")
    }

    fn open_settings(denylist: &[&str]) -> FetchSettings {
        FetchSettings {
            interval_ms: 0,
            block_private_hosts: false,
            url_denylist: denylist.iter().map(|s| s.to_string()).collect(),
            ..FetchSettings::default()
        }
    }

    #[tokio::test]
    async fn denylist_applies_without_private_host_blocking() {
        let addr = serve(vec![(
            "/",
            respond("200 OK", "", "<p>secret internal page</p>"),
        )])
        .await;
        let fetcher = HttpPageFetcher::new(open_settings(&["127.0.0.1"])).expect("fetcher");

        let err = fetcher
            .fetch_page(&format!("http://{}/", addr))
            .await
            .expect_err("denylisted host");
        assert!(matches!(err, RagError::Forbidden(_)));
    }

    #[tokio::test]
    async fn follows_redirects_and_validates_every_hop() {
        let addr = serve(vec![
            ("/start", redirect("/final")),
            ("/final", respond("200 OK", "", "<p>landed</p>")),
            ("/escape", redirect("http://blocked.test/")),
            ("/loop", redirect("/loop")),
        ])
        .await;
        let fetcher = HttpPageFetcher::new(open_settings(&["blocked.test"])).expect("fetcher");

        let page = fetcher
            .fetch_page(&format!("http://{}/start", addr))
            .await
            .expect("redirect followed");
        assert_eq!(page.paragraphs, vec!["landed".to_string()]);
        assert_eq!(page.url, format!("http://{}/start", addr));

        let err = fetcher
            .fetch_page(&format!("http://{}/escape", addr))
            .await
            .expect_err("redirect to denylisted host");
        assert!(matches!(err, RagError::Forbidden(_)));

        let err = fetcher
            .fetch_page(&format!("http://{}/loop", addr))
            .await
            .expect_err("redirect loop");
        assert!(matches!(err, RagError::Upstream(_)));
    }

    #[tokio::test]
    async fn hostnames_resolving_to_private_addresses_are_rejected() {
        let target = Url::parse("http://localhost:8080/").expect("url");

        let err = validate_fetch_target(&target, &[], true)
            .await
            .expect_err("loopback resolution");
        assert!(matches!(err, RagError::Forbidden(_)));

        assert!(validate_fetch_target(&target, &[], false).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_non_http_schemes_and_private_targets() {
        let fetcher = HttpPageFetcher::new(FetchSettings {
            interval_ms: 0,
            ..FetchSettings::default()
        })
        .expect("fetcher");

        let err = fetcher
            .fetch_page("ftp://example.com/file")
            .await
            .expect_err("ftp should be rejected");
        assert!(matches!(err, RagError::BadRequest(_)));

        let err = fetcher
            .fetch_page("http://127.0.0.1:9/")
            .await
            .expect_err("loopback should be rejected");
        assert!(matches!(err, RagError::Forbidden(_)));
    }

    #[tokio::test]
    async fn failed_pages_yield_empty_content_in_order() {
        let fetcher = HttpPageFetcher::new(FetchSettings {
            interval_ms: 0,
            ..FetchSettings::default()
        })
        .expect("fetcher");

        let urls = vec!["not a url".to_string(), "http://localhost/".to_string()];
        let pages = fetcher.fetch_all(&urls).await;
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].url, "not a url");
        assert!(pages.iter().all(PageContent::is_empty));
    }
}
