use reqwest::{Client, ClientBuilder};
use url::{Host, Url};

use crate::error::BridgeError;

/// The single upstream inference service, fixed at startup
///
/// `localhost` is pinned to `127.0.0.1` so connections never race between
/// IPv6 and IPv4 resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    base: Url,
}

impl UpstreamTarget {
    /// Parse and normalize an upstream base URL
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        let mut base = Url::parse(raw.trim())
            .map_err(|e| BridgeError::Config(format!("invalid upstream URL {}: {}", raw, e)))?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(BridgeError::Config(format!(
                "upstream URL must be http or https, got {}",
                base.scheme()
            )));
        }

        if base.host_str() == Some("localhost") {
            base.set_host(Some("127.0.0.1"))
                .map_err(|e| BridgeError::Config(format!("invalid upstream host: {}", e)))?;
        }

        base.set_query(None);
        base.set_fragment(None);

        Ok(Self { base })
    }

    /// Normalized base URL
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Whether the upstream lives on this machine
    pub fn is_loopback(&self) -> bool {
        match self.base.host() {
            Some(Host::Ipv4(ip)) => ip.is_loopback(),
            Some(Host::Ipv6(ip)) => ip.is_loopback(),
            Some(Host::Domain(_)) | None => false,
        }
    }

    /// HTTP client builder for this upstream
    ///
    /// Loopback upstreams bypass `HTTP_PROXY`/`ALL_PROXY`.
    pub fn client_builder(&self) -> ClientBuilder {
        let builder = Client::builder();
        if self.is_loopback() {
            builder.no_proxy()
        } else {
            builder
        }
    }

    /// Value for the `Host` header the upstream expects
    pub fn authority(&self) -> String {
        let host = self.base.host_str().unwrap_or_default();
        match self.base.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Value for the `Origin` header the upstream expects
    pub fn origin(&self) -> String {
        self.base.origin().ascii_serialization()
    }

    /// Resolve a path (with optional query) against the upstream base
    ///
    /// Example: base `http://127.0.0.1:11434/ollama`, `/tags?x=1` ->
    /// `http://127.0.0.1:11434/ollama/tags?x=1`
    pub fn join(&self, path_and_query: &str) -> Url {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let mut url = self.base.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        url.set_path(&format!("{}{}", base_path, path));
        url.set_query(query);
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localhost_is_pinned_to_ipv4() {
        let target = UpstreamTarget::parse("http://localhost:11434").unwrap();
        assert_eq!(target.base_url().as_str(), "http://127.0.0.1:11434/");
        assert_eq!(target.authority(), "127.0.0.1:11434");
        assert_eq!(target.origin(), "http://127.0.0.1:11434");
    }

    #[test]
    fn test_other_hosts_are_kept() {
        let target = UpstreamTarget::parse("https://gpu-box.lan/").unwrap();
        assert_eq!(target.authority(), "gpu-box.lan");
        assert_eq!(target.origin(), "https://gpu-box.lan");
    }

    #[test]
    fn test_loopback_detection() {
        for raw in ["http://localhost:11434", "http://127.0.0.1:11434", "http://[::1]:11434"] {
            assert!(UpstreamTarget::parse(raw).unwrap().is_loopback(), "{}", raw);
        }
        for raw in ["http://10.0.0.7:11434", "https://gpu-box.lan", "http://[2001:db8::1]"] {
            assert!(!UpstreamTarget::parse(raw).unwrap().is_loopback(), "{}", raw);
        }
    }

    #[test]
    fn test_invalid_upstreams() {
        assert!(matches!(
            UpstreamTarget::parse("not a url"),
            Err(BridgeError::Config(_))
        ));
        assert!(matches!(
            UpstreamTarget::parse("ftp://127.0.0.1:21"),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_join_paths() {
        let target = UpstreamTarget::parse("http://localhost:11434").unwrap();
        assert_eq!(
            target.join("/tags").as_str(),
            "http://127.0.0.1:11434/tags"
        );
        assert_eq!(target.join("/").as_str(), "http://127.0.0.1:11434/");
        assert_eq!(
            target.join("/show?verbose=true").as_str(),
            "http://127.0.0.1:11434/show?verbose=true"
        );
    }

    #[test]
    fn test_join_keeps_base_path() {
        let target = UpstreamTarget::parse("http://127.0.0.1:8080/ollama/?ignored=1").unwrap();
        assert_eq!(
            target.join("/api/tags").as_str(),
            "http://127.0.0.1:8080/ollama/api/tags"
        );
    }
}
