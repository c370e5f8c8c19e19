//! Static Lexical Analysis
//!
//! URL-only checks. Nothing here touches the network except the optional
//! DNS resolution, which goes through the DNS cache.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Instant;

use super::{keyword_hits, levenshtein, Analyzer, Findings};
use crate::intel::whois::registrable_domain;
use crate::intel::DnsResolver;
use crate::error::AnalyzerError;
use crate::{AnalyzerKind, AnalyzerResult, Artifact};

const LONG_URL: usize = 75;
const VERY_LONG_URL: usize = 150;
const MAX_SUBDOMAIN_LABELS: usize = 3;
const MAX_ENCODED_CHARS: usize = 3;

/// Static lexical analyzer
pub struct LexicalAnalyzer {
    /// Official domains of commonly impersonated brands
    protected_domains: Vec<&'static str>,
    suspicious_tlds: HashSet<&'static str>,
    shorteners: HashSet<&'static str>,
    resolver: Option<DnsResolver>,
}

impl LexicalAnalyzer {
    /// Offline analyzer, no DNS
    pub fn new() -> Self {
        Self {
            protected_domains: default_protected_domains(),
            suspicious_tlds: default_suspicious_tlds(),
            shorteners: default_shorteners(),
            resolver: None,
        }
    }

    /// Also flag hosts that do not resolve
    pub fn with_resolver(resolver: DnsResolver) -> Self {
        Self {
            resolver: Some(resolver),
            ..Self::new()
        }
    }

    fn check_url(&self, raw: &str, url: &url::Url, host: &str, findings: &mut Findings) {
        let is_ip = host.parse::<IpAddr>().is_ok();
        if is_ip {
            findings.add(25.0, format!("host is a raw IP address: {host}"));
        }

        if raw.len() > VERY_LONG_URL {
            findings.add(15.0, format!("very long URL ({} characters)", raw.len()));
        } else if raw.len() > LONG_URL {
            findings.add(10.0, format!("long URL ({} characters)", raw.len()));
        }

        if !url.username().is_empty() || url.password().is_some() {
            findings.add(25.0, "'@' in authority hides the real host");
        }

        if url.scheme() == "http" {
            findings.add(10.0, "unencrypted http scheme");
        }

        if let Some(port) = url.port() {
            findings.add(10.0, format!("non-standard port {port}"));
        }

        if is_ip {
            return self.check_path(raw, url, findings);
        }

        let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
        if labels.len() > MAX_SUBDOMAIN_LABELS + 1 {
            findings.add(15.0, format!("deep subdomain nesting ({} labels)", labels.len()));
        }

        if let Some(tld) = labels.last() {
            if self.suspicious_tlds.contains(*tld) {
                findings.add(15.0, format!("suspicious TLD .{tld}"));
            }
        }

        if labels.iter().any(|l| l.starts_with("xn--")) {
            findings.add(20.0, "punycode host (possible homograph)");
        }

        if let Some(domain) = registrable_domain(host) {
            if self.shorteners.contains(domain.as_str()) {
                findings.add(15.0, format!("URL shortener {domain}"));
            }
            self.check_brands(host, &domain, findings);
        }

        self.check_path(raw, url, findings);
    }

    fn check_brands(&self, host: &str, domain: &str, findings: &mut Findings) {
        if self.protected_domains.iter().any(|d| *d == domain) {
            return;
        }

        if let Some(target) = self.protected_domains.iter().find(|t| is_typosquat(domain, t)) {
            findings.add(30.0, format!("{domain} looks like a typosquat of {target}"));
            return;
        }

        // paypal.com.account-check.example
        let subdomains = host.strip_suffix(domain).unwrap_or("");
        if let Some(brand) = self
            .protected_domains
            .iter()
            .filter_map(|d| d.split('.').next())
            .find(|brand| subdomains.contains(*brand))
        {
            findings.add(25.0, format!("brand name '{brand}' used outside its official domain"));
        }
    }

    fn check_path(&self, raw: &str, url: &url::Url, findings: &mut Findings) {
        let path_and_query = format!("{}?{}", url.path(), url.query().unwrap_or(""));
        let keywords = keyword_hits(&path_and_query);
        if !keywords.is_empty() {
            let weight = (5.0 * keywords.len() as f64).min(20.0);
            findings.add(weight, format!("phishing keywords: {}", keywords.join(", ")));
        }

        let encoded = raw.matches('%').count();
        if encoded > MAX_ENCODED_CHARS {
            findings.add(10.0, format!("{encoded} percent-encoded characters"));
        }

        if url.path().contains("//") {
            findings.add(10.0, "double slash in path (possible redirect)");
        }
    }
}

impl Default for LexicalAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Analyzer for LexicalAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::StaticLexical
    }

    async fn analyze(&self, artifact: &Artifact) -> AnalyzerResult {
        let start = Instant::now();

        let (url, host) = match (artifact.validate(), artifact.host()) {
            (Ok(url), Some(host)) => (url, host),
            (Err(e), _) => return AnalyzerResult::fault(self.kind(), AnalyzerError::Parse(e.to_string())),
            (Ok(_), None) => return AnalyzerResult::fault(self.kind(), AnalyzerError::Parse("URL has no host".into())),
        };

        let mut findings = Findings::default();
        self.check_url(artifact.url.trim(), &url, &host, &mut findings);

        if let Some(resolver) = &self.resolver {
            if host.parse::<IpAddr>().is_err() && resolver.resolve(&host).await.is_empty() {
                findings.add(15.0, format!("{host} does not resolve"));
            }
        }

        findings.into_result(self.kind()).with_duration(start.elapsed())
    }
}

fn is_typosquat(candidate: &str, target: &str) -> bool {
    if candidate == target {
        return false;
    }
    if levenshtein(candidate, target) <= 2 {
        return true;
    }

    // Digit-for-letter substitution and hyphen padding
    const SUBSTITUTIONS: [(&str, &str); 5] = [("0", "o"), ("1", "l"), ("3", "e"), ("4", "a"), ("-", "")];
    SUBSTITUTIONS
        .iter()
        .any(|&(from, to)| candidate.contains(from) && candidate.replace(from, to) == target)
}

fn default_protected_domains() -> Vec<&'static str> {
    vec![
        "paypal.com", "microsoft.com", "office.com", "google.com", "gmail.com",
        "apple.com", "icloud.com", "amazon.com", "netflix.com", "facebook.com",
        "instagram.com", "linkedin.com", "chase.com", "wellsfargo.com", "dropbox.com",
    ]
}

fn default_suspicious_tlds() -> HashSet<&'static str> {
    [
        "tk", "ml", "ga", "cf", "gq", "xyz", "top", "work", "click", "link",
        "buzz", "cam", "icu", "surf", "monster", "uno", "zip", "mov",
    ]
    .into_iter()
    .collect()
}

fn default_shorteners() -> HashSet<&'static str> {
    [
        "bit.ly", "tinyurl.com", "goo.gl", "t.co", "ow.ly", "is.gd", "buff.ly",
        "rebrand.ly", "cutt.ly", "shorturl.at",
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scan(url: &str) -> AnalyzerResult {
        LexicalAnalyzer::new().analyze(&Artifact::new(url)).await
    }

    #[tokio::test]
    async fn test_clean_url() {
        let result = scan("https://example.com/").await;
        assert_eq!(result.score, 0.0);
        assert!(result.findings.is_empty());
    }

    #[tokio::test]
    async fn test_ip_host_over_http() {
        let result = scan("http://192.168.10.5:8080/login").await;
        // ip 25 + http 10 + port 10 + keyword 5
        assert_eq!(result.score, 50.0);
    }

    #[tokio::test]
    async fn test_authority_trick() {
        let result = scan("https://www.paypal.com@evil.example/").await;
        assert!(result.findings.iter().any(|f| f.contains("'@'")));
    }

    #[tokio::test]
    async fn test_typosquat_and_tld() {
        let result = scan("https://paypa1.tk/").await;
        assert!(result.findings.iter().any(|f| f.contains("suspicious TLD")));
        assert!(!result.findings.iter().any(|f| f.contains("typosquat")));

        let result = scan("https://paypa1.com/signin").await;
        assert!(result.findings.iter().any(|f| f.contains("typosquat of paypal.com")));
    }

    #[tokio::test]
    async fn test_official_domain_not_flagged() {
        let result = scan("https://www.paypal.com/").await;
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn test_brand_in_subdomain() {
        let result = scan("https://paypal.com.account-check.example/").await;
        assert!(result.findings.iter().any(|f| f.contains("'paypal'")));
    }

    #[tokio::test]
    async fn test_shortener_and_punycode() {
        assert!(scan("https://bit.ly/abc").await.findings.iter().any(|f| f.contains("shortener")));
        assert!(scan("https://xn--80ak6aa92e.com/").await.findings.iter().any(|f| f.contains("punycode")));
    }

    #[tokio::test]
    async fn test_score_is_capped() {
        let url = format!(
            "http://user@a.b.c.d.e.xn--80ak6aa92e.tk:8443//login/verify/account/secure?{}",
            "%41".repeat(60)
        );
        assert_eq!(scan(&url).await.score, 100.0);
    }

    #[tokio::test]
    async fn test_invalid_url_is_error() {
        let result = scan("notaurl").await;
        assert!(result.is_failed());
        assert_eq!(result.failure, Some(crate::FailureKind::Internal));
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_is_typosquat() {
        assert!(is_typosquat("paypa1.com", "paypal.com"));
        assert!(is_typosquat("g00gle.com", "google.com"));
        assert!(is_typosquat("micro-soft.com", "microsoft.com"));
        assert!(!is_typosquat("paypal.com", "paypal.com"));
        assert!(!is_typosquat("example.com", "apple.com"));
    }
}
