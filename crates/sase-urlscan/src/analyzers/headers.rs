//! Header & Security-Policy Analysis

use std::collections::HashMap;
use std::time::Instant;

use super::{Analyzer, Findings};
use crate::{AnalyzerKind, AnalyzerResult, Artifact};

/// HSTS max-age below this (180 days) is considered weak
const MIN_HSTS_MAX_AGE: u64 = 15_552_000;

/// Response-header policy analyzer
#[derive(Debug, Default)]
pub struct HeaderPolicyAnalyzer;

impl HeaderPolicyAnalyzer {
    /// Analyzer with the built-in header policy
    pub fn new() -> Self {
        Self
    }

    fn check_csp(headers: &HashMap<String, String>, findings: &mut Findings) -> bool {
        let Some(csp) = headers.get("content-security-policy") else {
            findings.add(15.0, "no Content-Security-Policy");
            return false;
        };
        let csp = csp.to_ascii_lowercase();

        if csp.contains("'unsafe-inline'") {
            findings.add(10.0, "CSP allows 'unsafe-inline'");
        }
        if csp.contains("'unsafe-eval'") {
            findings.add(10.0, "CSP allows 'unsafe-eval'");
        }

        let wildcard = csp.split(';').any(|directive| {
            let mut tokens = directive.split_whitespace();
            matches!(tokens.next(), Some("default-src" | "script-src")) && tokens.any(|t| t == "*")
        });
        if wildcard {
            findings.add(10.0, "CSP allows scripts from any origin");
        }

        csp.contains("frame-ancestors")
    }

    fn check_hsts(url: &str, headers: &HashMap<String, String>, findings: &mut Findings) {
        if !url.trim_start().to_ascii_lowercase().starts_with("https://") {
            return;
        }

        let Some(hsts) = headers.get("strict-transport-security") else {
            findings.add(10.0, "no Strict-Transport-Security on https");
            return;
        };

        let max_age = hsts
            .split(';')
            .filter_map(|part| part.trim().strip_prefix("max-age="))
            .find_map(|v| v.trim_matches('"').parse::<u64>().ok())
            .unwrap_or(0);
        if max_age < MIN_HSTS_MAX_AGE {
            findings.add(5.0, format!("short HSTS max-age ({max_age}s)"));
        }
    }

    fn check_cookies(headers: &HashMap<String, String>, findings: &mut Findings) {
        let Some(cookies) = headers.get("set-cookie") else {
            return;
        };

        let mut insecure = 0;
        let mut script_readable = 0;
        for cookie in cookies.lines().filter(|c| !c.trim().is_empty()) {
            let attrs: Vec<String> = cookie
                .split(';')
                .skip(1)
                .map(|a| a.trim().to_ascii_lowercase())
                .collect();
            if !attrs.iter().any(|a| a == "secure") {
                insecure += 1;
            }
            if !attrs.iter().any(|a| a == "httponly") {
                script_readable += 1;
            }
        }

        if insecure > 0 {
            findings.add(10.0, format!("{insecure} cookie(s) without Secure"));
        }
        if script_readable > 0 {
            findings.add(5.0, format!("{script_readable} cookie(s) without HttpOnly"));
        }
    }

    fn check_disclosure(headers: &HashMap<String, String>, findings: &mut Findings) {
        for name in ["server", "x-powered-by"] {
            if let Some(value) = headers.get(name) {
                if value.chars().any(|c| c.is_ascii_digit()) {
                    findings.add(5.0, format!("{name} header discloses version: {value}"));
                }
            }
        }
    }

    fn check_cors(headers: &HashMap<String, String>, findings: &mut Findings) {
        let Some(origin) = headers.get("access-control-allow-origin") else {
            return;
        };
        if origin.trim() != "*" {
            return;
        }

        let credentials = headers
            .get("access-control-allow-credentials")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        if credentials {
            findings.add(15.0, "CORS allows any origin with credentials");
        } else {
            findings.add(5.0, "CORS allows any origin");
        }
    }
}

#[async_trait::async_trait]
impl Analyzer for HeaderPolicyAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::HeaderPolicy
    }

    async fn analyze(&self, artifact: &Artifact) -> AnalyzerResult {
        let Some(headers) = artifact.headers() else {
            return AnalyzerResult::skipped(self.kind(), "no response headers supplied");
        };
        let start = Instant::now();
        let mut findings = Findings::default();

        let frame_ancestors = Self::check_csp(headers, &mut findings);
        Self::check_hsts(&artifact.url, headers, &mut findings);

        if !frame_ancestors && !headers.contains_key("x-frame-options") {
            findings.add(10.0, "no clickjacking protection (X-Frame-Options or frame-ancestors)");
        }
        if !headers
            .get("x-content-type-options")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("nosniff"))
        {
            findings.add(5.0, "X-Content-Type-Options is not nosniff");
        }
        if !headers.contains_key("referrer-policy") {
            findings.add(5.0, "no Referrer-Policy");
        }

        Self::check_cookies(headers, &mut findings);
        Self::check_disclosure(headers, &mut findings);
        Self::check_cors(headers, &mut findings);

        findings.into_result(self.kind()).with_duration(start.elapsed())
    }
}
