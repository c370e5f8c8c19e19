//! Behavioral Heuristics
//!
//! Inspects fetched page content for what a page *does*: where its forms
//! post, whether it hides frames, redirects, obfuscates or fights analysis.
//! Purely static; nothing is executed.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::time::Instant;

use super::{shannon_entropy, Analyzer, Findings};
use crate::error::ConfigError;
use crate::{AnalyzerKind, AnalyzerResult, Artifact};

/// Scripts longer than this are checked for entropy
const ENTROPY_MIN_LEN: usize = 500;
/// Bits per character above which a script looks packed
const HIGH_ENTROPY: f64 = 5.2;

const OBFUSCATION_CALLS: [&str; 6] = [
    "eval(",
    "atob(",
    "unescape(",
    "string.fromcharcode",
    "document.write(",
    "new function(",
];

const MINER_MARKERS: [&str; 6] = [
    "coinhive",
    "cryptonight",
    "coinimp",
    "crypto-loot",
    "miner.start(",
    "webminerpool",
];

const DOWNLOAD_EXTENSIONS: [&str; 8] = [".exe", ".scr", ".msi", ".apk", ".jar", ".bat", ".ps1", ".vbs"];

/// Page behavior analyzer
pub struct BehavioralAnalyzer {
    js_redirect: Regex,
    base64_blob: Regex,
    hex_blob: Regex,
    context_menu_block: Regex,
}

impl BehavioralAnalyzer {
    /// Compile the script patterns
    pub fn new() -> Result<Self, ConfigError> {
        let compile = |pattern: &str| Regex::new(pattern).map_err(|e| ConfigError::Invalid(e.to_string()));
        Ok(Self {
            js_redirect: compile(r"(?i)(\blocation(\.href)?\s*=[^=]|location\.(replace|assign)\s*\()")?,
            base64_blob: compile(r"[A-Za-z0-9+/]{200,}={0,2}")?,
            hex_blob: compile(r"(\\x[0-9a-fA-F]{2}){20,}")?,
            context_menu_block: compile(r#"(?i)(oncontextmenu\s*=\s*["']?\s*return\s+false|addEventListener\(\s*["']contextmenu)"#)?,
        })
    }

    /// HTML structure checks; returns inline script bodies for the script checks
    fn inspect_document(&self, html: &str, page: Option<&url::Url>, findings: &mut Findings) -> Vec<String> {
        let doc = Html::parse_document(html);
        let page_host = page.and_then(|u| u.host_str()).map(str::to_ascii_lowercase);
        let over_http = page.is_some_and(|u| u.scheme() == "http");

        self.check_forms(&doc, page, page_host.as_deref(), over_http, findings);

        if let Ok(iframes) = Selector::parse("iframe") {
            let hidden = doc.select(&iframes).filter(is_hidden).count();
            if hidden > 0 {
                findings.add(20.0, format!("{hidden} hidden iframe(s)"));
            }
        }

        if let Ok(meta) = Selector::parse("meta[http-equiv]") {
            for el in doc.select(&meta) {
                let is_refresh = el
                    .value()
                    .attr("http-equiv")
                    .is_some_and(|v| v.eq_ignore_ascii_case("refresh"));
                let target = el
                    .value()
                    .attr("content")
                    .and_then(|c| c.to_ascii_lowercase().split_once("url=").map(|(_, t)| t.trim().to_string()));
                if let (true, Some(target)) = (is_refresh, target) {
                    let cross_site = resolve(page, &target)
                        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
                        .is_some_and(|h| Some(&h) != page_host.as_ref());
                    if cross_site {
                        findings.add(15.0, format!("meta refresh to another site: {target}"));
                    } else {
                        findings.add(5.0, "meta refresh redirect");
                    }
                    if is_download(&target) {
                        findings.add(15.0, format!("automatic download via meta refresh: {target}"));
                    }
                }
            }
        }

        if let Ok(anchors) = Selector::parse("a[download]") {
            let forced = doc
                .select(&anchors)
                .filter_map(|a| a.value().attr("href"))
                .find(|href| is_download(href));
            if let Some(href) = forced {
                findings.add(10.0, format!("forced executable download link: {href}"));
            }
        }

        let mut inline = Vec::new();
        if let Ok(scripts) = Selector::parse("script") {
            inline.extend(
                doc.select(&scripts)
                    .map(|s| s.text().collect::<String>())
                    .filter(|s| !s.trim().is_empty()),
            );
        }

        // Inline handlers live in attributes, not script elements
        if self.context_menu_block.is_match(html) {
            findings.add(10.0, "right-click disabled");
        }

        inline
    }

    fn check_forms(
        &self,
        doc: &Html,
        page: Option<&url::Url>,
        page_host: Option<&str>,
        over_http: bool,
        findings: &mut Findings,
    ) {
        let (Ok(forms), Ok(password)) = (Selector::parse("form"), Selector::parse("input[type=password]")) else {
            return;
        };

        let mut has_password = false;
        for form in doc.select(&forms) {
            if form.select(&password).next().is_none() {
                continue;
            }
            has_password = true;

            let action = form.value().attr("action").unwrap_or("").trim();
            if action.to_ascii_lowercase().starts_with("mailto:") {
                findings.add(25.0, "credential form submits by email");
                continue;
            }

            let target_host = resolve(page, action).and_then(|u| u.host_str().map(str::to_ascii_lowercase));
            if let (Some(target), Some(own)) = (target_host, page_host) {
                if target != own {
                    findings.add(30.0, format!("credential form posts to another origin: {target}"));
                }
            }
        }

        if !has_password && doc.select(&password).next().is_some() {
            has_password = true;
        }
        if has_password && over_http {
            findings.add(20.0, "password field served over http");
        }
    }

    fn check_scripts<'a>(&self, scripts: impl Iterator<Item = &'a str>, findings: &mut Findings) {
        let mut calls = [false; OBFUSCATION_CALLS.len()];
        let mut redirect = false;
        let mut base64 = false;
        let mut hex = false;
        let mut packed = false;
        let mut devtools = false;
        let mut miner = None;
        let mut download = false;

        for script in scripts {
            let lower = script.to_ascii_lowercase();
            for (seen, call) in calls.iter_mut().zip(OBFUSCATION_CALLS) {
                *seen |= lower.contains(call);
            }
            redirect |= self.js_redirect.is_match(script);
            base64 |= self.base64_blob.is_match(script);
            hex |= self.hex_blob.is_match(script);
            packed |= script.len() > ENTROPY_MIN_LEN && shannon_entropy(script) > HIGH_ENTROPY;
            devtools |= lower.contains("devtools") || lower.contains("debugger;");
            miner = miner.or_else(|| MINER_MARKERS.iter().find(|m| lower.contains(*m)).copied());
            download |= lower.contains("mssaveblob") || (lower.contains("createobjecturl") && lower.contains(".click()"));
        }

        let names: Vec<&str> = OBFUSCATION_CALLS
            .iter()
            .zip(calls)
            .filter(|(_, seen)| *seen)
            .map(|(call, _)| call.trim_end_matches('('))
            .collect();
        if !names.is_empty() {
            findings.add(
                (5.0 * names.len() as f64).min(25.0),
                format!("obfuscation primitives: {}", names.join(", ")),
            );
        }
        if redirect {
            findings.add(10.0, "JavaScript redirect");
        }
        if base64 {
            findings.add(10.0, "long base64 blob in script");
        }
        if hex {
            findings.add(10.0, "hex-escaped payload in script");
        }
        if packed {
            findings.add(10.0, "high-entropy (packed) script");
        }
        if devtools {
            findings.add(10.0, "developer-tools detection");
        }
        if let Some(marker) = miner {
            findings.add(25.0, format!("crypto-miner reference: {marker}"));
        }
        if download {
            findings.add(15.0, "script-triggered automatic download");
        }
    }
}

fn is_hidden(frame: &ElementRef) -> bool {
    let attr = |name: &str| frame.value().attr(name).map(|v| v.trim().to_ascii_lowercase());
    let tiny = |v: Option<String>| v.is_some_and(|v| matches!(v.trim_end_matches("px"), "0" | "1"));

    let style = attr("style").unwrap_or_default().replace(' ', "");
    tiny(attr("width"))
        || tiny(attr("height"))
        || style.contains("display:none")
        || style.contains("visibility:hidden")
        || attr("hidden").is_some()
}

fn resolve(page: Option<&url::Url>, target: &str) -> Option<url::Url> {
    let target = target.trim_matches(['\'', '"', ' ']);
    match page {
        Some(base) => base.join(target).ok(),
        None => url::Url::parse(target).ok(),
    }
}

fn is_download(target: &str) -> bool {
    let path = target.split(['?', '#']).next().unwrap_or(target).to_ascii_lowercase();
    DOWNLOAD_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

#[async_trait::async_trait]
impl Analyzer for BehavioralAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Behavioral
    }

    async fn analyze(&self, artifact: &Artifact) -> AnalyzerResult {
        if !artifact.content.as_ref().is_some_and(|c| c.has_document()) {
            return AnalyzerResult::skipped(self.kind(), "no page content supplied");
        }
        let start = Instant::now();
        let page = artifact.parsed_url();
        let mut findings = Findings::default();

        let inline = match artifact.html() {
            Some(html) => self.inspect_document(html, page.as_ref(), &mut findings),
            None => Vec::new(),
        };
        let scripts = inline
            .iter()
            .chain(artifact.scripts().iter())
            .map(String::as_str);
        self.check_scripts(scripts, &mut findings);

        if findings.is_empty() {
            tracing::trace!(url = %artifact.url, "no behavioral indicators");
        }
        findings.into_result(self.kind()).with_duration(start.elapsed())
    }
}
