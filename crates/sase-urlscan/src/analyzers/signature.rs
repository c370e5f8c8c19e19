//! Signature Matching
//!
//! All literal patterns are compiled into one Aho-Corasick automaton and all
//! regex patterns into one `RegexSet`, so each text source is scanned twice
//! regardless of how many rules are loaded.

use aho_corasick::AhoCorasick;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::Analyzer;
use crate::error::ConfigError;
use crate::{AnalyzerKind, AnalyzerResult, Artifact};

/// Score added per matched signature beyond the strongest one
const EXTRA_MATCH_BONUS: f64 = 5.0;

/// How a signature's pattern is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Case-insensitive substring
    Literal,
    /// `regex` crate syntax
    Regex,
}

/// Which part of the artifact a signature applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureTarget {
    /// URL only
    Url,
    /// HTML document only
    Html,
    /// Script bodies and the HTML document they may be inlined in
    Script,
    /// Every source
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Url,
    Html,
    Script,
}

impl SignatureTarget {
    fn applies_to(&self, source: Source) -> bool {
        match self {
            Self::Any => true,
            Self::Url => source == Source::Url,
            Self::Html => source == Source::Html,
            Self::Script => matches!(source, Source::Script | Source::Html),
        }
    }
}

/// Signature severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational
    Low,
    /// Worth a look
    Medium,
    /// Likely malicious
    High,
    /// Known malicious; triggers the override
    Critical,
}

impl Severity {
    /// Score contributed by the strongest match
    pub fn score(&self) -> f64 {
        match self {
            Self::Low => 25.0,
            Self::Medium => 50.0,
            Self::High => 75.0,
            Self::Critical => 95.0,
        }
    }
}

/// A detection rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Stable rule identifier
    pub id: String,
    /// Human-readable rule name
    pub name: String,
    /// Literal or regex
    pub kind: PatternKind,
    /// Pattern text
    pub pattern: String,
    /// Artifact parts searched
    pub target: SignatureTarget,
    /// Match severity
    pub severity: Severity,
    /// Copied onto the analyzer result when the rule fires
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Signature {
    fn new(
        id: &str,
        name: &str,
        kind: PatternKind,
        pattern: &str,
        target: SignatureTarget,
        severity: Severity,
        tags: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            pattern: pattern.into(),
            target,
            severity,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Compiled signature database
pub struct SignatureDb {
    signatures: Vec<Signature>,
    /// Automaton pattern index -> signature index
    literal_ids: Vec<usize>,
    literals: AhoCorasick,
    /// Set pattern index -> signature index
    regex_ids: Vec<usize>,
    regexes: RegexSet,
}

impl SignatureDb {
    /// Compile `signatures`; fails on any invalid pattern
    pub fn new(signatures: Vec<Signature>) -> Result<Self, ConfigError> {
        let mut literal_ids = Vec::new();
        let mut literal_patterns = Vec::new();
        let mut regex_ids = Vec::new();
        let mut regex_patterns = Vec::new();

        for (idx, sig) in signatures.iter().enumerate() {
            if sig.pattern.is_empty() {
                return Err(ConfigError::Signature(format!("{}: empty pattern", sig.id)));
            }
            match sig.kind {
                PatternKind::Literal => {
                    literal_ids.push(idx);
                    literal_patterns.push(sig.pattern.as_str());
                }
                PatternKind::Regex => {
                    regex_ids.push(idx);
                    regex_patterns.push(sig.pattern.as_str());
                }
            }
        }

        let literals = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&literal_patterns)
            .map_err(|e| ConfigError::Signature(e.to_string()))?;
        let regexes = RegexSet::new(&regex_patterns).map_err(|e| ConfigError::Signature(e.to_string()))?;

        Ok(Self {
            signatures,
            literal_ids,
            literals,
            regex_ids,
            regexes,
        })
    }

    /// Database with the built-in rules
    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::new(Self::default_signatures())
    }

    /// Read extra rules from a JSON array
    pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<Signature>, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// No rules loaded
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Indices of signatures matching `text` that apply to `source`
    fn scan_text(&self, source: Source, text: &str, hits: &mut BTreeSet<usize>) {
        for m in self.literals.find_overlapping_iter(text) {
            let idx = self.literal_ids[m.pattern().as_usize()];
            if self.signatures[idx].target.applies_to(source) {
                hits.insert(idx);
            }
        }
        for set_idx in self.regexes.matches(text).into_iter() {
            let idx = self.regex_ids[set_idx];
            if self.signatures[idx].target.applies_to(source) {
                hits.insert(idx);
            }
        }
    }

    /// Signatures matching any part of the artifact, in database order
    pub fn match_artifact(&self, artifact: &Artifact) -> Vec<&Signature> {
        let mut hits = BTreeSet::new();

        self.scan_text(Source::Url, &artifact.url, &mut hits);
        if let Some(html) = artifact.html() {
            self.scan_text(Source::Html, html, &mut hits);
        }
        for script in artifact.scripts() {
            self.scan_text(Source::Script, script, &mut hits);
        }

        hits.into_iter().map(|idx| &self.signatures[idx]).collect()
    }

    /// Built-in rules
    pub fn default_signatures() -> Vec<Signature> {
        use PatternKind::{Literal, Regex};
        use Severity::{Critical, High, Medium};
        use SignatureTarget::{Any, Html, Script, Url};

        vec![
            Signature::new("URL-001", "Script tag in URL", Literal, "<script", Url, High, &["xss", "exploit"]),
            Signature::new("URL-002", "javascript: scheme in URL", Regex, r"(?i)javascript(:|%3a)", Url, Medium, &["xss"]),
            Signature::new("URL-003", "Path traversal", Regex, r"(?i)(\.\./|%2e%2e%2f|\.\.%2f)", Url, High, &["exploit"]),
            Signature::new(
                "URL-004",
                "SQL injection probe",
                Regex,
                r"(?i)(union(\s|\+|%20)+(all(\s|\+|%20)+)?select|'(\s|%20)*or(\s|%20)*'?1'?(\s|%20)*=(\s|%20)*'?1)",
                Url,
                High,
                &["exploit"],
            ),
            Signature::new(
                "URL-005",
                "Executable download",
                Regex,
                r"(?i)\.(exe|scr|msi|bat|ps1|vbs|jar|apk)(\?|#|$)",
                Url,
                High,
                &["malware_download"],
            ),
            Signature::new("MIN-001", "Coinhive miner", Literal, "coinhive.min.js", Any, Critical, &["critical", "cryptominer"]),
            Signature::new(
                "MIN-002",
                "Browser crypto miner",
                Regex,
                r"(?i)(cryptonight|coinimp|crypto-loot|webminerpool)",
                Any,
                High,
                &["cryptominer"],
            ),
            Signature::new(
                "PHK-001",
                "Credential exfiltration to Telegram bot",
                Regex,
                r"api\.telegram\.org/bot[0-9]+:",
                Any,
                Critical,
                &["critical", "phishing_kit"],
            ),
            Signature::new("PHK-002", "16Shop phishing kit", Literal, "16shop", Html, Critical, &["critical", "phishing_kit"]),
            Signature::new(
                "EXP-001",
                "Heap spray shellcode",
                Regex,
                r#"(?i)unescape\(\s*["'](%u[0-9a-f]{4}){2,}"#,
                Script,
                Critical,
                &["critical", "exploit"],
            ),
            Signature::new(
                "EXP-002",
                "Web shell",
                Regex,
                r"(?i)(c99shell|r57shell|b374k|wso\s*shell)",
                Any,
                Critical,
                &["critical", "exploit"],
            ),
            Signature::new("OBF-001", "Eval of base64 payload", Regex, r"eval\s*\(\s*atob\s*\(", Script, High, &["obfuscation"]),
            Signature::new("OBF-002", "Inline HTML data URI", Literal, "data:text/html;base64,", Any, High, &["obfuscation"]),
        ]
    }
}

/// Signature-match layer
pub struct SignatureAnalyzer {
    db: Arc<SignatureDb>,
}

impl SignatureAnalyzer {
    /// Layer over a compiled database
    pub fn new(db: Arc<SignatureDb>) -> Self {
        Self { db }
    }

    /// Strongest severity plus a bonus per additional match, capped at 100
    fn score(matches: &[&Signature]) -> f64 {
        let Some(top) = matches.iter().map(|s| s.severity).max() else {
            return 0.0;
        };
        let extra = matches.len().saturating_sub(1) as f64;
        (top.score() + EXTRA_MATCH_BONUS * extra).min(100.0)
    }
}

#[async_trait::async_trait]
impl Analyzer for SignatureAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::SignatureMatch
    }

    async fn analyze(&self, artifact: &Artifact) -> AnalyzerResult {
        let start = Instant::now();
        let matches = self.db.match_artifact(artifact);

        let findings = matches
            .iter()
            .map(|s| format!("{} ({}): {:?} severity", s.name, s.id, s.severity))
            .collect();
        let ids: Vec<&str> = matches.iter().map(|s| s.id.as_str()).collect();
        let tags: Vec<String> = matches.iter().flat_map(|s| s.tags.iter().cloned()).collect();

        AnalyzerResult::completed(self.kind(), Self::score(&matches), findings)
            .with_tags(tags)
            .with_extra(serde_json::json!({ "matched": ids }))
            .with_duration(start.elapsed())
    }
}
