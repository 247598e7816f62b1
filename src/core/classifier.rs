use crate::config::tables::DomainTables;
use crate::core::services::MeteredServices;
use crate::domain::model::{CandidateFile, ClassificationResult, Domain};
use crate::domain::ports::ClassifyRequest;
use crate::utils::error::{BlendError, Result};
use regex::Regex;
use std::sync::{Arc, OnceLock};

const IDENTIFIER_WEIGHT: f64 = 0.5;
const HEADER_WEIGHT: f64 = 0.2;
const SECTIONS_WEIGHT: f64 = 0.2;
const LENGTH_WEIGHT: f64 = 0.1;

fn heading_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^(#{1,6}\s+\S|---\s*$)")
            .unwrap_or_else(|e| unreachable!("static heading pattern: {}", e))
    })
}

/// 依領域結構規則評分，信心不足時升級到生成式分類
pub struct Classifier {
    tables: Arc<DomainTables>,
}

impl Classifier {
    pub fn new(tables: Arc<DomainTables>) -> Self {
        Self { tables }
    }

    /// 確定性評分：(信心, 問題清單)
    pub fn score(&self, candidate: &CandidateFile) -> Result<(f64, Vec<String>)> {
        let content = candidate.content.as_str();
        if content.trim().is_empty() {
            return Err(BlendError::ClassificationError {
                path: candidate.path.clone(),
                message: "file is empty".to_string(),
            });
        }

        let rule = self.tables.rule(candidate.domain);
        let mut issues = Vec::new();

        if !rule.identifier.is_match(content) {
            issues.push(format!(
                "missing required {} identifier (pattern {})",
                candidate.domain,
                rule.identifier.as_str()
            ));
            return Ok((0.0, issues));
        }
        let mut confidence = IDENTIFIER_WEIGHT;

        if has_header(candidate.domain, content) {
            confidence += HEADER_WEIGHT;
        } else {
            issues.push("no header found".to_string());
        }

        if rule.expected_sections.is_empty() {
            confidence += SECTIONS_WEIGHT;
        } else {
            let headings: Vec<String> = content
                .lines()
                .filter(|l| l.trim_start().starts_with('#'))
                .map(|l| l.to_lowercase())
                .collect();
            let missing: Vec<&String> = rule
                .expected_sections
                .iter()
                .filter(|s| {
                    let needle = s.to_lowercase();
                    !headings.iter().any(|h| h.contains(&needle))
                })
                .collect();
            let found = rule.expected_sections.len() - missing.len();
            confidence += SECTIONS_WEIGHT * found as f64 / rule.expected_sections.len() as f64;
            if !missing.is_empty() {
                issues.push(format!(
                    "missing expected section(s): {}",
                    missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                ));
            }
        }

        if content.trim().len() >= rule.min_length {
            confidence += LENGTH_WEIGHT;
        } else {
            issues.push(format!(
                "shorter than {} characters",
                rule.min_length
            ));
        }

        Ok((confidence.min(1.0), issues))
    }

    pub async fn classify(
        &self,
        candidate: &CandidateFile,
        services: &MeteredServices,
    ) -> Result<ClassificationResult> {
        let (mut confidence, mut issues) = self.score(candidate)?;
        let mut escalated = false;
        let rule = self.tables.rule(candidate.domain);

        if confidence < self.tables.escalation_threshold {
            let excerpt = excerpt(&candidate.content, self.tables.excerpt_chars);
            let request = ClassifyRequest {
                domain: candidate.domain,
                rules: &rule.rule_text,
                excerpt,
            };
            match services.classify(request).await {
                Ok(reply) => {
                    tracing::debug!(
                        "🧠 {}: {} escalated, {:.2} -> {:.2}",
                        candidate.domain,
                        candidate.key(),
                        confidence,
                        reply.confidence
                    );
                    confidence = reply.confidence.clamp(0.0, 1.0);
                    issues = reply.issues;
                    escalated = true;
                }
                Err(e) => {
                    issues.push(format!("degraded classification (structural score only): {}", e));
                }
            }
        }

        let valid = confidence >= rule.threshold;
        if !valid {
            tracing::info!(
                "🚫 {}: filtered {} (confidence {:.2} < {:.2})",
                candidate.domain,
                candidate.key(),
                confidence,
                rule.threshold
            );
        }

        Ok(ClassificationResult {
            file: candidate.path.clone(),
            domain: candidate.domain,
            valid,
            confidence,
            issues,
            escalated,
        })
    }
}

fn has_header(domain: Domain, content: &str) -> bool {
    match domain {
        Domain::Settings => serde_json::from_str::<serde_json::Value>(content)
            .map(|v| v.is_object())
            .unwrap_or(false),
        _ => heading_pattern().is_match(content),
    }
}

/// 取前 n 個字元（不切斷 UTF-8）
pub fn excerpt(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}
