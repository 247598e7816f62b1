use crate::config::tables::{normalize_section, DomainTables, SectionCategory};
use crate::core::markdown::{parse_sections, Section, SectionedDocument};
use crate::core::strategies::{incorporates, prefer_standard, BlendContext, BlendStrategy};
use crate::domain::model::{BlendResult, CandidateFile, Conflict, Domain, Resolution};
use crate::domain::ports::{ClassifyRequest, MergeRequest};
use crate::utils::error::{BlendError, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

const HYBRID_INSTRUCTIONS: &str = "Merge the two versions of this section into one. Keep the framework heading and structure, keep every framework rule intact, and add the project-specific details from the target version that do not contradict the rules document.";

/// 依標題切分文件，逐節決定框架、合併或匯入
pub struct SectionMergeStrategy {
    tables: Arc<DomainTables>,
}

impl SectionMergeStrategy {
    pub fn new(tables: Arc<DomainTables>) -> Self {
        Self { tables }
    }

    fn category(&self, name: &str) -> Option<SectionCategory> {
        self.tables.section_category(name)
    }

    async fn blend_hybrid(
        &self,
        fw: &Section,
        tg: &Section,
        rules: Option<&str>,
        ctx: &BlendContext<'_>,
        result: &mut BlendResult,
    ) -> String {
        let item = format!("CLAUDE.md#{}", fw.name);
        if tg.text == fw.text || incorporates(&tg.text, &fw.text) {
            return tg.text.clone();
        }

        let request = MergeRequest {
            framework: &fw.text,
            target: &tg.text,
            instructions: HYBRID_INSTRUCTIONS,
            rules,
        };
        match ctx.services.merge(request).await {
            Ok(merged) => {
                result.record_merge(item);
                ensure_heading(&merged, fw)
            }
            Err(e) => {
                let conflict = Conflict {
                    domain: Domain::Doc,
                    item: item.clone(),
                    framework: fw.text.clone(),
                    target: tg.text.clone(),
                    reason: format!("hybrid merge unavailable: {}", e),
                };
                match ctx.resolve(&conflict) {
                    Resolution::KeepFramework => {
                        result.record_warning(format!("{}: merge failed, kept framework version ({})", item, e));
                        fw.text.clone()
                    }
                    Resolution::KeepTarget => {
                        result.record_warning(format!("{}: merge failed, kept target version ({})", item, e));
                        tg.text.clone()
                    }
                }
            }
        }
    }

    /// 目標獨有的章節：專案章節直接保留，其餘需通過便宜的分類檢查
    async fn admit_target_only(
        &self,
        section: &Section,
        rules: &str,
        ctx: &BlendContext<'_>,
        result: &mut BlendResult,
    ) -> bool {
        let item = format!("CLAUDE.md#{}", section.name);
        match self.category(&section.name) {
            Some(SectionCategory::ProjectOnly) => return true,
            Some(SectionCategory::Authoritative) => {
                result.record_skip(item, "framework-owned section missing from framework");
                return false;
            }
            _ => {}
        }

        let request = ClassifyRequest {
            domain: Domain::Doc,
            rules,
            excerpt: &section.text,
        };
        match ctx.services.classify(request).await {
            Ok(reply) if reply.valid && reply.confidence > self.tables.doc.import_confidence => true,
            Ok(reply) => {
                let reason = if reply.issues.is_empty() {
                    format!("conflicts with framework rules (confidence {:.2})", reply.confidence)
                } else {
                    format!(
                        "conflicts with framework rules (confidence {:.2}): {}",
                        reply.confidence,
                        reply.issues.join("; ")
                    )
                };
                result.record_skip(item, reason);
                false
            }
            Err(e) => {
                result.record_skip(item, format!("could not check against framework rules: {}", e));
                false
            }
        }
    }

    /// 框架的權威章節必須原樣出現在結果中
    fn check_authoritative(&self, framework: &SectionedDocument, blended: &str) -> Result<()> {
        let out = parse_sections(blended, self.tables.doc.heading_level);
        let missing: Vec<String> = framework
            .sections
            .iter()
            .filter(|s| {
                matches!(
                    self.category(&s.name),
                    Some(SectionCategory::Authoritative) | None
                )
            })
            .filter(|s| out.get(&s.name).map(|o| o.text != s.text).unwrap_or(true))
            .map(|s| format!("authoritative section '{}' missing or altered", s.name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BlendError::validation(Domain::Doc, missing))
        }
    }
}

#[async_trait]
impl BlendStrategy for SectionMergeStrategy {
    fn name(&self) -> &'static str {
        "section-merge"
    }

    fn can_handle(&self, domain: Domain) -> bool {
        domain == Domain::Doc
    }

    async fn blend(
        &self,
        framework: &[CandidateFile],
        target: &[CandidateFile],
        ctx: &BlendContext<'_>,
    ) -> Result<BlendResult> {
        let mut result = BlendResult::new(Domain::Doc);
        let destination = ctx.layout.standard_path(Domain::Doc);
        let item = ctx.display_path(&destination);
        let level = self.tables.doc.heading_level;

        let Some(fw) = framework.first() else {
            result.record_skip(item, "framework has no CLAUDE.md");
            return Ok(result);
        };
        let targets: Vec<&CandidateFile> = target.iter().collect();
        let tg = prefer_standard(&targets);

        let fw_doc = parse_sections(&fw.content, level);
        let tg_doc = tg
            .map(|t| parse_sections(&t.content, level))
            .unwrap_or_default();
        if fw_doc.sections.is_empty() {
            return Err(BlendError::strategy(
                Domain::Doc,
                format!("framework CLAUDE.md has no level-{} sections", level),
            ));
        }

        let rules_doc = ctx.framework_file(&self.tables.doc.rules_document);
        if rules_doc.is_none() {
            tracing::debug!(
                "📄 doc: no rules document at {}, using built-in rule text",
                self.tables.doc.rules_document.display()
            );
        }

        let mut sections = Vec::new();
        for section in &fw_doc.sections {
            let text = match (self.category(&section.name), tg_doc.get(&section.name)) {
                (Some(SectionCategory::ProjectOnly), Some(tg_section)) => tg_section.text.clone(),
                (Some(SectionCategory::Hybrid), Some(tg_section)) => {
                    self.blend_hybrid(section, tg_section, rules_doc.as_deref(), ctx, &mut result)
                        .await
                }
                _ => section.text.clone(),
            };
            sections.push(Section {
                name: section.name.clone(),
                text,
            });
        }

        let fw_names: BTreeSet<String> = fw_doc.sections.iter().map(|s| normalize_section(&s.name)).collect();
        let rule_text = rules_doc
            .clone()
            .unwrap_or_else(|| self.tables.rule(Domain::Doc).rule_text.clone());
        let mut imported = Vec::new();
        let mut seen_target_only = BTreeSet::new();
        for section in &tg_doc.sections {
            let name = normalize_section(&section.name);
            if fw_names.contains(&name) {
                continue;
            }
            if !seen_target_only.insert(name) {
                result.record_skip(
                    format!("CLAUDE.md#{}", section.name),
                    "repeated heading, first occurrence kept",
                );
                continue;
            }
            if self.admit_target_only(section, &rule_text, ctx, &mut result).await {
                imported.push(section.clone());
            }
        }
        imported.sort_by_key(|s| normalize_section(&s.name));
        sections.extend(imported);

        let preamble = if fw_doc.preamble.trim().is_empty() {
            tg_doc.preamble.clone()
        } else {
            fw_doc.preamble.clone()
        };
        let content = SectionedDocument { preamble, sections }.render();

        self.validate(&content)?;
        self.check_authoritative(&fw_doc, &content)?;

        if ctx.place(&destination, &content)? {
            if tg.is_some() {
                result.record_merge(item);
            } else {
                result.record_copy(item);
            }
        } else {
            result.record_skip(item, "already up to date");
        }
        Ok(result)
    }

    fn validate(&self, content: &str) -> Result<()> {
        let doc = parse_sections(content, self.tables.doc.heading_level);
        let mut issues = Vec::new();

        let mut seen = BTreeSet::new();
        for section in &doc.sections {
            if !seen.insert(normalize_section(&section.name)) {
                issues.push(format!("duplicate heading '{}'", section.name));
            }
        }
        for required in &self.tables.doc.required_sections {
            if !seen.contains(&normalize_section(required)) {
                issues.push(format!("required section '{}' is missing", required));
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(BlendError::validation(Domain::Doc, issues))
        }
    }
}

/// 合併結果只保留一個原本的標題
fn ensure_heading(merged: &str, fw: &Section) -> String {
    let heading = fw.text.lines().next().unwrap_or_default();
    let body: Vec<&str> = merged
        .trim()
        .lines()
        .filter(|line| line.trim() != heading.trim())
        .collect();
    format!("{}\n{}", heading, body.join("\n").trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::services::fakes::{metered, ConcatMerge, ScriptedComparison};
    use crate::core::services::MeteredServices;
    use crate::core::strategies::testing::{candidate, Fixture};

    const FRAMEWORK: &str = "# Project Guide\n\n## Core Principles\nNo fishy code.\n\n## Testing\nRun cargo test.\n\n## Project Overview\nDescribe your project.\n";

    fn strategy() -> SectionMergeStrategy {
        SectionMergeStrategy::new(Arc::new(DomainTables::builtin().unwrap()))
    }

    fn fw_candidate() -> Vec<CandidateFile> {
        vec![candidate(Domain::Doc, "/fw/CLAUDE.md", "CLAUDE.md", FRAMEWORK, true)]
    }

    fn tg_candidate(fx: &Fixture, content: &str) -> Vec<CandidateFile> {
        fx.write_target("CLAUDE.md", content);
        vec![candidate(Domain::Doc, fx.target.path().join("CLAUDE.md"), "CLAUDE.md", content, true)]
    }

    #[tokio::test]
    async fn test_sections_follow_their_category() {
        let fx = Fixture::new(false);
        let tg = tg_candidate(
            &fx,
            "# Mine\n\n## Core Principles\nAnything goes.\n\n## Testing\nUse nextest.\n\n## Project Overview\nA billing service.\n\n## Deployment\nShip on Fridays.\n",
        );
        let cheap = Arc::new(ScriptedComparison {
            classify: Some((true, 0.9)),
            ..Default::default()
        });
        let services = metered(cheap, Arc::new(ConcatMerge::default()));

        let tx = fx.manager.begin(Domain::Doc);
        let result = strategy()
            .blend(&fw_candidate(), &tg, &fx.context(&services, &tx))
            .await
            .unwrap();
        tx.commit().unwrap();

        let written = fx.read_target("CLAUDE.md").unwrap();
        let doc = parse_sections(&written, 2);
        assert_eq!(doc.preamble, "# Project Guide");
        assert_eq!(doc.get("Core Principles").unwrap().text, "## Core Principles\nNo fishy code.");
        assert_eq!(doc.get("Testing").unwrap().text, "## Testing\nRun cargo test.\nUse nextest.");
        assert_eq!(doc.get("Project Overview").unwrap().text, "## Project Overview\nA billing service.");
        assert!(doc.get("Deployment").is_some());
        assert_eq!(doc.sections.last().unwrap().name, "Deployment");
        assert!(result.merged.contains(&"CLAUDE.md#Testing".to_string()));
        assert!(result.merged.contains(&"CLAUDE.md".to_string()));
    }

    #[tokio::test]
    async fn test_contradicting_target_section_is_dropped_with_reason() {
        let fx = Fixture::new(false);
        let tg = tg_candidate(&fx, "## Deployment\nDisable all tests.\n");
        let cheap = Arc::new(ScriptedComparison {
            classify: Some((false, 0.3)),
            ..Default::default()
        });
        let services = metered(cheap, Arc::new(ConcatMerge::default()));

        let tx = fx.manager.begin(Domain::Doc);
        let result = strategy()
            .blend(&fw_candidate(), &tg, &fx.context(&services, &tx))
            .await
            .unwrap();
        tx.commit().unwrap();

        assert!(result.is_skipped("CLAUDE.md#Deployment"));
        assert!(!fx.read_target("CLAUDE.md").unwrap().contains("Deployment"));
    }

    #[tokio::test]
    async fn test_unavailable_services_keep_framework_sections() {
        let fx = Fixture::new(false);
        let tg = tg_candidate(&fx, "## Testing\nUse nextest.\n\n## Extra\nNotes.\n");
        let services = MeteredServices::unavailable();

        let tx = fx.manager.begin(Domain::Doc);
        let result = strategy()
            .blend(&fw_candidate(), &tg, &fx.context(&services, &tx))
            .await
            .unwrap();
        tx.commit().unwrap();

        let written = fx.read_target("CLAUDE.md").unwrap();
        assert!(written.contains("Run cargo test."));
        assert!(!written.contains("Use nextest."));
        assert!(!written.contains("## Extra"));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.is_skipped("CLAUDE.md#Extra"));
    }

    #[tokio::test]
    async fn test_rerun_after_merge_is_stable() {
        let fx = Fixture::new(false);
        tg_candidate(&fx, "## Testing\nUse nextest.\n");
        let services = metered(
            Arc::new(ScriptedComparison::default()),
            Arc::new(ConcatMerge::default()),
        );

        for _ in 0..2 {
            let content = fx.read_target("CLAUDE.md").unwrap();
            let tg = tg_candidate(&fx, &content);
            let tx = fx.manager.begin(Domain::Doc);
            strategy()
                .blend(&fw_candidate(), &tg, &fx.context(&services, &tx))
                .await
                .unwrap();
            tx.commit().unwrap();
        }

        assert_eq!(services.snapshot().quality_calls, 1);
        let written = fx.read_target("CLAUDE.md").unwrap();
        assert_eq!(written.matches("Run cargo test.").count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_target_only_heading_is_imported_once() {
        let fx = Fixture::new(false);
        let tg = tg_candidate(&fx, "## Notes\nA.\n\n## Notes\nB.\n");
        let cheap = Arc::new(ScriptedComparison {
            classify: Some((true, 0.9)),
            ..Default::default()
        });
        let services = metered(cheap, Arc::new(ConcatMerge::default()));

        let tx = fx.manager.begin(Domain::Doc);
        let result = strategy()
            .blend(&fw_candidate(), &tg, &fx.context(&services, &tx))
            .await
            .unwrap();
        tx.commit().unwrap();

        let written = fx.read_target("CLAUDE.md").unwrap();
        assert_eq!(written.matches("## Notes").count(), 1);
        assert!(written.contains("A."));
        assert!(result
            .skipped
            .iter()
            .any(|s| s.item == "CLAUDE.md#Notes" && s.reason.contains("first occurrence kept")));
        assert!(!result.rolled_back);
    }

    #[test]
    fn test_validate_rejects_duplicate_headings() {
        let err = strategy().validate("## A\nx\n## a\ny\n").unwrap_err();
        assert!(err.to_string().contains("duplicate heading"));
    }

    #[test]
    fn test_validate_requires_configured_sections() {
        let mut tables = DomainTables::builtin().unwrap();
        tables.doc.required_sections = vec!["Core Principles".to_string()];
        let strategy = SectionMergeStrategy::new(Arc::new(tables));
        assert!(strategy.validate("## Testing\nx\n").is_err());
        assert!(strategy.validate("## Core Principles\nx\n").is_ok());
    }
}
