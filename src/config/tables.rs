use crate::domain::model::Domain;
use crate::utils::error::Result;
use crate::utils::validation::validate_regex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// 單一領域的結構判定規則
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub identifier: Regex,
    pub expected_sections: Vec<String>,
    pub min_length: usize,
    pub threshold: f64,
    pub rule_text: String,
}

impl ClassificationRule {
    fn new(
        identifier: &str,
        expected_sections: &[&str],
        min_length: usize,
        threshold: f64,
        rule_text: &str,
    ) -> Result<Self> {
        Ok(Self {
            identifier: validate_regex("identifier", identifier)?,
            expected_sections: expected_sections.iter().map(|s| s.to_string()).collect(),
            min_length,
            threshold,
            rule_text: rule_text.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionCategory {
    Authoritative,
    Hybrid,
    ProjectOnly,
}

#[derive(Debug, Clone)]
pub struct MemoryRules {
    /// 永遠只保留框架版本的檔名
    pub critical: BTreeSet<String>,
    pub authoritative_fields: BTreeSet<String>,
    pub tag_fields: BTreeSet<String>,
    /// 相似度高於此值（0-100）時跳過目標版本
    pub skip_similarity: f64,
}

#[derive(Debug, Clone)]
pub struct SettingsRules {
    pub lists: Vec<String>,
    pub exclusion_list: String,
    /// 保留宣告順序的清單；其他清單排序輸出
    pub ordered_lists: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct DocRules {
    pub heading_level: usize,
    /// 相對於框架根目錄
    pub rules_document: PathBuf,
    pub required_sections: Vec<String>,
    pub import_confidence: f64,
}

/// 執行期間不可變的領域設定表，於建構 Orchestrator 時注入
#[derive(Debug, Clone)]
pub struct DomainTables {
    pub rules: BTreeMap<Domain, ClassificationRule>,
    pub sections: BTreeMap<String, SectionCategory>,
    pub memories: MemoryRules,
    pub settings: SettingsRules,
    pub doc: DocRules,
    pub example_similarity_threshold: f64,
    pub escalation_threshold: f64,
    pub excerpt_chars: usize,
}

impl DomainTables {
    pub fn rule(&self, domain: Domain) -> &ClassificationRule {
        self.rules
            .get(&domain)
            .unwrap_or_else(|| unreachable!("tables are built with a rule for every domain"))
    }

    pub fn threshold(&self, domain: Domain) -> f64 {
        self.rule(domain).threshold
    }

    pub fn section_category(&self, name: &str) -> Option<SectionCategory> {
        self.sections.get(&normalize_section(name)).copied()
    }

    pub fn builtin() -> Result<Self> {
        let mut rules = BTreeMap::new();
        rules.insert(
            Domain::Prps,
            ClassificationRule::new(
                r"(?im)(^#.*\bPRP\b|^prp[_-]?id\s*:|\bPRP-\d+)",
                &["Goal", "Why", "What", "Implementation", "Validation"],
                200,
                0.6,
                "A PRP (product requirements prompt) is a markdown document that names a PRP identifier and describes a feature through Goal, Why, What, an implementation blueprint and validation gates.",
            )?,
        );
        rules.insert(
            Domain::Examples,
            ClassificationRule::new(
                r"(?m)(^```|^#|\b(fn|def|function|class|import|impl)\b)",
                &[],
                50,
                0.5,
                "An example is a self-contained reference snippet or annotated code sample that shows a pattern to follow.",
            )?,
        );
        rules.insert(
            Domain::Memories,
            ClassificationRule::new(
                r"(?m)^\s*(#|---|[-*] |\w)",
                &[],
                40,
                0.5,
                "A memory is a free-form markdown note recording project knowledge, conventions or checklists.",
            )?,
        );
        rules.insert(
            Domain::Commands,
            ClassificationRule::new(
                r"(?im)(^---\s*$|^#\s+\S|^description\s*:)",
                &[],
                20,
                0.5,
                "A command is a markdown slash-command definition, usually with front matter and a description.",
            )?,
        );
        rules.insert(
            Domain::Settings,
            ClassificationRule::new(
                r#""permissions"\s*:"#,
                &[],
                10,
                0.5,
                "Settings are a JSON object with a permissions object holding allow, deny and ask lists.",
            )?,
        );
        rules.insert(
            Domain::Doc,
            ClassificationRule::new(
                r"(?m)^#{1,6}\s+\S",
                &[],
                100,
                0.5,
                "The project guide is a markdown document split into level-two sections of rules and project notes.",
            )?,
        );

        let mut sections = BTreeMap::new();
        for name in [
            "Core Principles",
            "Framework Rules",
            "Quick Commands",
            "Tool Usage",
            "Validation Gates",
        ] {
            sections.insert(normalize_section(name), SectionCategory::Authoritative);
        }
        for name in ["Project Structure", "Testing", "Code Style", "Development Commands"] {
            sections.insert(normalize_section(name), SectionCategory::Hybrid);
        }
        for name in ["Project Overview", "Project Notes", "Team Conventions"] {
            sections.insert(normalize_section(name), SectionCategory::ProjectOnly);
        }

        Ok(Self {
            rules,
            sections,
            memories: MemoryRules {
                critical: [
                    "code-style-conventions.md",
                    "suggested-commands.md",
                    "task-completion-checklist.md",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
                authoritative_fields: ["type", "category", "version", "framework"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                tag_fields: ["tags", "keywords", "related"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                skip_similarity: 90.0,
            },
            settings: SettingsRules {
                lists: vec!["allow".to_string(), "deny".to_string(), "ask".to_string()],
                exclusion_list: "deny".to_string(),
                ordered_lists: ["ask".to_string()].into_iter().collect(),
            },
            doc: DocRules {
                heading_level: 2,
                rules_document: PathBuf::from(".ce/RULES.md"),
                required_sections: Vec::new(),
                import_confidence: 0.7,
            },
            example_similarity_threshold: 0.9,
            escalation_threshold: 0.9,
            excerpt_chars: 500,
        })
    }
}

pub fn normalize_section(name: &str) -> String {
    name.trim().to_lowercase()
}
