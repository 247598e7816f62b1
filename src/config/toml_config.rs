use crate::config::tables::{normalize_section, DomainTables, SectionCategory};
use crate::core::services::Pricing;
use crate::domain::model::{Domain, Phase};
use crate::utils::error::{BlendError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_regex, validate_relative_path, validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// 混合工具的 TOML 設定；每個區段皆可省略
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlendConfig {
    pub run: Option<RunSection>,
    pub services: Option<ServicesSection>,
    pub thresholds: Option<HashMap<String, f64>>,
    pub identifiers: Option<HashMap<String, String>>,
    pub sections: Option<SectionsSection>,
    pub memories: Option<MemoriesSection>,
    pub examples: Option<ExamplesSection>,
    pub settings: Option<SettingsSection>,
    pub doc: Option<DocSection>,
    pub classifier: Option<ClassifierSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSection {
    pub framework_root: Option<String>,
    pub target_root: Option<String>,
    pub dry_run: Option<bool>,
    pub phases: Option<Vec<String>>,
    pub domains: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesSection {
    pub cheap_endpoint: Option<String>,
    pub quality_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub cheap_input_cost_per_million: Option<f64>,
    pub cheap_output_cost_per_million: Option<f64>,
    pub quality_input_cost_per_million: Option<f64>,
    pub quality_output_cost_per_million: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionsSection {
    pub authoritative: Option<Vec<String>>,
    pub hybrid: Option<Vec<String>>,
    pub project_only: Option<Vec<String>>,
    /// true 時以設定檔取代內建表，否則合併
    pub replace_builtin: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoriesSection {
    pub critical: Option<Vec<String>>,
    pub authoritative_fields: Option<Vec<String>>,
    pub tag_fields: Option<Vec<String>>,
    pub skip_similarity: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExamplesSection {
    pub similarity_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsSection {
    pub lists: Option<Vec<String>>,
    pub exclusion_list: Option<String>,
    pub ordered_lists: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocSection {
    pub rules_document: Option<String>,
    pub required_sections: Option<Vec<String>>,
    pub import_confidence: Option<f64>,
    pub heading_level: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierSection {
    pub escalation_threshold: Option<f64>,
    pub excerpt_chars: Option<usize>,
}

impl BlendConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(BlendError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| BlendError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${BLEND_API_KEY})
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = validate_regex("env_pattern", r"\$\{([^}]+)\}")?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn framework_root(&self) -> Option<PathBuf> {
        self.run
            .as_ref()
            .and_then(|r| r.framework_root.as_ref())
            .map(PathBuf::from)
    }

    pub fn target_root(&self) -> Option<PathBuf> {
        self.run
            .as_ref()
            .and_then(|r| r.target_root.as_ref())
            .map(PathBuf::from)
    }

    pub fn dry_run(&self) -> bool {
        self.run.as_ref().and_then(|r| r.dry_run).unwrap_or(false)
    }

    pub fn phases(&self) -> Result<Option<Vec<Phase>>> {
        let Some(names) = self.run.as_ref().and_then(|r| r.phases.as_ref()) else {
            return Ok(None);
        };
        names
            .iter()
            .map(|n| {
                n.parse::<Phase>().map_err(|reason| BlendError::InvalidConfigValueError {
                    field: "run.phases".to_string(),
                    value: n.clone(),
                    reason,
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    pub fn domains(&self) -> Result<Option<Vec<Domain>>> {
        let Some(names) = self.run.as_ref().and_then(|r| r.domains.as_ref()) else {
            return Ok(None);
        };
        names
            .iter()
            .map(|n| parse_domain("run.domains", n))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    pub fn services(&self) -> ServicesSection {
        self.services.clone().unwrap_or_default()
    }

    pub fn pricing(&self) -> Pricing {
        let defaults = Pricing::default();
        let Some(s) = self.services.as_ref() else {
            return defaults;
        };
        Pricing {
            cheap_input_per_million: s
                .cheap_input_cost_per_million
                .unwrap_or(defaults.cheap_input_per_million),
            cheap_output_per_million: s
                .cheap_output_cost_per_million
                .unwrap_or(defaults.cheap_output_per_million),
            quality_input_per_million: s
                .quality_input_cost_per_million
                .unwrap_or(defaults.quality_input_per_million),
            quality_output_per_million: s
                .quality_output_cost_per_million
                .unwrap_or(defaults.quality_output_per_million),
        }
    }

    /// 以內建表為基礎套用設定覆寫
    pub fn tables(&self) -> Result<DomainTables> {
        let mut tables = DomainTables::builtin()?;

        if let Some(thresholds) = &self.thresholds {
            for (name, value) in thresholds {
                let domain = parse_domain("thresholds", name)?;
                if let Some(rule) = tables.rules.get_mut(&domain) {
                    rule.threshold = *value;
                }
            }
        }

        if let Some(identifiers) = &self.identifiers {
            for (name, pattern) in identifiers {
                let domain = parse_domain("identifiers", name)?;
                let regex = validate_regex(&format!("identifiers.{}", name), pattern)?;
                if let Some(rule) = tables.rules.get_mut(&domain) {
                    rule.identifier = regex;
                }
            }
        }

        if let Some(sections) = &self.sections {
            if sections.replace_builtin.unwrap_or(false) {
                tables.sections = BTreeMap::new();
            }
            let groups = [
                (&sections.authoritative, SectionCategory::Authoritative),
                (&sections.hybrid, SectionCategory::Hybrid),
                (&sections.project_only, SectionCategory::ProjectOnly),
            ];
            for (names, category) in groups {
                for name in names.iter().flatten() {
                    tables.sections.insert(normalize_section(name), category);
                }
            }
        }

        if let Some(memories) = &self.memories {
            if let Some(critical) = &memories.critical {
                tables.memories.critical = critical.iter().cloned().collect();
            }
            if let Some(fields) = &memories.authoritative_fields {
                tables.memories.authoritative_fields = fields.iter().cloned().collect();
            }
            if let Some(fields) = &memories.tag_fields {
                tables.memories.tag_fields = fields.iter().cloned().collect();
            }
            if let Some(score) = memories.skip_similarity {
                tables.memories.skip_similarity = score;
            }
        }

        if let Some(threshold) = self.examples.as_ref().and_then(|e| e.similarity_threshold) {
            tables.example_similarity_threshold = threshold;
        }

        if let Some(settings) = &self.settings {
            if let Some(lists) = &settings.lists {
                tables.settings.lists = lists.clone();
            }
            if let Some(exclusion) = &settings.exclusion_list {
                tables.settings.exclusion_list = exclusion.clone();
            }
            if let Some(ordered) = &settings.ordered_lists {
                tables.settings.ordered_lists = ordered.iter().cloned().collect();
            }
        }

        if let Some(doc) = &self.doc {
            if let Some(path) = &doc.rules_document {
                tables.doc.rules_document = PathBuf::from(path);
            }
            if let Some(required) = &doc.required_sections {
                tables.doc.required_sections = required.clone();
            }
            if let Some(confidence) = doc.import_confidence {
                tables.doc.import_confidence = confidence;
            }
            if let Some(level) = doc.heading_level {
                tables.doc.heading_level = level;
            }
        }

        if let Some(classifier) = &self.classifier {
            if let Some(threshold) = classifier.escalation_threshold {
                tables.escalation_threshold = threshold;
            }
            if let Some(chars) = classifier.excerpt_chars {
                tables.excerpt_chars = chars;
            }
        }

        Ok(tables)
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        if let Some(run) = &self.run {
            if let Some(root) = &run.framework_root {
                validate_path("run.framework_root", root)?;
            }
            if let Some(root) = &run.target_root {
                validate_path("run.target_root", root)?;
            }
        }
        self.phases()?;
        self.domains()?;

        if let Some(services) = &self.services {
            if let Some(endpoint) = &services.cheap_endpoint {
                validate_url("services.cheap_endpoint", endpoint)?;
            }
            if let Some(endpoint) = &services.quality_endpoint {
                validate_url("services.quality_endpoint", endpoint)?;
            }
            if let Some(key) = &services.api_key {
                validate_non_empty_string("services.api_key", key)?;
            }
            if let Some(timeout) = services.timeout_seconds {
                validate_positive_number("services.timeout_seconds", timeout, 1)?;
            }
        }

        if let Some(thresholds) = &self.thresholds {
            for (name, value) in thresholds {
                validate_range(&format!("thresholds.{}", name), *value, 0.0, 1.0)?;
            }
        }
        if let Some(score) = self.memories.as_ref().and_then(|m| m.skip_similarity) {
            validate_range("memories.skip_similarity", score, 0.0, 100.0)?;
        }
        if let Some(threshold) = self.examples.as_ref().and_then(|e| e.similarity_threshold) {
            validate_range("examples.similarity_threshold", threshold, 0.0, 1.0)?;
        }
        if let Some(doc) = &self.doc {
            if let Some(path) = &doc.rules_document {
                validate_relative_path("doc.rules_document", path)?;
            }
            if let Some(confidence) = doc.import_confidence {
                validate_range("doc.import_confidence", confidence, 0.0, 1.0)?;
            }
            if let Some(level) = doc.heading_level {
                validate_range("doc.heading_level", level, 1, 6)?;
            }
        }
        if let Some(threshold) = self
            .classifier
            .as_ref()
            .and_then(|c| c.escalation_threshold)
        {
            validate_range("classifier.escalation_threshold", threshold, 0.0, 1.0)?;
        }

        // 識別樣式須可編譯
        self.tables().map(|_| ())
    }
}

fn parse_domain(field: &str, name: &str) -> Result<Domain> {
    name.parse::<Domain>()
        .map_err(|reason| BlendError::InvalidConfigValueError {
            field: field.to_string(),
            value: name.to_string(),
            reason,
        })
}

impl Validate for BlendConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
