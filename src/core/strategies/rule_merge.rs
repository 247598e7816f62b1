use crate::config::tables::{DomainTables, SettingsRules};
use crate::core::strategies::{prefer_standard, BlendContext, BlendStrategy};
use crate::domain::model::{BlendResult, CandidateFile, Domain};
use crate::utils::error::{BlendError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const PERMISSIONS: &str = "permissions";

/// 權限清單合併：排除、聯集、單一歸屬，框架優先
pub struct RuleMergeStrategy {
    tables: Arc<DomainTables>,
}

impl RuleMergeStrategy {
    pub fn new(tables: Arc<DomainTables>) -> Self {
        Self { tables }
    }

    fn rules(&self) -> &SettingsRules {
        &self.tables.settings
    }

    /// 合併兩份設定；純函式，不碰檔案
    pub fn merge_settings(&self, framework: &Value, target: &Value) -> Result<Value> {
        let rules = self.rules();
        let fw_obj = as_object(framework, "framework settings")?;
        let tg_obj = as_object(target, "target settings")?;
        let fw_perms = permissions_of(fw_obj, "framework")?;
        let tg_perms = permissions_of(tg_obj, "target")?;

        let mut fw_lists = BTreeMap::new();
        let mut tg_lists = BTreeMap::new();
        for name in &rules.lists {
            fw_lists.insert(name.clone(), string_list(&fw_perms, name, "framework")?);
            tg_lists.insert(name.clone(), string_list(&tg_perms, name, "target")?);
        }

        // 框架項目的歸屬；框架自己重複列出時同樣取最嚴格的清單
        let mut owner: BTreeMap<String, String> = BTreeMap::new();
        for name in &rules.lists {
            for entry in &fw_lists[name] {
                let keep = match owner.get(entry) {
                    Some(current) if self.restrictiveness(current) >= self.restrictiveness(name) => {
                        current.clone()
                    }
                    _ => name.clone(),
                };
                owner.insert(entry.clone(), keep);
            }
        }

        // 只出現在目標中的項目：留在最嚴格的清單
        let mut target_owner: BTreeMap<String, String> = BTreeMap::new();
        for name in &rules.lists {
            for entry in &tg_lists[name] {
                if owner.contains_key(entry) {
                    continue;
                }
                let keep = match target_owner.get(entry) {
                    Some(current) if self.restrictiveness(current) >= self.restrictiveness(name) => {
                        current.clone()
                    }
                    _ => name.clone(),
                };
                target_owner.insert(entry.clone(), keep);
            }
        }

        let mut merged_lists = Map::new();
        for name in &rules.lists {
            let mut entries: Vec<String> = Vec::new();
            let mut seen = BTreeSet::new();
            for entry in &fw_lists[name] {
                if owner.get(entry) == Some(name) && seen.insert(entry.clone()) {
                    entries.push(entry.clone());
                }
            }
            for entry in &tg_lists[name] {
                let belongs = match owner.get(entry) {
                    Some(fw_list) => fw_list == name,
                    None => target_owner.get(entry) == Some(name),
                };
                if belongs && seen.insert(entry.clone()) {
                    entries.push(entry.clone());
                }
            }
            if !rules.ordered_lists.contains(name) {
                entries.sort();
            }
            merged_lists.insert(
                name.clone(),
                Value::Array(entries.into_iter().map(Value::String).collect()),
            );
        }

        let mut permissions = tg_perms.clone();
        for (key, value) in &fw_perms {
            permissions.insert(key.clone(), value.clone());
        }
        for (key, value) in merged_lists {
            permissions.insert(key, value);
        }

        let mut out = tg_obj.clone();
        for (key, value) in fw_obj {
            out.insert(key.clone(), value.clone());
        }
        out.insert(PERMISSIONS.to_string(), Value::Object(permissions));

        Ok(sort_keys(Value::Object(out)))
    }

    /// 排除清單最嚴格，其次是保留順序的清單（ask）
    fn restrictiveness(&self, list: &str) -> u8 {
        let rules = self.rules();
        if list == rules.exclusion_list {
            2
        } else if rules.ordered_lists.contains(list) {
            1
        } else {
            0
        }
    }

    pub fn render(value: &Value) -> Result<String> {
        let mut text = serde_json::to_string_pretty(value)?;
        text.push('\n');
        Ok(text)
    }
}

#[async_trait]
impl BlendStrategy for RuleMergeStrategy {
    fn name(&self) -> &'static str {
        "rule-merge"
    }

    fn can_handle(&self, domain: Domain) -> bool {
        domain == Domain::Settings
    }

    async fn blend(
        &self,
        framework: &[CandidateFile],
        target: &[CandidateFile],
        ctx: &BlendContext<'_>,
    ) -> Result<BlendResult> {
        let mut result = BlendResult::new(Domain::Settings);
        let destination = ctx.layout.standard_path(Domain::Settings);
        let item = ctx.display_path(&destination);

        let Some(fw) = framework.first() else {
            result.record_skip(item, "framework has no settings");
            return Ok(result);
        };
        let fw_value: Value = serde_json::from_str(&fw.content).map_err(|e| {
            BlendError::strategy(Domain::Settings, format!("framework settings are not valid JSON: {}", e))
        })?;

        let targets: Vec<&CandidateFile> = target.iter().collect();
        let tg = prefer_standard(&targets);
        let tg_value: Value = match tg {
            Some(tg) => serde_json::from_str(&tg.content).map_err(|e| {
                BlendError::strategy(
                    Domain::Settings,
                    format!("{} is not valid JSON: {}", tg.path.display(), e),
                )
            })?,
            None => Value::Object(Map::new()),
        };

        let merged = self.merge_settings(&fw_value, &tg_value)?;
        let content = Self::render(&merged)?;
        self.validate(&content)?;

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
        let rules = self.rules();
        let value: Value = serde_json::from_str(content).map_err(|e| {
            BlendError::validation(Domain::Settings, vec![format!("not valid JSON: {}", e)])
        })?;

        let mut issues = Vec::new();
        let Some(permissions) = value.get(PERMISSIONS).and_then(Value::as_object) else {
            return Err(BlendError::validation(
                Domain::Settings,
                vec!["missing permissions object".to_string()],
            ));
        };

        let mut membership: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for name in &rules.lists {
            match permissions.get(name).and_then(Value::as_array) {
                Some(entries) => {
                    for entry in entries {
                        match entry.as_str() {
                            Some(entry) => membership.entry(entry).or_default().push(name),
                            None => issues.push(format!("{} contains a non-string entry: {}", name, entry)),
                        }
                    }
                }
                None => issues.push(format!("permissions.{} is missing or not a list", name)),
            }
        }
        for (entry, lists) in membership {
            if lists.len() > 1 {
                issues.push(format!("'{}' appears in more than one list: {}", entry, lists.join(", ")));
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(BlendError::validation(Domain::Settings, issues))
        }
    }
}

fn as_object<'v>(value: &'v Value, what: &str) -> Result<&'v Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| BlendError::strategy(Domain::Settings, format!("{} must be a JSON object", what)))
}

fn permissions_of(obj: &Map<String, Value>, side: &str) -> Result<Map<String, Value>> {
    match obj.get(PERMISSIONS) {
        None => Ok(Map::new()),
        Some(Value::Object(perms)) => Ok(perms.clone()),
        Some(other) => Err(BlendError::strategy(
            Domain::Settings,
            format!("{} permissions must be an object, found {}", side, other),
        )),
    }
}

fn string_list(perms: &Map<String, Value>, name: &str, side: &str) -> Result<Vec<String>> {
    match perms.get(name) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    BlendError::strategy(
                        Domain::Settings,
                        format!("{} permissions.{} has a non-string entry: {}", side, name, item),
                    )
                })
            })
            .collect(),
        Some(other) => Err(BlendError::strategy(
            Domain::Settings,
            format!("{} permissions.{} must be a list, found {}", side, name, other),
        )),
    }
}

/// 遞迴依鍵排序，輸出穩定
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
