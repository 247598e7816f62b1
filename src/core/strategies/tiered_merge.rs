use crate::config::tables::{DomainTables, MemoryRules};
use crate::core::markdown::{
    has_unterminated_front_matter, join_front_matter, split_front_matter, FieldValue, FrontMatter,
};
use crate::core::strategies::{carries, incorporates, prefer_standard, BlendContext, BlendStrategy};
use crate::domain::model::{BlendResult, CandidateFile, Conflict, Domain, Resolution};
use crate::domain::ports::MergeRequest;
use crate::utils::error::{BlendError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

const MEMORY_INSTRUCTIONS: &str = "Combine these two notes on the same topic. Keep the framework note's structure and headings, keep every framework statement, and fold in the complementary project details from the target note. Return markdown only, without front matter.";

const ORIGIN_FIELD: &str = "origin";
const USER_ORIGIN: &str = "user";

/// 單一記憶項目的決定
enum Outcome {
    /// 寫入內容；`merged` 表示經過合併服務
    Write { content: String, merged: bool },
    /// 保留某一版本並記錄跳過的理由
    Keep { content: String, reason: String },
    /// 目的地已經是混合結果
    Unchanged(String),
}

/// 依成本分層：關鍵清單 → 相同 → 相似度 → 矛盾 → 高品質合併
pub struct TieredMergeStrategy {
    tables: Arc<DomainTables>,
}

impl TieredMergeStrategy {
    pub fn new(tables: Arc<DomainTables>) -> Self {
        Self { tables }
    }

    fn rules(&self) -> &MemoryRules {
        &self.tables.memories
    }

    async fn decide(
        &self,
        key: &str,
        fw: &CandidateFile,
        tg: Option<&CandidateFile>,
        ctx: &BlendContext<'_>,
    ) -> Result<Outcome> {
        if self.rules().critical.contains(key) {
            return Ok(Outcome::Keep {
                content: fw.content.clone(),
                reason: "critical memory, framework version only".to_string(),
            });
        }
        let Some(tg) = tg else {
            return Ok(Outcome::Write {
                content: fw.content.clone(),
                merged: false,
            });
        };
        if tg.content == fw.content {
            return Ok(Outcome::Keep {
                content: fw.content.clone(),
                reason: "identical to framework".to_string(),
            });
        }

        let (fw_meta, fw_body) = split_front_matter(&fw.content);
        let (tg_meta, tg_body) = split_front_matter(&tg.content);
        if tg.standard && incorporates(tg_body, fw_body) {
            return Ok(Outcome::Unchanged("already blended".to_string()));
        }

        let score = ctx.services.similarity(&fw.content, &tg.content).await? * 100.0;
        if score > self.rules().skip_similarity {
            return Ok(Outcome::Keep {
                content: fw.content.clone(),
                reason: format!("similarity {:.0} > {:.0}, framework kept", score, self.rules().skip_similarity),
            });
        }

        let verdict = ctx.services.contradiction(fw_body, tg_body, None).await?;
        if verdict.contradicts {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "target contradicts framework".to_string());
            let conflict = Conflict {
                domain: Domain::Memories,
                item: key.to_string(),
                framework: fw.content.clone(),
                target: tg.content.clone(),
                reason: reason.clone(),
            };
            tracing::info!("⚔️ memories: conflict on {}: {}", key, reason);
            return Ok(match ctx.resolve(&conflict) {
                Resolution::KeepFramework => Outcome::Keep {
                    content: fw.content.clone(),
                    reason: format!("contradiction, framework kept: {}", reason),
                },
                Resolution::KeepTarget => Outcome::Keep {
                    content: tg.content.clone(),
                    reason: format!("contradiction, target kept: {}", reason),
                },
            });
        }

        let merged_body = ctx
            .services
            .merge(MergeRequest {
                framework: fw_body,
                target: tg_body,
                instructions: MEMORY_INSTRUCTIONS,
                rules: None,
            })
            .await?;
        let meta = blend_metadata(fw_meta.as_ref(), tg_meta.as_ref(), self.rules());
        let mut body = merged_body.trim().to_string();
        body.push('\n');
        Ok(Outcome::Write {
            content: join_front_matter(meta.as_ref(), &body),
            merged: true,
        })
    }
}

#[async_trait]
impl BlendStrategy for TieredMergeStrategy {
    fn name(&self) -> &'static str {
        "tiered-merge"
    }

    fn can_handle(&self, domain: Domain) -> bool {
        domain == Domain::Memories
    }

    async fn blend(
        &self,
        framework: &[CandidateFile],
        target: &[CandidateFile],
        ctx: &BlendContext<'_>,
    ) -> Result<BlendResult> {
        let mut result = BlendResult::new(Domain::Memories);

        let mut by_key: BTreeMap<String, Vec<&CandidateFile>> = BTreeMap::new();
        for item in target {
            by_key.entry(item.file_name()).or_default().push(item);
        }

        for fw in framework {
            let key = fw.file_name();
            let items: &[&CandidateFile] = by_key.get(&key).map(Vec::as_slice).unwrap_or_default();
            let tg = prefer_standard(items);
            let destination = ctx.layout.target_destination(Domain::Memories, &fw.relative, &fw.content);

            let outcome = match self.decide(&key, fw, tg, ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    result.record_error(&key, e.to_string());
                    continue;
                }
            };

            match outcome {
                Outcome::Write { content, merged } => {
                    self.validate(&content)?;
                    if !ctx.place(&destination, &content)? {
                        result.record_skip(&key, "already up to date");
                    } else if merged {
                        result.record_merge(&key);
                    } else {
                        result.record_copy(&key);
                    }
                    if let Some(tg) = tg.filter(|c| merged && !c.standard) {
                        result.record_absorbed(tg.path.clone());
                    }
                }
                Outcome::Keep { content, reason } => {
                    let reason = match tg.filter(|c| c.content != content) {
                        Some(dropped) => {
                            let saved = ctx.keep_superseded(Domain::Memories, &dropped.relative, &dropped.content)?;
                            format!("{}; replaced version kept at {}", reason, ctx.display_path(&saved))
                        }
                        None => reason,
                    };
                    ctx.place(&destination, &content)?;
                    result.record_skip(&key, reason);
                }
                Outcome::Unchanged(reason) => result.record_skip(&key, reason),
            }

            // 同名的其他舊版檔（例如平面與巢狀兩種佈局各有一份）
            let chosen = tg.map(|c| c.path.as_path());
            for item in items.iter().filter(|c| !c.standard && Some(c.path.as_path()) != chosen) {
                let label = format!("legacy:{}", ctx.display_path(&item.path));
                if ctx.existing(&destination).is_some_and(|current| carries(&current, &item.content)) {
                    result.record_skip(label, "already blended");
                    continue;
                }
                let saved = ctx.keep_superseded(Domain::Memories, &item.relative, &item.content)?;
                result.record_skip(label, format!("superseded, kept at {}", ctx.display_path(&saved)));
            }
        }

        // 框架沒有的項目：匯入並標記來源；同名而內容不同者另存加上雜湊的檔名
        let framework_keys: Vec<String> = framework.iter().map(|f| f.file_name()).collect();
        for (key, items) in &by_key {
            if framework_keys.contains(key) {
                continue;
            }
            for item in items.iter().filter(|c| !c.standard) {
                let destination = ctx.layout.target_destination(Domain::Memories, &item.relative, &item.content);
                if ctx.existing(&destination).is_some_and(|current| carries(&current, &item.content)) {
                    result.record_skip(key, "already imported");
                    continue;
                }
                let content = tag_user_origin(&item.content);
                self.validate(&content)?;
                let (landed, written) = ctx.place_beside(&destination, &content, &item.content)?;
                let label = landed
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| key.clone());
                if written {
                    result.record_copy(label);
                } else {
                    result.record_skip(label, "already imported");
                }
            }
        }

        Ok(result)
    }

    fn validate(&self, content: &str) -> Result<()> {
        let mut issues = Vec::new();
        if has_unterminated_front_matter(content) {
            issues.push("front matter is not closed".to_string());
        }
        let (_, body) = split_front_matter(content);
        if body.trim().is_empty() {
            issues.push("memory body is empty".to_string());
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(BlendError::validation(Domain::Memories, issues))
        }
    }
}

/// 權威欄位框架優先、標籤取聯集、created 取最早、updated 取最晚；其餘共同欄位保留目標
pub fn blend_metadata(
    framework: Option<&FrontMatter>,
    target: Option<&FrontMatter>,
    rules: &MemoryRules,
) -> Option<FrontMatter> {
    let (fw, tg) = match (framework, target) {
        (None, None) => return None,
        (Some(fw), None) => return Some(fw.clone()),
        (None, Some(tg)) => return Some(tg.clone()),
        (Some(fw), Some(tg)) => (fw, tg),
    };

    let mut out = FrontMatter::default();
    let keys = fw
        .fields
        .iter()
        .chain(tg.fields.iter())
        .map(|(k, _)| k.clone());
    for key in keys {
        if out.get(&key).is_some() {
            continue;
        }
        let value = match (fw.get(&key), tg.get(&key)) {
            (Some(f), Some(t)) if rules.tag_fields.contains(&key) => {
                let mut items = f.items();
                for item in t.items() {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                FieldValue::List(items)
            }
            (Some(f), Some(t)) if key == "created" => pick_date(f, t, Ordering::Less),
            (Some(f), Some(t)) if key == "updated" => pick_date(f, t, Ordering::Greater),
            (Some(f), Some(_)) if rules.authoritative_fields.contains(&key) => f.clone(),
            (Some(_), Some(t)) => t.clone(),
            (Some(f), None) => f.clone(),
            (None, Some(t)) => t.clone(),
            (None, None) => continue,
        };
        out.set(&key, value);
    }
    Some(out)
}

fn pick_date(fw: &FieldValue, tg: &FieldValue, prefer: Ordering) -> FieldValue {
    let (Some(a), Some(b)) = (fw.as_scalar(), tg.as_scalar()) else {
        return fw.clone();
    };
    let order = match (parse_date(a), parse_date(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.cmp(b),
    };
    if order == prefer || order == Ordering::Equal {
        fw.clone()
    } else {
        tg.clone()
    }
}

fn parse_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim().trim_matches('"').trim_matches('\'');
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn tag_user_origin(content: &str) -> String {
    let (meta, body) = split_front_matter(content);
    let mut meta = meta.unwrap_or_default();
    if meta.get(ORIGIN_FIELD).is_some() {
        return content.to_string();
    }
    meta.set(ORIGIN_FIELD, FieldValue::Scalar(USER_ORIGIN.to_string()));
    join_front_matter(Some(&meta), body)
}
