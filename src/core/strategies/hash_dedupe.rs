use crate::config::tables::DomainTables;
use crate::core::strategies::{BlendContext, BlendStrategy};
use crate::domain::layout::USER_SUBFOLDER;
use crate::domain::model::{BlendResult, CandidateFile, Conflict, Domain, Resolution};
use crate::utils::error::{BlendError, Result};
use crate::utils::hashing::sha256_hex;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// 範例去重：先比雜湊（零成本），再比語意相似度
pub struct HashDedupeStrategy {
    tables: Arc<DomainTables>,
}

impl HashDedupeStrategy {
    pub fn new(tables: Arc<DomainTables>) -> Self {
        Self { tables }
    }

    /// 與任何目標項目相似度超過門檻時回傳該項目；比對失敗則略過該項（fail open）
    async fn similar_target<'t>(
        &self,
        fw: &CandidateFile,
        target: &'t [CandidateFile],
        ctx: &BlendContext<'_>,
        result: &mut BlendResult,
    ) -> Option<(&'t CandidateFile, f64)> {
        let threshold = self.tables.example_similarity_threshold;
        for item in target {
            match ctx.services.similarity(&fw.content, &item.content).await {
                Ok(score) if score > threshold => return Some((item, score)),
                Ok(_) => {}
                Err(e) => result.record_warning(format!(
                    "{}: comparison with {} failed, treating as distinct: {}",
                    fw.key(),
                    item.key(),
                    e
                )),
            }
        }
        None
    }
}

#[async_trait]
impl BlendStrategy for HashDedupeStrategy {
    fn name(&self) -> &'static str {
        "hash-dedupe"
    }

    fn can_handle(&self, domain: Domain) -> bool {
        domain == Domain::Examples
    }

    async fn blend(
        &self,
        framework: &[CandidateFile],
        target: &[CandidateFile],
        ctx: &BlendContext<'_>,
    ) -> Result<BlendResult> {
        let mut result = BlendResult::new(Domain::Examples);

        let hashes: HashMap<String, &CandidateFile> = target
            .iter()
            .map(|c| (sha256_hex(c.content.as_bytes()), c))
            .collect();

        for fw in framework {
            let key = fw.key();
            if let Some(existing) = hashes.get(&sha256_hex(fw.content.as_bytes())) {
                result.record_skip(&key, format!("identical content already in target ({})", ctx.display_path(&existing.path)));
                continue;
            }
            if let Some((similar, score)) = self.similar_target(fw, target, ctx, &mut result).await {
                result.record_skip(&key, format!("similar to {} ({:.2})", similar.key(), score));
                continue;
            }

            self.validate(&fw.content)?;
            let destination = ctx.layout.framework_destination(Domain::Examples, &fw.relative, &fw.content);
            if let Some(current) = ctx.existing(&destination) {
                let conflict = Conflict {
                    domain: Domain::Examples,
                    item: key.clone(),
                    framework: fw.content.clone(),
                    target: current,
                    reason: "unified tree already holds a different version".to_string(),
                };
                if ctx.resolve(&conflict) == Resolution::KeepTarget {
                    result.record_skip(&key, "kept existing unified version");
                    continue;
                }
            }
            ctx.write(&destination, &fw.content)?;
            result.record_copy(key);
        }

        // 舊版位置的使用者範例移到 user/ 底下；同名但內容不同時另存加上雜湊的檔名
        let user_root = ctx.layout.standard_path(Domain::Examples).join(USER_SUBFOLDER);
        for item in target.iter().filter(|c| !c.standard) {
            let destination = ctx.layout.target_destination(Domain::Examples, &item.relative, &item.content);
            self.validate(&item.content)?;
            let (landed, written) = ctx.place_beside(&destination, &item.content, &item.content)?;
            let label = format!(
                "{}/{}",
                USER_SUBFOLDER,
                landed.strip_prefix(&user_root).unwrap_or(&landed).to_string_lossy().replace('\\', "/")
            );
            if written {
                result.record_copy(label);
            } else {
                result.record_skip(label, "already migrated");
            }
        }

        Ok(result)
    }

    fn validate(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(BlendError::validation(
                Domain::Examples,
                vec!["example is empty".to_string()],
            ));
        }
        Ok(())
    }
}
