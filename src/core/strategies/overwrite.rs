use crate::core::markdown::has_unterminated_front_matter;
use crate::core::strategies::{BlendContext, BlendStrategy};
use crate::domain::model::{BlendResult, CandidateFile, Conflict, Domain, Resolution};
use crate::utils::error::{BlendError, Result};
use async_trait::async_trait;
use std::collections::HashMap;

/// 指令是有版本的正式產物：框架版本直接取代，不做合併
#[derive(Debug, Clone, Copy, Default)]
pub struct OverwriteStrategy;

impl OverwriteStrategy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BlendStrategy for OverwriteStrategy {
    fn name(&self) -> &'static str {
        "overwrite"
    }

    fn can_handle(&self, domain: Domain) -> bool {
        domain == Domain::Commands
    }

    async fn blend(
        &self,
        framework: &[CandidateFile],
        target: &[CandidateFile],
        ctx: &BlendContext<'_>,
    ) -> Result<BlendResult> {
        let mut result = BlendResult::new(Domain::Commands);
        let shipped: HashMap<String, &CandidateFile> =
            framework.iter().map(|c| (c.key(), c)).collect();

        for fw in framework {
            let key = fw.key();
            self.validate(&fw.content)?;
            let destination = ctx
                .layout
                .framework_destination(Domain::Commands, &fw.relative, &fw.content);

            match ctx.existing(&destination) {
                None => {
                    ctx.write(&destination, &fw.content)?;
                    result.record_copy(key);
                }
                Some(current) if current == fw.content => {
                    result.record_skip(key, "already up to date");
                }
                Some(current) => {
                    let conflict = Conflict {
                        domain: Domain::Commands,
                        item: key.clone(),
                        framework: fw.content.clone(),
                        target: current.clone(),
                        reason: "local command differs from framework version".to_string(),
                    };
                    if ctx.resolve(&conflict) == Resolution::KeepTarget {
                        result.record_skip(key, "kept local version");
                        continue;
                    }
                    let saved = ctx.keep_superseded(Domain::Commands, &fw.relative, &current)?;
                    tracing::info!(
                        "🗂️ commands: {} replaced, previous version kept at {}",
                        key,
                        ctx.display_path(&saved)
                    );
                    ctx.write(&destination, &fw.content)?;
                    result.record_copy(key);
                }
            }
        }

        for item in target.iter().filter(|c| !c.standard) {
            let key = item.key();
            if let Some(fw) = shipped.get(&key) {
                if fw.content == item.content {
                    result.record_skip(format!("legacy:{}", key), "same as framework version");
                } else {
                    let saved = ctx.keep_superseded(Domain::Commands, &item.relative, &item.content)?;
                    result.record_skip(
                        format!("legacy:{}", key),
                        format!("superseded by framework version, kept at {}", ctx.display_path(&saved)),
                    );
                }
                continue;
            }

            let destination = ctx
                .layout
                .target_destination(Domain::Commands, &item.relative, &item.content);
            match ctx.existing(&destination) {
                None => {
                    self.validate(&item.content)?;
                    ctx.write(&destination, &item.content)?;
                    result.record_copy(format!("legacy:{}", key));
                }
                Some(current) if current == item.content => {
                    result.record_skip(format!("legacy:{}", key), "already migrated");
                }
                Some(_) => {
                    let saved = ctx.keep_superseded(Domain::Commands, &item.relative, &item.content)?;
                    result.record_skip(
                        format!("legacy:{}", key),
                        format!("unified command differs, legacy version kept at {}", ctx.display_path(&saved)),
                    );
                }
            }
        }

        Ok(result)
    }

    fn validate(&self, content: &str) -> Result<()> {
        let mut issues = Vec::new();
        if content.trim().is_empty() {
            issues.push("command is empty".to_string());
        }
        if has_unterminated_front_matter(content) {
            issues.push("front matter is not closed".to_string());
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(BlendError::validation(Domain::Commands, issues))
        }
    }
}
