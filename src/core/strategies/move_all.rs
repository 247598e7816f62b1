use crate::core::markdown::{has_unterminated_front_matter, split_front_matter};
use crate::core::strategies::{BlendContext, BlendStrategy};
use crate::domain::layout::disambiguated;
use crate::domain::model::{BlendResult, CandidateFile, Domain};
use crate::utils::error::{BlendError, Result};
use async_trait::async_trait;
use std::path::PathBuf;

pub const PROVENANCE_PREFIX: &str = "<!-- migrated-from:";

/// 逐筆搬移紀錄；不依識別碼去重，只跳過內容完全相同者
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveAllStrategy;

impl MoveAllStrategy {
    pub fn new() -> Self {
        Self
    }

    fn place_record(
        &self,
        item: &CandidateFile,
        origin: &str,
        ctx: &BlendContext<'_>,
        result: &mut BlendResult,
    ) -> Result<()> {
        let content = with_provenance(&item.content, origin);
        self.validate(&content)?;

        let primary = ctx
            .layout
            .target_destination(Domain::Prps, &item.relative, &item.content);
        let destination = match ctx.existing(&primary) {
            None => primary,
            Some(current) if same_record(&current, &content) => {
                result.record_skip(origin, "identical record already migrated");
                return Ok(());
            }
            Some(_) => {
                let alternate: PathBuf = disambiguated(&primary, &item.content);
                match ctx.existing(&alternate) {
                    Some(current) if same_record(&current, &content) => {
                        result.record_skip(origin, "identical record already migrated");
                        return Ok(());
                    }
                    _ => {
                        tracing::debug!(
                            "📦 prps: {} collides with {}, keeping both",
                            origin,
                            ctx.display_path(&primary)
                        );
                        alternate
                    }
                }
            }
        };

        ctx.write(&destination, &content)?;
        result.record_copy(ctx.display_path(&destination));
        Ok(())
    }
}

#[async_trait]
impl BlendStrategy for MoveAllStrategy {
    fn name(&self) -> &'static str {
        "move-all"
    }

    fn can_handle(&self, domain: Domain) -> bool {
        domain == Domain::Prps
    }

    async fn blend(
        &self,
        framework: &[CandidateFile],
        target: &[CandidateFile],
        ctx: &BlendContext<'_>,
    ) -> Result<BlendResult> {
        let mut result = BlendResult::new(Domain::Prps);

        for item in framework {
            let origin = format!("framework:{}", item.key());
            self.place_record(item, &origin, ctx, &mut result)?;
        }
        // 已在統一樹中的紀錄不再搬移
        for item in target.iter().filter(|c| !c.standard) {
            let origin = ctx.display_path(&item.path);
            self.place_record(item, &origin, ctx, &mut result)?;
        }

        Ok(result)
    }

    fn validate(&self, content: &str) -> Result<()> {
        let mut issues = Vec::new();
        if !content.contains(PROVENANCE_PREFIX) {
            issues.push("provenance header is missing".to_string());
        }
        if has_unterminated_front_matter(content) {
            issues.push("front matter is not closed".to_string());
        }
        if strip_provenance(content).trim().is_empty() {
            issues.push("record is empty".to_string());
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(BlendError::validation(Domain::Prps, issues))
        }
    }
}

/// 在 front matter 之後插入來源註記；已有則不變
pub fn with_provenance(content: &str, origin: &str) -> String {
    if content.contains(PROVENANCE_PREFIX) {
        return content.to_string();
    }
    let header = format!("{} {} -->\n", PROVENANCE_PREFIX, origin);
    let (meta, body) = split_front_matter(content);
    match meta {
        Some(_) => {
            let split = content.len() - body.len();
            format!("{}{}{}", &content[..split], header, body)
        }
        None => format!("{}{}", header, content),
    }
}

pub fn strip_provenance(content: &str) -> String {
    content
        .split_inclusive('\n')
        .filter(|line| !line.trim_start().starts_with(PROVENANCE_PREFIX))
        .collect()
}

fn same_record(a: &str, b: &str) -> bool {
    strip_provenance(a) == strip_provenance(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::services::MeteredServices;
    use crate::core::strategies::testing::{candidate, Fixture};

    fn legacy(fx: &Fixture, rel: &str, content: &str) -> CandidateFile {
        fx.write_target(rel, content);
        let name = std::path::Path::new(rel).file_name().unwrap().to_string_lossy().to_string();
        candidate(Domain::Prps, fx.target.path().join(rel), &name, content, false)
    }

    #[test]
    fn test_provenance_goes_after_front_matter() {
        let out = with_provenance("---\nstatus: done\n---\n# PRP-1\n", "PRPs/PRP-1.md");
        assert_eq!(
            out,
            "---\nstatus: done\n---\n<!-- migrated-from: PRPs/PRP-1.md -->\n# PRP-1\n"
        );
        assert_eq!(with_provenance(&out, "elsewhere"), out);
        assert_eq!(strip_provenance(&out), "---\nstatus: done\n---\n# PRP-1\n");
    }

    #[tokio::test]
    async fn test_records_land_in_status_folders_and_same_ids_are_kept() {
        let fx = Fixture::new(false);
        let services = MeteredServices::unavailable();
        let target = vec![
            legacy(&fx, "PRPs/PRP-1.md", "# PRP-1: Login\n**Status**: Completed\n"),
            legacy(&fx, "context-engineering/PRPs/PRP-1.md", "# PRP-1: Billing\n"),
        ];

        let tx = fx.manager.begin(Domain::Prps);
        let result = MoveAllStrategy::new()
            .blend(&[], &target, &fx.context(&services, &tx))
            .await
            .unwrap();
        tx.commit().unwrap();

        assert_eq!(result.copied.len(), 2);
        let executed = fx.read_target(".ce/PRPs/executed/PRP-1.md").unwrap();
        assert!(executed.starts_with("<!-- migrated-from: PRPs/PRP-1.md -->\n"));
        assert!(fx.read_target(".ce/PRPs/feature-requests/PRP-1.md").unwrap().contains("Billing"));
    }

    #[tokio::test]
    async fn test_colliding_names_are_disambiguated_and_rerun_is_stable() {
        let fx = Fixture::new(false);
        let services = MeteredServices::unavailable();
        let target = vec![
            legacy(&fx, "PRPs/PRP-2.md", "# PRP-2: A\n"),
            legacy(&fx, "context-engineering/PRPs/PRP-2.md", "# PRP-2: B\n"),
        ];

        for round in 0..2 {
            let tx = fx.manager.begin(Domain::Prps);
            let result = MoveAllStrategy::new()
                .blend(&[], &target, &fx.context(&services, &tx))
                .await
                .unwrap();
            tx.commit().unwrap();
            if round == 1 {
                assert!(result.copied.is_empty());
                assert_eq!(result.skipped.len(), 2);
            }
        }

        let alternate = disambiguated(
            &fx.target.path().join(".ce/PRPs/feature-requests/PRP-2.md"),
            "# PRP-2: B\n",
        );
        assert!(std::fs::read_to_string(alternate).unwrap().contains("PRP-2: B"));
    }

    #[test]
    fn test_validate_requires_provenance() {
        assert!(MoveAllStrategy::new().validate("# PRP-1\n").is_err());
        assert!(MoveAllStrategy::new()
            .validate("<!-- migrated-from: x -->\n# PRP-1\n")
            .is_ok());
    }
}
