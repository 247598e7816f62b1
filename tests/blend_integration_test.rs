use ctx_blend::core::backup::BackupManager;
use ctx_blend::domain::ports::Storage;
use ctx_blend::{
    BlendError, DomainTables, Domain, HttpComparisonService, HttpMergeService, HttpServiceConfig,
    LocalStorage, MeteredServices, Orchestrator, Phase, PreferFramework, RunRequest, RunStatus,
};
use httpmock::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

/// 目錄樹快照：相對路徑 → 內容
fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_string_lossy().to_string();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

fn orchestrator(services: MeteredServices) -> Orchestrator {
    Orchestrator::new(
        Arc::new(DomainTables::builtin().unwrap()),
        services,
        Arc::new(PreferFramework),
        Arc::new(LocalStorage::new()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_settings_lists_are_merged_with_single_membership() {
    let framework = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write(
        framework.path(),
        ".claude/settings.local.json",
        r#"{"permissions":{"allow":["git:*","read://"],"deny":["fs_read_file"],"ask":["rm:*","mv:*"]}}"#,
    );
    write(
        target.path(),
        ".claude/settings.local.json",
        r#"{"permissions":{"allow":["fs_read_file","write://"],"deny":["cp:*"],"ask":[]}}"#,
    );

    let request = RunRequest::all(false).with_domains([Domain::Settings]);
    let report = orchestrator(MeteredServices::unavailable())
        .run(framework.path(), target.path(), &request)
        .await;

    assert_eq!(report.status, RunStatus::Completed);
    let merged: serde_json::Value =
        serde_json::from_str(&read(target.path(), ".claude/settings.local.json")).unwrap();
    assert_eq!(merged["permissions"]["allow"], serde_json::json!(["git:*", "read://", "write://"]));
    assert_eq!(merged["permissions"]["deny"], serde_json::json!(["cp:*", "fs_read_file"]));
    assert_eq!(merged["permissions"]["ask"], serde_json::json!(["rm:*", "mv:*"]));
}

#[tokio::test]
async fn test_identical_example_under_other_name_is_not_copied() {
    let framework = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    let body = "# Retry helper\n```rust\nfn retry() {}\n```\n";
    write(framework.path(), ".ce/examples/ex1.md", body);
    write(target.path(), "examples/my-retry.md", body);

    let request = RunRequest::all(false).with_domains([Domain::Examples]);
    let report = orchestrator(MeteredServices::unavailable())
        .run(framework.path(), target.path(), &request)
        .await;

    let examples = report.blend_result(Domain::Examples).unwrap();
    assert!(examples.is_skipped("ex1.md"));
    assert_eq!(examples.resource_usage.cheap_calls, 0);
    assert!(!target.path().join(".ce/examples/ex1.md").exists());
    assert_eq!(read(target.path(), ".ce/examples/user/my-retry.md"), body);
    assert!(!target.path().join("examples").exists());
}

#[tokio::test]
async fn test_cleanup_refuses_directory_with_unmigrated_file() {
    let framework = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write(target.path(), "examples/a.md", "# A\nfn a() {}\n");
    write(target.path(), "examples/b.md", "# B\nfn b() {}\n");
    // 名稱命中黑名單，不會被偵測也不會被搬移
    write(target.path(), "examples/rollout-plan.md", "# Plan\n");

    let request = RunRequest::all(false).with_domains([Domain::Examples]);
    let report = orchestrator(MeteredServices::unavailable())
        .run(framework.path(), target.path(), &request)
        .await;

    assert_eq!(report.status, RunStatus::PartiallyCompleted);
    let decision = report
        .cleanup
        .iter()
        .find(|d| d.legacy_dir == Path::new("examples"))
        .unwrap();
    assert!(!decision.verified);
    assert!(!decision.removed);
    assert_eq!(decision.unmigrated_files.len(), 1);
    assert!(target.path().join("examples/rollout-plan.md").exists());
    assert!(target.path().join(".ce/examples/user/a.md").exists());
}

#[tokio::test]
async fn test_dry_run_reports_and_leaves_tree_untouched() {
    let framework = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    for i in 1..=5 {
        write(
            framework.path(),
            &format!(".ce/examples/ex{}.md", i),
            &format!("# Example {}\nfn example_{}() {{}}\n", i, i),
        );
    }

    let before = snapshot(target.path());
    let report = orchestrator(MeteredServices::unavailable())
        .run(framework.path(), target.path(), &RunRequest::all(true))
        .await;

    assert!(report.dry_run);
    assert_eq!(report.status, RunStatus::Completed);
    let examples = report.blend_result(Domain::Examples).unwrap();
    assert_eq!(examples.copied.len(), 5);
    assert!(report.summary().contains("5 would copy"));
    assert_eq!(snapshot(target.path()), before);
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let framework = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write(
        framework.path(),
        ".claude/settings.local.json",
        r#"{"permissions":{"allow":["git:*"],"deny":[],"ask":[]}}"#,
    );
    write(framework.path(), ".ce/examples/ex1.md", "# Example\nfn ex() {}\n");
    write(framework.path(), ".claude/commands/generate-prp.md", "# Generate PRP\n");
    write(
        framework.path(),
        ".serena/memories/code-style-conventions.md",
        "# Code style\nUse rustfmt.\n",
    );
    write(
        target.path(),
        "PRPs/PRP-1.md",
        "# PRP-1: Login\n## Goal\nUsers can log in.\n## Why\nAccess control.\n",
    );
    write(target.path(), "examples/a.md", "# A\nfn a() {}\n");
    write(target.path(), "commands/deploy.md", "# Deploy\n");
    write(target.path(), "context-engineering/memories/notes.md", "# Notes\nWe deploy on Fridays.\n");

    let blend = orchestrator(MeteredServices::unavailable());
    let first = blend
        .run(framework.path(), target.path(), &RunRequest::all(false))
        .await;
    assert_eq!(first.status, RunStatus::Completed, "{}", first.summary());
    assert!(!target.path().join("PRPs").exists());
    assert!(!target.path().join("context-engineering").exists());
    assert!(read(target.path(), ".serena/memories/notes.md").contains("origin: user"));
    assert!(read(target.path(), ".ce/PRPs/feature-requests/PRP-1.md").contains("migrated-from: PRPs/PRP-1.md"));

    let after_first = snapshot(target.path());
    let second = blend
        .run(framework.path(), target.path(), &RunRequest::all(false))
        .await;

    assert_eq!(second.status, RunStatus::Completed, "{}", second.summary());
    for result in &second.blend_results {
        assert!(result.copied.is_empty(), "{}", result.summary_line(false));
        assert!(result.merged.is_empty(), "{}", result.summary_line(false));
    }
    assert_eq!(snapshot(target.path()), after_first);
}

#[tokio::test]
async fn test_memories_escalate_through_http_services() {
    let server = MockServer::start();
    let similarity = server.mock(|when, then| {
        when.method(POST).path("/similarity");
        then.status(200)
            .json_body(serde_json::json!({ "score": 0.4, "usage": { "input_tokens": 100, "output_tokens": 5 } }));
    });
    let contradiction = server.mock(|when, then| {
        when.method(POST).path("/contradiction");
        then.status(200).json_body(serde_json::json!({ "contradicts": false }));
    });
    let merge = server.mock(|when, then| {
        when.method(POST).path("/merge").body_contains("Use nextest locally.");
        then.status(200).json_body(serde_json::json!({
            "merged": "# Testing\nRun the full suite.\nUse nextest locally.\n",
            "usage": { "input_tokens": 300, "output_tokens": 40 }
        }));
    });

    let framework = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write(framework.path(), ".serena/memories/testing-notes.md", "# Testing\nRun the full suite.\n");
    write(target.path(), "memories/testing-notes.md", "# Testing\nUse nextest locally.\n");

    let services = MeteredServices::new(
        Arc::new(HttpComparisonService::new(HttpServiceConfig::new(server.base_url()))),
        Arc::new(HttpMergeService::new(HttpServiceConfig::new(server.base_url()))),
        Default::default(),
    );
    let request = RunRequest::all(false)
        .with_phases([Phase::Detect, Phase::Blend, Phase::Cleanup])
        .with_domains([Domain::Memories]);
    let report = orchestrator(services)
        .run(framework.path(), target.path(), &request)
        .await;

    similarity.assert_hits(1);
    contradiction.assert_hits(1);
    merge.assert_hits(1);
    assert_eq!(report.status, RunStatus::Completed, "{}", report.summary());
    let memories = report.blend_result(Domain::Memories).unwrap();
    assert_eq!(memories.merged, vec!["testing-notes.md"]);
    assert_eq!(memories.resource_usage.cheap_calls, 2);
    assert_eq!(memories.resource_usage.quality_calls, 1);
    assert_eq!(
        read(target.path(), ".serena/memories/testing-notes.md"),
        "# Testing\nRun the full suite.\nUse nextest locally.\n"
    );
    assert!(!target.path().join("memories").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_cycle_aborts_the_run() {
    let framework = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write(target.path(), "examples/a.md", "# A\n");
    std::os::unix::fs::symlink(target.path().join("examples"), target.path().join("examples/loop")).unwrap();

    let report = orchestrator(MeteredServices::unavailable())
        .run(framework.path(), target.path(), &RunRequest::all(false))
        .await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(report.blend_results.is_empty());
    assert!(target.path().join("examples/a.md").exists());
}

#[test]
fn test_failed_operation_restores_original_content() {
    let target = TempDir::new().unwrap();
    write(target.path(), "CLAUDE.md", "original\n");
    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new());
    let manager = BackupManager::new(storage.clone(), target.path(), "run-1", false);
    let path = target.path().join("CLAUDE.md");

    let outcome: Result<(), BlendError> = manager.with_backup(&path, || {
        storage.write(&path, b"half written")?;
        Err(BlendError::strategy(Domain::Doc, "merge exploded"))
    });

    assert!(outcome.is_err());
    assert_eq!(read(target.path(), "CLAUDE.md"), "original\n");
    manager.finish().unwrap();
    assert!(!target.path().join(".ce").join(".blend-backups").exists());
}

/// 統一樹（排除指定的舊目錄）中是否有檔案含有 `needle`
fn unified_tree_holds(root: &Path, legacy_dir: &str, needle: &str) -> bool {
    snapshot(root)
        .iter()
        .filter(|(rel, _)| !rel.starts_with(legacy_dir))
        .any(|(_, content)| String::from_utf8_lossy(content).contains(needle))
}

fn migrate_only(domain: Domain) -> RunRequest {
    RunRequest::all(false)
        .with_phases([Phase::Detect, Phase::Blend, Phase::Cleanup])
        .with_domains([domain])
}

#[tokio::test]
async fn test_legacy_memory_survives_next_to_differing_unified_copy() {
    let framework = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write(target.path(), "memories/team.md", "# Team\nLEGACY-ONLY-FACT: on-call rotates weekly.\n");
    write(target.path(), ".serena/memories/team.md", "# Team\nWe pair on Fridays.\n");

    let blend = orchestrator(MeteredServices::unavailable());
    let report = blend
        .run(framework.path(), target.path(), &migrate_only(Domain::Memories))
        .await;

    assert_eq!(report.status, RunStatus::Completed, "{}", report.summary());
    assert!(!target.path().join("memories").exists());
    assert!(unified_tree_holds(target.path(), "memories", "LEGACY-ONLY-FACT"));
    assert_eq!(read(target.path(), ".serena/memories/team.md"), "# Team\nWe pair on Fridays.\n");

    let after_first = snapshot(target.path());
    let second = blend
        .run(framework.path(), target.path(), &migrate_only(Domain::Memories))
        .await;
    assert_eq!(second.status, RunStatus::Completed, "{}", second.summary());
    assert_eq!(snapshot(target.path()), after_first);
}

#[tokio::test]
async fn test_flat_and_nested_memories_with_same_name_both_survive_cleanup() {
    let framework = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write(target.path(), "memories/team.md", "# Team\nFlat wording.\n");
    write(target.path(), "context-engineering/memories/team.md", "# Team\nNested wording.\n");

    let report = orchestrator(MeteredServices::unavailable())
        .run(framework.path(), target.path(), &migrate_only(Domain::Memories))
        .await;

    assert_eq!(report.status, RunStatus::Completed, "{}", report.summary());
    assert!(!target.path().join("memories").exists());
    assert!(!target.path().join("context-engineering").exists());
    assert!(unified_tree_holds(target.path(), "memories", "Flat wording."));
    assert!(unified_tree_holds(target.path(), "memories", "Nested wording."));
}

#[tokio::test]
async fn test_legacy_example_survives_next_to_differing_user_copy() {
    let framework = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write(target.path(), "examples/client.md", "# Client\nfn legacy_only_client() {}\n");
    write(target.path(), ".ce/examples/user/client.md", "# Client\nfn rewritten_client() {}\n");

    let report = orchestrator(MeteredServices::unavailable())
        .run(framework.path(), target.path(), &migrate_only(Domain::Examples))
        .await;

    assert_eq!(report.status, RunStatus::Completed, "{}", report.summary());
    assert!(!target.path().join("examples").exists());
    assert!(unified_tree_holds(target.path(), "examples", "legacy_only_client"));
    assert_eq!(
        read(target.path(), ".ce/examples/user/client.md"),
        "# Client\nfn rewritten_client() {}\n"
    );
}

#[tokio::test]
async fn test_legacy_command_survives_next_to_differing_unified_command() {
    let framework = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write(target.path(), "commands/deploy.md", "# Deploy\nssh prod && make release\n");
    write(target.path(), ".claude/commands/deploy.md", "# Deploy\nUse the pipeline.\n");

    let report = orchestrator(MeteredServices::unavailable())
        .run(framework.path(), target.path(), &migrate_only(Domain::Commands))
        .await;

    assert_eq!(report.status, RunStatus::Completed, "{}", report.summary());
    assert!(!target.path().join("commands").exists());
    assert_eq!(read(target.path(), ".claude/commands/deploy.md"), "# Deploy\nUse the pipeline.\n");
    assert_eq!(
        read(target.path(), ".ce/backups/commands/deploy.md"),
        "# Deploy\nssh prod && make release\n"
    );
}

#[tokio::test]
async fn test_dry_run_predicts_side_copy_without_writing_it() {
    let framework = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write(target.path(), "examples/client.md", "# Client\nfn legacy_only_client() {}\n");
    write(target.path(), ".ce/examples/user/client.md", "# Client\nfn rewritten_client() {}\n");
    let before = snapshot(target.path());

    let request = RunRequest::all(true)
        .with_phases([Phase::Detect, Phase::Blend, Phase::Cleanup])
        .with_domains([Domain::Examples]);
    let report = orchestrator(MeteredServices::unavailable())
        .run(framework.path(), target.path(), &request)
        .await;

    let decision = report
        .cleanup
        .iter()
        .find(|d| d.legacy_dir == Path::new("examples"))
        .unwrap();
    assert!(decision.verified && !decision.removed);
    assert_eq!(report.blend_result(Domain::Examples).unwrap().copied.len(), 1);
    assert_eq!(snapshot(target.path()), before);
}
