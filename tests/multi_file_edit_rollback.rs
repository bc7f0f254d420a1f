//! S5. Atomic multi-file edit rollback: two edits where the second targets
//! an invalid path restore every file touched by the batch to its
//! pre-image and surface the original failure, not a rollback error.

use agentmesh_core::tool::builtin::MultiFileEditTool;
use agentmesh_core::tool::registry::ToolExecutionContext;
use agentmesh_core::tool::Tool;
use std::time::Duration;

#[tokio::test]
async fn second_edit_failure_restores_both_files() {
    let dir = tempfile::tempdir().unwrap();
    let a_path = dir.path().join("a.txt");
    let b_path = dir.path().join("b.txt");
    tokio::fs::write(&a_path, "a-original").await.unwrap();
    tokio::fs::write(&b_path, "b-original").await.unwrap();

    // `c` is a directory, so writing to it as a file fails after `a` and
    // `b` have already been mutated.
    let c_dir = dir.path().join("c");
    tokio::fs::create_dir(&c_dir).await.unwrap();

    let tool = MultiFileEditTool::new(dir.path().to_path_buf());
    let ctx = ToolExecutionContext::with_timeout(Duration::from_secs(5));
    let args = serde_json::json!({
        "edits": [
            { "path": "a.txt", "content": "a-mutated" },
            { "path": "b.txt", "content": "b-mutated" },
            { "path": "c", "content": "nope" },
        ],
        "atomic": true,
    });

    let result = tool.execute(args, &ctx).await;
    assert!(result.is_err(), "batch containing a failing edit must fail");

    assert_eq!(
        tokio::fs::read_to_string(&a_path).await.unwrap(),
        "a-original"
    );
    assert_eq!(
        tokio::fs::read_to_string(&b_path).await.unwrap(),
        "b-original"
    );
}

#[tokio::test]
async fn non_atomic_batch_surfaces_error_without_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let a_path = dir.path().join("a.txt");
    tokio::fs::write(&a_path, "a-original").await.unwrap();
    let c_dir = dir.path().join("c");
    tokio::fs::create_dir(&c_dir).await.unwrap();

    let tool = MultiFileEditTool::new(dir.path().to_path_buf());
    let ctx = ToolExecutionContext::with_timeout(Duration::from_secs(5));
    let args = serde_json::json!({
        "edits": [
            { "path": "a.txt", "content": "a-mutated" },
            { "path": "c", "content": "nope" },
        ],
        "atomic": false,
    });

    let result = tool.execute(args, &ctx).await;
    assert!(result.is_err());
    // Non-atomic mode performs no rollback: the first edit's mutation stands.
    assert_eq!(
        tokio::fs::read_to_string(&a_path).await.unwrap(),
        "a-mutated"
    );
}
