//! S6. Audit digest determinism: two sessions built from identical records
//! and claims under the same digest algorithm produce the same digest, and
//! changing a single record character changes it.

use agentmesh_core::audit::{verify, AuditRecord, AuditSession, REQUIRED_CLAIM_TOTAL_TASKS};
use agentmesh_core::config::DigestAlgo;

fn records() -> Vec<AuditRecord> {
    vec![
        AuditRecord {
            id: "step-1".to_string(),
            success: true,
            value: serde_json::json!({ "tokens": 42 }),
            error: None,
        },
        AuditRecord {
            id: "step-2".to_string(),
            success: false,
            value: serde_json::json!({ "tokens": 0 }),
            error: Some("timeout".to_string()),
        },
    ]
}

#[test]
fn identical_runs_produce_equal_digests() {
    let mut a = AuditSession::open("seed-1", "exec-hash", records());
    a.add_claim(REQUIRED_CLAIM_TOTAL_TASKS, serde_json::json!(2));
    let mut b = AuditSession::open("seed-1", "exec-hash", records());
    b.add_claim(REQUIRED_CLAIM_TOTAL_TASKS, serde_json::json!(2));

    let artifact_a = a.finalize(DigestAlgo::Sha256, None).unwrap();
    let artifact_b = b.finalize(DigestAlgo::Sha256, None).unwrap();

    assert_eq!(artifact_a.digest, artifact_b.digest);
}

#[tokio::test]
async fn altering_one_record_changes_the_digest_and_fails_verification() {
    let mut session = AuditSession::open("seed-1", "exec-hash", records());
    session.add_claim(REQUIRED_CLAIM_TOTAL_TASKS, serde_json::json!(2));
    let original = session.finalize(DigestAlgo::Sha256, None).unwrap();

    let mut tampered_records = records();
    tampered_records[1].error = Some("timeoux".to_string());
    let mut tampered_session = AuditSession::open("seed-1", "exec-hash", tampered_records);
    tampered_session.add_claim(REQUIRED_CLAIM_TOTAL_TASKS, serde_json::json!(2));
    let tampered = tampered_session.finalize(DigestAlgo::Sha256, None).unwrap();

    assert_ne!(original.digest, tampered.digest);

    let mut forged = original.clone();
    forged.records[1].error = Some("timeoux".to_string());
    assert!(verify(&forged, None).await.is_err());
}
