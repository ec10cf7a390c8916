//! Durable policy ledger behaviour: persistence, crash recovery, and
//! tamper-triggered truncation.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use acorn_core::policy::{
    ChainVerification, DenyAllPolicy, FilePolicyLog, MemoryPolicyLog, PolicyCodex, PolicyLog,
    Sha256Signer,
};
use time::{Duration, OffsetDateTime};

fn signer() -> Arc<Sha256Signer> {
    Arc::new(Sha256Signer)
}

fn at(unix: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(unix).unwrap()
}

#[test]
fn appends_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policies.log");
    let codex = PolicyCodex::builtin();

    {
        let log = FilePolicyLog::open(&path, signer(), &codex).unwrap();
        log.append(Arc::new(DenyAllPolicy::new(1)), at(1_000)).unwrap();
        log.append(Arc::new(DenyAllPolicy::new(2)), at(2_000)).unwrap();
        assert!(log.verify_chain().is_valid());
    }

    let reopened = FilePolicyLog::open(&path, signer(), &codex).unwrap();
    assert_eq!(reopened.len(), 2);
    assert!(reopened.verify_chain().is_valid());
    assert_eq!(reopened.get_policy_at(at(1_500)).unwrap().priority(), 1);

    // the chain keeps extending across restarts
    reopened
        .append(Arc::new(DenyAllPolicy::new(3)), at(3_000))
        .unwrap();
    assert!(reopened.verify_chain().is_valid());
}

#[test]
fn partial_final_line_is_discarded_silently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policies.log");
    let codex = PolicyCodex::builtin();

    {
        let log = FilePolicyLog::open(&path, signer(), &codex).unwrap();
        log.append(Arc::new(DenyAllPolicy::new(1)), at(1_000)).unwrap();
    }
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"index\":1,\"policy_ty").unwrap();
    }

    let recovered = FilePolicyLog::open(&path, signer(), &codex).unwrap();
    assert_eq!(recovered.len(), 1);
    assert!(recovered.verify_chain().is_valid());

    // the torn tail is gone from disk too
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.ends_with('\n'));
    assert_eq!(content.lines().count(), 1);
}

#[test]
fn tampered_entry_truncates_the_log_from_that_point() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policies.log");
    let codex = PolicyCodex::builtin();

    {
        let log = FilePolicyLog::open(&path, signer(), &codex).unwrap();
        for (priority, when) in [(1, 1_000), (2, 2_000), (3, 3_000)] {
            log.append(Arc::new(DenyAllPolicy::new(priority)), at(when))
                .unwrap();
        }
    }

    // flip one byte inside the second entry's body
    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    let tampered_line = lines[1].replace("\"priority\":2", "\"priority\":9");
    let rewritten = format!("{}\n{}\n{}\n", lines[0], tampered_line, lines[2]);
    std::fs::write(&path, rewritten).unwrap();

    let recovered = FilePolicyLog::open(&path, signer(), &codex).unwrap();
    assert_eq!(recovered.len(), 1);
    assert!(recovered.verify_chain().is_valid());
    assert_eq!(recovered.get_policy_at(at(5_000)).unwrap().priority(), 1);
}

#[test]
fn effective_at_regression_is_rejected_at_append_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policies.log");
    let codex = PolicyCodex::builtin();
    let log = FilePolicyLog::open(&path, signer(), &codex).unwrap();

    log.append(Arc::new(DenyAllPolicy::new(1)), at(2_000)).unwrap();
    assert!(log
        .append(Arc::new(DenyAllPolicy::new(2)), at(1_000))
        .is_err());
    assert_eq!(log.len(), 1);
}

#[test]
fn ledger_scales_to_ten_thousand_entries() {
    let log = MemoryPolicyLog::new(signer());

    let base = at(1_000);
    for i in 0..10_000i64 {
        log.append(
            Arc::new(DenyAllPolicy::new((i % 100) as u8)),
            base + Duration::seconds(i),
        )
        .unwrap();
    }
    assert_eq!(log.get_all_seals().len(), 10_000);

    let lookup = log.get_policy_at(base + Duration::seconds(5_000)).unwrap();
    assert_eq!(lookup.priority(), (5_000 % 100) as u8);

    assert!(matches!(log.verify_chain(), ChainVerification::Valid));
    // cached second pass
    assert!(log.verify_chain().is_valid());
}
