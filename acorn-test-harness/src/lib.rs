//! Reusable contract checks every trunk backend is expected to pass. Each
//! backend crate runs these from its own test suite.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use acorn_core::{AcornError, AcornResult, Nut, Trunk};

/// The payload used by the contract checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDoc {
    pub name: String,
    pub score: i64,
}

pub fn contract_doc(name: &str, score: i64) -> ContractDoc {
    ContractDoc {
        name: name.into(),
        score,
    }
}

fn harness_err(message: &str) -> AcornError {
    AcornError::Trunk(format!("contract violation: {message}"))
}

pub struct TrunkContract;

impl TrunkContract {
    /// Stash, crack, replace, toss: the minimal life cycle every backend
    /// must support.
    pub fn round_trip(trunk: &dyn Trunk<ContractDoc>) -> AcornResult<()> {
        let nut = Nut::new("contract-1", contract_doc("alice", 1))?;
        trunk.stash(&nut.id, &nut)?;
        trunk.flush()?;

        let fetched = trunk
            .crack("contract-1")?
            .ok_or_else(|| harness_err("stashed document missing"))?;
        if fetched.payload != nut.payload {
            return Err(harness_err("payload mismatch after round trip"));
        }
        if fetched.version != nut.version {
            return Err(harness_err("version mismatch after round trip"));
        }

        let mut replacement = nut.clone();
        replacement.payload.score = 2;
        replacement.version = 2;
        trunk.stash(&replacement.id, &replacement)?;
        trunk.flush()?;
        let fetched = trunk
            .crack("contract-1")?
            .ok_or_else(|| harness_err("replaced document missing"))?;
        if fetched.payload.score != 2 {
            return Err(harness_err("replacement was not applied"));
        }

        trunk.toss("contract-1")?;
        trunk.flush()?;
        if trunk.crack("contract-1")?.is_some() {
            return Err(harness_err("toss did not remove the document"));
        }
        Ok(())
    }

    /// Absent ids crack to `None` and toss quietly.
    pub fn tolerates_missing(trunk: &dyn Trunk<ContractDoc>) -> AcornResult<()> {
        if trunk.crack("contract-absent")?.is_some() {
            return Err(harness_err("phantom document for an unknown id"));
        }
        trunk.toss("contract-absent")?;
        Ok(())
    }

    /// Expired documents are absent from point reads and enumeration.
    pub fn ttl_expiry(trunk: &dyn Trunk<ContractDoc>) -> AcornResult<()> {
        let expired = Nut::new("contract-ttl", contract_doc("old", 1))?
            .with_expiry(OffsetDateTime::now_utc() - Duration::seconds(1));
        trunk.stash(&expired.id, &expired)?;
        trunk.flush()?;

        if trunk.crack("contract-ttl")?.is_some() {
            return Err(harness_err("expired document still cracks"));
        }
        if trunk.crack_all()?.iter().any(|nut| nut.id == "contract-ttl") {
            return Err(harness_err("expired document still enumerated"));
        }
        Ok(())
    }

    /// `get_history` either works or reports itself unsupported, matching
    /// the declared capability.
    pub fn history_contract(trunk: &dyn Trunk<ContractDoc>) -> AcornResult<()> {
        let declared = trunk.capabilities().supports_history;
        let first = Nut::new("contract-hist", contract_doc("v1", 1))?;
        trunk.stash(&first.id, &first)?;
        let mut second = first.clone();
        second.payload = contract_doc("v2", 2);
        second.version = 2;
        trunk.stash(&second.id, &second)?;
        trunk.flush()?;

        match trunk.get_history("contract-hist") {
            Ok(history) => {
                if !declared {
                    return Err(harness_err("history served but not declared"));
                }
                if history.len() != 1 || history[0].payload.name != "v1" {
                    return Err(harness_err("history does not hold the superseded version"));
                }
                Ok(())
            }
            Err(AcornError::HistoryUnsupported { .. }) => {
                if declared {
                    return Err(harness_err("declared history but refused to serve it"));
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Imports adopt newer foreign nuts and ignore stale ones.
    pub fn import_prefers_newer(trunk: &dyn Trunk<ContractDoc>) -> AcornResult<()> {
        let local = Nut::new("contract-imp", contract_doc("local", 1))?;
        trunk.stash(&local.id, &local)?;
        trunk.flush()?;

        let mut newer = local.clone();
        newer.payload = contract_doc("newer", 2);
        newer.version = 2;
        newer.timestamp += Duration::seconds(60);
        trunk.import_changes(vec![newer])?;
        trunk.flush()?;
        let current = trunk
            .crack("contract-imp")?
            .ok_or_else(|| harness_err("imported document missing"))?;
        if current.payload.name != "newer" {
            return Err(harness_err("newer import was not adopted"));
        }

        let mut stale = local.clone();
        stale.payload = contract_doc("stale", 0);
        stale.timestamp -= Duration::seconds(3_600);
        trunk.import_changes(vec![stale])?;
        trunk.flush()?;
        let current = trunk
            .crack("contract-imp")?
            .ok_or_else(|| harness_err("document vanished after a stale import"))?;
        if current.payload.name != "newer" {
            return Err(harness_err("stale import overwrote a newer document"));
        }
        Ok(())
    }

    /// Everything stashed comes back out of `export_changes`.
    pub fn export_reflects_state(trunk: &dyn Trunk<ContractDoc>) -> AcornResult<()> {
        for (id, score) in [("contract-e1", 1), ("contract-e2", 2)] {
            let nut = Nut::new(id, contract_doc(id, score))?;
            trunk.stash(id, &nut)?;
        }
        trunk.flush()?;
        let exported = trunk.export_changes()?;
        for id in ["contract-e1", "contract-e2"] {
            if !exported.iter().any(|nut| nut.id == id) {
                return Err(harness_err("exported changes are missing a document"));
            }
        }
        Ok(())
    }
}
