use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::log::{policy_index_at, verify_seals, ChainVerification, PolicyLog};
use super::seal::{PolicySeal, GENESIS_HASH};
use super::signer::Signer;
use super::{Policy, PolicyCodex};
use crate::error::{AcornError, AcornResult};

struct FileLogState {
    entries: Vec<(PolicySeal, Arc<dyn Policy>)>,
    file: File,
}

/// Durable ledger: one canonical-JSON seal per line, fsynced per append.
/// Loading verifies entry by entry and truncates the file at the first
/// entry that fails parsing, linking, or signature verification.
pub struct FilePolicyLog {
    path: PathBuf,
    signer: Arc<dyn Signer>,
    state: Mutex<FileLogState>,
    verification: Mutex<Option<ChainVerification>>,
}

impl FilePolicyLog {
    pub fn open(
        path: impl AsRef<Path>,
        signer: Arc<dyn Signer>,
        codex: &PolicyCodex,
    ) -> AcornResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;

        let mut entries: Vec<(PolicySeal, Arc<dyn Policy>)> = Vec::new();
        let mut previous_signature = GENESIS_HASH;
        let mut previous_at: Option<OffsetDateTime> = None;
        let mut valid_len = 0u64;
        let mut offset = 0u64;

        for line in content.split_inclusive('\n') {
            let line_start = offset;
            offset += line.len() as u64;
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                valid_len = offset;
                continue;
            }

            let seal: PolicySeal = match serde_json::from_str(trimmed) {
                Ok(seal) => seal,
                Err(err) => {
                    if line.ends_with('\n') {
                        warn!(path = %path.display(), offset = line_start, %err,
                            "unparseable policy seal, truncating ledger");
                    } else {
                        // A write cut short mid-line; recover without noise.
                        debug!(path = %path.display(), offset = line_start,
                            "discarding partial final ledger line");
                    }
                    break;
                }
            };

            let index = entries.len();
            let broken = seal.index != index as u64
                || seal.previous_hash != previous_signature
                || previous_at.is_some_and(|at| seal.effective_at < at)
                || !seal.verify_with(signer.as_ref());
            if broken {
                warn!(path = %path.display(), index,
                    "policy seal failed chain verification, truncating ledger");
                break;
            }

            let policy = match codex.decode(&seal.policy_type_id, &seal.policy_body) {
                Ok(policy) => policy,
                Err(err) => {
                    warn!(path = %path.display(), index, %err,
                        "undecodable policy body, truncating ledger");
                    break;
                }
            };

            previous_signature = seal.signature;
            previous_at = Some(seal.effective_at);
            entries.push((seal, policy));
            valid_len = offset;
        }

        if valid_len < content.len() as u64 {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;

        Ok(FilePolicyLog {
            path,
            signer,
            state: Mutex::new(FileLogState { entries, file }),
            verification: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PolicyLog for FilePolicyLog {
    fn append(
        &self,
        policy: Arc<dyn Policy>,
        effective_at: OffsetDateTime,
    ) -> AcornResult<PolicySeal> {
        let seal = {
            let mut state = self.state.lock();
            let seal = PolicySeal::create(
                policy.as_ref(),
                effective_at,
                state.entries.last().map(|(seal, _)| seal),
                self.signer.as_ref(),
                None,
            )?;

            let mut line = serde_json::to_string(&seal)
                .map_err(|e| AcornError::Serialization(e.to_string()))?;
            line.push('\n');
            state.file.write_all(line.as_bytes())?;
            state.file.sync_all()?;

            state.entries.push((seal.clone(), policy));
            seal
        };
        *self.verification.lock() = None;
        Ok(seal)
    }

    fn get_policy_at(&self, at: OffsetDateTime) -> Option<Arc<dyn Policy>> {
        let state = self.state.lock();
        policy_index_at(&state.entries, at).map(|i| Arc::clone(&state.entries[i].1))
    }

    fn get_all_seals(&self) -> Vec<PolicySeal> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(seal, _)| seal.clone())
            .collect()
    }

    fn get_all_policies(&self) -> Vec<Arc<dyn Policy>> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(_, policy)| Arc::clone(policy))
            .collect()
    }

    fn verify_chain(&self) -> ChainVerification {
        if let Some(result) = self.verification.lock().as_ref() {
            return result.clone();
        }
        let seals = self.get_all_seals();
        let result = verify_seals(&seals, self.signer.as_ref());
        *self.verification.lock() = Some(result.clone());
        result
    }
}
