//! JSON export of the account state committed by a block.
//!
//! The export reads the immutable snapshot of its block, so it runs alongside
//! forging without taking any lock on the head. Output shape:
//!
//! ```json
//! {"root":"0x..","accounts":{"0x..":{"balance":"1","nonce":0,"root":"0x..",
//!  "codeHash":"0x..","code":"0x","storage":{}}}}
//! ```
//!
//! Accounts appear in creation order.

use crate::core::account::Account;
use crate::core::block::BlockRef;
use crate::info;
use crate::storage::StorageError;
use crate::storage::main_storage::ChainStore;
use crate::storage::state::StateSnapshot;
use crate::types::bytes::Bytes;
use crate::types::hash::Hash;
use evm_ledger_derive::Error;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// JSON-RPC error code of a refused dump.
pub const ACTION_NOT_ALLOWED_CODE: i64 = 2;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("Action not allowed")]
    ActionNotAllowed,

    #[error("unknown block {0}")]
    UnknownBlock(BlockRef),

    #[error("failed to write dump: {0}")]
    SinkWrite(#[from] io::Error),

    #[error("failed to enumerate state: {0}")]
    Enumeration(#[from] StorageError),
}

/// What a completed dump wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpSummary {
    pub block_number: u64,
    pub state_root: Hash,
    pub accounts: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DumpAccount<'a> {
    balance: String,
    nonce: u64,
    root: Hash,
    code_hash: Hash,
    code: &'a Bytes,
    storage: BTreeMap<Hash, Hash>,
}

impl<'a> From<&'a Account> for DumpAccount<'a> {
    fn from(account: &'a Account) -> Self {
        Self {
            balance: account.balance().to_string(),
            nonce: account.nonce(),
            root: account.storage_root(),
            code_hash: account.code_hash(),
            code: account.code(),
            storage: BTreeMap::new(),
        }
    }
}

/// Streams the dump of `state` to `out`, one account at a time.
///
/// Returns the number of accounts written.
pub fn write_dump<W: Write>(
    state: &StateSnapshot,
    state_root: &Hash,
    out: &mut W,
) -> Result<usize, DumpError> {
    out.write_all(b"{\"root\":")?;
    serde_json::to_writer(&mut *out, state_root).map_err(io::Error::from)?;
    out.write_all(b",\"accounts\":{")?;

    let mut written = 0;
    for entry in state.accounts() {
        let (address, account) = entry?;
        if written > 0 {
            out.write_all(b",")?;
        }
        serde_json::to_writer(&mut *out, &address).map_err(io::Error::from)?;
        out.write_all(b":")?;
        serde_json::to_writer(&mut *out, &DumpAccount::from(&account))
            .map_err(io::Error::from)?;
        written += 1;
    }

    out.write_all(b"}}")?;
    Ok(written)
}

/// Writes the dump of `block` to `out`.
///
/// Nothing is resolved or written when `access_allowed` is false.
pub fn dump<W: Write>(
    store: &ChainStore,
    block: &BlockRef,
    access_allowed: bool,
    out: &mut W,
) -> Result<DumpSummary, DumpError> {
    if !access_allowed {
        return Err(DumpError::ActionNotAllowed);
    }
    let (block_data, state) = store
        .state_at(block)
        .ok_or(DumpError::UnknownBlock(*block))?;
    let accounts = write_dump(&state, &block_data.header.state_root, out)?;
    Ok(DumpSummary {
        block_number: block_data.number(),
        state_root: block_data.header.state_root,
        accounts,
    })
}

/// Writes the dump of `block` to the file at `path`.
///
/// The target is checked for writability before enumeration. Output goes to a
/// sibling temp file renamed over `path` once complete; on failure the temp
/// file is removed and `path` keeps its previous content.
pub fn dump_to_file(
    store: &ChainStore,
    block: &BlockRef,
    access_allowed: bool,
    path: &Path,
) -> Result<DumpSummary, DumpError> {
    if !access_allowed {
        return Err(DumpError::ActionNotAllowed);
    }
    let (block_data, state) = store
        .state_at(block)
        .ok_or(DumpError::UnknownBlock(*block))?;

    if path.exists() {
        // Opens without truncating; fails on directories and read-only files.
        OpenOptions::new().write(true).open(path)?;
    }
    let tmp = temp_sibling(path)?;
    let file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;

    let result = write_file(file, &state, &block_data.header.state_root)
        .and_then(|accounts| fs::rename(&tmp, path).map(|_| accounts).map_err(DumpError::from));
    let accounts = match result {
        Ok(accounts) => accounts,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    };

    info!(
        "dumped state: block={} root={} accounts={accounts} path={}",
        block_data.number(),
        block_data.header.state_root,
        path.display()
    );
    Ok(DumpSummary {
        block_number: block_data.number(),
        state_root: block_data.header.state_root,
        accounts,
    })
}

fn write_file(file: File, state: &StateSnapshot, state_root: &Hash) -> Result<usize, DumpError> {
    let mut out = BufWriter::new(file);
    let accounts = write_dump(state, state_root, &mut out)?;
    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(accounts)
}

/// Unique hidden path next to `path`.
fn temp_sibling(path: &Path) -> io::Result<PathBuf> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "dump path has no file name")
    })?;
    let tmp_name = format!(
        ".{}.{}.{}.tmp",
        name.to_string_lossy(),
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    Ok(path.with_file_name(tmp_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::blockchain::contract_address;
    use crate::types::U256;
    use crate::types::address::Address;
    use crate::utils::test_utils::utils::{
        deployment, ether, funded_chain, legacy_transfer, test_key,
    };
    use serde_json::Value;

    fn bob() -> Address {
        Address([0xb0; 20])
    }

    fn dump_json(store: &ChainStore, block: BlockRef) -> Value {
        let mut out = Vec::new();
        dump(store, &block, true, &mut out).unwrap();
        serde_json::from_slice(&out).unwrap()
    }

    #[test]
    fn disabled_dump_writes_nothing() {
        let chain = funded_chain(&[1]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let result = dump_to_file(chain.store(), &BlockRef::Latest, false, &path);
        assert!(matches!(result, Err(DumpError::ActionNotAllowed)));
        assert_eq!(
            result.unwrap_err().to_string(),
            "Action not allowed"
        );
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn dump_lists_accounts_with_hex_fields() {
        let chain = funded_chain(&[1]);
        let json = dump_json(chain.store(), BlockRef::Latest);

        let root = chain.store().head_block().header.state_root.to_string();
        assert_eq!(json["root"], Value::String(root));
        let alice = &json["accounts"][test_key(1).address().to_string()];
        assert_eq!(alice["balance"], Value::String(ether(100).to_string()));
        assert_eq!(alice["nonce"], 0);
        assert_eq!(alice["code"], "0x");
        assert_eq!(alice["codeHash"], Account::EMPTY_CODE_HASH.to_string());
        assert!(alice["storage"].as_object().unwrap().is_empty());
    }

    #[test]
    fn dumps_differ_by_block_changes() {
        let chain = funded_chain(&[1, 2]);
        let alice = test_key(1).address();
        let carol = test_key(2).address();

        chain
            .submit(legacy_transfer(0, Some(bob()), U256::from(5u64)).sign(&test_key(1)).unwrap())
            .unwrap();
        chain.forge(&[] as &[Vec<u8>]).unwrap();
        chain
            .submit(deployment(1, &[0x60, 0x01], U256::ZERO).sign(&test_key(1)).unwrap())
            .unwrap();
        chain.forge(&[] as &[Vec<u8>]).unwrap();

        let before = dump_json(chain.store(), BlockRef::Number(1));
        let after = dump_json(chain.store(), BlockRef::Number(2));
        let before = before["accounts"].as_object().unwrap();
        let after = after["accounts"].as_object().unwrap();

        let contract = contract_address(&alice, 1).to_string();
        assert!(!before.contains_key(&contract));
        assert_eq!(after[&contract]["nonce"], 1);
        assert_eq!(after[&contract]["code"], "0x6001");

        let changed: Vec<&String> = after
            .iter()
            .filter(|(address, account)| before.get(*address) != Some(*account))
            .map(|(address, _)| address)
            .collect();
        assert_eq!(changed.len(), 2);
        assert!(changed.contains(&&alice.to_string()));
        assert!(changed.contains(&&contract));
        assert_eq!(before[&carol.to_string()], after[&carol.to_string()]);
        assert_eq!(before[&bob().to_string()], after[&bob().to_string()]);
    }

    #[test]
    fn file_dump_replaces_target() {
        let chain = funded_chain(&[1]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"old").unwrap();

        let summary = dump_to_file(chain.store(), &BlockRef::Earliest, true, &path).unwrap();
        assert_eq!(summary.block_number, 0);
        assert_eq!(summary.accounts, 1);

        let json: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["accounts"].as_object().unwrap().len(), 1);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn unwritable_sink_fails() {
        let chain = funded_chain(&[1]);
        let dir = tempfile::tempdir().unwrap();

        // A directory cannot be opened for writing.
        let result = dump_to_file(chain.store(), &BlockRef::Latest, true, dir.path());
        assert!(matches!(result, Err(DumpError::SinkWrite(_))));

        let missing = dir.path().join("missing").join("state.json");
        let result = dump_to_file(chain.store(), &BlockRef::Latest, true, &missing);
        assert!(matches!(result, Err(DumpError::SinkWrite(_))));
        assert!(!missing.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failing_writer_reports_sink_error() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let chain = funded_chain(&[1]);
        let result = dump(chain.store(), &BlockRef::Latest, true, &mut Broken);
        assert!(matches!(result, Err(DumpError::SinkWrite(_))));
    }

    #[test]
    fn unknown_block_is_reported() {
        let chain = funded_chain(&[1]);
        let mut out = Vec::new();
        let result = dump(chain.store(), &BlockRef::Number(7), true, &mut out);
        assert!(matches!(result, Err(DumpError::UnknownBlock(BlockRef::Number(7)))));
        assert!(out.is_empty());
    }

    #[test]
    fn dump_is_stable_while_forging() {
        let chain = funded_chain(&[1]);
        let expected = dump_json(chain.store(), BlockRef::Earliest);

        std::thread::scope(|s| {
            s.spawn(|| {
                for nonce in 0..5 {
                    chain
                        .submit(
                            legacy_transfer(nonce, Some(bob()), U256::from(1u64))
                                .sign(&test_key(1))
                                .unwrap(),
                        )
                        .unwrap();
                    chain.forge(&[] as &[Vec<u8>]).unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..20 {
                    assert_eq!(dump_json(chain.store(), BlockRef::Earliest), expected);
                }
            });
        });

        assert_eq!(chain.store().height(), 5);
        let latest = dump_json(chain.store(), BlockRef::Latest);
        assert_eq!(latest["accounts"][bob().to_string()]["balance"], "5");
    }
}
