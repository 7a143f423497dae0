use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::{
    domain::{BlacklistEntry, ExemptionEntry, QuarantineRecord, ThreadId, UserAccount, UserId},
    errors::Error,
    Result,
};

/// Durable state port: accounts, thread mapping, blacklist, exemptions, quarantine.
///
/// Calls are synchronous and short; implementations must not block on the network.
pub trait Store: Send + Sync {
    fn user(&self, id: UserId) -> Result<Option<UserAccount>>;
    fn upsert_user(&self, account: &UserAccount) -> Result<()>;
    fn user_by_thread(&self, thread: ThreadId) -> Result<Option<UserAccount>>;

    fn blacklist_entry(&self, id: UserId) -> Result<Option<BlacklistEntry>>;
    fn upsert_blacklist(&self, entry: &BlacklistEntry) -> Result<()>;
    fn delete_blacklist(&self, id: UserId) -> Result<()>;

    fn exemption(&self, id: UserId) -> Result<Option<ExemptionEntry>>;
    fn upsert_exemption(&self, entry: &ExemptionEntry) -> Result<()>;
    fn delete_exemption(&self, id: UserId) -> Result<()>;

    fn append_quarantine(&self, record: &QuarantineRecord) -> Result<()>;

    fn user_count(&self) -> Result<usize>;

    /// Newest first, with the total row count.
    fn blacklist_page(&self, offset: usize, limit: usize) -> Result<(Vec<BlacklistEntry>, usize)>;

    /// Newest first, with the total row count.
    fn quarantine_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<QuarantineRecord>, usize)>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    users: BTreeMap<i64, UserAccount>,
    #[serde(default)]
    blacklist: BTreeMap<i64, BlacklistEntry>,
    #[serde(default)]
    exemptions: BTreeMap<i64, ExemptionEntry>,
    #[serde(default)]
    quarantine: Vec<QuarantineRecord>,
}

/// JSON snapshot store. Every mutation rewrites the file (temp file + rename).
pub struct JsonFileStore {
    path: Option<PathBuf>,
    state: Mutex<Snapshot>,
}

impl JsonFileStore {
    /// Open (or create) the snapshot at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = load_snapshot(&path)?.unwrap_or_default();
        tracing::info!(
            path = %path.display(),
            users = snapshot.users.len(),
            blocked = snapshot.blacklist.len(),
            "store loaded"
        );
        Ok(Self {
            path: Some(path),
            state: Mutex::new(snapshot),
        })
    }

    /// Volatile store for tests.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(Snapshot::default()),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> Result<T> {
        let guard = self
            .state
            .lock()
            .map_err(|_| Error::Persistence("store lock poisoned".to_string()))?;
        Ok(f(&guard))
    }

    /// Changes become visible only once the snapshot is on disk.
    fn mutate(&self, f: impl FnOnce(&mut Snapshot)) -> Result<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| Error::Persistence("store lock poisoned".to_string()))?;
        let mut next = guard.clone();
        f(&mut next);
        if let Some(path) = &self.path {
            save_snapshot(path, &next)?;
        }
        *guard = next;
        Ok(())
    }
}

impl Store for JsonFileStore {
    fn user(&self, id: UserId) -> Result<Option<UserAccount>> {
        self.read(|s| s.users.get(&id.0).cloned())
    }

    fn upsert_user(&self, account: &UserAccount) -> Result<()> {
        self.mutate(|s| {
            s.users.insert(account.id.0, account.clone());
        })
    }

    fn user_by_thread(&self, thread: ThreadId) -> Result<Option<UserAccount>> {
        self.read(|s| {
            s.users
                .values()
                .find(|u| u.thread_id == Some(thread))
                .cloned()
        })
    }

    fn blacklist_entry(&self, id: UserId) -> Result<Option<BlacklistEntry>> {
        self.read(|s| s.blacklist.get(&id.0).cloned())
    }

    fn upsert_blacklist(&self, entry: &BlacklistEntry) -> Result<()> {
        self.mutate(|s| {
            s.blacklist.insert(entry.user_id.0, entry.clone());
        })
    }

    fn delete_blacklist(&self, id: UserId) -> Result<()> {
        self.mutate(|s| {
            s.blacklist.remove(&id.0);
        })
    }

    fn exemption(&self, id: UserId) -> Result<Option<ExemptionEntry>> {
        self.read(|s| s.exemptions.get(&id.0).cloned())
    }

    fn upsert_exemption(&self, entry: &ExemptionEntry) -> Result<()> {
        self.mutate(|s| {
            s.exemptions.insert(entry.user_id.0, entry.clone());
        })
    }

    fn delete_exemption(&self, id: UserId) -> Result<()> {
        self.mutate(|s| {
            s.exemptions.remove(&id.0);
        })
    }

    fn append_quarantine(&self, record: &QuarantineRecord) -> Result<()> {
        self.mutate(|s| s.quarantine.push(record.clone()))
    }

    fn user_count(&self) -> Result<usize> {
        self.read(|s| s.users.len())
    }

    fn blacklist_page(&self, offset: usize, limit: usize) -> Result<(Vec<BlacklistEntry>, usize)> {
        self.read(|s| {
            let mut rows: Vec<&BlacklistEntry> = s.blacklist.values().collect();
            rows.sort_by(|a, b| b.blocked_at.cmp(&a.blocked_at));
            let page = rows.into_iter().skip(offset).take(limit).cloned().collect();
            (page, s.blacklist.len())
        })
    }

    fn quarantine_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<QuarantineRecord>, usize)> {
        self.read(|s| {
            // Appended in arrival order.
            let page = s
                .quarantine
                .iter()
                .rev()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect();
            (page, s.quarantine.len())
        })
    }
}

fn load_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let data: Snapshot = serde_json::from_str(&txt)
        .map_err(|e| Error::Persistence(format!("corrupt store {}: {e}", path.display())))?;
    Ok(Some(data))
}

fn save_snapshot(path: &Path, data: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Persistence(format!("create {}: {e}", parent.display())))?;
        }
    }
    let txt = serde_json::to_string_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, txt)
        .map_err(|e| Error::Persistence(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| Error::Persistence(format!("rename to {}: {e}", path.display())))?;
    Ok(())
}
