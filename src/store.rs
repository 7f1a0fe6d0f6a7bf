//! Per-tenant persistent vector indexes.
//!
//! Every tenant owns one directory under the storage root, named by its
//! [`TenantKey`]:
//!
//! ```text
//! <root>/
//! ├── alice/
//! │   ├── CURRENT            name of the live index directory
//! │   ├── index-<uuid>/      manifest.json, records.json, vectors.bin
//! │   └── files/             source files of the live index
//! ├── ~41lice/               tenant "Alice"
//! └── .uploads-<uuid>/       scratch space (never a tenant key)
//! ```
//!
//! A rebuild embeds every record first, writes the new index into a
//! dot-prefixed staging directory, and only then publishes it: the staging
//! directory is renamed to a fresh `index-<uuid>` and `CURRENT` is replaced
//! by an atomic rename. Readers therefore see the fully-old or the
//! fully-new index, and a failed rebuild leaves the previous one in place.
//!
//! Within the process, each tenant has a rebuild lock (at most one rebuild
//! or delete in flight; contenders fail fast with
//! [`RagError::ConcurrentModification`]) and a swap lock that keeps readers
//! off the pointer while it moves. Tenants never share locks. Lock state
//! is kept only while some operation holds it, so looking up unknown
//! tenants leaves nothing behind.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError, Weak};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::{embed_batched, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::models::DocumentRecord;
use crate::tenant::TenantKey;

const CURRENT_FILE: &str = "CURRENT";
const FILES_DIR: &str = "files";
const VERSION_PREFIX: &str = "index-";

/// Outcome of a successful rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub tenant: String,
    pub records: usize,
    pub model: String,
    pub dims: usize,
    pub version: String,
}

#[derive(Default)]
struct TenantLock {
    rebuild: Mutex<()>,
    swap: RwLock<()>,
}

pub struct TenantIndexStore {
    root: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    locks: Mutex<HashMap<TenantKey, Weak<TenantLock>>>,
}

impl TenantIndexStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(
        root: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| RagError::io("creating storage root", e))?;
        Ok(Self {
            root,
            embedder,
            batch_size: batch_size.max(1),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    fn tenant_dir(&self, key: &TenantKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Lock state for `key`, shared with every operation currently holding
    /// it. Entries nobody holds are pruned when a new one is made.
    fn lock_for(&self, key: &TenantKey) -> Arc<TenantLock> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(key).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(TenantLock::default());
        locks.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }

    fn try_rebuild<'a>(lock: &'a TenantLock, tenant: &str) -> Result<MutexGuard<'a, ()>> {
        match lock.rebuild.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(p)) => Ok(p.into_inner()),
            Err(TryLockError::WouldBlock) => Err(RagError::ConcurrentModification {
                tenant: tenant.to_string(),
            }),
        }
    }

    /// Embed `records` and replace the tenant's index with them.
    pub fn build(&self, tenant: &str, records: Vec<DocumentRecord>) -> Result<IndexSummary> {
        self.build_with_source(tenant, records, None)
    }

    /// Like [`build`](Self::build), additionally replacing the tenant's
    /// stored source files with `source` when the new index is published.
    ///
    /// `source` is moved, not copied; on failure it is left where it was.
    pub fn build_with_source(
        &self,
        tenant: &str,
        records: Vec<DocumentRecord>,
        source: Option<&Path>,
    ) -> Result<IndexSummary> {
        self.rebuild(tenant, records, source, false)
    }

    /// Like [`build_with_source`](Self::build_with_source), for a tenant
    /// that already has a live index. Fails with
    /// [`RagError::TenantNotFound`] otherwise. The existence check runs
    /// under the rebuild lock, so a concurrent delete cannot interleave.
    pub fn replace_with_source(
        &self,
        tenant: &str,
        records: Vec<DocumentRecord>,
        source: Option<&Path>,
    ) -> Result<IndexSummary> {
        self.rebuild(tenant, records, source, true)
    }

    fn rebuild(
        &self,
        tenant: &str,
        records: Vec<DocumentRecord>,
        source: Option<&Path>,
        require_existing: bool,
    ) -> Result<IndexSummary> {
        let key = TenantKey::encode(tenant)?;
        let lock = self.lock_for(&key);
        let _rebuild = Self::try_rebuild(&lock, tenant)?;
        if require_existing && !self.exists(tenant) {
            return Err(RagError::tenant_not_found(tenant));
        }

        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        debug!(tenant, records = texts.len(), "embedding records");
        let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size)?;
        let index = VectorIndex::new(
            self.embedder.model_name(),
            self.embedder.dims(),
            records,
            vectors,
        )?;

        let dir = self.tenant_dir(&key);
        fs::create_dir_all(&dir).map_err(|e| RagError::io("creating tenant directory", e))?;

        let staging = dir.join(format!(".staging-{}", Uuid::new_v4().simple()));
        if let Err(e) = index.save(&staging) {
            remove_dir_quietly(&staging);
            return Err(e);
        }

        let staged_files = match source {
            Some(path) => match stage_source_files(&dir, path) {
                Ok(p) => Some(p),
                Err(e) => {
                    remove_dir_quietly(&staging);
                    return Err(e);
                }
            },
            None => None,
        };

        let version = format!("{}{}", VERSION_PREFIX, Uuid::new_v4().simple());
        let published = {
            let _swap = lock.swap.write().unwrap_or_else(PoisonError::into_inner);
            publish(&dir, &staging, &version, staged_files.as_deref())
        };
        if let Err(e) = published {
            remove_dir_quietly(&staging);
            if let Some(files) = &staged_files {
                // Only reached if the pointer never moved; hand the upload back.
                if let Some(path) = source {
                    if let Some(name) = path.file_name() {
                        let _ = fs::rename(files.join(name), path);
                    }
                }
                remove_dir_quietly(files);
            }
            return Err(e);
        }

        collect_garbage(&dir, &version);
        info!(tenant, records = index.len(), %version, "published tenant index");

        Ok(IndexSummary {
            tenant: tenant.to_string(),
            records: index.len(),
            model: index.model().to_string(),
            dims: index.dims(),
            version,
        })
    }

    /// Load the tenant's live index.
    pub fn load(&self, tenant: &str) -> Result<VectorIndex> {
        let key = TenantKey::encode(tenant)?;
        let lock = self.lock_for(&key);
        let _swap = lock.swap.read().unwrap_or_else(PoisonError::into_inner);

        let dir = self.tenant_dir(&key);
        let version = read_pointer(&dir, tenant)?;
        let index_dir = dir.join(&version);
        if !index_dir.is_dir() {
            return Err(RagError::corrupt(
                tenant,
                format!("live index {} is missing", version),
            ));
        }
        VectorIndex::load(
            &index_dir,
            tenant,
            self.embedder.model_name(),
            self.embedder.dims(),
        )
    }

    /// Remove every persisted trace of the tenant.
    ///
    /// Fails with [`RagError::TenantNotFound`] when there is nothing to
    /// remove, so a repeated delete is distinguishable from the first.
    pub fn delete(&self, tenant: &str) -> Result<()> {
        let key = TenantKey::encode(tenant)?;
        let lock = self.lock_for(&key);
        let _rebuild = Self::try_rebuild(&lock, tenant)?;
        let _swap = lock.swap.write().unwrap_or_else(PoisonError::into_inner);

        let dir = self.tenant_dir(&key);
        if !dir.is_dir() {
            return Err(RagError::tenant_not_found(tenant));
        }

        let trash = self.root.join(format!(".trash-{}", Uuid::new_v4().simple()));
        fs::rename(&dir, &trash).map_err(|e| RagError::io("detaching tenant directory", e))?;
        if let Err(e) = fs::remove_dir_all(&trash) {
            warn!(tenant, error = %e, path = %trash.display(), "failed to remove detached tenant data");
        }
        info!(tenant, "removed tenant");
        Ok(())
    }

    /// Whether the tenant has a live index. Invalid ids never do.
    pub fn exists(&self, tenant: &str) -> bool {
        let Ok(key) = TenantKey::encode(tenant) else {
            return false;
        };
        let lock = self.lock_for(&key);
        let _swap = lock.swap.read().unwrap_or_else(PoisonError::into_inner);
        let dir = self.tenant_dir(&key);
        read_pointer(&dir, tenant)
            .map(|version| dir.join(version).is_dir())
            .unwrap_or(false)
    }

    /// All tenants with a live index.
    pub fn list_tenants(&self) -> Result<BTreeSet<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| RagError::io("listing storage root", e))?;
        let mut tenants = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| RagError::io("listing storage root", e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(tenant) = TenantKey::decode(name) {
                if self.exists(&tenant) {
                    tenants.insert(tenant);
                }
            }
        }
        Ok(tenants)
    }

    /// Names of the source files behind the tenant's live index, sorted.
    pub fn list_source_files(&self, tenant: &str) -> Result<Vec<String>> {
        if !self.exists(tenant) {
            return Err(RagError::tenant_not_found(tenant));
        }
        let key = TenantKey::encode(tenant)?;
        let lock = self.lock_for(&key);
        let _swap = lock.swap.read().unwrap_or_else(PoisonError::into_inner);

        let files_dir = self.tenant_dir(&key).join(FILES_DIR);
        let entries = match fs::read_dir(&files_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RagError::io("listing tenant files", e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RagError::io("listing tenant files", e))?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Scratch directory for an incoming upload, outside every tenant's
    /// namespace. Callers remove it when done.
    pub fn upload_scratch_dir(&self) -> Result<PathBuf> {
        let dir = self.root.join(format!(".uploads-{}", Uuid::new_v4().simple()));
        fs::create_dir_all(&dir).map_err(|e| RagError::io("creating upload directory", e))?;
        Ok(dir)
    }
}

/// Read the `CURRENT` pointer. A missing pointer means the tenant has no index.
fn read_pointer(dir: &Path, tenant: &str) -> Result<String> {
    let raw = match fs::read_to_string(dir.join(CURRENT_FILE)) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RagError::tenant_not_found(tenant))
        }
        Err(e) => return Err(RagError::io("reading index pointer", e)),
    };
    let version = raw.trim();
    let valid = version.starts_with(VERSION_PREFIX)
        && version[VERSION_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(RagError::corrupt(tenant, "index pointer is malformed"));
    }
    Ok(version.to_string())
}

/// Move the upload into a fresh dot-prefixed files directory.
fn stage_source_files(dir: &Path, source: &Path) -> Result<PathBuf> {
    let name = source
        .file_name()
        .ok_or_else(|| RagError::bad_request("source path has no file name"))?;
    let staged = dir.join(format!(".files-{}", Uuid::new_v4().simple()));
    fs::create_dir_all(&staged).map_err(|e| RagError::io("staging source files", e))?;
    if let Err(e) = fs::rename(source, staged.join(name)) {
        remove_dir_quietly(&staged);
        return Err(RagError::io("staging source files", e));
    }
    Ok(staged)
}

/// Publish a staged index. Caller holds the tenant's swap lock.
fn publish(dir: &Path, staging: &Path, version: &str, staged_files: Option<&Path>) -> Result<()> {
    fs::rename(staging, dir.join(version)).map_err(|e| RagError::io("publishing index", e))?;

    let tmp = dir.join(format!(".{}-{}", CURRENT_FILE, Uuid::new_v4().simple()));
    let written = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp)
        .and_then(|mut f| {
            f.write_all(version.as_bytes())?;
            f.sync_all()
        });
    if let Err(e) = written.and_then(|_| fs::rename(&tmp, dir.join(CURRENT_FILE))) {
        let _ = fs::remove_file(&tmp);
        let _ = fs::rename(dir.join(version), staging);
        return Err(RagError::io("updating index pointer", e));
    }

    // The index is live from here on; a file-swap failure only affects
    // the listing of source files.
    if let Some(staged) = staged_files {
        let live = dir.join(FILES_DIR);
        let retired = dir.join(format!(".files-old-{}", Uuid::new_v4().simple()));
        if live.exists() {
            if let Err(e) = fs::rename(&live, &retired) {
                warn!(error = %e, "failed to retire previous source files");
            }
        }
        if let Err(e) = fs::rename(staged, &live) {
            warn!(error = %e, "failed to install new source files");
        }
    }
    Ok(())
}

/// Remove index versions other than `live`, plus leftover scratch
/// directories. Only called while holding the tenant's rebuild lock.
fn collect_garbage(dir: &Path, live: &str) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let stale = (name.starts_with(VERSION_PREFIX) && name != live)
            || name.starts_with(".files-old-")
            || name.starts_with(".staging-");
        if stale && entry.path().is_dir() {
            remove_dir_quietly(&entry.path());
        }
    }
}

fn remove_dir_quietly(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to clean up directory");
        }
    }
}
