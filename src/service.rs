//! Service facade: the operations exposed over HTTP and the CLI.
//!
//! [`RagService`] ties the document loader, the tenant index store and the
//! query pipeline together. Every method is blocking and returns either a
//! result or a typed [`RagError`]; callers on an async runtime should run
//! them on a blocking thread.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::generation::{create_generator, Generator};
use crate::loader::{load_bytes, TabularFormat};
use crate::models::{Answer, QueryMode};
use crate::pipeline::RagPipeline;
use crate::store::{IndexSummary, TenantIndexStore};
use crate::tenant::{sanitize_filename, TenantKey};

pub struct RagService {
    store: Arc<TenantIndexStore>,
    pipeline: RagPipeline,
    max_upload_bytes: usize,
}

impl RagService {
    /// Build the service from configuration, constructing the configured
    /// providers. Missing API keys fail here, before any provider call.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Self::with_providers(config, embedder, generator)
    }

    /// Build the service around caller-supplied providers.
    pub fn with_providers(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let store = Arc::new(TenantIndexStore::open(
            &config.storage.root,
            embedder,
            config.embedding.batch_size,
        )?);
        let pipeline = RagPipeline::new(Arc::clone(&store), generator, config.retrieval.top_k);
        Ok(Self {
            store,
            pipeline,
            max_upload_bytes: config.storage.max_upload_bytes,
        })
    }

    pub fn store(&self) -> &Arc<TenantIndexStore> {
        &self.store
    }

    /// Upload or replace a tenant's document.
    ///
    /// The file is parsed and embedded before anything is written; the
    /// tenant's index and stored source file are replaced only if every
    /// step succeeds.
    pub fn ingest(&self, tenant: &str, filename: &str, bytes: &[u8]) -> Result<IndexSummary> {
        self.upload(tenant, filename, bytes, false)
    }

    /// Replace the document of a tenant that already has an index.
    ///
    /// Fails with [`RagError::TenantNotFound`] when the tenant has none,
    /// including when it is removed while the upload is being processed.
    pub fn modify(&self, tenant: &str, filename: &str, bytes: &[u8]) -> Result<IndexSummary> {
        self.upload(tenant, filename, bytes, true)
    }

    fn upload(
        &self,
        tenant: &str,
        filename: &str,
        bytes: &[u8],
        require_existing: bool,
    ) -> Result<IndexSummary> {
        TenantKey::encode(tenant)?;
        if bytes.len() > self.max_upload_bytes {
            return Err(RagError::bad_request(format!(
                "upload is {} bytes, limit is {}",
                bytes.len(),
                self.max_upload_bytes
            )));
        }
        let name = sanitize_filename(filename)?;
        let format = TabularFormat::from_path(Path::new(&name))?;
        let records = load_bytes(&name, format, bytes)?;
        info!(tenant, file = %name, records = records.len(), "loaded document");

        let scratch = ScratchDir(self.store.upload_scratch_dir()?);
        let staged = scratch.0.join(&name);
        fs::write(&staged, bytes).map_err(|e| RagError::io("staging upload", e))?;

        if require_existing {
            self.store.replace_with_source(tenant, records, Some(&staged))
        } else {
            self.store.build_with_source(tenant, records, Some(&staged))
        }
    }

    /// Ingest a file from the local filesystem.
    pub fn ingest_path(&self, tenant: &str, path: &Path) -> Result<IndexSummary> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RagError::bad_request(format!("{} has no file name", path.display())))?;
        let bytes = fs::read(path).map_err(|e| RagError::io("reading document", e))?;
        self.ingest(tenant, filename, &bytes)
    }

    pub fn query(&self, tenant: &str, query: &str) -> Result<Answer> {
        self.pipeline.answer(tenant, query, QueryMode::Answer)
    }

    pub fn query_reference_link(&self, tenant: &str, query: &str) -> Result<Answer> {
        self.pipeline.answer(tenant, query, QueryMode::ReferenceLink)
    }

    pub fn remove_tenant(&self, tenant: &str) -> Result<()> {
        self.store.delete(tenant)
    }

    pub fn tenant_exists(&self, tenant: &str) -> bool {
        self.store.exists(tenant)
    }

    pub fn list_tenants(&self) -> Result<BTreeSet<String>> {
        self.store.list_tenants()
    }

    pub fn list_tenant_source_files(&self, tenant: &str) -> Result<Vec<String>> {
        self.store.list_source_files(tenant)
    }
}

/// Upload scratch directory, removed on drop.
struct ScratchDir(PathBuf);

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.0.display(), error = %e, "failed to remove upload scratch");
            }
        }
    }
}
