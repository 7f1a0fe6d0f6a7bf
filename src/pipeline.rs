//! The retrieval-augmented query pipeline.
//!
//! Every query runs the same four stages, in order, with nothing cached
//! between calls:
//!
//! 1. load the tenant's index ([`RagError::TenantNotFound`] if absent)
//! 2. embed the query text
//! 3. retrieve the top-K records
//! 4. generate an answer from the query and those records
//!
//! [`QueryMode::ReferenceLink`] rewrites the query text before stage 2 and
//! otherwise shares every stage.

use std::sync::Arc;

use tracing::{debug, info, info_span};

use crate::embedding::embed_query;
use crate::error::{RagError, Result};
use crate::generation::{generate, reference_link_query, Generator};
use crate::models::{Answer, QueryMode};
use crate::retriever::search;
use crate::store::TenantIndexStore;

pub struct RagPipeline {
    store: Arc<TenantIndexStore>,
    generator: Arc<dyn Generator>,
    top_k: usize,
}

impl RagPipeline {
    pub fn new(store: Arc<TenantIndexStore>, generator: Arc<dyn Generator>, top_k: usize) -> Self {
        Self {
            store,
            generator,
            top_k,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Answer `query` from `tenant`'s index.
    pub fn answer(&self, tenant: &str, query: &str, mode: QueryMode) -> Result<Answer> {
        let _span = info_span!("query", tenant, ?mode).entered();

        if query.trim().is_empty() {
            return Err(RagError::bad_request("query must not be empty"));
        }

        let index = self.store.load(tenant)?;

        let query_text = match mode {
            QueryMode::Answer => query.to_string(),
            QueryMode::ReferenceLink => reference_link_query(query),
        };

        let vector = embed_query(self.store.embedder().as_ref(), &query_text)?;
        let context = search(&index, &vector, self.top_k)?;
        debug!(retrieved = context.len(), indexed = index.len(), "retrieved context");

        let text = generate(self.generator.as_ref(), &query_text, &context)?;
        info!(model = self.generator.model_name(), "generated answer");

        Ok(Answer {
            text,
            mode,
            context,
        })
    }
}
