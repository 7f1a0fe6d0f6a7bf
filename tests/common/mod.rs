#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use tempfile::TempDir;
use tenant_rag::config::Config;
use tenant_rag::embedding::EmbeddingProvider;
use tenant_rag::error::{RagError, Result};
use tenant_rag::generation::{ChatMessage, Generator};
use tenant_rag::service::RagService;

const VOCABULARY: &[&str] = &[
    "tent", "stove", "lantern", "kayak", "paddle", "boots", "sleeping", "bag", "price", "link",
];

/// Bag-of-words embedder over a fixed vocabulary, plus one constant
/// component so no text embeds to the zero vector.
pub struct KeywordEmbedder {
    fail: AtomicBool,
    gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            gate: Mutex::new(None),
        }
    }

    /// Make every following call fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Block the next call: it signals `entered`, then waits on `release`.
    pub fn hold_next_call(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = VOCABULARY
        .iter()
        .map(|word| lower.matches(word).count() as f32)
        .collect();
    v.push(0.1);
    v
}

impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        VOCABULARY.len() + 1
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.send(()).unwrap();
            release.recv().unwrap();
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(RagError::embedding("stub provider is down"));
        }
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Generator that answers with the first line of the best context record
/// and remembers every conversation it was given.
pub struct EchoGenerator {
    pub fail: AtomicBool,
    pub conversations: Mutex<Vec<Vec<ChatMessage>>>,
}

impl EchoGenerator {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            conversations: Mutex::new(Vec::new()),
        }
    }

    pub fn last_conversation(&self) -> Vec<ChatMessage> {
        self.conversations.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

impl Generator for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo-test"
    }

    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.conversations.lock().unwrap().push(messages.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(RagError::generation("stub model refused"));
        }
        let system = &messages[0].content;
        let context = system.split("----------------\n").nth(1).unwrap_or("");
        let first = context.lines().next().unwrap_or("");
        if first.is_empty() {
            Ok("I don't know.".to_string())
        } else {
            Ok(first.to_string())
        }
    }
}

pub const PRODUCTS_CSV: &str = "name,description,link\n\
Tent,Two person tent with rain fly,https://shop.example/tent\n\
Stove,Compact camping stove,https://shop.example/stove\n\
Lantern,Rechargeable lantern,https://shop.example/lantern\n";

pub const WATER_CSV: &str = "name,description\n\
Kayak,Sit-on-top kayak\n\
Paddle,Carbon paddle\n";

pub struct Harness {
    pub tmp: TempDir,
    pub config: Config,
    pub embedder: Arc<KeywordEmbedder>,
    pub generator: Arc<EchoGenerator>,
    pub service: Arc<RagService>,
}

pub fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal(tmp.path().join("tenants"));
    config.embedding.batch_size = 2;
    let embedder = Arc::new(KeywordEmbedder::new());
    let generator = Arc::new(EchoGenerator::new());
    let service = Arc::new(
        RagService::with_providers(&config, embedder.clone(), generator.clone()).unwrap(),
    );
    Harness {
        tmp,
        config,
        embedder,
        generator,
        service,
    }
}
