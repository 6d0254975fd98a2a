//! Deterministic mock provider for tests.
//!
//! Vectors are feature-hashed bags of lowercase alphanumeric tokens, so
//! texts sharing words land close together under cosine distance. Every
//! call is recorded, and failures can be injected for texts containing a
//! given substring or for all calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingProvider, EmbeddingRole, ModelInfo, RolePrefixes};

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub role: EmbeddingRole,
    /// Texts as sent to the model, role marker included
    pub inputs: Vec<String>,
}

/// Mock embedder with call recording and failure injection.
pub struct MockEmbedder {
    info: ModelInfo,
    prefixes: RolePrefixes,
    calls: Mutex<Vec<MockCall>>,
    fail_on: Mutex<Vec<String>>,
    fail_all: AtomicBool,
    dimension_override: Mutex<Option<usize>>,
}

impl MockEmbedder {
    /// Create a new mock embedder producing `dimension`-length vectors.
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            info: ModelInfo {
                name: name.into(),
                dimension,
            },
            prefixes: RolePrefixes::default(),
            calls: Mutex::new(Vec::new()),
            fail_on: Mutex::new(Vec::new()),
            fail_all: AtomicBool::new(false),
            dimension_override: Mutex::new(None),
        }
    }

    pub fn with_prefixes(mut self, prefixes: RolePrefixes) -> Self {
        self.prefixes = prefixes;
        self
    }

    /// Fail any call whose inputs contain `needle`.
    pub fn fail_on(&self, needle: impl Into<String>) {
        lock(&self.fail_on).push(needle.into());
    }

    /// Fail every call until [`MockEmbedder::recover`].
    pub fn fail_all(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    /// Clear all injected failures.
    pub fn recover(&self) {
        self.fail_all.store(false, Ordering::SeqCst);
        lock(&self.fail_on).clear();
    }

    /// Return vectors of a different length than advertised.
    pub fn emit_dimension(&self, dimension: usize) {
        *lock(&self.dimension_override) = Some(dimension);
    }

    /// All calls so far.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls so far.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of texts embedded under `role`.
    pub fn texts_embedded(&self, role: EmbeddingRole) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.role == role)
            .map(|c| c.inputs.len())
            .sum()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    /// The vector this mock produces for an already-prefixed input.
    pub fn vector_for(&self, input: &str) -> Embedding {
        let dimension = (*lock(&self.dimension_override)).unwrap_or(self.info.dimension);
        hashed_embedding(input, dimension)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// FNV-1a, 64 bit.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn hashed_embedding(text: &str, dimension: usize) -> Embedding {
    let mut values = vec![0.0f32; dimension];
    if dimension == 0 {
        return Embedding::new(values);
    }

    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let bucket = (fnv1a(token.to_lowercase().as_bytes()) % dimension as u64) as usize;
        values[bucket] += 1.0;
    }

    if values.iter().all(|v| *v == 0.0) {
        values[0] = 1.0;
    }
    Embedding::normalized(values)
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    async fn embed(
        &self,
        texts: &[String],
        role: EmbeddingRole,
    ) -> Result<Vec<Embedding>, EmbeddingError> {
        let inputs: Vec<String> = texts.iter().map(|t| self.prefixes.apply(role, t)).collect();
        lock(&self.calls).push(MockCall {
            role,
            inputs: inputs.clone(),
        });

        if self.fail_all.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Unavailable("mock provider down".to_string()));
        }
        {
            let fail_on = lock(&self.fail_on);
            if let Some(needle) = fail_on
                .iter()
                .find(|needle| inputs.iter().any(|i| i.contains(needle.as_str())))
            {
                return Err(EmbeddingError::Unavailable(format!(
                    "injected failure on '{}'",
                    needle
                )));
            }
        }

        Ok(inputs.iter().map(|i| self.vector_for(i)).collect())
    }
}
