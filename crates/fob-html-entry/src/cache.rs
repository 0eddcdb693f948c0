//! Deduplicating sub-build cache.
//!
//! References are keyed by [`CacheKey`]: the asset path, its mode, whether the
//! mode splits and, for splitting modes, the whole cohort of paths split
//! together (splitting output depends on every entry in the cohort). The cache
//! stores [`Deferred`] slots rather than finished values, so concurrent lookups
//! of a key that is still compiling converge on the one in-flight build.
//!
//! # Cache Invalidation
//!
//! A finished build is reused only while the BLAKE3 hash of every input in its
//! metadata graph is unchanged. Failed builds are evicted immediately.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use blake3::Hasher;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::compiler::Compiler;
use crate::config::BuildContext;
use crate::deferred::Deferred;
use crate::executor::{ResolvedAssets, SubBuildInput, SubBuildOutput, run_sub_build};
use crate::paths::absolutize;
use crate::types::Mode;
use crate::{Error, Result};

/// Current key format version. Increment when the key derivation changes.
const CACHE_FORMAT_VERSION: u32 = 1;

/// Content-addressed cache key (BLAKE3 hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Get the cache key as a hex string.
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the key of one reference.
///
/// `cohort` only contributes when `splitting` is set; it is iterated in sorted
/// order so the key does not depend on discovery order.
pub fn compute_cache_key(
    path: &str,
    mode: Mode,
    splitting: bool,
    cohort: &BTreeSet<String>,
) -> CacheKey {
    let mut hasher = Hasher::new();
    hasher.update(&CACHE_FORMAT_VERSION.to_le_bytes());
    hasher.update(mode.as_str().as_bytes());
    hasher.update(&[splitting as u8]);
    hasher.update(path.as_bytes());
    hasher.update(&[0]);

    if splitting {
        for member in cohort {
            hasher.update(member.as_bytes());
            hasher.update(&[0]);
        }
    }

    CacheKey(hasher.finalize().to_hex().to_string())
}

/// A finished sub-build plus the content hashes of its inputs.
#[derive(Debug)]
pub struct CachedBuild {
    pub output: Arc<SubBuildOutput>,
    fingerprints: BTreeMap<PathBuf, [u8; 32]>,
}

impl CachedBuild {
    async fn new(output: SubBuildOutput, context: &BuildContext) -> Self {
        let mut fingerprints = BTreeMap::new();
        for input in output.metafile.inputs.keys() {
            let path = absolutize(&context.working_dir, input);
            if let Some(hash) = fingerprint(&path).await {
                fingerprints.insert(path, hash);
            }
        }

        Self {
            output: Arc::new(output),
            fingerprints,
        }
    }

    /// Whether every input still hashes to the recorded value.
    pub async fn is_fresh(&self) -> bool {
        for (path, expected) in &self.fingerprints {
            match fingerprint(path).await {
                Some(actual) if actual == *expected => {}
                _ => return false,
            }
        }
        true
    }
}

async fn fingerprint(path: &std::path::Path) -> Option<[u8; 32]> {
    let contents = tokio::fs::read(path).await.ok()?;
    Some(*blake3::hash(&contents).as_bytes())
}

type Slot = Deferred<Arc<CachedBuild>>;

/// Shared map from [`CacheKey`] to in-flight or finished sub-builds.
#[derive(Debug, Default)]
pub struct SubBuildCache {
    entries: Mutex<FxHashMap<CacheKey, Slot>>,
}

/// Rejects claimed slots that were never settled, so waiters on another
/// document are released if the owning build is dropped mid-flight.
struct Claimed(Vec<Slot>);

impl Drop for Claimed {
    fn drop(&mut self) {
        for slot in &self.0 {
            slot.reject(Error::Internal("sub-build was cancelled".to_string()));
        }
    }
}

impl SubBuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Resolve every reference in `input`, compiling only the cache misses.
    ///
    /// Misses are grouped into a single executor run, so each mode is compiled
    /// at most once per call. Hits await the shared slot of whichever call
    /// claimed the key first.
    pub async fn resolve(
        &self,
        compiler: &dyn Compiler,
        context: &BuildContext,
        entry_names: &str,
        input: &SubBuildInput,
    ) -> Result<ResolvedAssets> {
        let keyed: Vec<(Mode, &str, CacheKey)> = input
            .iter()
            .map(|(mode, path)| {
                let splitting = context.splitting && mode.supports_splitting();
                let key = compute_cache_key(path, mode, splitting, input.get(mode));
                (mode, path, key)
            })
            .collect();

        self.evict_unusable(&keyed).await;

        // Claim every missing key under one lock so no other caller can start
        // a second build for it.
        let mut hits = Vec::new();
        let mut misses = SubBuildInput::new();
        let mut claimed = Vec::new();
        {
            let mut entries = self.entries.lock();
            for (mode, path, key) in &keyed {
                match entries.get(key) {
                    Some(slot) => hits.push((*mode, *path, slot.clone())),
                    None => {
                        let slot = Slot::new();
                        entries.insert(key.clone(), slot.clone());
                        misses.insert(*mode, *path);
                        claimed.push((*mode, *path, key.clone(), slot));
                    }
                }
            }
        }

        debug!(hits = hits.len(), misses = misses.len(), "sub-build cache lookup");

        let mut assets = ResolvedAssets::new();

        if !misses.is_empty() {
            let guard = Claimed(claimed.iter().map(|(.., slot)| slot.clone()).collect());

            match run_sub_build(compiler, context, entry_names, &misses).await {
                Ok(output) => {
                    let build = Arc::new(CachedBuild::new(output, context).await);
                    for (mode, path, _, slot) in &claimed {
                        slot.resolve(Arc::clone(&build));
                        assets.insert(*mode, path, &build.output)?;
                    }
                }
                Err(error) => {
                    let mut entries = self.entries.lock();
                    for (_, _, key, slot) in &claimed {
                        slot.reject(error.clone());
                        if entries.get(key).is_some_and(|current| current.ptr_eq(slot)) {
                            entries.remove(key);
                        }
                    }
                    return Err(error);
                }
            }

            drop(guard);
        }

        for (mode, path, slot) in hits {
            let build = slot.wait().await?;
            assets.insert(mode, path, &build.output)?;
        }

        Ok(assets)
    }

    /// Drop failed slots and finished builds whose inputs changed.
    async fn evict_unusable(&self, keyed: &[(Mode, &str, CacheKey)]) {
        let existing: Vec<(CacheKey, Slot)> = {
            let entries = self.entries.lock();
            keyed
                .iter()
                .filter_map(|(_, _, key)| entries.get(key).map(|slot| (key.clone(), slot.clone())))
                .collect()
        };

        let mut unusable = Vec::new();
        for (key, slot) in existing {
            let usable = match slot.peek() {
                None => true,
                Some(Ok(build)) => build.is_fresh().await,
                Some(Err(_)) => false,
            };
            if !usable {
                debug!(key = %key, "evicting sub-build cache entry");
                unusable.push((key, slot));
            }
        }

        if unusable.is_empty() {
            return;
        }

        let mut entries = self.entries.lock();
        for (key, slot) in unusable {
            if entries.get(&key).is_some_and(|current| current.ptr_eq(&slot)) {
                entries.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cohort(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = compute_cache_key("src/a.js", Mode::Esm, true, &cohort(&["src/a.js", "src/b.js"]));
        let b = compute_cache_key("src/a.js", Mode::Esm, true, &cohort(&["src/b.js", "src/a.js"]));
        assert_eq!(a, b);
        assert_eq!(a.as_hex().len(), 64);
    }

    #[test]
    fn test_key_depends_on_mode() {
        let empty = BTreeSet::new();
        assert_ne!(
            compute_cache_key("src/a.js", Mode::Esm, false, &empty),
            compute_cache_key("src/a.js", Mode::Iife, false, &empty)
        );
    }

    #[test]
    fn test_cohort_only_matters_when_splitting() {
        let small = cohort(&["src/a.js"]);
        let large = cohort(&["src/a.js", "src/b.js"]);

        assert_eq!(
            compute_cache_key("src/a.js", Mode::Iife, false, &small),
            compute_cache_key("src/a.js", Mode::Iife, false, &large)
        );
        assert_ne!(
            compute_cache_key("src/a.js", Mode::Esm, true, &small),
            compute_cache_key("src/a.js", Mode::Esm, true, &large)
        );
    }
}
