//! Cross-document build coordination.
//!
//! One [`BuildState`] lives for one top-level build. Every entry document is
//! registered as expected while entries are discovered, then contributes the
//! references it found. The contribution that makes the contributed set equal
//! to the expected set closes the barrier and starts the single sub-build;
//! every document (the closing one included) awaits that shared result.
//!
//! ```text
//!   Open ──(last contribution)──▶ Closed ──▶ result settles
//!     │
//!     └──(deadline elapsed)──▶ Abandoned ──▶ result rejected with the timeout
//! ```
//!
//! All state changes happen inside short synchronous critical sections that
//! never await, so contributions are applied atomically and exactly one
//! contributor observes the transition out of `Open`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::SubBuildCache;
use crate::compiler::Compiler;
use crate::config::{BuildContext, HtmlEntryOptions};
use crate::deferred::Deferred;
use crate::executor::{ResolvedAssets, SubBuildInput, run_sub_build};
use crate::metafile::ImportRecord;
use crate::timeout::with_timeout;
use crate::types::AssetReference;
use crate::{Error, Result};

/// What a document recorded about itself for the final metadata graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMeta {
    /// Size of the document as read, before any rewriting.
    pub input_bytes: u64,
    /// Edges to every reference found while scanning, external ones included.
    pub imports: Vec<ImportRecord>,
}

/// One document's contribution to the shared sub-build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentContribution {
    /// Document path relative to the working directory.
    pub document: String,
    pub references: Vec<AssetReference>,
    pub meta: DocumentMeta,
}

impl DocumentContribution {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            references: Vec::new(),
            meta: DocumentMeta::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closed,
    Abandoned,
}

#[derive(Debug)]
struct StateInner {
    expected: BTreeSet<String>,
    contributed: BTreeSet<String>,
    input: SubBuildInput,
    documents: BTreeMap<String, DocumentMeta>,
    phase: Phase,
}

/// Per-build coordinator state.
///
/// Created fresh for every top-level build and dropped only after that build's
/// end callback has drained the sub-build; it is never reset in place.
#[derive(Debug)]
pub struct BuildState {
    inner: Mutex<StateInner>,
    barrier: Deferred<()>,
    result: Deferred<Arc<ResolvedAssets>>,
}

impl Default for BuildState {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                expected: BTreeSet::new(),
                contributed: BTreeSet::new(),
                input: SubBuildInput::new(),
                documents: BTreeMap::new(),
                phase: Phase::Open,
            }),
            barrier: Deferred::new(),
            result: Deferred::new(),
        }
    }

    pub fn expected_count(&self) -> usize {
        self.inner.lock().expected.len()
    }

    pub fn contributed_count(&self) -> usize {
        self.inner.lock().contributed.len()
    }

    /// Whether the barrier closed and the sub-build was started.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().phase == Phase::Closed
    }

    /// Whether the deadline elapsed before the barrier closed.
    pub fn is_abandoned(&self) -> bool {
        self.inner.lock().phase == Phase::Abandoned
    }

    /// Every document registered or contributed so far, relative to the
    /// working directory.
    pub fn expected_documents(&self) -> Vec<String> {
        self.inner.lock().expected.iter().cloned().collect()
    }

    /// Snapshot of the accumulated sub-build input.
    pub fn input(&self) -> SubBuildInput {
        self.inner.lock().input.clone()
    }

    /// Snapshot of every contributed document's metadata.
    pub fn documents(&self) -> BTreeMap<String, DocumentMeta> {
        self.inner.lock().documents.clone()
    }

    /// The shared sub-build result.
    pub fn result(&self) -> &Deferred<Arc<ResolvedAssets>> {
        &self.result
    }

    fn timeout_message(&self, timeout: Duration) -> String {
        let inner = self.inner.lock();
        let missing: Vec<&str> = inner
            .expected
            .difference(&inner.contributed)
            .map(String::as_str)
            .collect();
        format!(
            "Timed out after {}ms waiting for HTML entry points to resolve their references \
             ({} of {} contributed; still waiting for: {})",
            timeout.as_millis(),
            inner.contributed.len(),
            inner.expected.len(),
            missing.join(", ")
        )
    }
}

/// Drives the barrier for one [`BuildState`] and starts its sub-build.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Coordinator {
    state: Arc<BuildState>,
    compiler: Arc<dyn Compiler>,
    context: Arc<BuildContext>,
    entry_names: Arc<str>,
    cache: Option<Arc<SubBuildCache>>,
    timeout: Duration,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.state)
            .field("entry_names", &self.entry_names)
            .field("cache", &self.cache.is_some())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// A coordinator over a fresh [`BuildState`].
    ///
    /// `context` must already be validated (absolute directories).
    pub fn new(
        compiler: Arc<dyn Compiler>,
        context: Arc<BuildContext>,
        options: &HtmlEntryOptions,
        cache: Option<Arc<SubBuildCache>>,
    ) -> Self {
        let entry_names: Arc<str> = Arc::from(options.names_for(&context));
        Self {
            state: Arc::new(BuildState::new()),
            compiler,
            context,
            entry_names,
            cache,
            timeout: options.barrier_timeout_duration(),
        }
    }

    /// Another coordinator with the same collaborators over a fresh state.
    pub fn fresh(&self) -> Self {
        Self {
            state: Arc::new(BuildState::new()),
            ..self.clone()
        }
    }

    pub fn state(&self) -> &Arc<BuildState> {
        &self.state
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    /// Record that `document` is an entry point the barrier must wait for.
    ///
    /// Idempotent: registering the same path twice does not raise the
    /// expected count. Returns whether the path was new.
    pub fn register_expected_document(&self, document: &str) -> Result<bool> {
        let mut inner = self.state.inner.lock();
        if inner.phase != Phase::Open {
            return Err(Error::BarrierClosed {
                document: document.to_string(),
            });
        }
        let added = inner.expected.insert(document.to_string());
        if added {
            debug!(document, expected = inner.expected.len(), "registered HTML entry point");
        }
        Ok(added)
    }

    /// Merge one document's references into the shared input.
    ///
    /// The contribution that completes the expected set closes the barrier and
    /// starts the sub-build. Contributions after that (or after the build was
    /// abandoned) fail with [`Error::BarrierClosed`].
    pub fn contribute(&self, contribution: DocumentContribution) -> Result<()> {
        let DocumentContribution {
            document,
            references,
            meta,
        } = contribution;

        let input = {
            let mut inner = self.state.inner.lock();
            if inner.phase != Phase::Open {
                return Err(Error::BarrierClosed { document });
            }

            if inner.expected.insert(document.clone()) {
                warn!(document = %document, "contribution from an HTML document that was never registered");
            }
            if !inner.contributed.insert(document.clone()) {
                warn!(document = %document, "HTML document contributed more than once");
            }

            for reference in references.iter().filter(|r| !r.external) {
                inner
                    .input
                    .insert(reference.mode, reference.resolved_path.clone());
            }
            inner.documents.insert(document.clone(), meta);

            debug!(
                document = %document,
                references = references.len(),
                contributed = inner.contributed.len(),
                expected = inner.expected.len(),
                "document contributed"
            );

            if inner.contributed.len() < inner.expected.len() {
                return Ok(());
            }

            inner.phase = Phase::Closed;
            inner.input.clone()
        };

        info!(
            documents = self.state.contributed_count(),
            subresources = input.len(),
            "all HTML entry points contributed, starting sub-build"
        );
        self.state.barrier.resolve(());
        self.start_sub_build(input);
        Ok(())
    }

    fn start_sub_build(&self, input: SubBuildInput) {
        let compiler = Arc::clone(&self.compiler);
        let context = Arc::clone(&self.context);
        let entry_names = Arc::clone(&self.entry_names);
        let cache = self.cache.clone();
        let result = self.state.result.clone();

        let sub_build = tokio::spawn(async move {
            match cache {
                Some(cache) => {
                    cache
                        .resolve(compiler.as_ref(), &context, &entry_names, &input)
                        .await
                }
                None => run_sub_build(compiler.as_ref(), &context, &entry_names, &input)
                    .await
                    .map(|output| ResolvedAssets::from_build(Arc::new(output))),
            }
        });

        tokio::spawn(async move {
            let outcome = match sub_build.await {
                Ok(outcome) => outcome.map(Arc::new),
                Err(join_error) => Err(Error::Internal(format!(
                    "sub-build task failed: {}",
                    join_error
                ))),
            };
            if let Err(error) = &outcome {
                warn!(%error, "sub-build failed");
            }
            result.settle(outcome);
        });
    }

    /// Wait for the shared sub-build result.
    ///
    /// The deadline bounds only the wait for the barrier to close (how long
    /// the other documents take to resolve their references); once the
    /// sub-build has started, the wait lasts as long as the compiler does.
    pub async fn await_result(&self) -> Result<Arc<ResolvedAssets>> {
        match with_timeout(self.timeout, "barrier", self.state.barrier.wait()).await {
            Ok(closed) => closed?,
            Err(_) => {
                let error = Error::Timeout {
                    message: self.state.timeout_message(self.timeout),
                };
                if self.abandon(error.clone()) {
                    warn!(%error, "HTML entry barrier timed out");
                    return Err(error);
                }
                // The barrier closed while the timer fired.
            }
        }

        self.state.result.wait().await
    }

    /// Stop accepting contributions and fail every waiter with `error`.
    ///
    /// Has no effect once the barrier has closed. Returns whether the state
    /// was abandoned by this call.
    pub fn abandon(&self, error: Error) -> bool {
        {
            let mut inner = self.state.inner.lock();
            if inner.phase != Phase::Open {
                return false;
            }
            inner.phase = Phase::Abandoned;
        }
        self.state.barrier.reject(error.clone());
        self.state.result.reject(error);
        true
    }

    /// Wait for any sub-build this state started.
    ///
    /// Returns `Ok(None)` when the barrier never closed. A closed or abandoned
    /// state yields its settled result.
    pub async fn drain(&self) -> Result<Option<Arc<ResolvedAssets>>> {
        let phase = self.state.inner.lock().phase;
        match phase {
            Phase::Open => {
                if self.state.expected_count() > 0 {
                    warn!(
                        expected = self.state.expected_count(),
                        contributed = self.state.contributed_count(),
                        "build finished before every HTML entry point contributed"
                    );
                }
                Ok(None)
            }
            Phase::Closed | Phase::Abandoned => self.state.result.wait().await.map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompileOutput, CompileRequest};
    use crate::metafile::{Metafile, OutputFile, OutputMeta};
    use crate::types::Mode;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCompiler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Compiler for CountingCompiler {
        async fn compile(&self, request: CompileRequest) -> Result<CompileOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut metafile = Metafile::new();
            let mut output_files = Vec::new();
            for entry in &request.entry_points {
                let key = format!("dist/{}.{}.js", entry.replace('/', "_"), request.mode);
                metafile.outputs.insert(
                    key.clone(),
                    OutputMeta {
                        entry_point: Some(entry.clone()),
                        ..Default::default()
                    },
                );
                output_files.push(OutputFile::new(request.working_dir.join(&key), entry.as_bytes()));
            }
            Ok(CompileOutput {
                metafile,
                output_files,
            })
        }
    }

    fn coordinator(compiler: Arc<CountingCompiler>, timeout: Duration) -> Coordinator {
        let context = BuildContext::new("/project")
            .out_dir("dist")
            .write(false)
            .validate()
            .unwrap();
        let options = HtmlEntryOptions::default().barrier_timeout(timeout);
        Coordinator::new(compiler, Arc::new(context), &options, None)
    }

    fn contribution(document: &str, refs: &[(&str, Mode)]) -> DocumentContribution {
        DocumentContribution {
            document: document.to_string(),
            references: refs
                .iter()
                .map(|(path, mode)| AssetReference {
                    document: document.to_string(),
                    original_href: format!("./{}", path),
                    resolved_path: path.to_string(),
                    mode: *mode,
                    external: false,
                })
                .collect(),
            meta: DocumentMeta::default(),
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let coordinator = coordinator(Arc::default(), Duration::from_secs(1));
        assert!(coordinator.register_expected_document("a.html").unwrap());
        assert!(!coordinator.register_expected_document("a.html").unwrap());
        assert_eq!(coordinator.state().expected_count(), 1);
    }

    #[tokio::test]
    async fn test_last_contribution_closes_barrier() {
        let compiler = Arc::new(CountingCompiler::default());
        let coordinator = coordinator(Arc::clone(&compiler), Duration::from_secs(5));
        coordinator.register_expected_document("a.html").unwrap();
        coordinator.register_expected_document("b.html").unwrap();

        coordinator
            .contribute(contribution("a.html", &[("src/a.js", Mode::Esm)]))
            .unwrap();
        assert!(!coordinator.state().is_closed());

        coordinator
            .contribute(contribution("b.html", &[("src/b.js", Mode::Iife)]))
            .unwrap();
        assert!(coordinator.state().is_closed());

        let assets = coordinator.await_result().await.unwrap();
        assert!(assets.entry(Mode::Esm, "src/a.js").is_some());
        assert!(assets.entry(Mode::Iife, "src/b.js").is_some());
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_late_contribution_is_rejected() {
        let coordinator = coordinator(Arc::default(), Duration::from_secs(5));
        coordinator.register_expected_document("a.html").unwrap();
        coordinator.contribute(contribution("a.html", &[])).unwrap();

        let error = coordinator
            .contribute(contribution("b.html", &[]))
            .unwrap_err();
        assert!(matches!(error, Error::BarrierClosed { .. }));
        assert!(matches!(
            coordinator.register_expected_document("c.html"),
            Err(Error::BarrierClosed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_abandons_state() {
        let compiler = Arc::new(CountingCompiler::default());
        let coordinator = coordinator(Arc::clone(&compiler), Duration::from_millis(100));
        coordinator.register_expected_document("a.html").unwrap();
        coordinator.register_expected_document("b.html").unwrap();
        coordinator
            .contribute(contribution("a.html", &[("src/a.js", Mode::Esm)]))
            .unwrap();

        match coordinator.await_result().await {
            Err(Error::Timeout { message }) => assert!(message.contains("b.html")),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(coordinator.state().is_abandoned());

        // A straggler cannot resurrect the abandoned result.
        assert!(matches!(
            coordinator.contribute(contribution("b.html", &[])),
            Err(Error::BarrierClosed { .. })
        ));
        assert!(matches!(coordinator.drain().await, Err(Error::Timeout { .. })));
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_drain_without_documents() {
        let coordinator = coordinator(Arc::default(), Duration::from_secs(1));
        assert!(coordinator.drain().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fresh_state_is_independent() {
        let coordinator = coordinator(Arc::default(), Duration::from_secs(1));
        coordinator.register_expected_document("a.html").unwrap();
        coordinator.contribute(contribution("a.html", &[])).unwrap();

        let next = coordinator.fresh();
        assert!(!Arc::ptr_eq(next.state(), coordinator.state()));
        assert_eq!(next.state().expected_count(), 0);
        assert!(next.register_expected_document("a.html").unwrap());
    }
}
