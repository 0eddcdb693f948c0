//! Host-facing lifecycle of the HTML entry plugin.
//!
//! The host calls [`HtmlEntryPlugin::on_entry_found`] for every HTML entry it
//! discovers, [`HtmlEntryPlugin::on_load`] once per document (concurrently)
//! and [`HtmlEntryPlugin::on_end`] when its own build finished. Each top-level
//! build runs against its own [`BuildState`](crate::BuildState); `on_end`
//! swaps in a fresh one only after the finished build has drained.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::SubBuildCache;
use crate::compiler::Compiler;
use crate::config::{BuildContext, HtmlEntryOptions};
use crate::coordinator::Coordinator;
use crate::document::{DocumentOutput, process_document};
use crate::metafile::{Metafile, OutputFile};
use crate::paths::{absolutize, relative_path};
use crate::reconcile::{Reconciled, reconcile};
use crate::resolver::{FsResolver, Resolver};
use crate::{Error, Result};

pub struct HtmlEntryPlugin {
    context: Arc<BuildContext>,
    options: HtmlEntryOptions,
    resolver: Arc<dyn Resolver>,
    coordinator: Mutex<Coordinator>,
    cache: Option<Arc<SubBuildCache>>,
}

impl std::fmt::Debug for HtmlEntryPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HtmlEntryPlugin")
            .field("context", &self.context)
            .field("options", &self.options)
            .field("coordinator", &*self.coordinator.lock())
            .finish_non_exhaustive()
    }
}

impl HtmlEntryPlugin {
    /// Validate the configuration and set up the first build's state.
    ///
    /// Fails with [`Error::InvalidConfig`] before any work starts when the
    /// output directory is missing or an option is malformed.
    pub fn new(
        context: BuildContext,
        options: HtmlEntryOptions,
        compiler: Arc<dyn Compiler>,
    ) -> Result<Self> {
        let context = Arc::new(context.validate()?);
        options.validate()?;

        let resolver: Arc<dyn Resolver> = Arc::new(FsResolver::from_options(&options)?);
        let cache = options.cache.then(|| Arc::new(SubBuildCache::new()));
        let coordinator = Coordinator::new(compiler, Arc::clone(&context), &options, cache.clone());

        Ok(Self {
            context,
            options,
            resolver,
            coordinator: Mutex::new(coordinator),
            cache,
        })
    }

    /// Resolve references with `resolver` instead of the filesystem.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    pub fn options(&self) -> &HtmlEntryOptions {
        &self.options
    }

    pub fn cache(&self) -> Option<&Arc<SubBuildCache>> {
        self.cache.as_ref()
    }

    /// The coordinator of the build in progress.
    pub fn coordinator(&self) -> Coordinator {
        self.coordinator.lock().clone()
    }

    /// Absolute form of `document`, resolved against the working directory.
    pub fn document_path(&self, document: &Path) -> PathBuf {
        absolutize(&self.context.working_dir, document)
    }

    /// An HTML entry document was found.
    ///
    /// Returns whether it was new to the current build.
    pub fn on_entry_found(&self, document: &Path) -> Result<bool> {
        let document = relative_path(&self.context.working_dir, &self.document_path(document));
        self.coordinator().register_expected_document(&document)
    }

    /// An entry document must produce its output.
    ///
    /// Resolution problems are returned on the [`DocumentOutput`]; an `Err`
    /// means the whole build failed (timeout, sub-build failure).
    pub async fn on_load(&self, document: &Path) -> Result<DocumentOutput> {
        let coordinator = self.coordinator();
        let document = self.document_path(document);
        process_document(&coordinator, self.resolver.as_ref(), &self.options, &document).await
    }

    /// The host's build finished.
    ///
    /// Waits for any sub-build still running, merges its outputs and metadata
    /// into the host's `output_files` and `metafile`, then resets the state
    /// for the next build.
    pub async fn on_end(
        &self,
        output_files: Vec<OutputFile>,
        metafile: Metafile,
    ) -> Result<Reconciled> {
        let coordinator = self.coordinator();
        let drained = coordinator.drain().await;
        let documents = coordinator.state().documents();

        {
            let mut current = self.coordinator.lock();
            if Arc::ptr_eq(current.state(), coordinator.state()) {
                *current = coordinator.fresh();
                debug!("HTML entry build state reset");
            }
        }

        let assets = drained?;
        Ok(reconcile(
            &self.context,
            output_files,
            metafile,
            &documents,
            assets.as_deref(),
        ))
    }

    /// Fail every document still waiting on the current build.
    pub fn abort(&self, error: Error) {
        if self.coordinator().abandon(error) {
            warn!("HTML entry build aborted");
        }
    }
}
