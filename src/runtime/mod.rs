// Taffy Runtime
// Process-wide state shared by every evaluator: configuration, the class
// registry, the collector, the global scope, the core classes, per-file
// import state and the output sink.

pub mod config;
pub mod file_package;
pub mod gc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::debug;

use crate::builtins::{self, CoreClasses};
use crate::class::ClassManager;
use crate::error::{TaffyError, TaffyResult};
use crate::evaluator::{AbortHandle, NodeEvaluator};
use crate::scope::{Scope, ScopeRef};

pub use config::{ConfigError, GcConfig, RuntimeConfig};
pub use file_package::{FilePackageData, FilePackageRef, ImportState};
pub use gc::{Gc, GcStats};

/// Where `print:` and friends write
#[derive(Clone)]
pub enum Output {
    Stdout,
    /// Captured in memory, for embedding and tests
    Buffer(Arc<Mutex<Vec<u8>>>),
}

pub struct Runtime {
    config: RuntimeConfig,
    classes: ClassManager,
    gc: Gc,
    globals: ScopeRef,
    core: CoreClasses,
    evaluators: RwLock<FxHashMap<ThreadId, AbortHandle>>,
    file_packages: Mutex<FxHashMap<PathBuf, FilePackageRef>>,
    files: RwLock<Vec<Arc<str>>>,
    output: Output,
}

impl Runtime {
    /// A runtime with the core classes installed, writing to stdout
    pub fn new(config: RuntimeConfig) -> TaffyResult<Arc<Runtime>> {
        Self::with_output(config, Output::Stdout)
    }

    pub fn with_captured_output(config: RuntimeConfig) -> TaffyResult<Arc<Runtime>> {
        Self::with_output(config, Output::Buffer(Arc::new(Mutex::new(Vec::new()))))
    }

    pub fn with_output(config: RuntimeConfig, output: Output) -> TaffyResult<Arc<Runtime>> {
        config
            .validate()
            .map_err(|error| TaffyError::config_error(error.to_string(), "<config>"))?;

        let runtime = Arc::new(Runtime {
            gc: Gc::new(&config.gc),
            config,
            classes: ClassManager::new(),
            globals: Scope::new_ref(),
            core: CoreClasses::new(),
            evaluators: RwLock::new(FxHashMap::default()),
            file_packages: Mutex::new(FxHashMap::default()),
            files: RwLock::new(vec![Arc::from("<unknown>")]),
            output,
        });

        let mut evaluator = runtime.create_evaluator();
        if let Err(unwind) = builtins::install(&mut evaluator) {
            return Err(evaluator.unwind_to_error(unwind, "<core>"));
        }
        drop(evaluator);
        debug!(classes = runtime.classes.templates().len(), "runtime ready");
        Ok(runtime)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn classes(&self) -> &ClassManager {
        &self.classes
    }

    pub fn gc(&self) -> &Gc {
        &self.gc
    }

    pub fn globals(&self) -> &ScopeRef {
        &self.globals
    }

    pub fn core(&self) -> &CoreClasses {
        &self.core
    }

    // ==================== Evaluators ====================

    /// A new evaluator for the calling thread
    pub fn create_evaluator(self: &Arc<Self>) -> NodeEvaluator {
        let abort = AbortHandle::new();
        self.evaluators
            .write()
            .insert(std::thread::current().id(), abort.clone());
        NodeEvaluator::new(self.clone(), abort)
    }

    pub(crate) fn unregister_evaluator(&self, abort: &AbortHandle) {
        let mut evaluators = self.evaluators.write();
        evaluators.retain(|_, registered| !registered.is_same(abort));
    }

    /// Ask the evaluator of `thread` to abort
    pub fn abort(&self, thread: ThreadId) -> bool {
        match self.evaluators.read().get(&thread) {
            Some(handle) => {
                handle.request();
                true
            }
            None => false,
        }
    }

    pub fn abort_all(&self) {
        let evaluators = self.evaluators.read();
        for handle in evaluators.values() {
            handle.request();
        }
        debug!(evaluators = evaluators.len(), "abort requested");
    }

    pub fn evaluator_count(&self) -> usize {
        self.evaluators.read().len()
    }

    // ==================== Files ====================

    /// Id of a source file name, used in node positions
    pub fn register_file(&self, name: &str) -> u32 {
        if let Some(index) = self.files.read().iter().position(|known| &**known == name) {
            return index as u32;
        }
        let mut files = self.files.write();
        files.push(Arc::from(name));
        (files.len() - 1) as u32
    }

    pub fn file_name(&self, id: u32) -> Arc<str> {
        let files = self.files.read();
        files
            .get(id as usize)
            .or_else(|| files.first())
            .cloned()
            .unwrap_or_else(|| Arc::from("<unknown>"))
    }

    /// Import bookkeeping of a source file, created on first use
    pub fn file_package(&self, path: &Path) -> FilePackageRef {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.file_packages
            .lock()
            .entry(key.clone())
            .or_insert_with(|| FilePackageData::new(key).into_ref())
            .clone()
    }

    // ==================== Output ====================

    pub fn write_output(&self, text: &str) {
        match &self.output {
            Output::Stdout => {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
            Output::Buffer(buffer) => buffer.lock().extend_from_slice(text.as_bytes()),
        }
    }

    /// Everything written so far, when output is captured
    pub fn captured_output(&self) -> Option<String> {
        match &self.output {
            Output::Buffer(buffer) => Some(String::from_utf8_lossy(&buffer.lock()).into_owned()),
            Output::Stdout => None,
        }
    }

    pub fn take_captured_output(&self) -> Option<String> {
        match &self.output {
            Output::Buffer(buffer) => {
                let bytes = std::mem::take(&mut *buffer.lock());
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            Output::Stdout => None,
        }
    }

    /// Run native deinitializers and a last collection
    pub fn shutdown(&self) {
        self.classes.shutdown();
        if self.gc.is_enabled() {
            self.gc.collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> Arc<Runtime> {
        Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime")
    }

    #[test]
    fn test_register_file_is_stable() {
        let runtime = runtime();
        let a = runtime.register_file("a.ty");
        let b = runtime.register_file("b.ty");
        assert_ne!(a, b);
        assert_eq!(runtime.register_file("a.ty"), a);
        assert_eq!(&*runtime.file_name(b), "b.ty");
    }

    #[test]
    fn test_file_package_shared_per_path() {
        let runtime = runtime();
        let first = runtime.file_package(Path::new("same.ty"));
        let second = runtime.file_package(Path::new("same.ty"));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_evaluator_registration() {
        let runtime = runtime();
        let before = runtime.evaluator_count();
        let evaluator = runtime.create_evaluator();
        assert_eq!(runtime.evaluator_count(), before + 1);
        drop(evaluator);
        assert_eq!(runtime.evaluator_count(), before);
    }

    #[test]
    fn test_captured_output() {
        let runtime = runtime();
        runtime.write_output("hello ");
        runtime.write_output("world");
        assert_eq!(runtime.take_captured_output().as_deref(), Some("hello world"));
        assert_eq!(runtime.captured_output().as_deref(), Some(""));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RuntimeConfig {
            max_stack_depth: 0,
            ..RuntimeConfig::default()
        };
        assert!(Runtime::new(config).is_err());
    }
}
