// Taffy Import Resolution
// `import a.b.C` and `import a.b.*`: registry lookups, source file
// discovery, deferral of files already being imported, and the deferred
// class finalization run when the outermost import completes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::class::ClassRef;
use crate::node::Node;
use crate::parser::parse_source;
use crate::runtime::file_package::{FilePackageRef, ImportState};
use crate::scope::{ObjectStack, Scope};

use super::{CallStackData, EvalResult, NodeEvaluator, Unwind};

pub const SOURCE_EXTENSION: &str = "ty";

/// What an import produced
#[derive(Debug, Clone)]
pub enum ImportOutcome {
    /// A class meta object or a package contents node
    Found(Node),
    /// The target file is mid-import; it was queued for a retry
    Deferred,
    Missing,
}

/// An import to retry once the outermost import finishes
#[derive(Debug, Clone)]
pub struct DeferredImport {
    pub path: Arc<str>,
    pub wildcard: bool,
    pub importer: Option<FilePackageRef>,
}

/// A class registered during an import, finalized afterwards
#[derive(Debug, Clone)]
pub struct ImportReference {
    pub meta: ClassRef,
    pub file_package: Option<FilePackageRef>,
    pub call_stack: Vec<Arc<CallStackData>>,
}

enum FileImport {
    Done,
    Deferred,
    Failed,
}

impl NodeEvaluator {
    pub(super) fn evaluate_import(&mut self, path: &str, wildcard: bool) -> EvalResult {
        let outcome = if wildcard {
            self.import_package(path)?
        } else {
            self.import_class(path)?
        };

        match outcome {
            ImportOutcome::Found(node) => {
                if let Some(file_package) = &self.file_package {
                    file_package.lock().add_contents(node);
                }
                Ok(self.nil())
            }
            ImportOutcome::Deferred => {
                self.defer_import(path, wildcard);
                Ok(self.nil())
            }
            ImportOutcome::Missing => {
                let shown = if wildcard {
                    format!("{}.*", path)
                } else {
                    path.to_string()
                };
                let path = self.new_string(&shown);
                Err(self.throw_named("ImportFailedException", &[("@path", path)]))
            }
        }
    }

    fn defer_import(&mut self, path: &str, wildcard: bool) {
        let already = self
            .deferred_imports
            .iter()
            .any(|deferred| &*deferred.path == path && deferred.wildcard == wildcard);
        if !already {
            debug!(path, "import deferred");
            self.deferred_imports.push(DeferredImport {
                path: Arc::from(path),
                wildcard,
                importer: self.file_package.clone(),
            });
        }
    }

    /// Directories searched for sources: the running file's directory, then
    /// the configured import paths and plugin directories
    fn search_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        if let Some(file_package) = &self.file_package {
            if let Some(parent) = file_package.lock().path.parent() {
                roots.push(parent.to_path_buf());
            }
        }
        roots.extend(self.runtime.config().search_roots().cloned());
        roots
    }

    fn registered_class(&self, path: &str) -> Option<ClassRef> {
        let classes = self.runtime.classes();
        match path.rsplit_once('.') {
            Some((package, name)) => classes.class_in(package, name),
            None => classes.class_in("", path),
        }
    }

    /// Find `a.b.C` in the registry, else load `a/b/C.ty` from a search root
    pub fn import_class(&mut self, path: &str) -> EvalResult<ImportOutcome> {
        if let Some(meta) = self.registered_class(path) {
            return Ok(ImportOutcome::Found(Node::Class(meta)));
        }

        let relative = format!("{}.{}", path.replace('.', "/"), SOURCE_EXTENSION);
        let candidate = self
            .search_roots()
            .into_iter()
            .map(|root| root.join(&relative))
            .find(|candidate| candidate.is_file());
        let Some(candidate) = candidate else {
            return Ok(ImportOutcome::Missing);
        };

        match self.import_file(&candidate)? {
            FileImport::Done => Ok(self
                .registered_class(path)
                .map(|meta| ImportOutcome::Found(Node::Class(meta)))
                .unwrap_or(ImportOutcome::Missing)),
            FileImport::Deferred => Ok(ImportOutcome::Deferred),
            FileImport::Failed => Ok(ImportOutcome::Missing),
        }
    }

    /// `a.b.*`: the registry package plus every source file in `a/b`
    fn import_package(&mut self, path: &str) -> EvalResult<ImportOutcome> {
        let relative = path.replace('.', "/");
        let mut deferred = false;
        let mut found_files = false;

        for root in self.search_roots() {
            let directory = root.join(&relative);
            let Ok(entries) = std::fs::read_dir(&directory) else {
                continue;
            };
            let mut files: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|file| file.extension().map_or(false, |ext| ext == SOURCE_EXTENSION))
                .collect();
            files.sort();

            for file in files {
                found_files = true;
                match self.import_file(&file)? {
                    FileImport::Deferred => deferred = true,
                    FileImport::Failed => return Ok(ImportOutcome::Missing),
                    FileImport::Done => {}
                }
            }
            if found_files {
                break;
            }
        }

        if let Some(contents) = self.runtime.classes().find_package_contents(path, false) {
            if deferred {
                self.defer_import(path, true);
            }
            return Ok(ImportOutcome::Found(Node::PackageContents(contents)));
        }
        Ok(if deferred {
            ImportOutcome::Deferred
        } else {
            ImportOutcome::Missing
        })
    }

    /// Evaluate the class-level statements of one source file, once
    fn import_file(&mut self, path: &Path) -> EvalResult<FileImport> {
        let file_package = self.runtime.file_package(path);
        {
            let mut data = file_package.lock();
            match data.state {
                ImportState::Imported => return Ok(FileImport::Done),
                ImportState::Importing => {
                    data.deferred = true;
                    return Ok(FileImport::Deferred);
                }
                ImportState::NotStarted => data.state = ImportState::Importing,
            }
        }

        let file = path.to_string_lossy().to_string();
        let graph = std::fs::read_to_string(path)
            .map_err(|error| error.to_string())
            .and_then(|source| {
                let file_id = self.runtime.register_file(&file);
                parse_source(&source, &file, file_id).map_err(|error| error.message)
            });
        let graph = match graph {
            Ok(graph) => graph,
            Err(message) => {
                warn!(file = %file, error = %message, "import failed");
                file_package.lock().state = ImportState::NotStarted;
                return Ok(FileImport::Failed);
            }
        };

        debug!(file = %file, depth = self.import_depth + 1, "importing");
        self.import_depth += 1;
        self.only_evaluate_classes += 1;
        let previous = self.file_package.replace(file_package.clone());
        self.object_stacks
            .push(ObjectStack::new(None, false, false).with_scope(Scope::new_ref()));

        let result = self.evaluate(&graph);

        self.object_stacks.pop();
        self.file_package = previous;
        self.only_evaluate_classes -= 1;
        self.import_depth -= 1;
        file_package.lock().state = ImportState::Imported;

        if let Err(unwind) = result {
            self.deferred_imports.clear();
            self.import_references.clear();
            return Err(unwind);
        }
        if self.import_depth == 0 {
            self.finish_imports()?;
        }
        Ok(FileImport::Done)
    }

    /// An import attempt whose failure is not reported
    pub(super) fn try_import_class(&mut self, path: &str) -> Option<ClassRef> {
        match self.import_class(path) {
            Ok(ImportOutcome::Found(Node::Class(meta))) => Some(meta),
            Ok(_) => None,
            Err(_) => {
                self.clear_exception();
                None
            }
        }
    }

    /// Run once the outermost import is done: retry deferred imports until
    /// nothing changes, then resolve and initialize the classes registered
    /// along the way
    fn finish_imports(&mut self) -> EvalResult<()> {
        self.delay_abort();
        let result = self.retry_deferred().and_then(|()| self.drain_import_references());
        self.resume_abort();
        if result.is_err() {
            self.deferred_imports.clear();
            self.import_references.clear();
        }
        result
    }

    fn retry_deferred(&mut self) -> EvalResult<()> {
        loop {
            let pending = std::mem::take(&mut self.deferred_imports);
            if pending.is_empty() {
                return Ok(());
            }
            let count = pending.len();
            let mut still_pending = Vec::new();

            for deferred in pending {
                let previous = std::mem::replace(&mut self.file_package, deferred.importer.clone());
                let attempt = if deferred.wildcard {
                    self.import_package(&deferred.path)
                } else {
                    self.import_class(&deferred.path)
                };
                self.file_package = previous;

                match attempt {
                    Ok(ImportOutcome::Found(node)) => {
                        if let Some(importer) = &deferred.importer {
                            importer.lock().add_contents(node);
                        }
                    }
                    Ok(ImportOutcome::Deferred) => still_pending.push(deferred),
                    Ok(ImportOutcome::Missing) => {}
                    Err(Unwind::Exception) => self.clear_exception(),
                    Err(fatal) => return Err(fatal),
                }
            }

            // retries can queue the same path again; keep each once
            for deferred in std::mem::take(&mut self.deferred_imports) {
                if !still_pending
                    .iter()
                    .any(|pending| pending.path == deferred.path && pending.wildcard == deferred.wildcard)
                {
                    still_pending.push(deferred);
                }
            }
            if still_pending.len() >= count {
                debug!(remaining = still_pending.len(), "deferred imports left unresolved");
                return Ok(());
            }
            self.deferred_imports = still_pending;
        }
    }

    fn drain_import_references(&mut self) -> EvalResult<()> {
        let references = std::mem::take(&mut self.import_references);
        for reference in &references {
            let meta = &reference.meta;
            let template = meta.template().clone();
            let contents = self.contents_of(reference.file_package.as_ref());

            if let (false, Some(super_name)) = (template.is_resolved(), template.super_name.clone()) {
                let known = self
                    .runtime
                    .classes()
                    .get_class(&super_name, &template.package, &contents, None)
                    .is_some();
                if !known {
                    let previous = std::mem::replace(&mut self.file_package, reference.file_package.clone());
                    let imported = self.import_class(&super_name);
                    self.file_package = previous;
                    let found = match imported {
                        Ok(ImportOutcome::Found(_)) => true,
                        Ok(_) => false,
                        Err(Unwind::Exception) => {
                            self.clear_exception();
                            false
                        }
                        Err(fatal) => return Err(fatal),
                    };
                    if !found {
                        let saved = std::mem::replace(&mut self.call_stack, reference.call_stack.clone());
                        let class_name = self.new_string(&super_name);
                        let unwind = self.throw_named(
                            "UnidentifiedClassException",
                            &[("@className", class_name)],
                        );
                        self.call_stack = saved;
                        return Err(unwind);
                    }
                }
            }

            let runtime = self.runtime.clone();
            let previous = std::mem::replace(&mut self.file_package, reference.file_package.clone());
            let contents = self.contents_list();
            let result = runtime
                .classes()
                .initialize_class(self, meta, &contents)
                .and_then(|()| self.meta_init(meta));
            self.file_package = previous;
            result?;
        }
        Ok(())
    }
}
