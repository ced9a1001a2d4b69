// Taffy File Packages
// Per-file import bookkeeping shared by every evaluator

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    NotStarted,
    Importing,
    Imported,
}

pub type FilePackageRef = Arc<Mutex<FilePackageData>>;

/// What one source file declared and how far its import got
#[derive(Debug)]
pub struct FilePackageData {
    pub path: PathBuf,
    pub state: ImportState,
    /// Set by the file's `package` statement
    pub package: Option<Arc<str>>,
    /// Classes and package nodes the file imported
    pub contents: Vec<Node>,
    /// Already queued for a retry
    pub deferred: bool,
}

impl FilePackageData {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: ImportState::NotStarted,
            package: None,
            contents: Vec::new(),
            deferred: false,
        }
    }

    pub fn into_ref(self) -> FilePackageRef {
        Arc::new(Mutex::new(self))
    }

    pub fn package_name(&self) -> Arc<str> {
        self.package.clone().unwrap_or_else(|| Arc::from(""))
    }

    /// Remember an imported node, once
    pub fn add_contents(&mut self, node: Node) {
        if !self.contents.iter().any(|existing| existing.is_same(&node)) {
            self.contents.push(node);
        }
    }
}
