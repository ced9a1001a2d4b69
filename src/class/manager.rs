// Taffy Class Manager
// The class registry: a package tree of meta objects, the template list in
// registration order, and the marshall-id and singleton-id tables.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::class::object::{ClassObject, ClassRef};
use crate::class::template::ClassTemplate;
use crate::evaluator::{EvalResult, NodeEvaluator};
use crate::node::Node;

/// Packages always visible to every lookup
pub const CORE_PACKAGES: [&str; 2] = ["org.taffy.core", "org.taffy.core.exception"];

#[derive(Default)]
struct ContentsInner {
    classes: FxHashMap<Arc<str>, ClassRef>,
    sub_map: FxHashMap<Arc<str>, Arc<PackageContents>>,
}

/// One level of the package namespace
pub struct PackageContents {
    name: Arc<str>,
    inner: Mutex<ContentsInner>,
}

impl PackageContents {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(ContentsInner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self, name: &str) -> Option<ClassRef> {
        self.inner.lock().classes.get(name).cloned()
    }

    pub fn classes(&self) -> Vec<ClassRef> {
        self.inner.lock().classes.values().cloned().collect()
    }

    pub fn sub_package(&self, segment: &str) -> Option<Arc<PackageContents>> {
        self.inner.lock().sub_map.get(segment).cloned()
    }

    fn sub_package_or_create(&self, segment: &str) -> Arc<PackageContents> {
        let mut inner = self.inner.lock();
        inner
            .sub_map
            .entry(Arc::from(segment))
            .or_insert_with(|| Arc::new(PackageContents::new(segment)))
            .clone()
    }

    /// Insert unless the name is taken
    fn insert_class(&self, name: &Arc<str>, meta: &ClassRef) -> bool {
        let mut inner = self.inner.lock();
        if inner.classes.contains_key(name) {
            return false;
        }
        inner.classes.insert(name.clone(), meta.clone());
        true
    }

    fn remove_class(&self, name: &str) -> Option<ClassRef> {
        self.inner.lock().classes.remove(name)
    }
}

impl fmt::Debug for PackageContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackageContents({})", self.name)
    }
}

#[derive(Default)]
struct Tables {
    templates: Vec<Arc<ClassTemplate>>,
    by_id: FxHashMap<u32, Arc<ClassTemplate>>,
    singletons: FxHashMap<u32, Node>,
    max_marshall_id: u32,
    max_singleton_id: u32,
}

pub struct ClassManager {
    root: Arc<PackageContents>,
    tables: Mutex<Tables>,
}

impl ClassManager {
    pub fn new() -> Self {
        Self {
            root: Arc::new(PackageContents::new("")),
            tables: Mutex::new(Tables {
                max_marshall_id: 1,
                max_singleton_id: 1,
                ..Tables::default()
            }),
        }
    }

    pub fn root(&self) -> &Arc<PackageContents> {
        &self.root
    }

    /// Walk (and optionally create) the contents node for a dotted path
    pub fn find_package_contents(&self, path: &str, create: bool) -> Option<Arc<PackageContents>> {
        let mut current = self.root.clone();
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            current = match current.sub_package(segment) {
                Some(next) => next,
                None if create => current.sub_package_or_create(segment),
                None => return None,
            };
        }
        Some(current)
    }

    /// Register a template under its package.
    ///
    /// Returns `None` when the name is already taken, leaving the existing
    /// registration untouched. When `initialize` is set the super class is
    /// resolved and native initializers run; a failure there removes the
    /// class again.
    pub fn register_class_template(
        &self,
        evaluator: &mut NodeEvaluator,
        template: Arc<ClassTemplate>,
        contents: &[Node],
        initialize: bool,
    ) -> EvalResult<Option<ClassRef>> {
        let Some(meta) = self.insert_template(&template) else {
            return Ok(None);
        };

        if initialize {
            if let Err(unwind) = self.initialize_class(evaluator, &meta, contents) {
                self.remove(&template);
                return Err(unwind);
            }
        }

        self.tables.lock().templates.push(template.clone());
        debug!(class = %template.full_name(), id = template.marshall_id(), "registered class");
        Ok(Some(meta))
    }

    /// Resolve the super class and run native initializers, then do the same
    /// for nested classes held in the meta scope
    pub fn initialize_class(
        &self,
        evaluator: &mut NodeEvaluator,
        meta: &ClassRef,
        contents: &[Node],
    ) -> EvalResult<()> {
        let template = meta.template().clone();
        template.create_runtime_values(evaluator, contents)?;
        if let Some(initialize) = template.native.and_then(|hooks| hooks.initialize) {
            initialize(evaluator, meta)?;
        }

        let nested: Vec<ClassRef> = {
            let mut nested = Vec::new();
            template.meta_scope().for_each_object(&mut |node| {
                if let Node::Class(class) = node {
                    if class.is_meta() && class.template().parent().map_or(false, |p| Arc::ptr_eq(&p, meta)) {
                        nested.push(class.clone());
                    }
                }
            });
            nested
        };
        for class in nested {
            class.template().create_runtime_values(evaluator, contents)?;
        }
        Ok(())
    }

    /// Steps one to three of registration: insert the meta object and hand
    /// out a marshall id, all under the registry lock
    fn insert_template(&self, template: &Arc<ClassTemplate>) -> Option<ClassRef> {
        let mut tables = self.tables.lock();
        let contents = self.find_package_contents(&template.package, true)?;
        let meta = ClassObject::new_meta(template);
        if !contents.insert_class(&template.name, &meta) {
            return None;
        }
        let id = tables.max_marshall_id;
        tables.max_marshall_id += 1;
        template.set_marshall_id(id);
        tables.by_id.insert(id, template.clone());
        Some(meta)
    }

    fn remove(&self, template: &Arc<ClassTemplate>) {
        let mut tables = self.tables.lock();
        if let Some(contents) = self.find_package_contents(&template.package, false) {
            contents.remove_class(&template.name);
        }
        tables.by_id.remove(&template.marshall_id());
        warn!(class = %template.full_name(), "registration rolled back");
    }

    /// Give a singleton object its id
    pub fn register_singleton(&self, node: &ClassRef) -> u32 {
        let mut tables = self.tables.lock();
        let id = tables.max_singleton_id;
        tables.max_singleton_id += 1;
        tables.singletons.insert(id, Node::Class(node.clone()));
        node.template().set_singleton_id(id);
        id
    }

    pub fn template_from_id(&self, id: u32) -> Option<Arc<ClassTemplate>> {
        self.tables.lock().by_id.get(&id).cloned()
    }

    pub fn singleton_from_id(&self, id: u32) -> Option<Node> {
        self.tables.lock().singletons.get(&id).cloned()
    }

    pub fn templates(&self) -> Vec<Arc<ClassTemplate>> {
        self.tables.lock().templates.clone()
    }

    /// The meta object registered under `package.name`
    pub fn class_in(&self, package: &str, name: &str) -> Option<ClassRef> {
        self.find_package_contents(package, false)?.class(name)
    }

    /// Find a class by name.
    ///
    /// Search order: the dotted name from the root and from `package`, the
    /// caller's contents list, the core packages, then classes nested in the
    /// requestor's class.
    pub fn get_class(
        &self,
        name: &str,
        package: &str,
        contents: &[Node],
        requestor: Option<&ClassRef>,
    ) -> Option<ClassRef> {
        let visible = |candidate: ClassRef| self.can_access(&candidate, requestor).then_some(candidate);

        if let Some((prefix, simple)) = name.rsplit_once('.') {
            if let Some(found) = self.class_in(prefix, simple).and_then(visible) {
                return Some(found);
            }
            if !package.is_empty() {
                let relative = format!("{}.{}", package, prefix);
                if let Some(found) = self.class_in(&relative, simple).and_then(visible) {
                    return Some(found);
                }
            }
            return None;
        }

        if let Some(found) = self.class_in(package, name).and_then(visible) {
            return Some(found);
        }

        for node in contents {
            let candidate = match node {
                Node::PackageContents(package_contents) => package_contents.class(name),
                Node::Class(meta) if &*meta.template().name == name => Some(meta.clone()),
                _ => None,
            };
            if let Some(found) = candidate.and_then(visible) {
                return Some(found);
            }
        }

        for core in CORE_PACKAGES {
            if let Some(found) = self.class_in(core, name).and_then(visible) {
                return Some(found);
            }
        }

        let requestor = requestor?;
        let mut enclosing = Some(requestor.template().clone());
        while let Some(template) = enclosing {
            if let Some(found) = self.class_in(&template.full_name(), name).and_then(visible) {
                return Some(found);
            }
            enclosing = template.parent().map(|parent| parent.template().clone());
        }
        None
    }

    /// Protected classes, and classes nested in protected classes, are only
    /// visible to objects that can be cast to a class on that chain
    pub fn can_access(&self, candidate: &ClassRef, requestor: Option<&ClassRef>) -> bool {
        let Some(requestor) = requestor else {
            return true;
        };

        let mut chain = Vec::new();
        let mut protected = false;
        let mut current = Some(candidate.template().clone());
        while let Some(template) = current {
            protected |= template.is_protected();
            current = template.parent().map(|parent| parent.template().clone());
            chain.push(template);
        }

        !protected
            || chain
                .iter()
                .any(|template| requestor.template().is_kind_of(template))
    }

    /// Run native deinitializers in reverse registration order
    pub fn shutdown(&self) {
        let templates = self.templates();
        for template in templates.iter().rev() {
            if let Some(deinitialize) = template.native.and_then(|hooks| hooks.deinitialize) {
                deinitialize(template);
            }
        }
        debug!(classes = templates.len(), "class manager shut down");
    }
}

impl Default for ClassManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::template::ClassFlags;
    use crate::scope::ScopeFlags;

    fn template(package: &str, name: &str) -> Arc<ClassTemplate> {
        Arc::new(ClassTemplate::new(package, name, None, ClassFlags::empty()))
    }

    #[test]
    fn test_ids_start_at_one() {
        let manager = ClassManager::new();
        let a = template("p", "A");
        let meta = manager.insert_template(&a).expect("registered");
        assert_eq!(a.marshall_id(), 1);
        assert!(Arc::ptr_eq(meta.template(), &a));
        assert!(manager.template_from_id(1).is_some());
        assert!(manager.template_from_id(0).is_none());
        assert_eq!(manager.register_singleton(&meta), 1);
    }

    #[test]
    fn test_duplicate_insert_keeps_first_meta() {
        let manager = ClassManager::new();
        let first = manager.insert_template(&template("p", "A")).expect("first");
        assert!(manager.insert_template(&template("p", "A")).is_none());
        let found = manager.class_in("p", "A").expect("present");
        assert!(Arc::ptr_eq(&found, &first));
    }

    #[test]
    fn test_get_class_search_order() {
        let manager = ClassManager::new();
        manager.insert_template(&template("a.b", "C")).expect("C");
        manager.insert_template(&template("org.taffy.core", "Object")).expect("Object");
        let other = manager.insert_template(&template("x", "D")).expect("D");

        assert!(manager.get_class("a.b.C", "", &[], None).is_some());
        assert!(manager.get_class("C", "a.b", &[], None).is_some());
        assert!(manager.get_class("C", "x", &[], None).is_none());
        assert!(manager.get_class("Object", "x", &[], None).is_some());

        let contents = manager.find_package_contents("a.b", false).expect("package");
        assert!(manager
            .get_class("C", "", &[Node::PackageContents(contents)], None)
            .is_some());
        assert!(manager.get_class("D", "", &[Node::Class(other)], None).is_some());
    }

    #[test]
    fn test_protected_nested_class_visibility() {
        let manager = ClassManager::new();
        let outer = template("p", "Outer");
        let outer_meta = manager.insert_template(&outer).expect("outer");
        let inner = Arc::new(
            ClassTemplate::new("p.Outer", "Inner", None, ClassFlags::empty())
                .with_scope_flags(ScopeFlags::PROTECTED),
        );
        inner.set_parent(&outer_meta);
        manager.insert_template(&inner).expect("inner");

        let stranger_meta = manager.insert_template(&template("q", "Stranger")).expect("stranger");
        let outer_instance = ClassObject::new_instance(&outer);

        assert!(manager.get_class("Inner", "", &[], Some(&outer_instance)).is_some());
        assert!(manager.get_class("p.Outer.Inner", "", &[], Some(&stranger_meta)).is_none());
        assert!(manager.get_class("p.Outer.Inner", "", &[], None).is_some());
    }
}
