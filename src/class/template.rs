// Taffy Class Templates
// The shared, per-class description: name, package, super, flags, the
// instance and meta scopes, and the optional native descriptor

use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::trace;

use crate::class::method::{writer_selector, Method, NativeMethodFn};
use crate::class::object::{ClassObject, ClassRef};
use crate::evaluator::{EvalResult, NodeEvaluator};
use crate::marshall::{MarshallError, Marshaller, Unmarshaller};
use crate::node::{Depth, Node};
use crate::runtime::gc::Gc;
use crate::scope::{Scope, ScopeEntry, ScopeFlags};

pub const OBJECT_CLASS: &str = "org.taffy.core.Object";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClassFlags: u8 {
        const ABSTRACT = 1 << 0;
        const ATOMIC = 1 << 1;
        const FINAL = 1 << 2;
        const SINGLETON = 1 << 3;
        const SLICE = 1 << 4;
        const HAS_READ_WRITE_LOCK = 1 << 5;
    }
}

/// A native method entry in a class's method table
pub struct NativeMethod {
    pub selector: &'static str,
    pub function: NativeMethodFn,
    pub flags: ScopeFlags,
}

impl NativeMethod {
    pub const fn new(selector: &'static str, function: NativeMethodFn) -> Self {
        Self {
            selector,
            function,
            flags: ScopeFlags::empty(),
        }
    }
}

/// Lifecycle hooks for classes implemented in Rust
pub struct NativeHooks {
    /// Called once on the meta object after the class is registered
    pub initialize: Option<fn(&mut NodeEvaluator, &ClassRef) -> EvalResult<()>>,
    /// Called at shutdown, in reverse registration order
    pub deinitialize: Option<fn(&ClassTemplate)>,
    /// Produces the auxiliary payload of a new instance
    pub allocate: Option<fn(&ClassObject) -> Option<Node>>,
    /// Called when a collector or deep release empties the object
    pub deallocate: Option<fn(&ClassObject)>,
    /// Reports children not reachable through the scope or payload
    pub mark: Option<fn(&ClassObject, &mut dyn FnMut(&Node))>,
    pub copy: Option<fn(&Node, Depth) -> Node>,
    /// Called when the last handle to an instance goes away
    pub free: Option<fn(&ClassObject)>,
    pub register: Option<fn(&ClassObject, &Gc)>,
    pub marshall: Option<fn(&Node, &mut Marshaller) -> Result<(), MarshallError>>,
    pub unmarshall: Option<fn(&mut Unmarshaller<'_>) -> Result<Node, MarshallError>>,
    pub meta_mark: Option<fn(&ClassTemplate, &mut dyn FnMut(&Node))>,
    pub methods: &'static [NativeMethod],
    pub meta_methods: &'static [NativeMethod],
}

impl NativeHooks {
    pub const EMPTY: NativeHooks = NativeHooks {
        initialize: None,
        deinitialize: None,
        allocate: None,
        deallocate: None,
        mark: None,
        copy: None,
        free: None,
        register: None,
        marshall: None,
        unmarshall: None,
        meta_mark: None,
        methods: &[],
        meta_methods: &[],
    };
}

pub struct ClassTemplate {
    pub package: Arc<str>,
    pub name: Arc<str>,
    pub super_name: Option<Arc<str>>,
    pub class_flags: ClassFlags,
    pub scope_flags: ScopeFlags,
    pub file: Option<Arc<str>>,
    pub native: Option<&'static NativeHooks>,
    scope: Mutex<Scope>,
    meta_scope: Mutex<Scope>,
    super_template: OnceLock<Arc<ClassTemplate>>,
    parent: Mutex<Option<Weak<ClassObject>>>,
    marshall_id: AtomicU32,
    singleton_id: AtomicU32,
}

impl ClassTemplate {
    pub fn new(
        package: impl Into<Arc<str>>,
        name: impl Into<Arc<str>>,
        super_name: Option<Arc<str>>,
        class_flags: ClassFlags,
    ) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
            super_name,
            class_flags,
            scope_flags: ScopeFlags::empty(),
            file: None,
            native: None,
            scope: Mutex::new(Scope::new()),
            meta_scope: Mutex::new(Scope::new()),
            super_template: OnceLock::new(),
            parent: Mutex::new(None),
            marshall_id: AtomicU32::new(0),
            singleton_id: AtomicU32::new(0),
        }
    }

    /// A class whose methods are Rust functions
    pub fn native(
        package: &str,
        name: &str,
        super_name: Option<&str>,
        class_flags: ClassFlags,
        hooks: &'static NativeHooks,
    ) -> Self {
        let mut template = Self::new(package, name, super_name.map(Arc::from), class_flags);
        template.native = Some(hooks);
        for method in hooks.methods {
            template.add_method(Method::native(method.selector, method.function), method.flags);
        }
        for method in hooks.meta_methods {
            template.add_meta_method(Method::native(method.selector, method.function), method.flags);
        }
        template
    }

    pub fn with_file(mut self, file: Option<Arc<str>>) -> Self {
        self.file = file;
        self
    }

    pub fn with_scope_flags(mut self, flags: ScopeFlags) -> Self {
        self.scope_flags = flags;
        self
    }

    pub fn full_name(&self) -> String {
        if self.package.is_empty() {
            self.name.to_string()
        } else {
            format!("{}.{}", self.package, self.name)
        }
    }

    pub fn scope(&self) -> MutexGuard<'_, Scope> {
        self.scope.lock()
    }

    pub fn meta_scope(&self) -> MutexGuard<'_, Scope> {
        self.meta_scope.lock()
    }

    pub fn add_method(&self, method: Method, flags: ScopeFlags) {
        let selector = method.selector.clone();
        self.scope
            .lock()
            .set_method(&selector, Node::Method(Arc::new(method)), flags);
    }

    pub fn add_meta_method(&self, method: Method, flags: ScopeFlags) {
        let selector = method.selector.clone();
        self.meta_scope
            .lock()
            .set_method(&selector, Node::Method(Arc::new(method)), flags | ScopeFlags::META);
    }

    /// Declare an instance (`@x`) or class (`@@x`) variable
    pub fn declare_variable(&self, name: &str, initial: Node, flags: ScopeFlags) {
        if name.starts_with("@@") {
            self.meta_scope
                .lock()
                .set_object(name, initial, flags | ScopeFlags::META);
        } else {
            self.scope
                .lock()
                .set_object(name, initial, flags | ScopeFlags::INSTANCE);
        }
    }

    /// Add a synchronized getter `x` for `@x`, unless one exists
    pub fn make_reader(&self, variable: &str) {
        let selector = variable.trim_start_matches('@');
        let meta = variable.starts_with("@@");
        let scope = if meta { &self.meta_scope } else { &self.scope };
        let mut scope = scope.lock();
        if scope.get_method(selector).is_none() {
            scope.set_method(
                selector,
                Node::Method(Arc::new(Method::reader(variable))),
                ScopeFlags::SYNCHRONIZED | ScopeFlags::READER | ScopeFlags::GETTER,
            );
        }
    }

    /// Add a synchronized setter `setX:` for `@x`, unless one exists
    pub fn make_writer(&self, variable: &str) {
        let selector = writer_selector(variable);
        let meta = variable.starts_with("@@");
        let scope = if meta { &self.meta_scope } else { &self.scope };
        let mut scope = scope.lock();
        if scope.get_method(&selector).is_none() {
            scope.set_method(
                &selector,
                Node::Method(Arc::new(Method::writer(variable))),
                ScopeFlags::SYNCHRONIZED | ScopeFlags::WRITER,
            );
        }
    }

    pub fn super_template(&self) -> Option<&Arc<ClassTemplate>> {
        self.super_template.get()
    }

    /// Fix the super template; false when it was already resolved
    pub fn set_super_template(&self, template: Arc<ClassTemplate>) -> bool {
        self.super_template.set(template).is_ok()
    }

    /// Whether the super class is resolved, or there is none to resolve
    pub fn is_resolved(&self) -> bool {
        self.super_name.is_none() || self.super_template.get().is_some()
    }

    pub fn parent(&self) -> Option<ClassRef> {
        self.parent.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn set_parent(&self, parent: &ClassRef) {
        *self.parent.lock() = Some(Arc::downgrade(parent));
    }

    pub fn is_protected(&self) -> bool {
        self.scope_flags.contains(ScopeFlags::PROTECTED)
    }

    pub fn is_abstract(&self) -> bool {
        self.class_flags.contains(ClassFlags::ABSTRACT)
    }

    pub fn is_atomic(&self) -> bool {
        self.class_flags.contains(ClassFlags::ATOMIC)
    }

    pub fn is_final(&self) -> bool {
        self.class_flags.contains(ClassFlags::FINAL)
    }

    pub fn is_singleton(&self) -> bool {
        self.class_flags.contains(ClassFlags::SINGLETON)
    }

    pub fn marshall_id(&self) -> u32 {
        self.marshall_id.load(Ordering::Acquire)
    }

    pub fn set_marshall_id(&self, id: u32) {
        self.marshall_id.store(id, Ordering::Release);
    }

    pub fn singleton_id(&self) -> u32 {
        self.singleton_id.load(Ordering::Acquire)
    }

    pub fn set_singleton_id(&self, id: u32) {
        self.singleton_id.store(id, Ordering::Release);
    }

    /// This template or one of its resolved supers is `other`
    pub fn is_kind_of(&self, other: &ClassTemplate) -> bool {
        let mut current = Some(self);
        while let Some(template) = current {
            if std::ptr::eq(template, other) {
                return true;
            }
            current = template.super_template().map(|t| t.as_ref());
        }
        false
    }

    /// Method lookup through the template chain, returning the defining level
    pub fn find_method(
        self: &Arc<Self>,
        selector: &str,
        meta: bool,
    ) -> Option<(ScopeEntry, Arc<ClassTemplate>)> {
        let mut current = Some(self.clone());
        while let Some(template) = current {
            let found = {
                let scope = if meta {
                    template.meta_scope()
                } else {
                    template.scope()
                };
                scope.get_method(selector).cloned()
            };
            if let Some(entry) = found {
                return Some((entry, template));
            }
            current = template.super_template().cloned();
        }
        None
    }

    /// Re-open the class: merge in methods and declarations of `from`
    pub fn update(&self, from: &ClassTemplate) {
        let instance = from.scope().copy(Depth::Floating);
        self.scope.lock().merge(&instance);
        let meta = from.meta_scope().copy(Depth::Floating);
        self.meta_scope.lock().merge(&meta);
    }

    /// Resolve the super template exactly once.
    ///
    /// A missing super raises `UnidentifiedClassException`; a final one raises
    /// `InvalidSuperClassException`.
    pub fn create_runtime_values(
        self: &Arc<Self>,
        evaluator: &mut NodeEvaluator,
        contents: &[Node],
    ) -> EvalResult<()> {
        if self.is_resolved() {
            return Ok(());
        }
        let Some(super_name) = self.super_name.clone() else {
            return Ok(());
        };

        let runtime = evaluator.runtime().clone();
        let Some(super_meta) = runtime
            .classes()
            .get_class(&super_name, &self.package, contents, None)
        else {
            let class_name = evaluator.new_string(&super_name);
            evaluator.push_call_stack(format!("{} instantiation", self.name));
            let unwind =
                evaluator.throw_named("UnidentifiedClassException", &[("@className", class_name)]);
            evaluator.pop_call_stack();
            return Err(unwind);
        };

        let super_template = super_meta.template().clone();
        if super_template.is_final() {
            let super_name = evaluator.new_string(&super_template.name);
            return Err(evaluator.throw_named(
                "InvalidSuperClassException",
                &[("@superName", super_name)],
            ));
        }

        trace!(class = %self.full_name(), super_class = %super_template.full_name(), "resolved super");
        self.set_super_template(super_template);
        Ok(())
    }
}

impl fmt::Debug for ClassTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassTemplate({})", self.full_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(name: &str, super_name: Option<&str>) -> Arc<ClassTemplate> {
        Arc::new(ClassTemplate::new(
            "test",
            name,
            super_name.map(Arc::from),
            ClassFlags::empty(),
        ))
    }

    #[test]
    fn test_full_name() {
        assert_eq!(template("A", None).full_name(), "test.A");
        let bare = ClassTemplate::new("", "Main", None, ClassFlags::empty());
        assert_eq!(bare.full_name(), "Main");
    }

    #[test]
    fn test_reader_writer_only_added_when_absent() {
        let a = template("A", None);
        a.declare_variable("@x", Node::Int64(0), ScopeFlags::empty());
        a.make_reader("@x");
        a.make_writer("@x");
        assert!(a.scope().get_method("x").is_some());
        assert!(a.scope().get_method("setX:").is_some());

        let before = a.scope().get_method("x").map(|e| e.object.identity());
        a.make_reader("@x");
        let after = a.scope().get_method("x").map(|e| e.object.identity());
        assert_eq!(before, after);
    }

    #[test]
    fn test_meta_reader_goes_to_meta_scope() {
        let a = template("A", None);
        a.declare_variable("@@count", Node::Int64(0), ScopeFlags::empty());
        a.make_reader("@@count");
        assert!(a.meta_scope().get_method("count").is_some());
        assert!(a.scope().get_method("count").is_none());
    }

    #[test]
    fn test_update_merges_both_scopes() {
        let a = template("A", None);
        let reopened = template("A", None);
        reopened.declare_variable("@y", Node::Int64(1), ScopeFlags::empty());
        reopened.declare_variable("@@z", Node::Int64(2), ScopeFlags::empty());
        a.update(&reopened);
        assert!(a.scope().contains("@y"));
        assert!(a.meta_scope().contains("@@z"));
    }

    #[test]
    fn test_is_kind_of_walks_supers() {
        let base = template("Base", None);
        let derived = template("Derived", Some("test.Base"));
        assert!(!derived.is_kind_of(&base));
        assert!(derived.set_super_template(base.clone()));
        assert!(derived.is_kind_of(&base));
        assert!(!base.is_kind_of(&derived));
    }
}
