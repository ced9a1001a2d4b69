// Taffy Class Objects
// Instances and meta objects. An instance holds one level per class in its
// hierarchy: its own scope for that level's instance variables, the native
// payload, and a lazily created super node for the next level up.

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::fmt;
use std::sync::Arc;

use crate::class::template::{ClassFlags, ClassTemplate};
use crate::node::{Depth, Node, NodeFlags, NodeHeader};
use crate::scope::{Scope, ScopeEntry, ScopeFlags};

pub type ClassRef = Arc<ClassObject>;

pub struct ClassObject {
    header: NodeHeader,
    template: Arc<ClassTemplate>,
    is_object: bool,
    scope: Mutex<Scope>,
    super_node: Mutex<Option<ClassRef>>,
    aux: Mutex<Option<Node>>,
    monitor: ReentrantMutex<()>,
    rw_lock: Option<RwLock<()>>,
}

impl ClassObject {
    fn build(template: Arc<ClassTemplate>, is_object: bool, scope: Scope, flags: NodeFlags) -> Self {
        let rw_lock = template
            .class_flags
            .contains(ClassFlags::HAS_READ_WRITE_LOCK)
            .then(|| RwLock::new(()));
        Self {
            header: NodeHeader::new(flags),
            template,
            is_object,
            scope: Mutex::new(scope),
            super_node: Mutex::new(None),
            aux: Mutex::new(None),
            monitor: ReentrantMutex::new(()),
            rw_lock,
        }
    }

    /// A fresh instance level: declared instance variables are deep-copied
    /// from the template, then the native allocator fills the payload
    pub fn new_instance(template: &Arc<ClassTemplate>) -> ClassRef {
        let mut scope = Scope::new();
        scope.merge_objects(&template.scope());
        let object = Arc::new(Self::build(template.clone(), true, scope, NodeFlags::empty()));
        if let Some(allocate) = template.native.and_then(|hooks| hooks.allocate) {
            *object.aux.lock() = allocate(&object);
        }
        object
    }

    pub fn new_meta(template: &Arc<ClassTemplate>) -> ClassRef {
        Arc::new(Self::build(template.clone(), false, Scope::new(), NodeFlags::empty()))
    }

    /// An instance carrying a native payload, flagged as an unshared template
    pub fn with_aux(template: &Arc<ClassTemplate>, aux: Node) -> ClassRef {
        let object = Arc::new(Self::build(
            template.clone(),
            true,
            Scope::new(),
            NodeFlags::TEMPLATE,
        ));
        *object.aux.lock() = Some(aux);
        object
    }

    /// Reassemble a level from its serialized parts
    pub fn from_parts(
        template: &Arc<ClassTemplate>,
        is_object: bool,
        scope: Scope,
        aux: Option<Node>,
        super_node: Option<ClassRef>,
    ) -> ClassRef {
        let object = Arc::new(Self::build(template.clone(), is_object, scope, NodeFlags::empty()));
        *object.aux.lock() = aux;
        *object.super_node.lock() = super_node;
        object
    }

    pub fn header(&self) -> &NodeHeader {
        &self.header
    }

    /// This level's own bindings, in no particular order
    pub fn scope_entries(&self) -> Vec<(Arc<str>, ScopeEntry)> {
        self.scope
            .lock()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect()
    }

    /// The super level if it was ever created; never creates one
    pub fn existing_super_node(&self) -> Option<ClassRef> {
        self.super_node.lock().clone()
    }

    pub fn template(&self) -> &Arc<ClassTemplate> {
        &self.template
    }

    pub fn is_object(&self) -> bool {
        self.is_object
    }

    pub fn is_meta(&self) -> bool {
        !self.is_object
    }

    pub fn aux(&self) -> Option<Node> {
        self.aux.lock().clone()
    }

    pub fn set_aux(&self, aux: Option<Node>) {
        *self.aux.lock() = aux;
    }

    /// The payload of a String instance
    pub fn string_value(&self) -> Option<Arc<str>> {
        match self.aux() {
            Some(Node::String(text)) => Some(text),
            _ => None,
        }
    }

    pub fn monitor(&self) -> &ReentrantMutex<()> {
        &self.monitor
    }

    pub fn rw_lock(&self) -> Option<&RwLock<()>> {
        self.rw_lock.as_ref()
    }

    pub fn identity(&self) -> usize {
        self as *const ClassObject as usize
    }

    /// The next level up, created on first use
    pub fn super_node(&self) -> Option<ClassRef> {
        let mut slot = self.super_node.lock();
        if let Some(node) = slot.as_ref() {
            return Some(node.clone());
        }
        let super_template = self.template.super_template()?;
        let node = if self.is_object {
            ClassObject::new_instance(super_template)
        } else {
            ClassObject::new_meta(super_template)
        };
        if self.header.contains(NodeFlags::REGISTERED) {
            node.header.insert(NodeFlags::REGISTERED);
        }
        *slot = Some(node.clone());
        Some(node)
    }

    /// Instance lookups use the object's own scope unless the name is a
    /// class variable; meta objects use the template's meta scope
    fn uses_meta_scope(&self, name: &str) -> bool {
        !self.is_object || name.starts_with("@@")
    }

    fn level_entry(&self, name: &str, mask: ScopeFlags) -> Option<ScopeEntry> {
        if self.uses_meta_scope(name) {
            return self.template.meta_scope().get(name, mask).cloned();
        }
        if let Some(entry) = self.scope.lock().get(name, mask) {
            return Some(entry.clone());
        }
        self.template.scope().get(name, mask).cloned()
    }

    /// An object binding at this level or above, with the level that owns it
    pub fn lookup_object(self: &Arc<Self>, name: &str) -> Option<(ScopeEntry, ClassRef)> {
        let mut level = self.clone();
        loop {
            if let Some(entry) = level.level_entry(name, ScopeFlags::OBJECT) {
                return Some((entry, level));
            }
            level = level.super_node()?;
        }
    }

    /// Any binding (method or object) visible from `requestor`, with the
    /// level that owns it. Protected entries are only visible to the receiver
    /// itself or to objects of a compatible class.
    pub fn get_scope_data(
        self: &Arc<Self>,
        name: &str,
        requestor: Option<&ClassRef>,
    ) -> Option<(ScopeEntry, ClassRef)> {
        let mut level = self.clone();
        loop {
            if let Some(entry) = level.level_entry(name, ScopeFlags::empty()) {
                if entry.flags.contains(ScopeFlags::PROTECTED) && !self.grants_protected(requestor) {
                    return None;
                }
                return Some((entry, level));
            }
            level = level.super_node()?;
        }
    }

    fn grants_protected(self: &Arc<Self>, requestor: Option<&ClassRef>) -> bool {
        match requestor {
            Some(requestor) => {
                Arc::ptr_eq(requestor, self) || requestor.template.is_kind_of(&self.template)
            }
            None => false,
        }
    }

    /// Assign an existing variable at this level or above
    pub fn set_variable(self: &Arc<Self>, name: &str, value: Node) -> bool {
        let mut level = self.clone();
        loop {
            let updated = if level.uses_meta_scope(name) {
                level.template.meta_scope().update_object(name, value.clone())
            } else {
                let mut scope = level.scope.lock();
                if scope.contains(name) {
                    scope.update_object(name, value.clone())
                } else {
                    let declared = level.template.scope().get(name, ScopeFlags::OBJECT).cloned();
                    match declared {
                        Some(entry) => {
                            scope.set(name, value.clone(), entry.flags);
                            true
                        }
                        None => false,
                    }
                }
            };
            if updated {
                return true;
            }
            match level.super_node() {
                Some(next) => level = next,
                None => return false,
            }
        }
    }

    pub fn get_variable(self: &Arc<Self>, name: &str) -> Option<Node> {
        self.lookup_object(name).map(|(entry, _)| entry.object)
    }

    /// The level of this object belonging to `template`
    pub fn cast(self: &Arc<Self>, template: &ClassTemplate) -> Option<ClassRef> {
        let mut level = self.clone();
        loop {
            if std::ptr::eq(level.template.as_ref(), template) {
                return Some(level);
            }
            level = level.super_node()?;
        }
    }

    pub fn is_kind_of(&self, template: &ClassTemplate) -> bool {
        self.template.is_kind_of(template)
    }

    pub fn copy(&self, depth: Depth) -> ClassRef {
        let scope = self.scope.lock().copy(depth);
        let object = Arc::new(Self::build(
            self.template.clone(),
            self.is_object,
            scope,
            NodeFlags::empty(),
        ));

        let aux = self.aux();
        *object.aux.lock() = match (aux, self.template.native.and_then(|h| h.copy)) {
            (Some(aux), Some(copy)) => Some(copy(&aux, depth)),
            (Some(aux), None) => Some(aux.copy(depth)),
            (None, _) => None,
        };

        let super_node = self.super_node.lock().clone();
        *object.super_node.lock() = match (super_node, depth) {
            (Some(node), Depth::Deep) => Some(node.copy(Depth::Deep)),
            (other, _) => other,
        };
        object
    }

    /// A copy when the object is atomic, otherwise the same handle
    pub fn copy_if_atomic(self: &Arc<Self>) -> ClassRef {
        if self.template.is_atomic() && self.is_object {
            self.copy(Depth::Deep)
        } else {
            self.clone()
        }
    }

    /// A copy when the object is an unshared template or atomic
    pub fn copy_if_template_or_atomic(self: &Arc<Self>) -> ClassRef {
        if self.header.contains(NodeFlags::TEMPLATE) {
            self.copy(Depth::Deep)
        } else {
            self.copy_if_atomic()
        }
    }

    /// Drop every reference this object holds
    pub fn release_contents(&self) {
        if let Some(deallocate) = self.template.native.and_then(|h| h.deallocate) {
            deallocate(self);
        }
        let drained: Vec<Node> = self.scope.lock().drain().map(|(_, e)| e.object).collect();
        let aux = self.aux.lock().take();
        let super_node = self.super_node.lock().take();
        for child in drained.into_iter().chain(aux) {
            child.release(Depth::Deep);
        }
        if let Some(node) = super_node {
            if !node.header.contains(NodeFlags::REGISTERED) {
                node.release_contents();
            }
        }
    }

    /// Visit the direct children: own scope, payload, super level, and for
    /// meta objects the class state
    pub fn for_each_child(&self, visit: &mut dyn FnMut(&Node)) {
        let children: Vec<Node> = {
            let scope = self.scope.lock();
            let mut children = Vec::with_capacity(scope.len() + 2);
            scope.for_each_object(&mut |node| children.push(node.clone()));
            children
        };
        children.iter().for_each(|node| visit(node));

        if let Some(aux) = self.aux() {
            visit(&aux);
        }
        let super_node = self.super_node.lock().clone();
        if let Some(node) = super_node {
            visit(&Node::Class(node));
        }

        if let Some(hooks) = self.template.native {
            if let Some(mark) = hooks.mark {
                mark(self, visit);
            }
        }

        if self.is_meta() {
            let state: Vec<Node> = {
                let meta = self.template.meta_scope();
                let mut state = Vec::with_capacity(meta.len());
                meta.for_each_object(&mut |node| state.push(node.clone()));
                state
            };
            state.iter().for_each(|node| visit(node));
            if let Some(meta_mark) = self.template.native.and_then(|h| h.meta_mark) {
                meta_mark(&self.template, visit);
            }
        }
    }
}

impl Drop for ClassObject {
    fn drop(&mut self) {
        if let Some(free) = self.template.native.and_then(|h| h.free) {
            free(self);
        }
    }
}

impl fmt::Display for ClassObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.aux() {
            Some(aux) => write!(f, "{}", aux),
            None if self.is_object => write!(f, "<{} instance>", self.template.name),
            None => write!(f, "{}", self.template.name),
        }
    }
}

impl fmt::Debug for ClassObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClassObject({}, {})",
            self.template.full_name(),
            if self.is_object { "instance" } else { "meta" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::template::ClassFlags;

    fn chain() -> (Arc<ClassTemplate>, Arc<ClassTemplate>) {
        let a = Arc::new(ClassTemplate::new("t", "A", None, ClassFlags::empty()));
        a.declare_variable("@x", Node::Int64(0), ScopeFlags::empty());
        a.make_reader("@x");
        a.make_writer("@x");
        let b = ClassTemplate::new("t", "B", Some(Arc::from("t.A")), ClassFlags::empty());
        let b = Arc::new(b);
        b.declare_variable("@y", Node::Int64(1), ScopeFlags::empty());
        assert!(b.set_super_template(a.clone()));
        (a, b)
    }

    #[test]
    fn test_instance_copies_declared_variables() {
        let (_, b) = chain();
        let object = ClassObject::new_instance(&b);
        let (entry, level) = object.lookup_object("@y").expect("own level");
        assert!(Arc::ptr_eq(&level, &object));
        assert_eq!(entry.object.as_i64(), Some(1));
    }

    #[test]
    fn test_inherited_variable_lives_in_super_level() {
        let (a, b) = chain();
        let object = ClassObject::new_instance(&b);
        assert!(object.set_variable("@x", Node::Int64(5)));

        let level = object.cast(&a).expect("A level");
        assert!(!Arc::ptr_eq(&level, &object));
        assert_eq!(level.get_variable("@x").and_then(|n| n.as_i64()), Some(5));
        assert_eq!(object.get_variable("@x").and_then(|n| n.as_i64()), Some(5));
    }

    #[test]
    fn test_undeclared_variable_is_not_set() {
        let (_, b) = chain();
        let object = ClassObject::new_instance(&b);
        assert!(!object.set_variable("@nope", Node::Int64(1)));
    }

    #[test]
    fn test_method_found_on_super_level() {
        let (a, b) = chain();
        let object = ClassObject::new_instance(&b);
        let (entry, level) = object.get_scope_data("setX:", None).expect("inherited");
        assert!(entry.is_method());
        assert!(Arc::ptr_eq(level.template(), &a));
    }

    #[test]
    fn test_protected_entry_refused_to_strangers() {
        let (a, b) = chain();
        a.scope().set_method(
            "secret",
            Node::Int64(0),
            ScopeFlags::PROTECTED,
        );
        let object = ClassObject::new_instance(&b);
        let stranger_template = Arc::new(ClassTemplate::new("t", "C", None, ClassFlags::empty()));
        let stranger = ClassObject::new_instance(&stranger_template);

        assert!(object.get_scope_data("secret", None).is_none());
        assert!(object.get_scope_data("secret", Some(&stranger)).is_none());
        assert!(object.get_scope_data("secret", Some(&object)).is_some());
    }

    #[test]
    fn test_meta_variables_shared_through_template() {
        let (_, b) = chain();
        b.declare_variable("@@count", Node::Int64(0), ScopeFlags::empty());
        let meta = ClassObject::new_meta(&b);
        let instance = ClassObject::new_instance(&b);
        assert!(meta.set_variable("@@count", Node::Int64(3)));
        assert_eq!(instance.get_variable("@@count").and_then(|n| n.as_i64()), Some(3));
    }

    #[test]
    fn test_copy_if_atomic() {
        let atomic = Arc::new(ClassTemplate::new("t", "N", None, ClassFlags::ATOMIC));
        let plain = Arc::new(ClassTemplate::new("t", "P", None, ClassFlags::empty()));
        let n = ClassObject::new_instance(&atomic);
        let p = ClassObject::new_instance(&plain);
        assert!(!Arc::ptr_eq(&n.copy_if_atomic(), &n));
        assert!(Arc::ptr_eq(&p.copy_if_atomic(), &p));
    }

    #[test]
    fn test_release_contents_empties_scope() {
        let (_, b) = chain();
        let object = ClassObject::new_instance(&b);
        object.release_contents();
        assert!(object.scope.lock().is_empty());
        assert!(object.aux().is_none());
    }
}
