// Taffy Object Stacks
// One object stack per method activation: a stack of scopes plus the
// receiver. The object stack list chains activations; lookups fall through
// breakthrough activations and end in the global scope.

use std::sync::Arc;

use crate::class::{ClassRef, ClassTemplate};
use crate::node::Node;
use crate::scope::{Scope, ScopeEntry, ScopeFlags, ScopeRef};

/// Where a looked-up name is bound, so assignment can update it in place
#[derive(Clone)]
pub enum Binding {
    Scope(ScopeRef),
    /// An instance or class variable owned by this class level
    Object(ClassRef),
    Global(ScopeRef),
}

pub struct ObjectStack {
    scopes: Vec<ScopeRef>,
    self_object: Option<ClassRef>,
    self_is_const: bool,
    /// Class that defines the running method, the start of `super` lookups
    defining: Option<Arc<ClassTemplate>>,
    pub breakthrough: bool,
    pub loop_count: u32,
}

impl ObjectStack {
    pub fn new(self_object: Option<ClassRef>, self_is_const: bool, breakthrough: bool) -> Self {
        Self {
            scopes: Vec::new(),
            self_object,
            self_is_const,
            defining: None,
            breakthrough,
            loop_count: 0,
        }
    }

    pub fn with_defining(mut self, template: Arc<ClassTemplate>) -> Self {
        self.defining = Some(template);
        self
    }

    pub fn defining(&self) -> Option<&Arc<ClassTemplate>> {
        self.defining.as_ref()
    }

    pub fn with_scope(mut self, scope: ScopeRef) -> Self {
        self.scopes.push(scope);
        self
    }

    pub fn push_scope(&mut self, scope: ScopeRef) {
        self.scopes.push(scope);
    }

    pub fn pop_scope(&mut self) -> Option<ScopeRef> {
        self.scopes.pop()
    }

    pub fn tail_scope(&self) -> Option<&ScopeRef> {
        self.scopes.last()
    }

    /// Outermost first
    pub fn scopes(&self) -> &[ScopeRef] {
        &self.scopes
    }

    pub fn head_scope(&self) -> Option<&ScopeRef> {
        self.scopes.first()
    }

    pub fn self_object(&self) -> Option<&ClassRef> {
        self.self_object.as_ref()
    }

    pub fn self_is_const(&self) -> bool {
        self.self_is_const
    }

    /// Innermost scope first, then the receiver's class levels
    pub fn lookup(&self, name: &str) -> Option<(ScopeEntry, Binding)> {
        for scope in self.scopes.iter().rev() {
            if let Some(entry) = scope.lock().get(name, ScopeFlags::OBJECT) {
                return Some((entry.clone(), Binding::Scope(scope.clone())));
            }
        }

        let receiver = self.self_object.as_ref()?;
        receiver
            .lookup_object(name)
            .map(|(entry, level)| (entry, Binding::Object(level)))
    }

    pub fn for_each_root(&self, visit: &mut dyn FnMut(Node)) {
        if let Some(receiver) = &self.self_object {
            visit(Node::Class(receiver.clone()));
        }
        for scope in &self.scopes {
            visit(Node::Scope(scope.clone()));
        }
    }
}

pub struct ObjectStackList {
    stacks: Vec<ObjectStack>,
    global: ScopeRef,
}

impl ObjectStackList {
    pub fn new(global: ScopeRef) -> Self {
        Self {
            stacks: Vec::new(),
            global,
        }
    }

    pub fn global_scope(&self) -> &ScopeRef {
        &self.global
    }

    pub fn push(&mut self, stack: ObjectStack) {
        self.stacks.push(stack);
    }

    pub fn pop(&mut self) -> Option<ObjectStack> {
        self.stacks.pop()
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub fn tail(&self) -> Option<&ObjectStack> {
        self.stacks.last()
    }

    pub fn tail_mut(&mut self) -> Option<&mut ObjectStack> {
        self.stacks.last_mut()
    }

    pub fn push_scope(&mut self, scope: ScopeRef) {
        if let Some(stack) = self.stacks.last_mut() {
            stack.push_scope(scope);
        }
    }

    pub fn pop_scope(&mut self) -> Option<ScopeRef> {
        self.stacks.last_mut().and_then(|stack| stack.pop_scope())
    }

    /// The innermost scope; the global scope when nothing is pushed
    pub fn tail_scope(&self) -> ScopeRef {
        self.stacks
            .last()
            .and_then(|stack| stack.tail_scope())
            .cloned()
            .unwrap_or_else(|| self.global.clone())
    }

    pub fn tail_self(&self) -> Option<ClassRef> {
        self.stacks
            .last()
            .and_then(|stack| stack.self_object())
            .cloned()
    }

    /// Receiver of the nearest activation that is not breakthrough
    pub fn up_self(&self) -> Option<ClassRef> {
        self.stacks
            .iter()
            .rev()
            .find(|stack| !stack.breakthrough)
            .and_then(|stack| stack.self_object())
            .cloned()
    }

    /// Search from the tail, crossing only breakthrough activations, then
    /// the global scope
    pub fn lookup(&self, name: &str) -> Option<(ScopeEntry, Binding)> {
        for stack in self.stacks.iter().rev() {
            if let Some(found) = stack.lookup(name) {
                return Some(found);
            }
            if !stack.breakthrough {
                break;
            }
        }

        let global = self.global.lock();
        global
            .get(name, ScopeFlags::OBJECT)
            .map(|entry| (entry.clone(), Binding::Global(self.global.clone())))
    }

    pub fn get_object(&self, name: &str) -> Option<Node> {
        self.lookup(name).map(|(entry, _)| entry.object)
    }

    pub fn is_object_const(&self, object: &ClassRef) -> bool {
        self.stacks.iter().rev().any(|stack| {
            stack.self_is_const
                && stack
                    .self_object
                    .as_ref()
                    .map_or(false, |receiver| std::sync::Arc::ptr_eq(receiver, object))
        })
    }

    /// Whether a `break` here has a loop to stop
    pub fn has_enclosing_loop(&self) -> bool {
        for stack in self.stacks.iter().rev() {
            if stack.loop_count > 0 {
                return true;
            }
            if !stack.breakthrough {
                break;
            }
        }
        false
    }

    pub fn start_loop(&mut self) {
        if let Some(stack) = self.stacks.last_mut() {
            stack.loop_count += 1;
        }
    }

    pub fn stop_loop(&mut self) {
        if let Some(stack) = self.stacks.last_mut() {
            stack.loop_count = stack.loop_count.saturating_sub(1);
        }
    }

    pub fn for_each_root(&self, visit: &mut dyn FnMut(Node)) {
        visit(Node::Scope(self.global.clone()));
        for stack in &self.stacks {
            stack.for_each_root(visit);
        }
    }

    /// A fresh scope for a block body
    pub fn push_new_scope(&mut self) -> ScopeRef {
        let scope = Scope::new_ref();
        self.push_scope(scope.clone());
        scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> ObjectStackList {
        ObjectStackList::new(Scope::new_ref())
    }

    #[test]
    fn test_lookup_inner_scope_shadows_outer() {
        let mut stacks = list();
        stacks.push(ObjectStack::new(None, false, false).with_scope(Scope::new_ref()));
        stacks
            .tail_scope()
            .lock()
            .set_object("a", Node::Int64(1), ScopeFlags::empty());
        let inner = stacks.push_new_scope();
        inner.lock().set_object("a", Node::Int64(2), ScopeFlags::empty());

        assert_eq!(stacks.get_object("a").and_then(|n| n.as_i64()), Some(2));
        stacks.pop_scope();
        assert_eq!(stacks.get_object("a").and_then(|n| n.as_i64()), Some(1));
    }

    #[test]
    fn test_lookup_stops_at_non_breakthrough_then_global() {
        let mut stacks = list();
        stacks
            .global_scope()
            .lock()
            .set_object("g", Node::Int64(9), ScopeFlags::GLOBAL);
        stacks.push(ObjectStack::new(None, false, false).with_scope(Scope::new_ref()));
        stacks
            .tail_scope()
            .lock()
            .set_object("caller", Node::Int64(1), ScopeFlags::empty());
        stacks.push(ObjectStack::new(None, false, false).with_scope(Scope::new_ref()));

        assert!(stacks.get_object("caller").is_none());
        assert!(matches!(stacks.lookup("g"), Some((_, Binding::Global(_)))));

        stacks.pop();
        stacks.push(ObjectStack::new(None, false, true).with_scope(Scope::new_ref()));
        assert_eq!(stacks.get_object("caller").and_then(|n| n.as_i64()), Some(1));
    }

    #[test]
    fn test_break_search_crosses_breakthrough_only() {
        let mut stacks = list();
        stacks.push(ObjectStack::new(None, false, false).with_scope(Scope::new_ref()));
        assert!(!stacks.has_enclosing_loop());

        stacks.start_loop();
        stacks.push(ObjectStack::new(None, false, true).with_scope(Scope::new_ref()));
        assert!(stacks.has_enclosing_loop());

        stacks.pop();
        stacks.push(ObjectStack::new(None, false, false).with_scope(Scope::new_ref()));
        assert!(!stacks.has_enclosing_loop());
    }
}
