// Taffy Class Evaluation
// Class definitions, `new`, `package`, and the package context of the
// file being evaluated

use std::sync::Arc;
use tracing::debug;

use crate::class::{ClassFlags, ClassObject, ClassRef, ClassTemplate, Method, OBJECT_CLASS};
use crate::graph::{ClassDefinition, GraphKind, MemberDefinition};
use crate::node::Node;
use crate::runtime::file_package::FilePackageRef;
use crate::scope::ScopeFlags;

use super::{EvalResult, ImportOutcome, ImportReference, NodeEvaluator};

/// Flags that may differ between a class and a later re-opening of it
const UPDATE_TOLERATED: ClassFlags = ClassFlags::HAS_READ_WRITE_LOCK.union(ClassFlags::SINGLETON);

impl NodeEvaluator {
    // ==================== Package context ====================

    pub(super) fn file_package_name(&self) -> Arc<str> {
        match &self.file_package {
            Some(package) => package.lock().package_name(),
            None => Arc::from(""),
        }
    }

    /// Imported classes and packages visible to the running file, always
    /// including the contents node of the file's own package
    pub fn contents_list(&self) -> Vec<Node> {
        self.contents_of(self.file_package.as_ref())
    }

    pub(super) fn contents_of(&self, file_package: Option<&FilePackageRef>) -> Vec<Node> {
        let (package, mut contents) = match file_package {
            Some(file_package) => {
                let data = file_package.lock();
                (data.package_name(), data.contents.clone())
            }
            None => (Arc::from(""), Vec::new()),
        };
        if let Some(own) = self.runtime.classes().find_package_contents(&package, true) {
            contents.push(Node::PackageContents(own));
        }
        contents
    }

    pub(super) fn evaluate_package(&mut self, path: &str) -> EvalResult {
        let Some(file_package) = self.file_package.clone() else {
            return Ok(self.nil());
        };
        {
            let mut data = file_package.lock();
            if data.package.is_none() {
                data.package = Some(Arc::from(path));
                drop(data);
                self.runtime.classes().find_package_contents(path, true);
                return Ok(self.nil());
            }
        }
        Err(self.throw_named("MoreThanOnePackageException", &[]))
    }

    // ==================== new ====================

    pub(super) fn evaluate_new(&mut self, class_name: &str) -> EvalResult {
        let package = self.file_package_name();
        let contents = self.contents_list();
        let tail_self = self.object_stacks.tail_self();
        let found = self
            .runtime
            .classes()
            .get_class(class_name, &package, &contents, tail_self.as_ref());

        let meta = match found {
            Some(meta) => meta,
            None => match self.import_class(class_name)? {
                ImportOutcome::Found(Node::Class(meta)) => meta,
                _ => {
                    let class_name = self.new_string(class_name);
                    return Err(self.throw_named(
                        "UnidentifiedClassException",
                        &[("@className", class_name)],
                    ));
                }
            },
        };

        let template = meta.template().clone();
        if template.is_singleton() && template.singleton_id() != 0 {
            let class_name = self.new_string(&template.name);
            return Err(self.throw_named(
                "SingletonInstantiationException",
                &[("@className", class_name)],
            ));
        }
        if template.is_abstract() {
            let object_name = self.new_string(&template.name);
            return Err(self.throw_named(
                "AbstractClassInstantiationException",
                &[("@objectName", object_name)],
            ));
        }
        if !template.is_resolved() {
            let runtime = self.runtime.clone();
            runtime.classes().initialize_class(self, &meta, &contents)?;
        }

        let instance = ClassObject::new_instance(&template);
        self.runtime.gc().register_object(&instance);
        let instance = Node::Class(instance);
        self.call_method_with_arguments(&instance, "init", &[], true)?;
        Ok(instance)
    }

    // ==================== Class definitions ====================

    /// Define or re-open a class. Nested classes are registered under the
    /// enclosing class's full name.
    pub(super) fn evaluate_class_definition(
        &mut self,
        definition: &ClassDefinition,
        parent: Option<&ClassRef>,
    ) -> EvalResult {
        let package: Arc<str> = match parent {
            Some(parent) => Arc::from(parent.template().full_name()),
            None => self.file_package_name(),
        };
        let template = self.build_template(definition, &package);
        let runtime = self.runtime.clone();

        if let Some(existing) = runtime.classes().class_in(&package, &definition.name) {
            self.update_class(&existing, &template)?;
            return Ok(Node::Class(existing));
        }

        let template = Arc::new(template);
        if let Some(parent) = parent {
            template.set_parent(parent);
        }
        let contents = self.contents_list();
        let initialize = self.import_depth == 0;
        let registered =
            runtime
                .classes()
                .register_class_template(self, template.clone(), &contents, initialize)?;

        let Some(meta) = registered else {
            // another thread registered the name first
            let existing = runtime.classes().class_in(&package, &definition.name);
            return match existing {
                Some(existing) => {
                    self.update_class(&existing, &template)?;
                    Ok(Node::Class(existing))
                }
                None => Ok(self.nil()),
            };
        };

        if let Some(parent) = parent {
            parent
                .template()
                .meta_scope()
                .set_object(&definition.name, Node::Class(meta.clone()), ScopeFlags::META);
        }
        if self.import_depth > 0 {
            self.import_references.push(ImportReference {
                meta: meta.clone(),
                file_package: self.file_package.clone(),
                call_stack: self.call_stack.clone(),
            });
        }

        for member in &definition.members {
            if let MemberDefinition::Class(nested) = member {
                if let GraphKind::Class(nested) = &nested.kind {
                    self.evaluate_class_definition(nested, Some(&meta))?;
                }
            }
        }

        if self.import_depth == 0 {
            self.meta_init(&meta)?;
        }
        Ok(Node::Class(meta))
    }

    fn build_template(&self, definition: &ClassDefinition, package: &Arc<str>) -> ClassTemplate {
        let full_name = if package.is_empty() {
            definition.name.to_string()
        } else {
            format!("{}.{}", package, definition.name)
        };
        let super_name = definition
            .super_name
            .clone()
            .or_else(|| (full_name != OBJECT_CLASS).then(|| Arc::from(OBJECT_CLASS)));

        let mut class_flags = definition.class_flags;
        let uses_rw_lock = definition.members.iter().any(|member| {
            matches!(member, MemberDefinition::Method { flags, .. }
                if flags.intersects(ScopeFlags::SYNCHRONIZED_READ | ScopeFlags::SYNCHRONIZED_WRITE))
        });
        if uses_rw_lock {
            class_flags |= ClassFlags::HAS_READ_WRITE_LOCK;
        }
        let scope_flags = if definition.protected {
            ScopeFlags::PROTECTED
        } else {
            ScopeFlags::empty()
        };

        let template = ClassTemplate::new(package.clone(), definition.name.clone(), super_name, class_flags)
            .with_file(Some(self.current_file()))
            .with_scope_flags(scope_flags);

        for member in &definition.members {
            match member {
                MemberDefinition::Variable {
                    name,
                    flags,
                    reader,
                    writer,
                } => {
                    template.declare_variable(name, self.nil(), *flags);
                    if *reader {
                        template.make_reader(name);
                    }
                    if *writer {
                        template.make_writer(name);
                    }
                }
                MemberDefinition::Method {
                    selector,
                    params,
                    meta,
                    flags,
                    body,
                } => {
                    let method = Method::taffy(selector.clone(), params.clone(), body.clone());
                    if *meta {
                        template.add_meta_method(method, *flags);
                    } else {
                        template.add_method(method, *flags);
                    }
                }
                MemberDefinition::Class(_) => {}
            }
        }
        template
    }

    /// Merge a re-opened definition into the registered class
    fn update_class(&mut self, existing: &ClassRef, update: &ClassTemplate) -> EvalResult<()> {
        let current = existing.template();
        let differs = (current.class_flags ^ update.class_flags).difference(UPDATE_TOLERATED);
        if !differs.is_empty() {
            return Err(self.throw_named("InconsistentClassUpdateException", &[]));
        }
        if current.is_final() {
            return Err(self.throw_named("FinalClassUpdateException", &[]));
        }
        current.update(update);
        debug!(class = %current.full_name(), "class updated");
        Ok(())
    }

    /// Finish a class at top level: a singleton gets its one instance, then
    /// the meta object receives `init`
    pub(super) fn meta_init(&mut self, meta: &ClassRef) -> EvalResult<()> {
        let template = meta.template().clone();
        if template.is_singleton() && template.singleton_id() == 0 {
            let instance = ClassObject::new_instance(&template);
            self.runtime.gc().register_object(&instance);
            self.runtime.classes().register_singleton(&instance);
            self.call_method_with_arguments(&Node::Class(instance), "init", &[], true)?;
        }
        self.call_method_with_arguments(&Node::Class(meta.clone()), "init", &[], true)?;
        Ok(())
    }
}
