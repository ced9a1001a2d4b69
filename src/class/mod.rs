// Taffy Classes
// Templates, instances and meta objects, methods, and the class registry

pub mod manager;
pub mod method;
pub mod object;
pub mod template;

pub use manager::{ClassManager, PackageContents, CORE_PACKAGES};
pub use method::{selector_arity, Method, MethodBody, NativeMethodFn};
pub use object::{ClassObject, ClassRef};
pub use template::{ClassFlags, ClassTemplate, NativeHooks, NativeMethod, OBJECT_CLASS};
