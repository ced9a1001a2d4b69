// Taffy Marshalling
// A byte format for object graphs. Every value starts with a tag byte;
// 0xFF stands for "no value" and 0xFE plus an id for a registered singleton.
// Integers are 7-bit varints, least significant group first, with the high
// bit set on every byte but the last. Class instances carry their template's
// marshall id, an is-object byte, their scope, the native payload and the
// super level, so the receiving runtime must register the same classes.

use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

use crate::class::{ClassManager, ClassObject, ClassRef};
use crate::error::{ErrorKind, Span, TaffyError};
use crate::node::{Container, Node, NodeHash};
use crate::scope::{Scope, ScopeFlags};

pub const NONE_TAG: u8 = 0xFF;
pub const SINGLETON_TAG: u8 = 0xFE;

const INT32_TAG: u8 = b'i';
const UINT32_TAG: u8 = b'u';
const INT64_TAG: u8 = b'I';
const FLOAT_TAG: u8 = b'f';
const STRING_TAG: u8 = b'X';
const SYMBOL_TAG: u8 = b'y';
const ARRAY_TAG: u8 = b'a';
const HASH_TAG: u8 = b'h';
const LIST_TAG: u8 = b'l';
const PAIR_TAG: u8 = b'p';
const OBJECT_TAG: u8 = b'c';
const META_TAG: u8 = b'm';
const SCOPE_TAG: u8 = b'S';

/// Deepest value nesting read or written before giving up
pub const MAX_NESTING: usize = 512;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarshallError {
    #[error("unexpected end of stream at byte {0}")]
    UnexpectedEnd(usize),
    #[error("unknown tag 0x{tag:02x} at byte {position}")]
    UnknownTag { tag: u8, position: usize },
    #[error("no class is registered under marshall id {0}")]
    UnknownClass(u32),
    #[error("no singleton is registered under id {0}")]
    UnknownSingleton(u32),
    #[error("class '{0}' is not registered and cannot be marshalled")]
    Unregistered(String),
    #[error("invalid UTF-8 in text at byte {0}")]
    InvalidUtf8(usize),
    #[error("varint at byte {0} does not fit in 64 bits")]
    Overflow(usize),
    #[error("{0} values cannot be marshalled")]
    Unsupported(&'static str),
    #[error("object graph contains a cycle")]
    Cycle,
    #[error("{0} bytes left over after the value")]
    TrailingBytes(usize),
    #[error("values nested more than {MAX_NESTING} deep at byte {0}")]
    TooDeep(usize),
}

impl From<MarshallError> for TaffyError {
    fn from(error: MarshallError) -> Self {
        TaffyError::new(ErrorKind::MarshallError, error.to_string(), Span::default(), "<marshall>")
    }
}

/// Serialize one value
pub fn marshall(node: &Node) -> Result<Vec<u8>, MarshallError> {
    let mut marshaller = Marshaller::new();
    marshaller.write_node(node)?;
    Ok(marshaller.into_bytes())
}

/// Rebuild one value; the whole input must be consumed
pub fn unmarshall(bytes: &[u8], classes: &ClassManager) -> Result<Node, MarshallError> {
    let mut unmarshaller = Unmarshaller::new(bytes, classes);
    let node = unmarshaller.read_node()?;
    match unmarshaller.remaining() {
        0 => Ok(node),
        left => Err(MarshallError::TrailingBytes(left)),
    }
}

// ==================== Writing ====================

#[derive(Default)]
pub struct Marshaller {
    buffer: Vec<u8>,
    /// Objects whose serialization is under way
    in_progress: FxHashSet<usize>,
    depth: usize,
}

impl Marshaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.buffer.push(byte);
    }

    pub fn write_varint(&mut self, mut value: u64) {
        loop {
            let group = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.buffer.push(group);
                return;
            }
            self.buffer.push(group | 0x80);
        }
    }

    /// Zigzag, so small negative numbers stay short
    pub fn write_signed(&mut self, value: i64) {
        self.write_varint(((value << 1) ^ (value >> 63)) as u64);
    }

    pub fn write_text(&mut self, text: &str) {
        self.write_varint(text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    pub fn write_option(&mut self, node: Option<&Node>) -> Result<(), MarshallError> {
        match node {
            Some(node) => self.write_node(node),
            None => {
                self.write_byte(NONE_TAG);
                Ok(())
            }
        }
    }

    pub fn write_node(&mut self, node: &Node) -> Result<(), MarshallError> {
        if self.depth >= MAX_NESTING {
            return Err(MarshallError::TooDeep(self.buffer.len()));
        }
        self.depth += 1;
        let result = self.write_tagged(node);
        self.depth -= 1;
        result
    }

    fn write_tagged(&mut self, node: &Node) -> Result<(), MarshallError> {
        match node {
            Node::Int32(n) => {
                self.write_byte(INT32_TAG);
                self.write_signed(i64::from(*n));
            }
            Node::UInt32(n) => {
                self.write_byte(UINT32_TAG);
                self.write_varint(u64::from(*n));
            }
            Node::Int64(n) => {
                self.write_byte(INT64_TAG);
                self.write_signed(*n);
            }
            Node::Float(n) => {
                self.write_byte(FLOAT_TAG);
                self.buffer.extend_from_slice(&n.to_bits().to_le_bytes());
            }
            Node::String(text) => {
                self.write_byte(STRING_TAG);
                self.write_text(text);
            }
            Node::Symbol(name) => {
                self.write_byte(SYMBOL_TAG);
                self.write_text(name);
            }
            Node::Array(items) => {
                let items = items.lock().clone();
                self.write_byte(ARRAY_TAG);
                self.write_sequence(&items)?;
            }
            Node::List(items) => {
                let items: Vec<Node> = items.lock().iter().cloned().collect();
                self.write_byte(LIST_TAG);
                self.write_sequence(&items)?;
            }
            Node::Pair(pair) => {
                let (left, right) = pair.lock().clone();
                self.write_byte(PAIR_TAG);
                self.write_node(&left)?;
                self.write_node(&right)?;
            }
            Node::Hash(hash) => {
                let pairs: Vec<(Node, Node)> = hash
                    .lock()
                    .pairs()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                self.write_byte(HASH_TAG);
                self.write_varint(pairs.len() as u64);
                for (key, value) in &pairs {
                    self.write_node(key)?;
                    self.write_node(value)?;
                }
            }
            Node::Class(object) => self.write_class(object)?,
            other => return Err(MarshallError::Unsupported(other.type_name())),
        }
        Ok(())
    }

    fn write_sequence(&mut self, items: &[Node]) -> Result<(), MarshallError> {
        self.write_varint(items.len() as u64);
        for item in items {
            self.write_node(item)?;
        }
        Ok(())
    }

    fn write_class(&mut self, object: &ClassRef) -> Result<(), MarshallError> {
        let template = object.template();
        if object.is_object() && template.is_singleton() && template.singleton_id() != 0 {
            self.write_byte(SINGLETON_TAG);
            self.write_varint(u64::from(template.singleton_id()));
            return Ok(());
        }

        let id = template.marshall_id();
        if id == 0 {
            return Err(MarshallError::Unregistered(template.full_name()));
        }
        if object.is_meta() {
            self.write_byte(META_TAG);
            self.write_varint(u64::from(id));
            return Ok(());
        }

        if !self.in_progress.insert(object.identity()) {
            return Err(MarshallError::Cycle);
        }
        self.write_byte(OBJECT_TAG);
        self.write_varint(u64::from(id));
        self.write_byte(u8::from(object.is_object()));

        let mut entries = object.scope_entries();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.write_byte(SCOPE_TAG);
        self.write_varint(entries.len() as u64);
        for (name, entry) in &entries {
            self.write_text(name);
            self.write_varint(u64::from(entry.flags.bits()));
            self.write_node(&entry.object)?;
        }

        match (object.aux(), template.native.and_then(|hooks| hooks.marshall)) {
            (None, _) => self.write_byte(NONE_TAG),
            (Some(aux), Some(hook)) => hook(&aux, self)?,
            (Some(aux), None) => self.write_node(&aux)?,
        }

        let super_node = object.existing_super_node().map(Node::Class);
        self.write_option(super_node.as_ref())?;
        self.in_progress.remove(&object.identity());
        Ok(())
    }
}

// ==================== Reading ====================

pub struct Unmarshaller<'a> {
    data: &'a [u8],
    position: usize,
    classes: &'a ClassManager,
    depth: usize,
}

impl<'a> Unmarshaller<'a> {
    pub fn new(data: &'a [u8], classes: &'a ClassManager) -> Self {
        Self {
            data,
            position: 0,
            classes,
            depth: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.data.get(self.position).copied()
    }

    pub fn read_byte(&mut self) -> Result<u8, MarshallError> {
        let byte = self
            .peek_byte()
            .ok_or(MarshallError::UnexpectedEnd(self.position))?;
        self.position += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], MarshallError> {
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or(MarshallError::UnexpectedEnd(self.data.len()))?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    pub fn read_varint(&mut self) -> Result<u64, MarshallError> {
        let start = self.position;
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            if shift >= 64 || (shift == 63 && byte & 0x7F > 1) {
                return Err(MarshallError::Overflow(start));
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_signed(&mut self) -> Result<i64, MarshallError> {
        let raw = self.read_varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    fn read_id(&mut self) -> Result<u32, MarshallError> {
        let start = self.position;
        let raw = self.read_varint()?;
        u32::try_from(raw).map_err(|_| MarshallError::Overflow(start))
    }

    pub fn read_text(&mut self) -> Result<Arc<str>, MarshallError> {
        let length = self.read_varint()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(length)?;
        std::str::from_utf8(bytes)
            .map(Arc::from)
            .map_err(|_| MarshallError::InvalidUtf8(start))
    }

    /// A value, or None for the "no value" marker
    pub fn read_option(&mut self) -> Result<Option<Node>, MarshallError> {
        if self.peek_byte() == Some(NONE_TAG) {
            self.position += 1;
            return Ok(None);
        }
        self.read_node().map(Some)
    }

    pub fn read_node(&mut self) -> Result<Node, MarshallError> {
        if self.depth >= MAX_NESTING {
            return Err(MarshallError::TooDeep(self.position));
        }
        self.depth += 1;
        let result = self.read_tagged();
        self.depth -= 1;
        result
    }

    fn read_tagged(&mut self) -> Result<Node, MarshallError> {
        let position = self.position;
        let tag = self.read_byte()?;
        let node = match tag {
            INT32_TAG => {
                let value = self.read_signed()?;
                Node::Int32(i32::try_from(value).map_err(|_| MarshallError::Overflow(position))?)
            }
            UINT32_TAG => {
                let value = self.read_varint()?;
                Node::UInt32(u32::try_from(value).map_err(|_| MarshallError::Overflow(position))?)
            }
            INT64_TAG => Node::Int64(self.read_signed()?),
            FLOAT_TAG => {
                let bytes = self.read_bytes(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Node::Float(f64::from_bits(u64::from_le_bytes(raw)))
            }
            STRING_TAG => Node::String(self.read_text()?),
            SYMBOL_TAG => Node::Symbol(self.read_text()?),
            ARRAY_TAG => Node::Array(Container::new(self.read_sequence()?)),
            LIST_TAG => {
                let items: VecDeque<Node> = self.read_sequence()?.into();
                Node::List(Container::new(items))
            }
            PAIR_TAG => {
                let left = self.read_node()?;
                let right = self.read_node()?;
                Node::Pair(Container::new((left, right)))
            }
            HASH_TAG => {
                let count = self.read_varint()?;
                let mut hash = NodeHash::new();
                for _ in 0..count {
                    let key = self.read_node()?;
                    let value = self.read_node()?;
                    hash.insert(key, value)
                        .map_err(|_| MarshallError::Unsupported("unhashable key"))?;
                }
                Node::Hash(Container::new(hash))
            }
            SINGLETON_TAG => {
                let id = self.read_id()?;
                self.classes
                    .singleton_from_id(id)
                    .ok_or(MarshallError::UnknownSingleton(id))?
            }
            META_TAG => {
                let id = self.read_id()?;
                let template = self
                    .classes
                    .template_from_id(id)
                    .ok_or(MarshallError::UnknownClass(id))?;
                let meta = self
                    .classes
                    .class_in(&template.package, &template.name)
                    .ok_or(MarshallError::UnknownClass(id))?;
                Node::Class(meta)
            }
            OBJECT_TAG => Node::Class(self.read_object()?),
            tag => return Err(MarshallError::UnknownTag { tag, position }),
        };
        Ok(node)
    }

    fn read_sequence(&mut self) -> Result<Vec<Node>, MarshallError> {
        let count = self.read_varint()?;
        let mut items = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            items.push(self.read_node()?);
        }
        Ok(items)
    }

    fn read_object(&mut self) -> Result<ClassRef, MarshallError> {
        let id = self.read_id()?;
        let template = self
            .classes
            .template_from_id(id)
            .ok_or(MarshallError::UnknownClass(id))?;
        let is_object = self.read_byte()? != 0;

        let position = self.position;
        let tag = self.read_byte()?;
        if tag != SCOPE_TAG {
            return Err(MarshallError::UnknownTag { tag, position });
        }
        let count = self.read_varint()?;
        let mut scope = Scope::new();
        for _ in 0..count {
            let name = self.read_text()?;
            let flags = ScopeFlags::from_bits_truncate(self.read_varint()? as u32);
            let object = self.read_node()?;
            if object.is_container() {
                return Err(MarshallError::Unsupported("raw container in scope"));
            }
            scope.set(&name, object, flags);
        }

        let aux = if self.peek_byte() == Some(NONE_TAG) {
            self.position += 1;
            None
        } else {
            match template.native.and_then(|hooks| hooks.unmarshall) {
                Some(hook) => Some(hook(self)?),
                None => Some(self.read_node()?),
            }
        };

        let super_node = match self.read_option()? {
            Some(Node::Class(level)) => Some(level),
            Some(other) => return Err(MarshallError::Unsupported(other.type_name())),
            None => None,
        };
        Ok(ClassObject::from_parts(&template, is_object, scope, aux, super_node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Runtime, RuntimeConfig};

    fn varint_bytes(value: u64) -> Vec<u8> {
        let mut marshaller = Marshaller::new();
        marshaller.write_varint(value);
        marshaller.into_bytes()
    }

    #[test]
    fn test_varint_low_group_first() {
        assert_eq!(varint_bytes(0), vec![0x00]);
        assert_eq!(varint_bytes(127), vec![0x7F]);
        assert_eq!(varint_bytes(128), vec![0x80, 0x01]);
        assert_eq!(varint_bytes(300), vec![0xAC, 0x02]);
    }

    #[test]
    fn test_signed_values_survive() {
        let manager = ClassManager::new();
        for value in [0i64, -1, 1, i64::MIN, i64::MAX] {
            let bytes = marshall(&Node::Int64(value)).expect("marshalls");
            let node = unmarshall(&bytes, &manager).expect("unmarshalls");
            assert_eq!(node.as_i64(), Some(value));
        }
    }

    #[test]
    fn test_nested_containers() {
        let manager = ClassManager::new();
        let inner = Node::Pair(Container::new((Node::Symbol(Arc::from("k")), Node::Float(1.5))));
        let outer = Node::Array(Container::new(vec![Node::String(Arc::from("héllo")), inner]));
        let bytes = marshall(&outer).expect("marshalls");
        let node = unmarshall(&bytes, &manager).expect("unmarshalls");
        assert_eq!(node.to_string(), "[héllo, (#k, 1.5)]");
    }

    #[test]
    fn test_truncated_and_trailing_input() {
        let manager = ClassManager::new();
        let bytes = marshall(&Node::String(Arc::from("abc"))).expect("marshalls");
        assert_eq!(
            unmarshall(&bytes[..bytes.len() - 1], &manager).err(),
            Some(MarshallError::UnexpectedEnd(bytes.len() - 1))
        );
        let mut longer = bytes.clone();
        longer.push(0);
        assert_eq!(unmarshall(&longer, &manager).err(), Some(MarshallError::TrailingBytes(1)));
        assert!(matches!(
            unmarshall(&[b'?'], &manager),
            Err(MarshallError::UnknownTag { tag: b'?', position: 0 })
        ));
    }

    #[test]
    fn test_deeply_nested_input_is_refused() {
        let manager = ClassManager::new();
        let mut bytes = Vec::new();
        for _ in 0..200_000 {
            bytes.extend_from_slice(&[ARRAY_TAG, 1]);
        }
        bytes.extend_from_slice(&[INT64_TAG, 0]);
        assert_eq!(
            unmarshall(&bytes, &manager).err(),
            Some(MarshallError::TooDeep(MAX_NESTING * 2))
        );
    }

    #[test]
    fn test_nesting_within_limit_reads_back() {
        let manager = ClassManager::new();
        let mut node = Node::Int64(7);
        for _ in 0..MAX_NESTING - 1 {
            node = Node::Array(Container::new(vec![node]));
        }
        let bytes = marshall(&node).expect("marshalls");
        assert!(unmarshall(&bytes, &manager).is_ok());

        let deeper = Node::Array(Container::new(vec![node]));
        assert!(matches!(marshall(&deeper), Err(MarshallError::TooDeep(_))));
    }

    #[test]
    fn test_singletons_keep_identity() {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let evaluator = runtime.create_evaluator();
        let nil = evaluator.nil();
        let bytes = marshall(&nil).expect("marshalls");
        assert_eq!(bytes[0], SINGLETON_TAG);
        let back = unmarshall(&bytes, runtime.classes()).expect("unmarshalls");
        assert!(back.is_same(&nil));
    }

    #[test]
    fn test_instances_round_trip() {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let source = "class Point {\n  @x, @rw\n  @y, @rw\n}\np = new Point\n[p setX: 3]\n[p setY: \"four\"]\np";
        let point = evaluator.evaluate_source(source, "marshall.ty").expect("evaluates");

        let bytes = marshall(&point).expect("marshalls");
        let copy = unmarshall(&bytes, runtime.classes()).expect("unmarshalls");
        let copy = copy.as_class().expect("object").clone();
        assert_eq!(copy.template().full_name(), "Point");
        assert_eq!(copy.get_variable("@x").map(|x| x.to_string()).as_deref(), Some("3"));
        assert_eq!(copy.get_variable("@y").map(|y| y.to_string()).as_deref(), Some("four"));
        assert!(!Arc::ptr_eq(&copy, point.as_class().expect("object")));
    }

    // Stores its payload as a bare varint instead of a tagged node
    fn counter_marshall(aux: &Node, marshaller: &mut Marshaller) -> Result<(), MarshallError> {
        marshaller.write_varint(aux.as_i64().unwrap_or(0) as u64);
        Ok(())
    }

    fn counter_unmarshall(unmarshaller: &mut Unmarshaller<'_>) -> Result<Node, MarshallError> {
        Ok(Node::Int64(unmarshaller.read_varint()? as i64))
    }

    static COUNTER_HOOKS: crate::class::NativeHooks = crate::class::NativeHooks {
        marshall: Some(counter_marshall),
        unmarshall: Some(counter_unmarshall),
        ..crate::class::NativeHooks::EMPTY
    };

    #[test]
    fn test_native_payload_uses_hooks() {
        use crate::class::{ClassFlags, ClassTemplate, OBJECT_CLASS};

        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let template = Arc::new(ClassTemplate::native(
            "test.marshall",
            "Counter",
            Some(OBJECT_CLASS),
            ClassFlags::empty(),
            &COUNTER_HOOKS,
        ));
        runtime
            .classes()
            .register_class_template(&mut evaluator, template.clone(), &[], true)
            .expect("registers")
            .expect("new name");

        let counter = ClassObject::with_aux(&template, Node::Int64(300));
        let bytes = marshall(&Node::Class(counter)).expect("marshalls");
        // tag, id, is-object, empty scope, two varint bytes, no super
        assert_eq!(bytes.len(), 1 + 1 + 1 + 2 + 2 + 1);
        assert_eq!(&bytes[5..7], &[0xAC, 0x02]);

        let back = unmarshall(&bytes, runtime.classes()).expect("unmarshalls");
        let back = back.as_class().expect("object");
        assert_eq!(back.aux().and_then(|aux| aux.as_i64()), Some(300));
    }

    #[test]
    fn test_cycles_are_refused() {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let source = "class Node { @next, @rw }\na = new Node\n[a setNext: a]\na";
        let node = evaluator.evaluate_source(source, "marshall.ty").expect("evaluates");
        assert_eq!(marshall(&node).err(), Some(MarshallError::Cycle));
    }
}
