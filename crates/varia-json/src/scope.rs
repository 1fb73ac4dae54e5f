//! Out-of-line object serialization.
//!
//! A [`SerializationScope`] walks a value graph and collects each
//! serializable host object once, keyed by its UUID. The objects are written
//! into a `serialized_objects` list beside the document and referenced from
//! it as `"@eval deserialize('<uuid>')"`.
//!
//! A [`ReadScope`] does the reverse. References met while reading become
//! `ObjectLoading` placeholders. They are filled when the scope finishes,
//! after the listed objects have been constructed through an
//! [`ObjectRegistry`], so forward references and cycles both resolve.

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use uuid::Uuid;
use varia_core::{Context, LoadingStore, ObjectRef, SerialId, Trust, Value, VariantError};

use crate::reader::Reader;
use crate::writer::{write_json, WriteOptions};

pub const SERIALIZED_OBJECTS_KEY: &str = "serialized_objects";
pub const SERIALIZED_DOC_KEY: &str = "__serialized_doc";
pub const TYPE_KEY: &str = "@type";
pub const UUID_KEY: &str = "_uuid";

/// Builds a host object from its payload map. The `SerialId` carries the
/// UUID the object was written under, so writing it again keeps it.
pub type ObjectConstructor =
    Rc<dyn Fn(&Context, &Value, SerialId) -> Result<ObjectRef, VariantError>>;

/// Constructors for serializable host objects, keyed by type tag.
#[derive(Clone, Default)]
pub struct ObjectRegistry {
    constructors: HashMap<String, ObjectConstructor>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        ObjectRegistry::default()
    }

    pub fn register(
        &mut self,
        type_tag: impl Into<String>,
        construct: impl Fn(&Context, &Value, SerialId) -> Result<ObjectRef, VariantError> + 'static,
    ) -> &mut Self {
        self.constructors
            .insert(type_tag.into(), Rc::new(construct));
        self
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.constructors.contains_key(type_tag)
    }

    /// Build the object described by one `serialized_objects` entry.
    pub fn construct(&self, ctx: &Context, node: &Value) -> Result<(Uuid, ObjectRef), VariantError> {
        let tag = node.get_attr(&Value::from(TYPE_KEY))?;
        let tag = tag
            .as_str()
            .map_err(|_| VariantError::Deserialization(format!("serialized object has no {TYPE_KEY} tag")))?;
        let uuid = node_uuid(node)?;
        let construct = self.constructors.get(tag).ok_or_else(|| {
            VariantError::Deserialization(format!("no constructor registered for object type '{tag}'"))
        })?;

        let mut payload = node.clone();
        payload.remove_attr(&Value::from(TYPE_KEY))?;
        payload.remove_attr(&Value::from(UUID_KEY))?;
        let object = construct(ctx, &payload, SerialId::from_uuid(uuid))?;
        Ok((uuid, object))
    }
}

fn node_uuid(node: &Value) -> Result<Uuid, VariantError> {
    let text = node.get_attr(&Value::from(UUID_KEY))?;
    let text = text
        .as_str()
        .map_err(|_| VariantError::Deserialization(format!("serialized object has no {UUID_KEY}")))?;
    parse_uuid(text)
}

pub(crate) fn parse_uuid(text: &str) -> Result<Uuid, VariantError> {
    Uuid::parse_str(text)
        .map_err(|e| VariantError::Deserialization(format!("malformed object id '{text}': {e}")))
}

/// The reference written in place of a serializable object.
pub fn reference_text(uuid: Uuid) -> String {
    format!("deserialize('{uuid}')")
}

struct CollectedObject {
    uuid: Uuid,
    tag: String,
    payload: Value,
}

/// Collects the serializable objects reachable from written documents.
///
/// Objects recorded by an enclosing scope are not collected again.
pub struct SerializationScope<'p> {
    parent: Option<&'p SerializationScope<'p>>,
    recorded: RefCell<HashSet<Uuid>>,
    objects: RefCell<Vec<CollectedObject>>,
    already_known: RefCell<HashSet<Uuid>>,
}

impl SerializationScope<'static> {
    pub fn new() -> Self {
        SerializationScope {
            parent: None,
            recorded: RefCell::new(HashSet::new()),
            objects: RefCell::new(Vec::new()),
            already_known: RefCell::new(HashSet::new()),
        }
    }
}

impl Default for SerializationScope<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'p> SerializationScope<'p> {
    pub fn nested(&self) -> SerializationScope<'_> {
        SerializationScope {
            parent: Some(self),
            recorded: RefCell::new(HashSet::new()),
            objects: RefCell::new(Vec::new()),
            already_known: RefCell::new(HashSet::new()),
        }
    }

    /// Has this scope or an enclosing one already taken this object?
    pub fn is_recorded(&self, uuid: Uuid) -> bool {
        self.recorded.borrow().contains(&uuid) || self.parent.is_some_and(|p| p.is_recorded(uuid))
    }

    pub fn object_count(&self) -> usize {
        self.objects.borrow().len()
    }

    /// Walk `value` and take every serializable object not yet recorded,
    /// including objects reachable only through other objects' payloads.
    pub fn collect(&self, ctx: &Context, value: &Value) -> Result<(), VariantError> {
        let mut seen_maps = HashSet::new();
        self.visit(ctx, value, &mut seen_maps)?;
        tracing::debug!(objects = self.object_count(), "serialization scope collected objects");
        Ok(())
    }

    fn visit(
        &self,
        ctx: &Context,
        value: &Value,
        seen_maps: &mut HashSet<usize>,
    ) -> Result<(), VariantError> {
        match value {
            Value::List(items) => {
                for item in items.iter() {
                    self.visit(ctx, item, seen_maps)?;
                }
            }
            Value::Map(map) => {
                if !seen_maps.insert(Rc::as_ptr(map) as usize) {
                    return Ok(());
                }
                // A map carrying an id is an object already written inline.
                if let Some(id) = map.get(&Value::from(UUID_KEY)) {
                    if let Ok(uuid) = id.as_str().map(Uuid::parse_str) {
                        if let Ok(uuid) = uuid {
                            self.already_known.borrow_mut().insert(uuid);
                        }
                    }
                }
                let entries: Vec<(Value, Value)> = map
                    .entries()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (k, v) in &entries {
                    self.visit(ctx, k, seen_maps)?;
                    self.visit(ctx, v, seen_maps)?;
                }
            }
            Value::Object(obj) => self.visit_object(ctx, obj, seen_maps)?,
            Value::ObjectLoading(loading) => {
                if let Some(resolved) = loading.resolved() {
                    self.visit(ctx, resolved, seen_maps)?;
                }
            }
            Value::Delayed(delayed) => {
                let forced = delayed.force(ctx)?.clone();
                self.visit(ctx, &forced, seen_maps)?;
            }
            Value::Weak(_) => {
                if let Value::Object(obj) = value.strengthen() {
                    self.visit_object(ctx, &obj, seen_maps)?;
                }
            }
            Value::Function(f) => {
                for arg in f.bound_args() {
                    self.visit(ctx, arg, seen_maps)?;
                }
                if let Some(closure) = f.closure() {
                    self.visit_object(ctx, closure, seen_maps)?;
                }
            }
            Value::MultiFunction(multi) => {
                for member in multi.members() {
                    self.visit(ctx, member, seen_maps)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn visit_object(
        &self,
        ctx: &Context,
        obj: &ObjectRef,
        seen_maps: &mut HashSet<usize>,
    ) -> Result<(), VariantError> {
        let Some(serializable) = obj.serializable() else {
            return Ok(());
        };
        let uuid = serializable.serial_id().get();
        if self.is_recorded(uuid) {
            return Ok(());
        }
        self.recorded.borrow_mut().insert(uuid);
        let payload = serializable.serialize(ctx)?;
        if !payload.is_map() {
            return Err(VariantError::Serialization(format!(
                "{} objects must serialize to a map, got {}",
                serializable.type_tag(),
                payload.type_name()
            )));
        }
        self.objects.borrow_mut().push(CollectedObject {
            uuid,
            tag: serializable.type_tag().to_string(),
            payload: payload.clone(),
        });
        self.visit(ctx, &payload, seen_maps)
    }

    /// The collected objects as payload maps tagged with `@type` and `_uuid`.
    pub fn write_objects(&self) -> Result<Value, VariantError> {
        let known = self.already_known.borrow();
        let mut nodes = Vec::new();
        for obj in self.objects.borrow().iter() {
            if known.contains(&obj.uuid) {
                continue;
            }
            let node = obj
                .payload
                .with_attr(Value::from(TYPE_KEY), Value::from(obj.tag.as_str()))?
                .with_attr(Value::from(UUID_KEY), Value::from(obj.uuid.to_string()))?;
            nodes.push(node);
        }
        Ok(Value::list(nodes))
    }

    /// Write `value` as a document. When objects were collected, they go
    /// into a `serialized_objects` list and a non-map root is wrapped under
    /// `__serialized_doc`; otherwise the value is written as is.
    pub fn serialize_doc(
        &self,
        ctx: &Context,
        value: &Value,
        options: &WriteOptions,
    ) -> Result<String, VariantError> {
        let doc = if value.is_map() {
            value.clone()
        } else {
            Value::empty_map().with_attr(Value::from(SERIALIZED_DOC_KEY), value.clone())?
        };
        self.collect(ctx, &doc)?;
        if self.object_count() == 0 {
            return write_json(ctx, value, options);
        }
        let doc = doc.with_attr(Value::from(SERIALIZED_OBJECTS_KEY), self.write_objects()?)?;
        write_json(ctx, &doc, options)
    }
}

pub fn serialize_doc_with_objects(
    ctx: &Context,
    value: &Value,
    options: &WriteOptions,
) -> Result<String, VariantError> {
    SerializationScope::new().serialize_doc(ctx, value, options)
}

/// Tracks object references while a document is read.
///
/// Registered objects live at the outermost scope. References that a scope
/// cannot resolve when it finishes are handed to its parent; the outermost
/// scope reports them as a `Deserialization` error.
pub struct ReadScope<'p> {
    parent: Option<&'p ReadScope<'p>>,
    registered: RefCell<HashMap<Uuid, ObjectRef>>,
    pending: RefCell<HashMap<Uuid, Vec<Rc<LoadingStore>>>>,
    deferred: RefCell<Vec<Value>>,
}

impl ReadScope<'static> {
    pub fn new() -> Self {
        ReadScope {
            parent: None,
            registered: RefCell::new(HashMap::new()),
            pending: RefCell::new(HashMap::new()),
            deferred: RefCell::new(Vec::new()),
        }
    }
}

impl Default for ReadScope<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'p> ReadScope<'p> {
    pub fn nested(&self) -> ReadScope<'_> {
        ReadScope {
            parent: Some(self),
            registered: RefCell::new(HashMap::new()),
            pending: RefCell::new(HashMap::new()),
            deferred: RefCell::new(Vec::new()),
        }
    }

    fn root(&self) -> &ReadScope<'p> {
        match self.parent {
            Some(parent) => parent.root(),
            None => self,
        }
    }

    pub fn register(&self, uuid: Uuid, object: ObjectRef) {
        self.root().registered.borrow_mut().insert(uuid, object);
    }

    pub fn lookup(&self, uuid: Uuid) -> Option<ObjectRef> {
        self.root().registered.borrow().get(&uuid).cloned()
    }

    /// The object for `uuid` if already registered, else a placeholder shared
    /// by every reference to `uuid` made in this scope.
    pub fn reference(&self, uuid: Uuid) -> Value {
        if let Some(object) = self.lookup(uuid) {
            return Value::Object(object);
        }
        let mut pending = self.pending.borrow_mut();
        let stores = pending.entry(uuid).or_default();
        if stores.is_empty() {
            stores.push(Rc::new(LoadingStore::new(uuid)));
        }
        Value::ObjectLoading(Rc::clone(&stores[0]))
    }

    /// Force this delayed value once every reference has resolved.
    pub fn defer(&self, value: Value) {
        self.deferred.borrow_mut().push(value);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Fill this scope's placeholders from the registry, then force deferred
    /// values. Unresolved references move to the parent scope.
    pub fn finish(self, ctx: &Context) -> Result<(), VariantError> {
        let pending = self.pending.take();
        let deferred = self.deferred.take();
        let mut unresolved: HashMap<Uuid, Vec<Rc<LoadingStore>>> = HashMap::new();
        let mut resolved = 0usize;
        for (uuid, stores) in pending {
            match self.lookup(uuid) {
                Some(object) => {
                    for store in &stores {
                        store.resolve(Rc::clone(&object));
                    }
                    resolved += stores.len();
                }
                None => {
                    unresolved.insert(uuid, stores);
                }
            }
        }
        tracing::debug!(resolved, unresolved = unresolved.len(), "read scope finished");

        if unresolved.is_empty() {
            for value in &deferred {
                value.force(ctx)?;
            }
            return Ok(());
        }

        match self.parent {
            Some(parent) => {
                let mut parent_pending = parent.pending.borrow_mut();
                for (uuid, stores) in unresolved {
                    parent_pending.entry(uuid).or_default().extend(stores);
                }
                parent.deferred.borrow_mut().extend(deferred);
                Ok(())
            }
            None => {
                let mut ids: Vec<String> = unresolved.keys().map(Uuid::to_string).collect();
                ids.sort();
                tracing::warn!(count = ids.len(), "unresolved object references");
                Err(VariantError::Deserialization(format!(
                    "unresolved reference to object {}",
                    ids.join(", ")
                )))
            }
        }
    }

    /// Read a document, construct its `serialized_objects` and register them.
    /// References resolve when the scope finishes.
    pub fn load_doc(
        &self,
        ctx: &Context,
        reader: Reader<'_>,
        text: &str,
        registry: &ObjectRegistry,
    ) -> Result<Value, VariantError> {
        let mut doc = reader.scope(self).read(ctx, text)?;
        let objects_key = Value::from(SERIALIZED_OBJECTS_KEY);
        if doc.is_map() && doc.has_key(&objects_key) {
            ctx.check_trust(Trust::OBJECTS, "constructing serialized objects")?;
            let nodes = doc.remove_attr(&objects_key)?;
            for node in nodes.as_slice()? {
                let (uuid, object) = registry.construct(ctx, node)?;
                self.register(uuid, object);
            }
            tracing::debug!(objects = nodes.len()?, "registered serialized objects");
        }
        let doc_key = Value::from(SERIALIZED_DOC_KEY);
        if doc.is_map() && doc.has_key(&doc_key) {
            return doc.get_attr(&doc_key);
        }
        Ok(doc)
    }
}

pub fn deserialize_doc_with_objects(
    ctx: &Context,
    text: &str,
    registry: &ObjectRegistry,
) -> Result<Value, VariantError> {
    let scope = ReadScope::new();
    let doc = scope.load_doc(ctx, Reader::new(), text, registry)?;
    scope.finish(ctx)?;
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use varia_core::{HostObject, Serializable};

    /// A node with a name and an optional link, enough to build cycles.
    struct Node {
        id: SerialId,
        name: String,
        link: RefCell<Value>,
    }

    impl HostObject for Node {
        fn type_name(&self) -> &str {
            "node"
        }

        fn query(&self, _ctx: &Context, name: &str) -> Result<Value, VariantError> {
            Ok(match name {
                "name" => Value::from(self.name.as_str()),
                "link" => self.link.borrow().clone(),
                _ => Value::Null,
            })
        }

        fn mutate(&self, _ctx: &Context, name: &str, value: Value) -> Result<(), VariantError> {
            match name {
                "link" => {
                    *self.link.borrow_mut() = value;
                    Ok(())
                }
                other => Err(VariantError::eval(format!("node has no field '{other}'"))),
            }
        }

        fn serializable(&self) -> Option<&dyn Serializable> {
            Some(self)
        }
    }

    impl Serializable for Node {
        fn serial_id(&self) -> &SerialId {
            &self.id
        }

        fn type_tag(&self) -> &str {
            "node"
        }

        fn serialize(&self, _ctx: &Context) -> Result<Value, VariantError> {
            let mut m = std::collections::BTreeMap::new();
            m.insert(Value::from("name"), Value::from(self.name.as_str()));
            m.insert(Value::from("link"), self.link.borrow().clone());
            Ok(Value::from(m))
        }
    }

    fn node(name: &str) -> Rc<Node> {
        Rc::new(Node {
            id: SerialId::new(),
            name: name.to_string(),
            link: RefCell::new(Value::Null),
        })
    }

    fn registry() -> ObjectRegistry {
        let mut reg = ObjectRegistry::new();
        reg.register("node", |_ctx, payload, id| {
            let obj: ObjectRef = Rc::new(Node {
                id,
                name: payload.get_attr(&Value::from("name"))?.as_str()?.to_string(),
                link: RefCell::new(payload.get_attr(&Value::from("link"))?),
            });
            Ok(obj)
        });
        reg
    }

    #[test]
    fn documents_without_objects_are_written_plainly() {
        let ctx = Context::new();
        let text =
            serialize_doc_with_objects(&ctx, &Value::Int(3), &WriteOptions::default()).unwrap();
        assert_eq!(text, "3");
    }

    #[test]
    fn aliased_objects_are_written_once() {
        let ctx = Context::new();
        let shared: ObjectRef = node("shared");
        let doc: Value = vec![Value::Object(shared.clone()), Value::Object(shared)].into();
        let text = serialize_doc_with_objects(&ctx, &doc, &WriteOptions::default()).unwrap();
        assert_eq!(text.matches("\"@type\"").count(), 1);
        assert!(text.contains(SERIALIZED_DOC_KEY));
        assert_eq!(text.matches("deserialize(").count(), 2);
    }

    #[test]
    fn nested_scopes_skip_recorded_objects() {
        let ctx = Context::new();
        let a: ObjectRef = node("a");
        let outer = SerializationScope::new();
        outer.collect(&ctx, &Value::Object(a.clone())).unwrap();
        let inner = outer.nested();
        inner.collect(&ctx, &Value::Object(a)).unwrap();
        assert_eq!(outer.object_count(), 1);
        assert_eq!(inner.object_count(), 0);
    }

    #[test]
    fn cycles_round_trip_as_shared_identities() {
        let ctx = Context::new();
        let a = node("a");
        let b = node("b");
        *a.link.borrow_mut() = Value::Object(b.clone());
        *b.link.borrow_mut() = Value::Object(a.clone());
        let root: Value = vec![Value::Object(a.clone()), Value::Object(b.clone())].into();
        let text = serialize_doc_with_objects(&ctx, &root, &WriteOptions::default()).unwrap();

        let back = deserialize_doc_with_objects(&ctx, &text, &registry()).unwrap();
        let first = back.index(0).unwrap().as_object().unwrap();
        let second = back.index(1).unwrap().as_object().unwrap();
        assert_eq!(first.query(&ctx, "name").unwrap(), Value::from("a"));
        let via_link = first.query(&ctx, "link").unwrap().as_object().unwrap();
        assert!(Rc::ptr_eq(&via_link, &second));
        let back_again = second.query(&ctx, "link").unwrap().as_object().unwrap();
        assert!(Rc::ptr_eq(&back_again, &first));

        // Break the reference cycles, original and read back, so the test
        // does not leak.
        *a.link.borrow_mut() = Value::Null;
        *b.link.borrow_mut() = Value::Null;
        first.mutate(&ctx, "link", Value::Null).unwrap();
        second.mutate(&ctx, "link", Value::Null).unwrap();
    }

    #[test]
    fn unresolved_references_fail_at_the_outermost_scope() {
        let ctx = Context::new();
        let text = "{a: \"@eval deserialize('6f1b8a52-3c34-4c55-8a53-2f6d1d3f0a11')\"}";
        let err = deserialize_doc_with_objects(&ctx, text, &registry()).unwrap_err();
        assert!(matches!(err, VariantError::Deserialization(_)));
        assert!(err.to_string().contains("6f1b8a52"));
    }

    #[test]
    fn nested_read_scope_hands_unresolved_references_up() {
        let ctx = Context::new();
        let uuid = Uuid::new_v4();
        let outer = ReadScope::new();
        let placeholder = {
            let inner = outer.nested();
            let v = inner.reference(uuid);
            inner.finish(&ctx).unwrap();
            v
        };
        assert_eq!(outer.pending_count(), 1);
        let obj: ObjectRef = node("late");
        outer.register(uuid, obj.clone());
        outer.finish(&ctx).unwrap();
        assert!(Rc::ptr_eq(&placeholder.as_object().unwrap(), &obj));
    }

    #[test]
    fn object_construction_needs_trust() {
        let ctx = Context::with_config(varia_core::RuntimeConfig::default().with_trust(Trust::NONE));
        let doc = "{serialized_objects: [], x: 1}";
        let err = deserialize_doc_with_objects(&ctx, doc, &registry()).unwrap_err();
        assert!(matches!(err, VariantError::Untrusted { .. }));
    }

    #[test]
    fn unknown_type_tags_are_rejected() {
        let ctx = Context::new();
        let doc = format!(
            "{{x: 1, serialized_objects: [{{\"@type\": \"ghost\", _uuid: \"{}\"}}]}}",
            Uuid::new_v4()
        );
        let err = deserialize_doc_with_objects(&ctx, &doc, &registry()).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
