#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use varia_core::{Context, HostObject, ObjectRef, SerialId, Serializable, Value, VariantError};
use varia_json::ObjectRegistry;

/// A serializable host object holding a mutable map of fields.
pub struct Node {
    id: SerialId,
    fields: RefCell<BTreeMap<String, Value>>,
}

impl Node {
    pub fn new(name: &str) -> Rc<Node> {
        Node::with_id(name, SerialId::new())
    }

    fn with_id(name: &str, id: SerialId) -> Rc<Node> {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::from(name));
        Rc::new(Node {
            id,
            fields: RefCell::new(fields),
        })
    }

    pub fn set(&self, field: &str, value: Value) {
        self.fields.borrow_mut().insert(field.to_string(), value);
    }
}

impl HostObject for Node {
    fn type_name(&self) -> &str {
        "node"
    }

    fn query(&self, _ctx: &Context, name: &str) -> Result<Value, VariantError> {
        Ok(self.fields.borrow().get(name).cloned().unwrap_or(Value::Null))
    }

    fn mutate(&self, _ctx: &Context, name: &str, value: Value) -> Result<(), VariantError> {
        self.set(name, value);
        Ok(())
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
        Ok(self
            .fields
            .borrow()
            .iter()
            .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
            .collect())
    }
}

pub fn registry() -> ObjectRegistry {
    let mut registry = ObjectRegistry::new();
    registry.register("node", |_ctx, payload, id| {
        let node = Node::with_id("", id);
        for (k, v) in payload.as_map()?.entries().iter() {
            node.set(k.as_str()?, v.clone());
        }
        let obj: ObjectRef = node;
        Ok(obj)
    });
    registry
}

pub fn name_of(ctx: &Context, value: &Value) -> String {
    let obj = value
        .as_object()
        .unwrap_or_else(|e| panic!("expected a node, got {value}: {e}"));
    obj.query(ctx, "name").unwrap().as_str().unwrap().to_string()
}

/// Break node cycles reachable from `value` so tests do not leak.
pub fn unlink_all(ctx: &Context, value: &Value) {
    let mut stack = vec![value.clone()];
    while let Some(v) = stack.pop() {
        match v.resolved() {
            Value::List(items) => stack.extend(items.iter().cloned()),
            Value::Object(obj) => {
                let links: Vec<Value> = ["next", "peer"]
                    .iter()
                    .map(|f| obj.query(ctx, f).unwrap())
                    .collect();
                let _ = obj.mutate(ctx, "next", Value::Null);
                let _ = obj.mutate(ctx, "peer", Value::Null);
                stack.extend(links.into_iter().filter(|l| !l.is_null()));
            }
            _ => {}
        }
    }
}
