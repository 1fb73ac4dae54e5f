use std::cell::OnceCell;
use std::cmp::Ordering;
use std::rc::Rc;

use uuid::Uuid;

use crate::context::Context;
use crate::error::VariantError;
use crate::types::VariantType;
use crate::value::Value;

pub type ObjectRef = Rc<dyn HostObject>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// A declared property, as listed by `HostObject::inputs`.
#[derive(Debug, Clone)]
pub struct PropertyInfo {
    pub name: String,
    pub access: Access,
    pub ty: Option<VariantType>,
}

impl PropertyInfo {
    pub fn new(name: impl Into<String>, access: Access) -> Self {
        PropertyInfo {
            name: name.into(),
            access,
            ty: None,
        }
    }

    pub fn typed(mut self, ty: VariantType) -> Self {
        self.ty = Some(ty);
        self
    }
}

/// The contract a host object offers to values and to the evaluator.
///
/// Reading a property that is not declared yields `Value::Null`. Everything
/// else a host object rejects is reported through its own `Err` return.
pub trait HostObject {
    fn type_name(&self) -> &str {
        "object"
    }

    fn query(&self, ctx: &Context, name: &str) -> Result<Value, VariantError>;

    fn mutate(&self, _ctx: &Context, name: &str, _value: Value) -> Result<(), VariantError> {
        Err(VariantError::eval(format!(
            "{} does not allow setting '{name}'",
            self.type_name()
        )))
    }

    /// Slot-indexed read for objects with a fixed property layout.
    fn query_slot(&self, ctx: &Context, slot: usize) -> Result<Value, VariantError> {
        match self.inputs().get(slot) {
            Some(prop) => self.query(ctx, &prop.name),
            None => Ok(Value::Null),
        }
    }

    fn mutate_slot(&self, ctx: &Context, slot: usize, value: Value) -> Result<(), VariantError> {
        match self.inputs().get(slot) {
            Some(prop) => self.mutate(ctx, &prop.name, value),
            None => Err(VariantError::eval(format!(
                "{} has no slot {slot}",
                self.type_name()
            ))),
        }
    }

    fn inputs(&self) -> Vec<PropertyInfo> {
        Vec::new()
    }

    /// Structural equality with another object. Identity is checked before this is called.
    fn equals(&self, _other: &dyn HostObject) -> bool {
        false
    }

    fn less(&self, _other: &dyn HostObject) -> bool {
        false
    }

    fn serializable(&self) -> Option<&dyn Serializable> {
        None
    }

    fn is_command(&self) -> bool {
        false
    }

    /// Run this command against `target`. Only called when `is_command` is true.
    fn execute(&self, _ctx: &Context, _target: &ObjectRef) -> Result<(), VariantError> {
        Ok(())
    }

    /// A copy of this object with `changes` applied, for `object + map`.
    fn clone_with(&self, _ctx: &Context, _changes: &Value) -> Result<Option<ObjectRef>, VariantError> {
        Ok(None)
    }
}

/// Opt-in hook for objects that can be written out-of-line by a serialization scope.
pub trait Serializable {
    fn serial_id(&self) -> &SerialId;

    /// Registry key used to pick a constructor when reading the object back.
    fn type_tag(&self) -> &str;

    /// The object's payload, normally a map. Nested objects appear as values.
    fn serialize(&self, ctx: &Context) -> Result<Value, VariantError>;
}

/// A per-object UUID, assigned on first use and stable afterwards.
#[derive(Debug, Default)]
pub struct SerialId(OnceCell<Uuid>);

impl SerialId {
    pub fn new() -> Self {
        SerialId(OnceCell::new())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(uuid);
        SerialId(cell)
    }

    pub fn get(&self) -> Uuid {
        *self.0.get_or_init(Uuid::new_v4)
    }
}

fn addr(obj: &ObjectRef) -> usize {
    Rc::as_ptr(obj) as *const () as usize
}

pub fn object_eq(a: &ObjectRef, b: &ObjectRef) -> bool {
    Rc::ptr_eq(a, b) || a.equals(&**b)
}

/// Total order over objects: `less`, then `equals`, falling back to identity.
pub fn object_cmp(a: &ObjectRef, b: &ObjectRef) -> Ordering {
    if object_eq(a, b) {
        Ordering::Equal
    } else if a.less(&**b) {
        Ordering::Less
    } else if b.less(&**a) {
        Ordering::Greater
    } else {
        addr(a).cmp(&addr(b))
    }
}

/// A host object whose properties are the string keys of a shared map.
///
/// Used as the default adapter when an interface-typed parameter receives a map.
#[derive(Debug)]
pub struct MapObject {
    name: String,
    map: Value,
}

impl MapObject {
    pub fn new(name: impl Into<String>, map: Value) -> Result<Self, VariantError> {
        if !map.is_map() {
            return Err(VariantError::type_mismatch("map", &map));
        }
        Ok(MapObject {
            name: name.into(),
            map,
        })
    }

    pub fn map(&self) -> &Value {
        &self.map
    }
}

impl HostObject for MapObject {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn query(&self, _ctx: &Context, name: &str) -> Result<Value, VariantError> {
        self.map.get_attr(&Value::from(name))
    }

    fn mutate(&self, _ctx: &Context, name: &str, value: Value) -> Result<(), VariantError> {
        self.map.add_attr_mutation(Value::from(name), value)
    }

    fn inputs(&self) -> Vec<PropertyInfo> {
        self.map
            .keys()
            .unwrap_or_default()
            .iter()
            .filter_map(|k| k.as_str().ok().map(|s| PropertyInfo::new(s, Access::ReadWrite)))
            .collect()
    }
}
