//! Type constraints for parameters, return values and declared properties.
//!
//! A constraint's `Display` form is canonical: generic instantiations are
//! memoized under the joined text of their type arguments.

use std::fmt;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::context::Context;
use crate::error::VariantError;
use crate::object::{MapObject, ObjectRef};
use crate::value::Value;

pub type ObjectFactory = Rc<dyn Fn(&Context, &Value) -> Result<ObjectRef, VariantError>>;

/// A class-like host type that can be built from a map of its fields.
pub struct ClassType {
    pub name: String,
    construct: ObjectFactory,
}

impl ClassType {
    pub fn new(
        name: impl Into<String>,
        construct: impl Fn(&Context, &Value) -> Result<ObjectRef, VariantError> + 'static,
    ) -> Self {
        ClassType {
            name: name.into(),
            construct: Rc::new(construct),
        }
    }

    pub fn construct(&self, ctx: &Context, fields: &Value) -> Result<ObjectRef, VariantError> {
        (self.construct)(ctx, fields)
    }
}

/// A structural type: any object exposing the listed members conforms.
pub struct InterfaceType {
    pub name: String,
    pub members: Vec<(String, VariantType)>,
    adapt: ObjectFactory,
}

impl InterfaceType {
    /// An interface whose adapter wraps maps in a `MapObject`.
    pub fn new(name: impl Into<String>, members: Vec<(String, VariantType)>) -> Self {
        let name = name.into();
        let type_name = name.clone();
        InterfaceType {
            name,
            members,
            adapt: Rc::new(move |_ctx, value| {
                let obj: ObjectRef = Rc::new(MapObject::new(type_name.clone(), value.clone())?);
                Ok(obj)
            }),
        }
    }

    pub fn with_adapter(
        mut self,
        adapt: impl Fn(&Context, &Value) -> Result<ObjectRef, VariantError> + 'static,
    ) -> Self {
        self.adapt = Rc::new(adapt);
        self
    }

    pub fn adapt(&self, ctx: &Context, value: &Value) -> Result<ObjectRef, VariantError> {
        (self.adapt)(ctx, value)
    }

    fn accepts(&self, obj: &ObjectRef) -> bool {
        let inputs = obj.inputs();
        self.members
            .iter()
            .all(|(name, _)| inputs.iter().any(|p| &p.name == name))
    }
}

#[derive(Clone)]
pub enum VariantType {
    Any,
    Null,
    Bool,
    Int,
    Decimal,
    String,
    Enum,
    List(Box<VariantType>),
    Map(Box<VariantType>, Box<VariantType>),
    Function,
    /// A host object whose `type_name` is the given name; `"object"` accepts any.
    Object(String),
    /// Null, a command object, or a list of commands.
    Commands,
    Class(Rc<ClassType>),
    Interface(Rc<InterfaceType>),
    Union(Vec<VariantType>),
    /// An unbound type variable of a generic function.
    Generic(String),
}

impl VariantType {
    pub fn list_of(inner: VariantType) -> Self {
        VariantType::List(Box::new(inner))
    }

    pub fn map_of(key: VariantType, value: VariantType) -> Self {
        VariantType::Map(Box::new(key), Box::new(value))
    }

    pub fn union(members: Vec<VariantType>) -> Self {
        VariantType::Union(members)
    }

    /// Does `value` satisfy this constraint without any conversion?
    pub fn matches(&self, value: &Value) -> bool {
        let value = value.resolved();
        match self {
            VariantType::Any | VariantType::Generic(_) => true,
            VariantType::Null => value.is_null(),
            VariantType::Bool => matches!(value, Value::Bool(_)),
            VariantType::Int => matches!(value, Value::Int(_)),
            VariantType::Decimal => value.is_numeric(),
            VariantType::String => value.is_string(),
            VariantType::Enum => matches!(value, Value::Enum(_)),
            VariantType::List(inner) => match value {
                Value::List(items) => items.iter().all(|v| inner.matches(v)),
                _ => false,
            },
            VariantType::Map(k, v) => match value {
                Value::Map(m) => m
                    .entries()
                    .iter()
                    .all(|(key, val)| k.matches(key) && v.matches(val)),
                _ => false,
            },
            VariantType::Function => value.is_callable(),
            VariantType::Object(name) => match value {
                Value::Object(o) => name == "object" || o.type_name() == name,
                _ => false,
            },
            VariantType::Commands => match value {
                Value::Null => true,
                Value::Object(o) => o.is_command(),
                Value::List(items) => items.iter().all(|v| self.matches(v)),
                _ => false,
            },
            VariantType::Class(class) => match value {
                Value::Object(o) => o.type_name() == class.name,
                _ => false,
            },
            VariantType::Interface(iface) => match value {
                Value::Object(o) => iface.accepts(o),
                _ => false,
            },
            VariantType::Union(members) => members.iter().any(|t| t.matches(value)),
        }
    }

    /// Convert a mismatched argument: build a class from a map, or adapt to an interface.
    /// `Ok(None)` means no conversion applies.
    pub fn coerce(&self, ctx: &Context, value: &Value) -> Result<Option<Value>, VariantError> {
        match self {
            VariantType::Class(class) if value.is_map() => {
                Ok(Some(Value::Object(class.construct(ctx, value)?)))
            }
            VariantType::Interface(iface) if value.is_map() || value.is_object() => {
                let adapted = iface.adapt(ctx, value)?;
                if iface.accepts(&adapted) {
                    Ok(Some(Value::Object(adapted)))
                } else {
                    Ok(None)
                }
            }
            VariantType::Union(members) => {
                for member in members {
                    if let Some(v) = member.coerce(ctx, value)? {
                        return Ok(Some(v));
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Substitute bound type variables.
    pub fn map_generic_types(&self, mapping: &HashMap<String, VariantType>) -> VariantType {
        match self {
            VariantType::Generic(name) => mapping.get(name).cloned().unwrap_or_else(|| self.clone()),
            VariantType::List(inner) => VariantType::list_of(inner.map_generic_types(mapping)),
            VariantType::Map(k, v) => {
                VariantType::map_of(k.map_generic_types(mapping), v.map_generic_types(mapping))
            }
            VariantType::Union(members) => VariantType::Union(
                members.iter().map(|t| t.map_generic_types(mapping)).collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn is_generic(&self) -> bool {
        match self {
            VariantType::Generic(_) => true,
            VariantType::List(inner) => inner.is_generic(),
            VariantType::Map(k, v) => k.is_generic() || v.is_generic(),
            VariantType::Union(members) => members.iter().any(VariantType::is_generic),
            _ => false,
        }
    }

    /// The narrowest constraint describing a runtime value.
    pub fn of_value(value: &Value) -> VariantType {
        match value.resolved() {
            Value::Null => VariantType::Null,
            Value::Bool(_) => VariantType::Bool,
            Value::Int(_) => VariantType::Int,
            Value::Decimal(_) => VariantType::Decimal,
            Value::String(_) => VariantType::String,
            Value::Enum(_) => VariantType::Enum,
            Value::List(items) => {
                VariantType::list_of(common_type(items.iter().map(VariantType::of_value)))
            }
            Value::Map(m) => {
                let entries = m.entries();
                VariantType::map_of(
                    common_type(entries.keys().map(VariantType::of_value)),
                    common_type(entries.values().map(VariantType::of_value)),
                )
            }
            Value::Function(_) | Value::GenericFunction(_) | Value::MultiFunction(_) => {
                VariantType::Function
            }
            Value::Object(o) => VariantType::Object(o.type_name().to_string()),
            _ => VariantType::Any,
        }
    }
}

/// Collapse element types: one distinct type stays itself, several become a union.
fn common_type(types: impl Iterator<Item = VariantType>) -> VariantType {
    let mut distinct: Vec<VariantType> = Vec::new();
    for t in types {
        if !distinct.iter().any(|d| d.to_string() == t.to_string()) {
            distinct.push(t);
        }
    }
    match distinct.len() {
        0 => VariantType::Any,
        1 => distinct.remove(0),
        _ => VariantType::Union(distinct),
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantType::Any => f.write_str("any"),
            VariantType::Null => f.write_str("null"),
            VariantType::Bool => f.write_str("bool"),
            VariantType::Int => f.write_str("int"),
            VariantType::Decimal => f.write_str("decimal"),
            VariantType::String => f.write_str("string"),
            VariantType::Enum => f.write_str("enum"),
            VariantType::List(inner) => write!(f, "[{inner}]"),
            VariantType::Map(k, v) => write!(f, "{{{k} -> {v}}}"),
            VariantType::Function => f.write_str("function"),
            VariantType::Object(name) => f.write_str(name),
            VariantType::Commands => f.write_str("commands"),
            VariantType::Class(class) => write!(f, "class {}", class.name),
            VariantType::Interface(iface) => write!(f, "interface {}", iface.name),
            VariantType::Union(members) => {
                for (i, t) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "{t}")?;
                }
                Ok(())
            }
            VariantType::Generic(name) => f.write_str(name),
        }
    }
}

impl fmt::Debug for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VariantType({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Decimal;
    use std::collections::BTreeMap;

    #[test]
    fn decimal_accepts_int() {
        assert!(VariantType::Decimal.matches(&Value::Int(3)));
        assert!(VariantType::Decimal.matches(&Value::Decimal(Decimal::ONE)));
        assert!(!VariantType::Int.matches(&Value::Decimal(Decimal::ONE)));
    }

    #[test]
    fn containers_check_elements() {
        let ints: Value = vec![Value::Int(1), Value::Int(2)].into();
        let mixed: Value = vec![Value::Int(1), Value::from("x")].into();
        let t = VariantType::list_of(VariantType::Int);
        assert!(t.matches(&ints));
        assert!(!t.matches(&mixed));
        assert!(VariantType::list_of(VariantType::union(vec![
            VariantType::Int,
            VariantType::String
        ]))
        .matches(&mixed));
    }

    #[test]
    fn display_is_canonical() {
        let t = VariantType::map_of(
            VariantType::String,
            VariantType::list_of(VariantType::union(vec![VariantType::Int, VariantType::Null])),
        );
        assert_eq!(t.to_string(), "{string -> [int|null]}");
    }

    #[test]
    fn generic_substitution() {
        let t = VariantType::list_of(VariantType::Generic("T".into()));
        let mut mapping = HashMap::new();
        mapping.insert("T".to_string(), VariantType::Int);
        assert!(t.is_generic());
        let bound = t.map_generic_types(&mapping);
        assert!(!bound.is_generic());
        assert_eq!(bound.to_string(), "[int]");
    }

    #[test]
    fn commands_accept_null_and_lists() {
        assert!(VariantType::Commands.matches(&Value::Null));
        assert!(VariantType::Commands.matches(&Value::list(vec![])));
        assert!(!VariantType::Commands.matches(&Value::Int(1)));
    }

    #[test]
    fn interface_adapts_maps() {
        let ctx = Context::new();
        let iface = Rc::new(InterfaceType::new(
            "named",
            vec![("name".to_string(), VariantType::String)],
        ));
        let t = VariantType::Interface(iface);
        let mut fields = BTreeMap::new();
        fields.insert(Value::from("name"), Value::from("lamp"));
        let map = Value::from(fields);
        assert!(!t.matches(&map));
        let adapted = t.coerce(&ctx, &map).unwrap().expect("adapted");
        assert!(t.matches(&adapted));
        assert!(t.coerce(&ctx, &Value::Int(1)).unwrap().is_none());
    }

    #[test]
    fn of_value_describes_runtime_types() {
        let v: Value = vec![Value::Int(1), Value::from("a")].into();
        assert_eq!(VariantType::of_value(&v).to_string(), "[int|string]");
        assert_eq!(VariantType::of_value(&Value::list(vec![])).to_string(), "[any]");
    }
}
