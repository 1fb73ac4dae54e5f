use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use lasso::{Rodeo, Spur};

use crate::context::Context;
use crate::decimal::Decimal;
use crate::error::{SourceLocation, VariantError};
use crate::function::{FunctionStore, GenericFunctionStore, MultiFunctionStore};
use crate::object::{object_cmp, HostObject, ObjectRef};
use crate::store::{DelayedStore, ListStore, LoadingStore, MapStore, StrStore, WeakStore};

thread_local! {
    static INTERNER: RefCell<Rodeo> = RefCell::new(Rodeo::default());
}

/// Intern a string, returning a Spur key.
pub fn intern(s: &str) -> Spur {
    INTERNER.with(|r| r.borrow_mut().get_or_intern(s))
}

/// Resolve a Spur key back to a String.
pub fn resolve(spur: Spur) -> String {
    INTERNER.with(|r| r.borrow().resolve(&spur).to_string())
}

/// Compare two Spurs by their resolved string content (lexicographic).
pub fn compare_spurs(a: Spur, b: Spur) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    INTERNER.with(|r| {
        let interner = r.borrow();
        interner.resolve(&a).cmp(interner.resolve(&b))
    })
}

/// Value kinds, declared in their cross-kind sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Null,
    Bool,
    Int,
    Decimal,
    Object,
    ObjectLoading,
    List,
    String,
    Map,
    Function,
    GenericFunction,
    MultiFunction,
    Delayed,
    Weak,
    Enum,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Decimal => "decimal",
            Kind::Object => "object",
            Kind::ObjectLoading => "object_loading",
            Kind::List => "list",
            Kind::String => "string",
            Kind::Map => "map",
            Kind::Function => "function",
            Kind::GenericFunction => "generic",
            Kind::MultiFunction => "multi_function",
            Kind::Delayed => "delayed",
            Kind::Weak => "weak",
            Kind::Enum => "enum",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The dynamic value. Scalars are inline; every other kind holds one `Rc` to its store.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Decimal(Decimal),
    Enum(Spur),
    List(Rc<ListStore>),
    String(Rc<StrStore>),
    Map(Rc<MapStore>),
    Function(Rc<FunctionStore>),
    GenericFunction(Rc<GenericFunctionStore>),
    MultiFunction(Rc<MultiFunctionStore>),
    Object(ObjectRef),
    ObjectLoading(Rc<LoadingStore>),
    Delayed(Rc<DelayedStore>),
    Weak(Rc<WeakStore>),
}

const DEBUG_DEPTH_LIMIT: usize = 32;

impl Value {
    // -- constructors --

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(ListStore::new(items)))
    }

    pub fn string(s: &str) -> Value {
        Value::String(Rc::new(StrStore::new(s)))
    }

    pub fn map(entries: BTreeMap<Value, Value>) -> Value {
        Value::Map(Rc::new(MapStore::new(entries)))
    }

    pub fn empty_map() -> Value {
        Value::map(BTreeMap::new())
    }

    /// A translated string that writes back as its untranslated key.
    pub fn translated(original: &str, translation: &str) -> Value {
        Value::String(Rc::new(StrStore::translated(original, translation)))
    }

    pub fn enumeration(name: &str) -> Value {
        Value::Enum(intern(name))
    }

    pub fn object<T: HostObject + 'static>(obj: T) -> Value {
        Value::Object(Rc::new(obj))
    }

    pub fn loading(store: Rc<LoadingStore>) -> Value {
        Value::ObjectLoading(store)
    }

    pub fn delayed(store: DelayedStore) -> Value {
        Value::Delayed(Rc::new(store))
    }

    // -- kind inspection --

    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Decimal(_) => Kind::Decimal,
            Value::Enum(_) => Kind::Enum,
            Value::List(_) => Kind::List,
            Value::String(_) => Kind::String,
            Value::Map(_) => Kind::Map,
            Value::Function(_) => Kind::Function,
            Value::GenericFunction(_) => Kind::GenericFunction,
            Value::MultiFunction(_) => Kind::MultiFunction,
            Value::Object(_) => Kind::Object,
            Value::ObjectLoading(_) => Kind::ObjectLoading,
            Value::Delayed(_) => Kind::Delayed,
            Value::Weak(_) => Kind::Weak,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.resolved().kind().name()
    }

    /// Look through forced delayed values and resolved loading placeholders.
    ///
    /// An unforced delayed value is returned as is, so accessors that take no
    /// context see kind `delayed` until [`Value::force`] has run.
    pub fn resolved(&self) -> &Value {
        match self {
            Value::Delayed(d) => match d.forced() {
                Some(v) => v.resolved(),
                None => self,
            },
            Value::ObjectLoading(l) => l.resolved().unwrap_or(self),
            _ => self,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.resolved(), Value::Null)
    }

    pub fn is_int(&self) -> bool {
        matches!(self.resolved(), Value::Int(_))
    }

    pub fn is_decimal(&self) -> bool {
        matches!(self.resolved(), Value::Decimal(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.resolved(), Value::Int(_) | Value::Decimal(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self.resolved(), Value::String(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self.resolved(), Value::List(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self.resolved(), Value::Map(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self.resolved(), Value::Object(_))
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self.resolved(),
            Value::Function(_) | Value::GenericFunction(_) | Value::MultiFunction(_)
        )
    }

    // -- accessors --

    /// Truthiness: null, false, zero and empty containers are false.
    pub fn as_bool(&self) -> bool {
        match self.resolved() {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Decimal(d) => !d.is_zero(),
            Value::List(l) => !l.is_empty(),
            Value::String(s) => !s.as_str().is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Weak(w) => w.upgrade().is_some(),
            _ => true,
        }
    }

    pub fn as_int(&self) -> Result<i32, VariantError> {
        match self.resolved() {
            Value::Int(n) => Ok(*n),
            Value::Bool(b) => Ok(i32::from(*b)),
            other => Err(VariantError::type_mismatch("int", other)),
        }
    }

    pub fn as_decimal(&self) -> Result<Decimal, VariantError> {
        match self.resolved() {
            Value::Decimal(d) => Ok(*d),
            Value::Int(n) => Ok(Decimal::from_int(*n)),
            Value::Bool(b) => Ok(Decimal::from_int(i32::from(*b))),
            other => Err(VariantError::type_mismatch("decimal", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str, VariantError> {
        match self.resolved() {
            Value::String(s) => Ok(s.as_str()),
            other => Err(VariantError::type_mismatch("string", other)),
        }
    }

    pub fn as_string_store(&self) -> Result<&StrStore, VariantError> {
        match self.resolved() {
            Value::String(s) => Ok(s),
            other => Err(VariantError::type_mismatch("string", other)),
        }
    }

    pub fn as_list(&self) -> Result<&ListStore, VariantError> {
        match self.resolved() {
            Value::List(l) => Ok(l),
            other => Err(VariantError::type_mismatch("list", other)),
        }
    }

    pub fn as_slice(&self) -> Result<&[Value], VariantError> {
        self.as_list().map(|l| l.as_slice())
    }

    pub fn as_map(&self) -> Result<&MapStore, VariantError> {
        match self.resolved() {
            Value::Map(m) => Ok(m),
            other => Err(VariantError::type_mismatch("map", other)),
        }
    }

    pub fn as_object(&self) -> Result<ObjectRef, VariantError> {
        match self.resolved() {
            Value::Object(o) => Ok(Rc::clone(o)),
            other => Err(VariantError::type_mismatch("object", other)),
        }
    }

    pub fn as_enum(&self) -> Result<String, VariantError> {
        match self.resolved() {
            Value::Enum(e) => Ok(resolve(*e)),
            other => Err(VariantError::type_mismatch("enum", other)),
        }
    }

    /// Null becomes empty, a list its items, anything else a single element.
    pub fn to_list(&self) -> Vec<Value> {
        match self.resolved() {
            Value::Null => Vec::new(),
            Value::List(l) => l.as_slice().to_vec(),
            other => vec![other.clone()],
        }
    }

    pub fn as_int_list(&self) -> Result<Vec<i32>, VariantError> {
        self.as_slice()?.iter().map(Value::as_int).collect()
    }

    pub fn as_decimal_list(&self) -> Result<Vec<Decimal>, VariantError> {
        self.as_slice()?.iter().map(Value::as_decimal).collect()
    }

    pub fn as_string_list(&self) -> Result<Vec<String>, VariantError> {
        self.as_slice()?
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// Like `as_string_list`, with null read as the empty list.
    pub fn as_string_list_optional(&self) -> Result<Vec<String>, VariantError> {
        if self.is_null() {
            return Ok(Vec::new());
        }
        self.as_string_list()
    }

    /// Element count of a list or map, or codepoint count of a string.
    pub fn len(&self) -> Result<usize, VariantError> {
        match self.resolved() {
            Value::List(l) => Ok(l.len()),
            Value::Map(m) => Ok(m.len()),
            Value::String(s) => Ok(s.char_count()),
            other => Err(VariantError::type_mismatch("list, map or string", other)),
        }
    }

    pub fn is_empty(&self) -> Result<bool, VariantError> {
        self.len().map(|n| n == 0)
    }

    // -- lists --

    pub fn index(&self, index: i64) -> Result<Value, VariantError> {
        let list = self.as_list()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| list.get(i))
            .cloned()
            .ok_or_else(|| VariantError::index(index, index.saturating_add(1), list.len()))
    }

    /// A view over `[start, end)` that shares the parent's storage.
    pub fn slice(&self, start: i64, end: i64) -> Result<Value, VariantError> {
        let list = self.as_list()?;
        let (Ok(s), Ok(e)) = (usize::try_from(start), usize::try_from(end)) else {
            return Err(VariantError::index(start, end, list.len()));
        };
        list.view(s, e)
            .map_err(|_| VariantError::index(start, end, list.len()))
            .map(|view| Value::List(Rc::new(view)))
    }

    /// Append to this value's private copy of the list.
    pub fn push(&mut self, item: Value) -> Result<(), VariantError> {
        match self {
            Value::List(store) => {
                Rc::make_mut(store).modify(|items| items.push(item));
                Ok(())
            }
            other => Err(VariantError::type_mismatch("list", other)),
        }
    }

    pub fn set_index(&mut self, index: i64, item: Value) -> Result<(), VariantError> {
        match self {
            Value::List(store) => {
                let size = store.len();
                let slot = usize::try_from(index).ok().filter(|i| *i < size);
                let Some(i) = slot else {
                    return Err(VariantError::index(index, index.saturating_add(1), size));
                };
                Rc::make_mut(store).modify(|items| items[i] = item);
                Ok(())
            }
            other => Err(VariantError::type_mismatch("list", other)),
        }
    }

    // -- maps --

    /// Map lookup. A missing key reads as null.
    pub fn get_attr(&self, key: &Value) -> Result<Value, VariantError> {
        Ok(self.as_map()?.get(key).unwrap_or(Value::Null))
    }

    /// True if the key is present with a non-null value.
    pub fn has_key(&self, key: &Value) -> bool {
        match self.resolved() {
            Value::Map(m) => m.get(key).is_some_and(|v| !v.is_null()),
            _ => false,
        }
    }

    pub fn keys(&self) -> Result<Vec<Value>, VariantError> {
        Ok(self.as_map()?.entries().keys().cloned().collect())
    }

    pub fn values(&self) -> Result<Vec<Value>, VariantError> {
        Ok(self.as_map()?.entries().values().cloned().collect())
    }

    /// Persistent insert: copies the store first if anyone else holds it.
    pub fn add_attr(&mut self, key: Value, value: Value) -> Result<(), VariantError> {
        match self {
            Value::Map(store) => {
                Rc::make_mut(store).entries_get_mut().insert(key, value);
                Ok(())
            }
            other => Err(VariantError::type_mismatch("map", other)),
        }
    }

    /// Persistent removal. Returns the removed value or null.
    pub fn remove_attr(&mut self, key: &Value) -> Result<Value, VariantError> {
        match self {
            Value::Map(store) => {
                if !store.entries().contains_key(key) {
                    return Ok(Value::Null);
                }
                Ok(Rc::make_mut(store)
                    .entries_get_mut()
                    .remove(key)
                    .unwrap_or(Value::Null))
            }
            other => Err(VariantError::type_mismatch("map", other)),
        }
    }

    /// Persistent insert returning the new map and leaving `self` untouched.
    pub fn with_attr(&self, key: Value, value: Value) -> Result<Value, VariantError> {
        let mut copy = self.clone();
        copy.add_attr(key, value)?;
        Ok(copy)
    }

    /// Shared insert: every holder of this map's store observes the change.
    pub fn add_attr_mutation(&self, key: Value, value: Value) -> Result<(), VariantError> {
        let map = self.as_map()?;
        if key.compares_shallowly() {
            map.entries_mut().insert(key, value);
            return Ok(());
        }
        // Ordering a composite key may read this map's own entries.
        let mut entries = map.entries().clone();
        entries.insert(key, value);
        *map.entries_mut() = entries;
        Ok(())
    }

    /// Shared removal. Returns the removed value or null.
    pub fn remove_attr_mutation(&self, key: &Value) -> Result<Value, VariantError> {
        let map = self.as_map()?;
        if key.compares_shallowly() {
            return Ok(map.entries_mut().remove(key).unwrap_or(Value::Null));
        }
        let mut entries = map.entries().clone();
        let removed = entries.remove(key);
        if removed.is_some() {
            *map.entries_mut() = entries;
        }
        Ok(removed.unwrap_or(Value::Null))
    }

    /// True for keys whose ordering never looks inside a container.
    fn compares_shallowly(&self) -> bool {
        matches!(
            self.resolved(),
            Value::Null
                | Value::Bool(_)
                | Value::Int(_)
                | Value::Decimal(_)
                | Value::String(_)
                | Value::Enum(_)
        )
    }

    // -- sharing and identity --

    /// Reference count of the backing store; 0 for inline scalars.
    pub fn refcount(&self) -> usize {
        match self {
            Value::List(s) => Rc::strong_count(s),
            Value::String(s) => Rc::strong_count(s),
            Value::Map(s) => Rc::strong_count(s),
            Value::Function(s) => Rc::strong_count(s),
            Value::GenericFunction(s) => Rc::strong_count(s),
            Value::MultiFunction(s) => Rc::strong_count(s),
            Value::Object(s) => Rc::strong_count(s),
            Value::ObjectLoading(s) => Rc::strong_count(s),
            Value::Delayed(s) => Rc::strong_count(s),
            Value::Weak(s) => Rc::strong_count(s),
            _ => 0,
        }
    }

    /// True if nothing else shares this value's store and no shared mutation has touched it.
    pub fn is_unmodified_single_reference(&self) -> bool {
        match self {
            Value::Map(m) => Rc::strong_count(m) == 1 && m.modcount() == 0,
            Value::List(l) => Rc::strong_count(l) == 1 && !l.items_shared(),
            other => other.refcount() <= 1,
        }
    }

    /// Give this value, and the lists and maps inside it, private stores.
    pub fn make_unique(&mut self) {
        match self {
            Value::List(store) => {
                Rc::make_mut(store).modify(|items| items.iter_mut().for_each(Value::make_unique));
            }
            Value::Map(store) => {
                let entries = Rc::make_mut(store).entries_get_mut();
                entries.values_mut().for_each(Value::make_unique);
            }
            Value::String(store) => {
                Rc::make_mut(store);
            }
            _ => {}
        }
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Value::List(s) => s.location.as_ref(),
            Value::Map(s) => s.location.as_ref(),
            Value::String(s) => s.location.as_ref(),
            _ => None,
        }
    }

    /// Attach a source location to a container value.
    pub fn with_location(mut self, location: SourceLocation) -> Value {
        match &mut self {
            Value::List(s) => Rc::make_mut(s).location = Some(location),
            Value::Map(s) => Rc::make_mut(s).location = Some(location),
            Value::String(s) => Rc::make_mut(s).location = Some(location),
            _ => {}
        }
        self
    }

    pub fn weaken(&self) -> Result<Value, VariantError> {
        match self.resolved() {
            Value::Object(o) => Ok(Value::Weak(Rc::new(WeakStore::new(o)))),
            Value::Weak(_) | Value::Null => Ok(self.clone()),
            other => Err(VariantError::type_mismatch("object", other)),
        }
    }

    /// The live object behind a weak value, or null once it is gone.
    pub fn strengthen(&self) -> Value {
        match self {
            Value::Weak(w) => w.upgrade().map(Value::Object).unwrap_or(Value::Null),
            other => other.clone(),
        }
    }

    /// Evaluate a delayed value (once) and return what it produced.
    pub fn force(&self, ctx: &Context) -> Result<Value, VariantError> {
        match self {
            Value::Delayed(d) => d.force(ctx)?.force(ctx),
            other => Ok(other.resolved().clone()),
        }
    }

    /// Run a command object, or each command in a list, against `target`.
    pub fn execute_commands(&self, ctx: &Context, target: &ObjectRef) -> Result<(), VariantError> {
        match self.force(ctx)? {
            Value::Null => Ok(()),
            Value::List(items) => items
                .iter()
                .try_for_each(|cmd| cmd.execute_commands(ctx, target)),
            Value::Object(obj) if obj.is_command() => obj.execute(ctx, target),
            other => Err(VariantError::type_mismatch("commands", &other)),
        }
    }

    // -- rendering --

    /// Diagnostic rendering: strings quoted, containers expanded.
    pub fn to_debug_string(&self) -> String {
        let mut out = String::new();
        self.write_debug(&mut out, 0);
        out
    }

    /// Human-facing text: a string is its own text, anything else its debug rendering.
    pub fn string_cast(&self) -> String {
        match self.resolved() {
            Value::String(s) => s.as_str().to_string(),
            other => other.to_debug_string(),
        }
    }

    fn write_debug(&self, out: &mut String, depth: usize) {
        if depth > DEBUG_DEPTH_LIMIT {
            out.push('…');
            return;
        }
        match self {
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int(n) => out.push_str(&n.to_string()),
            Value::Decimal(d) => out.push_str(&d.to_string()),
            Value::Enum(e) => {
                out.push_str("enum ");
                out.push_str(&resolve(*e));
            }
            Value::String(s) => {
                out.push('"');
                out.push_str(s.as_str());
                out.push('"');
            }
            Value::List(l) => {
                out.push('[');
                for (i, item) in l.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_debug(out, depth + 1);
                }
                out.push(']');
            }
            Value::Map(m) => {
                out.push('{');
                for (i, (k, v)) in m.entries().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_debug(out, depth + 1);
                    out.push_str(": ");
                    v.write_debug(out, depth + 1);
                }
                out.push('}');
            }
            Value::Function(f) => out.push_str(&format!("<function {}>", f.signature_text())),
            Value::GenericFunction(g) => out.push_str(&format!("<generic {}>", g.signature_text())),
            Value::MultiFunction(m) => {
                out.push_str(&format!("<multi_function {} overloads>", m.members().len()))
            }
            Value::Object(o) => out.push_str(&format!("<{}>", o.type_name())),
            Value::ObjectLoading(l) => match l.resolved() {
                Some(v) => v.write_debug(out, depth),
                None => out.push_str(&format!("<loading {}>", l.uuid())),
            },
            Value::Delayed(d) => match d.forced() {
                Some(v) => v.write_debug(out, depth),
                None => out.push_str(&format!("<delayed {}>", d.expression().text())),
            },
            Value::Weak(w) => match w.upgrade() {
                Some(o) => out.push_str(&format!("<weak {}>", o.type_name())),
                None => out.push_str("<weak (expired)>"),
            },
        }
    }
}

fn rc_addr<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as *const () as usize
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.resolved(), other.resolved());
        match (a, b) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            (Value::Decimal(x), Value::Decimal(y)) => x.cmp(y),
            (Value::Int(x), Value::Decimal(y)) => Decimal::from_int(*x).cmp(y),
            (Value::Decimal(x), Value::Int(y)) => x.cmp(&Decimal::from_int(*y)),
            (Value::Enum(x), Value::Enum(y)) => compare_spurs(*x, *y),
            (Value::List(x), Value::List(y)) => x.as_slice().cmp(y.as_slice()),
            (Value::String(x), Value::String(y)) => x.as_str().cmp(y.as_str()),
            (Value::Map(x), Value::Map(y)) => {
                if Rc::ptr_eq(x, y) {
                    Ordering::Equal
                } else {
                    x.entries().iter().cmp(y.entries().iter())
                }
            }
            (Value::Object(x), Value::Object(y)) => object_cmp(x, y),
            (Value::ObjectLoading(x), Value::ObjectLoading(y)) => x.uuid().cmp(&y.uuid()),
            (Value::Function(x), Value::Function(y)) => rc_addr(x).cmp(&rc_addr(y)),
            (Value::GenericFunction(x), Value::GenericFunction(y)) => rc_addr(x).cmp(&rc_addr(y)),
            (Value::MultiFunction(x), Value::MultiFunction(y)) => rc_addr(x).cmp(&rc_addr(y)),
            (Value::Delayed(x), Value::Delayed(y)) => rc_addr(x).cmp(&rc_addr(y)),
            (Value::Weak(x), Value::Weak(y)) => x.addr().cmp(&y.addr()),
            _ => a.kind().cmp(&b.kind()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_debug_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_cast())
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::new(StrStore::new(s)))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl From<BTreeMap<Value, Value>> for Value {
    fn from(entries: BTreeMap<Value, Value>) -> Self {
        Value::map(entries)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

impl From<FunctionStore> for Value {
    fn from(f: FunctionStore) -> Self {
        Value::Function(Rc::new(f))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Value::list(iter.into_iter().collect())
    }
}

impl FromIterator<(Value, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        Value::map(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(ns: &[i32]) -> Value {
        ns.iter().map(|n| Value::Int(*n)).collect()
    }

    fn map(pairs: &[(&str, i32)]) -> Value {
        pairs
            .iter()
            .map(|(k, v)| (Value::from(*k), Value::Int(*v)))
            .collect()
    }

    #[test]
    fn copies_move_exactly_one_count() {
        let v = ints(&[1, 2, 3]);
        assert_eq!(v.refcount(), 1);
        let copy = v.clone();
        assert_eq!(v.refcount(), 2);
        drop(copy);
        assert_eq!(v.refcount(), 1);
        assert_eq!(Value::Int(3).refcount(), 0);
    }

    #[test]
    fn cross_kind_order() {
        let ordered = [
            Value::Null,
            Value::Bool(true),
            Value::Int(100),
            Value::Decimal(Decimal::from_int(200)),
            ints(&[]),
            Value::from("a"),
            map(&[]),
            Value::enumeration("red"),
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{:?} < {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn ints_and_decimals_compare_numerically() {
        let half = Value::Decimal(Decimal::parse("0.5").unwrap());
        assert!(half < Value::Int(1));
        assert!(Value::Int(1) < Value::Decimal(Decimal::parse("1.5").unwrap()));
        assert_eq!(Value::Int(2), Value::Decimal(Decimal::from_int(2)));
    }

    #[test]
    fn accessors_report_type_mismatch() {
        let err = Value::from("x").as_int().unwrap_err();
        match err {
            VariantError::TypeMismatch { expected, got, .. } => {
                assert_eq!(expected, "int");
                assert_eq!(got, "string");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bool_and_int_coerce() {
        assert_eq!(Value::Bool(true).as_int().unwrap(), 1);
        assert!(Value::Int(2).as_bool());
        assert!(!Value::Int(0).as_bool());
        assert_eq!(Value::Int(3).as_decimal().unwrap(), Decimal::from_int(3));
    }

    #[test]
    fn slices_share_and_bound_check() {
        let list = ints(&[1, 2, 3, 4]);
        let view = list.slice(1, 3).unwrap();
        assert_eq!(view, ints(&[2, 3]));
        assert!(matches!(
            list.slice(3, 9),
            Err(VariantError::Index { start: 3, end: 9, size: 4 })
        ));
        assert!(matches!(list.index(4), Err(VariantError::Index { .. })));
        assert!(matches!(list.index(-1), Err(VariantError::Index { .. })));
    }

    #[test]
    fn persistent_add_is_private() {
        let original = map(&[("a", 1)]);
        let mut copy = original.clone();
        copy.add_attr(Value::from("b"), Value::Int(2)).unwrap();
        assert!(!original.has_key(&Value::from("b")));
        assert!(copy.has_key(&Value::from("b")));
    }

    #[test]
    fn mutating_add_is_shared() {
        let original = map(&[("a", 1)]);
        let alias = original.clone();
        alias
            .add_attr_mutation(Value::from("b"), Value::Int(2))
            .unwrap();
        assert_eq!(original.get_attr(&Value::from("b")).unwrap(), Value::Int(2));
        assert!(!original.is_unmodified_single_reference());
        alias.remove_attr_mutation(&Value::from("a")).unwrap();
        assert!(!original.has_key(&Value::from("a")));
    }

    #[test]
    fn has_key_ignores_null_values() {
        let mut m = map(&[]);
        m.add_attr(Value::from("gone"), Value::Null).unwrap();
        assert!(!m.has_key(&Value::from("gone")));
        assert_eq!(m.get_attr(&Value::from("missing")).unwrap(), Value::Null);
    }

    #[test]
    fn make_unique_detaches_nested_stores() {
        let inner = ints(&[1]);
        let mut outer = Value::list(vec![inner.clone()]);
        let shared = outer.clone();
        outer.make_unique();
        assert_eq!(shared.refcount(), 1);
        assert_eq!(inner.refcount(), 2);
        assert_eq!(outer, shared);
    }

    #[test]
    fn list_helpers() {
        assert_eq!(Value::Null.to_list(), Vec::<Value>::new());
        assert_eq!(Value::Int(4).to_list(), vec![Value::Int(4)]);
        assert_eq!(ints(&[1, 2]).as_int_list().unwrap(), vec![1, 2]);
        assert!(Value::Null.as_string_list_optional().unwrap().is_empty());
    }

    #[test]
    fn translated_strings_keep_their_key() {
        let s = Value::translated("Hello", "Bonjour");
        assert_eq!(s.as_str().unwrap(), "Bonjour");
        assert_eq!(
            s.as_string_store().unwrap().translated_from(),
            Some("Hello")
        );
    }

    #[test]
    fn debug_and_string_cast() {
        let v: Value = vec![Value::from("a"), Value::Int(1), Value::Null].into();
        assert_eq!(v.to_debug_string(), "[\"a\", 1, null]");
        assert_eq!(Value::from("plain").string_cast(), "plain");
        assert_eq!(map(&[("k", 2)]).to_string(), "{\"k\": 2}");
    }

    #[test]
    fn extreme_indices_are_errors() {
        let mut list = ints(&[1]);
        for index in [i64::MAX, i64::MIN, -1, 1] {
            let err = list.index(index).unwrap_err();
            assert!(matches!(err, VariantError::Index { size: 1, .. }), "{err}");
            assert!(list.set_index(index, Value::Null).is_err());
        }
        assert_eq!(
            list.index(i64::MAX).unwrap_err().to_string(),
            format!("Index error: index {} out of bounds for size 1", i64::MAX)
        );
    }

    #[test]
    fn map_keyed_by_itself() {
        let m: Value = [(Value::empty_map(), Value::Int(0))].into_iter().collect();
        m.add_attr_mutation(m.clone(), Value::Int(1)).unwrap();
        assert_eq!(m.len().unwrap(), 2);
        assert_eq!(m.get_attr(&m).unwrap(), Value::Int(1));
        assert_eq!(m.remove_attr_mutation(&m.clone()).unwrap(), Value::Int(1));
        assert_eq!(m.len().unwrap(), 1);
        assert_eq!(m.remove_attr_mutation(&ints(&[9])).unwrap(), Value::Null);
    }

    #[test]
    fn self_referencing_map_renders() {
        let m = map(&[]);
        m.add_attr_mutation(Value::from("me"), m.clone()).unwrap();
        assert!(m.to_debug_string().contains('…'));
        m.remove_attr_mutation(&Value::from("me")).unwrap();
    }
}
