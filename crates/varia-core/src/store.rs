//! Reference-counted backing stores for the composite value kinds.
//!
//! Every composite `Value` holds exactly one `Rc` to its store, so cloning
//! or dropping a value moves exactly one reference count. Stores are
//! mutated in place only when that count is one; otherwise the mutating
//! accessors on `Value` clone the store first.

use std::cell::{Cell, OnceCell, Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use uuid::Uuid;

use crate::context::Context;
use crate::error::{SourceLocation, VariantError};
use crate::function::Expression;
use crate::object::{HostObject, ObjectRef};
use crate::value::Value;

/// A list, or a zero-copy view over a range of a parent list's items.
#[derive(Debug, Clone)]
pub struct ListStore {
    items: Rc<Vec<Value>>,
    start: usize,
    end: usize,
    pub(crate) location: Option<SourceLocation>,
}

impl ListStore {
    pub fn new(items: Vec<Value>) -> Self {
        let end = items.len();
        ListStore {
            items: Rc::new(items),
            start: 0,
            end,
            location: None,
        }
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.items[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.as_slice().get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.as_slice().iter()
    }

    /// True if this store only covers part of the items it shares.
    pub fn is_view(&self) -> bool {
        self.start != 0 || self.end != self.items.len()
    }

    /// A view over `[start, end)` sharing this store's items.
    pub fn view(&self, start: usize, end: usize) -> Result<ListStore, VariantError> {
        if start > end || end > self.len() {
            return Err(VariantError::index(start as i64, end as i64, self.len()));
        }
        Ok(ListStore {
            items: Rc::clone(&self.items),
            start: self.start + start,
            end: self.start + end,
            location: self.location.clone(),
        })
    }

    /// Mutate the items, materializing a private copy if they are shared or viewed.
    pub fn modify<R>(&mut self, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        if self.is_view() {
            self.items = Rc::new(self.as_slice().to_vec());
            self.start = 0;
        }
        let items = Rc::make_mut(&mut self.items);
        let result = f(items);
        self.end = items.len();
        result
    }

    pub fn items_shared(&self) -> bool {
        Rc::strong_count(&self.items) > 1
    }
}

/// Immutable text with a cached codepoint count.
#[derive(Debug, Clone)]
pub struct StrStore {
    text: String,
    chars: usize,
    translated_from: Option<String>,
    pub(crate) location: Option<SourceLocation>,
}

impl StrStore {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let chars = text.chars().count();
        StrStore {
            text,
            chars,
            translated_from: None,
            location: None,
        }
    }

    /// A translated string that remembers the key it was translated from.
    pub fn translated(original: impl Into<String>, translation: impl Into<String>) -> Self {
        let mut store = StrStore::new(translation);
        store.translated_from = Some(original.into());
        store
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn char_count(&self) -> usize {
        self.chars
    }

    pub fn translated_from(&self) -> Option<&str> {
        self.translated_from.as_deref()
    }
}

/// An ordered map with a mutation counter.
///
/// Entries sit behind a `RefCell` so the mutating attribute operations can
/// change a store that several values share.
#[derive(Debug, Default)]
pub struct MapStore {
    entries: RefCell<BTreeMap<Value, Value>>,
    modcount: Cell<u32>,
    pub(crate) location: Option<SourceLocation>,
}

impl Clone for MapStore {
    fn clone(&self) -> Self {
        MapStore {
            entries: RefCell::new(self.entries.borrow().clone()),
            modcount: Cell::new(0),
            location: self.location.clone(),
        }
    }
}

impl MapStore {
    pub fn new(entries: BTreeMap<Value, Value>) -> Self {
        MapStore {
            entries: RefCell::new(entries),
            modcount: Cell::new(0),
            location: None,
        }
    }

    pub fn entries(&self) -> Ref<'_, BTreeMap<Value, Value>> {
        self.entries.borrow()
    }

    /// Mutable access that bumps the mutation counter.
    pub fn entries_mut(&self) -> RefMut<'_, BTreeMap<Value, Value>> {
        self.modcount.set(self.modcount.get().wrapping_add(1));
        self.entries.borrow_mut()
    }

    /// Mutable access for a store this value owns alone; not counted as a mutation.
    pub(crate) fn entries_get_mut(&mut self) -> &mut BTreeMap<Value, Value> {
        self.entries.get_mut()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn modcount(&self) -> u32 {
        self.modcount.get()
    }
}

/// Placeholder for an object referenced by UUID before it has been read.
#[derive(Debug)]
pub struct LoadingStore {
    uuid: Uuid,
    resolved: OnceCell<Value>,
}

impl LoadingStore {
    pub fn new(uuid: Uuid) -> Self {
        LoadingStore {
            uuid,
            resolved: OnceCell::new(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Fill the placeholder. Later calls are ignored.
    pub fn resolve(&self, object: ObjectRef) {
        let _ = self.resolved.set(Value::Object(object));
    }

    pub fn resolved(&self) -> Option<&Value> {
        self.resolved.get()
    }
}

/// An unevaluated expression and the scope to evaluate it in.
pub struct DelayedStore {
    expr: Rc<dyn Expression>,
    scope: ObjectRef,
    forced: OnceCell<Value>,
}

impl std::fmt::Debug for DelayedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedStore")
            .field("expr", &self.expr.text())
            .field("forced", &self.forced.get().is_some())
            .finish()
    }
}

impl DelayedStore {
    pub fn new(expr: Rc<dyn Expression>, scope: ObjectRef) -> Self {
        DelayedStore {
            expr,
            scope,
            forced: OnceCell::new(),
        }
    }

    pub fn forced(&self) -> Option<&Value> {
        self.forced.get()
    }

    pub fn expression(&self) -> &Rc<dyn Expression> {
        &self.expr
    }

    /// Evaluate once and cache the result.
    pub fn force(&self, ctx: &Context) -> Result<&Value, VariantError> {
        if let Some(v) = self.forced.get() {
            return Ok(v);
        }
        let value = self.expr.evaluate(ctx, &self.scope)?;
        let _ = self.forced.set(value);
        self.forced
            .get()
            .ok_or_else(|| VariantError::eval("delayed value lost its result"))
    }
}

/// Non-owning observation of a host object.
pub struct WeakStore {
    target: Weak<dyn HostObject>,
}

impl std::fmt::Debug for WeakStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WeakStore(alive: {})", self.target.strong_count() > 0)
    }
}

impl WeakStore {
    pub fn new(target: &ObjectRef) -> Self {
        WeakStore {
            target: Rc::downgrade(target),
        }
    }

    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.target.upgrade()
    }

    pub(crate) fn addr(&self) -> usize {
        self.target.as_ptr() as *const () as usize
    }
}
