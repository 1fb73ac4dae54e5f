use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::context::Context;
use crate::error::{SourceLocation, VariantError};
use crate::object::{Access, HostObject, ObjectRef, PropertyInfo};
use crate::types::VariantType;
use crate::value::Value;

/// A compiled expression supplied by the evaluator.
pub trait Expression {
    fn evaluate(&self, ctx: &Context, scope: &ObjectRef) -> Result<Value, VariantError>;

    /// Source text, used when writing a function back out and in diagnostics.
    fn text(&self) -> &str;

    fn location(&self) -> Option<SourceLocation> {
        None
    }
}

/// A native body. Receives the bound, checked and defaulted arguments.
pub type NativeFnInner = dyn Fn(&Context, &[Value]) -> Result<Value, VariantError>;

pub struct NativeFn {
    pub name: String,
    pub func: Box<NativeFnInner>,
}

impl NativeFn {
    pub fn simple(
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Result<Value, VariantError> + 'static,
    ) -> Self {
        NativeFn {
            name: name.into(),
            func: Box::new(move |_ctx, args| f(args)),
        }
    }

    pub fn with_ctx(
        name: impl Into<String>,
        f: impl Fn(&Context, &[Value]) -> Result<Value, VariantError> + 'static,
    ) -> Self {
        NativeFn {
            name: name.into(),
            func: Box::new(f),
        }
    }
}

#[derive(Clone)]
pub enum Body {
    Native(Rc<NativeFn>),
    Interpreted(Rc<dyn Expression>),
}

impl Body {
    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            Body::Native(_) => None,
            Body::Interpreted(expr) => expr.location(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: Option<VariantType>,
    pub default: Option<Value>,
    pub optional: bool,
}

/// A positional parameter list with an optional return constraint.
#[derive(Clone, Debug, Default)]
pub struct Signature {
    params: Vec<Param>,
    return_type: Option<VariantType>,
}

impl Signature {
    pub fn new() -> Self {
        Signature::default()
    }

    pub fn param(mut self, name: impl Into<String>, ty: impl Into<Option<VariantType>>) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty: ty.into(),
            default: None,
            optional: false,
        });
        self
    }

    /// An optional parameter; omitted calls bind `default`.
    pub fn optional(
        mut self,
        name: impl Into<String>,
        ty: impl Into<Option<VariantType>>,
        default: Value,
    ) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty: ty.into(),
            default: Some(default),
            optional: true,
        });
        self
    }

    pub fn returns(mut self, ty: VariantType) -> Self {
        self.return_type = Some(ty);
        self
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn return_type(&self) -> Option<&VariantType> {
        self.return_type.as_ref()
    }

    /// Parameters before the trailing run of optional ones are required.
    pub fn min_args(&self) -> usize {
        let trailing = self.params.iter().rev().take_while(|p| p.optional).count();
        self.params.len() - trailing
    }

    pub fn max_args(&self) -> usize {
        self.params.len()
    }

    pub fn arity_text(&self) -> String {
        let (min, max) = (self.min_args(), self.max_args());
        if min == max {
            min.to_string()
        } else {
            format!("{min}-{max}")
        }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    pub fn map_generic_types(&self, mapping: &HashMap<String, VariantType>) -> Signature {
        Signature {
            params: self
                .params
                .iter()
                .map(|p| Param {
                    ty: p.ty.as_ref().map(|t| t.map_generic_types(mapping)),
                    ..p.clone()
                })
                .collect(),
            return_type: self.return_type.as_ref().map(|t| t.map_generic_types(mapping)),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&p.name)?;
            if let Some(ty) = &p.ty {
                write!(f, ": {ty}")?;
            }
            if let Some(default) = &p.default {
                write!(f, " = {}", default.to_debug_string())?;
            }
        }
        f.write_str(")")?;
        if let Some(ret) = &self.return_type {
            write!(f, " -> {ret}")?;
        }
        Ok(())
    }
}

/// Argument frame for one call of an interpreted body.
///
/// Names and slots at or above `base_slot` read the call's arguments;
/// everything else falls through to the closure.
pub struct Env {
    signature: Rc<Signature>,
    args: RefCell<Vec<Value>>,
    base_slot: usize,
    parent: Option<ObjectRef>,
}

impl Env {
    pub fn new(
        signature: Rc<Signature>,
        args: Vec<Value>,
        base_slot: usize,
        parent: Option<ObjectRef>,
    ) -> Self {
        Env {
            signature,
            args: RefCell::new(args),
            base_slot,
            parent,
        }
    }

    pub fn arg(&self, index: usize) -> Option<Value> {
        self.args.borrow().get(index).cloned()
    }

    pub(crate) fn reset(&self, args: Vec<Value>) {
        *self.args.borrow_mut() = args;
    }

    pub(crate) fn clear(&self) {
        self.args.borrow_mut().clear();
    }
}

impl HostObject for Env {
    fn type_name(&self) -> &str {
        "environment"
    }

    fn query(&self, ctx: &Context, name: &str) -> Result<Value, VariantError> {
        if let Some(i) = self.signature.position(name) {
            return Ok(self.arg(i).unwrap_or(Value::Null));
        }
        match &self.parent {
            Some(parent) => parent.query(ctx, name),
            None => Ok(Value::Null),
        }
    }

    fn mutate(&self, ctx: &Context, name: &str, value: Value) -> Result<(), VariantError> {
        if let Some(i) = self.signature.position(name) {
            if let Some(slot) = self.args.borrow_mut().get_mut(i) {
                *slot = value;
                return Ok(());
            }
        }
        match &self.parent {
            Some(parent) => parent.mutate(ctx, name, value),
            None => Err(VariantError::eval(format!("no variable named '{name}'"))),
        }
    }

    fn query_slot(&self, ctx: &Context, slot: usize) -> Result<Value, VariantError> {
        if slot >= self.base_slot {
            return Ok(self.arg(slot - self.base_slot).unwrap_or(Value::Null));
        }
        match &self.parent {
            Some(parent) => parent.query_slot(ctx, slot),
            None => Ok(Value::Null),
        }
    }

    fn mutate_slot(&self, ctx: &Context, slot: usize, value: Value) -> Result<(), VariantError> {
        if slot >= self.base_slot {
            let mut args = self.args.borrow_mut();
            return match args.get_mut(slot - self.base_slot) {
                Some(arg) => {
                    *arg = value;
                    Ok(())
                }
                None => Err(VariantError::eval(format!("no argument in slot {slot}"))),
            };
        }
        match &self.parent {
            Some(parent) => parent.mutate_slot(ctx, slot, value),
            None => Err(VariantError::eval(format!("no variable in slot {slot}"))),
        }
    }

    fn inputs(&self) -> Vec<PropertyInfo> {
        self.signature
            .params()
            .iter()
            .map(|p| PropertyInfo {
                name: p.name.clone(),
                access: Access::ReadWrite,
                ty: p.ty.clone(),
            })
            .collect()
    }
}

pub struct FunctionStore {
    pub(crate) name: Option<String>,
    pub(crate) body: Body,
    pub(crate) signature: Rc<Signature>,
    pub(crate) bound: Vec<Value>,
    pub(crate) closure: Option<ObjectRef>,
    pub(crate) base_slot: usize,
    pub(crate) env_cache: RefCell<Option<Rc<Env>>>,
}

impl FunctionStore {
    pub fn new(signature: Signature, body: Body) -> Self {
        FunctionStore {
            name: None,
            body,
            signature: Rc::new(signature),
            bound: Vec::new(),
            closure: None,
            base_slot: 0,
            env_cache: RefCell::new(None),
        }
    }

    pub fn native(
        name: &str,
        signature: Signature,
        f: impl Fn(&Context, &[Value]) -> Result<Value, VariantError> + 'static,
    ) -> Self {
        FunctionStore::new(signature, Body::Native(Rc::new(NativeFn::with_ctx(name, f))))
            .named(name)
    }

    pub fn interpreted(signature: Signature, expr: Rc<dyn Expression>) -> Self {
        FunctionStore::new(signature, Body::Interpreted(expr))
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_closure(mut self, closure: ObjectRef) -> Self {
        self.closure = Some(closure);
        self
    }

    /// First slot index owned by this function's arguments.
    pub fn with_base_slot(mut self, base_slot: usize) -> Self {
        self.base_slot = base_slot;
        self
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous function>")
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn bound_args(&self) -> &[Value] {
        &self.bound
    }

    pub fn closure(&self) -> Option<&ObjectRef> {
        self.closure.as_ref()
    }

    pub fn base_slot(&self) -> usize {
        self.base_slot
    }

    pub fn location(&self) -> Option<SourceLocation> {
        self.body.location()
    }

    pub fn signature_text(&self) -> String {
        self.signature.to_string()
    }

    /// Arguments still needed after the bound prefix.
    pub fn min_args(&self) -> usize {
        self.signature.min_args().saturating_sub(self.bound.len())
    }

    pub fn max_args(&self) -> usize {
        self.signature.max_args().saturating_sub(self.bound.len())
    }

    /// Constraints of the parameters not covered by bound arguments.
    pub fn arg_types(&self) -> Vec<Option<VariantType>> {
        self.signature
            .params()
            .iter()
            .skip(self.bound.len())
            .map(|p| p.ty.clone())
            .collect()
    }

    pub fn return_type(&self) -> Option<&VariantType> {
        self.signature.return_type()
    }

    /// A copy sharing the body, with `bound` and `closure` replaced.
    pub(crate) fn derive(&self, bound: Vec<Value>, closure: Option<ObjectRef>) -> FunctionStore {
        FunctionStore {
            name: self.name.clone(),
            body: self.body.clone(),
            signature: Rc::clone(&self.signature),
            bound,
            closure,
            base_slot: self.base_slot,
            env_cache: RefCell::new(None),
        }
    }

    pub(crate) fn take_env(&self, args: Vec<Value>) -> Rc<Env> {
        match self.env_cache.borrow_mut().take() {
            Some(env) => {
                env.reset(args);
                env
            }
            None => Rc::new(Env::new(
                Rc::clone(&self.signature),
                args,
                self.base_slot,
                self.closure.clone(),
            )),
        }
    }

    /// Keep the environment for the next call unless the body captured it.
    pub(crate) fn recycle_env(&self, env: Rc<Env>) {
        if Rc::strong_count(&env) == 1 {
            env.clear();
            *self.env_cache.borrow_mut() = Some(env);
        }
    }
}

pub type BodyFactory = Rc<dyn Fn(&Context, &[VariantType]) -> Result<Body, VariantError>>;

/// A function parameterized over named type variables.
pub struct GenericFunctionStore {
    pub(crate) name: Option<String>,
    pub(crate) type_params: Vec<String>,
    pub(crate) signature: Rc<Signature>,
    pub(crate) factory: BodyFactory,
    pub(crate) closure: Option<ObjectRef>,
    pub(crate) base_slot: usize,
    pub(crate) instances: RefCell<HashMap<String, Value>>,
}

impl GenericFunctionStore {
    pub fn new(
        type_params: Vec<String>,
        signature: Signature,
        factory: impl Fn(&Context, &[VariantType]) -> Result<Body, VariantError> + 'static,
    ) -> Self {
        GenericFunctionStore {
            name: None,
            type_params,
            signature: Rc::new(signature),
            factory: Rc::new(factory),
            closure: None,
            base_slot: 0,
            instances: RefCell::new(HashMap::new()),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_closure(mut self, closure: ObjectRef) -> Self {
        self.closure = Some(closure);
        self
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous generic>")
    }

    pub fn type_params(&self) -> &[String] {
        &self.type_params
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn instance_count(&self) -> usize {
        self.instances.borrow().len()
    }

    pub fn signature_text(&self) -> String {
        format!("<{}>{}", self.type_params.join(", "), self.signature)
    }
}

/// An ordered overload set.
pub struct MultiFunctionStore {
    members: Vec<Value>,
}

impl MultiFunctionStore {
    /// Every member must be a function or a generic function.
    pub fn new(members: Vec<Value>) -> Result<Self, VariantError> {
        for m in &members {
            if !matches!(m, Value::Function(_) | Value::GenericFunction(_)) {
                return Err(VariantError::type_mismatch("function", m));
            }
        }
        Ok(MultiFunctionStore { members })
    }

    pub fn members(&self) -> &[Value] {
        &self.members
    }
}

impl From<MultiFunctionStore> for Value {
    fn from(m: MultiFunctionStore) -> Self {
        Value::MultiFunction(Rc::new(m))
    }
}

impl From<GenericFunctionStore> for Value {
    fn from(g: GenericFunctionStore) -> Self {
        Value::GenericFunction(Rc::new(g))
    }
}
