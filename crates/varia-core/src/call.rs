//! The calling convention.
//!
//! A call resolves overloads, prepends bound arguments, checks arity and
//! per-slot constraints (converting maps to declared classes or interfaces
//! where possible), fills defaults, runs the body in a fresh frame and
//! checks the declared return type.

use std::rc::Rc;

use hashbrown::HashMap;

use crate::context::Context;
use crate::error::{render_for_error, CallFrame, VariantError};
use crate::function::{Body, FunctionStore, GenericFunctionStore, MultiFunctionStore};
use crate::object::ObjectRef;
use crate::types::VariantType;
use crate::value::Value;

impl FunctionStore {
    fn argument_error(&self, slot: usize, expected: &VariantType, got: &Value) -> VariantError {
        VariantError::ArgumentType {
            name: self.name().to_string(),
            slot: slot + 1,
            expected: expected.to_string(),
            got: VariantType::of_value(got).to_string(),
            rendering: Some(render_for_error(got)),
        }
    }

    /// Would these arguments (after the bound prefix) be accepted without conversion?
    /// With `allow_partial`, fewer than the required arguments is fine.
    pub fn check_call(&self, args: &[Value], allow_partial: bool) -> Result<(), VariantError> {
        let sig = &self.signature;
        let supplied = self.bound.len() + args.len();
        if supplied > sig.max_args() || (!allow_partial && supplied < sig.min_args()) {
            return Err(VariantError::arity(self.name(), sig.arity_text(), supplied));
        }
        let params = sig.params().iter().skip(self.bound.len());
        for (offset, (param, arg)) in params.zip(args).enumerate() {
            if let Some(ty) = &param.ty {
                if !ty.matches(arg) {
                    return Err(self.argument_error(self.bound.len() + offset, ty, arg));
                }
            }
        }
        Ok(())
    }

    /// Invoke with `args` following the bound prefix.
    pub fn invoke(&self, ctx: &Context, args: Vec<Value>) -> Result<Value, VariantError> {
        let sig = Rc::clone(&self.signature);
        let mut all = if self.bound.is_empty() {
            args
        } else {
            let mut all = self.bound.clone();
            all.extend(args);
            all
        };

        if all.len() < sig.min_args() || all.len() > sig.max_args() {
            return Err(ctx.enrich(VariantError::arity(
                self.name(),
                sig.arity_text(),
                all.len(),
            )));
        }

        for arg in all.iter_mut() {
            if matches!(arg, Value::Delayed(_)) {
                *arg = arg.force(ctx).map_err(|e| ctx.enrich(e))?;
            }
        }

        for (slot, param) in sig.params().iter().enumerate().take(all.len()) {
            let Some(ty) = &param.ty else { continue };
            if ty.matches(&all[slot]) {
                continue;
            }
            match ty.coerce(ctx, &all[slot]).map_err(|e| ctx.enrich(e))? {
                Some(converted) => all[slot] = converted,
                None => return Err(ctx.enrich(self.argument_error(slot, ty, &all[slot]))),
            }
        }

        for param in &sig.params()[all.len()..] {
            all.push(param.default.clone().unwrap_or(Value::Null));
        }

        let _frame = ctx.enter(CallFrame::new(self.name(), self.location()))?;
        let result = match &self.body {
            Body::Native(native) => (native.func)(ctx, &all),
            Body::Interpreted(expr) => {
                let env = self.take_env(all);
                let scope: ObjectRef = env.clone();
                let result = expr.evaluate(ctx, &scope);
                drop(scope);
                self.recycle_env(env);
                result
            }
        }
        .map_err(|e| ctx.enrich(e))?;

        if let Some(ret) = sig.return_type() {
            if !ret.matches(&result) {
                return Err(ctx.enrich(VariantError::ReturnType {
                    name: self.name().to_string(),
                    expected: ret.to_string(),
                    got: VariantType::of_value(&result).to_string(),
                    rendering: Some(render_for_error(&result)),
                }));
            }
        }
        Ok(result)
    }
}

impl GenericFunctionStore {
    /// The concrete function for these type arguments, built once per distinct tuple.
    pub fn instantiate(&self, ctx: &Context, types: &[VariantType]) -> Result<Value, VariantError> {
        if types.len() != self.type_params.len() {
            return Err(VariantError::arity(
                format!("{} type parameters", self.name()),
                self.type_params.len().to_string(),
                types.len(),
            ));
        }
        let key = types
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        if let Some(existing) = self.instances.borrow().get(&key) {
            return Ok(existing.clone());
        }

        tracing::trace!(generic = self.name(), types = %key, "instantiating generic function");
        let mapping: HashMap<String, VariantType> = self
            .type_params
            .iter()
            .cloned()
            .zip(types.iter().cloned())
            .collect();
        let body = (self.factory)(ctx, types)?;
        let mut concrete = FunctionStore::new(self.signature.map_generic_types(&mapping), body)
            .named(format!("{}<{key}>", self.name()))
            .with_base_slot(self.base_slot);
        concrete.closure = self.closure.clone();

        let value = Value::Function(Rc::new(concrete));
        self.instances.borrow_mut().insert(key, value.clone());
        Ok(value)
    }

    /// Infer type arguments from parameters declared directly as a type variable.
    pub fn infer(&self, args: &[Value]) -> Option<Vec<VariantType>> {
        self.type_params
            .iter()
            .map(|tp| {
                self.signature
                    .params()
                    .iter()
                    .zip(args)
                    .find_map(|(param, arg)| match &param.ty {
                        Some(VariantType::Generic(name)) if name == tp => {
                            Some(VariantType::of_value(arg))
                        }
                        _ => None,
                    })
            })
            .collect()
    }
}

impl MultiFunctionStore {
    /// The first member whose arity and constraints accept `args`.
    pub fn resolve(&self, ctx: &Context, args: &[Value]) -> Result<Rc<FunctionStore>, VariantError> {
        for member in self.members() {
            match member {
                Value::Function(f) => {
                    if f.check_call(args, false).is_ok() {
                        return Ok(Rc::clone(f));
                    }
                }
                Value::GenericFunction(g) => {
                    let Some(types) = g.infer(args) else { continue };
                    let instance = g.instantiate(ctx, &types)?;
                    let f = instance.as_function()?;
                    if f.check_call(args, false).is_ok() {
                        return Ok(Rc::clone(f));
                    }
                }
                _ => {}
            }
        }
        Err(ctx.enrich(VariantError::OverloadResolution {
            candidates: self
                .members()
                .iter()
                .map(|m| match m {
                    Value::Function(f) => f.signature_text(),
                    Value::GenericFunction(g) => g.signature_text(),
                    other => other.to_debug_string(),
                })
                .collect(),
            supplied: args
                .iter()
                .map(|a| VariantType::of_value(a).to_string())
                .collect(),
        }))
    }
}

impl Value {
    pub fn as_function(&self) -> Result<&Rc<FunctionStore>, VariantError> {
        match self.resolved() {
            Value::Function(f) => Ok(f),
            other => Err(VariantError::type_mismatch("function", other)),
        }
    }

    pub fn as_generic_function(&self) -> Result<&Rc<GenericFunctionStore>, VariantError> {
        match self.resolved() {
            Value::GenericFunction(g) => Ok(g),
            other => Err(VariantError::type_mismatch("generic function", other)),
        }
    }

    /// Call a function, multi-function or (by inference) generic function.
    pub fn call(&self, ctx: &Context, args: Vec<Value>) -> Result<Value, VariantError> {
        match self.resolved() {
            Value::Function(f) => f.invoke(ctx, args),
            Value::MultiFunction(m) => m.resolve(ctx, &args)?.invoke(ctx, args),
            Value::GenericFunction(g) => match g.infer(&args) {
                Some(types) => g.instantiate(ctx, &types)?.call(ctx, args),
                None => Err(ctx.enrich(
                    VariantError::type_mismatch("function", self)
                        .with_hint("instantiate the generic function with explicit type arguments"),
                )),
            },
            Value::Delayed(d) => d.force(ctx)?.clone().call(ctx, args),
            other => Err(ctx.enrich(VariantError::type_mismatch("function", other))),
        }
    }

    pub fn instantiate(&self, ctx: &Context, types: &[VariantType]) -> Result<Value, VariantError> {
        self.as_generic_function()?.instantiate(ctx, types)
    }

    /// Partial application: a function with `args` appended to its bound prefix.
    pub fn bind_args(&self, args: Vec<Value>) -> Result<Value, VariantError> {
        let f = self.as_function()?;
        f.check_call(&args, true)?;
        let mut bound = f.bound_args().to_vec();
        bound.extend(args);
        Ok(Value::Function(Rc::new(f.derive(bound, f.closure().cloned()))))
    }

    pub fn bind_closure(&self, closure: ObjectRef) -> Result<Value, VariantError> {
        let f = self.as_function()?;
        Ok(Value::Function(Rc::new(
            f.derive(f.bound_args().to_vec(), Some(closure)),
        )))
    }

    pub fn min_args(&self) -> Result<usize, VariantError> {
        Ok(self.as_function()?.min_args())
    }

    pub fn max_args(&self) -> Result<usize, VariantError> {
        Ok(self.as_function()?.max_args())
    }

    pub fn arg_types(&self) -> Result<Vec<Option<VariantType>>, VariantError> {
        Ok(self.as_function()?.arg_types())
    }

    pub fn return_type(&self) -> Result<Option<VariantType>, VariantError> {
        Ok(self.as_function()?.return_type().cloned())
    }

    /// `Ok` if a call with `args` would pass arity and type checks; the error explains why not.
    pub fn function_call_valid(&self, args: &[Value], allow_partial: bool) -> Result<(), VariantError> {
        self.as_function()?.check_call(args, allow_partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{Expression, Signature};
    use crate::object::HostObject;
    use crate::types::ClassType;
    use crate::store::DelayedStore;
    use crate::MapObject;
    use std::cell::Cell;
    use std::collections::BTreeMap;

    fn add_ab() -> Value {
        let sig = Signature::new()
            .param("a", VariantType::Int)
            .optional("b", VariantType::Int, Value::Int(5))
            .returns(VariantType::Int);
        FunctionStore::native("add", sig, |_ctx, args| args[0].add(&args[1])).into()
    }

    #[test]
    fn defaults_fill_omitted_slots() {
        let ctx = Context::new();
        let f = add_ab();
        assert_eq!(f.call(&ctx, vec![Value::Int(3)]).unwrap(), Value::Int(8));
        assert_eq!(
            f.call(&ctx, vec![Value::Int(3), Value::Int(4)]).unwrap(),
            Value::Int(7)
        );
    }

    #[test]
    fn arity_errors() {
        let ctx = Context::new();
        let f = add_ab();
        assert!(matches!(
            f.call(&ctx, vec![]).unwrap_err().inner(),
            VariantError::Arity { got: 0, .. }
        ));
        let three = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        assert!(matches!(
            f.call(&ctx, three).unwrap_err().inner(),
            VariantError::Arity { got: 3, .. }
        ));
    }

    #[test]
    fn argument_type_errors_name_the_slot() {
        let ctx = Context::new();
        let err = add_ab()
            .call(&ctx, vec![Value::Int(1), Value::from("x")])
            .unwrap_err();
        match err.inner() {
            VariantError::ArgumentType {
                slot, expected, got, ..
            } => {
                assert_eq!(*slot, 2);
                assert_eq!(expected, "int");
                assert_eq!(got, "string");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Evaluates to a fixed value, counting how often it runs.
    struct Counted(Value, Rc<Cell<usize>>);

    impl Expression for Counted {
        fn evaluate(&self, _ctx: &Context, _scope: &ObjectRef) -> Result<Value, VariantError> {
            self.1.set(self.1.get() + 1);
            Ok(self.0.clone())
        }

        fn text(&self) -> &str {
            "counted"
        }
    }

    #[test]
    fn delayed_arguments_are_forced_before_type_checks() {
        let ctx = Context::new();
        let runs = Rc::new(Cell::new(0));
        let holder: ObjectRef = Rc::new(MapObject::new("holder", Value::empty_map()).unwrap());
        let three = Value::delayed(DelayedStore::new(
            Rc::new(Counted(Value::Int(3), Rc::clone(&runs))),
            holder,
        ));
        assert!(!VariantType::Int.matches(&three));

        let f = add_ab();
        assert_eq!(f.call(&ctx, vec![three.clone()]).unwrap(), Value::Int(8));
        assert_eq!(f.call(&ctx, vec![three.clone(), three.clone()]).unwrap(), Value::Int(6));
        assert_eq!(runs.get(), 1);
        assert!(VariantType::Int.matches(&three));
    }

    #[test]
    fn return_type_is_checked() {
        let ctx = Context::new();
        let f: Value = FunctionStore::native(
            "liar",
            Signature::new().returns(VariantType::Int),
            |_, _| Ok(Value::from("not an int")),
        )
        .into();
        assert!(matches!(
            f.call(&ctx, vec![]).unwrap_err().inner(),
            VariantError::ReturnType { .. }
        ));
    }

    #[test]
    fn frames_are_unwound_after_failure() {
        let ctx = Context::new();
        let f: Value = FunctionStore::native("boom", Signature::new(), |_, _| {
            Err(VariantError::DivideByZero)
        })
        .into();
        let err = f.call(&ctx, vec![]).unwrap_err();
        assert_eq!(ctx.depth(), 0);
        let trace = err.stack_trace().expect("trace");
        assert_eq!(trace.0[0].name, "boom");
    }

    #[test]
    fn bound_arguments_prefix_the_call() {
        let ctx = Context::new();
        let f = add_ab().bind_args(vec![Value::Int(10)]).unwrap();
        assert_eq!(f.min_args().unwrap(), 0);
        assert_eq!(f.max_args().unwrap(), 1);
        assert_eq!(f.call(&ctx, vec![]).unwrap(), Value::Int(15));
        assert_eq!(f.call(&ctx, vec![Value::Int(1)]).unwrap(), Value::Int(11));
        assert!(add_ab().bind_args(vec![Value::from("x")]).is_err());
    }

    #[test]
    fn multi_function_picks_first_match() {
        let ctx = Context::new();
        let int_fn: Value = FunctionStore::native(
            "from_int",
            Signature::new()
                .param("n", VariantType::Int)
                .returns(VariantType::String),
            |_, _| Ok(Value::from("int")),
        )
        .into();
        let str_fn: Value = FunctionStore::native(
            "from_string",
            Signature::new()
                .param("s", VariantType::String)
                .returns(VariantType::String),
            |_, _| Ok(Value::from("string")),
        )
        .into();
        let multi: Value = MultiFunctionStore::new(vec![int_fn, str_fn]).unwrap().into();
        assert_eq!(
            multi.call(&ctx, vec![Value::Int(5)]).unwrap(),
            Value::from("int")
        );
        assert_eq!(
            multi.call(&ctx, vec![Value::from("x")]).unwrap(),
            Value::from("string")
        );
        match multi.call(&ctx, vec![Value::Bool(true)]).unwrap_err().inner() {
            VariantError::OverloadResolution {
                candidates,
                supplied,
            } => {
                assert_eq!(candidates.len(), 2);
                assert_eq!(supplied, &vec!["bool".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn identity_generic(built: Rc<Cell<usize>>) -> GenericFunctionStore {
        GenericFunctionStore::new(
            vec!["T".to_string()],
            Signature::new()
                .param("x", VariantType::Generic("T".into()))
                .returns(VariantType::Generic("T".into())),
            move |_ctx, _types| {
                built.set(built.get() + 1);
                Ok(Body::Native(Rc::new(crate::NativeFn::simple("id", |args| {
                    Ok(args[0].clone())
                }))))
            },
        )
        .named("identity")
    }

    #[test]
    fn generic_instantiation_is_memoized() {
        let ctx = Context::new();
        let built = Rc::new(Cell::new(0));
        let g: Value = identity_generic(Rc::clone(&built)).into();
        let a = g.instantiate(&ctx, &[VariantType::Int]).unwrap();
        let b = g.instantiate(&ctx, &[VariantType::Int]).unwrap();
        assert_eq!(a, b);
        assert_eq!(built.get(), 1);
        let s = g.instantiate(&ctx, &[VariantType::String]).unwrap();
        assert_ne!(a, s);
        assert_eq!(built.get(), 2);
        assert!(a.call(&ctx, vec![Value::from("x")]).is_err());
        assert_eq!(s.call(&ctx, vec![Value::from("x")]).unwrap(), Value::from("x"));
        assert!(g.instantiate(&ctx, &[]).is_err());
    }

    #[test]
    fn generic_call_infers_type_arguments() {
        let ctx = Context::new();
        let built = Rc::new(Cell::new(0));
        let g: Value = identity_generic(built).into();
        assert_eq!(g.call(&ctx, vec![Value::Int(4)]).unwrap(), Value::Int(4));
        assert_eq!(g.as_generic_function().unwrap().instance_count(), 1);
    }

    #[test]
    fn class_parameters_accept_maps() {
        let ctx = Context::new();
        let class = Rc::new(ClassType::new("point", |_ctx, fields| {
            let obj: ObjectRef = Rc::new(MapObject::new("point", fields.clone())?);
            Ok(obj)
        }));
        let f: Value = FunctionStore::native(
            "x_of",
            Signature::new().param("p", VariantType::Class(class)),
            |ctx, args| args[0].as_object()?.query(ctx, "x"),
        )
        .into();
        let mut fields = BTreeMap::new();
        fields.insert(Value::from("x"), Value::Int(3));
        assert_eq!(f.call(&ctx, vec![Value::from(fields)]).unwrap(), Value::Int(3));
        assert!(matches!(
            f.call(&ctx, vec![Value::Int(1)]).unwrap_err().inner(),
            VariantError::ArgumentType { .. }
        ));
    }

    struct ArgSum;

    impl Expression for ArgSum {
        fn evaluate(&self, ctx: &Context, scope: &ObjectRef) -> Result<Value, VariantError> {
            let a = scope.query(ctx, "a")?;
            let b = scope.query_slot(ctx, 1)?;
            a.add(&b)
        }

        fn text(&self) -> &str {
            "a + b"
        }
    }

    #[test]
    fn interpreted_bodies_read_their_environment() {
        let ctx = Context::new();
        let sig = Signature::new()
            .param("a", VariantType::Int)
            .optional("b", VariantType::Int, Value::Int(5));
        let f: Value = FunctionStore::interpreted(sig, Rc::new(ArgSum)).into();
        assert_eq!(f.call(&ctx, vec![Value::Int(3)]).unwrap(), Value::Int(8));
        assert_eq!(
            f.call(&ctx, vec![Value::Int(3), Value::Int(4)]).unwrap(),
            Value::Int(7)
        );
        assert!(f.as_function().unwrap().env_cache.borrow().is_some());
    }

    struct Capture(RefCellSlot);
    type RefCellSlot = std::cell::RefCell<Option<ObjectRef>>;

    impl Expression for Capture {
        fn evaluate(&self, _ctx: &Context, scope: &ObjectRef) -> Result<Value, VariantError> {
            *self.0.borrow_mut() = Some(Rc::clone(scope));
            Ok(Value::Null)
        }

        fn text(&self) -> &str {
            "capture"
        }
    }

    #[test]
    fn captured_environments_are_not_reused() {
        let ctx = Context::new();
        let capture = Rc::new(Capture(std::cell::RefCell::new(None)));
        let f: Value = FunctionStore::interpreted(
            Signature::new().param("x", None),
            capture.clone(),
        )
        .into();
        f.call(&ctx, vec![Value::Int(1)]).unwrap();
        assert!(f.as_function().unwrap().env_cache.borrow().is_none());
        let held = capture.0.borrow().clone().expect("captured");
        f.call(&ctx, vec![Value::Int(2)]).unwrap();
        assert_eq!(held.query(&ctx, "x").unwrap(), Value::Int(1));
    }

    #[test]
    fn calling_a_non_function_is_a_type_error() {
        let ctx = Context::new();
        assert!(matches!(
            Value::Int(1).call(&ctx, vec![]).unwrap_err().inner(),
            VariantError::TypeMismatch { .. }
        ));
    }
}
