use std::cell::{Cell, RefCell};

use crate::config::{RuntimeConfig, Trust};
use crate::error::{render_for_error, CallFrame, SourceLocation, StackTrace, VariantError};
use crate::value::Value;

struct FailedLookup {
    key: String,
    container: String,
    location: Option<SourceLocation>,
}

/// Per-thread diagnostics state, passed explicitly to every fallible entry point.
///
/// Holds the call-frame stack, the last failed map lookup and the active
/// recovery boundaries. Not `Send`: create one per interpreter thread.
pub struct Context {
    call_stack: RefCell<Vec<CallFrame>>,
    last_failed_lookup: RefCell<Option<FailedLookup>>,
    recovery_depth: Cell<usize>,
    config: RuntimeConfig,
}

impl Context {
    pub fn new() -> Self {
        Context::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Context {
            call_stack: RefCell::new(Vec::new()),
            last_failed_lookup: RefCell::new(None),
            recovery_depth: Cell::new(0),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn trust(&self) -> Trust {
        self.config.trust
    }

    pub fn check_trust(&self, required: Trust, what: &str) -> Result<(), VariantError> {
        self.config.trust.check(required, what)
    }

    // -- call frames --

    pub fn push_frame(&self, frame: CallFrame) -> Result<(), VariantError> {
        let mut stack = self.call_stack.borrow_mut();
        if stack.len() >= self.config.max_call_depth {
            return Err(VariantError::eval(format!(
                "recursion too deep: more than {} nested calls (entering {})",
                self.config.max_call_depth, frame.name
            )));
        }
        stack.push(frame);
        Ok(())
    }

    pub fn pop_frame(&self) {
        self.call_stack.borrow_mut().pop();
    }

    pub fn depth(&self) -> usize {
        self.call_stack.borrow().len()
    }

    pub fn truncate(&self, depth: usize) {
        self.call_stack.borrow_mut().truncate(depth);
    }

    pub fn capture_stack_trace(&self) -> StackTrace {
        let stack = self.call_stack.borrow();
        StackTrace(stack.iter().rev().cloned().collect())
    }

    /// Push a frame that is popped when the returned guard drops.
    pub fn enter(&self, frame: CallFrame) -> Result<FrameGuard<'_>, VariantError> {
        let depth = self.depth();
        self.push_frame(frame)?;
        Ok(FrameGuard { ctx: self, depth })
    }

    // -- lookup breadcrumbs --

    /// Read `key` from a map or object, remembering the miss if it comes back null.
    pub fn lookup(&self, container: &Value, key: &Value) -> Result<Value, VariantError> {
        let found = match container.resolved() {
            Value::Map(m) => m.get(key).unwrap_or(Value::Null),
            Value::Object(o) => o.query(self, key.as_str()?)?,
            other => return Err(self.enrich(VariantError::type_mismatch("map or object", other))),
        };
        if found.is_null() {
            self.record_failed_lookup(container, key);
        } else {
            self.last_failed_lookup.borrow_mut().take();
        }
        Ok(found)
    }

    pub fn record_failed_lookup(&self, container: &Value, key: &Value) {
        *self.last_failed_lookup.borrow_mut() = Some(FailedLookup {
            key: render_for_error(key),
            container: container.type_name().to_string(),
            location: container.location().cloned(),
        });
    }

    pub fn clear_failed_lookup(&self) {
        self.last_failed_lookup.borrow_mut().take();
    }

    /// Add the call stack and, for a type error on null, the last failed lookup.
    pub fn enrich(&self, err: VariantError) -> VariantError {
        let null_mismatch = matches!(
            err.inner(),
            VariantError::TypeMismatch { got, .. } if got == "null"
        );
        let miss = if null_mismatch && err.note().is_none() {
            self.last_failed_lookup.borrow_mut().take()
        } else {
            None
        };
        let err = match miss {
            Some(miss) => {
                let at = miss
                    .location
                    .map(|loc| format!(" at {loc}"))
                    .unwrap_or_default();
                err.with_note(format!(
                    "null came from a lookup of {} that found nothing in the {}{at}",
                    miss.key, miss.container
                ))
            }
            None => err,
        };
        err.with_stack_trace(self.capture_stack_trace())
    }

    // -- recovery boundaries --

    pub fn in_recovery(&self) -> bool {
        self.recovery_depth.get() > 0
    }

    /// Run `f` inside a recovery boundary: the frame stack is restored on exit
    /// and a failure is returned to the caller without being logged.
    pub fn recover<T>(
        &self,
        f: impl FnOnce(&Context) -> Result<T, VariantError>,
    ) -> Result<T, VariantError> {
        let depth = self.depth();
        self.recovery_depth.set(self.recovery_depth.get() + 1);
        let result = f(self).map_err(|e| self.enrich(e));
        self.recovery_depth.set(self.recovery_depth.get() - 1);
        self.truncate(depth);
        result
    }

    /// Run a top-level operation. Outside any recovery boundary a failure is
    /// logged with its full diagnostic text before being returned.
    pub fn run<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&Context) -> Result<T, VariantError>,
    ) -> Result<T, VariantError> {
        let depth = self.depth();
        let result = f(self).map_err(|e| self.enrich(e));
        self.truncate(depth);
        if let Err(e) = &result {
            if !self.in_recovery() {
                tracing::error!("{operation} failed: {}", e.report());
            }
        }
        result
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Restores the frame stack depth when dropped.
pub struct FrameGuard<'a> {
    ctx: &'a Context,
    depth: usize,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.ctx.truncate(self.depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Span;
    use std::collections::BTreeMap;

    #[test]
    fn frames_are_popped_by_guards() {
        let ctx = Context::new();
        {
            let _outer = ctx.enter(CallFrame::new("outer", None)).unwrap();
            let _inner = ctx.enter(CallFrame::new("inner", None)).unwrap();
            let trace = ctx.capture_stack_trace();
            assert_eq!(trace.0[0].name, "inner");
            assert_eq!(trace.0[1].name, "outer");
        }
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn depth_limit() {
        let ctx = Context::with_config(RuntimeConfig {
            max_call_depth: 2,
            ..RuntimeConfig::default()
        });
        ctx.push_frame(CallFrame::new("a", None)).unwrap();
        ctx.push_frame(CallFrame::new("b", None)).unwrap();
        let err = ctx.push_frame(CallFrame::new("c", None)).unwrap_err();
        assert!(err.to_string().contains("recursion too deep"));
    }

    #[test]
    fn failed_lookup_enriches_next_null_type_error() {
        let ctx = Context::new();
        let loc = SourceLocation::new(Some("units.cfg".into()), Span::point(4, 1));
        let map = Value::from(BTreeMap::new()).with_location(loc);
        let found = ctx.lookup(&map, &Value::from("hitpoints")).unwrap();
        assert!(found.is_null());
        let err = ctx.enrich(found.as_int().unwrap_err());
        let note = err.note().expect("note");
        assert!(note.contains("\"hitpoints\""));
        assert!(note.contains("units.cfg:4:1"));
    }

    #[test]
    fn breadcrumb_is_consumed_once() {
        let ctx = Context::new();
        let map = Value::from(BTreeMap::new());
        let missing = ctx.lookup(&map, &Value::from("k")).unwrap();
        let first = ctx.enrich(missing.as_int().unwrap_err());
        let second = ctx.enrich(missing.as_int().unwrap_err());
        assert!(first.note().is_some());
        assert!(second.note().is_none());
    }

    #[test]
    fn recover_restores_stack_and_attaches_trace() {
        let ctx = Context::new();
        let result: Result<(), VariantError> = ctx.recover(|ctx| {
            ctx.push_frame(CallFrame::new("leaky", None))?;
            assert!(ctx.in_recovery());
            Err(VariantError::DivideByZero)
        });
        let err = result.unwrap_err();
        assert_eq!(ctx.depth(), 0);
        assert!(!ctx.in_recovery());
        assert_eq!(err.stack_trace().map(|t| t.0.len()), Some(1));
    }

    #[test]
    fn run_returns_value() {
        let ctx = Context::new();
        assert_eq!(ctx.run("sum", |_| Ok(3)).unwrap(), 3);
    }
}
