pub mod call;
pub mod config;
pub mod context;
pub mod decimal;
pub mod error;
pub mod function;
pub mod object;
pub mod ops;
pub mod store;
pub mod types;
pub mod value;

pub use config::{RuntimeConfig, Trust};
pub use context::{Context, FrameGuard};
pub use decimal::Decimal;
pub use error::{CallFrame, SourceLocation, Span, StackTrace, VariantError};
pub use function::{
    Body, Env, Expression, FunctionStore, GenericFunctionStore, MultiFunctionStore, NativeFn,
    Signature,
};
pub use object::{Access, HostObject, MapObject, ObjectRef, PropertyInfo, SerialId, Serializable};
pub use store::{DelayedStore, ListStore, LoadingStore, MapStore, StrStore, WeakStore};
pub use types::{ClassType, InterfaceType, VariantType};
pub use value::{Kind, Value};
