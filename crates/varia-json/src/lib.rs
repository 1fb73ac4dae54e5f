pub mod json;
pub mod lexer;
pub mod reader;
pub mod scope;
pub mod writer;

pub use json::{json_to_value, value_to_json, value_to_json_lossy};
pub use reader::{read, EvalMode, Evaluator, Reader};
pub use scope::{
    deserialize_doc_with_objects, serialize_doc_with_objects, ObjectConstructor, ObjectRegistry,
    ReadScope, SerializationScope,
};
pub use writer::{write_json, WriteOptions};
