use varia_core::{Body, Context, FunctionStore, Value, VariantError};

use crate::reader::EVAL_PREFIX;
use crate::scope::reference_text;

const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Tab-indented output with one map entry per line.
    pub pretty: bool,
    /// Strict JSON strings: always double quoted with JSON escapes, and
    /// translated strings written as their translation.
    pub compliant: bool,
}

impl WriteOptions {
    pub fn pretty() -> Self {
        WriteOptions {
            pretty: true,
            compliant: false,
        }
    }

    pub fn compliant(mut self) -> Self {
        self.compliant = true;
        self
    }
}

/// Write `value` in the relaxed dialect the reader accepts.
///
/// Values that JSON cannot hold are written as `@eval` strings: enums,
/// non-string keys, serializable objects and interpreted functions.
/// Delayed values are forced first.
pub fn write_json(ctx: &Context, value: &Value, options: &WriteOptions) -> Result<String, VariantError> {
    let mut writer = Writer {
        ctx,
        options: *options,
        out: String::new(),
        depth: 0,
    };
    writer.value(value, 0)?;
    Ok(writer.out)
}

struct Writer<'c> {
    ctx: &'c Context,
    options: WriteOptions,
    out: String,
    depth: usize,
}

impl Writer<'_> {
    fn value(&mut self, value: &Value, indent: usize) -> Result<(), VariantError> {
        if self.depth >= MAX_DEPTH {
            return Err(VariantError::Serialization(
                "value nested too deeply to write (is a map inside itself?)".to_string(),
            ));
        }
        self.depth += 1;
        let result = self.value_inner(value, indent);
        self.depth -= 1;
        result
    }

    fn value_inner(&mut self, value: &Value, indent: usize) -> Result<(), VariantError> {
        match value {
            Value::Null => self.out.push_str("null"),
            Value::Bool(b) => self.out.push_str(if *b { "true" } else { "false" }),
            Value::Int(n) => self.out.push_str(&n.to_string()),
            Value::Decimal(d) => self.out.push_str(&d.to_string()),
            Value::Enum(_) => {
                let name = value.as_enum()?;
                self.eval_string(&format!("enum {name}"))?;
            }
            Value::String(s) => match s.translated_from() {
                Some(original) if !self.options.compliant => {
                    self.out.push('~');
                    for c in original.chars() {
                        if c == '~' || c == '\\' {
                            self.out.push('\\');
                        }
                        self.out.push(c);
                    }
                    self.out.push('~');
                }
                _ => self.text(s.as_str())?,
            },
            Value::List(items) => self.list(items.as_slice(), indent)?,
            Value::Map(_) => self.map(value, indent)?,
            Value::Object(obj) => match obj.serializable() {
                Some(s) => self.eval_string(&reference_text(s.serial_id().get()))?,
                None => {
                    return Err(VariantError::Serialization(format!(
                        "{} objects cannot be serialized",
                        obj.type_name()
                    )))
                }
            },
            Value::ObjectLoading(loading) => match loading.resolved() {
                Some(resolved) => {
                    let resolved = resolved.clone();
                    self.value_inner(&resolved, indent)?;
                }
                None => self.eval_string(&reference_text(loading.uuid()))?,
            },
            Value::Function(f) => {
                let text = function_text(f)?;
                self.eval_string(&text)?;
            }
            Value::MultiFunction(multi) => {
                let mut parts = Vec::new();
                for member in multi.members() {
                    match member {
                        Value::Function(f) => parts.push(function_text(f)?),
                        _ => {
                            return Err(VariantError::Serialization(
                                "overload sets with generic members cannot be serialized".into(),
                            ))
                        }
                    }
                }
                self.eval_string(&format!("overload({})", parts.join(", ")))?;
            }
            Value::GenericFunction(g) => {
                return Err(VariantError::Serialization(format!(
                    "generic function {} cannot be serialized",
                    g.name()
                )))
            }
            Value::Delayed(_) => {
                let forced = value.force(self.ctx)?;
                self.value_inner(&forced, indent)?;
            }
            Value::Weak(_) => {
                let strong = value.strengthen();
                self.value_inner(&strong, indent)?;
            }
        }
        Ok(())
    }

    fn eval_string(&mut self, source: &str) -> Result<(), VariantError> {
        self.string(&format!("{EVAL_PREFIX}{source}"))
    }

    /// A plain string. Text that would read back as an `@eval` form is
    /// wrapped as `@eval q(<literal>)`.
    fn text(&mut self, text: &str) -> Result<(), VariantError> {
        if text.starts_with(EVAL_PREFIX) {
            return self.eval_string(&format!("q({})", quote_relaxed(text)));
        }
        self.string(text)
    }

    fn string(&mut self, text: &str) -> Result<(), VariantError> {
        if self.options.compliant {
            let quoted = serde_json::to_string(text)
                .map_err(|e| VariantError::Serialization(e.to_string()))?;
            self.out.push_str(&quoted);
        } else {
            self.out.push_str(&quote_relaxed(text));
        }
        Ok(())
    }

    fn newline(&mut self, indent: usize) {
        self.out.push('\n');
        for _ in 0..indent {
            self.out.push('\t');
        }
    }

    fn list(&mut self, items: &[Value], indent: usize) -> Result<(), VariantError> {
        let multiline = self.options.pretty
            && items
                .iter()
                .any(|v| matches!(v.resolved(), Value::List(_) | Value::Map(_)));
        self.out.push('[');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push(',');
                if self.options.pretty && !multiline {
                    self.out.push(' ');
                }
            }
            if multiline {
                self.newline(indent + 1);
            }
            self.value(item, indent + 1)?;
        }
        if multiline {
            self.newline(indent);
        }
        self.out.push(']');
        Ok(())
    }

    fn map(&mut self, map: &Value, indent: usize) -> Result<(), VariantError> {
        let entries: Vec<(Value, Value)> = map
            .as_map()?
            .entries()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.out.push('{');
        for (i, (key, value)) in entries.iter().enumerate() {
            if i > 0 {
                self.out.push(',');
            }
            if self.options.pretty {
                self.newline(indent + 1);
            }
            self.key(key)?;
            self.out.push_str(if self.options.pretty { ": " } else { ":" });
            self.value(value, indent + 1)?;
        }
        if self.options.pretty && !entries.is_empty() {
            self.newline(indent);
        }
        self.out.push('}');
        Ok(())
    }

    fn key(&mut self, key: &Value) -> Result<(), VariantError> {
        if key.is_string() {
            return self.value(key, 0);
        }
        let compact = WriteOptions {
            pretty: false,
            compliant: self.options.compliant,
        };
        let text = write_json(self.ctx, key, &compact)?;
        self.eval_string(&text)
    }
}

/// `def(<signature>) <body>` for an interpreted function. A closure is kept
/// when it is a serializable object:
/// `bind_closure(def(<signature>) <body>, deserialize('<uuid>'))`.
fn function_text(f: &FunctionStore) -> Result<String, VariantError> {
    match f.body() {
        Body::Interpreted(expr) if f.bound_args().is_empty() => {
            let def = format!("def{} {}", f.signature(), expr.text());
            let Some(closure) = f.closure() else {
                return Ok(def);
            };
            match closure.serializable() {
                Some(s) => Ok(format!(
                    "bind_closure({def}, {})",
                    reference_text(s.serial_id().get())
                )),
                None => Err(VariantError::Serialization(format!(
                    "{} closes over a {} object, which cannot be serialized",
                    f.name(),
                    closure.type_name()
                ))),
            }
        }
        Body::Interpreted(_) => Err(VariantError::Serialization(format!(
            "{} has bound arguments and cannot be serialized",
            f.name()
        ))),
        Body::Native(_) => Err(VariantError::Serialization(format!(
            "native function {} cannot be serialized",
            f.name()
        ))),
    }
}

/// Pick the lightest delimiters that read back as `text`.
pub fn quote_relaxed(text: &str) -> String {
    let has_double = text.contains('"');
    let has_backslash = text.contains('\\');
    if !has_double && !has_backslash {
        format!("\"{text}\"")
    } else if !text.contains('\'') && !has_backslash {
        format!("'{text}'")
    } else if !text.contains("\"\"\"") && !text.ends_with('"') {
        format!("\"\"\"{text}\"\"\"")
    } else {
        let mut out = String::with_capacity(text.len() + 2);
        out.push('"');
        for c in text.chars() {
            if c == '"' || c == '\\' {
                out.push('\\');
            }
            out.push(c);
        }
        out.push('"');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::rc::Rc;
    use varia_core::{Decimal, Expression, Kind, MapObject, ObjectRef, Signature, VariantType};

    use crate::reader::read;

    fn compact(v: &Value) -> String {
        write_json(&Context::new(), v, &WriteOptions::default()).unwrap()
    }

    fn pretty(v: &Value) -> String {
        write_json(&Context::new(), v, &WriteOptions::pretty()).unwrap()
    }

    fn map(pairs: Vec<(Value, Value)>) -> Value {
        Value::from(pairs.into_iter().collect::<BTreeMap<_, _>>())
    }

    struct Source(&'static str);

    impl Expression for Source {
        fn evaluate(&self, _ctx: &Context, _scope: &ObjectRef) -> Result<Value, VariantError> {
            Ok(Value::Null)
        }

        fn text(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn scalars() {
        assert_eq!(compact(&Value::Null), "null");
        assert_eq!(compact(&Value::Int(-4)), "-4");
        assert_eq!(compact(&Value::Decimal(Decimal::from_int(2))), "2.0");
        assert_eq!(compact(&Value::enumeration("north")), "\"@eval enum north\"");
    }

    #[test]
    fn delimiter_choice() {
        assert_eq!(quote_relaxed("plain"), "\"plain\"");
        assert_eq!(quote_relaxed("say \"hi\""), "'say \"hi\"'");
        assert_eq!(quote_relaxed("it's \"x\" ok"), "\"\"\"it's \"x\" ok\"\"\"");
        assert_eq!(quote_relaxed("back\\slash"), "\"\"\"back\\slash\"\"\"");
        assert_eq!(quote_relaxed("ends with \"q\" '\""), "\"ends with \\\"q\\\" '\\\"\"");
    }

    #[test]
    fn every_delimiter_reads_back() {
        let ctx = Context::new();
        for text in ["plain", "say \"hi\"", "it's \"x\"", "a\\b", "ends \"'\"", "\"\"\" inside '"] {
            let written = quote_relaxed(text);
            assert_eq!(read(&ctx, &written).unwrap().as_str().unwrap(), text, "{written}");
        }
    }

    #[test]
    fn compliant_strings_use_json_escapes() {
        let ctx = Context::new();
        let opts = WriteOptions::default().compliant();
        let v = Value::from("tab\there \"q\"");
        assert_eq!(write_json(&ctx, &v, &opts).unwrap(), r#""tab\there \"q\"""#);
        let t = Value::translated("cat", "chat");
        assert_eq!(write_json(&ctx, &t, &opts).unwrap(), "\"chat\"");
        assert_eq!(compact(&t), "~cat~");
        assert_eq!(compact(&Value::translated("a~b", "x")), "~a\\~b~");
    }

    #[test]
    fn strings_that_look_like_eval_forms_stay_text() {
        let ctx = Context::new();
        let samples = ["@eval 3", "@eval enum north", "@eval [1, 2]", "@eval q('x')", "@eval "];
        for options in [WriteOptions::default(), WriteOptions::default().compliant()] {
            for text in samples {
                let v = Value::from(text);
                let written = write_json(&ctx, &v, &options).unwrap();
                assert!(written.contains("@eval q("), "{written}");
                let back = read(&ctx, &written).unwrap();
                assert_eq!(back.kind(), Kind::String, "{written}");
                assert_eq!(back, v, "{written}");
            }
        }
        assert_eq!(compact(&Value::from("@eval 3")), "'@eval q(\"@eval 3\")'");
        assert_eq!(compact(&Value::from("@evaluate")), "\"@evaluate\"");
    }

    #[test]
    fn compact_containers() {
        let v = map(vec![
            (Value::from("b"), Value::list(vec![Value::Int(1), Value::Int(2)])),
            (Value::from("a"), Value::Null),
        ]);
        assert_eq!(compact(&v), "{\"a\":null,\"b\":[1,2]}");
        assert_eq!(compact(&Value::empty_map()), "{}");
    }

    #[test]
    fn pretty_layout() {
        let v = map(vec![
            (Value::from("name"), Value::from("x")),
            (Value::from("xs"), Value::list(vec![Value::Int(1), Value::Int(2)])),
            (Value::from("nested"), Value::list(vec![Value::empty_map()])),
        ]);
        assert_eq!(
            pretty(&v),
            "{\n\t\"name\": \"x\",\n\t\"nested\": [\n\t\t{}\n\t],\n\t\"xs\": [1, 2]\n}"
        );
    }

    #[test]
    fn non_string_keys_become_eval_strings() {
        let v = map(vec![
            (Value::Int(3), Value::from("three")),
            (Value::list(vec![Value::Int(1)]), Value::Bool(true)),
        ]);
        let text = compact(&v);
        assert_eq!(text, "{\"@eval 3\":\"three\",\"@eval [1]\":true}");
        assert_eq!(read(&Context::new(), &text).unwrap(), v);
    }

    #[test]
    fn objects_need_to_be_serializable() {
        let obj = MapObject::new("point", Value::empty_map()).unwrap();
        let err = write_json(&Context::new(), &Value::object(obj), &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, VariantError::Serialization(_)));
    }

    #[test]
    fn functions() {
        let sig = Signature::new().param("a", VariantType::Int).param("b", VariantType::Int);
        let f = Value::from(FunctionStore::interpreted(sig.clone(), Rc::new(Source("a + b"))));
        assert_eq!(compact(&f), "\"@eval def(a: int, b: int) a + b\"");

        let point: ObjectRef = Rc::new(MapObject::new("point", Value::empty_map()).unwrap());
        let closed = f.bind_closure(point).unwrap();
        let err = write_json(&Context::new(), &closed, &WriteOptions::default()).unwrap_err();
        assert!(err.to_string().contains("closes over a point object"), "{err}");

        let native = FunctionStore::native("twice", sig, |_ctx, args| Ok(args[0].clone()));
        let err = write_json(&Context::new(), &Value::from(native), &WriteOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("native function twice"));
    }
}
