use std::rc::Rc;

use varia_core::{
    Context, Decimal, DelayedStore, Expression, MapObject, ObjectRef, SourceLocation, Span, Trust,
    Value, VariantError,
};

use crate::lexer::{tokenize, SpannedToken, Token};
use crate::scope::{parse_uuid, ReadScope};

const MAX_DEPTH: usize = 256;

pub const EVAL_PREFIX: &str = "@eval ";

/// Turns the text of an `@eval` string into a value.
pub trait Evaluator {
    fn evaluate(&self, ctx: &Context, source: &str) -> Result<Value, VariantError>;
}

/// What to do with `@eval` strings that are not plain data.
#[derive(Clone, Copy, Default)]
pub enum EvalMode<'a> {
    /// Keep the string as written.
    #[default]
    Keep,
    /// Fail with an `Untrusted` error.
    Reject,
    /// Hand the expression to an evaluator. Needs `eval` trust.
    Evaluate(&'a dyn Evaluator),
}

/// Reader for the relaxed JSON dialect.
///
/// Accepts comments, trailing commas, unquoted identifier keys, single
/// quoted and `"""literal"""` strings and `~translatable~` strings. Maps,
/// lists and strings carry the location they were read from.
#[derive(Clone, Copy, Default)]
pub struct Reader<'a> {
    file: Option<&'a str>,
    eval: EvalMode<'a>,
    scope: Option<&'a ReadScope<'a>>,
    translator: Option<&'a dyn Fn(&str) -> String>,
}

impl<'a> Reader<'a> {
    pub fn new() -> Self {
        Reader::default()
    }

    /// Name reported in locations.
    pub fn file(mut self, name: &'a str) -> Self {
        self.file = Some(name);
        self
    }

    pub fn eval(mut self, mode: EvalMode<'a>) -> Self {
        self.eval = mode;
        self
    }

    /// Resolve `deserialize('<uuid>')` references through `scope`.
    pub fn scope(mut self, scope: &'a ReadScope<'a>) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Translate `~text~` strings. Without one, the text is its own translation.
    pub fn translator(mut self, translate: &'a dyn Fn(&str) -> String) -> Self {
        self.translator = Some(translate);
        self
    }

    pub fn read(&self, ctx: &Context, text: &str) -> Result<Value, VariantError> {
        let file: Option<Rc<str>> = self.file.map(Rc::from);
        let tokens = tokenize(text, file.as_ref())?;
        let mut parser = Parser {
            reader: self,
            ctx,
            file,
            tokens,
            pos: 0,
            depth: 0,
        };
        let value = parser.document()?;
        tracing::trace!(file = self.file.unwrap_or("<input>"), kind = %value.kind(), "read document");
        Ok(value)
    }
}

/// Read a document with default settings.
pub fn read(ctx: &Context, text: &str) -> Result<Value, VariantError> {
    Reader::new().read(ctx, text)
}

struct Parser<'r, 'a> {
    reader: &'r Reader<'a>,
    ctx: &'r Context,
    file: Option<Rc<str>>,
    tokens: Vec<SpannedToken>,
    pos: usize,
    depth: usize,
}

impl Parser<'_, '_> {
    fn location(&self, span: Span) -> SourceLocation {
        SourceLocation::new(self.file.clone(), span)
    }

    fn error(&self, message: impl Into<String>, span: Span) -> VariantError {
        VariantError::Reader {
            message: message.into(),
            location: self.location(span),
        }
    }

    fn end_span(&self) -> Span {
        self.tokens
            .last()
            .map(|t| Span::point(t.span.end_line, t.span.end_col))
            .unwrap_or_else(|| Span::point(1, 1))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn next(&mut self) -> Result<SpannedToken, VariantError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| self.error("unexpected end of input", self.end_span()))?;
        self.pos += 1;
        Ok(token)
    }

    fn document(&mut self) -> Result<Value, VariantError> {
        let value = self.value()?;
        if let Some(extra) = self.tokens.get(self.pos) {
            return Err(self.error("unexpected characters at end of input", extra.span));
        }
        Ok(value)
    }

    fn value(&mut self) -> Result<Value, VariantError> {
        let tok = self.next()?;
        match tok.token {
            Token::LBrace => self.nested(tok.span, Self::map),
            Token::LBracket => self.nested(tok.span, Self::list),
            Token::Str { text, translated } => self.string(text, translated, tok.span),
            Token::Number(text) => self.number(&text, tok.span),
            Token::True => Ok(Value::Bool(true)),
            Token::False => Ok(Value::Bool(false)),
            Token::Null => Ok(Value::Null),
            Token::Ident(name) => Err(self.error(
                format!("unexpected identifier '{name}' (only map keys may be unquoted)"),
                tok.span,
            )),
            other => Err(self.error(format!("unexpected {}", describe(&other)), tok.span)),
        }
    }

    fn nested(
        &mut self,
        open: Span,
        body: fn(&mut Self, Span) -> Result<Value, VariantError>,
    ) -> Result<Value, VariantError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep", open));
        }
        self.depth += 1;
        let result = body(self, open);
        self.depth -= 1;
        result
    }

    fn list(&mut self, open: Span) -> Result<Value, VariantError> {
        let mut items = Vec::new();
        loop {
            if self.peek() == Some(&Token::RBracket) {
                break;
            }
            items.push(self.value()?);
            let tok = self.next()?;
            match tok.token {
                Token::Comma => continue,
                Token::RBracket => {
                    return Ok(Value::list(items).with_location(self.location(open.to(&tok.span))));
                }
                other => {
                    return Err(self.error(
                        format!("expected ',' or ']' in list, found {}", describe(&other)),
                        tok.span,
                    ))
                }
            }
        }
        let close = self.next()?;
        Ok(Value::list(items).with_location(self.location(open.to(&close.span))))
    }

    fn map(&mut self, open: Span) -> Result<Value, VariantError> {
        let mut entries = std::collections::BTreeMap::new();
        loop {
            let tok = self.next()?;
            let key = match tok.token {
                Token::RBrace => {
                    return Ok(Value::map(entries).with_location(self.location(open.to(&tok.span))));
                }
                Token::Str { text, translated } => self.string(text, translated, tok.span)?,
                Token::Ident(name) => Value::from(name),
                other => {
                    return Err(self.error(
                        format!("expected a map key, found {}", describe(&other)),
                        tok.span,
                    ))
                }
            };
            if entries.contains_key(&key) {
                return Err(self.error(format!("repeated key {}", key.to_debug_string()), tok.span));
            }

            let colon = self.next()?;
            if colon.token != Token::Colon {
                return Err(self.error(
                    format!("expected ':' after map key, found {}", describe(&colon.token)),
                    colon.span,
                ));
            }
            let value = self.value()?;
            entries.insert(key, value);

            let tok = self.next()?;
            match tok.token {
                Token::Comma => {}
                Token::RBrace => {
                    return Ok(Value::map(entries).with_location(self.location(open.to(&tok.span))));
                }
                other => {
                    return Err(self.error(
                        format!("expected ',' or '}}' in map, found {}", describe(&other)),
                        tok.span,
                    ))
                }
            }
        }
    }

    fn number(&self, text: &str, span: Span) -> Result<Value, VariantError> {
        let out_of_range = || self.error(format!("number {text} out of range"), span);
        let expanded;
        let text = if text.contains(['e', 'E']) {
            expanded = expand_exponent(text).ok_or_else(out_of_range)?;
            expanded.as_str()
        } else {
            text
        };
        if !text.contains('.') {
            if let Ok(n) = text.parse::<i32>() {
                return Ok(Value::Int(n));
            }
        }
        Decimal::parse(text)
            .map(Value::Decimal)
            .ok_or_else(out_of_range)
    }

    fn string(&mut self, text: String, translated: bool, span: Span) -> Result<Value, VariantError> {
        let location = self.location(span);
        if translated {
            let translation = match self.reader.translator {
                Some(translate) => translate(&text),
                None => text.clone(),
            };
            return Ok(Value::translated(&text, &translation).with_location(location));
        }
        match text.strip_prefix(EVAL_PREFIX) {
            Some(source) => self.eval_string(&text, source.trim(), span),
            None => Ok(Value::from(text).with_location(location)),
        }
    }

    fn eval_string(&mut self, text: &str, source: &str, span: Span) -> Result<Value, VariantError> {
        if let Some(value) = self.data_form(source, span)? {
            return Ok(value);
        }
        match self.reader.eval {
            EvalMode::Keep => Ok(Value::from(text).with_location(self.location(span))),
            EvalMode::Reject => Err(VariantError::Untrusted {
                what: "@eval expression".to_string(),
                trust: Trust::EVAL.name().to_string(),
            }),
            EvalMode::Evaluate(evaluator) => {
                self.ctx.check_trust(Trust::EVAL, "@eval expression")?;
                let binding = self.reader.scope.zip(closure_binding(source));
                if let Some((scope, (function, id))) = binding {
                    return self.bind_closure_later(evaluator, scope, source, function, id, span);
                }
                let value = evaluator
                    .evaluate(self.ctx, source)
                    .map_err(|e| e.with_note(format!("while evaluating @eval at {}", self.location(span))))?;
                if let (Value::Delayed(_), Some(scope)) = (&value, self.reader.scope) {
                    scope.defer(value.clone());
                }
                Ok(value)
            }
        }
    }

    /// Evaluate the function of a `bind_closure(...)` form now and bind its
    /// closure once the referenced object has been read.
    fn bind_closure_later(
        &self,
        evaluator: &dyn Evaluator,
        scope: &ReadScope<'_>,
        source: &str,
        function: &str,
        id: &str,
        span: Span,
    ) -> Result<Value, VariantError> {
        let function = evaluator.evaluate(self.ctx, function).map_err(|e| {
            e.with_note(format!("while evaluating @eval at {}", self.location(span)))
        })?;
        let uuid = parse_uuid(id).map_err(|e| VariantError::Reader {
            message: e.to_string(),
            location: self.location(span),
        })?;
        let closure = scope.reference(uuid);
        if let Value::Object(object) = &closure {
            return function.bind_closure(Rc::clone(object));
        }
        let binding = BindClosure {
            function,
            closure,
            text: source.to_string(),
        };
        let holder: ObjectRef = Rc::new(MapObject::new("closure binding", Value::empty_map())?);
        let value = Value::delayed(DelayedStore::new(Rc::new(binding), holder));
        scope.defer(value.clone());
        Ok(value)
    }

    /// `@eval` forms that describe plain data and need no evaluator: an enum,
    /// an object reference, or a literal.
    fn data_form(&mut self, source: &str, span: Span) -> Result<Option<Value>, VariantError> {
        if let Some(text) = quoted_text(source) {
            return Ok(Some(Value::from(text).with_location(self.location(span))));
        }
        if let Some(name) = source.strip_prefix("enum ") {
            let name = name.trim();
            if is_identifier(name) {
                return Ok(Some(Value::enumeration(name)));
            }
            return Ok(None);
        }
        if let Some(id) = reference_id(source) {
            let Some(scope) = self.reader.scope else {
                return Ok(None);
            };
            let uuid = parse_uuid(id).map_err(|e| {
                VariantError::Reader {
                    message: e.to_string(),
                    location: self.location(span),
                }
            })?;
            return Ok(Some(scope.reference(uuid)));
        }

        // A literal is data when the whole expression reads as a document.
        let Ok(tokens) = tokenize(source, None) else {
            return Ok(None);
        };
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep", span));
        }
        let mut inner = Parser {
            reader: self.reader,
            ctx: self.ctx,
            file: self.file.clone(),
            tokens,
            pos: 0,
            depth: self.depth + 1,
        };
        match inner.document() {
            Ok(value) => Ok(Some(value)),
            Err(VariantError::Reader { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }
}

/// Rewrite `mantissa(e|E)exponent` as plain positional digits. `None` when
/// the magnitude is far beyond anything a Decimal holds.
fn expand_exponent(text: &str) -> Option<String> {
    const MAX_SHIFT: i64 = 64;
    let (mantissa, exponent) = text.split_once(['e', 'E'])?;
    let exponent: i64 = exponent.parse().ok()?;
    let (negative, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, mantissa),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = format!("{whole}{fraction}");
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Some("0".to_string());
    }
    let leading_zeros = (digits.len() - significant.len()) as i64;
    let point = (whole.len() as i64 - leading_zeros).saturating_add(exponent);
    if point > MAX_SHIFT {
        return None;
    }
    let len = significant.len() as i64;
    let plain = if point < -MAX_SHIFT {
        "0.0".to_string()
    } else if point <= 0 {
        format!("0.{}{significant}", "0".repeat(point.unsigned_abs() as usize))
    } else if point >= len {
        format!("{significant}{}", "0".repeat((point - len) as usize))
    } else {
        let (int_part, frac_part) = significant.split_at(point as usize);
        format!("{int_part}.{frac_part}")
    };
    Some(if negative { format!("-{plain}") } else { plain })
}

/// A function whose closure is an object still being read.
struct BindClosure {
    function: Value,
    closure: Value,
    text: String,
}

impl Expression for BindClosure {
    fn evaluate(&self, _ctx: &Context, _scope: &ObjectRef) -> Result<Value, VariantError> {
        self.function.bind_closure(self.closure.as_object()?)
    }

    fn text(&self) -> &str {
        &self.text
    }
}

/// The function source and closure uuid of
/// `bind_closure(<function>, deserialize('<uuid>'))`.
fn closure_binding(source: &str) -> Option<(&str, &str)> {
    let args = source.strip_prefix("bind_closure(")?.strip_suffix(')')?;
    let (function, reference) = args.rsplit_once(',')?;
    Some((function.trim(), reference_id(reference.trim())?))
}

/// The text of `q(<string>)`, taken literally.
fn quoted_text(source: &str) -> Option<String> {
    let inner = source.strip_prefix("q(")?.strip_suffix(')')?;
    let mut tokens = tokenize(inner, None).ok()?;
    if tokens.len() != 1 {
        return None;
    }
    match tokens.pop()?.token {
        Token::Str {
            text,
            translated: false,
        } => Some(text),
        _ => None,
    }
}

/// The uuid text of `deserialize('<uuid>')`.
fn reference_id(source: &str) -> Option<&str> {
    let args = source
        .strip_prefix("deserialize(")?
        .strip_suffix(')')?
        .trim();
    args.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| args.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn describe(token: &Token) -> String {
    match token {
        Token::LBrace => "'{'".into(),
        Token::RBrace => "'}'".into(),
        Token::LBracket => "'['".into(),
        Token::RBracket => "']'".into(),
        Token::Colon => "':'".into(),
        Token::Comma => "','".into(),
        Token::Str { .. } => "string".into(),
        Token::Ident(name) => format!("identifier '{name}'"),
        Token::Number(text) => format!("number {text}"),
        Token::True => "true".into(),
        Token::False => "false".into(),
        Token::Null => "null".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varia_core::Kind;

    fn r(text: &str) -> Value {
        read(&Context::new(), text).unwrap()
    }

    fn err(text: &str) -> String {
        read(&Context::new(), text).unwrap_err().to_string()
    }

    struct Upper;

    impl Evaluator for Upper {
        fn evaluate(&self, _ctx: &Context, source: &str) -> Result<Value, VariantError> {
            Ok(Value::from(source.to_uppercase()))
        }
    }

    #[test]
    fn scalars() {
        assert_eq!(r("null"), Value::Null);
        assert_eq!(r("true"), Value::Bool(true));
        assert_eq!(r("-17"), Value::Int(-17));
        assert_eq!(r("2.5"), Value::Decimal(Decimal::parse("2.5").unwrap()));
        assert_eq!(r("'hi'"), Value::from("hi"));
    }

    #[test]
    fn ints_outside_i32_become_decimals() {
        assert_eq!(r("3000000000"), Value::Decimal(Decimal::parse("3000000000").unwrap()));
        assert!(err("99999999999999999999").contains("out of range"));
    }

    #[test]
    fn exponent_notation() {
        assert_eq!(r("1e5"), Value::Int(100_000));
        assert_eq!(r("1.5E1"), Value::Int(15));
        assert_eq!(r("-4e+2"), Value::Int(-400));
        assert_eq!(r("2.5E-3"), Value::Decimal(Decimal::parse("0.0025").unwrap()));
        assert_eq!(r("1e-9"), Value::Decimal(Decimal::from_int(0)));
        assert_eq!(r("1e10"), Value::Decimal(Decimal::parse("10000000000").unwrap()));
        assert_eq!(r("0e400"), Value::Int(0));
        assert_eq!(r("0.00012e2"), Value::Decimal(Decimal::parse("0.012").unwrap()));
        let list = r("[1e5, 2.5E-3]");
        assert_eq!(list.len().unwrap(), 2);
        assert!(err("1e300").contains("out of range"));
        assert!(err("1e99999999999999999999").contains("out of range"));
        assert!(err("1e9223372036854775807").contains("out of range"));
        assert_eq!(r("1e-9223372036854775807"), Value::Decimal(Decimal::from_int(0)));
    }

    #[test]
    fn relaxed_maps() {
        let v = r("{\n  # settings\n  name: 'x', \"size\": 3, // trailing\n}");
        assert_eq!(v.get_attr(&Value::from("name")).unwrap(), Value::from("x"));
        assert_eq!(v.get_attr(&Value::from("size")).unwrap(), Value::Int(3));
        assert_eq!(v.len().unwrap(), 2);
    }

    #[test]
    fn lists_with_trailing_commas() {
        let v = r("[1, [2, 3,], {},]");
        assert_eq!(v.len().unwrap(), 3);
        assert_eq!(v.index(1).unwrap().len().unwrap(), 2);
        assert_eq!(r("[]").len().unwrap(), 0);
    }

    #[test]
    fn locations_are_attached() {
        let ctx = Context::new();
        let v = Reader::new()
            .file("units.cfg")
            .read(&ctx, "{\n  a: [1,\n    2],\n}")
            .unwrap();
        let list = v.get_attr(&Value::from("a")).unwrap();
        let loc = list.location().unwrap();
        assert_eq!(loc.to_string(), "units.cfg:2:6");
        assert_eq!(loc.span.end_line, 3);
        assert_eq!(v.location().unwrap().span.line, 1);
    }

    #[test]
    fn structural_errors() {
        assert!(err("").contains("unexpected end of input"));
        assert!(err("[1, 2").contains("unexpected end of input"));
        assert!(err("1 2").contains("unexpected characters at end of input"));
        assert!(err("{a 1}").contains("expected ':'"));
        assert!(err("[1 2]").contains("expected ',' or ']'"));
        assert!(err("[bare]").contains("unexpected identifier 'bare'"));
        assert!(err("{a: 1, a: 2}").contains("repeated key \"a\""));
        assert!(err("{1: 2}").contains("expected a map key"));
    }

    #[test]
    fn error_locations() {
        let ctx = Context::new();
        let e = Reader::new()
            .file("f.cfg")
            .read(&ctx, "{\n a: 1\n b: 2}")
            .unwrap_err();
        assert_eq!(
            e.to_string(),
            "Reader error at f.cfg:3:2: expected ',' or '}' in map, found identifier 'b'"
        );
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let deep = "[".repeat(MAX_DEPTH + 1) + &"]".repeat(MAX_DEPTH + 1);
        assert!(err(&deep).contains("nesting too deep"));
        let fine = "[".repeat(64) + &"]".repeat(64);
        assert!(read(&Context::new(), &fine).is_ok());
    }

    #[test]
    fn translated_strings() {
        let ctx = Context::new();
        let french = |s: &str| format!("le {s}");
        let v = Reader::new().translator(&french).read(&ctx, "~cat~").unwrap();
        assert_eq!(v.as_str().unwrap(), "le cat");
        assert_eq!(v.as_string_store().unwrap().translated_from(), Some("cat"));
        assert_eq!(r("~cat~").as_str().unwrap(), "cat");
    }

    #[test]
    fn eval_data_forms_decode_without_an_evaluator() {
        assert_eq!(r("'@eval enum north'"), Value::enumeration("north"));
        assert_eq!(r("'@eval [1, 2]'"), Value::list(vec![Value::Int(1), Value::Int(2)]));
        let key = r("{'@eval 3': 'three'}");
        assert_eq!(key.get_attr(&Value::Int(3)).unwrap(), Value::from("three"));
        assert_eq!(r("\"@eval q('@eval 3')\""), Value::from("@eval 3"));
        assert_eq!(r("'@eval q(\"x\")'"), Value::from("x"));
        // Anything but a single string stays an expression.
        assert_eq!(r("'@eval q(1)'"), Value::from("@eval q(1)"));
    }

    #[test]
    fn eval_expressions_follow_the_mode() {
        let ctx = Context::with_config(varia_core::RuntimeConfig::default().with_trust(Trust::ALL));
        let kept = r("'@eval a + b'");
        assert_eq!(kept.as_str().unwrap(), "@eval a + b");

        let rejected = Reader::new()
            .eval(EvalMode::Reject)
            .read(&ctx, "'@eval a + b'")
            .unwrap_err();
        assert!(matches!(rejected, VariantError::Untrusted { .. }));

        let upper = Upper;
        let v = Reader::new()
            .eval(EvalMode::Evaluate(&upper))
            .read(&ctx, "'@eval a + b'")
            .unwrap();
        assert_eq!(v.as_str().unwrap(), "A + B");
    }

    #[test]
    fn evaluation_needs_eval_trust() {
        let ctx = Context::new();
        let upper = Upper;
        let e = Reader::new()
            .eval(EvalMode::Evaluate(&upper))
            .read(&ctx, "'@eval a + b'")
            .unwrap_err();
        assert!(matches!(e, VariantError::Untrusted { .. }));
        assert_eq!(e.to_string(), "Untrusted source: @eval expression requires 'eval' trust");
    }

    #[test]
    fn references_without_a_scope_stay_text() {
        let v = r("\"@eval deserialize('6f1b8a52-3c34-4c55-8a53-2f6d1d3f0a11')\"");
        assert_eq!(v.kind(), Kind::String);
    }

    #[test]
    fn references_share_one_placeholder() {
        let ctx = Context::new();
        let scope = ReadScope::new();
        let doc = "[\"@eval deserialize('6f1b8a52-3c34-4c55-8a53-2f6d1d3f0a11')\", \
                   \"@eval deserialize('6f1b8a52-3c34-4c55-8a53-2f6d1d3f0a11')\"]";
        let v = Reader::new().scope(&scope).read(&ctx, doc).unwrap();
        let (Value::ObjectLoading(a), Value::ObjectLoading(b)) =
            (v.index(0).unwrap(), v.index(1).unwrap())
        else {
            panic!("expected placeholders, got {v}");
        };
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(scope.pending_count(), 1);
    }
}
