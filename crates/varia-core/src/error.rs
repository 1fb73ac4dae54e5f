use std::fmt;
use std::rc::Rc;

use crate::value::Value;

/// Longest value rendering embedded in an error message, in characters.
pub const RENDER_LIMIT: usize = 120;

/// Check the argument count of a native body, returning `VariantError::Arity` on mismatch.
///
/// ```ignore
/// check_arity!(args, "clamp", 3);      // exactly 3
/// check_arity!(args, "range", 1..=3);  // 1 to 3 inclusive
/// ```
#[macro_export]
macro_rules! check_arity {
    ($args:expr, $name:expr, $exact:literal) => {
        if $args.len() != $exact {
            return Err($crate::VariantError::arity(
                $name,
                stringify!($exact),
                $args.len(),
            ));
        }
    };
    ($args:expr, $name:expr, $lo:literal ..= $hi:literal) => {
        if $args.len() < $lo || $args.len() > $hi {
            return Err($crate::VariantError::arity(
                $name,
                concat!(stringify!($lo), "-", stringify!($hi)),
                $args.len(),
            ));
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub col: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl Span {
    /// Create a point span (start == end).
    pub fn point(line: usize, col: usize) -> Self {
        Span {
            line,
            col,
            end_line: line,
            end_col: col,
        }
    }

    pub fn new(line: usize, col: usize, end_line: usize, end_col: usize) -> Self {
        Span {
            line,
            col,
            end_line,
            end_col,
        }
    }

    /// Create a span from the start of `self` to the end of `other`.
    pub fn to(self, other: &Span) -> Span {
        Span {
            line: self.line,
            col: self.col,
            end_line: other.end_line,
            end_col: other.end_col,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Where a container value or an executable body was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: Option<Rc<str>>,
    pub span: Span,
}

impl SourceLocation {
    pub fn new(file: Option<Rc<str>>, span: Span) -> Self {
        SourceLocation { file, span }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{file}:{}", self.span),
            None => write!(f, "<input>:{}", self.span),
        }
    }
}

/// A single frame in a call stack trace.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub name: String,
    pub location: Option<SourceLocation>,
}

impl CallFrame {
    pub fn new(name: impl Into<String>, location: Option<SourceLocation>) -> Self {
        CallFrame {
            name: name.into(),
            location,
        }
    }
}

/// A captured stack trace (list of call frames, innermost first).
#[derive(Debug, Clone)]
pub struct StackTrace(pub Vec<CallFrame>);

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.0 {
            write!(f, "  at {}", frame.name)?;
            match &frame.location {
                Some(loc) => writeln!(f, " ({loc})")?,
                None => writeln!(f, " (no source location available)")?,
            }
        }
        Ok(())
    }
}

fn index_range(start: i64, end: i64) -> String {
    if end == start.saturating_add(1) {
        format!("index {start}")
    } else {
        format!("range [{start}, {end})")
    }
}

fn rendered(value: &Option<String>) -> String {
    value
        .as_ref()
        .map(|v| format!(" ({v})"))
        .unwrap_or_default()
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum VariantError {
    #[error("Type error: expected {expected}, got {got}{}", rendered(rendering))]
    TypeMismatch {
        expected: String,
        got: String,
        rendering: Option<String>,
        location: Option<SourceLocation>,
    },

    #[error("Index error: {} out of bounds for size {size}", index_range(*start, *end))]
    Index { start: i64, end: i64, size: usize },

    #[error("Division by zero")]
    DivideByZero,

    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    #[error("Arity error: {name} expects {expected} args, got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("Argument type error: {name} argument {slot} expected {expected}, got {got}{}", rendered(rendering))]
    ArgumentType {
        name: String,
        slot: usize,
        expected: String,
        got: String,
        rendering: Option<String>,
    },

    #[error("Return type error: {name} declared {expected}, returned {got}{}", rendered(rendering))]
    ReturnType {
        name: String,
        expected: String,
        got: String,
        rendering: Option<String>,
    },

    #[error("No overload accepts ({}); candidates: {}", supplied.join(", "), candidates.join(" | "))]
    OverloadResolution {
        candidates: Vec<String>,
        supplied: Vec<String>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Reader error at {location}: {message}")]
    Reader {
        message: String,
        location: SourceLocation,
    },

    #[error("Untrusted source: {what} requires '{trust}' trust")]
    Untrusted { what: String, trust: String },

    #[error("Eval error: {0}")]
    Eval(String),

    #[error("{inner}")]
    WithTrace {
        inner: Box<VariantError>,
        trace: StackTrace,
    },

    #[error("{inner}")]
    WithContext {
        inner: Box<VariantError>,
        hint: Option<String>,
        note: Option<String>,
    },
}

/// Render a value for an error message, cut at `RENDER_LIMIT` characters.
pub fn render_for_error(value: &Value) -> String {
    let display = value.to_debug_string();
    if display.chars().count() > RENDER_LIMIT {
        let cut: String = display.chars().take(RENDER_LIMIT - 1).collect();
        format!("{cut}…")
    } else {
        display
    }
}

impl VariantError {
    pub fn eval(msg: impl Into<String>) -> Self {
        VariantError::Eval(msg.into())
    }

    pub fn overflow(msg: impl Into<String>) -> Self {
        VariantError::Overflow(msg.into())
    }

    /// A kind-specific accessor was used on a value of another kind.
    pub fn type_mismatch(expected: impl Into<String>, value: &Value) -> Self {
        VariantError::TypeMismatch {
            expected: expected.into(),
            got: value.type_name().to_string(),
            rendering: Some(render_for_error(value)),
            location: value.location().cloned(),
        }
    }

    pub fn arity(name: impl Into<String>, expected: impl Into<String>, got: usize) -> Self {
        VariantError::Arity {
            name: name.into(),
            expected: expected.into(),
            got,
        }
    }

    pub fn index(start: i64, end: i64, size: usize) -> Self {
        VariantError::Index { start, end, size }
    }

    /// Attach a hint (actionable suggestion) to this error.
    pub fn with_hint(self, hint: impl Into<String>) -> Self {
        match self {
            VariantError::WithContext { inner, note, .. } => VariantError::WithContext {
                inner,
                hint: Some(hint.into()),
                note,
            },
            other => VariantError::WithContext {
                inner: Box::new(other),
                hint: Some(hint.into()),
                note: None,
            },
        }
    }

    /// Attach a note (extra context) to this error.
    pub fn with_note(self, note: impl Into<String>) -> Self {
        match self {
            VariantError::WithContext { inner, hint, .. } => VariantError::WithContext {
                inner,
                hint,
                note: Some(note.into()),
            },
            other => VariantError::WithContext {
                inner: Box::new(other),
                hint: None,
                note: Some(note.into()),
            },
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            VariantError::WithContext { hint, .. } => hint.as_deref(),
            VariantError::WithTrace { inner, .. } => inner.hint(),
            _ => None,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match self {
            VariantError::WithContext { note, .. } => note.as_deref(),
            VariantError::WithTrace { inner, .. } => inner.note(),
            _ => None,
        }
    }

    /// Wrap this error with a stack trace (no-op if already wrapped).
    pub fn with_stack_trace(self, trace: StackTrace) -> Self {
        if trace.0.is_empty() {
            return self;
        }
        match self {
            VariantError::WithTrace { .. } => self,
            VariantError::WithContext { inner, hint, note } => VariantError::WithContext {
                inner: Box::new(inner.with_stack_trace(trace)),
                hint,
                note,
            },
            other => VariantError::WithTrace {
                inner: Box::new(other),
                trace,
            },
        }
    }

    pub fn stack_trace(&self) -> Option<&StackTrace> {
        match self {
            VariantError::WithTrace { trace, .. } => Some(trace),
            VariantError::WithContext { inner, .. } => inner.stack_trace(),
            _ => None,
        }
    }

    pub fn inner(&self) -> &VariantError {
        match self {
            VariantError::WithTrace { inner, .. } => inner.inner(),
            VariantError::WithContext { inner, .. } => inner.inner(),
            other => other,
        }
    }

    /// The nearest known source location: the error's own, else the innermost located frame.
    pub fn location(&self) -> Option<&SourceLocation> {
        let own = match self.inner() {
            VariantError::TypeMismatch { location, .. } => location.as_ref(),
            VariantError::Reader { location, .. } => Some(location),
            _ => None,
        };
        own.or_else(|| {
            self.stack_trace()
                .and_then(|trace| trace.0.iter().find_map(|frame| frame.location.as_ref()))
        })
    }

    /// Full diagnostic text: message, location, note, hint and call stack.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        match self.location() {
            Some(loc) => out.push_str(&format!("\n  --> {loc}")),
            None => out.push_str("\n  (no source location available)"),
        }
        if let Some(note) = self.note() {
            out.push_str(&format!("\n  note: {note}"));
        }
        if let Some(hint) = self.hint() {
            out.push_str(&format!("\n  hint: {hint}"));
        }
        if let Some(trace) = self.stack_trace() {
            out.push('\n');
            out.push_str(trace.to_string().trim_end());
        }
        out
    }
}
