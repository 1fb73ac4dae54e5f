use std::env;
use std::fmt;

use crate::error::VariantError;

/// Capabilities granted to the source of a document being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trust(u32);

impl Trust {
    pub const NONE: Trust = Trust(0);
    /// Run embedded `@eval` expressions through a caller-supplied evaluator.
    pub const EVAL: Trust = Trust(1 << 0);
    /// Construct registered host objects from `serialized_objects` payloads.
    pub const OBJECTS: Trust = Trust(1 << 1);

    pub const ALL: Trust = Trust(Self::EVAL.0 | Self::OBJECTS.0);

    pub fn contains(self, other: Trust) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Trust) -> Trust {
        Trust(self.0 | other.0)
    }

    pub fn name(self) -> &'static str {
        match self {
            Trust::NONE => "none",
            Trust::EVAL => "eval",
            Trust::OBJECTS => "objects",
            Trust::ALL => "all",
            _ => "unknown",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Trust::NONE),
            "eval" => Some(Trust::EVAL),
            "objects" => Some(Trust::OBJECTS),
            "all" => Some(Trust::ALL),
            _ => None,
        }
    }

    /// Parse a comma separated list such as `"eval,objects"`.
    pub fn parse_list(s: &str) -> Result<Self, VariantError> {
        s.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .try_fold(Trust::NONE, |acc, name| {
                Trust::from_name(name)
                    .map(|t| acc.union(t))
                    .ok_or_else(|| VariantError::eval(format!("unknown trust level '{name}'")))
            })
    }

    /// Fail with `Untrusted` unless `required` is granted.
    pub fn check(self, required: Trust, what: &str) -> Result<(), VariantError> {
        if self.contains(required) {
            Ok(())
        } else {
            Err(VariantError::Untrusted {
                what: what.to_string(),
                trust: required.name().to_string(),
            })
        }
    }
}

impl fmt::Display for Trust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_call_depth: usize,
    pub trust: Trust,
}

impl RuntimeConfig {
    pub const DEFAULT_MAX_CALL_DEPTH: usize = 4096;

    pub fn from_env() -> Self {
        Self {
            max_call_depth: env::var("VARIA_MAX_CALL_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Self::DEFAULT_MAX_CALL_DEPTH),
            trust: env::var("VARIA_TRUST")
                .ok()
                .and_then(|v| Trust::parse_list(&v).ok())
                .unwrap_or(Trust::OBJECTS),
        }
    }

    pub fn with_trust(mut self, trust: Trust) -> Self {
        self.trust = trust;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_call_depth: Self::DEFAULT_MAX_CALL_DEPTH,
            trust: Trust::OBJECTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_names_round_trip() {
        for t in [Trust::NONE, Trust::EVAL, Trust::OBJECTS, Trust::ALL] {
            assert_eq!(Trust::from_name(t.name()), Some(t));
        }
        assert_eq!(Trust::from_name("root"), None);
    }

    #[test]
    fn trust_lists() {
        assert_eq!(Trust::parse_list("eval, objects").unwrap(), Trust::ALL);
        assert_eq!(Trust::parse_list("").unwrap(), Trust::NONE);
        assert!(Trust::parse_list("eval,bogus").is_err());
    }

    #[test]
    fn check_reports_missing_trust() {
        let err = Trust::OBJECTS.check(Trust::EVAL, "@eval expression").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Untrusted source: @eval expression requires 'eval' trust"
        );
        assert!(Trust::ALL.check(Trust::EVAL, "x").is_ok());
    }

    #[test]
    fn defaults() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.max_call_depth, 4096);
        assert!(cfg.trust.contains(Trust::OBJECTS));
        assert!(!cfg.trust.contains(Trust::EVAL));
    }
}
