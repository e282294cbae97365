//! Call targets: dotted paths naming a function in the engine's globals.
//!
//! A target such as `main.sqrt` is looked up segment by segment starting
//! from the global object, at call time. Nothing is registered ahead of
//! time, so whether a target resolves depends on what scripts have run.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

static SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\p{L}_$][\p{L}\p{N}_$]*$").expect("segment pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("empty call target")]
    Empty,
    #[error("invalid segment {segment:?} in call target {path:?}")]
    InvalidSegment { path: String, segment: String },
}

/// A parsed, validated call target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallTarget {
    path: String,
}

impl CallTarget {
    pub fn parse(path: &str) -> Result<CallTarget, TargetError> {
        if path.is_empty() {
            return Err(TargetError::Empty);
        }
        if let Some(bad) = path.split('.').find(|s| !SEGMENT.is_match(s)) {
            return Err(TargetError::InvalidSegment {
                path: path.to_string(),
                segment: bad.to_string(),
            });
        }
        Ok(CallTarget { path: path.to_string() })
    }

    /// The full dotted path, as passed to the guest.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('.')
    }

    /// The final segment: the function's own name.
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    /// JavaScript expression evaluating to the target, or `undefined` when
    /// any intermediate object is missing.
    ///
    /// Segments are emitted as JSON string literals inside bracket accesses,
    /// so no segment can break out of the expression.
    pub fn js_expression(&self) -> String {
        let mut expr = String::from("globalThis");
        for segment in self.segments() {
            // A str always serializes.
            let quoted = serde_json::to_string(segment).unwrap_or_default();
            expr.push_str("?.[");
            expr.push_str(&quoted);
            expr.push(']');
        }
        expr
    }

    /// Script that completes normally only if the target is callable.
    pub fn probe_script(&self) -> String {
        format!(
            "if (typeof {} !== \"function\") {{ throw new ReferenceError({}); }}\n",
            self.js_expression(),
            serde_json::to_string(&format!("{} is not a function", self.path)).unwrap_or_default(),
        )
    }
}

impl FromStr for CallTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CallTarget::parse(s)
    }
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Outcome of the resolution step that precedes every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<C> {
    /// The target names a callable right now.
    Found(C),
    NotFound,
}

impl<C> Resolution<C> {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }

    pub fn found(self) -> Option<C> {
        match self {
            Resolution::Found(c) => Some(c),
            Resolution::NotFound => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("foo")]
    #[case("main.sqrt")]
    #[case("urllib.parse.urlparse")]
    #[case("$jq._private2")]
    #[case("café.naïve")]
    fn valid_targets(#[case] path: &str) {
        let target = CallTarget::parse(path).unwrap();
        assert_eq!(target.as_str(), path);
        assert_eq!(target.segments().collect::<Vec<_>>().join("."), path);
    }

    #[rstest]
    #[case("", TargetError::Empty)]
    #[case("main.", TargetError::InvalidSegment { path: "main.".into(), segment: "".into() })]
    #[case(".foo", TargetError::InvalidSegment { path: ".foo".into(), segment: "".into() })]
    #[case("a..b", TargetError::InvalidSegment { path: "a..b".into(), segment: "".into() })]
    #[case("1up", TargetError::InvalidSegment { path: "1up".into(), segment: "1up".into() })]
    #[case("foo bar", TargetError::InvalidSegment { path: "foo bar".into(), segment: "foo bar".into() })]
    #[case("a.b\"]", TargetError::InvalidSegment { path: "a.b\"]".into(), segment: "b\"]".into() })]
    fn invalid_targets(#[case] path: &str, #[case] expected: TargetError) {
        assert_eq!(CallTarget::parse(path), Err(expected));
    }

    #[test]
    fn name_is_last_segment() {
        assert_eq!(CallTarget::parse("main.sqrt").unwrap().name(), "sqrt");
        assert_eq!(CallTarget::parse("foo").unwrap().name(), "foo");
    }

    #[test]
    fn js_expression_quotes_segments() {
        let target = CallTarget::parse("main.sqrt").unwrap();
        assert_eq!(target.js_expression(), r#"globalThis?.["main"]?.["sqrt"]"#);
    }

    #[test]
    fn probe_script_throws_for_non_functions() {
        let script = CallTarget::parse("foo").unwrap().probe_script();
        assert_eq!(
            script,
            "if (typeof globalThis?.[\"foo\"] !== \"function\") { throw new ReferenceError(\"foo is not a function\"); }\n"
        );
    }

    #[test]
    fn resolution_accessors() {
        assert!(Resolution::Found(1).is_found());
        assert_eq!(Resolution::Found(1).found(), Some(1));
        assert_eq!(Resolution::<u8>::NotFound.found(), None);
    }
}
