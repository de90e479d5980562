//! `(<expr>) ? <yes> : <no>` text macro
//!
//! Non-numeric patch payloads can branch on a formula without a string-typed
//! expression grammar: the condition is evaluated, and one of the two literal
//! payloads is returned verbatim.

use std::sync::LazyLock;

use regex::Regex;

use super::context::{Context, is_truthy};
use super::parse;
use crate::error::ExprError;

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\((?P<cond>.+?)\)\s*\?(?P<branches>.*)$").expect("ternary pattern compiles")
});

/// Split a macro into condition and the two literals. The literals are
/// separated by the first `:` outside brackets, braces, parens and quotes.
fn split(text: &str) -> Option<(&str, &str, &str)> {
    let caps = HEADER.captures(text)?;
    let cond = caps.name("cond")?.as_str();
    let branches = caps.name("branches")?.as_str();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in branches.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => return Some((cond, branches[..i].trim(), branches[i + 1..].trim())),
            _ => {}
        }
    }
    None
}

/// Whether `text` has the shape of a ternary macro
pub fn is_ternary(text: &str) -> bool {
    split(text).is_some()
}

/// Resolve a ternary macro. Returns `None` when `text` is not one, so callers
/// can fall back to treating it as a plain payload.
pub fn resolve_ternary(text: &str, ctx: &dyn Context) -> Result<Option<String>, ExprError> {
    let Some((cond, yes, no)) = split(text) else {
        return Ok(None);
    };

    let condition = super::evaluate(&parse(cond)?, ctx)?;
    let branch = if is_truthy(condition) { yes } else { no };
    Ok(Some(branch.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BooleanContext, CombinedContext, MathContext};

    struct Flag(f64);

    impl Context for Flag {
        fn resolvable(&self, name: &str) -> bool {
            name == "enableFeature"
        }

        fn resolve(&self, name: &str, _args: &[f64]) -> Result<f64, ExprError> {
            if !self.resolvable(name) {
                return Err(ExprError::Unresolvable(name.to_string()));
            }
            Ok(self.0)
        }
    }

    #[test]
    fn test_truthy_condition_picks_first_literal() {
        let on = Flag(1.0);
        assert_eq!(resolve_ternary("(enableFeature) ? 10 : 0", &on).unwrap(), Some("10".to_string()));

        let off = Flag(0.0);
        assert_eq!(resolve_ternary("(enableFeature) ? 10 : 0", &off).unwrap(), Some("0".to_string()));
    }

    #[test]
    fn test_literals_are_not_evaluated() {
        let on = Flag(1.0);
        let resolved = resolve_ternary("(enableFeature) ? 1 + 1 : nothing here", &on).unwrap();
        assert_eq!(resolved.as_deref(), Some("1 + 1"));

        let off = Flag(0.0);
        let resolved = resolve_ternary("(enableFeature) ? 1 + 1 : nothing here", &off).unwrap();
        assert_eq!(resolved.as_deref(), Some("nothing here"));
    }

    #[test]
    fn test_condition_can_use_functions() {
        let flag = Flag(3.0);
        let math = MathContext;
        let booleans = BooleanContext;
        let ctx = CombinedContext::new(vec![&flag, &math, &booleans]);
        let out = resolve_ternary("(and(enableFeature > 2, not(false))) ? yes : no", &ctx).unwrap();
        assert_eq!(out.as_deref(), Some("yes"));
    }

    #[test]
    fn test_plain_text_is_not_a_macro() {
        let flag = Flag(1.0);
        assert_eq!(resolve_ternary("someSetting", &flag).unwrap(), None);
        assert!(!is_ternary("a ? b : c"));
    }

    #[test]
    fn test_literals_may_contain_colons() {
        let on = Flag(1.0);
        let resolved = resolve_ternary(r#"(enableFeature) ? {"a": 1, "b": [2, 3]} : {}"#, &on).unwrap();
        assert_eq!(resolved.as_deref(), Some(r#"{"a": 1, "b": [2, 3]}"#));

        let resolved = resolve_ternary(r#"(enableFeature) ? "12:30" : "never""#, &on).unwrap();
        assert_eq!(resolved.as_deref(), Some(r#""12:30""#));

        let off = Flag(0.0);
        let resolved = resolve_ternary(r#"(enableFeature) ? {"a": 1} : {"b": "x:y"}"#, &off).unwrap();
        assert_eq!(resolved.as_deref(), Some(r#"{"b": "x:y"}"#));
    }

    #[test]
    fn test_missing_separator_is_not_a_macro() {
        let flag = Flag(1.0);
        assert_eq!(resolve_ternary(r#"(enableFeature) ? {"a": 1}"#, &flag).unwrap(), None);
    }

    #[test]
    fn test_unknown_name_in_condition_fails() {
        let flag = Flag(1.0);
        let err = resolve_ternary("(missing) ? a : b", &flag).unwrap_err();
        assert_eq!(err, ExprError::Unresolvable("missing".to_string()));
    }
}
