//! Named-value contexts formulas are evaluated against
//!
//! A context answers two questions: can it resolve a name, and what is the
//! value of that name applied to some arguments. Several contexts chain into
//! a [`CombinedContext`] where the first one that can resolve a name wins.

use std::collections::HashMap;

use crate::config::Setting;
use crate::constants::math::EPSILON;
use crate::error::ExprError;

pub trait Context {
    fn resolvable(&self, name: &str) -> bool;
    fn resolve(&self, name: &str, args: &[f64]) -> Result<f64, ExprError>;
}

/// Boolean coercion shared by formulas and boolean patches
pub fn is_truthy(value: f64) -> bool {
    value.abs() > EPSILON
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

fn expect_args(name: &str, args: &[f64], expected: usize) -> Result<(), ExprError> {
    if args.len() != expected {
        return Err(ExprError::Arity {
            name: name.to_string(),
            expected: expected.to_string(),
            got: args.len(),
        });
    }
    Ok(())
}

fn expect_at_least(name: &str, args: &[f64], min: usize) -> Result<(), ExprError> {
    if args.len() < min {
        return Err(ExprError::Arity {
            name: name.to_string(),
            expected: format!("at least {min}"),
            got: args.len(),
        });
    }
    Ok(())
}

/// First-match-wins chain of contexts
pub struct CombinedContext<'a> {
    contexts: Vec<&'a dyn Context>,
}

impl<'a> CombinedContext<'a> {
    pub fn new(contexts: Vec<&'a dyn Context>) -> Self {
        Self { contexts }
    }

    pub fn push(&mut self, ctx: &'a dyn Context) {
        self.contexts.push(ctx);
    }
}

impl Context for CombinedContext<'_> {
    fn resolvable(&self, name: &str) -> bool {
        self.contexts.iter().any(|ctx| ctx.resolvable(name))
    }

    fn resolve(&self, name: &str, args: &[f64]) -> Result<f64, ExprError> {
        match self.contexts.iter().find(|ctx| ctx.resolvable(name)) {
            Some(ctx) => ctx.resolve(name, args),
            None => Err(ExprError::Unresolvable(name.to_string())),
        }
    }
}

/// Standard math functions and constants
#[derive(Debug, Clone, Copy, Default)]
pub struct MathContext;

const MATH_NAMES: &[&str] = &[
    "pi", "e", "abs", "floor", "ceil", "round", "trunc", "sqrt", "exp", "ln", "log", "log10", "sin",
    "cos", "tan", "sign", "pow", "atan2", "min", "max", "clamp",
];

impl Context for MathContext {
    fn resolvable(&self, name: &str) -> bool {
        MATH_NAMES.contains(&name)
    }

    fn resolve(&self, name: &str, args: &[f64]) -> Result<f64, ExprError> {
        let unary = |f: fn(f64) -> f64| -> Result<f64, ExprError> {
            expect_args(name, args, 1)?;
            Ok(f(args[0]))
        };

        match name {
            "pi" => expect_args(name, args, 0).map(|_| std::f64::consts::PI),
            "e" => expect_args(name, args, 0).map(|_| std::f64::consts::E),
            "abs" => unary(f64::abs),
            "floor" => unary(f64::floor),
            "ceil" => unary(f64::ceil),
            "round" => unary(f64::round),
            "trunc" => unary(f64::trunc),
            "sqrt" => unary(f64::sqrt),
            "exp" => unary(f64::exp),
            "ln" => unary(f64::ln),
            "log10" => unary(f64::log10),
            "sin" => unary(f64::sin),
            "cos" => unary(f64::cos),
            "tan" => unary(f64::tan),
            "sign" => unary(|x| if x == 0.0 { 0.0 } else { x.signum() }),
            "log" => match args {
                [x] => Ok(x.ln()),
                [x, base] => Ok(x.log(*base)),
                _ => Err(ExprError::Arity {
                    name: name.to_string(),
                    expected: "1 or 2".to_string(),
                    got: args.len(),
                }),
            },
            "pow" => expect_args(name, args, 2).map(|_| args[0].powf(args[1])),
            "atan2" => expect_args(name, args, 2).map(|_| args[0].atan2(args[1])),
            "min" => expect_at_least(name, args, 1).map(|_| args.iter().copied().fold(f64::INFINITY, f64::min)),
            "max" => expect_at_least(name, args, 1).map(|_| args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            "clamp" => expect_args(name, args, 3).map(|_| args[0].max(args[1]).min(args[2])),
            _ => Err(ExprError::Unresolvable(name.to_string())),
        }
    }
}

/// `if/not/and/or/true/false` over floats; near-zero is false
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanContext;

impl Context for BooleanContext {
    fn resolvable(&self, name: &str) -> bool {
        matches!(name, "if" | "not" | "and" | "or" | "true" | "false")
    }

    fn resolve(&self, name: &str, args: &[f64]) -> Result<f64, ExprError> {
        match name {
            "true" => expect_args(name, args, 0).map(|_| 1.0),
            "false" => expect_args(name, args, 0).map(|_| 0.0),
            "not" => expect_args(name, args, 1).map(|_| flag(!is_truthy(args[0]))),
            "if" => expect_args(name, args, 3).map(|_| if is_truthy(args[0]) { args[1] } else { args[2] }),
            "and" => expect_at_least(name, args, 1).map(|_| flag(args.iter().all(|v| is_truthy(*v)))),
            "or" => expect_at_least(name, args, 1).map(|_| flag(args.iter().any(|v| is_truthy(*v)))),
            _ => Err(ExprError::Unresolvable(name.to_string())),
        }
    }
}

/// Numeric view of settings, looked up by code. Earlier layers shadow later ones.
pub struct SettingsContext<'a> {
    layers: Vec<&'a HashMap<String, Setting>>,
}

impl<'a> SettingsContext<'a> {
    pub fn new(settings: &'a HashMap<String, Setting>) -> Self {
        Self { layers: vec![settings] }
    }

    pub fn layered(layers: Vec<&'a HashMap<String, Setting>>) -> Self {
        Self { layers }
    }

    fn lookup(&self, name: &str) -> Option<f64> {
        self.layers
            .iter()
            .find_map(|layer| layer.get(name))
            .and_then(Setting::numeric_value)
    }
}

impl Context for SettingsContext<'_> {
    fn resolvable(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn resolve(&self, name: &str, args: &[f64]) -> Result<f64, ExprError> {
        let value = self.lookup(name).ok_or_else(|| ExprError::Unresolvable(name.to_string()))?;
        expect_args(name, args, 0)?;
        Ok(value)
    }
}

/// Exposes exactly one variable, `value`
#[derive(Debug, Clone, Copy)]
pub struct ValueContext {
    value: f64,
}

impl ValueContext {
    pub const NAME: &'static str = "value";

    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl Context for ValueContext {
    fn resolvable(&self, name: &str) -> bool {
        name == Self::NAME
    }

    fn resolve(&self, name: &str, args: &[f64]) -> Result<f64, ExprError> {
        if name != Self::NAME {
            return Err(ExprError::Unresolvable(name.to_string()));
        }
        expect_args(name, args, 0)?;
        Ok(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SettingType, Validation};
    use serde_json::json;

    fn settings() -> HashMap<String, Setting> {
        let mut map = HashMap::new();
        map.insert(
            "multiplier".to_string(),
            Setting::new("mod", "multiplier", SettingType::Float, json!(2.0)),
        );
        map.insert(
            "enabled".to_string(),
            Setting::new("mod", "enabled", SettingType::Boolean, json!(true)),
        );
        map.insert(
            "label".to_string(),
            Setting::new("mod", "label", SettingType::String, json!("hi")),
        );
        map
    }

    #[test]
    fn test_truthiness_uses_epsilon() {
        assert!(!is_truthy(0.0));
        assert!(!is_truthy(1e-11));
        assert!(!is_truthy(-1e-11));
        assert!(is_truthy(1e-9));
        assert!(is_truthy(-3.0));
    }

    #[test]
    fn test_settings_context_coerces_booleans() {
        let map = settings();
        let ctx = SettingsContext::new(&map);
        assert_eq!(ctx.resolve("enabled", &[]).unwrap(), 1.0);
        assert_eq!(ctx.resolve("multiplier", &[]).unwrap(), 2.0);
        assert!(!ctx.resolvable("label"));
        assert!(!ctx.resolvable("nope"));
    }

    #[test]
    fn test_settings_context_rejects_arguments() {
        let map = settings();
        let ctx = SettingsContext::new(&map);
        assert!(matches!(ctx.resolve("multiplier", &[1.0]), Err(ExprError::Arity { .. })));
    }

    #[test]
    fn test_layers_shadow_in_order() {
        let base = settings();
        let mut overrides = HashMap::new();
        let mut local = Setting::new("mod", "multiplier", SettingType::Float, json!(2.0));
        local.set_value(json!(5.0));
        overrides.insert("multiplier".to_string(), local);

        let ctx = SettingsContext::layered(vec![&overrides, &base]);
        assert_eq!(ctx.resolve("multiplier", &[]).unwrap(), 5.0);
        assert_eq!(ctx.resolve("enabled", &[]).unwrap(), 1.0);
    }

    #[test]
    fn test_combined_first_match_wins() {
        let first = ValueContext::new(7.0);
        let second = ValueContext::new(99.0);
        let ctx = CombinedContext::new(vec![&first, &second]);
        assert_eq!(ctx.resolve("value", &[]).unwrap(), 7.0);
        assert!(matches!(ctx.resolve("other", &[]), Err(ExprError::Unresolvable(_))));
    }

    #[test]
    fn test_wrong_arity_is_error() {
        let math = MathContext;
        assert!(matches!(math.resolve("sqrt", &[]), Err(ExprError::Arity { .. })));
        assert!(matches!(math.resolve("max", &[]), Err(ExprError::Arity { .. })));
        assert!(matches!(BooleanContext.resolve("if", &[1.0, 2.0]), Err(ExprError::Arity { .. })));
    }

    #[test]
    fn test_math_functions() {
        let math = MathContext;
        assert_eq!(math.resolve("clamp", &[15.0, 0.0, 10.0]).unwrap(), 10.0);
        assert_eq!(math.resolve("log", &[8.0, 2.0]).unwrap(), 3.0);
        assert_eq!(math.resolve("sign", &[-2.5]).unwrap(), -1.0);
        assert_eq!(math.resolve("min", &[3.0, -1.0]).unwrap(), -1.0);
    }

    #[test]
    fn test_mapping_setting_is_numeric_through_mapped_value() {
        let mut setting = Setting::new("mod", "difficulty", SettingType::String, json!(1.5));
        let mut mapping = serde_json::Map::new();
        mapping.insert("easy".to_string(), json!(0.5));
        mapping.insert("hard".to_string(), json!(1.5));
        setting.validation = Validation::Mapping(mapping);
        setting.set_mapping_key("easy");

        let mut map = HashMap::new();
        map.insert("difficulty".to_string(), setting);
        let ctx = SettingsContext::new(&map);
        assert_eq!(ctx.resolve("difficulty", &[]).unwrap(), 0.5);
    }
}
