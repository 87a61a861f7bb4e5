//! Construction-time registry mapping kind names to evaluator builders.
//!
//! A strategy version's `params_json` carries a `"kind"` discriminator plus
//! the variant's parameters; the registry turns that document into a boxed
//! evaluator or a typed error. The set of kinds is closed — registration
//! happens once at process startup.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::engine::StrategyEvaluator;
use crate::ma_crossover::{MaCrossover, MaCrossoverParams};
use crate::rsi_reversal::{RsiReversal, RsiReversalParams};

#[derive(Debug, Error)]
pub enum StrategyBuildError {
    #[error("params_json has no \"kind\" field")]
    MissingKind,
    #[error("unknown strategy kind: {0}")]
    UnknownKind(String),
    #[error("invalid params for {kind}: {message}")]
    InvalidParams { kind: String, message: String },
}

type Builder = fn(&Value) -> Result<Box<dyn StrategyEvaluator>, StrategyBuildError>;

pub struct StrategyRegistry {
    builders: HashMap<&'static str, Builder>,
}

impl StrategyRegistry {
    /// Registry with the built-in variants.
    pub fn with_builtins() -> Self {
        let mut builders: HashMap<&'static str, Builder> = HashMap::new();
        builders.insert(MaCrossover::KIND, build_ma_crossover);
        builders.insert(RsiReversal::KIND, build_rsi_reversal);
        Self { builders }
    }

    pub fn known_kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.builders.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build an evaluator from a version's params document.
    pub fn build(&self, params_json: &Value) -> Result<Box<dyn StrategyEvaluator>, StrategyBuildError> {
        let kind = params_json
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or(StrategyBuildError::MissingKind)?;

        let builder = self
            .builders
            .get(kind)
            .ok_or_else(|| StrategyBuildError::UnknownKind(kind.to_string()))?;

        builder(params_json)
    }
}

fn build_ma_crossover(params: &Value) -> Result<Box<dyn StrategyEvaluator>, StrategyBuildError> {
    let parsed: MaCrossoverParams =
        serde_json::from_value(params.clone()).map_err(|e| StrategyBuildError::InvalidParams {
            kind: MaCrossover::KIND.to_string(),
            message: e.to_string(),
        })?;
    let strat = MaCrossover::new(parsed).map_err(|message| StrategyBuildError::InvalidParams {
        kind: MaCrossover::KIND.to_string(),
        message,
    })?;
    Ok(Box::new(strat))
}

fn build_rsi_reversal(params: &Value) -> Result<Box<dyn StrategyEvaluator>, StrategyBuildError> {
    let parsed: RsiReversalParams =
        serde_json::from_value(params.clone()).map_err(|e| StrategyBuildError::InvalidParams {
            kind: RsiReversal::KIND.to_string(),
            message: e.to_string(),
        })?;
    let strat = RsiReversal::new(parsed).map_err(|message| StrategyBuildError::InvalidParams {
        kind: RsiReversal::KIND.to_string(),
        message,
    })?;
    Ok(Box::new(strat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_known_kinds() {
        let reg = StrategyRegistry::with_builtins();
        let ma = reg
            .build(&json!({
                "kind": "ma_crossover",
                "short_period": 5,
                "long_period": 20,
            }))
            .unwrap();
        assert_eq!(ma.kind(), "ma_crossover");
        assert_eq!(ma.required_bars(), 21);

        let rsi = reg
            .build(&json!({
                "kind": "rsi_reversal",
                "period": 14,
                "oversold": 30,
                "overbought": 70,
            }))
            .unwrap();
        assert_eq!(rsi.kind(), "rsi_reversal");
        assert_eq!(rsi.required_bars(), 16);
    }

    #[test]
    fn unknown_kind_is_typed_error() {
        let reg = StrategyRegistry::with_builtins();
        let err = reg.build(&json!({"kind": "momentum"})).unwrap_err();
        assert!(matches!(err, StrategyBuildError::UnknownKind(_)));
    }

    #[test]
    fn missing_kind_is_typed_error() {
        let reg = StrategyRegistry::with_builtins();
        let err = reg.build(&json!({"short_period": 5})).unwrap_err();
        assert!(matches!(err, StrategyBuildError::MissingKind));
    }

    #[test]
    fn bad_params_is_typed_error() {
        let reg = StrategyRegistry::with_builtins();
        let err = reg
            .build(&json!({
                "kind": "ma_crossover",
                "short_period": 20,
                "long_period": 5,
            }))
            .unwrap_err();
        assert!(matches!(err, StrategyBuildError::InvalidParams { .. }));
    }
}
