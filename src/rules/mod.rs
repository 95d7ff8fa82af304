//! Rule sets: named derivations resolved into a dependency-respecting evaluation order.
//!
//! A [`RuleSet`] is built once per job from [`RuleDefinitions`] and the input [`Schema`]. It is
//! immutable afterwards and shared read-only by every worker.
//!
//! ```rust
//! use rule_report_engine::rules::{RuleDefinitions, RuleSet};
//! use rule_report_engine::types::{DataType, Field, Schema};
//!
//! let schema = Schema::new(vec![
//!     Field::new("price", DataType::Float64),
//!     Field::new("qty", DataType::Int64),
//! ]);
//! let defs = RuleDefinitions::from_pairs([
//!     ("discount", "max(0, total * 0.1)"),
//!     ("total", "price * qty"),
//! ])
//! .unwrap();
//!
//! let rules = RuleSet::resolve(&defs, &schema).unwrap();
//! assert_eq!(rules.order(), vec!["total", "discount"]);
//! assert_eq!(
//!     rules.output_schema().field_names().collect::<Vec<_>>(),
//!     vec!["price", "qty", "total", "discount"]
//! );
//! ```

mod definition;
mod resolve;

pub use definition::{RuleDefinition, RuleDefinitions};

use crate::error::{RuleError, RuleResult};
use crate::expr::Expr;
use crate::types::{DataType, Schema, SchemaRef};

/// A rule bound to its row slot.
#[derive(Debug, Clone)]
pub struct ResolvedRule {
    /// Output column name.
    pub name: String,
    /// Expression with column references bound to output-row slots.
    pub expression: Expr,
    /// Output-row position the result is written to.
    pub slot: usize,
    /// Statically inferred result type.
    pub data_type: DataType,
    /// Whether the rule overwrites an input column in place.
    pub shadows_input: bool,
}

/// Validated rules in evaluation order, plus the input and output row layouts.
#[derive(Debug, Clone)]
pub struct RuleSet {
    input_schema: SchemaRef,
    output_schema: SchemaRef,
    rules: Vec<ResolvedRule>,
}

impl RuleSet {
    /// Resolve `defs` against `input`, failing with the first definition-time error found.
    pub fn resolve(defs: &RuleDefinitions, input: &Schema) -> RuleResult<Self> {
        resolve::resolve_all(defs, input).map_err(|mut errors| errors.swap_remove(0))
    }

    /// Run resolution without keeping the result, returning every error found.
    pub fn validate(defs: &RuleDefinitions, input: &Schema) -> Vec<RuleError> {
        match resolve::resolve_all(defs, input) {
            Ok(_) => Vec::new(),
            Err(errors) => errors,
        }
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[ResolvedRule] {
        &self.rules
    }

    /// Rule names in evaluation order.
    pub fn order(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn input_schema(&self) -> &SchemaRef {
        &self.input_schema
    }

    /// Input columns in their original order, then new rule outputs in evaluation order.
    pub fn output_schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{RuleDefinitions, RuleSet};
    use crate::error::{RuleError, RuleErrorKind};
    use crate::types::{DataType, Field, Schema};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("price", DataType::Float64),
            Field::new("qty", DataType::Int64),
        ])
    }

    fn defs(pairs: &[(&str, &str)]) -> RuleDefinitions {
        RuleDefinitions::from_pairs(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn every_rule_runs_after_its_dependencies() {
        let rules = RuleSet::resolve(
            &defs(&[
                ("net", "gross - tax"),
                ("tax", "gross * 0.2"),
                ("gross", "price * qty"),
                ("count", "qty"),
            ]),
            &schema(),
        )
        .unwrap();
        assert_eq!(rules.order(), vec!["gross", "tax", "net", "count"]);

        let position = |name: &str| rules.order().iter().position(|n| *n == name).unwrap();
        for rule in rules.rules() {
            for column in rule.expression.columns() {
                if let Some(dep) = rules.rules().iter().find(|r| r.name == column) {
                    assert!(position(&dep.name) < position(&rule.name));
                }
            }
        }
    }

    #[test]
    fn output_types_are_inferred() {
        let rules = RuleSet::resolve(
            &defs(&[
                ("units", "qty * 2"),
                ("total", "price * qty"),
                ("half", "qty / 2"),
                ("rounded", "round(qty)"),
            ]),
            &schema(),
        )
        .unwrap();
        let types: Vec<_> = rules.rules().iter().map(|r| r.data_type).collect();
        assert_eq!(
            types,
            vec![DataType::Int64, DataType::Float64, DataType::Float64, DataType::Int64]
        );
    }

    #[test]
    fn unknown_column_names_rule_and_column() {
        let err = RuleSet::resolve(&defs(&[("total", "price * foo")]), &schema()).unwrap_err();
        assert_eq!(err.kind(), RuleErrorKind::UnknownColumnError);
        match err {
            RuleError::UnknownColumn { rule, column } => {
                assert_eq!(rule, "total");
                assert_eq!(column, "foo");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mutual_dependency_is_a_cycle_naming_both_rules() {
        let err = RuleSet::resolve(&defs(&[("a", "b + 1"), ("b", "a + 1")]), &schema()).unwrap_err();
        match err {
            RuleError::CyclicDependency { rules } => assert_eq!(rules, vec!["a", "b"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn self_reference_without_input_column_is_a_cycle() {
        let err = RuleSet::resolve(&defs(&[("x", "x + 1")]), &schema()).unwrap_err();
        assert!(matches!(err, RuleError::CyclicDependency { ref rules } if rules == &["x"]));
    }

    #[test]
    fn shadowing_rule_reads_input_and_feeds_dependents() {
        let rules = RuleSet::resolve(
            &defs(&[("doubled", "price * 2"), ("price", "price * 1.1")]),
            &schema(),
        )
        .unwrap();
        assert_eq!(rules.order(), vec!["price", "doubled"]);

        let price = &rules.rules()[0];
        assert!(price.shadows_input);
        assert_eq!(price.slot, 0);
        assert_eq!(
            rules.output_schema().field_names().collect::<Vec<_>>(),
            vec!["price", "qty", "doubled"]
        );
    }

    #[test]
    fn validation_reports_every_error() {
        let errors = RuleSet::validate(
            &defs(&[
                ("a", "b + 1"),
                ("b", "a + 1"),
                ("c", "foo"),
                ("d", "pow(price, 2)"),
                ("e", "price +"),
                ("f", "price == 1"),
                ("ok", "price * qty"),
            ]),
            &schema(),
        );
        let kinds: Vec<_> = errors.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                RuleErrorKind::UnknownColumnError,
                RuleErrorKind::UnknownIdentifierError,
                RuleErrorKind::SyntaxError,
                RuleErrorKind::UnsupportedOperationError,
                RuleErrorKind::CyclicDependencyError,
            ]
        );
        assert!(RuleSet::validate(&defs(&[("ok", "price * qty")]), &schema()).is_empty());
    }

    #[test]
    fn empty_rule_set_passes_input_through() {
        let rules = RuleSet::resolve(&RuleDefinitions::new(), &schema()).unwrap();
        assert!(rules.is_empty());
        assert_eq!(**rules.output_schema(), schema());
    }
}
