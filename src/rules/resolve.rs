//! Dependency resolution for rule sets.
//!
//! Resolution runs in phases:
//!
//! 1. parse every rule against the visible names (input columns plus every rule output)
//! 2. derive rule-to-rule dependencies from each expression's free columns
//! 3. report dependency cycles (strongly connected components)
//! 4. topologically sort, breaking ties by declaration order
//! 5. lay out row slots, bind expressions to them and infer output types
//!
//! Every error from phases 1-3 is collected, so validation can report all of them at once.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use crate::error::RuleError;
use crate::expr::{parse_expression, Expr};
use crate::types::{DataType, Field, Schema};

use super::definition::RuleDefinitions;
use super::{ResolvedRule, RuleSet};

pub(crate) fn resolve_all(defs: &RuleDefinitions, input: &Schema) -> Result<RuleSet, Vec<RuleError>> {
    let mut errors = Vec::new();
    let rules: Vec<_> = defs.iter().collect();

    let rule_index: HashMap<&str, usize> = rules
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name.as_str(), i))
        .collect();

    // Parse-time scope. Slots here are provisional; they are re-bound once the layout is known.
    let mut scope: HashMap<String, usize> = input
        .field_names()
        .enumerate()
        .map(|(i, name)| (name.to_string(), i))
        .collect();
    for (i, rule) in rules.iter().enumerate() {
        scope.entry(rule.name.clone()).or_insert(input.len() + i);
    }

    let mut parsed: Vec<Option<Expr>> = Vec::with_capacity(rules.len());
    for rule in &rules {
        if rule.name.trim().is_empty() {
            errors.push(RuleError::InvalidDocument {
                message: "rule output names must not be empty".to_string(),
            });
            parsed.push(None);
            continue;
        }
        match parse_expression(&rule.expression, &scope) {
            Ok(expr) => parsed.push(Some(expr)),
            Err(e) => {
                errors.push(RuleError::from_parse(&rule.name, e));
                parsed.push(None);
            }
        }
    }

    // deps[i] = rules that must run before rule i
    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); rules.len()];
    for (i, expr) in parsed.iter().enumerate() {
        let Some(expr) = expr else { continue };
        for column in expr.columns() {
            let Some(&j) = rule_index.get(column) else {
                continue;
            };
            // A shadowing rule reads the input value of its own name.
            if j == i && input.index_of(column).is_some() {
                continue;
            }
            if !deps[i].contains(&j) {
                deps[i].push(j);
            }
        }
    }

    for component in cyclic_components(&deps) {
        errors.push(RuleError::CyclicDependency {
            rules: component.iter().map(|&i| rules[i].name.clone()).collect(),
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let order = topological_order(&deps);

    // Row layout: input columns keep their slots (shadowing rules overwrite them in place), new
    // outputs are appended in evaluation order.
    let mut slots: HashMap<&str, usize> = input
        .field_names()
        .enumerate()
        .map(|(i, name)| (name, i))
        .collect();
    let mut next_slot = input.len();
    let mut rule_slot = vec![0usize; rules.len()];
    for &i in &order {
        let name = rules[i].name.as_str();
        rule_slot[i] = match input.index_of(name) {
            Some(slot) => slot,
            None => {
                next_slot += 1;
                next_slot - 1
            }
        };
        slots.insert(name, rule_slot[i]);
    }

    let mut slot_types: Vec<DataType> = input.fields.iter().map(|f| f.data_type).collect();
    slot_types.resize(next_slot, DataType::Float64);

    let mut resolved = Vec::with_capacity(order.len());
    for &i in &order {
        let Some(mut expr) = parsed[i].take() else {
            continue;
        };
        if let Err(column) = expr.bind(&|name: &str| slots.get(name).copied()) {
            // Unreachable after a successful parse, kept as an error rather than a panic.
            return Err(vec![RuleError::UnknownColumn {
                rule: rules[i].name.clone(),
                column,
            }]);
        }
        let data_type = expr.infer_type(&|slot: usize| {
            slot_types.get(slot).copied().unwrap_or(DataType::Float64)
        });
        let slot = rule_slot[i];
        slot_types[slot] = data_type;
        resolved.push(ResolvedRule {
            name: rules[i].name.clone(),
            expression: expr,
            slot,
            data_type,
            shadows_input: slot < input.len(),
        });
    }

    let mut fields: Vec<Field> = input
        .fields
        .iter()
        .enumerate()
        .map(|(slot, f)| Field::new(f.name.clone(), slot_types[slot]))
        .collect();
    fields.extend(
        resolved
            .iter()
            .filter(|r| !r.shadows_input)
            .map(|r| Field::new(r.name.clone(), r.data_type)),
    );

    tracing::debug!(
        order = ?resolved.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        "resolved rule evaluation order"
    );

    Ok(RuleSet {
        input_schema: Arc::new(input.clone()),
        output_schema: Arc::new(Schema::new(fields)),
        rules: resolved,
    })
}

/// Kahn's algorithm; among ready rules the earliest declared runs first.
fn topological_order(deps: &[Vec<usize>]) -> Vec<usize> {
    let n = deps.len();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut pending: Vec<usize> = vec![0; n];
    for (i, ds) in deps.iter().enumerate() {
        pending[i] = ds.len();
        for &j in ds {
            dependents[j].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> =
        (0..n).filter(|&i| pending[i] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &k in &dependents[i] {
            pending[k] -= 1;
            if pending[k] == 0 {
                ready.push(Reverse(k));
            }
        }
    }
    order
}

/// Strongly connected components that form a cycle (more than one member, or a self-loop).
///
/// Members of each component are in declaration order; components are ordered by their first
/// member.
fn cyclic_components(deps: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct Tarjan<'a> {
        deps: &'a [Vec<usize>],
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        counter: usize,
        components: Vec<Vec<usize>>,
    }

    impl Tarjan<'_> {
        fn visit(&mut self, v: usize) {
            self.index[v] = Some(self.counter);
            self.lowlink[v] = self.counter;
            self.counter += 1;
            self.stack.push(v);
            self.on_stack[v] = true;

            for &w in &self.deps[v] {
                match self.index[w] {
                    None => {
                        self.visit(w);
                        self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                    }
                    Some(wi) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(wi);
                    }
                    Some(_) => {}
                }
            }

            if Some(self.lowlink[v]) == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }

    let n = deps.len();
    let mut t = Tarjan {
        deps,
        index: vec![None; n],
        lowlink: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        counter: 0,
        components: Vec::new(),
    };
    for v in 0..n {
        if t.index[v].is_none() {
            t.visit(v);
        }
    }

    let mut cycles: Vec<Vec<usize>> = t
        .components
        .into_iter()
        .filter(|c| c.len() > 1 || deps[c[0]].contains(&c[0]))
        .map(|mut c| {
            c.sort_unstable();
            c
        })
        .collect();
    cycles.sort_unstable_by_key(|c| c[0]);
    cycles
}
