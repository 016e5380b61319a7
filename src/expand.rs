//! Variable expansion and conditional evaluation.
//!
//! Runs twice over every map: the early phase (`<(name)` sites and
//! `conditions` blocks) at file load time, and the late phase (`>(name)`
//! sites and `target_conditions` blocks) once per target after the
//! dependency graph and settings propagation are done.
//!
//! Scoping rule: every descent into a child map gets its own copy of the
//! variables, so nothing a child defines can leak back out. Lists share
//! their parent's variables because a list cannot define any.

use regex::Regex;

use std::sync::OnceLock;

use crate::conditions;
use crate::error::{Error, Result};
use crate::merge::merge_dicts;
use crate::value::{BuildMap, Value, Variables};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Early,
    Late,
}

impl Phase {
    fn sigil(self) -> &'static Regex {
        static EARLY: OnceLock<Regex> = OnceLock::new();
        static LATE: OnceLock<Regex> = OnceLock::new();
        match self {
            Phase::Early => EARLY.get_or_init(|| Regex::new(r"<\((.*?)\)").unwrap()),
            Phase::Late => LATE.get_or_init(|| Regex::new(r">\((.*?)\)").unwrap()),
        }
    }

    fn conditions_key(self) -> &'static str {
        match self {
            Phase::Early => "conditions",
            Phase::Late => "target_conditions",
        }
    }
}

/// Replace this phase's expansion sites in `input`. Sites are replaced
/// right-to-left so that replacement text is never rescanned for further
/// sites.
pub fn expand_variables(input: &str, phase: Phase, variables: &Variables) -> Result<String> {
    let sites: Vec<(usize, usize, String)> = phase
        .sigil()
        .captures_iter(input)
        .map(|captures| {
            let whole = captures.get(0).expect("capture 0 always exists");
            (whole.start(), whole.end(), captures[1].to_owned())
        })
        .collect();

    let mut output = input.to_owned();
    for (start, end, name) in sites.into_iter().rev() {
        let replacement = match variables.get(&name) {
            Some(Value::Str(s)) => s.clone(),
            Some(Value::Int(i)) => i.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(other) => {
                return Err(Error::type_mismatch(format!(
                    "variable {} is a {} and cannot be expanded into {:?}",
                    name,
                    other.type_name(),
                    input
                )))
            }
            None => {
                return Err(Error::UndefinedVariable {
                    name,
                    input: input.to_owned(),
                })
            }
        };
        output.replace_range(start..end, &replacement);
    }
    Ok(output)
}

/// Any string- or integer-valued key `k` becomes an automatic variable
/// `_k`. Boolean keys do not; a boolean can still be expanded when bound as
/// an ordinary variable.
fn load_automatic_variables(variables: &mut Variables, map: &BuildMap) {
    for (key, value) in map {
        if matches!(value, Value::Str(_) | Value::Int(_)) {
            variables.insert(format!("_{}", key), value.clone());
        }
    }
}

/// Entries of the map's `variables` sub-map become variables by their own
/// names, shadowing anything already in scope.
fn load_variables_map(variables: &mut Variables, map: &BuildMap) {
    if let Some(Value::Map(sub)) = map.get("variables") {
        for (key, value) in sub {
            variables.insert(key.clone(), value.clone());
        }
    }
}

/// Expand variables and evaluate conditions throughout `map`, in place.
///
/// The order matters and is observable:
/// automatics are loaded, the `variables` sub-map is processed and loaded,
/// every string value at this level is expanded, the variables are reloaded
/// (expansion may have changed them), conditions run and merge their chosen
/// branch, the variables are reloaded again, and only then do child maps and
/// lists get processed. A condition branch that introduces `variables` is
/// therefore visible to children of this map but not to this map's own
/// already-expanded strings.
pub fn process_map(map: &mut BuildMap, phase: Phase, mut variables: Variables) -> Result<()> {
    load_automatic_variables(&mut variables, map);

    if map.contains_key("variables") {
        // Resolve references inside the variables block first, against a
        // copy so its automatics stay private.
        let scope = variables.clone();
        match map.get_mut("variables") {
            Some(Value::Map(sub)) => process_map(sub, phase, scope)?,
            Some(other) => {
                return Err(Error::type_mismatch(format!(
                    "variables must be a map, not a {}",
                    other.type_name()
                )))
            }
            None => unreachable!("presence checked above"),
        }
    }
    load_variables_map(&mut variables, map);

    for (key, value) in map.iter_mut() {
        if key == "variables" {
            continue;
        }
        if let Value::Str(s) = value {
            *s = expand_variables(s, phase, &variables)?;
        }
    }

    // Expansion may have changed scalar values; refresh before conditions.
    load_automatic_variables(&mut variables, map);
    load_variables_map(&mut variables, map);

    process_conditions(map, phase, &variables)?;

    // Conditions may have merged in new scalars or variables.
    load_automatic_variables(&mut variables, map);
    load_variables_map(&mut variables, map);

    for (key, value) in map.iter_mut() {
        if key == "variables" {
            continue;
        }
        match value {
            Value::Map(child) => process_map(child, phase, variables.clone())?,
            Value::List(child) => process_list(child, phase, &variables)?,
            Value::Str(_) | Value::Int(_) | Value::Bool(_) => {}
        }
    }
    Ok(())
}

pub fn process_list(list: &mut Vec<Value>, phase: Phase, variables: &Variables) -> Result<()> {
    for item in list.iter_mut() {
        match item {
            Value::Map(child) => process_map(child, phase, variables.clone())?,
            Value::List(child) => process_list(child, phase, variables)?,
            Value::Str(s) => *s = expand_variables(s, phase, variables)?,
            Value::Int(_) | Value::Bool(_) => {}
        }
    }
    Ok(())
}

/// Consume this phase's conditions key, evaluate each clause, and merge the
/// selected branch (fully processed) into the enclosing map.
fn process_conditions(map: &mut BuildMap, phase: Phase, variables: &Variables) -> Result<()> {
    let key = phase.conditions_key();
    let clauses = match map.remove(key) {
        None => return Ok(()),
        Some(Value::List(clauses)) => clauses,
        Some(other) => {
            return Err(Error::type_mismatch(format!(
                "{} must be a list, not a {}",
                key,
                other.type_name()
            )))
        }
    };

    for clause in clauses {
        let mut parts = match clause {
            Value::List(parts) => parts,
            other => {
                return Err(Error::type_mismatch(format!(
                    "{} clauses must be lists, not {}s",
                    key,
                    other.type_name()
                )))
            }
        };
        if parts.len() != 2 && parts.len() != 3 {
            return Err(Error::type_mismatch(format!(
                "{} clauses must have 2 or 3 elements, not {}",
                key,
                parts.len()
            )));
        }

        let cond_expr = match &parts[0] {
            Value::Str(expr) => expr.clone(),
            other => {
                return Err(Error::type_mismatch(format!(
                    "a {} expression must be a string, not a {}",
                    key,
                    other.type_name()
                )))
            }
        };

        let branch = if conditions::evaluate(&cond_expr, variables)? {
            parts.swap_remove(1)
        } else if parts.len() == 3 {
            parts.swap_remove(2)
        } else {
            continue;
        };

        let mut branch_map = match branch {
            Value::Map(branch_map) => branch_map,
            other => {
                return Err(Error::type_mismatch(format!(
                    "a {} branch for {:?} must be a map, not a {}",
                    key,
                    cond_expr,
                    other.type_name()
                )))
            }
        };

        // The branch resolves in this scope before merging, so nested
        // conditions and expansion sites inside it behave as if written
        // directly in the enclosing map.
        process_map(&mut branch_map, phase, variables.clone())?;

        // Same build file on both sides, so no path rewriting happens.
        merge_dicts(map, &branch_map, "", "")?;
    }
    Ok(())
}
