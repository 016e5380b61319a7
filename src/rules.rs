//! List-rewriting rules applied to every target after the late phase.
//!
//! A key `X!` holds literal exclusions for the list `X`; a key `X/` holds
//! ordered `[action, pattern]` regex rules with actions `exclude` and
//! `include`. Removed items land in `X_excluded`. An item matched by an
//! `include` rule becomes sticky: it is immune to every later exclusion,
//! and if it was excluded earlier it is resurrected (by appending, since
//! its original position is gone).
//!
//! The base lists are edited during iteration, so all scans use explicit
//! index cursors.

use regex::Regex;

use crate::error::{Error, Result};
use crate::value::{BuildMap, Value};

pub fn process_rules(name: &str, spec: &mut BuildMap) -> Result<()> {
    let rule_error = |message: String| Error::Rule {
        target: name.to_owned(),
        message,
    };

    // Collect the base lists first; the rule keys cannot be consumed while
    // iterating the map.
    let mut bases: Vec<String> = Vec::new();
    let mut orphaned: Vec<String> = Vec::new();
    for (key, value) in spec.iter() {
        let base = match key.strip_suffix('!').or_else(|| key.strip_suffix('/')) {
            Some(base) => base,
            None => continue,
        };
        if !matches!(value, Value::List(_)) {
            return Err(rule_error(format!(
                "{} must be a list, not a {}",
                key,
                value.type_name()
            )));
        }
        match spec.get(base) {
            // A rule with nothing to operate on is dropped silently.
            None => orphaned.push(key.clone()),
            Some(Value::List(_)) => {
                if !bases.iter().any(|b| b == base) {
                    bases.push(base.to_owned());
                }
            }
            Some(other) => {
                return Err(rule_error(format!(
                    "{} must be a list to apply {}, not a {}",
                    base,
                    key,
                    other.type_name()
                )))
            }
        }
    }
    for key in orphaned {
        spec.remove(&key);
    }

    for base in bases {
        let excluded_key = format!("{}_excluded", base);
        if spec.contains_key(&excluded_key) {
            return Err(rule_error(format!(
                "{} must not be present before exclusion rules run",
                excluded_key
            )));
        }

        let mut excluded: Vec<Value> = Vec::new();
        // The sticky set: items an include rule has pinned into the list.
        let mut included: Vec<Value> = Vec::new();

        if let Some(Value::List(exclusions)) = spec.remove(&format!("{}!", base)) {
            for exclusion in exclusions {
                if included.contains(&exclusion) {
                    continue;
                }
                let list = base_list(spec, &base);
                let before = list.len();
                // Remove every occurrence, not just the first.
                list.retain(|item| item != &exclusion);
                let removed = list.len() != before;
                if removed && !excluded.contains(&exclusion) {
                    excluded.push(exclusion);
                }
            }
        }

        if let Some(Value::List(rules)) = spec.remove(&format!("{}/", base)) {
            for rule in rules {
                let (action, pattern) = match rule.as_list().map(Vec::as_slice) {
                    Some([Value::Str(action), Value::Str(pattern)]) => (action, pattern),
                    _ => {
                        return Err(rule_error(format!(
                            "{}/ rules must be [action, pattern] string pairs",
                            base
                        )))
                    }
                };
                let pattern = Regex::new(pattern).map_err(|e| {
                    rule_error(format!("invalid pattern in {}/ rule: {}", base, e))
                })?;

                match action.as_str() {
                    "exclude" => {
                        let list = base_list(spec, &base);
                        let mut index = 0;
                        while index < list.len() {
                            if matches(&pattern, &list[index]) && !included.contains(&list[index]) {
                                let item = list.remove(index);
                                if !excluded.contains(&item) {
                                    excluded.push(item);
                                }
                                // The next item slid into this index.
                                continue;
                            }
                            index += 1;
                        }
                    }
                    "include" => {
                        for item in base_list(spec, &base).iter() {
                            if matches(&pattern, item) && !included.contains(item) {
                                included.push(item.clone());
                            }
                        }
                        // Resurrect anything this pattern had excluded.
                        let mut index = 0;
                        while index < excluded.len() {
                            if matches(&pattern, &excluded[index]) {
                                let item = excluded.remove(index);
                                base_list(spec, &base).push(item.clone());
                                if !included.contains(&item) {
                                    included.push(item);
                                }
                                continue;
                            }
                            index += 1;
                        }
                    }
                    other => {
                        return Err(rule_error(format!(
                            "unrecognized action {:?} in {}/ rule",
                            other, base
                        )))
                    }
                }
            }
        }

        if !excluded.is_empty() {
            spec.insert(excluded_key, Value::List(excluded));
        }
    }

    Ok(())
}

fn base_list<'a>(spec: &'a mut BuildMap, base: &str) -> &'a mut Vec<Value> {
    match spec.get_mut(base) {
        Some(Value::List(list)) => list,
        _ => unreachable!("base keys are validated as lists before processing"),
    }
}

/// Regex rules search items as substrings; non-string items never match.
fn matches(pattern: &Regex, item: &Value) -> bool {
    item.as_str().map_or(false, |s| pattern.is_match(s))
}
