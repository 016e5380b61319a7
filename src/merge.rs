//! Merging of build-file maps and lists.
//!
//! Merges happen whenever content flows between scopes: includes into their
//! host file, condition branches into their enclosing map, file settings and
//! dependent settings into targets. List-valued keys choose a policy by
//! suffix on the source key: `=` replaces, `+` prepends, `?` sets only when
//! absent, no suffix appends.

use crate::error::{Error, Result};
use crate::paths;
use crate::value::{BuildMap, Value};

/// List keys whose string items are filesystem paths and must be rewritten
/// when they move between build files in different directories.
const PATH_LIST_KEYS: [&str; 3] = ["include_dirs", "sources", "xcode_framework_dirs"];

pub fn merge_dicts(
    to: &mut BuildMap,
    from: &BuildMap,
    to_file: &str,
    from_file: &str,
) -> Result<()> {
    for (key, from_value) in from {
        if let Some(existing) = to.get(key) {
            if !existing.same_variant(from_value) {
                return Err(Error::type_mismatch(format!(
                    "cannot merge a {} into a {} for key {}",
                    from_value.type_name(),
                    existing.type_name(),
                    key
                )));
            }
        }

        match from_value {
            Value::Str(_) | Value::Int(_) | Value::Bool(_) => {
                to.insert(key.clone(), from_value.clone());
            }
            Value::Map(from_map) => {
                match to
                    .entry(key.clone())
                    .or_insert_with(|| Value::Map(BuildMap::new()))
                {
                    Value::Map(to_map) => merge_dicts(to_map, from_map, to_file, from_file)?,
                    _ => unreachable!("variant compatibility checked above"),
                }
            }
            Value::List(from_list) => {
                merge_list_key(to, from, key, from_list, to_file, from_file)?;
            }
        }
    }
    Ok(())
}

fn merge_list_key(
    to: &mut BuildMap,
    from: &BuildMap,
    key: &str,
    from_list: &[Value],
    to_file: &str,
    from_file: &str,
) -> Result<()> {
    let mut append = true;
    let mut only_if_absent = false;

    let (base, incompatible) = if let Some(base) = key.strip_suffix('=') {
        (base, vec![base.to_owned(), format!("{}?", base)])
    } else if let Some(base) = key.strip_suffix('+') {
        append = false;
        (base, vec![format!("{}=", base), format!("{}?", base)])
    } else if let Some(base) = key.strip_suffix('?') {
        only_if_absent = true;
        (
            base,
            vec![
                base.to_owned(),
                format!("{}=", base),
                format!("{}+", base),
            ],
        )
    } else {
        (key, vec![format!("{}=", key), format!("{}?", key)])
    };

    // Replacing while also appending, prepending, or defaulting the same
    // list is meaningless; reject the combination outright.
    for sibling in &incompatible {
        if from.contains_key(sibling) {
            return Err(Error::IncompatiblePolicies {
                key: key.to_owned(),
                sibling: sibling.clone(),
            });
        }
    }

    if key.ends_with('=') {
        to.insert(base.to_owned(), Value::List(Vec::new()));
    }

    match to.get(base) {
        Some(Value::List(_)) => {
            if only_if_absent {
                return Ok(());
            }
        }
        Some(other) => {
            return Err(Error::type_mismatch(format!(
                "cannot merge a list into a {} for key {} ({})",
                other.type_name(),
                base,
                key
            )));
        }
        None => {
            to.insert(base.to_owned(), Value::List(Vec::new()));
        }
    }

    let is_paths = PATH_LIST_KEYS.contains(&base);
    match to.get_mut(base) {
        Some(Value::List(to_list)) => {
            merge_lists(to_list, from_list, to_file, from_file, is_paths, append);
        }
        _ => unreachable!("ensured to be a list above"),
    }
    Ok(())
}

/// Append (or prepend, in source order) each item of `from` into `to`.
/// Items are copied, never shared. Relative path strings are re-expressed
/// relative to `to_file`'s directory when the lists belong to different
/// files.
pub fn merge_lists(
    to: &mut Vec<Value>,
    from: &[Value],
    to_file: &str,
    from_file: &str,
    is_paths: bool,
    append: bool,
) {
    let mut prepend_index = 0;
    for item in from {
        let to_item = match item {
            Value::Str(path) if is_paths && to_file != from_file => {
                Value::Str(paths::rebase(path, from_file, to_file))
            }
            other => other.clone(),
        };

        if append {
            to.push(to_item);
        } else {
            // Inserting everything at index 0 would reverse the source
            // order; walk the insertion point forward instead.
            to.insert(prepend_index, to_item);
            prepend_index += 1;
        }
    }
}
