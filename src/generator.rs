//! The seam between the core and output generators.
//!
//! A generator contributes default variables before any file is loaded and
//! consumes the resolved `(flat_list, targets, data)` triple once the core
//! finishes. Generators are selected by name on the command line.

use anyhow::{Context, Result};

use crate::resolve::ResolvedBuild;
use crate::value::Variables;

pub trait Generator: std::fmt::Debug {
    /// Variables this generator wants defined for every build file.
    fn default_variables(&self) -> Variables {
        Variables::new()
    }

    /// Called exactly once, after the core has fully resolved the build.
    fn generate_output(&self, resolved: &ResolvedBuild) -> Result<()>;
}

pub fn lookup(name: &str) -> crate::error::Result<Box<dyn Generator>> {
    match name {
        "json" => Ok(Box::new(JsonDump)),
        _ => Err(crate::error::Error::GeneratorNotFound {
            name: name.to_owned(),
        }),
    }
}

/// Dumps the resolved build to stdout as JSON. Useful on its own for
/// inspection and as the reference consumer for the generator interface.
#[derive(Debug)]
struct JsonDump;

impl Generator for JsonDump {
    fn generate_output(&self, resolved: &ResolvedBuild) -> Result<()> {
        let output =
            serde_json::to_string_pretty(resolved).context("serialize resolved build")?;
        println!("{}", output);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::error::Error;
    use crate::value::Value;

    use maplit::btreemap;

    #[test]
    fn unknown_generators_are_reported_by_name() {
        match lookup("xcodeproj").unwrap_err() {
            Error::GeneratorNotFound { name } => assert_eq!(name, "xcodeproj"),
            other => panic!("expected GeneratorNotFound, got {:?}", other),
        }
    }

    #[test]
    fn json_generator_resolves_and_has_no_default_variables() {
        let generator = lookup("json").unwrap();
        assert!(generator.default_variables().is_empty());
    }

    #[test]
    fn resolved_builds_serialize_to_json() {
        let resolved = ResolvedBuild {
            flat_list: vec!["a.bp:lib".to_owned(), "a.bp:exe".to_owned()],
            targets: btreemap! {
                "a.bp:exe".to_string() => btreemap! {
                    "name".to_string() => Value::from("exe"),
                    "type".to_string() => Value::from("executable"),
                },
            },
            data: btreemap! {},
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&resolved).unwrap()).unwrap();
        assert_eq!(json["flat_list"][0], "a.bp:lib");
        assert_eq!(json["targets"]["a.bp:exe"]["type"], "executable");
    }
}
