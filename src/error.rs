use std::io;

/// Errors raised while evaluating build files. All of these are fatal to the
/// run; nothing is recovered locally and no partial output is produced.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("parse error in {file} at line {line}, column {column}: {message}")]
    Parse {
        file: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("undefined variable {name} in {input:?}")]
    UndefinedVariable { name: String, input: String },

    #[error("incompatible list policies {key} and {sibling}")]
    IncompatiblePolicies { key: String, sibling: String },

    #[error("rule error in {target}: {message}")]
    Rule { target: String, message: String },

    #[error("cycle in dependency graph involving {remaining:?}")]
    CircularDependency { remaining: Vec<String> },

    #[error("{target} depends on {dependency}, which was never defined")]
    MissingDependency { target: String, dependency: String },

    #[error("no generator named {name:?}")]
    GeneratorNotFound { name: String },
}

impl Error {
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Error::TypeMismatch {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
