#[macro_use]
extern crate anyhow;
extern crate clap;
#[macro_use]
extern crate log;
extern crate nom;
extern crate regex;
#[macro_use]
extern crate serde;
extern crate serde_json;
extern crate simplelog;
#[macro_use]
extern crate thiserror;

mod args;
mod conditions;
mod error;
mod expand;
mod generator;
mod graph;
mod loader;
mod merge;
mod parser;
mod paths;
mod resolve;
mod rules;
mod value;

use anyhow::{Context, Result};

use crate::value::{Value, Variables};

fn main() {
    match run() {
        Ok(success) if success => std::process::exit(0),
        Ok(_) => std::process::exit(1),
        Err(e) => {
            display_error(e);
            std::process::exit(1);
        }
    }
}

pub(crate) fn display_error(error: anyhow::Error) {
    let message: String = error
        .chain()
        .enumerate()
        .map(|(depth, cause)| match depth {
            0 => format!("Failed to {}", cause),
            1 => format!("\nCaused by:\n    {}", cause),
            _ => format!("\n    {}", cause),
        })
        .collect();

    error!("{}", message);
}

/// Returns true if program should exit with success status
fn run() -> Result<bool> {
    let opt = args::get_options();

    let log_level = if opt.quiet {
        simplelog::LevelFilter::Error
    } else {
        match opt.verbosity {
            0 => simplelog::LevelFilter::Info,
            1 => simplelog::LevelFilter::Debug,
            _ => simplelog::LevelFilter::Trace,
        }
    };
    simplelog::TermLogger::init(
        log_level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .context("initialize logging")?;

    trace!("Loaded options: {:#?}", opt);

    let generator = generator::lookup(&opt.format).context("select generator")?;

    let mut variables = Variables::new();
    for define in &opt.defines {
        match define.split_once('=') {
            Some((name, value)) => variables.insert(name.to_owned(), Value::from(value)),
            None => variables.insert(define.clone(), Value::Bool(true)),
        };
    }
    // Names supplied by the tool and its generators are UPPER_SNAKE_CASE by
    // convention, keeping clear of user and automatic variables.
    variables.insert("GENERATOR".to_owned(), Value::from(opt.format.as_str()));
    for (name, value) in generator.default_variables() {
        variables.insert(name, value);
    }

    let build_files = if opt.build_files.is_empty() {
        find_build_files().context("discover build files")?
    } else {
        opt.build_files.clone()
    };
    ensure!(!build_files.is_empty(), "no build files given or found");
    debug!("Resolving {:?}", build_files);

    let resolved = resolve::resolve(&mut loader::DiskReader, &build_files, &variables)
        .context("resolve build files")?;
    info!(
        "Resolved {} targets from {} build files",
        resolved.targets.len(),
        resolved.data.len()
    );

    generator.generate_output(&resolved).context("generate output")?;

    Ok(true)
}

/// Every .bp file in the current directory, sorted for determinism.
fn find_build_files() -> Result<Vec<String>> {
    let mut build_files = Vec::new();
    for entry in std::fs::read_dir(".").context("read current directory")? {
        let name = entry.context("read directory entry")?.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".bp") {
            build_files.push(name.into_owned());
        }
    }
    build_files.sort();
    Ok(build_files)
}
