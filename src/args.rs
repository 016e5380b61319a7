use clap::Parser;

/// A meta build-system front end.
#[derive(Debug, Parser, Default, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Options {
    /// Set variable VAR to value VAL for every build file. Without =VAL the
    /// variable becomes boolean true.
    #[arg(short = 'D', value_name = "VAR=VAL")]
    pub defines: Vec<String>,

    /// Output format to generate
    #[arg(short = 'f', long = "format", default_value = "json")]
    pub format: String,

    /// Verbosity level - specify up to 3 times to get more detailed output.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Quiet - only print errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Build files to load. When empty, every .bp file in the current
    /// directory is used.
    pub build_files: Vec<String>,
}

pub fn get_options() -> Options {
    let mut opt = Options::parse();
    opt.verbosity = std::cmp::min(3, opt.verbosity);
    opt
}
