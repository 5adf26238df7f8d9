use std::{env, path::PathBuf};

use thiserror::Error;

/// Largest accepted generation or work bound, in milliseconds.
pub const MAX_TIME_MS: u32 = 5000;

/// Environment variable overriding where the event log is written.
pub const OUTPUT_ENV: &str = "CHILDCARE_OUT";
pub const DEFAULT_OUTPUT: &str = "childcare.out";

pub const HELP: &str = "\
Run the program with these arguments:
\t$ childcare A C AGT CGT AWT CWT

 A   = number of adult workers to generate
 C   = number of child workers to generate
 AGT = maximal time (ms) between two generated adults, 0..=5000
 CGT = maximal time (ms) between two generated children, 0..=5000
 AWT = maximal time (ms) an adult stays in the centre, 0..=5000
 CWT = maximal time (ms) a child stays in the centre, 0..=5000
";

/// Parameters of one simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
    pub adults: u32,
    pub children: u32,
    pub adult_gen_ms: u32,
    pub child_gen_ms: u32,
    pub adult_work_ms: u32,
    pub child_work_ms: u32,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsageError {
    #[error("expected 6 arguments, got {0}")]
    ArgumentCount(usize),

    #[error("{name} must be a non-negative integer, got {value:?}")]
    NotANumber { name: &'static str, value: String },

    #[error("{name} must be within 0 and {max} milliseconds, got {value}")]
    OutOfRange {
        name: &'static str,
        value: u32,
        max: u32,
    },
}

impl Config {
    /// Parses the six positional arguments (program name already stripped).
    pub fn from_args<I, S>(args: I) -> Result<Config, UsageError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let [a, c, agt, cgt, awt, cwt] = args.as_slice() else {
            return Err(UsageError::ArgumentCount(args.len()));
        };

        Ok(Config {
            adults: count("A", a.as_ref())?,
            children: count("C", c.as_ref())?,
            adult_gen_ms: bound("AGT", agt.as_ref())?,
            child_gen_ms: bound("CGT", cgt.as_ref())?,
            adult_work_ms: bound("AWT", awt.as_ref())?,
            child_work_ms: bound("CWT", cwt.as_ref())?,
        })
    }

    pub fn total_workers(&self) -> u32 {
        self.adults + self.children
    }
}

fn count(name: &'static str, value: &str) -> Result<u32, UsageError> {
    value.trim().parse().map_err(|_| UsageError::NotANumber {
        name,
        value: value.to_string(),
    })
}

fn bound(name: &'static str, value: &str) -> Result<u32, UsageError> {
    let ms = count(name, value)?;
    if ms > MAX_TIME_MS {
        return Err(UsageError::OutOfRange {
            name,
            value: ms,
            max: MAX_TIME_MS,
        });
    }
    Ok(ms)
}

/// Event log path: `$CHILDCARE_OUT` or `childcare.out` in the working directory.
pub fn output_path() -> PathBuf {
    env::var_os(OUTPUT_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT))
}
