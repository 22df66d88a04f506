//! Data types shared by the splitter, the output reader and the bridge.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::BridgeError;

/// Program name, arguments and optional working directory for the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Create a command spec for the given program with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Build a command spec from a full command line (program first).
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::EmptyCommand` if the command line is empty.
    pub fn from_argv<I, S>(argv: I) -> Result<Self, BridgeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut iter = argv.into_iter().map(Into::into);
        let program = iter.next().ok_or(BridgeError::EmptyCommand)?;
        Ok(Self {
            program,
            args: iter.collect(),
            working_dir: None,
        })
    }

    /// Append a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory for the child process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Get the program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the arguments (program excluded).
    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// The full command line, program first.
    #[must_use]
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

/// Set of single characters that terminate a record.
///
/// Always holds at least one character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparatorSet {
    chars: Vec<char>,
}

impl SeparatorSet {
    /// Build a separator set from the given characters.
    ///
    /// Duplicates are ignored.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::EmptySeparators` if no character is given.
    pub fn new(chars: impl IntoIterator<Item = char>) -> Result<Self, BridgeError> {
        let mut chars: Vec<char> = chars.into_iter().collect();
        chars.sort_unstable();
        chars.dedup();
        if chars.is_empty() {
            return Err(BridgeError::EmptySeparators);
        }
        Ok(Self { chars })
    }

    /// Build a separator set from a string whose every character is a separator.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::EmptySeparators` if the string is empty.
    pub fn from_chars(separators: &str) -> Result<Self, BridgeError> {
        Self::new(separators.chars())
    }

    /// Build a separator set from a string using backslash escapes
    /// (`\n`, `\r`, `\t`, `\0`, `\\`), as typed on a command line.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::InvalidEscape` for an unknown escape and
    /// `BridgeError::EmptySeparators` if nothing remains.
    pub fn from_escaped(input: &str) -> Result<Self, BridgeError> {
        let mut chars = Vec::new();
        let mut iter = input.chars();
        while let Some(ch) = iter.next() {
            if ch != '\\' {
                chars.push(ch);
                continue;
            }
            let unescaped = match iter.next() {
                Some('n') => '\n',
                Some('r') => '\r',
                Some('t') => '\t',
                Some('0') => '\0',
                Some('\\') => '\\',
                Some(other) => return Err(BridgeError::InvalidEscape(format!("\\{other}"))),
                None => return Err(BridgeError::InvalidEscape("\\".to_string())),
            };
            chars.push(unescaped);
        }
        Self::new(chars)
    }

    /// Whether `ch` terminates a record.
    #[must_use]
    pub fn contains(&self, ch: char) -> bool {
        self.chars.contains(&ch)
    }

    /// The separator characters, sorted.
    #[must_use]
    pub fn chars(&self) -> &[char] {
        &self.chars
    }
}

impl Default for SeparatorSet {
    fn default() -> Self {
        Self {
            chars: vec!['\n', '\r'],
        }
    }
}

impl FromStr for SeparatorSet {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_chars(s)
    }
}

impl fmt::Display for SeparatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ch in &self.chars {
            write!(f, "{}", ch.escape_default())?;
        }
        Ok(())
    }
}

/// A record harvested from the child, tagged with its character offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    /// Offset, in characters read from the child, of the record's first character.
    pub index: u64,
    /// Record text; never contains a separator.
    pub text: String,
}

impl Tuple {
    #[must_use]
    pub fn new(index: u64, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

/// Tuples delivered together, delimited in the child's output by an empty record.
pub type Batch = Vec<Tuple>;

/// Append-only collector of tuples.
pub trait TupleSink {
    /// Append one tuple.
    fn add(&mut self, tuple: Tuple);
}

impl TupleSink for Vec<Tuple> {
    fn add(&mut self, tuple: Tuple) {
        self.push(tuple);
    }
}

impl<S: TupleSink + ?Sized> TupleSink for &mut S {
    fn add(&mut self, tuple: Tuple) {
        (**self).add(tuple);
    }
}
