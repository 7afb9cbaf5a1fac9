//! Extraction configuration: bundling rules, drop and no-prefix lists, and
//! the knobs of the synthesized code.
//!
//! An `Options` value is built once by the driver and threaded read-only
//! through every pass.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ast::QualifiedName;
use crate::error::ExtractError;
use crate::naming::{default_file, sanitize};

pub const DEFAULT_TRAP_EXIT_CODE: i32 = 253;
pub const DEFAULT_INIT_ROUTINE: &str = "lowc_init_globals";
pub const DEFAULT_MAX_INSTANCES: usize = 4096;
pub const DEFAULT_MAX_TYPE_DEPTH: usize = 64;
pub const DEFAULT_HEADER: &str = "This file was generated by lowc. Do not edit.";

/// A pattern over module paths, as written in bundling rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PathPattern {
    /// `*`
    Everything,
    /// `A.B.*`: the module `A.B` and every module below it.
    Subtree(Vec<String>),
    /// `A.B`: exactly the module `A.B`.
    Module(Vec<String>),
    /// `A.B::name`: one declaration.
    Decl(Vec<String>, String),
}

impl PathPattern {
    pub fn matches(&self, name: &QualifiedName) -> bool {
        match self {
            PathPattern::Everything => true,
            PathPattern::Subtree(prefix) => name.path.starts_with(prefix),
            PathPattern::Module(path) => &name.path == path,
            PathPattern::Decl(path, ident) => &name.path == path && &name.name == ident,
        }
    }

    /// Ordering key; larger is more specific.
    pub fn specificity(&self) -> (u8, usize) {
        match self {
            PathPattern::Everything => (0, 0),
            PathPattern::Subtree(prefix) => (1, prefix.len()),
            PathPattern::Module(path) => (2, path.len()),
            PathPattern::Decl(path, _) => (3, path.len()),
        }
    }

    /// File name used when a bundle does not name its file.
    fn default_file(&self) -> Option<String> {
        match self {
            PathPattern::Everything => None,
            PathPattern::Subtree(path) | PathPattern::Module(path) if path.is_empty() => None,
            PathPattern::Subtree(path) | PathPattern::Module(path) => Some(default_file(path)),
            PathPattern::Decl(path, name) => {
                let mut parts = path.clone();
                parts.push(name.clone());
                Some(default_file(&parts))
            }
        }
    }
}

fn parse_segments(input: &str, text: &str) -> Result<Vec<String>, ExtractError> {
    text.split('.')
        .map(|segment| {
            if is_identifier(segment) {
                Ok(segment.to_string())
            } else {
                Err(ExtractError::invalid_option(
                    input,
                    format!("`{segment}` is not a valid path segment"),
                ))
            }
        })
        .collect()
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '\'')
}

impl FromStr for PathPattern {
    type Err = ExtractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let text = input.trim();
        if text.is_empty() {
            return Err(ExtractError::invalid_option(input, "empty path pattern"));
        }
        if text == "*" {
            return Ok(PathPattern::Everything);
        }
        if let Some((path, name)) = text.split_once("::") {
            if !is_identifier(name) {
                return Err(ExtractError::invalid_option(
                    input,
                    format!("`{name}` is not a valid declaration name"),
                ));
            }
            return Ok(PathPattern::Decl(parse_segments(input, path)?, name.to_string()));
        }
        if let Some(prefix) = text.strip_suffix(".*") {
            return Ok(PathPattern::Subtree(parse_segments(input, prefix)?));
        }
        Ok(PathPattern::Module(parse_segments(input, text)?))
    }
}

impl TryFrom<String> for PathPattern {
    type Error = ExtractError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PathPattern> for String {
    fn from(value: PathPattern) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPattern::Everything => write!(f, "*"),
            PathPattern::Subtree(prefix) => write!(f, "{}.*", prefix.join(".")),
            PathPattern::Module(path) => write!(f, "{}", path.join(".")),
            PathPattern::Decl(path, name) => write!(f, "{}::{name}", path.join(".")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Merge(String),
    Drop,
    KeepSeparate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub pattern: PathPattern,
    pub action: Action,
}

/// `File=Pat1,Pat2`: every declaration matching one of the patterns goes to
/// `File`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bundle {
    pub file: String,
    pub patterns: Vec<PathPattern>,
}

impl FromStr for Bundle {
    type Err = ExtractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (file, rest) = match input.split_once('=') {
            Some((file, rest)) => (Some(file.trim()), rest),
            None => (None, input),
        };
        let patterns = rest
            .split(',')
            .map(str::parse)
            .collect::<Result<Vec<PathPattern>, _>>()?;
        let file = match file {
            Some(file) if is_identifier(file) => sanitize(file),
            Some(file) => {
                return Err(ExtractError::invalid_option(
                    input,
                    format!("`{file}` is not a valid file name"),
                ))
            }
            None => patterns
                .first()
                .and_then(PathPattern::default_file)
                .ok_or_else(|| {
                    ExtractError::invalid_option(input, "this bundle needs an explicit file name")
                })?,
        };
        Ok(Bundle { file, patterns })
    }
}

impl TryFrom<String> for Bundle {
    type Error = ExtractError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Bundle> for String {
    fn from(value: Bundle) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns = self
            .patterns
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        write!(f, "{}={}", self.file, patterns.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub bundles: Vec<Bundle>,
    pub drop: Vec<PathPattern>,
    pub keep_separate: Vec<PathPattern>,
    pub no_prefix: Vec<PathPattern>,
    pub trap_exit_code: i32,
    pub init_routine: String,
    pub max_instances: usize,
    pub max_type_depth: usize,
    pub header: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bundles: Vec::new(),
            drop: Vec::new(),
            keep_separate: Vec::new(),
            no_prefix: Vec::new(),
            trap_exit_code: DEFAULT_TRAP_EXIT_CODE,
            init_routine: DEFAULT_INIT_ROUTINE.to_string(),
            max_instances: DEFAULT_MAX_INSTANCES,
            max_type_depth: DEFAULT_MAX_TYPE_DEPTH,
            header: DEFAULT_HEADER.to_string(),
        }
    }
}

impl Options {
    pub fn from_json(text: &str) -> Result<Self, ExtractError> {
        let options: Options = serde_json::from_str(text)
            .map_err(|err| ExtractError::invalid_option(text, err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn with_bundle(mut self, rule: &str) -> Result<Self, ExtractError> {
        self.bundles.push(rule.parse()?);
        Ok(self)
    }

    pub fn with_drop(mut self, pattern: &str) -> Result<Self, ExtractError> {
        self.drop.push(pattern.parse()?);
        Ok(self)
    }

    pub fn with_keep_separate(mut self, pattern: &str) -> Result<Self, ExtractError> {
        self.keep_separate.push(pattern.parse()?);
        Ok(self)
    }

    pub fn with_no_prefix(mut self, pattern: &str) -> Result<Self, ExtractError> {
        self.no_prefix.push(pattern.parse()?);
        Ok(self)
    }

    pub fn with_trap_exit_code(mut self, code: i32) -> Self {
        self.trap_exit_code = code;
        self
    }

    pub fn with_init_routine(mut self, name: impl Into<String>) -> Self {
        self.init_routine = name.into();
        self
    }

    pub fn with_max_instances(mut self, limit: usize) -> Self {
        self.max_instances = limit;
        self
    }

    pub fn with_max_type_depth(mut self, limit: usize) -> Self {
        self.max_type_depth = limit;
        self
    }

    pub fn validate(&self) -> Result<(), ExtractError> {
        if !is_identifier(&self.init_routine) || self.init_routine.contains('\'') {
            return Err(ExtractError::invalid_option(
                &self.init_routine,
                "init routine name must be a C identifier",
            ));
        }
        if self.max_instances == 0 {
            return Err(ExtractError::invalid_option(
                "max_instances",
                "instance budget must be positive",
            ));
        }
        if self.max_type_depth == 0 {
            return Err(ExtractError::invalid_option(
                "max_type_depth",
                "type depth budget must be positive",
            ));
        }
        if self.header.contains("*/") {
            return Err(ExtractError::invalid_option(
                &self.header,
                "header text cannot close a C comment",
            ));
        }
        Ok(())
    }

    /// All bundling rules in declaration order: drops, then keep-separate
    /// entries, then bundles. Equal-specificity ties go to the earliest.
    pub fn rules(&self) -> Vec<Rule> {
        let mut rules = Vec::new();
        for pattern in &self.drop {
            rules.push(Rule {
                pattern: pattern.clone(),
                action: Action::Drop,
            });
        }
        for pattern in &self.keep_separate {
            rules.push(Rule {
                pattern: pattern.clone(),
                action: Action::KeepSeparate,
            });
        }
        for bundle in &self.bundles {
            for pattern in &bundle.patterns {
                rules.push(Rule {
                    pattern: pattern.clone(),
                    action: Action::Merge(bundle.file.clone()),
                });
            }
        }
        rules
    }

    pub fn is_no_prefix(&self, name: &QualifiedName) -> bool {
        self.no_prefix.iter().any(|pattern| pattern.matches(name))
    }
}
