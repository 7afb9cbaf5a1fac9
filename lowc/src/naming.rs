//! Name resolution and bundling.
//!
//! Maps qualified source names to flat C identifiers and decides which
//! output file each declaration lands in. Every flat name handed out during
//! a run, synthesized ones included, goes through one append-only collision
//! table keyed by output file.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::{debug, instrument};

use crate::ast::{Program, QualifiedName};
use crate::error::ExtractError;
use crate::options::{Action, Options, Rule};

pub const SEPARATOR: &str = "_";

/// File for declarations whose module path is empty.
pub const ROOT_FILE: &str = "Root";

const DROPPED_KEY: &str = "(dropped)";

const C_RESERVED: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "_Bool", "_Complex", "_Imaginary", "bool",
    "true", "false", "NULL", "main", "malloc", "free", "exit", "fprintf", "stderr", "size_t",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Placement {
    File(String),
    Dropped,
}

impl Placement {
    pub fn file(&self) -> Option<&str> {
        match self {
            Placement::File(file) => Some(file),
            Placement::Dropped => None,
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Placement::Dropped)
    }

    fn table_key(&self) -> &str {
        self.file().unwrap_or(DROPPED_KEY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub flat: String,
    pub placement: Placement,
}

/// Replace characters C does not accept in identifiers.
pub fn sanitize(ident: &str) -> String {
    let mut out: String = ident
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

pub fn is_reserved(ident: &str) -> bool {
    C_RESERVED.contains(&ident)
}

/// Append `_` to identifiers that are C keywords or names the generated code
/// relies on.
pub fn escape_reserved(ident: String) -> String {
    if is_reserved(&ident) {
        format!("{ident}_")
    } else {
        ident
    }
}

/// The flat identifier for `name`. With `no_prefix` the module path is
/// dropped. Flattening a name with an empty path returns its identifier, so
/// applying it to already-flat names changes nothing.
pub fn flatten(name: &QualifiedName, no_prefix: bool) -> String {
    let ident = sanitize(&name.name);
    if no_prefix || name.path.is_empty() {
        return escape_reserved(ident);
    }
    let mut parts = name.path.iter().map(|s| sanitize(s)).collect::<Vec<_>>();
    parts.push(ident);
    escape_reserved(parts.join(SEPARATOR))
}

/// File a declaration goes to when no rule says otherwise.
pub fn default_file(path: &[String]) -> String {
    if path.is_empty() {
        ROOT_FILE.to_string()
    } else {
        path.iter().map(|s| sanitize(s)).collect::<Vec<_>>().join(SEPARATOR)
    }
}

pub struct Resolver<'a> {
    options: &'a Options,
    rules: Vec<Rule>,
    resolved: HashMap<QualifiedName, Resolved>,
    tables: IndexMap<String, IndexMap<String, String>>,
    taken: HashSet<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(options: &'a Options) -> Self {
        let mut rules = options.rules();
        // Stable: equal specificity keeps declaration order.
        rules.sort_by(|a, b| b.pattern.specificity().cmp(&a.pattern.specificity()));
        Self {
            options,
            rules,
            resolved: HashMap::new(),
            tables: IndexMap::new(),
            taken: HashSet::new(),
        }
    }

    pub fn options(&self) -> &'a Options {
        self.options
    }

    /// Where `name` goes, according to the most specific matching rule.
    pub fn placement(&self, name: &QualifiedName) -> Placement {
        let rule = self.rules.iter().find(|rule| rule.pattern.matches(name));
        match rule.map(|rule| &rule.action) {
            Some(Action::Merge(file)) => Placement::File(file.clone()),
            Some(Action::Drop) => Placement::Dropped,
            Some(Action::KeepSeparate) | None => Placement::File(default_file(&name.path)),
        }
    }

    pub fn flat(&self, name: &QualifiedName) -> String {
        flatten(name, self.options.is_no_prefix(name))
    }

    pub fn lookup(&self, name: &QualifiedName) -> Option<&Resolved> {
        self.resolved.get(name)
    }

    /// Assign `name` its flat name and file, registering it in the
    /// collision table. Resolving the same name twice returns the first
    /// answer.
    pub fn resolve(&mut self, name: &QualifiedName) -> Result<Resolved, ExtractError> {
        let placement = self.placement(name);
        self.resolve_in(name, placement)
    }

    /// Like [`Resolver::resolve`], with the file chosen by the caller. Used
    /// for instances, which follow their definition or first user.
    pub fn resolve_in(
        &mut self,
        name: &QualifiedName,
        placement: Placement,
    ) -> Result<Resolved, ExtractError> {
        let flat = self.flat(name);
        self.resolve_as(name, flat, placement)
    }

    /// Register `name` under a flat name computed by the caller.
    /// Monomorphized instances derive theirs from the definition's flat name.
    pub fn resolve_as(
        &mut self,
        name: &QualifiedName,
        flat: String,
        placement: Placement,
    ) -> Result<Resolved, ExtractError> {
        if let Some(resolved) = self.resolved.get(name) {
            return Ok(resolved.clone());
        }
        self.register(name.to_string(), &flat, &placement)?;
        let resolved = Resolved { flat, placement };
        self.resolved.insert(name.clone(), resolved.clone());
        Ok(resolved)
    }

    /// Claim a synthesized identifier (tag constant, equality function,
    /// init routine) in `placement`'s file.
    pub fn reserve(
        &mut self,
        owner: impl Into<String>,
        flat: &str,
        placement: &Placement,
    ) -> Result<(), ExtractError> {
        self.register(owner.into(), flat, placement)
    }

    /// Whether `flat` is already claimed in the file of `placement`.
    pub fn is_taken_in(&self, placement: &Placement, flat: &str) -> bool {
        self.tables
            .get(placement.table_key())
            .is_some_and(|table| table.contains_key(flat))
    }

    /// Whether any file declares `flat`; locals avoid these so they never
    /// shadow a global they reference.
    pub fn is_declared(&self, flat: &str) -> bool {
        self.taken.contains(flat)
    }

    fn register(
        &mut self,
        owner: String,
        flat: &str,
        placement: &Placement,
    ) -> Result<(), ExtractError> {
        let key = placement.table_key().to_string();
        let table = self.tables.entry(key.clone()).or_default();
        if let Some(existing) = table.get(flat) {
            if *existing == owner {
                return Ok(());
            }
            return Err(ExtractError::NamingCollision {
                file: key,
                flat: flat.to_string(),
                first: existing.clone(),
                second: owner,
            });
        }
        table.insert(flat.to_string(), owner);
        self.taken.insert(flat.to_string());
        Ok(())
    }
}

/// Resolve every source declaration up front so later passes only look
/// names up.
#[instrument(skip_all)]
pub fn resolve_program(program: &Program, resolver: &mut Resolver<'_>) -> Result<(), ExtractError> {
    let mut count = 0usize;
    for module in &program.modules {
        for decl in &module.decls {
            let name = QualifiedName::new(&module.path, decl.name());
            resolver.resolve(&name)?;
            count += 1;
        }
    }
    debug!(declarations = count, files = resolver.tables.len(), "resolved names");
    Ok(())
}

/// Unique C names for the locals of one function.
#[derive(Debug, Default)]
pub struct LocalNames {
    used: HashSet<String>,
}

impl LocalNames {
    /// A fresh identifier derived from `base` that is not used in this
    /// function and not rejected by `taken`.
    pub fn fresh(&mut self, base: &str, taken: impl Fn(&str) -> bool) -> String {
        let base = escape_reserved(sanitize(base));
        let mut candidate = base.clone();
        let mut suffix = 1usize;
        while self.used.contains(&candidate) || taken(&candidate) {
            candidate = format!("{base}{suffix}");
            suffix += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}
