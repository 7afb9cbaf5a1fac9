//! Checked source AST handed over by the front end.
//!
//! Everything here is already type-checked: names are resolved to
//! declarations, every expression carries its type, and matches are known to
//! be exhaustive. The extraction passes only re-enforce representability.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;
use crate::ops::{Op, Width};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A module path plus the identifier declared in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    pub path: Vec<String>,
    pub name: String,
}

impl QualifiedName {
    pub fn new<S: AsRef<str>>(path: &[S], name: impl Into<String>) -> Self {
        Self {
            path: path.iter().map(|s| s.as_ref().to_string()).collect(),
            name: name.into(),
        }
    }

    /// Same module, different identifier.
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self {
            path: self.path.clone(),
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.path {
            write!(f, "{segment}.")?;
        }
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrayLen {
    Const(u32),
    /// Length given by a value index of the enclosing type.
    Index(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Int(Width),
    Bool,
    Unit,
    Buffer(Box<Type>),
    Array { elem: Box<Type>, len: ArrayLen },
    Named { name: QualifiedName, args: Vec<Type> },
    Tuple(Vec<Type>),
    Param(String),
}

impl Type {
    pub fn named(name: QualifiedName) -> Self {
        Type::Named {
            name,
            args: Vec::new(),
        }
    }

    pub fn buffer(elem: Type) -> Self {
        Type::Buffer(Box::new(elem))
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Type::Unit)
    }

    /// Nesting depth of type constructors; primitives count as one.
    pub fn depth(&self) -> usize {
        match self {
            Type::Int(_) | Type::Bool | Type::Unit | Type::Param(_) => 1,
            Type::Buffer(elem) | Type::Array { elem, .. } => 1 + elem.depth(),
            Type::Named { args, .. } | Type::Tuple(args) => {
                1 + args.iter().map(Type::depth).max().unwrap_or(0)
            }
        }
    }

    /// First type parameter occurring in this type, if any.
    pub fn find_param(&self) -> Option<&str> {
        match self {
            Type::Param(name) => Some(name),
            Type::Int(_) | Type::Bool | Type::Unit => None,
            Type::Buffer(elem) | Type::Array { elem, .. } => elem.find_param(),
            Type::Named { args, .. } | Type::Tuple(args) => {
                args.iter().find_map(Type::find_param)
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int(width) => write!(f, "{}", width.c_name()),
            Type::Bool => write!(f, "bool"),
            Type::Unit => write!(f, "unit"),
            Type::Buffer(elem) => write!(f, "buffer({elem})"),
            Type::Array { elem, len } => match len {
                ArrayLen::Const(n) => write!(f, "array({elem}, {n})"),
                ArrayLen::Index(index) => write!(f, "array({elem}, {index})"),
            },
            Type::Named { name, args } => {
                write!(f, "{name}")?;
                if !args.is_empty() {
                    let args = args.iter().map(ToString::to_string).collect::<Vec<_>>();
                    write!(f, "<{}>", args.join(", "))?;
                }
                Ok(())
            }
            Type::Tuple(items) => {
                let items = items.iter().map(ToString::to_string).collect::<Vec<_>>();
                write!(f, "({})", items.join(" * "))
            }
            Type::Param(name) => write!(f, "'{name}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub modules: Vec<Module>,
}

impl Program {
    pub fn from_json(text: &str) -> Result<Self, ExtractError> {
        serde_json::from_str(text).map_err(|err| ExtractError::InvalidInput {
            message: err.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String, ExtractError> {
        serde_json::to_string_pretty(self).map_err(|err| ExtractError::InvalidInput {
            message: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub path: Vec<String>,
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    Type(TypeDecl),
    Function(FunctionDecl),
    Extern(ExternDecl),
    Global(GlobalDecl),
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Type(decl) => &decl.name,
            Decl::Function(decl) => &decl.name,
            Decl::Extern(decl) => &decl.name,
            Decl::Global(decl) => &decl.name,
        }
    }

    pub fn type_params(&self) -> &[String] {
        match self {
            Decl::Type(decl) => &decl.params,
            Decl::Function(decl) => &decl.type_params,
            Decl::Extern(decl) => &decl.type_params,
            Decl::Global(_) => &[],
        }
    }

    pub fn span(&self) -> &Span {
        match self {
            Decl::Type(decl) => &decl.span,
            Decl::Function(decl) => &decl.span,
            Decl::Extern(decl) => &decl.span,
            Decl::Global(decl) => &decl.span,
        }
    }

    pub fn is_generic(&self) -> bool {
        !self.type_params().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    /// Value indices the type's shape may depend on.
    #[serde(default)]
    pub indices: Vec<String>,
    pub body: TypeBody,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeBody {
    Struct(Vec<Field>),
    Variant(Vec<Constructor>),
    Alias(Type),
    Abstract,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constructor {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default)]
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    pub ret: Type,
    pub body: Expr,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternDecl {
    pub name: String,
    #[serde(default)]
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    pub ret: Type,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: Type,
    pub body: Expr,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    #[serde(default)]
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type, span: Span) -> Self {
        Self { kind, ty, span }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    Stack,
    Heap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Int(u64),
    Bool(bool),
    Unit,
    Local(String),
    Global {
        name: QualifiedName,
    },
    Call {
        func: QualifiedName,
        #[serde(default)]
        type_args: Vec<Type>,
        args: Vec<Expr>,
    },
    Op {
        op: Op,
        args: Vec<Expr>,
    },
    Let {
        name: String,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Seq {
        first: Box<Expr>,
        second: Box<Expr>,
    },
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<Arm>,
    },
    /// Constructor application; the variant type is the expression's type.
    Cons {
        ctor: String,
        args: Vec<Expr>,
    },
    Record(Vec<(String, Expr)>),
    Tuple(Vec<Expr>),
    Field {
        expr: Box<Expr>,
        field: String,
    },
    ArrayLit(Vec<Expr>),
    BufRead {
        buf: Box<Expr>,
        index: Box<Expr>,
    },
    BufWrite {
        buf: Box<Expr>,
        index: Box<Expr>,
        value: Box<Expr>,
    },
    BufSub {
        buf: Box<Expr>,
        offset: Box<Expr>,
    },
    BufCreate {
        lifetime: Lifetime,
        init: Box<Expr>,
        len: Box<Expr>,
    },
    BufFree {
        buf: Box<Expr>,
    },
    Abort(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    pub pattern: Pattern,
    #[serde(default)]
    pub guard: Option<Expr>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub kind: PatternKind,
    pub ty: Type,
}

impl Pattern {
    /// Matches every value of its type without testing anything.
    pub fn is_irrefutable(&self) -> bool {
        match &self.kind {
            PatternKind::Wildcard | PatternKind::Bind(_) => true,
            PatternKind::Tuple(items) => items.iter().all(Pattern::is_irrefutable),
            PatternKind::Record(fields) => fields.iter().all(|(_, p)| p.is_irrefutable()),
            PatternKind::Int(_) | PatternKind::Bool(_) | PatternKind::Cons { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatternKind {
    Wildcard,
    Bind(String),
    Int(u64),
    Bool(bool),
    Cons { ctor: String, args: Vec<Pattern> },
    Tuple(Vec<Pattern>),
    Record(Vec<(String, Pattern)>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names_display_dotted() {
        let name = QualifiedName::new(&["Crypto", "Hash"], "digest");
        assert_eq!(name.to_string(), "Crypto.Hash.digest");
        assert_eq!(QualifiedName::new::<&str>(&[], "x").to_string(), "x");
    }

    #[test]
    fn depth_counts_nesting() {
        let ty = Type::Named {
            name: QualifiedName::new(&["M"], "pair"),
            args: vec![Type::buffer(Type::Int(Width::U8)), Type::Bool],
        };
        assert_eq!(ty.depth(), 3);
        assert_eq!(ty.find_param(), None);
        assert_eq!(Type::Tuple(vec![Type::Param("a".into())]).find_param(), Some("a"));
    }

    #[test]
    fn programs_round_trip_through_json() {
        let program = Program {
            modules: vec![Module {
                path: vec!["M".into()],
                decls: vec![Decl::Global(GlobalDecl {
                    name: "limit".into(),
                    ty: Type::Int(Width::U32),
                    body: Expr::new(ExprKind::Int(100), Type::Int(Width::U32), Span::default()),
                    span: Span::new("M.fst", 3, 1),
                })],
            }],
        };
        let text = program.to_json().unwrap();
        assert_eq!(Program::from_json(&text).unwrap(), program);
    }

    #[test]
    fn malformed_json_is_invalid_input() {
        let err = Program::from_json("{ \"modules\": 3 }").unwrap_err();
        assert!(matches!(err, ExtractError::InvalidInput { .. }));
    }
}
