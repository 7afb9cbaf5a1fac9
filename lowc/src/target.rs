//! Target AST: the closed, monomorphic, statement-level C subset the printer
//! renders. Nothing here refers to type parameters, patterns or source
//! expressions.

use crate::ops::{Op, Width};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CType {
    Void,
    Bool,
    Int(Width),
    Named(String),
    Pointer(Box<CType>),
    Array(Box<CType>, u32),
}

impl CType {
    pub fn pointer(to: CType) -> Self {
        CType::Pointer(Box::new(to))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CExpr {
    Int { value: u64, width: Width },
    Bool(bool),
    /// A local, a global, or a `#define`d tag constant.
    Var(String),
    Call { func: String, args: Vec<CExpr> },
    Op { op: Op, args: Vec<CExpr> },
    /// `(W)expr`
    Cast { width: Width, expr: Box<CExpr> },
    Field { base: Box<CExpr>, field: String },
    Index { base: Box<CExpr>, index: Box<CExpr> },
    /// `(T){ .a = x, ... }`
    Compound { ty: CType, inits: Vec<Init> },
    SizeOf(CType),
    /// String literal; only used for diagnostics.
    Str(String),
}

impl CExpr {
    pub fn var(name: impl Into<String>) -> Self {
        CExpr::Var(name.into())
    }

    pub fn field(base: CExpr, field: impl Into<String>) -> Self {
        CExpr::Field {
            base: Box::new(base),
            field: field.into(),
        }
    }

    pub fn index(base: CExpr, index: CExpr) -> Self {
        CExpr::Index {
            base: Box::new(base),
            index: Box::new(index),
        }
    }

    pub fn binary(op: Op, lhs: CExpr, rhs: CExpr) -> Self {
        CExpr::Op {
            op,
            args: vec![lhs, rhs],
        }
    }

    /// `op` over integers of `width`. Results that C's integer promotions
    /// could carry out of range are converted back to `width`.
    pub fn arith(op: Op, args: Vec<CExpr>, width: Width) -> Self {
        let value = CExpr::Op { op, args };
        if width.bits() < 32 && op.may_leave_range() {
            CExpr::Cast {
                width,
                expr: Box::new(value),
            }
        } else {
            value
        }
    }

    pub fn not(expr: CExpr) -> Self {
        CExpr::Op {
            op: Op::Not,
            args: vec![expr],
        }
    }

    pub fn call(func: impl Into<String>, args: Vec<CExpr>) -> Self {
        CExpr::Call {
            func: func.into(),
            args,
        }
    }

    /// Conjunction of `tests`; `true` when empty.
    pub fn all(tests: Vec<CExpr>) -> Self {
        let mut tests = tests.into_iter();
        match tests.next() {
            None => CExpr::Bool(true),
            Some(first) => tests.fold(first, |acc, test| CExpr::binary(Op::And, acc, test)),
        }
    }

    /// Variables, literals and field paths off them. Evaluating these has no
    /// effect and no later effect in the same function can change them.
    pub fn is_atomic(&self) -> bool {
        match self {
            CExpr::Int { .. } | CExpr::Bool(_) | CExpr::Var(_) | CExpr::Str(_) => true,
            CExpr::SizeOf(_) => true,
            CExpr::Field { base, .. } | CExpr::Cast { expr: base, .. } => base.is_atomic(),
            _ => false,
        }
    }

    /// Whether evaluating this may call out or read memory that a call
    /// could change.
    pub fn has_effects(&self) -> bool {
        match self {
            CExpr::Int { .. } | CExpr::Bool(_) | CExpr::Var(_) | CExpr::Str(_) | CExpr::SizeOf(_) => {
                false
            }
            CExpr::Call { .. } | CExpr::Index { .. } => true,
            CExpr::Op { args, .. } => args.iter().any(CExpr::has_effects),
            CExpr::Field { base, .. } | CExpr::Cast { expr: base, .. } => base.has_effects(),
            CExpr::Compound { inits, .. } => inits.iter().any(|init| init.value.has_effects()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Init {
    pub designator: Option<String>,
    pub value: InitValue,
}

impl Init {
    pub fn field(name: impl Into<String>, value: CExpr) -> Self {
        Self {
            designator: Some(name.into()),
            value: InitValue::Expr(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InitValue {
    Expr(CExpr),
    List(Vec<Init>),
}

impl InitValue {
    fn has_effects(&self) -> bool {
        match self {
            InitValue::Expr(expr) => expr.has_effects(),
            InitValue::List(inits) => inits.iter().any(|init| init.value.has_effects()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CStmt {
    Decl {
        ty: CType,
        name: String,
        init: Option<CExpr>,
    },
    /// `T name[len];` with a length only known at run time.
    DeclArray {
        elem: CType,
        name: String,
        len: CExpr,
    },
    Assign {
        lhs: CExpr,
        rhs: CExpr,
    },
    Expr(CExpr),
    If {
        cond: CExpr,
        then_block: Vec<CStmt>,
        else_block: Option<Vec<CStmt>>,
    },
    Switch {
        scrutinee: CExpr,
        cases: Vec<(String, Vec<CStmt>)>,
        default: Vec<CStmt>,
    },
    /// `for (W var = 0; var < bound; var++)`
    For {
        var: String,
        width: Width,
        bound: CExpr,
        body: Vec<CStmt>,
    },
    Return(Option<CExpr>),
    Block(Vec<CStmt>),
    /// Print `message` on stderr and exit with `exit_code`.
    Trap {
        message: String,
        exit_code: i32,
    },
}

impl CStmt {
    /// Whether control can fall off the end of this statement.
    pub fn falls_through(&self) -> bool {
        match self {
            CStmt::Return(_) | CStmt::Trap { .. } => false,
            CStmt::Block(stmts) => block_falls_through(stmts),
            CStmt::If {
                then_block,
                else_block: Some(else_block),
                ..
            } => block_falls_through(then_block) || block_falls_through(else_block),
            _ => true,
        }
    }
}

pub fn block_falls_through(stmts: &[CStmt]) -> bool {
    stmts.last().map_or(true, CStmt::falls_through)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Field { ty: CType, name: String },
    /// Anonymous union of arms.
    Union(Vec<Member>),
    /// Named member of anonymous struct type.
    Struct { name: String, fields: Vec<Member> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CParam {
    pub ty: CType,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CDecl {
    /// `typedef struct X_s X;`
    ForwardStruct { name: String },
    /// `typedef <ty> name;`
    Typedef { ty: CType, name: String },
    /// `#define` constants for tags.
    Constants { items: Vec<(String, u32)> },
    /// `struct X_s { ... };`
    Struct { name: String, members: Vec<Member> },
    /// `extern` prototype of a function defined elsewhere.
    Extern {
        ret: CType,
        name: String,
        params: Vec<CParam>,
    },
    Global {
        ty: CType,
        name: String,
        init: Option<InitValue>,
        constant: bool,
    },
    /// The synthesized global-initialization routine.
    InitRoutine { name: String, body: Vec<CStmt> },
    Function {
        ret: CType,
        name: String,
        params: Vec<CParam>,
        body: Vec<CStmt>,
    },
}

impl CDecl {
    /// Rank in the fixed per-file order: types, prototypes, globals, init
    /// routine, functions.
    pub fn section(&self) -> u8 {
        match self {
            CDecl::ForwardStruct { .. } => 0,
            CDecl::Typedef { .. } | CDecl::Constants { .. } | CDecl::Struct { .. } => 1,
            CDecl::Extern { .. } => 2,
            CDecl::Global { .. } => 3,
            CDecl::InitRoutine { .. } => 4,
            CDecl::Function { .. } => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetFile {
    pub name: String,
    pub decls: Vec<CDecl>,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetProgram {
    pub files: Vec<TargetFile>,
    pub init_routine: Option<String>,
}

impl TargetProgram {
    pub fn file(&self, name: &str) -> Option<&TargetFile> {
        self.files.iter().find(|file| file.name == name)
    }
}
