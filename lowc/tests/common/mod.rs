//! Shared helpers for the integration tests: terse builders for checked
//! source programs and a small interpreter for the target AST, so runtime
//! behaviour can be checked without a C compiler.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};

use lowc::ast::{
    Arm, Constructor, Decl, Expr, ExprKind, ExternDecl, Field, FunctionDecl, GlobalDecl, Lifetime,
    Module, Param, Pattern, PatternKind, Program, QualifiedName, Span, Type, TypeBody, TypeDecl,
};
use lowc::ops::{Op, Width};
use lowc::target::{CDecl, CExpr, CParam, CStmt, CType, Init, InitValue, Member, TargetProgram};

pub const FILE: &str = "M.fst";

pub fn span(line: u32, column: u32) -> Span {
    Span::new(FILE, line, column)
}

pub fn qn(path: &[&str], name: &str) -> QualifiedName {
    QualifiedName::new(path, name)
}

pub fn m(name: &str) -> QualifiedName {
    qn(&["M"], name)
}

pub fn int_ty(width: Width) -> Type {
    Type::Int(width)
}

pub fn u32_ty() -> Type {
    Type::Int(Width::U32)
}

pub fn named(name: QualifiedName) -> Type {
    Type::named(name)
}

pub fn applied(name: QualifiedName, args: Vec<Type>) -> Type {
    Type::Named { name, args }
}

// Expressions

pub fn int(value: u64, ty: Type) -> Expr {
    Expr::new(ExprKind::Int(value), ty, span(1, 1))
}

pub fn u32_lit(value: u64) -> Expr {
    int(value, u32_ty())
}

pub fn boolean(value: bool) -> Expr {
    Expr::new(ExprKind::Bool(value), Type::Bool, span(1, 1))
}

pub fn local(name: &str, ty: Type) -> Expr {
    Expr::new(ExprKind::Local(name.into()), ty, span(1, 1))
}

pub fn global_ref(name: QualifiedName, ty: Type) -> Expr {
    Expr::new(ExprKind::Global { name }, ty, span(1, 1))
}

pub fn call(func: QualifiedName, args: Vec<Expr>, ret: Type) -> Expr {
    call_with(func, Vec::new(), args, ret)
}

pub fn call_with(func: QualifiedName, type_args: Vec<Type>, args: Vec<Expr>, ret: Type) -> Expr {
    Expr::new(
        ExprKind::Call {
            func,
            type_args,
            args,
        },
        ret,
        span(1, 1),
    )
}

pub fn op(op: Op, args: Vec<Expr>, ty: Type) -> Expr {
    Expr::new(ExprKind::Op { op, args }, ty, span(1, 1))
}

pub fn cons(ctor: &str, args: Vec<Expr>, ty: Type) -> Expr {
    Expr::new(
        ExprKind::Cons {
            ctor: ctor.into(),
            args,
        },
        ty,
        span(1, 1),
    )
}

pub fn record(fields: Vec<(&str, Expr)>, ty: Type) -> Expr {
    Expr::new(
        ExprKind::Record(fields.into_iter().map(|(n, e)| (n.to_string(), e)).collect()),
        ty,
        span(1, 1),
    )
}

pub fn field(expr: Expr, name: &str, ty: Type) -> Expr {
    Expr::new(
        ExprKind::Field {
            expr: Box::new(expr),
            field: name.into(),
        },
        ty,
        span(1, 1),
    )
}

pub fn if_(cond: Expr, then_branch: Expr, else_branch: Expr) -> Expr {
    let ty = then_branch.ty.clone();
    Expr::new(
        ExprKind::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        },
        ty,
        span(1, 1),
    )
}

pub fn let_(name: &str, value: Expr, body: Expr) -> Expr {
    let ty = body.ty.clone();
    Expr::new(
        ExprKind::Let {
            name: name.into(),
            value: Box::new(value),
            body: Box::new(body),
        },
        ty,
        span(1, 1),
    )
}

pub fn buf_create(lifetime: Lifetime, init: Expr, len: Expr) -> Expr {
    let ty = Type::buffer(init.ty.clone());
    Expr::new(
        ExprKind::BufCreate {
            lifetime,
            init: Box::new(init),
            len: Box::new(len),
        },
        ty,
        span(1, 1),
    )
}

pub fn buf_read(buf: Expr, index: Expr, ty: Type) -> Expr {
    Expr::new(
        ExprKind::BufRead {
            buf: Box::new(buf),
            index: Box::new(index),
        },
        ty,
        span(1, 1),
    )
}

pub fn abort(message: &str, ty: Type) -> Expr {
    Expr::new(ExprKind::Abort(message.into()), ty, span(1, 1))
}

pub fn match_at(scrutinee: Expr, arms: Vec<Arm>, ty: Type, at: Span) -> Expr {
    Expr::new(
        ExprKind::Match {
            scrutinee: Box::new(scrutinee),
            arms,
        },
        ty,
        at,
    )
}

pub fn arm(pattern: Pattern, body: Expr) -> Arm {
    Arm {
        pattern,
        guard: None,
        body,
    }
}

pub fn guarded(pattern: Pattern, guard: Expr, body: Expr) -> Arm {
    Arm {
        pattern,
        guard: Some(guard),
        body,
    }
}

// Patterns

pub fn pwild(ty: Type) -> Pattern {
    Pattern {
        kind: PatternKind::Wildcard,
        ty,
    }
}

pub fn pbind(name: &str, ty: Type) -> Pattern {
    Pattern {
        kind: PatternKind::Bind(name.into()),
        ty,
    }
}

pub fn pcons(ctor: &str, args: Vec<Pattern>, ty: Type) -> Pattern {
    Pattern {
        kind: PatternKind::Cons {
            ctor: ctor.into(),
            args,
        },
        ty,
    }
}

// Declarations

pub fn function(name: &str, params: Vec<(&str, Type)>, ret: Type, body: Expr) -> Decl {
    generic_function(name, &[], params, ret, body)
}

pub fn generic_function(
    name: &str,
    type_params: &[&str],
    params: Vec<(&str, Type)>,
    ret: Type,
    body: Expr,
) -> Decl {
    Decl::Function(FunctionDecl {
        name: name.into(),
        type_params: type_params.iter().map(|p| p.to_string()).collect(),
        params: params_of(params),
        ret,
        body,
        span: span(1, 1),
    })
}

pub fn extern_fn(name: &str, params: Vec<(&str, Type)>, ret: Type) -> Decl {
    Decl::Extern(ExternDecl {
        name: name.into(),
        type_params: Vec::new(),
        params: params_of(params),
        ret,
        span: span(1, 1),
    })
}

pub fn global(name: &str, ty: Type, body: Expr) -> Decl {
    Decl::Global(GlobalDecl {
        name: name.into(),
        ty,
        body,
        span: span(1, 1),
    })
}

pub fn variant(name: &str, ctors: Vec<(&str, Vec<(&str, Type)>)>) -> Decl {
    Decl::Type(TypeDecl {
        name: name.into(),
        params: Vec::new(),
        indices: Vec::new(),
        body: TypeBody::Variant(
            ctors
                .into_iter()
                .map(|(name, fields)| Constructor {
                    name: name.into(),
                    fields: fields_of(fields),
                })
                .collect(),
        ),
        span: span(1, 1),
    })
}

pub fn structure(name: &str, params: &[&str], fields: Vec<(&str, Type)>) -> Decl {
    Decl::Type(TypeDecl {
        name: name.into(),
        params: params.iter().map(|p| p.to_string()).collect(),
        indices: Vec::new(),
        body: TypeBody::Struct(fields_of(fields)),
        span: span(1, 1),
    })
}

pub fn module(path: &[&str], decls: Vec<Decl>) -> Module {
    Module {
        path: path.iter().map(|s| s.to_string()).collect(),
        decls,
    }
}

pub fn program(modules: Vec<Module>) -> Program {
    Program { modules }
}

fn params_of(params: Vec<(&str, Type)>) -> Vec<Param> {
    params
        .into_iter()
        .map(|(name, ty)| Param {
            name: name.into(),
            ty,
        })
        .collect()
}

fn fields_of(fields: Vec<(&str, Type)>) -> Vec<Field> {
    fields
        .into_iter()
        .map(|(name, ty)| Field {
            name: name.into(),
            ty,
        })
        .collect()
}

/// Every declaration of the lowered program, across files.
pub fn all_decls(program: &TargetProgram) -> impl Iterator<Item = &CDecl> {
    program.files.iter().flat_map(|file| &file.decls)
}

pub fn function_names(program: &TargetProgram) -> Vec<String> {
    all_decls(program)
        .filter_map(|decl| match decl {
            CDecl::Function { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

// Interpreter

/// Runtime values. An integer holds the two's complement bits of its C
/// type; operators apply C's promotions and conversions using the static
/// types the program declares.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(u64),
    Bool(bool),
    /// Struct members set so far. A member that was never written, such as
    /// an inactive union arm, is absent.
    Struct(BTreeMap<String, Value>),
    Array(Vec<Value>),
    Ptr { block: usize, offset: usize },
    Uninit,
}

impl Value {
    pub fn tagged(tag: u64, arm: Option<(&str, Value)>) -> Value {
        let mut members = BTreeMap::new();
        members.insert("tag".to_string(), Value::Int(tag));
        if let Some((name, value)) = arm {
            members.insert(name.to_string(), value);
        }
        Value::Struct(members)
    }

    /// The bits of `value` as a C integer of `width`.
    pub fn int(width: Width, value: i64) -> Value {
        Value::Int(width.truncate(value as u64))
    }

    pub fn member(&self, name: &str) -> &Value {
        match self {
            Value::Struct(members) => members
                .get(name)
                .unwrap_or_else(|| panic!("read of unset member `{name}` in {self:?}")),
            other => panic!("member `{name}` of non-struct {other:?}"),
        }
    }
}

/// Mathematical value of `bits` read as an integer of `width`.
fn extend(bits: u64, width: Width) -> i128 {
    let bits = width.truncate(bits);
    if width.is_signed() {
        let shift = 64 - width.bits();
        i128::from(((bits << shift) as i64) >> shift)
    } else {
        i128::from(bits)
    }
}

fn wrap(value: i128, width: Width) -> u64 {
    width.truncate(value as u64)
}

/// C's integer promotion: everything narrower than `int` becomes `int`.
fn promote(width: Width) -> Width {
    if width.bits() < 32 {
        Width::I32
    } else {
        width
    }
}

/// The usual arithmetic conversions on an LP64 target.
fn common(a: Width, b: Width) -> Width {
    let (a, b) = (promote(a), promote(b));
    if a == b {
        return a;
    }
    if a.is_signed() == b.is_signed() {
        return if a.bits() >= b.bits() { a } else { b };
    }
    let (signed, unsigned) = if a.is_signed() { (a, b) } else { (b, a) };
    if unsigned.bits() >= signed.bits() {
        unsigned
    } else {
        signed
    }
}

/// The target program called `exit`.
#[derive(Debug, Clone, PartialEq)]
pub struct Exit {
    pub code: i32,
    pub message: String,
}

enum Flow {
    Next,
    Return(Option<Value>),
}

struct Function<'p> {
    ret: &'p CType,
    params: &'p [CParam],
    body: &'p [CStmt],
}

struct Frame {
    values: HashMap<String, Value>,
    types: HashMap<String, CType>,
    ret: CType,
}

static VOID: CType = CType::Void;
const TAG_CONSTANT: CType = CType::Int(Width::I32);

pub struct Machine<'p> {
    functions: HashMap<&'p str, Function<'p>>,
    externs: HashMap<&'p str, &'p CType>,
    constants: HashMap<&'p str, u64>,
    typedefs: HashMap<String, CType>,
    /// Member types per struct; payload structs of union arms are keyed
    /// `<struct>.<arm>`.
    structs: HashMap<String, HashMap<String, CType>>,
    globals: HashMap<String, Value>,
    global_types: HashMap<String, CType>,
    heap: Vec<Option<Vec<Value>>>,
    frames: Vec<Frame>,
    /// Calls made to `extern` functions, in order.
    pub calls: Vec<(String, Vec<Value>)>,
    /// What each extern returns; unit when absent.
    pub extern_results: HashMap<String, Value>,
}

impl<'p> Machine<'p> {
    pub fn new(program: &'p TargetProgram) -> Self {
        let mut machine = Machine {
            functions: HashMap::new(),
            externs: HashMap::new(),
            constants: HashMap::new(),
            typedefs: HashMap::new(),
            structs: HashMap::new(),
            globals: HashMap::new(),
            global_types: HashMap::new(),
            heap: Vec::new(),
            frames: Vec::new(),
            calls: Vec::new(),
            extern_results: HashMap::new(),
        };
        let mut inits = Vec::new();
        for decl in all_decls(program) {
            match decl {
                CDecl::Function {
                    ret,
                    name,
                    params,
                    body,
                } => {
                    machine.functions.insert(
                        name,
                        Function {
                            ret,
                            params: params.as_slice(),
                            body: body.as_slice(),
                        },
                    );
                }
                CDecl::InitRoutine { name, body } => {
                    machine.functions.insert(
                        name,
                        Function {
                            ret: &VOID,
                            params: &[],
                            body: body.as_slice(),
                        },
                    );
                }
                CDecl::Extern { ret, name, .. } => {
                    machine.externs.insert(name, ret);
                }
                CDecl::Constants { items } => {
                    for (name, value) in items {
                        machine.constants.insert(name, u64::from(*value));
                    }
                }
                CDecl::Typedef { ty, name } => {
                    machine.typedefs.insert(name.clone(), ty.clone());
                }
                CDecl::Struct { name, members } => machine.add_struct(name, members),
                CDecl::Global { ty, name, init, .. } => {
                    machine.global_types.insert(name.clone(), ty.clone());
                    inits.push((name, init));
                }
                CDecl::ForwardStruct { .. } => {}
            }
        }
        for (name, init) in inits {
            let value = match init {
                Some(init) => machine.init_value(init).expect("constant initializer"),
                None => Value::Uninit,
            };
            let ty = machine.global_types[name.as_str()].clone();
            let value = machine.convert(value, None, &ty);
            machine.globals.insert(name.clone(), value);
        }
        machine
    }

    fn add_struct(&mut self, name: &str, members: &[Member]) {
        let mut fields = HashMap::new();
        for member in members {
            match member {
                Member::Field { ty, name } => {
                    fields.insert(name.clone(), ty.clone());
                }
                Member::Union(arms) => {
                    for arm in arms {
                        match arm {
                            Member::Field { ty, name } => {
                                fields.insert(name.clone(), ty.clone());
                            }
                            Member::Struct {
                                name: arm,
                                fields: payload,
                            } => {
                                let key = format!("{name}.{arm}");
                                fields.insert(arm.clone(), CType::Named(key.clone()));
                                self.add_struct(&key, payload);
                            }
                            Member::Union(_) => panic!("nested anonymous union in `{name}`"),
                        }
                    }
                }
                Member::Struct {
                    name: arm,
                    fields: payload,
                } => {
                    let key = format!("{name}.{arm}");
                    fields.insert(arm.clone(), CType::Named(key.clone()));
                    self.add_struct(&key, payload);
                }
            }
        }
        self.structs.insert(name.to_string(), fields);
    }

    pub fn global(&self, name: &str) -> &Value {
        &self.globals[name]
    }

    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>, Exit> {
        if let Some(function) = self.functions.get(name) {
            let (ret, params, body) = (function.ret, function.params, function.body);
            assert_eq!(params.len(), args.len(), "arity of `{name}`");
            let mut frame = Frame {
                values: HashMap::new(),
                types: HashMap::new(),
                ret: ret.clone(),
            };
            for (param, arg) in params.iter().zip(args) {
                let arg = self.convert(arg, None, &param.ty);
                frame.values.insert(param.name.clone(), arg);
                frame.types.insert(param.name.clone(), param.ty.clone());
            }
            self.frames.push(frame);
            let flow = self.exec(body);
            self.frames.pop();
            return match flow? {
                Flow::Return(value) => Ok(value),
                Flow::Next => Ok(None),
            };
        }
        if self.externs.contains_key(name) {
            self.calls.push((name.to_string(), args));
            return Ok(self.extern_results.get(name).cloned());
        }
        match name {
            "malloc" => {
                let Value::Int(len) = args[0] else {
                    panic!("malloc of {:?}", args[0]);
                };
                Ok(Some(self.alloc(len as usize)))
            }
            "free" => {
                let Value::Ptr { block, offset: 0 } = args[0] else {
                    panic!("free of {:?}", args[0]);
                };
                assert!(self.heap[block].take().is_some(), "double free");
                Ok(None)
            }
            _ => panic!("call to unknown function `{name}`"),
        }
    }

    /// Read `len` cells of the buffer `ptr` points to.
    pub fn read_buffer(&self, ptr: &Value, len: usize) -> Vec<Value> {
        let Value::Ptr { block, offset } = *ptr else {
            panic!("not a pointer: {ptr:?}");
        };
        let cells = self.heap[block].as_ref().expect("use after free");
        cells[offset..offset + len].to_vec()
    }

    fn alloc(&mut self, len: usize) -> Value {
        self.heap.push(Some(vec![Value::Uninit; len]));
        Value::Ptr {
            block: self.heap.len() - 1,
            offset: 0,
        }
    }

    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active frame")
    }

    fn declare(&mut self, name: &str, ty: CType, value: Value) {
        let frame = self.frame();
        frame.values.insert(name.to_string(), value);
        frame.types.insert(name.to_string(), ty);
    }

    fn resolve<'t>(&'t self, ty: &'t CType) -> &'t CType {
        let mut current = ty;
        while let CType::Named(name) = current {
            match self.typedefs.get(name) {
                Some(target) => current = target,
                None => break,
            }
        }
        current
    }

    fn width_of(&self, ty: &CType) -> Option<Width> {
        match self.resolve(ty) {
            CType::Int(width) => Some(*width),
            _ => None,
        }
    }

    /// Static C type of `expr`, when the interpreter can tell.
    fn type_of(&self, expr: &CExpr) -> Option<CType> {
        match expr {
            CExpr::Int { width, .. } | CExpr::Cast { width, .. } => Some(CType::Int(*width)),
            CExpr::Bool(_) => Some(CType::Bool),
            CExpr::Var(name) => self
                .frames
                .last()
                .and_then(|frame| frame.types.get(name))
                .or_else(|| self.global_types.get(name))
                .cloned()
                .or_else(|| self.constants.contains_key(name.as_str()).then_some(TAG_CONSTANT)),
            CExpr::Call { func, .. } => self
                .functions
                .get(func.as_str())
                .map(|function| function.ret.clone())
                .or_else(|| self.externs.get(func.as_str()).map(|ret| (*ret).clone())),
            CExpr::Field { base, field } => {
                let base = self.type_of(base)?;
                let CType::Named(name) = self.resolve(&base) else {
                    return None;
                };
                self.structs.get(name)?.get(field).cloned()
            }
            CExpr::Index { base, .. } => match self.type_of(base)? {
                CType::Pointer(elem) | CType::Array(elem, _) => Some(*elem),
                _ => None,
            },
            CExpr::Op { op, args } => {
                if op.is_comparison() || op.is_logical() {
                    return Some(CType::Bool);
                }
                let lhs = self.width_of(&self.type_of(&args[0])?)?;
                if op.is_unary() || matches!(op, Op::BShiftL | Op::BShiftR) {
                    return Some(CType::Int(promote(lhs)));
                }
                let rhs = self.width_of(&self.type_of(&args[1])?)?;
                Some(CType::Int(common(lhs, rhs)))
            }
            CExpr::Compound { ty, .. } => Some(ty.clone()),
            CExpr::SizeOf(_) => Some(CType::Int(Width::SizeT)),
            CExpr::Str(_) => None,
        }
    }

    /// Implicit conversion of `value` to `to`, as on assignment.
    fn convert(&self, value: Value, from: Option<&CType>, to: &CType) -> Value {
        let Some(to) = self.width_of(to) else {
            return value;
        };
        let Value::Int(bits) = value else {
            return value;
        };
        match from.and_then(|from| self.width_of(from)) {
            Some(from) => Value::Int(wrap(extend(bits, from), to)),
            None => Value::Int(to.truncate(bits)),
        }
    }

    fn exec(&mut self, stmts: &[CStmt]) -> Result<Flow, Exit> {
        for stmt in stmts {
            if let Flow::Return(value) = self.stmt(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }

    fn stmt(&mut self, stmt: &CStmt) -> Result<Flow, Exit> {
        match stmt {
            CStmt::Decl { ty, name, init } => {
                let value = match init {
                    Some(init) => {
                        let from = self.type_of(init);
                        let value = self.eval(init)?;
                        self.convert(value, from.as_ref(), ty)
                    }
                    None => Value::Uninit,
                };
                self.declare(name, ty.clone(), value);
            }
            CStmt::DeclArray { elem, name, len } => {
                let Value::Int(len) = self.eval(len)? else {
                    panic!("array length is not an integer");
                };
                let buf = self.alloc(len as usize);
                self.declare(name, CType::pointer(elem.clone()), buf);
            }
            CStmt::Assign { lhs, rhs } => {
                let from = self.type_of(rhs);
                let value = self.eval(rhs)?;
                let value = match self.type_of(lhs) {
                    Some(to) => self.convert(value, from.as_ref(), &to),
                    None => value,
                };
                self.assign(lhs, value)?;
            }
            CStmt::Expr(value) => {
                self.eval(value)?;
            }
            CStmt::If {
                cond,
                then_block,
                else_block,
            } => {
                if self.truth(cond)? {
                    return self.exec(then_block);
                } else if let Some(else_block) = else_block {
                    return self.exec(else_block);
                }
            }
            CStmt::Switch {
                scrutinee,
                cases,
                default,
            } => {
                let Value::Int(value) = self.eval(scrutinee)? else {
                    panic!("switch on a non-integer");
                };
                let body = cases
                    .iter()
                    .find(|(label, _)| self.constants[label.as_str()] == value)
                    .map_or(default, |(_, body)| body);
                return self.exec(body);
            }
            CStmt::For {
                var,
                width,
                bound,
                body,
            } => {
                let Value::Int(bound) = self.eval(bound)? else {
                    panic!("loop bound is not an integer");
                };
                for i in 0..bound {
                    self.declare(var, CType::Int(*width), Value::Int(i));
                    if let Flow::Return(value) = self.exec(body)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            CStmt::Return(value) => {
                let value = match value {
                    Some(value) => {
                        let from = self.type_of(value);
                        let result = self.eval(value)?;
                        let ret = self.frame().ret.clone();
                        Some(self.convert(result, from.as_ref(), &ret))
                    }
                    None => None,
                };
                return Ok(Flow::Return(value));
            }
            CStmt::Block(stmts) => return self.exec(stmts),
            CStmt::Trap { message, exit_code } => {
                return Err(Exit {
                    code: *exit_code,
                    message: message.clone(),
                })
            }
        }
        Ok(Flow::Next)
    }

    fn assign(&mut self, lhs: &CExpr, value: Value) -> Result<(), Exit> {
        match lhs {
            CExpr::Var(name) => {
                if let Some(slot) = self
                    .frames
                    .last_mut()
                    .and_then(|frame| frame.values.get_mut(name))
                {
                    *slot = value;
                } else {
                    let slot = self
                        .globals
                        .get_mut(name)
                        .unwrap_or_else(|| panic!("assignment to unknown `{name}`"));
                    *slot = value;
                }
            }
            CExpr::Index { base, index } => {
                let Value::Ptr { block, offset } = self.eval(base)? else {
                    panic!("indexed store through a non-pointer");
                };
                let Value::Int(index) = self.eval(index)? else {
                    panic!("non-integer index");
                };
                let cells = self.heap[block].as_mut().expect("use after free");
                cells[offset + index as usize] = value;
            }
            other => panic!("unsupported assignment target {other:?}"),
        }
        Ok(())
    }

    fn truth(&mut self, cond: &CExpr) -> Result<bool, Exit> {
        match self.eval(cond)? {
            Value::Bool(value) => Ok(value),
            other => panic!("condition is not a bool: {other:?}"),
        }
    }

    fn lookup(&self, name: &str) -> Value {
        let value = self
            .frames
            .last()
            .and_then(|frame| frame.values.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
            .or_else(|| self.constants.get(name).map(|v| Value::Int(*v)))
            .unwrap_or_else(|| panic!("unbound variable `{name}`"));
        assert!(value != Value::Uninit, "read of uninitialized `{name}`");
        value
    }

    fn eval(&mut self, expr: &CExpr) -> Result<Value, Exit> {
        Ok(match expr {
            CExpr::Int { value, width } => Value::Int(width.truncate(*value)),
            CExpr::Bool(value) => Value::Bool(*value),
            CExpr::Var(name) => self.lookup(name),
            CExpr::Str(text) => panic!("string value {text:?}"),
            CExpr::SizeOf(_) => Value::Int(1),
            CExpr::Cast { width, expr: inner } => {
                let from = self.type_of(inner);
                let value = self.eval(inner)?;
                self.convert(value, from.as_ref(), &CType::Int(*width))
            }
            CExpr::Call { func, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(func, values)?.unwrap_or(Value::Uninit)
            }
            CExpr::Field { base, field } => self.eval(base)?.member(field).clone(),
            CExpr::Index { base, index } => {
                let base = self.eval(base)?;
                let Value::Int(index) = self.eval(index)? else {
                    panic!("non-integer index");
                };
                match base {
                    Value::Array(items) => items[index as usize].clone(),
                    Value::Ptr { block, offset } => {
                        let cells = self.heap[block].as_ref().expect("use after free");
                        let cell = cells[offset + index as usize].clone();
                        assert!(cell != Value::Uninit, "read of uninitialized buffer cell");
                        cell
                    }
                    other => panic!("indexing {other:?}"),
                }
            }
            CExpr::Compound { inits, .. } => self.init_list(inits)?,
            CExpr::Op { op, args } => self.op(*op, args)?,
        })
    }

    fn init_value(&mut self, init: &InitValue) -> Result<Value, Exit> {
        match init {
            InitValue::Expr(value) => self.eval(value),
            InitValue::List(inits) => self.init_list(inits),
        }
    }

    fn init_list(&mut self, inits: &[Init]) -> Result<Value, Exit> {
        if inits.iter().all(|init| init.designator.is_none()) {
            let mut items = Vec::with_capacity(inits.len());
            for init in inits {
                items.push(self.init_value(&init.value)?);
            }
            return Ok(Value::Array(items));
        }
        let mut members = BTreeMap::new();
        for init in inits {
            let name = init.designator.clone().expect("mixed designated initializers");
            let value = self.init_value(&init.value)?;
            members.insert(name, value);
        }
        Ok(Value::Struct(members))
    }

    /// Integer width of an operand; unknown types count as `uint64_t`.
    fn operand_width(&self, expr: &CExpr) -> Width {
        self.type_of(expr)
            .and_then(|ty| self.width_of(&ty))
            .unwrap_or(Width::U64)
    }

    fn op(&mut self, op: Op, args: &[CExpr]) -> Result<Value, Exit> {
        match op {
            Op::And => return Ok(Value::Bool(self.truth(&args[0])? && self.truth(&args[1])?)),
            Op::Or => return Ok(Value::Bool(self.truth(&args[0])? || self.truth(&args[1])?)),
            Op::Not => return Ok(Value::Bool(!self.truth(&args[0])?)),
            _ => {}
        }
        let lhs_width = self.operand_width(&args[0]);
        let lhs = self.eval(&args[0])?;
        if op.is_unary() {
            let Value::Int(bits) = lhs else {
                panic!("`{}` on {lhs:?}", op.token());
            };
            let width = promote(lhs_width);
            let value = extend(bits, lhs_width);
            return Ok(Value::Int(wrap(
                match op {
                    Op::BNot => !value,
                    _ => value.wrapping_neg(),
                },
                width,
            )));
        }
        let rhs_width = self.operand_width(&args[1]);
        let rhs = self.eval(&args[1])?;
        let (a, b) = match (lhs, rhs) {
            (Value::Ptr { block, offset }, Value::Int(delta)) if op == Op::Add => {
                return Ok(Value::Ptr {
                    block,
                    offset: offset + delta as usize,
                })
            }
            (Value::Int(a), Value::Int(b)) => (a, b),
            (lhs, rhs) => {
                return match op {
                    Op::Eq => Ok(Value::Bool(lhs == rhs)),
                    Op::Neq => Ok(Value::Bool(lhs != rhs)),
                    _ => panic!("`{}` on {lhs:?} and {rhs:?}", op.token()),
                }
            }
        };
        if let Op::BShiftL | Op::BShiftR = op {
            let width = promote(lhs_width);
            let value = extend(a, lhs_width);
            let amount = extend(b, rhs_width) as u32;
            return Ok(Value::Int(wrap(
                match op {
                    Op::BShiftL => value.wrapping_shl(amount),
                    _ => value >> amount,
                },
                width,
            )));
        }
        let width = common(lhs_width, rhs_width);
        // Convert both operands to the common type first.
        let a = extend(wrap(extend(a, lhs_width), width), width);
        let b = extend(wrap(extend(b, rhs_width), width), width);
        let int = |value: i128| Value::Int(wrap(value, width));
        Ok(match op {
            Op::Add => int(a.wrapping_add(b)),
            Op::Sub => int(a.wrapping_sub(b)),
            Op::Mult => int(a.wrapping_mul(b)),
            Op::Div => int(a / b),
            Op::Mod => int(a % b),
            Op::BOr => int(a | b),
            Op::BAnd => int(a & b),
            Op::BXor => int(a ^ b),
            Op::Eq => Value::Bool(a == b),
            Op::Neq => Value::Bool(a != b),
            Op::Lt => Value::Bool(a < b),
            Op::Lte => Value::Bool(a <= b),
            Op::Gt => Value::Bool(a > b),
            Op::Gte => Value::Bool(a >= b),
            other => panic!("unexpected operator {other:?}"),
        })
    }
}
