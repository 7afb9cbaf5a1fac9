//! Auxiliary synthesis: structural equality functions and the global
//! initialization routine.

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::ast::{ArrayLen, Expr, ExprKind, GlobalDecl, QualifiedName, Span, Type};
use crate::error::ExtractError;
use crate::layout::{Layout, LayoutField};
use crate::lower::{Ctx, Dest, FnLowerer};
use crate::mono::MonoDecl;
use crate::naming::Placement;
use crate::ops::{Op, Width};
use crate::target::{CDecl, CExpr, CParam, CStmt, CType, Init, InitValue};

/// How two values of one type are compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EqStrategy {
    /// C `==` on the values themselves.
    Scalar,
    /// Unit values are always equal.
    Unit,
    /// Call the named synthesized function.
    Function(String),
}

/// Equality functions requested so far, in request order.
#[derive(Debug, Default)]
pub(crate) struct EqRegistry {
    requested: IndexMap<QualifiedName, (String, Placement)>,
    emitted: usize,
}

impl EqRegistry {
    pub(crate) fn len(&self) -> usize {
        self.requested.len()
    }
}

/// Decide how values of `ty` are compared, registering an equality
/// function for struct and union types on first use.
pub(crate) fn request_equality(
    cx: &mut Ctx<'_, '_>,
    ty: &Type,
    span: &Span,
) -> Result<EqStrategy, ExtractError> {
    let layouts = cx.layouts;
    match layouts.resolve_alias(ty) {
        Type::Unit => Ok(EqStrategy::Unit),
        Type::Int(_) | Type::Bool | Type::Buffer(_) => Ok(EqStrategy::Scalar),
        Type::Array { .. } => Err(ExtractError::non_representable(
            ty,
            "arrays are only compared as structure fields",
            span,
        )),
        Type::Named { name, .. } => {
            let layout = layouts.get(name).ok_or_else(|| {
                ExtractError::internal("synthesis", format!("no layout for `{name}`"))
            })?;
            match &layout.layout {
                Layout::Enum { .. } => Ok(EqStrategy::Scalar),
                Layout::Opaque => Err(ExtractError::non_representable(
                    name,
                    "abstract types have no structural equality",
                    span,
                )),
                Layout::Alias(_) => Err(ExtractError::internal(
                    "synthesis",
                    format!("alias `{name}` was not resolved"),
                )),
                Layout::Struct { .. } | Layout::Tagged { .. } => {
                    if let Some((func, placement)) = cx.eq.requested.get(name).cloned() {
                        cx.note_use(&placement);
                        return Ok(EqStrategy::Function(func));
                    }
                    // Equality on a dropped type still needs a home.
                    let placement = match &layout.placement {
                        Placement::File(_) => layout.placement.clone(),
                        Placement::Dropped => Placement::File(cx.current_file().to_string()),
                    };
                    let func = format!("eq__{}", layout.flat);
                    cx.resolver
                        .reserve(format!("equality of {name}"), &func, &placement)?;
                    trace!(%name, func = %func, "requested equality function");
                    cx.eq
                        .requested
                        .insert(name.clone(), (func.clone(), placement.clone()));
                    cx.note_use(&placement);
                    Ok(EqStrategy::Function(func))
                }
            }
        }
        Type::Tuple(_) | Type::Param(_) => Err(ExtractError::internal(
            "synthesis",
            format!("`{ty}` survived monomorphization"),
        )),
    }
}

/// Generate every requested equality function, including the ones the
/// generated functions request in turn.
pub(crate) fn equality_functions(
    cx: &mut Ctx<'_, '_>,
) -> Result<Vec<(String, CDecl)>, ExtractError> {
    let mut out = Vec::new();
    while let Some((name, (func, placement))) = cx
        .eq
        .requested
        .get_index(cx.eq.emitted)
        .map(|(name, entry)| (name.clone(), entry.clone()))
    {
        cx.eq.emitted += 1;
        let Placement::File(file) = placement else {
            return Err(ExtractError::internal(
                "synthesis",
                format!("equality of `{name}` has no output file"),
            ));
        };
        cx.enter(&file);
        let decl = equality_function(cx, &name, func)
            .map_err(|err| err.with_context(format!("in equality of `{name}`")))?;
        out.push((file, decl));
    }
    debug!(count = out.len(), "synthesized equality functions");
    Ok(out)
}

fn equality_function(
    cx: &mut Ctx<'_, '_>,
    name: &QualifiedName,
    func: String,
) -> Result<CDecl, ExtractError> {
    let layouts = cx.layouts;
    let layout = layouts
        .get(name)
        .ok_or_else(|| ExtractError::internal("synthesis", format!("no layout for `{name}`")))?;
    let (x, y) = (CExpr::var("x"), CExpr::var("y"));
    let mut body = Vec::new();
    match &layout.layout {
        Layout::Struct { fields, .. } => {
            let tests = compare_fields(cx, fields, &x, &y, &layout.span, &mut body)?;
            body.push(CStmt::Return(Some(CExpr::all(tests))));
        }
        Layout::Tagged { ctors, .. } => {
            body.push(CStmt::If {
                cond: CExpr::binary(
                    Op::Neq,
                    CExpr::field(x.clone(), "tag"),
                    CExpr::field(y.clone(), "tag"),
                ),
                then_block: vec![CStmt::Return(Some(CExpr::Bool(false)))],
                else_block: None,
            });
            for ctor in ctors {
                let Some(arm) = &ctor.arm else {
                    continue;
                };
                let px = CExpr::field(x.clone(), arm.clone());
                let py = CExpr::field(y.clone(), arm.clone());
                let mut block = Vec::new();
                let tests: Vec<CExpr> = if ctor.direct {
                    let field = ctor.stored().next().ok_or_else(|| {
                        ExtractError::internal("synthesis", "direct arm without a stored field")
                    })?;
                    compare(cx, &field.ty, px, py, &layout.span, &mut block, 0)?
                        .into_iter()
                        .collect()
                } else {
                    compare_fields(cx, &ctor.fields, &px, &py, &layout.span, &mut block)?
                };
                block.push(CStmt::Return(Some(CExpr::all(tests))));
                body.push(CStmt::If {
                    cond: CExpr::binary(
                        Op::Eq,
                        CExpr::field(x.clone(), "tag"),
                        CExpr::var(&ctor.tag.constant),
                    ),
                    then_block: block,
                    else_block: None,
                });
            }
            body.push(CStmt::Return(Some(CExpr::Bool(true))));
        }
        Layout::Enum { .. } | Layout::Alias(_) | Layout::Opaque => {
            return Err(ExtractError::internal(
                "synthesis",
                format!("`{name}` does not need an equality function"),
            ))
        }
    }
    let ty = CType::Named(layout.flat.clone());
    Ok(CDecl::Function {
        ret: CType::Bool,
        name: func,
        params: vec![
            CParam {
                ty: ty.clone(),
                name: "x".into(),
            },
            CParam {
                ty,
                name: "y".into(),
            },
        ],
        body,
    })
}

fn compare_fields(
    cx: &mut Ctx<'_, '_>,
    fields: &[LayoutField],
    x: &CExpr,
    y: &CExpr,
    span: &Span,
    out: &mut Vec<CStmt>,
) -> Result<Vec<CExpr>, ExtractError> {
    let mut tests = Vec::new();
    for field in fields.iter().filter(|field| !field.erased) {
        let lhs = CExpr::field(x.clone(), field.member.clone());
        let rhs = CExpr::field(y.clone(), field.member.clone());
        tests.extend(compare(cx, &field.ty, lhs, rhs, span, out, 0)?);
    }
    Ok(tests)
}

/// A test comparing `x` and `y`. Arrays are compared by a loop pushed onto
/// `out` that returns `false` early; they produce no test.
fn compare(
    cx: &mut Ctx<'_, '_>,
    ty: &Type,
    x: CExpr,
    y: CExpr,
    span: &Span,
    out: &mut Vec<CStmt>,
    depth: usize,
) -> Result<Option<CExpr>, ExtractError> {
    let layouts = cx.layouts;
    if let Type::Array { elem, len } = layouts.resolve_alias(ty) {
        let ArrayLen::Const(len) = len else {
            return Err(ExtractError::non_representable(ty, "index-dependent shape", span));
        };
        let var = if depth == 0 {
            "i".to_string()
        } else {
            format!("i{depth}")
        };
        let mut body = Vec::new();
        let test = compare(
            cx,
            elem,
            CExpr::index(x, CExpr::var(&var)),
            CExpr::index(y, CExpr::var(&var)),
            span,
            &mut body,
            depth + 1,
        )?;
        if let Some(test) = test {
            body.push(CStmt::If {
                cond: CExpr::not(test),
                then_block: vec![CStmt::Return(Some(CExpr::Bool(false)))],
                else_block: None,
            });
        }
        out.push(CStmt::For {
            var,
            width: Width::SizeT,
            bound: CExpr::Int {
                value: u64::from(*len),
                width: Width::SizeT,
            },
            body,
        });
        return Ok(None);
    }
    Ok(match request_equality(cx, ty, span)? {
        EqStrategy::Unit => None,
        EqStrategy::Scalar => Some(CExpr::binary(Op::Eq, x, y)),
        EqStrategy::Function(func) => Some(CExpr::call(func, vec![x, y])),
    })
}

/// Splits globals into constants, emitted with their initializer, and
/// runtime-computed ones, assigned by the init routine in declaration order.
#[derive(Debug, Default)]
pub(crate) struct GlobalScheduler {
    deferred: Vec<Deferred>,
}

#[derive(Debug)]
struct Deferred {
    file: String,
    flat: String,
    global: GlobalDecl,
}

impl GlobalScheduler {
    pub(crate) fn schedule(
        &mut self,
        cx: &mut Ctx<'_, '_>,
        entry: &MonoDecl,
        global: &GlobalDecl,
    ) -> Result<Option<CDecl>, ExtractError> {
        let flat = entry.resolved.flat.clone();
        let ty = cx.c_type(&global.ty)?;
        if is_constant(cx, &global.body) {
            let Some(ty) = ty else {
                return Ok(None);
            };
            let init = const_init(cx, &global.body)?;
            return Ok(Some(CDecl::Global {
                ty,
                name: flat,
                init: Some(init),
                constant: true,
            }));
        }
        if let Some(CType::Array(..)) = ty {
            return Err(ExtractError::non_representable(
                &global.ty,
                "array globals need a constant initializer",
                &global.span,
            ));
        }
        self.deferred.push(Deferred {
            file: cx.current_file().to_string(),
            flat: flat.clone(),
            global: global.clone(),
        });
        Ok(ty.map(|ty| CDecl::Global {
            ty,
            name: flat,
            init: None,
            constant: false,
        }))
    }

    /// The init routine assigning every deferred global, placed in the file
    /// of the first one. `None` when every global was constant.
    pub(crate) fn finish(
        self,
        cx: &mut Ctx<'_, '_>,
    ) -> Result<Option<(String, CDecl)>, ExtractError> {
        let Some(first) = self.deferred.first() else {
            return Ok(None);
        };
        let file = first.file.clone();
        let name = cx.options.init_routine.clone();
        cx.resolver
            .reserve("global init routine", &name, &Placement::File(file.clone()))?;
        cx.enter(&file);
        let mut body = Vec::new();
        let mut lowerer = FnLowerer::new(cx);
        for deferred in &self.deferred {
            lowerer
                .cx
                .note_use(&Placement::File(deferred.file.clone()));
            let dest = if lowerer.cx.is_unit(&deferred.global.ty) {
                Dest::Discard
            } else {
                Dest::Assign(CExpr::var(&deferred.flat))
            };
            lowerer
                .lower_tail(&deferred.global.body, &dest, &mut body)
                .map_err(|err| err.with_context(format!("in global `{}`", deferred.flat)))?;
        }
        let body = lowerer.finish_body(body);
        debug!(globals = self.deferred.len(), routine = %name, "synthesized init routine");
        Ok(Some((file, CDecl::InitRoutine { name, body })))
    }
}

/// Built only from literals, operators over scalar constants, and
/// constructor, record, tuple or array applications over constants.
fn is_constant(cx: &Ctx<'_, '_>, expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Int(_) | ExprKind::Bool(_) | ExprKind::Unit => true,
        ExprKind::Op { args, .. } => args
            .iter()
            .all(|arg| is_scalar(cx, &arg.ty) && is_constant(cx, arg)),
        ExprKind::Cons { args, .. } | ExprKind::Tuple(args) | ExprKind::ArrayLit(args) => {
            args.iter().all(|arg| is_constant(cx, arg))
        }
        ExprKind::Record(fields) => fields.iter().all(|(_, value)| is_constant(cx, value)),
        _ => false,
    }
}

fn is_scalar(cx: &Ctx<'_, '_>, ty: &Type) -> bool {
    match cx.layouts.resolve_alias(ty) {
        Type::Int(_) | Type::Bool | Type::Unit => true,
        Type::Named { .. } => cx
            .layouts
            .named(ty)
            .is_some_and(|layout| matches!(layout.layout, Layout::Enum { .. })),
        _ => false,
    }
}

/// Static initializer for a constant expression. Aggregates become brace
/// lists rather than compound literals, which are not constant in C.
fn const_init(cx: &mut Ctx<'_, '_>, expr: &Expr) -> Result<InitValue, ExtractError> {
    let layouts = cx.layouts;
    Ok(match &expr.kind {
        ExprKind::Int(value) => {
            let Type::Int(width) = *layouts.resolve_alias(&expr.ty) else {
                return Err(ExtractError::internal(
                    "synthesis",
                    format!("integer literal of type `{}`", expr.ty),
                ));
            };
            InitValue::Expr(CExpr::Int {
                value: width.truncate(*value),
                width,
            })
        }
        ExprKind::Bool(value) => InitValue::Expr(CExpr::Bool(*value)),
        ExprKind::Op { op, args } => {
            let mut operands = Vec::with_capacity(args.len());
            for arg in args {
                match const_init(cx, arg)? {
                    InitValue::Expr(value) => operands.push(value),
                    InitValue::List(_) => {
                        return Err(ExtractError::internal(
                            "synthesis",
                            format!("aggregate operand of `{}`", op.token()),
                        ))
                    }
                }
            }
            InitValue::Expr(match layouts.resolve_alias(&expr.ty) {
                Type::Int(width) => CExpr::arith(*op, operands, *width),
                _ => CExpr::Op {
                    op: *op,
                    args: operands,
                },
            })
        }
        ExprKind::Cons { ctor, args } => {
            let layout = cx.type_layout(&expr.ty)?;
            let unknown = || {
                ExtractError::internal(
                    "synthesis",
                    format!("`{}` has no constructor `{ctor}`", layout.name),
                )
            };
            match &layout.layout {
                Layout::Enum { .. } => {
                    InitValue::Expr(CExpr::var(&layout.tag(ctor).ok_or_else(unknown)?.constant))
                }
                Layout::Struct { fields, .. } => {
                    let pairs = fields.iter().zip(args).collect::<Vec<_>>();
                    InitValue::List(const_fields(cx, &pairs)?)
                }
                Layout::Tagged { .. } => {
                    let ctor_layout = layout.ctor(ctor).ok_or_else(unknown)?;
                    let pairs = ctor_layout.fields.iter().zip(args).collect::<Vec<_>>();
                    let mut payload = const_fields(cx, &pairs)?;
                    let mut inits = vec![Init::field("tag", CExpr::var(&ctor_layout.tag.constant))];
                    if let Some(arm) = &ctor_layout.arm {
                        let value = match payload.pop() {
                            Some(single) if ctor_layout.direct => single.value,
                            Some(last) => {
                                payload.push(last);
                                InitValue::List(payload)
                            }
                            None => InitValue::List(Vec::new()),
                        };
                        inits.push(Init {
                            designator: Some(arm.clone()),
                            value,
                        });
                    }
                    InitValue::List(inits)
                }
                Layout::Alias(_) | Layout::Opaque => return Err(unknown()),
            }
        }
        ExprKind::Record(values) => {
            let layout = cx.type_layout(&expr.ty)?;
            let mut pairs = Vec::with_capacity(values.len());
            for (name, value) in values {
                let field = layout.struct_field(name).ok_or_else(|| {
                    ExtractError::internal(
                        "synthesis",
                        format!("record of `{}` has no field `{name}`", layout.name),
                    )
                })?;
                pairs.push((field, value));
            }
            InitValue::List(const_fields(cx, &pairs)?)
        }
        ExprKind::Tuple(items) => {
            let layout = cx.type_layout(&expr.ty)?;
            let Layout::Struct { fields, .. } = &layout.layout else {
                return Err(ExtractError::internal(
                    "synthesis",
                    format!("tuple type `{}` is not a struct", layout.name),
                ));
            };
            let pairs = fields.iter().zip(items).collect::<Vec<_>>();
            InitValue::List(const_fields(cx, &pairs)?)
        }
        ExprKind::ArrayLit(items) => InitValue::List(
            items
                .iter()
                .map(|item| {
                    Ok(Init {
                        designator: None,
                        value: const_init(cx, item)?,
                    })
                })
                .collect::<Result<Vec<_>, ExtractError>>()?,
        ),
        _ => {
            return Err(ExtractError::internal(
                "synthesis",
                format!("non-constant initializer at {}", expr.span),
            ))
        }
    })
}

fn const_fields(
    cx: &mut Ctx<'_, '_>,
    pairs: &[(&LayoutField, &Expr)],
) -> Result<Vec<Init>, ExtractError> {
    let mut inits = Vec::new();
    for (field, value) in pairs {
        if field.erased {
            continue;
        }
        inits.push(Init {
            designator: Some(field.member.clone()),
            value: const_init(cx, value)?,
        });
    }
    Ok(inits)
}
