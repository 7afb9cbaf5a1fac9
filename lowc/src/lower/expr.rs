//! Expression lowering.
//!
//! Source bodies are expressions; C bodies are statements. Every expression
//! is lowered towards a destination: returned, assigned to an lvalue, or
//! discarded. Sub-expressions that need statements (conditionals, matches,
//! lets, buffer creation) are hoisted into fresh temporaries, and earlier
//! operands with effects are hoisted before them so evaluation stays left to
//! right.

use std::collections::{HashMap, HashSet};

use crate::ast::{Expr, ExprKind, Lifetime, Param, Span, Type};
use crate::error::ExtractError;
use crate::layout::{Layout, LayoutField};
use crate::naming::LocalNames;
use crate::ops::{Op, Width};
use crate::synth::{self, EqStrategy};
use crate::target::{CExpr, CParam, CStmt, CType, Init, InitValue};

use super::Ctx;

#[derive(Debug, Clone)]
pub(crate) enum Dest {
    Return,
    Assign(CExpr),
    Discard,
}

/// Lowers the body of one C function.
pub(crate) struct FnLowerer<'c, 'a, 'o> {
    pub(crate) cx: &'c mut Ctx<'a, 'o>,
    locals: LocalNames,
    // Source local -> C local; `None` for erased unit values.
    scope: HashMap<String, Option<String>>,
    params: HashSet<String>,
    /// Conditional blocks enclosing the statements being lowered.
    depth: u32,
    /// Stack arrays that must live as long as the whole function.
    frame: Vec<CStmt>,
}

pub(super) type Saved = (String, Option<Option<String>>);

impl<'c, 'a, 'o> FnLowerer<'c, 'a, 'o> {
    pub(crate) fn new(cx: &'c mut Ctx<'a, 'o>) -> Self {
        Self {
            cx,
            locals: LocalNames::default(),
            scope: HashMap::new(),
            params: HashSet::new(),
            depth: 0,
            frame: Vec::new(),
        }
    }

    /// Run `lower` for statements that only execute conditionally.
    pub(super) fn nested<T>(
        &mut self,
        lower: impl FnOnce(&mut Self) -> Result<T, ExtractError>,
    ) -> Result<T, ExtractError> {
        self.depth += 1;
        let result = lower(self);
        self.depth -= 1;
        result
    }

    /// `body` preceded by the stack arrays hoisted out of nested blocks.
    pub(crate) fn finish_body(&mut self, body: Vec<CStmt>) -> Vec<CStmt> {
        let mut stmts = std::mem::take(&mut self.frame);
        stmts.extend(body);
        stmts
    }

    pub(crate) fn fresh(&mut self, base: &str) -> String {
        let resolver = &*self.cx.resolver;
        self.locals.fresh(base, |name| resolver.is_declared(name))
    }

    pub(super) fn bind(&mut self, name: &str, local: Option<String>) -> Saved {
        (name.to_string(), self.scope.insert(name.to_string(), local))
    }

    pub(super) fn restore(&mut self, saved: Vec<Saved>) {
        for (name, previous) in saved.into_iter().rev() {
            match previous {
                Some(previous) => {
                    self.scope.insert(name, previous);
                }
                None => {
                    self.scope.remove(&name);
                }
            }
        }
    }

    pub(crate) fn bind_params(
        &mut self,
        params: &[Param],
        span: &Span,
    ) -> Result<Vec<CParam>, ExtractError> {
        let mut out = Vec::new();
        for param in params {
            match self.cx.value_type(&param.ty, span)? {
                Some(ty) => {
                    let name = self.fresh(&param.name);
                    self.bind(&param.name, Some(name.clone()));
                    self.params.insert(name.clone());
                    out.push(CParam { ty, name });
                }
                None => {
                    self.bind(&param.name, None);
                }
            }
        }
        Ok(out)
    }

    /// Lower `expr` so that its value ends up in `dest`.
    pub(crate) fn lower_tail(
        &mut self,
        expr: &Expr,
        dest: &Dest,
        out: &mut Vec<CStmt>,
    ) -> Result<(), ExtractError> {
        match &expr.kind {
            ExprKind::Let { name, value, body } => {
                let saved = self.lower_let(name, value, out)?;
                let result = self.lower_tail(body, dest, out);
                self.restore(vec![saved]);
                result
            }
            ExprKind::Seq { first, second } => {
                self.lower_tail(first, &Dest::Discard, out)?;
                self.lower_tail(second, dest, out)
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.expect_operand(cond, out)?;
                let (then_block, else_block) = self.nested(|this| {
                    let mut then_block = Vec::new();
                    this.lower_tail(then_branch, dest, &mut then_block)?;
                    let mut else_block = Vec::new();
                    this.lower_tail(else_branch, dest, &mut else_block)?;
                    Ok((then_block, else_block))
                })?;
                out.push(CStmt::If {
                    cond,
                    then_block,
                    else_block: (!else_block.is_empty()).then_some(else_block),
                });
                Ok(())
            }
            ExprKind::Match { scrutinee, arms } => self.lower_match(expr, scrutinee, arms, dest, out),
            ExprKind::Abort(message) => {
                out.push(CStmt::Trap {
                    message: format!("{message} at {}", expr.span),
                    exit_code: self.cx.options.trap_exit_code,
                });
                Ok(())
            }
            ExprKind::BufWrite { buf, index, value } => {
                let values = self.operands(&[buf, index, value], out)?;
                if let [Some(buf), Some(index), Some(value)] = values.as_slice() {
                    out.push(CStmt::Assign {
                        lhs: CExpr::index(buf.clone(), index.clone()),
                        rhs: value.clone(),
                    });
                }
                Ok(())
            }
            ExprKind::BufFree { buf } => {
                let buf = self.expect_operand(buf, out)?;
                out.push(CStmt::Expr(CExpr::call("free", vec![buf])));
                Ok(())
            }
            _ => {
                let value = self.lower_value(expr, out)?;
                self.finish(dest, value, out);
                Ok(())
            }
        }
    }

    fn finish(&mut self, dest: &Dest, value: Option<CExpr>, out: &mut Vec<CStmt>) {
        match (dest, value) {
            (Dest::Return, value) => out.push(CStmt::Return(value)),
            (Dest::Assign(lhs), Some(value)) => out.push(CStmt::Assign {
                lhs: lhs.clone(),
                rhs: value,
            }),
            (Dest::Discard, Some(value)) if value.has_effects() => out.push(CStmt::Expr(value)),
            (Dest::Assign(_) | Dest::Discard, _) => {}
        }
    }

    /// Lower `expr` as an operand. Unit values are evaluated for their
    /// effects and produce no C value.
    pub(crate) fn lower_operand(
        &mut self,
        expr: &Expr,
        out: &mut Vec<CStmt>,
    ) -> Result<Option<CExpr>, ExtractError> {
        if self.cx.is_unit(&expr.ty) {
            self.lower_tail(expr, &Dest::Discard, out)?;
            return Ok(None);
        }
        self.lower_value(expr, out)
    }

    pub(crate) fn expect_operand(
        &mut self,
        expr: &Expr,
        out: &mut Vec<CStmt>,
    ) -> Result<CExpr, ExtractError> {
        self.lower_operand(expr, out)?.ok_or_else(|| {
            ExtractError::internal(
                "lowering",
                format!("unit value used where a value is required at {}", expr.span),
            )
        })
    }

    /// Lower operands left to right. An operand with effects first forces
    /// earlier effectful operands into temporaries.
    pub(crate) fn operands(
        &mut self,
        exprs: &[&Expr],
        out: &mut Vec<CStmt>,
    ) -> Result<Vec<Option<CExpr>>, ExtractError> {
        let mut values: Vec<Option<CExpr>> = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let mut pre = Vec::new();
            let value = self.lower_operand(expr, &mut pre)?;
            let effectful = !pre.is_empty() || value.as_ref().is_some_and(CExpr::has_effects);
            if effectful {
                for (slot, earlier) in values.iter_mut().zip(exprs) {
                    if let Some(prev) = slot {
                        if prev.has_effects() {
                            *prev = self.spill(prev.clone(), &earlier.ty, &earlier.span, out)?;
                        }
                    }
                }
            }
            out.extend(pre);
            values.push(value);
        }
        Ok(values)
    }

    /// Bind `value` to a fresh temporary and return the temporary.
    pub(crate) fn spill(
        &mut self,
        value: CExpr,
        ty: &Type,
        span: &Span,
        out: &mut Vec<CStmt>,
    ) -> Result<CExpr, ExtractError> {
        if value.is_atomic() {
            return Ok(value);
        }
        let c_ty = self.cx.value_type(ty, span)?.ok_or_else(|| {
            ExtractError::internal("lowering", format!("spilling a unit value at {span}"))
        })?;
        let name = self.fresh("tmp");
        out.push(CStmt::Decl {
            ty: c_ty,
            name: name.clone(),
            init: Some(value),
        });
        Ok(CExpr::Var(name))
    }

    /// Lower a statement-shaped expression into a fresh temporary.
    fn into_temp(&mut self, expr: &Expr, out: &mut Vec<CStmt>) -> Result<CExpr, ExtractError> {
        let ty = self.cx.value_type(&expr.ty, &expr.span)?.ok_or_else(|| {
            ExtractError::internal("lowering", format!("unit temporary at {}", expr.span))
        })?;
        let name = self.fresh("tmp");
        out.push(CStmt::Decl {
            ty,
            name: name.clone(),
            init: None,
        });
        self.lower_tail(expr, &Dest::Assign(CExpr::var(&name)), out)?;
        Ok(CExpr::Var(name))
    }

    fn lower_let(
        &mut self,
        name: &str,
        value: &Expr,
        out: &mut Vec<CStmt>,
    ) -> Result<Saved, ExtractError> {
        if self.cx.is_unit(&value.ty) {
            self.lower_tail(value, &Dest::Discard, out)?;
            return Ok(self.bind(name, None));
        }
        let local = self.fresh(name);
        match &value.kind {
            ExprKind::BufCreate { .. } => self.create_buffer(&local, value, out)?,
            ExprKind::If { .. } | ExprKind::Match { .. } | ExprKind::Abort(_) => {
                let ty = self.expect_type(&value.ty, &value.span)?;
                out.push(CStmt::Decl {
                    ty,
                    name: local.clone(),
                    init: None,
                });
                self.lower_tail(value, &Dest::Assign(CExpr::var(&local)), out)?;
            }
            _ => {
                let init = self.lower_operand(value, out)?;
                let ty = self.expect_type(&value.ty, &value.span)?;
                out.push(CStmt::Decl {
                    ty,
                    name: local.clone(),
                    init,
                });
            }
        }
        Ok(self.bind(name, Some(local)))
    }

    fn expect_type(&mut self, ty: &Type, span: &Span) -> Result<CType, ExtractError> {
        self.cx.value_type(ty, span)?.ok_or_else(|| {
            ExtractError::internal("lowering", format!("expected a non-unit type at {span}"))
        })
    }

    fn int_width(&self, ty: &Type, span: &Span) -> Result<Width, ExtractError> {
        match self.cx.layouts.resolve_alias(ty) {
            Type::Int(width) => Ok(*width),
            other => Err(ExtractError::internal(
                "lowering",
                format!("integer literal of type `{other}` at {span}"),
            )),
        }
    }

    /// The C value of a non-unit expression, hoisting statements into
    /// `out` as needed.
    fn lower_value(
        &mut self,
        expr: &Expr,
        out: &mut Vec<CStmt>,
    ) -> Result<Option<CExpr>, ExtractError> {
        let value = match &expr.kind {
            ExprKind::Int(value) => {
                let width = self.int_width(&expr.ty, &expr.span)?;
                CExpr::Int {
                    value: width.truncate(*value),
                    width,
                }
            }
            ExprKind::Bool(value) => CExpr::Bool(*value),
            ExprKind::Unit => return Ok(None),
            ExprKind::Local(name) => match self.scope.get(name) {
                Some(Some(local)) => CExpr::var(local),
                Some(None) => return Ok(None),
                None => {
                    return Err(ExtractError::internal(
                        "lowering",
                        format!("unbound local `{name}` at {}", expr.span),
                    ))
                }
            },
            ExprKind::Global { name } => CExpr::Var(self.cx.resolve_ref(name)?),
            ExprKind::Call { func, args, .. } => {
                let args = args.iter().collect::<Vec<_>>();
                let args = self.operands(&args, out)?.into_iter().flatten().collect();
                CExpr::Call {
                    func: self.cx.resolve_ref(func)?,
                    args,
                }
            }
            ExprKind::Op { op, args } => return self.lower_op(expr, *op, args, out).map(Some),
            ExprKind::Let { name, value, body } => {
                let saved = self.lower_let(name, value, out)?;
                let result = self.lower_operand(body, out);
                self.restore(vec![saved]);
                return result;
            }
            ExprKind::Seq { first, second } => {
                self.lower_tail(first, &Dest::Discard, out)?;
                return self.lower_operand(second, out);
            }
            ExprKind::If { .. } | ExprKind::Match { .. } | ExprKind::Abort(_) => {
                self.into_temp(expr, out)?
            }
            ExprKind::Cons { ctor, args } => self.lower_cons(expr, ctor, args, out)?,
            ExprKind::Record(fields) => {
                let layout = self.cx.type_layout(&expr.ty)?;
                let mut pairs = Vec::new();
                for (name, value) in fields {
                    let field = layout.struct_field(name).ok_or_else(|| {
                        ExtractError::internal(
                            "lowering",
                            format!("record of `{}` has no field `{name}`", layout.name),
                        )
                    })?;
                    pairs.push((field, value));
                }
                CExpr::Compound {
                    ty: CType::Named(layout.flat.clone()),
                    inits: non_empty(self.field_inits(&pairs, out)?),
                }
            }
            ExprKind::Tuple(items) => {
                let layout = self.cx.type_layout(&expr.ty)?;
                let Layout::Struct { fields, .. } = &layout.layout else {
                    return Err(ExtractError::internal(
                        "lowering",
                        format!("tuple type `{}` is not a struct", layout.name),
                    ));
                };
                let pairs = fields.iter().zip(items).collect::<Vec<_>>();
                CExpr::Compound {
                    ty: CType::Named(layout.flat.clone()),
                    inits: non_empty(self.field_inits(&pairs, out)?),
                }
            }
            ExprKind::Field { expr: base, field } => {
                let layout = self.cx.type_layout(&base.ty)?;
                let member = layout
                    .struct_field(field)
                    .filter(|member| !member.erased)
                    .map(|member| member.member.clone())
                    .ok_or_else(|| {
                        ExtractError::internal(
                            "lowering",
                            format!("`{}` has no stored field `{field}`", layout.name),
                        )
                    })?;
                let base = self.expect_operand(base, out)?;
                CExpr::field(base, member)
            }
            ExprKind::ArrayLit(_) => {
                return Err(ExtractError::non_representable(
                    &expr.ty,
                    "array literals are only supported as structure fields or global initializers",
                    &expr.span,
                ))
            }
            ExprKind::BufRead { buf, index } => {
                let values = self.operands(&[buf, index], out)?;
                let [Some(buf), Some(index)] = <[Option<CExpr>; 2]>::try_from(values).map_err(
                    |_| ExtractError::internal("lowering", "buffer read operands"),
                )?
                else {
                    return Err(ExtractError::internal(
                        "lowering",
                        format!("unit buffer or index at {}", expr.span),
                    ));
                };
                CExpr::index(buf, index)
            }
            ExprKind::BufSub { buf, offset } => {
                let values = self.operands(&[buf, offset], out)?;
                let [Some(buf), Some(offset)] = <[Option<CExpr>; 2]>::try_from(values).map_err(
                    |_| ExtractError::internal("lowering", "sub-buffer operands"),
                )?
                else {
                    return Err(ExtractError::internal(
                        "lowering",
                        format!("unit buffer or offset at {}", expr.span),
                    ));
                };
                CExpr::binary(Op::Add, buf, offset)
            }
            ExprKind::BufCreate { .. } => {
                let name = self.fresh("buf");
                self.create_buffer(&name, expr, out)?;
                CExpr::Var(name)
            }
            ExprKind::BufWrite { .. } | ExprKind::BufFree { .. } => {
                self.lower_tail(expr, &Dest::Discard, out)?;
                return Ok(None);
            }
        };
        Ok(Some(value))
    }

    fn lower_op(
        &mut self,
        expr: &Expr,
        op: Op,
        args: &[Expr],
        out: &mut Vec<CStmt>,
    ) -> Result<CExpr, ExtractError> {
        if args.len() != op.arity() {
            return Err(ExtractError::internal(
                "lowering",
                format!(
                    "operator `{}` applied to {} operands at {}",
                    op.token(),
                    args.len(),
                    expr.span
                ),
            ));
        }
        match op {
            Op::And | Op::Or => {
                let lhs = self.expect_operand(&args[0], out)?;
                let mut rhs_stmts = Vec::new();
                let rhs = self.nested(|this| this.expect_operand(&args[1], &mut rhs_stmts))?;
                if rhs_stmts.is_empty() {
                    return Ok(CExpr::binary(op, lhs, rhs));
                }
                // The right operand needs statements: short-circuit by hand.
                let result = self.fresh("cond");
                out.push(CStmt::Decl {
                    ty: CType::Bool,
                    name: result.clone(),
                    init: Some(lhs),
                });
                let guard = match op {
                    Op::And => CExpr::var(&result),
                    _ => CExpr::not(CExpr::var(&result)),
                };
                rhs_stmts.push(CStmt::Assign {
                    lhs: CExpr::var(&result),
                    rhs,
                });
                out.push(CStmt::If {
                    cond: guard,
                    then_block: rhs_stmts,
                    else_block: None,
                });
                Ok(CExpr::Var(result))
            }
            Op::Eq | Op::Neq => {
                let strategy = synth::request_equality(self.cx, &args[0].ty, &expr.span)?;
                let values = self.operands(&[&args[0], &args[1]], out)?;
                let [lhs, rhs] = <[Option<CExpr>; 2]>::try_from(values)
                    .map_err(|_| ExtractError::internal("lowering", "equality operands"))?;
                let equal = match (strategy, lhs, rhs) {
                    (EqStrategy::Unit, _, _) => CExpr::Bool(true),
                    (EqStrategy::Scalar, Some(lhs), Some(rhs)) => {
                        return Ok(CExpr::binary(op, lhs, rhs))
                    }
                    (EqStrategy::Function(func), Some(lhs), Some(rhs)) => {
                        CExpr::call(func, vec![lhs, rhs])
                    }
                    _ => {
                        return Err(ExtractError::internal(
                            "lowering",
                            format!("missing equality operand at {}", expr.span),
                        ))
                    }
                };
                Ok(match op {
                    Op::Eq => equal,
                    _ => CExpr::not(equal),
                })
            }
            _ => {
                let refs = args.iter().collect::<Vec<_>>();
                let args = self
                    .operands(&refs, out)?
                    .into_iter()
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| {
                        ExtractError::internal(
                            "lowering",
                            format!("unit operand of `{}` at {}", op.token(), expr.span),
                        )
                    })?;
                Ok(match self.cx.layouts.resolve_alias(&expr.ty) {
                    Type::Int(width) => CExpr::arith(op, args, *width),
                    _ => CExpr::Op { op, args },
                })
            }
        }
    }

    fn lower_cons(
        &mut self,
        expr: &Expr,
        ctor: &str,
        args: &[Expr],
        out: &mut Vec<CStmt>,
    ) -> Result<CExpr, ExtractError> {
        let layout = self.cx.type_layout(&expr.ty)?;
        let unknown = || {
            ExtractError::internal(
                "lowering",
                format!("`{}` has no constructor `{ctor}`", layout.name),
            )
        };
        let ty = CType::Named(layout.flat.clone());
        match &layout.layout {
            Layout::Enum { .. } => {
                let tag = layout.tag(ctor).ok_or_else(unknown)?;
                Ok(CExpr::var(&tag.constant))
            }
            Layout::Struct { fields, .. } => {
                let pairs = fields.iter().zip(args).collect::<Vec<_>>();
                Ok(CExpr::Compound {
                    ty,
                    inits: non_empty(self.field_inits(&pairs, out)?),
                })
            }
            Layout::Tagged { .. } => {
                let ctor_layout = layout.ctor(ctor).ok_or_else(unknown)?;
                let pairs = ctor_layout.fields.iter().zip(args).collect::<Vec<_>>();
                let mut payload = self.field_inits(&pairs, out)?;
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
                Ok(CExpr::Compound { ty, inits })
            }
            Layout::Alias(_) | Layout::Opaque => Err(unknown()),
        }
    }

    /// Designated initializers for `pairs`, evaluating every value left to
    /// right. Array literals become nested initializer lists.
    fn field_inits(
        &mut self,
        pairs: &[(&LayoutField, &Expr)],
        out: &mut Vec<CStmt>,
    ) -> Result<Vec<Init>, ExtractError> {
        let mut flat: Vec<&Expr> = Vec::new();
        for (_, value) in pairs {
            match &value.kind {
                ExprKind::ArrayLit(items) => flat.extend(items.iter()),
                _ => flat.push(value),
            }
        }
        let mut values = self.operands(&flat, out)?.into_iter();
        let mut inits = Vec::new();
        for (field, value) in pairs {
            let init = match &value.kind {
                ExprKind::ArrayLit(items) => {
                    let elems = values
                        .by_ref()
                        .take(items.len())
                        .flatten()
                        .map(|elem| Init {
                            designator: None,
                            value: InitValue::Expr(elem),
                        })
                        .collect();
                    Some(InitValue::List(elems))
                }
                _ => values.next().flatten().map(InitValue::Expr),
            };
            if let (false, Some(init)) = (field.erased, init) {
                inits.push(Init {
                    designator: Some(field.member.clone()),
                    value: init,
                });
            }
        }
        Ok(inits)
    }

    /// `T name[len];` or `T *name = malloc(...)`, followed by a loop storing
    /// `init` in every cell.
    fn create_buffer(
        &mut self,
        name: &str,
        expr: &Expr,
        out: &mut Vec<CStmt>,
    ) -> Result<(), ExtractError> {
        let ExprKind::BufCreate {
            lifetime,
            init,
            len,
        } = &expr.kind
        else {
            return Err(ExtractError::internal("lowering", "not a buffer creation"));
        };
        let Type::Buffer(elem) = self.cx.layouts.resolve_alias(&expr.ty).clone() else {
            return Err(ExtractError::internal(
                "lowering",
                format!("buffer creation of type `{}` at {}", expr.ty, expr.span),
            ));
        };
        let elem_ty = self.cx.value_type(&elem, &expr.span)?.ok_or_else(|| {
            ExtractError::non_representable(&expr.ty, "buffers of unit", &expr.span)
        })?;
        let width = self.int_width(&len.ty, &len.span)?;
        let values = self.operands(&[init, len], out)?;
        let [Some(init_value), Some(len_value)] = <[Option<CExpr>; 2]>::try_from(values)
            .map_err(|_| ExtractError::internal("lowering", "buffer creation operands"))?
        else {
            return Err(ExtractError::internal(
                "lowering",
                format!("unit buffer initializer or length at {}", expr.span),
            ));
        };
        let init_value = self.spill(init_value, &init.ty, &init.span, out)?;
        let len_value = self.spill(len_value, &len.ty, &len.span, out)?;
        match lifetime {
            Lifetime::Stack => {
                let decl = CStmt::DeclArray {
                    elem: elem_ty,
                    name: name.to_string(),
                    len: len_value.clone(),
                };
                // The buffer belongs to the function's frame, not to the
                // branch that creates it.
                if self.depth == 0 {
                    out.push(decl);
                } else if self.known_at_entry(&len_value) {
                    self.frame.push(decl);
                } else {
                    return Err(ExtractError::non_representable(
                        &expr.ty,
                        "stack buffer created in a branch needs a constant or parameter length",
                        &expr.span,
                    ));
                }
            }
            Lifetime::Heap => out.push(CStmt::Decl {
                ty: CType::pointer(elem_ty.clone()),
                name: name.to_string(),
                init: Some(CExpr::call(
                    "malloc",
                    vec![CExpr::binary(Op::Mult, CExpr::SizeOf(elem_ty), len_value.clone())],
                )),
            }),
        }
        let index = self.fresh("i");
        out.push(CStmt::For {
            var: index.clone(),
            width,
            bound: len_value,
            body: vec![CStmt::Assign {
                lhs: CExpr::index(CExpr::var(name), CExpr::var(&index)),
                rhs: init_value,
            }],
        });
        Ok(())
    }
}

impl FnLowerer<'_, '_, '_> {
    /// Literals and parameters; C never assigns to either after entry.
    fn known_at_entry(&self, value: &CExpr) -> bool {
        match value {
            CExpr::Int { .. } => true,
            CExpr::Var(name) => self.params.contains(name),
            _ => false,
        }
    }
}

/// C has no empty initializer lists before C23.
fn non_empty(mut inits: Vec<Init>) -> Vec<Init> {
    if inits.is_empty() {
        inits.push(Init {
            designator: None,
            value: InitValue::Expr(CExpr::Int {
                value: 0,
                width: Width::U8,
            }),
        });
    }
    inits
}
