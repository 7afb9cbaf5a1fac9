//! Pattern-match compilation.
//!
//! Each arm's pattern is decomposed into tag and literal tests, taken outer
//! to inner and left to right, plus the field paths its variables bind.
//! Arms are tried in source order; if none applies the generated code traps.
//! Flat matches over payload-free variants become a `switch`, guarded
//! matches use a `matched` flag, everything else an if/else-if chain.

use crate::ast::{Arm, Expr, Pattern, PatternKind, Type};
use crate::error::ExtractError;
use crate::layout::{Layout, LayoutField};
use crate::target::{CExpr, CStmt, CType};

use super::expr::{Dest, FnLowerer, Saved};

/// A source variable bound by a pattern; `path` is `None` for unit values.
struct Binding {
    name: String,
    ty: Type,
    path: Option<CExpr>,
}

#[derive(Default)]
struct Decomposed {
    tests: Vec<CExpr>,
    bindings: Vec<Binding>,
}

impl FnLowerer<'_, '_, '_> {
    pub(super) fn lower_match(
        &mut self,
        expr: &Expr,
        scrutinee: &Expr,
        arms: &[Arm],
        dest: &Dest,
        out: &mut Vec<CStmt>,
    ) -> Result<(), ExtractError> {
        let scrut = match self.lower_operand(scrutinee, out)? {
            Some(value) if !value.is_atomic() => {
                let ty = self.cx.value_type(&scrutinee.ty, &scrutinee.span)?.ok_or_else(|| {
                    ExtractError::internal("matching", "unit scrutinee with a value")
                })?;
                let name = self.fresh("scrut");
                out.push(CStmt::Decl {
                    ty,
                    name: name.clone(),
                    init: Some(value),
                });
                Some(CExpr::Var(name))
            }
            other => other,
        };
        let trap = CStmt::Trap {
            message: format!("unreachable match case at {}", expr.span),
            exit_code: self.cx.options.trap_exit_code,
        };

        self.nested(|this| {
            if arms.iter().any(|arm| arm.guard.is_some()) {
                return this.lower_guarded(scrut, arms, dest, trap, out);
            }
            if let Some(scrut) = &scrut {
                if this.is_flat_enum_match(&scrutinee.ty, arms) {
                    return this.lower_switch(scrut, arms, dest, trap, out);
                }
            }
            this.lower_chain(scrut, arms, dest, trap, out)
        })
    }

    /// Payload-free variant scrutinee with only constructor, wildcard and
    /// variable patterns.
    fn is_flat_enum_match(&mut self, ty: &Type, arms: &[Arm]) -> bool {
        let is_enum = self
            .cx
            .layouts
            .named(ty)
            .is_some_and(|layout| matches!(layout.layout, Layout::Enum { .. }));
        is_enum
            && arms.iter().all(|arm| match &arm.pattern.kind {
                PatternKind::Cons { args, .. } => args.is_empty(),
                PatternKind::Wildcard | PatternKind::Bind(_) => true,
                _ => false,
            })
    }

    fn lower_switch(
        &mut self,
        scrut: &CExpr,
        arms: &[Arm],
        dest: &Dest,
        trap: CStmt,
        out: &mut Vec<CStmt>,
    ) -> Result<(), ExtractError> {
        let mut cases: Vec<(String, Vec<CStmt>)> = Vec::new();
        let mut default = None;
        for arm in arms {
            match &arm.pattern.kind {
                PatternKind::Cons { ctor, .. } => {
                    let layout = self.cx.type_layout(&arm.pattern.ty)?;
                    let tag = layout.tag(ctor).ok_or_else(|| {
                        ExtractError::internal(
                            "matching",
                            format!("`{}` has no constructor `{ctor}`", layout.name),
                        )
                    })?;
                    // A later arm for the same constructor can never run.
                    if cases.iter().any(|(constant, _)| *constant == tag.constant) {
                        continue;
                    }
                    let mut body = Vec::new();
                    self.lower_tail(&arm.body, dest, &mut body)?;
                    cases.push((tag.constant.clone(), body));
                }
                _ => {
                    let decomposed = self.decompose(&arm.pattern, Some(scrut.clone()))?;
                    let mut body = Vec::new();
                    let saved = self.bind_all(decomposed.bindings, &mut body)?;
                    self.lower_tail(&arm.body, dest, &mut body)?;
                    self.restore(saved);
                    default = Some(body);
                    break;
                }
            }
        }
        out.push(CStmt::Switch {
            scrutinee: scrut.clone(),
            cases,
            default: default.unwrap_or_else(|| vec![trap]),
        });
        Ok(())
    }

    fn lower_chain(
        &mut self,
        scrut: Option<CExpr>,
        arms: &[Arm],
        dest: &Dest,
        trap: CStmt,
        out: &mut Vec<CStmt>,
    ) -> Result<(), ExtractError> {
        let mut branches: Vec<(CExpr, Vec<CStmt>)> = Vec::new();
        let mut fallback = None;
        for arm in arms {
            let decomposed = self.decompose(&arm.pattern, scrut.clone())?;
            let mut body = Vec::new();
            let saved = self.bind_all(decomposed.bindings, &mut body)?;
            self.lower_tail(&arm.body, dest, &mut body)?;
            self.restore(saved);
            if decomposed.tests.is_empty() {
                fallback = Some(body);
                break;
            }
            branches.push((CExpr::all(decomposed.tests), body));
        }

        if branches.is_empty() {
            out.push(match fallback {
                Some(body) => CStmt::Block(body),
                None => trap,
            });
            return Ok(());
        }
        let mut else_block = fallback.unwrap_or_else(|| vec![trap]);
        for (cond, then_block) in branches.into_iter().rev() {
            else_block = vec![CStmt::If {
                cond,
                then_block,
                else_block: Some(else_block),
            }];
        }
        out.extend(else_block);
        Ok(())
    }

    fn lower_guarded(
        &mut self,
        scrut: Option<CExpr>,
        arms: &[Arm],
        dest: &Dest,
        trap: CStmt,
        out: &mut Vec<CStmt>,
    ) -> Result<(), ExtractError> {
        let matched = self.fresh("matched");
        out.push(CStmt::Decl {
            ty: CType::Bool,
            name: matched.clone(),
            init: Some(CExpr::Bool(false)),
        });
        let mut exhaustive = false;
        for arm in arms {
            let decomposed = self.decompose(&arm.pattern, scrut.clone())?;
            let irrefutable = decomposed.tests.is_empty();
            let mut block = Vec::new();
            let saved = self.bind_all(decomposed.bindings, &mut block)?;
            let result = self.guarded_body(arm, dest, &matched, &mut block);
            self.restore(saved);
            result?;

            let mut tests = vec![CExpr::not(CExpr::var(&matched))];
            tests.extend(decomposed.tests);
            out.push(CStmt::If {
                cond: CExpr::all(tests),
                then_block: block,
                else_block: None,
            });
            if irrefutable && arm.guard.is_none() {
                exhaustive = true;
                break;
            }
        }
        if !exhaustive {
            out.push(CStmt::If {
                cond: CExpr::not(CExpr::var(&matched)),
                then_block: vec![trap],
                else_block: None,
            });
        }
        Ok(())
    }

    fn guarded_body(
        &mut self,
        arm: &Arm,
        dest: &Dest,
        matched: &str,
        block: &mut Vec<CStmt>,
    ) -> Result<(), ExtractError> {
        let mut body = vec![CStmt::Assign {
            lhs: CExpr::var(matched),
            rhs: CExpr::Bool(true),
        }];
        match &arm.guard {
            Some(guard) => {
                let cond = self.expect_operand(guard, block)?;
                self.lower_tail(&arm.body, dest, &mut body)?;
                block.push(CStmt::If {
                    cond,
                    then_block: body,
                    else_block: None,
                });
            }
            None => {
                self.lower_tail(&arm.body, dest, &mut body)?;
                block.extend(body);
            }
        }
        Ok(())
    }

    /// Declare a C local for every binding and bring the source names into
    /// scope. Array fields are bound through a pointer to the scrutinee's
    /// storage.
    fn bind_all(
        &mut self,
        bindings: Vec<Binding>,
        out: &mut Vec<CStmt>,
    ) -> Result<Vec<Saved>, ExtractError> {
        let mut saved = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let ty = match self.cx.c_type(&binding.ty)? {
                Some(CType::Array(elem, _)) => Some(CType::Pointer(elem)),
                other => other,
            };
            let local = match (binding.path, ty) {
                (Some(path), Some(ty)) => {
                    let local = self.fresh(&binding.name);
                    out.push(CStmt::Decl {
                        ty,
                        name: local.clone(),
                        init: Some(path),
                    });
                    Some(local)
                }
                _ => None,
            };
            saved.push(self.bind(&binding.name, local));
        }
        Ok(saved)
    }

    fn decompose(
        &mut self,
        pattern: &Pattern,
        path: Option<CExpr>,
    ) -> Result<Decomposed, ExtractError> {
        let mut decomposed = Decomposed::default();
        self.decompose_into(pattern, path, &mut decomposed)?;
        Ok(decomposed)
    }

    fn decompose_into(
        &mut self,
        pattern: &Pattern,
        path: Option<CExpr>,
        out: &mut Decomposed,
    ) -> Result<(), ExtractError> {
        match &pattern.kind {
            PatternKind::Wildcard => Ok(()),
            PatternKind::Bind(name) => {
                out.bindings.push(Binding {
                    name: name.clone(),
                    ty: pattern.ty.clone(),
                    path,
                });
                Ok(())
            }
            PatternKind::Int(value) => {
                let path = require_path(path, pattern)?;
                let Type::Int(width) = *self.cx.layouts.resolve_alias(&pattern.ty) else {
                    return Err(ExtractError::internal(
                        "matching",
                        format!("integer pattern of type `{}`", pattern.ty),
                    ));
                };
                out.tests.push(CExpr::binary(
                    crate::ops::Op::Eq,
                    path,
                    CExpr::Int {
                        value: width.truncate(*value),
                        width,
                    },
                ));
                Ok(())
            }
            PatternKind::Bool(value) => {
                let path = require_path(path, pattern)?;
                out.tests.push(if *value { path } else { CExpr::not(path) });
                Ok(())
            }
            PatternKind::Cons { ctor, args } => {
                let layout = self.cx.type_layout(&pattern.ty)?;
                let unknown = || {
                    ExtractError::internal(
                        "matching",
                        format!("`{}` has no constructor `{ctor}`", layout.name),
                    )
                };
                match &layout.layout {
                    Layout::Enum { .. } => {
                        let tag = layout.tag(ctor).ok_or_else(unknown)?;
                        let path = require_path(path, pattern)?;
                        out.tests.push(CExpr::binary(
                            crate::ops::Op::Eq,
                            path,
                            CExpr::var(&tag.constant),
                        ));
                        Ok(())
                    }
                    Layout::Struct { fields, .. } => self.decompose_fields(fields, args, path, out),
                    Layout::Tagged { .. } => {
                        let ctor_layout = layout.ctor(ctor).ok_or_else(unknown)?;
                        let path = require_path(path, pattern)?;
                        out.tests.push(CExpr::binary(
                            crate::ops::Op::Eq,
                            CExpr::field(path.clone(), "tag"),
                            CExpr::var(&ctor_layout.tag.constant),
                        ));
                        let payload = ctor_layout
                            .arm
                            .as_ref()
                            .map(|arm| CExpr::field(path, arm.clone()));
                        for (field, arg) in ctor_layout.fields.iter().zip(args) {
                            let field_path = match &payload {
                                Some(_) if field.erased => None,
                                Some(payload) if ctor_layout.direct => Some(payload.clone()),
                                Some(payload) => {
                                    Some(CExpr::field(payload.clone(), field.member.clone()))
                                }
                                None => None,
                            };
                            self.decompose_into(arg, field_path, out)?;
                        }
                        Ok(())
                    }
                    Layout::Alias(_) | Layout::Opaque => Err(unknown()),
                }
            }
            PatternKind::Tuple(items) => {
                let layout = self.cx.type_layout(&pattern.ty)?;
                let Layout::Struct { fields, .. } = &layout.layout else {
                    return Err(ExtractError::internal(
                        "matching",
                        format!("tuple pattern of non-struct type `{}`", layout.name),
                    ));
                };
                self.decompose_fields(fields, items, path, out)
            }
            PatternKind::Record(fields) => {
                let layout = self.cx.type_layout(&pattern.ty)?;
                for (name, sub) in fields {
                    let field = layout.struct_field(name).ok_or_else(|| {
                        ExtractError::internal(
                            "matching",
                            format!("`{}` has no field `{name}`", layout.name),
                        )
                    })?;
                    let field_path = field_path(&path, field);
                    self.decompose_into(sub, field_path, out)?;
                }
                Ok(())
            }
        }
    }

    fn decompose_fields(
        &mut self,
        fields: &[LayoutField],
        patterns: &[Pattern],
        path: Option<CExpr>,
        out: &mut Decomposed,
    ) -> Result<(), ExtractError> {
        for (field, sub) in fields.iter().zip(patterns) {
            self.decompose_into(sub, field_path(&path, field), out)?;
        }
        Ok(())
    }
}

fn field_path(path: &Option<CExpr>, field: &LayoutField) -> Option<CExpr> {
    match path {
        Some(path) if !field.erased => Some(CExpr::field(path.clone(), field.member.clone())),
        _ => None,
    }
}

fn require_path(path: Option<CExpr>, pattern: &Pattern) -> Result<CExpr, ExtractError> {
    path.ok_or_else(|| {
        ExtractError::internal(
            "matching",
            format!("pattern of type `{}` tests an erased value", pattern.ty),
        )
    })
}
