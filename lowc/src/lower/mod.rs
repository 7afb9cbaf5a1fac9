//! Lowering overview.
//!
//! Turns the monomorphic program plus its layouts into the target AST, one
//! [`TargetFile`] per output file. The work is split into:
//! - `expr`: functional expressions -> C statements with explicit
//!   destinations and hoisted temporaries.
//! - `matching`: pattern matches -> tag tests, switches and traps.
//!
//! Equality functions and the global init routine come from
//! [`crate::synth`], which reuses the same function lowerer.

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, instrument};

use crate::ast::{ArrayLen, Decl, ExternDecl, FunctionDecl, QualifiedName, Span, Type};
use crate::error::ExtractError;
use crate::layout::{Layout, Layouts, TypeLayout};
use crate::mono::MonoProgram;
use crate::naming::{Placement, Resolver};
use crate::options::Options;
use crate::synth::{self, EqRegistry, GlobalScheduler};
use crate::target::{CDecl, CParam, CType, Member, TargetFile, TargetProgram};

mod expr;
mod matching;

pub(crate) use expr::{Dest, FnLowerer};

/// State shared by every function lowered in one run.
pub(crate) struct Ctx<'a, 'o> {
    pub layouts: &'a Layouts,
    pub resolver: &'a mut Resolver<'o>,
    pub options: &'o Options,
    pub eq: EqRegistry,
    current: String,
    deps: IndexMap<String, IndexSet<String>>,
}

impl<'a, 'o> Ctx<'a, 'o> {
    fn new(layouts: &'a Layouts, resolver: &'a mut Resolver<'o>) -> Self {
        let options = resolver.options();
        Self {
            layouts,
            resolver,
            options,
            eq: EqRegistry::default(),
            current: String::new(),
            deps: IndexMap::new(),
        }
    }

    /// Declarations lowered from now on belong to `file`.
    pub fn enter(&mut self, file: &str) {
        self.current = file.to_string();
        self.deps.entry(file.to_string()).or_default();
    }

    pub fn current_file(&self) -> &str {
        &self.current
    }

    /// Record that the current file refers to something placed in
    /// `placement`.
    pub fn note_use(&mut self, placement: &Placement) {
        if let Placement::File(file) = placement {
            if *file != self.current {
                self.deps
                    .entry(self.current.clone())
                    .or_default()
                    .insert(file.clone());
            }
        }
    }

    /// Flat name of a referenced function or global.
    pub fn resolve_ref(&mut self, name: &QualifiedName) -> Result<String, ExtractError> {
        let resolved = self.resolver.lookup(name).cloned().ok_or_else(|| {
            ExtractError::internal("lowering", format!("`{name}` has no flat name"))
        })?;
        self.note_use(&resolved.placement);
        Ok(resolved.flat)
    }

    /// Layout of a named type, following aliases.
    pub fn type_layout(&mut self, ty: &Type) -> Result<&'a TypeLayout, ExtractError> {
        let layouts = self.layouts;
        let layout = layouts.named(ty).ok_or_else(|| {
            ExtractError::internal("lowering", format!("no layout for `{ty}`"))
        })?;
        self.note_use(&layout.placement);
        Ok(layout)
    }

    pub fn is_unit(&self, ty: &Type) -> bool {
        self.layouts.is_unit(ty)
    }

    /// C type of a closed source type; `None` for erased unit types.
    pub fn c_type(&mut self, ty: &Type) -> Result<Option<CType>, ExtractError> {
        Ok(match ty {
            Type::Unit => None,
            Type::Int(width) => Some(CType::Int(*width)),
            Type::Bool => Some(CType::Bool),
            Type::Buffer(elem) => Some(CType::pointer(self.c_type(elem)?.unwrap_or(CType::Void))),
            Type::Array { elem, len } => match len {
                ArrayLen::Const(n) => self
                    .c_type(elem)?
                    .map(|elem| CType::Array(Box::new(elem), *n)),
                ArrayLen::Index(index) => {
                    return Err(ExtractError::non_representable(
                        ty,
                        format!("index-dependent shape: array length depends on `{index}`"),
                        &Span::default(),
                    ))
                }
            },
            Type::Named { name, .. } => {
                if self.is_unit(ty) {
                    return Ok(None);
                }
                let layouts = self.layouts;
                let layout = layouts.get(name).ok_or_else(|| {
                    ExtractError::internal("lowering", format!("no layout for `{name}`"))
                })?;
                self.note_use(&layout.placement);
                Some(CType::Named(layout.flat.clone()))
            }
            Type::Tuple(_) | Type::Param(_) => {
                return Err(ExtractError::internal(
                    "lowering",
                    format!("`{ty}` survived monomorphization"),
                ))
            }
        })
    }

    /// Like [`Ctx::c_type`] for values that are passed, returned or
    /// assigned whole; C arrays cannot be.
    pub fn value_type(&mut self, ty: &Type, span: &Span) -> Result<Option<CType>, ExtractError> {
        let c_ty = self.c_type(ty)?;
        if let Some(CType::Array(..)) = c_ty {
            return Err(ExtractError::non_representable(
                ty,
                "arrays can only be stored inside structures, not passed or assigned by value",
                span,
            ));
        }
        Ok(c_ty)
    }
}

/// Lower the whole program into per-file target declarations.
#[instrument(skip_all)]
pub fn lower(
    mono: &MonoProgram,
    layouts: &Layouts,
    resolver: &mut Resolver<'_>,
) -> Result<TargetProgram, ExtractError> {
    let mut cx = Ctx::new(layouts, resolver);
    let mut files: IndexMap<String, Vec<CDecl>> = IndexMap::new();

    for layout in layouts.iter() {
        let Placement::File(file) = &layout.placement else {
            continue;
        };
        cx.enter(file);
        let decls = type_decls(&mut cx, layout)
            .map_err(|err| err.with_context(format!("in type `{}`", layout.name)))?;
        files.entry(file.clone()).or_default().extend(decls);
    }

    let mut globals = GlobalScheduler::default();
    for entry in &mono.decls {
        let Placement::File(file) = &entry.resolved.placement else {
            continue;
        };
        cx.enter(file);
        let context = format!("in `{}`", entry.name);
        let decl = match &entry.decl {
            Decl::Type(_) => continue,
            Decl::Function(func) => Some(lower_function(&mut cx, &entry.resolved.flat, func)),
            Decl::Extern(func) => Some(lower_extern(&mut cx, &entry.resolved.flat, func)),
            Decl::Global(global) => globals.schedule(&mut cx, entry, global).transpose(),
        };
        if let Some(decl) = decl {
            let decl = decl.map_err(|err| err.with_context(&context))?;
            files.entry(file.clone()).or_default().push(decl);
        }
    }

    let init_routine = match globals.finish(&mut cx)? {
        Some((file, routine)) => {
            let name = match &routine {
                CDecl::InitRoutine { name, .. } => Some(name.clone()),
                _ => None,
            };
            files.entry(file).or_default().push(routine);
            name
        }
        None => None,
    };

    for (file, decl) in synth::equality_functions(&mut cx)? {
        files.entry(file).or_default().push(decl);
    }

    let files = files
        .into_iter()
        .map(|(name, decls)| {
            let depends_on = cx
                .deps
                .get(&name)
                .map(|deps| deps.iter().cloned().collect())
                .unwrap_or_default();
            TargetFile {
                name,
                decls,
                depends_on,
            }
        })
        .collect::<Vec<_>>();
    debug!(files = files.len(), equality_functions = cx.eq.len(), "lowered program");
    Ok(TargetProgram {
        files,
        init_routine,
    })
}

fn type_decls(cx: &mut Ctx<'_, '_>, layout: &TypeLayout) -> Result<Vec<CDecl>, ExtractError> {
    let name = layout.flat.clone();
    let mut decls = Vec::new();
    match &layout.layout {
        Layout::Struct { fields, .. } => {
            let mut members = Vec::new();
            for field in fields.iter().filter(|field| !field.erased) {
                if let Some(ty) = cx.c_type(&field.ty)? {
                    members.push(Member::Field {
                        ty,
                        name: field.member.clone(),
                    });
                }
            }
            if members.is_empty() {
                // C has no empty structs.
                members.push(Member::Field {
                    ty: CType::Int(crate::ops::Width::U8),
                    name: "dummy".to_string(),
                });
            }
            decls.push(CDecl::ForwardStruct { name: name.clone() });
            decls.push(CDecl::Struct { name, members });
        }
        Layout::Enum { tag, tags } => {
            decls.push(CDecl::Typedef {
                ty: CType::Int(*tag),
                name,
            });
            decls.push(CDecl::Constants {
                items: tags
                    .iter()
                    .map(|tag| (tag.constant.clone(), tag.value))
                    .collect(),
            });
        }
        Layout::Tagged {
            tag,
            tags_name,
            ctors,
        } => {
            let mut arms = Vec::new();
            for ctor in ctors {
                let Some(arm) = &ctor.arm else {
                    continue;
                };
                let mut fields = Vec::new();
                for field in ctor.stored() {
                    if let Some(ty) = cx.c_type(&field.ty)? {
                        fields.push(Member::Field {
                            ty,
                            name: field.member.clone(),
                        });
                    }
                }
                if ctor.direct {
                    if let Some(Member::Field { ty, .. }) = fields.pop() {
                        arms.push(Member::Field {
                            ty,
                            name: arm.clone(),
                        });
                    }
                } else {
                    arms.push(Member::Struct {
                        name: arm.clone(),
                        fields,
                    });
                }
            }
            let mut members = vec![Member::Field {
                ty: CType::Named(tags_name.clone()),
                name: "tag".to_string(),
            }];
            if !arms.is_empty() {
                members.push(Member::Union(arms));
            }
            decls.push(CDecl::ForwardStruct { name: name.clone() });
            decls.push(CDecl::Typedef {
                ty: CType::Int(*tag),
                name: tags_name.clone(),
            });
            decls.push(CDecl::Constants {
                items: ctors
                    .iter()
                    .map(|ctor| (ctor.tag.constant.clone(), ctor.tag.value))
                    .collect(),
            });
            decls.push(CDecl::Struct { name, members });
        }
        Layout::Alias(target) => {
            if let Some(ty) = cx.c_type(target)? {
                decls.push(CDecl::Typedef { ty, name });
            }
        }
        Layout::Opaque => decls.push(CDecl::ForwardStruct { name }),
    }
    Ok(decls)
}

fn lower_function(
    cx: &mut Ctx<'_, '_>,
    flat: &str,
    func: &FunctionDecl,
) -> Result<CDecl, ExtractError> {
    let ret = cx.value_type(&func.ret, &func.span)?;
    let mut lowerer = FnLowerer::new(cx);
    let params = lowerer.bind_params(&func.params, &func.span)?;
    let dest = if ret.is_some() {
        Dest::Return
    } else {
        Dest::Discard
    };
    let mut body = Vec::new();
    lowerer.lower_tail(&func.body, &dest, &mut body)?;
    Ok(CDecl::Function {
        ret: ret.unwrap_or(CType::Void),
        name: flat.to_string(),
        params,
        body: lowerer.finish_body(body),
    })
}

fn lower_extern(
    cx: &mut Ctx<'_, '_>,
    flat: &str,
    func: &ExternDecl,
) -> Result<CDecl, ExtractError> {
    let ret = cx.value_type(&func.ret, &func.span)?;
    let mut lowerer = FnLowerer::new(cx);
    let params: Vec<CParam> = lowerer.bind_params(&func.params, &func.span)?;
    Ok(CDecl::Extern {
        ret: ret.unwrap_or(CType::Void),
        name: flat.to_string(),
        params,
    })
}
