//! Monomorphization.
//!
//! Every generic type or function actually reached from a kept declaration is
//! copied once per distinct tuple of closed type arguments. The instance
//! table is keyed by `(definition, arguments)` and keeps insertion order, so
//! output is stable from run to run. Tuples are treated as one more generic
//! record type named `K___<args>`.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use tracing::{debug, instrument, trace};

use crate::ast::*;
use crate::error::ExtractError;
use crate::naming::{Placement, Resolved, Resolver, ROOT_FILE};
use crate::options::Options;

type Subst = HashMap<String, Type>;

/// Identity used for tuple instances in the instance table.
const TUPLE_BASE: &str = "K_";

#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    Source,
    Instance { generic: QualifiedName, args: Vec<Type> },
    Tuple(Vec<Type>),
}

/// A closed declaration ready for layout and lowering.
#[derive(Debug, Clone)]
pub struct MonoDecl {
    pub name: QualifiedName,
    pub resolved: Resolved,
    pub decl: Decl,
    pub origin: Origin,
}

#[derive(Debug, Default)]
pub struct MonoProgram {
    pub decls: Vec<MonoDecl>,
    pub instances: IndexMap<(QualifiedName, Vec<Type>), QualifiedName>,
    index: HashMap<QualifiedName, usize>,
}

impl MonoProgram {
    pub fn get(&self, name: &QualifiedName) -> Option<&MonoDecl> {
        self.index.get(name).map(|&idx| &self.decls[idx])
    }

    pub fn type_decl(&self, name: &QualifiedName) -> Option<&TypeDecl> {
        match self.get(name).map(|decl| &decl.decl) {
            Some(Decl::Type(decl)) => Some(decl),
            _ => None,
        }
    }

    /// The instance created for `generic` at `args`, if any.
    pub fn instance(&self, generic: &QualifiedName, args: &[Type]) -> Option<&QualifiedName> {
        self.instances.get(&(generic.clone(), args.to_vec()))
    }
}

/// Field name of the `idx`-th tuple component.
pub fn tuple_field(idx: usize) -> String {
    match idx {
        0 => "fst".to_string(),
        1 => "snd".to_string(),
        2 => "thd".to_string(),
        n => format!("f{n}"),
    }
}

#[derive(Debug, Clone)]
struct FunctionInstance {
    generic: QualifiedName,
    args: Vec<Type>,
    name: QualifiedName,
    resolved: Resolved,
    site: Span,
}

struct MonoCtx<'r, 'o> {
    resolver: &'r mut Resolver<'o>,
    options: &'o Options,
    decls: HashMap<QualifiedName, (usize, Decl)>,
    order: Vec<QualifiedName>,
    out: Vec<((usize, usize), MonoDecl)>,
    generated: HashSet<QualifiedName>,
    instances: IndexMap<(QualifiedName, Vec<Type>), QualifiedName>,
    depths: HashMap<QualifiedName, usize>,
    queue: VecDeque<FunctionInstance>,
    // Declaration being processed: position for ordering, placement for
    // tuples first used there.
    position: usize,
    placement: Placement,
    current: Option<QualifiedName>,
    seq: usize,
}

#[instrument(skip_all)]
pub fn monomorphize(
    program: &Program,
    resolver: &mut Resolver<'_>,
) -> Result<MonoProgram, ExtractError> {
    let mut ctx = MonoCtx::new(program, resolver);
    ctx.seed_roots()?;
    ctx.process_queue()?;
    let program = ctx.into_program();
    debug!(
        declarations = program.decls.len(),
        instances = program.instances.len(),
        "monomorphized program"
    );
    Ok(program)
}

impl<'r, 'o> MonoCtx<'r, 'o> {
    fn new(program: &Program, resolver: &'r mut Resolver<'o>) -> Self {
        let options = resolver.options();
        let mut decls = HashMap::new();
        let mut order = Vec::new();
        for module in &program.modules {
            for decl in &module.decls {
                let name = QualifiedName::new(&module.path, decl.name());
                decls.insert(name.clone(), (order.len(), decl.clone()));
                order.push(name);
            }
        }
        Self {
            resolver,
            options,
            decls,
            order,
            out: Vec::new(),
            generated: HashSet::new(),
            instances: IndexMap::new(),
            depths: HashMap::new(),
            queue: VecDeque::new(),
            position: 0,
            placement: Placement::File(ROOT_FILE.to_string()),
            current: None,
            seq: 0,
        }
    }

    /// Every non-generic declaration of a kept module is a root.
    fn seed_roots(&mut self) -> Result<(), ExtractError> {
        for name in self.order.clone() {
            let Some((_, decl)) = self.decls.get(&name) else {
                continue;
            };
            if decl.is_generic() || self.generated.contains(&name) {
                continue;
            }
            let resolved = self.resolver.resolve(&name)?;
            if resolved.placement.is_dropped() {
                continue;
            }
            self.ensure_source_decl(&name)?;
        }
        Ok(())
    }

    fn process_queue(&mut self) -> Result<(), ExtractError> {
        while let Some(instance) = self.queue.pop_front() {
            let (position, decl) = self.lookup(&instance.generic, &instance.site)?;
            let Decl::Function(func) = decl else {
                return Err(ExtractError::internal(
                    "monomorphization",
                    format!("queued instance of non-function `{}`", instance.generic),
                ));
            };
            let subs =
                build_substitution(&func.type_params, &instance.args, &instance.generic, &instance.site)?;
            let saved = self.enter(position, instance.resolved.placement.clone(), &instance.name);
            let mono = self.mono_function(&func, &subs, instance.name.name.clone());
            self.leave(saved);
            let mono = mono?;
            let key = self.next_key(position);
            self.push(
                key,
                MonoDecl {
                    name: instance.name,
                    resolved: instance.resolved,
                    decl: Decl::Function(mono),
                    origin: Origin::Instance {
                        generic: instance.generic,
                        args: instance.args,
                    },
                },
            );
        }
        Ok(())
    }

    fn into_program(self) -> MonoProgram {
        let mut out = self.out;
        out.sort_by_key(|(key, _)| *key);
        let decls = out.into_iter().map(|(_, decl)| decl).collect::<Vec<_>>();
        let index = decls
            .iter()
            .enumerate()
            .map(|(idx, decl)| (decl.name.clone(), idx))
            .collect();
        MonoProgram {
            decls,
            instances: self.instances,
            index,
        }
    }

    fn lookup(&self, name: &QualifiedName, site: &Span) -> Result<(usize, Decl), ExtractError> {
        self.decls.get(name).cloned().ok_or_else(|| ExtractError::InvalidInput {
            message: format!("unknown declaration `{name}` referenced at {site}"),
        })
    }

    fn enter(
        &mut self,
        position: usize,
        placement: Placement,
        name: &QualifiedName,
    ) -> (usize, Placement, Option<QualifiedName>) {
        let saved = (
            self.position,
            std::mem::replace(&mut self.placement, placement),
            self.current.replace(name.clone()),
        );
        self.position = position;
        saved
    }

    fn leave(&mut self, saved: (usize, Placement, Option<QualifiedName>)) {
        self.position = saved.0;
        self.placement = saved.1;
        self.current = saved.2;
    }

    fn next_key(&mut self, position: usize) -> (usize, usize) {
        self.seq += 1;
        (position, self.seq)
    }

    fn push(&mut self, key: (usize, usize), decl: MonoDecl) {
        self.out.push((key, decl));
    }

    fn current_name(&self) -> String {
        self.current
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<root>".to_string())
    }

    /// Monomorphize a non-generic source declaration once.
    fn ensure_source_decl(&mut self, name: &QualifiedName) -> Result<(), ExtractError> {
        if !self.generated.insert(name.clone()) {
            return Ok(());
        }
        let (position, decl) = self.lookup(name, &Span::default())?;
        let resolved = self.resolver.resolve(name)?;
        let saved = self.enter(position, resolved.placement.clone(), name);
        let subs = Subst::new();
        let mono = match &decl {
            Decl::Type(decl) => self
                .mono_type_decl(decl, &subs, decl.name.clone())
                .map(Decl::Type),
            Decl::Function(func) => self
                .mono_function(func, &subs, func.name.clone())
                .map(Decl::Function),
            Decl::Extern(func) => self.mono_extern(func, &subs).map(Decl::Extern),
            Decl::Global(global) => self.mono_global(global).map(Decl::Global),
        };
        self.leave(saved);
        self.push(
            (position, 0),
            MonoDecl {
                name: name.clone(),
                resolved,
                decl: mono?,
                origin: Origin::Source,
            },
        );
        Ok(())
    }

    fn check_budget(
        &self,
        generic: &QualifiedName,
        args: &[Type],
        site: &Span,
    ) -> Result<usize, ExtractError> {
        if self.instances.len() >= self.options.max_instances {
            return Err(ExtractError::non_monomorphizable(
                generic,
                format!(
                    "instantiation budget of {} instances exhausted",
                    self.options.max_instances
                ),
                site,
            ));
        }
        let depth = 1 + args.iter().map(|arg| self.closed_depth(arg)).max().unwrap_or(0);
        if depth > self.options.max_type_depth {
            return Err(ExtractError::non_monomorphizable(
                generic,
                format!(
                    "type arguments nest deeper than {} levels; instantiation does not terminate",
                    self.options.max_type_depth
                ),
                site,
            ));
        }
        Ok(depth)
    }

    /// Depth of a closed type counting the arguments instances were built
    /// from.
    fn closed_depth(&self, ty: &Type) -> usize {
        match ty {
            Type::Named { name, .. } => self.depths.get(name).copied().unwrap_or(1),
            Type::Buffer(elem) | Type::Array { elem, .. } => 1 + self.closed_depth(elem),
            Type::Tuple(items) => {
                1 + items.iter().map(|item| self.closed_depth(item)).max().unwrap_or(0)
            }
            Type::Int(_) | Type::Bool | Type::Unit | Type::Param(_) => 1,
        }
    }

    /// Canonical encoding of a closed type argument inside instance names.
    fn encode_arg(&mut self, ty: &Type) -> Result<String, ExtractError> {
        Ok(match ty {
            Type::Int(width) => width.c_name().to_string(),
            Type::Bool => "bool".to_string(),
            Type::Unit => "void".to_string(),
            Type::Buffer(elem) => format!("{}_ptr", self.encode_arg(elem)?),
            Type::Array { elem, len } => match len {
                ArrayLen::Const(n) => format!("{}_arr{n}", self.encode_arg(elem)?),
                ArrayLen::Index(index) => format!("{}_arr_{index}", self.encode_arg(elem)?),
            },
            Type::Named { name, .. } => match self.resolver.lookup(name) {
                Some(resolved) => resolved.flat.clone(),
                None => self.resolver.resolve(name)?.flat,
            },
            Type::Tuple(_) | Type::Param(_) => {
                return Err(ExtractError::internal(
                    "monomorphization",
                    format!("type argument `{ty}` was not closed before naming"),
                ))
            }
        })
    }

    /// Pick the instance's qualified and flat names. A readable encoding
    /// that is already taken gets a numeric suffix, so distinct argument
    /// tuples never share a name.
    fn instance_name(
        &mut self,
        generic: &QualifiedName,
        base_flat: &str,
        args: &[Type],
        placement: &Placement,
    ) -> Result<(QualifiedName, Resolved), ExtractError> {
        let encoded = args
            .iter()
            .map(|arg| self.encode_arg(arg))
            .collect::<Result<Vec<_>, _>>()?
            .join("_");
        let mut suffix = 0usize;
        loop {
            let tail = if suffix == 0 {
                encoded.clone()
            } else {
                format!("{encoded}_{suffix}")
            };
            let name = generic.sibling(format!("{}__{tail}", generic.name));
            let flat = format!("{base_flat}__{tail}");
            if self.resolver.lookup(&name).is_none() && !self.resolver.is_taken_in(placement, &flat)
            {
                let resolved = self.resolver.resolve_as(&name, flat, placement.clone())?;
                return Ok((name, resolved));
            }
            suffix += 1;
        }
    }

    fn ensure_type_instance(
        &mut self,
        generic: &QualifiedName,
        decl: &TypeDecl,
        position: usize,
        args: Vec<Type>,
        site: &Span,
    ) -> Result<QualifiedName, ExtractError> {
        let key = (generic.clone(), args);
        if let Some(name) = self.instances.get(&key) {
            return Ok(name.clone());
        }
        let depth = self.check_budget(generic, &key.1, site)?;
        let base = self.resolver.resolve(generic)?;
        let (name, resolved) =
            self.instance_name(generic, &base.flat, &key.1, &base.placement)?;
        trace!(instance = %resolved.flat, definition = %generic, "instantiated type");
        self.instances.insert(key.clone(), name.clone());
        self.depths.insert(name.clone(), depth);
        self.generated.insert(name.clone());

        let subs = build_substitution(&decl.params, &key.1, generic, site)?;
        let saved = self.enter(position, resolved.placement.clone(), &name);
        let mono = self.mono_type_decl(decl, &subs, name.name.clone());
        self.leave(saved);
        let key_order = self.next_key(position);
        self.push(
            key_order,
            MonoDecl {
                name: name.clone(),
                resolved,
                decl: Decl::Type(mono?),
                origin: Origin::Instance {
                    generic: key.0,
                    args: key.1,
                },
            },
        );
        Ok(name)
    }

    fn ensure_tuple(&mut self, items: Vec<Type>, site: &Span) -> Result<QualifiedName, ExtractError> {
        let generic = QualifiedName::new::<&str>(&[], TUPLE_BASE);
        let key = (generic.clone(), items);
        if let Some(name) = self.instances.get(&key) {
            return Ok(name.clone());
        }
        if key.1.len() < 2 {
            return Err(ExtractError::internal(
                "monomorphization",
                format!("tuple of {} components at {site}", key.1.len()),
            ));
        }
        let depth = self.check_budget(&generic, &key.1, site)?;
        let placement = self.placement.clone();
        let (name, resolved) = self.instance_name(&generic, TUPLE_BASE, &key.1, &placement)?;
        trace!(instance = %resolved.flat, "instantiated tuple");
        self.instances.insert(key.clone(), name.clone());
        self.depths.insert(name.clone(), depth);
        self.generated.insert(name.clone());
        let fields = key
            .1
            .iter()
            .enumerate()
            .map(|(idx, ty)| Field {
                name: tuple_field(idx),
                ty: ty.clone(),
            })
            .collect();
        let position = self.position;
        let key_order = self.next_key(position);
        self.push(
            key_order,
            MonoDecl {
                name: name.clone(),
                resolved,
                decl: Decl::Type(TypeDecl {
                    name: name.name.clone(),
                    params: Vec::new(),
                    indices: Vec::new(),
                    body: TypeBody::Struct(fields),
                    span: site.clone(),
                }),
                origin: Origin::Tuple(key.1),
            },
        );
        Ok(name)
    }

    fn ensure_function_instance(
        &mut self,
        generic: &QualifiedName,
        func: &FunctionDecl,
        args: Vec<Type>,
        site: &Span,
    ) -> Result<QualifiedName, ExtractError> {
        if func.type_params.len() != args.len() {
            return Err(arity_error(generic, func.type_params.len(), args.len(), site));
        }
        let key = (generic.clone(), args);
        if let Some(name) = self.instances.get(&key) {
            return Ok(name.clone());
        }
        self.check_budget(generic, &key.1, site)?;
        let base = self.resolver.resolve(generic)?;
        let (name, resolved) =
            self.instance_name(generic, &base.flat, &key.1, &base.placement)?;
        trace!(instance = %resolved.flat, definition = %generic, "instantiated function");
        self.instances.insert(key.clone(), name.clone());
        if !resolved.placement.is_dropped() {
            self.queue.push_back(FunctionInstance {
                generic: key.0,
                args: key.1,
                name: name.clone(),
                resolved,
                site: site.clone(),
            });
        }
        Ok(name)
    }

    fn mono_type(&mut self, ty: &Type, subs: &Subst, site: &Span) -> Result<Type, ExtractError> {
        Ok(match ty {
            Type::Int(_) | Type::Bool | Type::Unit => ty.clone(),
            Type::Param(param) => subs.get(param).cloned().ok_or_else(|| {
                ExtractError::non_monomorphizable(
                    self.current_name(),
                    format!("type parameter '{param} is not instantiated"),
                    site,
                )
            })?,
            Type::Buffer(elem) => Type::Buffer(Box::new(self.mono_type(elem, subs, site)?)),
            Type::Array { elem, len } => Type::Array {
                elem: Box::new(self.mono_type(elem, subs, site)?),
                len: len.clone(),
            },
            Type::Tuple(items) => {
                let items = self.mono_types(items, subs, site)?;
                Type::named(self.ensure_tuple(items, site)?)
            }
            Type::Named { name, args } => {
                let args = self.mono_types(args, subs, site)?;
                self.ensure_named(name, args, site)?
            }
        })
    }

    fn mono_types(
        &mut self,
        tys: &[Type],
        subs: &Subst,
        site: &Span,
    ) -> Result<Vec<Type>, ExtractError> {
        tys.iter().map(|ty| self.mono_type(ty, subs, site)).collect()
    }

    /// Closed reference to the named type `name` applied to closed `args`.
    fn ensure_named(
        &mut self,
        name: &QualifiedName,
        args: Vec<Type>,
        site: &Span,
    ) -> Result<Type, ExtractError> {
        if self.depths.contains_key(name) && args.is_empty() {
            return Ok(Type::named(name.clone()));
        }
        let (position, decl) = self.lookup(name, site)?;
        let Decl::Type(decl) = decl else {
            return Err(ExtractError::InvalidInput {
                message: format!("`{name}` used as a type at {site} is not a type"),
            });
        };
        if decl.params.len() != args.len() {
            return Err(arity_error(name, decl.params.len(), args.len(), site));
        }
        if decl.params.is_empty() {
            self.ensure_source_decl(name)?;
            return Ok(Type::named(name.clone()));
        }
        if let TypeBody::Alias(target) = &decl.body {
            let subs = build_substitution(&decl.params, &args, name, site)?;
            return self.mono_type(target, &subs, site);
        }
        let instance = self.ensure_type_instance(name, &decl, position, args, site)?;
        Ok(Type::named(instance))
    }

    fn mono_type_decl(
        &mut self,
        decl: &TypeDecl,
        subs: &Subst,
        new_name: String,
    ) -> Result<TypeDecl, ExtractError> {
        let site = &decl.span;
        let body = match &decl.body {
            TypeBody::Struct(fields) => TypeBody::Struct(self.mono_fields(fields, subs, site)?),
            TypeBody::Variant(ctors) => TypeBody::Variant(
                ctors
                    .iter()
                    .map(|ctor| {
                        Ok(Constructor {
                            name: ctor.name.clone(),
                            fields: self.mono_fields(&ctor.fields, subs, site)?,
                        })
                    })
                    .collect::<Result<Vec<_>, ExtractError>>()?,
            ),
            TypeBody::Alias(target) => TypeBody::Alias(self.mono_type(target, subs, site)?),
            TypeBody::Abstract => TypeBody::Abstract,
        };
        Ok(TypeDecl {
            name: new_name,
            params: Vec::new(),
            indices: decl.indices.clone(),
            body,
            span: decl.span.clone(),
        })
    }

    fn mono_fields(
        &mut self,
        fields: &[Field],
        subs: &Subst,
        site: &Span,
    ) -> Result<Vec<Field>, ExtractError> {
        fields
            .iter()
            .map(|field| {
                Ok(Field {
                    name: field.name.clone(),
                    ty: self.mono_type(&field.ty, subs, site)?,
                })
            })
            .collect()
    }

    fn mono_params(
        &mut self,
        params: &[Param],
        subs: &Subst,
        site: &Span,
    ) -> Result<Vec<Param>, ExtractError> {
        params
            .iter()
            .map(|param| {
                Ok(Param {
                    name: param.name.clone(),
                    ty: self.mono_type(&param.ty, subs, site)?,
                })
            })
            .collect()
    }

    fn mono_function(
        &mut self,
        func: &FunctionDecl,
        subs: &Subst,
        new_name: String,
    ) -> Result<FunctionDecl, ExtractError> {
        let params = self.mono_params(&func.params, subs, &func.span)?;
        let ret = self.mono_type(&func.ret, subs, &func.span)?;
        let body = self.mono_expr(&func.body, subs)?;
        Ok(FunctionDecl {
            name: new_name,
            type_params: Vec::new(),
            params,
            ret,
            body,
            span: func.span.clone(),
        })
    }

    fn mono_extern(&mut self, func: &ExternDecl, subs: &Subst) -> Result<ExternDecl, ExtractError> {
        Ok(ExternDecl {
            name: func.name.clone(),
            type_params: Vec::new(),
            params: self.mono_params(&func.params, subs, &func.span)?,
            ret: self.mono_type(&func.ret, subs, &func.span)?,
            span: func.span.clone(),
        })
    }

    fn mono_global(&mut self, global: &GlobalDecl) -> Result<GlobalDecl, ExtractError> {
        let subs = Subst::new();
        Ok(GlobalDecl {
            name: global.name.clone(),
            ty: self.mono_type(&global.ty, &subs, &global.span)?,
            body: self.mono_expr(&global.body, &subs)?,
            span: global.span.clone(),
        })
    }

    fn mono_boxed(&mut self, expr: &Expr, subs: &Subst) -> Result<Box<Expr>, ExtractError> {
        Ok(Box::new(self.mono_expr(expr, subs)?))
    }

    fn mono_exprs(&mut self, exprs: &[Expr], subs: &Subst) -> Result<Vec<Expr>, ExtractError> {
        exprs.iter().map(|expr| self.mono_expr(expr, subs)).collect()
    }

    fn mono_expr(&mut self, expr: &Expr, subs: &Subst) -> Result<Expr, ExtractError> {
        let site = &expr.span;
        let ty = self.mono_type(&expr.ty, subs, site)?;
        let kind = match &expr.kind {
            ExprKind::Int(_)
            | ExprKind::Bool(_)
            | ExprKind::Unit
            | ExprKind::Local(_)
            | ExprKind::Abort(_) => expr.kind.clone(),
            ExprKind::Global { name } => {
                self.mono_reference(name, site)?;
                expr.kind.clone()
            }
            ExprKind::Call {
                func,
                type_args,
                args,
            } => {
                let type_args = self.mono_types(type_args, subs, site)?;
                let func = self.mono_callee(func, type_args, site)?;
                ExprKind::Call {
                    func,
                    type_args: Vec::new(),
                    args: self.mono_exprs(args, subs)?,
                }
            }
            ExprKind::Op { op, args } => ExprKind::Op {
                op: *op,
                args: self.mono_exprs(args, subs)?,
            },
            ExprKind::Let { name, value, body } => ExprKind::Let {
                name: name.clone(),
                value: self.mono_boxed(value, subs)?,
                body: self.mono_boxed(body, subs)?,
            },
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => ExprKind::If {
                cond: self.mono_boxed(cond, subs)?,
                then_branch: self.mono_boxed(then_branch, subs)?,
                else_branch: self.mono_boxed(else_branch, subs)?,
            },
            ExprKind::Seq { first, second } => ExprKind::Seq {
                first: self.mono_boxed(first, subs)?,
                second: self.mono_boxed(second, subs)?,
            },
            ExprKind::Match { scrutinee, arms } => ExprKind::Match {
                scrutinee: self.mono_boxed(scrutinee, subs)?,
                arms: arms
                    .iter()
                    .map(|arm| {
                        Ok(Arm {
                            pattern: self.mono_pattern(&arm.pattern, subs, site)?,
                            guard: match &arm.guard {
                                Some(guard) => Some(self.mono_expr(guard, subs)?),
                                None => None,
                            },
                            body: self.mono_expr(&arm.body, subs)?,
                        })
                    })
                    .collect::<Result<Vec<_>, ExtractError>>()?,
            },
            ExprKind::Cons { ctor, args } => ExprKind::Cons {
                ctor: ctor.clone(),
                args: self.mono_exprs(args, subs)?,
            },
            ExprKind::Record(fields) => ExprKind::Record(
                fields
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), self.mono_expr(value, subs)?)))
                    .collect::<Result<Vec<_>, ExtractError>>()?,
            ),
            ExprKind::Tuple(items) => ExprKind::Tuple(self.mono_exprs(items, subs)?),
            ExprKind::Field { expr, field } => ExprKind::Field {
                expr: self.mono_boxed(expr, subs)?,
                field: field.clone(),
            },
            ExprKind::ArrayLit(items) => ExprKind::ArrayLit(self.mono_exprs(items, subs)?),
            ExprKind::BufRead { buf, index } => ExprKind::BufRead {
                buf: self.mono_boxed(buf, subs)?,
                index: self.mono_boxed(index, subs)?,
            },
            ExprKind::BufWrite { buf, index, value } => ExprKind::BufWrite {
                buf: self.mono_boxed(buf, subs)?,
                index: self.mono_boxed(index, subs)?,
                value: self.mono_boxed(value, subs)?,
            },
            ExprKind::BufSub { buf, offset } => ExprKind::BufSub {
                buf: self.mono_boxed(buf, subs)?,
                offset: self.mono_boxed(offset, subs)?,
            },
            ExprKind::BufCreate {
                lifetime,
                init,
                len,
            } => ExprKind::BufCreate {
                lifetime: *lifetime,
                init: self.mono_boxed(init, subs)?,
                len: self.mono_boxed(len, subs)?,
            },
            ExprKind::BufFree { buf } => ExprKind::BufFree {
                buf: self.mono_boxed(buf, subs)?,
            },
        };
        Ok(Expr {
            kind,
            ty,
            span: expr.span.clone(),
        })
    }

    fn mono_pattern(
        &mut self,
        pattern: &Pattern,
        subs: &Subst,
        site: &Span,
    ) -> Result<Pattern, ExtractError> {
        let ty = self.mono_type(&pattern.ty, subs, site)?;
        let kind = match &pattern.kind {
            PatternKind::Wildcard
            | PatternKind::Bind(_)
            | PatternKind::Int(_)
            | PatternKind::Bool(_) => pattern.kind.clone(),
            PatternKind::Cons { ctor, args } => PatternKind::Cons {
                ctor: ctor.clone(),
                args: args
                    .iter()
                    .map(|arg| self.mono_pattern(arg, subs, site))
                    .collect::<Result<Vec<_>, _>>()?,
            },
            PatternKind::Tuple(items) => PatternKind::Tuple(
                items
                    .iter()
                    .map(|item| self.mono_pattern(item, subs, site))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            PatternKind::Record(fields) => PatternKind::Record(
                fields
                    .iter()
                    .map(|(name, p)| Ok((name.clone(), self.mono_pattern(p, subs, site)?)))
                    .collect::<Result<Vec<_>, ExtractError>>()?,
            ),
        };
        Ok(Pattern { kind, ty })
    }

    /// Make sure a referenced non-generic declaration has a name; dropped
    /// declarations are only named, kept ones are already roots.
    fn mono_reference(&mut self, name: &QualifiedName, site: &Span) -> Result<(), ExtractError> {
        let (_, decl) = self.lookup(name, site)?;
        if decl.is_generic() {
            return Err(arity_error(name, decl.type_params().len(), 0, site));
        }
        self.resolver.resolve(name)?;
        Ok(())
    }

    fn mono_callee(
        &mut self,
        func: &QualifiedName,
        type_args: Vec<Type>,
        site: &Span,
    ) -> Result<QualifiedName, ExtractError> {
        let (_, decl) = self.lookup(func, site)?;
        match decl {
            Decl::Function(decl) if decl.type_params.is_empty() && type_args.is_empty() => {
                self.resolver.resolve(func)?;
                Ok(func.clone())
            }
            Decl::Function(decl) => self.ensure_function_instance(func, &decl, type_args, site),
            Decl::Extern(decl) if decl.type_params.is_empty() && type_args.is_empty() => {
                self.resolver.resolve(func)?;
                Ok(func.clone())
            }
            Decl::Extern(decl) if !decl.type_params.is_empty() => {
                Err(ExtractError::non_monomorphizable(
                    func,
                    "polymorphic primitive has no built-in lowering",
                    site,
                ))
            }
            Decl::Extern(decl) => Err(arity_error(func, decl.type_params.len(), type_args.len(), site)),
            Decl::Type(_) | Decl::Global(_) => Err(ExtractError::InvalidInput {
                message: format!("`{func}` called at {site} is not a function"),
            }),
        }
    }
}

fn arity_error(name: &QualifiedName, expected: usize, got: usize, site: &Span) -> ExtractError {
    ExtractError::non_monomorphizable(
        name,
        format!("expects {expected} type arguments, applied to {got}"),
        site,
    )
}

fn build_substitution(
    params: &[String],
    args: &[Type],
    name: &QualifiedName,
    site: &Span,
) -> Result<Subst, ExtractError> {
    if params.len() != args.len() {
        return Err(arity_error(name, params.len(), args.len(), site));
    }
    Ok(params.iter().cloned().zip(args.iter().cloned()).collect())
}
