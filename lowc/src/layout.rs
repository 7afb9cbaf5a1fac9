//! Data layout lowering.
//!
//! Maps every closed type declaration to a C representation: plain structs
//! for records, tuples and single-constructor variants, tag-only enumerations
//! for variants without payloads, and tag plus anonymous union for the rest.
//! Types whose by-value payload graph is cyclic, or whose shape depends on a
//! value index, are rejected here.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::{debug, instrument};

use crate::ast::{ArrayLen, Decl, Field, QualifiedName, Span, Type, TypeBody, TypeDecl};
use crate::error::ExtractError;
use crate::mono::MonoProgram;
use crate::naming::{escape_reserved, sanitize, Placement, Resolver};
use crate::ops::Width;

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutField {
    /// Source field name.
    pub name: String,
    /// C member name.
    pub member: String,
    pub ty: Type,
    /// Unit-typed fields take no space and are left out of the C struct.
    pub erased: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub ctor: String,
    /// `#define`d constant, `<Type>_<Ctor>`.
    pub constant: String,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CtorLayout {
    pub tag: Tag,
    pub fields: Vec<LayoutField>,
    /// Union member holding the payload; `None` when nothing is stored.
    pub arm: Option<String>,
    /// The single stored field lives directly in the union arm instead of
    /// in a payload struct.
    pub direct: bool,
}

impl CtorLayout {
    pub fn stored(&self) -> impl Iterator<Item = &LayoutField> {
        self.fields.iter().filter(|field| !field.erased)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Struct {
        ctor: Option<String>,
        fields: Vec<LayoutField>,
    },
    Enum {
        tag: Width,
        tags: Vec<Tag>,
    },
    Tagged {
        tag: Width,
        tags_name: String,
        ctors: Vec<CtorLayout>,
    },
    Alias(Type),
    Opaque,
}

#[derive(Debug, Clone)]
pub struct TypeLayout {
    pub name: QualifiedName,
    pub flat: String,
    pub placement: Placement,
    pub layout: Layout,
    pub span: Span,
}

impl TypeLayout {
    pub fn struct_field(&self, name: &str) -> Option<&LayoutField> {
        match &self.layout {
            Layout::Struct { fields, .. } => fields.iter().find(|field| field.name == name),
            _ => None,
        }
    }

    pub fn ctor(&self, name: &str) -> Option<&CtorLayout> {
        match &self.layout {
            Layout::Tagged { ctors, .. } => ctors.iter().find(|ctor| ctor.tag.ctor == name),
            _ => None,
        }
    }

    pub fn tag(&self, ctor: &str) -> Option<&Tag> {
        match &self.layout {
            Layout::Enum { tags, .. } => tags.iter().find(|tag| tag.ctor == ctor),
            Layout::Tagged { ctors, .. } => ctors
                .iter()
                .map(|layout| &layout.tag)
                .find(|tag| tag.ctor == ctor),
            _ => None,
        }
    }
}

/// Layouts of every closed type, in emission order: source order with
/// by-value dependencies first.
#[derive(Debug, Default)]
pub struct Layouts {
    types: IndexMap<QualifiedName, TypeLayout>,
}

impl Layouts {
    pub fn get(&self, name: &QualifiedName) -> Option<&TypeLayout> {
        self.types.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeLayout> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Layout behind a named type, following aliases.
    pub fn named(&self, ty: &Type) -> Option<&TypeLayout> {
        match self.resolve_alias(ty) {
            Type::Named { name, .. } => self.get(name),
            _ => None,
        }
    }

    /// Follow alias chains down to a non-alias type.
    pub fn resolve_alias<'a>(&'a self, ty: &'a Type) -> &'a Type {
        resolve_alias(&self.types, ty)
    }

    pub fn is_unit(&self, ty: &Type) -> bool {
        matches!(self.resolve_alias(ty), Type::Unit)
    }
}

fn resolve_alias<'a>(types: &'a IndexMap<QualifiedName, TypeLayout>, ty: &'a Type) -> &'a Type {
    let mut current = ty;
    // Alias chains are acyclic once layouts exist; the bound guards against
    // malformed input.
    for _ in 0..=types.len() {
        let Type::Named { name, .. } = current else {
            return current;
        };
        match types.get(name).map(|layout| &layout.layout) {
            Some(Layout::Alias(target)) => current = target,
            _ => return current,
        }
    }
    current
}

struct LayoutCtx<'a, 'r, 'o> {
    mono: &'a MonoProgram,
    resolver: &'r mut Resolver<'o>,
    types: IndexMap<QualifiedName, TypeLayout>,
    visiting: Vec<QualifiedName>,
}

#[instrument(skip_all)]
pub fn compute_layouts(
    mono: &MonoProgram,
    resolver: &mut Resolver<'_>,
) -> Result<Layouts, ExtractError> {
    let mut ctx = LayoutCtx {
        mono,
        resolver,
        types: IndexMap::new(),
        visiting: Vec::new(),
    };
    for decl in &mono.decls {
        if let Decl::Type(_) = decl.decl {
            ctx.compute(&decl.name)?;
        }
    }
    debug!(layouts = ctx.types.len(), "computed layouts");
    Ok(Layouts { types: ctx.types })
}

impl LayoutCtx<'_, '_, '_> {
    /// Compute and memoize one type's layout after its by-value
    /// dependencies.
    fn compute(&mut self, name: &QualifiedName) -> Result<(), ExtractError> {
        if self.types.contains_key(name) {
            return Ok(());
        }
        let mono = self.mono;
        let Some(entry) = mono.get(name) else {
            return Err(ExtractError::internal(
                "layout",
                format!("type `{name}` was not monomorphized"),
            ));
        };
        let Decl::Type(decl) = &entry.decl else {
            return Err(ExtractError::internal(
                "layout",
                format!("`{name}` is not a type declaration"),
            ));
        };
        if self.visiting.contains(name) {
            let mut cycle = self
                .visiting
                .iter()
                .skip_while(|visited| *visited != name)
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            cycle.push(name.to_string());
            return Err(ExtractError::non_representable(
                name,
                format!(
                    "recursive type stored by value ({}); put the recursive occurrence behind a buffer",
                    cycle.join(" -> ")
                ),
                &decl.span,
            ));
        }
        self.visiting.push(name.clone());

        for dep in by_value_deps(decl)? {
            let dep_ty = Type::named(dep.clone());
            if mono.get(&dep).is_none() {
                return Err(ExtractError::internal(
                    "layout",
                    format!("`{name}` depends on unknown type `{dep_ty}`"),
                ));
            }
            self.compute(&dep)?;
            if !matches!(decl.body, TypeBody::Alias(_)) && self.is_opaque(&dep) {
                return Err(ExtractError::non_representable(
                    name,
                    format!("abstract type `{dep}` is stored by value; only buffers of it are allowed"),
                    &decl.span,
                ));
            }
        }

        for dep in pointer_deps(decl) {
            self.hoist_behind_pointer(&dep)?;
        }

        let layout = self.layout_of(&entry.resolved.flat, &entry.resolved.placement, decl)?;
        self.visiting.pop();
        self.types.insert(
            name.clone(),
            TypeLayout {
                name: name.clone(),
                flat: entry.resolved.flat.clone(),
                placement: entry.resolved.placement.clone(),
                layout,
                span: decl.span.clone(),
            },
        );
        Ok(())
    }

    /// Structs reached through a pointer only need their forward
    /// declaration. Enumerations and aliases have none, so their typedef
    /// has to come first; they are laid out now unless that would walk
    /// back into a type being laid out.
    fn hoist_behind_pointer(&mut self, name: &QualifiedName) -> Result<(), ExtractError> {
        if self.types.contains_key(name) || self.visiting.contains(name) {
            return Ok(());
        }
        let mono = self.mono;
        let Some(Decl::Type(decl)) = mono.get(name).map(|entry| &entry.decl) else {
            return Ok(());
        };
        let hoist = match &decl.body {
            TypeBody::Variant(ctors) => {
                ctors.len() != 1 && ctors.iter().all(|ctor| ctor.fields.is_empty())
            }
            TypeBody::Alias(target) => !self.reaches_visiting(target),
            TypeBody::Struct(_) | TypeBody::Abstract => false,
        };
        if hoist {
            self.compute(name)?;
        }
        Ok(())
    }

    /// Whether laying out `ty` would need a type that is being laid out.
    fn reaches_visiting(&self, ty: &Type) -> bool {
        let mut pending = named_types(ty);
        let mut seen = HashSet::new();
        while let Some(name) = pending.pop() {
            if self.visiting.contains(&name) {
                return true;
            }
            if self.types.contains_key(&name) || !seen.insert(name.clone()) {
                continue;
            }
            if let Some(Decl::Type(decl)) = self.mono.get(&name).map(|entry| &entry.decl) {
                let Ok(deps) = by_value_deps(decl) else {
                    return true;
                };
                pending.extend(deps);
                pending.extend(pointer_deps(decl));
            }
        }
        false
    }

    /// By-value field types are laid out already, so aliases of unit are
    /// known here.
    fn lower_fields(&self, fields: &[Field]) -> Vec<LayoutField> {
        fields
            .iter()
            .map(|field| LayoutField {
                name: field.name.clone(),
                member: escape_reserved(sanitize(&field.name)),
                ty: field.ty.clone(),
                erased: resolve_alias(&self.types, &field.ty).is_unit(),
            })
            .collect()
    }

    fn is_opaque(&self, name: &QualifiedName) -> bool {
        let mut current = name;
        for _ in 0..=self.types.len() {
            match self.types.get(current).map(|layout| &layout.layout) {
                Some(Layout::Opaque) => return true,
                Some(Layout::Alias(Type::Named { name, .. })) => current = name,
                _ => return false,
            }
        }
        false
    }

    fn layout_of(
        &mut self,
        flat: &str,
        placement: &Placement,
        decl: &TypeDecl,
    ) -> Result<Layout, ExtractError> {
        Ok(match &decl.body {
            TypeBody::Alias(target) => Layout::Alias(target.clone()),
            TypeBody::Abstract => Layout::Opaque,
            TypeBody::Struct(fields) => Layout::Struct {
                ctor: None,
                fields: self.lower_fields(fields),
            },
            TypeBody::Variant(ctors) if ctors.len() == 1 => Layout::Struct {
                ctor: Some(ctors[0].name.clone()),
                fields: self.lower_fields(&ctors[0].fields),
            },
            TypeBody::Variant(ctors) => {
                let width = Width::for_tags(ctors.len());
                let mut tags = Vec::with_capacity(ctors.len());
                for (idx, ctor) in ctors.iter().enumerate() {
                    let constant = format!("{flat}_{}", sanitize(&ctor.name));
                    self.resolver.reserve(
                        format!("constructor {}.{}", decl.name, ctor.name),
                        &constant,
                        placement,
                    )?;
                    tags.push(Tag {
                        ctor: ctor.name.clone(),
                        constant,
                        value: idx as u32,
                    });
                }
                if ctors.iter().all(|ctor| ctor.fields.is_empty()) {
                    return Ok(Layout::Enum { tag: width, tags });
                }
                let tags_name = format!("{flat}_tags");
                self.resolver
                    .reserve(format!("tags of {}", decl.name), &tags_name, placement)?;
                let ctors = ctors
                    .iter()
                    .zip(tags)
                    .map(|(ctor, tag)| {
                        let fields = self.lower_fields(&ctor.fields);
                        let stored = fields.iter().filter(|field| !field.erased).count();
                        CtorLayout {
                            arm: (stored > 0).then(|| format!("case_{}", sanitize(&ctor.name))),
                            direct: stored == 1,
                            tag,
                            fields,
                        }
                    })
                    .collect();
                Layout::Tagged {
                    tag: width,
                    tags_name,
                    ctors,
                }
            }
        })
    }
}


/// Named types stored by value in `decl`, in field order.
fn by_value_deps(decl: &TypeDecl) -> Result<Vec<QualifiedName>, ExtractError> {
    let mut deps = Vec::new();
    let mut seen = HashSet::new();
    let mut visit_field = |ty: &Type| -> Result<(), ExtractError> {
        collect_by_value(ty, decl, &mut deps, &mut seen)
    };
    match &decl.body {
        TypeBody::Struct(fields) => {
            for field in fields {
                visit_field(&field.ty)?;
            }
        }
        TypeBody::Variant(ctors) => {
            for field in ctors.iter().flat_map(|ctor| &ctor.fields) {
                visit_field(&field.ty)?;
            }
        }
        TypeBody::Alias(target) => visit_field(target)?,
        TypeBody::Abstract => {}
    }
    Ok(deps)
}

/// Named types that `decl` only reaches through a buffer, in field order.
fn pointer_deps(decl: &TypeDecl) -> Vec<QualifiedName> {
    let mut deps = Vec::new();
    let mut visit = |ty: &Type| collect_behind_pointer(ty, false, &mut deps);
    match &decl.body {
        TypeBody::Struct(fields) => fields.iter().for_each(|field| visit(&field.ty)),
        TypeBody::Variant(ctors) => ctors
            .iter()
            .flat_map(|ctor| &ctor.fields)
            .for_each(|field| visit(&field.ty)),
        TypeBody::Alias(target) => visit(target),
        TypeBody::Abstract => {}
    }
    deps
}

fn collect_behind_pointer(ty: &Type, behind: bool, deps: &mut Vec<QualifiedName>) {
    match ty {
        Type::Buffer(elem) => collect_behind_pointer(elem, true, deps),
        Type::Array { elem, .. } => collect_behind_pointer(elem, behind, deps),
        Type::Named { name, args } => {
            if behind && !deps.contains(name) {
                deps.push(name.clone());
            }
            for arg in args {
                collect_behind_pointer(arg, behind, deps);
            }
        }
        Type::Tuple(items) => {
            for item in items {
                collect_behind_pointer(item, behind, deps);
            }
        }
        Type::Int(_) | Type::Bool | Type::Unit | Type::Param(_) => {}
    }
}

/// Every named type mentioned in `ty`.
fn named_types(ty: &Type) -> Vec<QualifiedName> {
    let mut names = Vec::new();
    collect_behind_pointer(ty, true, &mut names);
    names
}

fn collect_by_value(
    ty: &Type,
    decl: &TypeDecl,
    deps: &mut Vec<QualifiedName>,
    seen: &mut HashSet<QualifiedName>,
) -> Result<(), ExtractError> {
    match ty {
        Type::Int(_) | Type::Bool | Type::Unit | Type::Buffer(_) => Ok(()),
        Type::Array { elem, len } => match len {
            ArrayLen::Const(_) => collect_by_value(elem, decl, deps, seen),
            ArrayLen::Index(index) => Err(ExtractError::non_representable(
                &decl.name,
                format!("index-dependent shape: array length depends on the value of `{index}`"),
                &decl.span,
            )),
        },
        Type::Named { name, .. } => {
            if seen.insert(name.clone()) {
                deps.push(name.clone());
            }
            Ok(())
        }
        Type::Tuple(_) | Type::Param(_) => Err(ExtractError::internal(
            "layout",
            format!("`{}` still mentions `{ty}` after monomorphization", decl.name),
        )),
    }
}
