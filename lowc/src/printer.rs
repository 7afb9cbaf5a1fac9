//! C printer
//!
//! Renders one [`TargetFile`] to C source text. Printing cannot fail: the
//! target AST is closed and monomorphic by construction, so every node maps
//! to a fixed spelling.
//!
//! ## File Structure
//!
//! ```c
//! /* header */
//!
//! #include <stdbool.h>
//! ...
//!
//! // forward typedefs, type definitions
//! // prototypes (externs first)
//! // globals, init routine
//! // function definitions
//! ```

use crate::ops::Width;
use crate::options::Options;
use crate::target::{
    block_falls_through, CDecl, CExpr, CParam, CStmt, CType, Init, InitValue, Member, TargetFile,
};

const INCLUDES: &[&str] = &["stdbool.h", "stdint.h", "stdio.h", "stdlib.h"];

const INDENT: &str = "  ";

/// Precedence of postfix expressions and primaries.
const PRIMARY: u8 = 16;

/// Precedence of casts and other prefix forms.
const PREFIX: u8 = 14;

pub fn print_file(file: &TargetFile, options: &Options) -> String {
    let mut printer = Printer::default();
    printer.file(file, options);
    printer.out
}

#[derive(Default)]
struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn line(&mut self, text: &str) {
        if !text.is_empty() {
            for _ in 0..self.indent {
                self.out.push_str(INDENT);
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    fn file(&mut self, file: &TargetFile, options: &Options) {
        if !options.header.is_empty() {
            self.line(&format!("/* {} */", options.header.replace("*/", "* /")));
            self.line("");
        }
        for include in INCLUDES {
            self.line(&format!("#include <{include}>"));
        }

        let mut decls = file.decls.iter().collect::<Vec<_>>();
        decls.sort_by_key(|decl| decl.section());

        let mut previous = None;
        let mut prototypes_done = false;
        for decl in decls {
            let section = decl.section();
            if !prototypes_done && section > 2 {
                self.prototypes(file);
                prototypes_done = true;
            }
            // Blank lines between sections and around multi-line items.
            if previous != Some(section) || is_multiline(decl) {
                self.line("");
            }
            self.decl(decl);
            previous = Some(section);
        }
        if !prototypes_done {
            self.prototypes(file);
        }
    }

    /// One prototype per function defined in this file, so definitions can
    /// appear in any order.
    fn prototypes(&mut self, file: &TargetFile) {
        let mut first = true;
        for decl in &file.decls {
            let signature = match decl {
                CDecl::Function {
                    ret, name, params, ..
                } => signature(ret, name, params),
                CDecl::InitRoutine { name, .. } => format!("void {name}(void)"),
                _ => continue,
            };
            if first {
                self.line("");
                first = false;
            }
            self.line(&format!("{signature};"));
        }
    }

    fn decl(&mut self, decl: &CDecl) {
        match decl {
            CDecl::ForwardStruct { name } => {
                self.line(&format!("typedef struct {name}_s {name};"));
            }
            CDecl::Typedef { ty, name } => {
                self.line(&format!("typedef {};", declarator(ty, name)));
            }
            CDecl::Constants { items } => {
                for (name, value) in items {
                    self.line(&format!("#define {name} {value}"));
                }
            }
            CDecl::Struct { name, members } => {
                self.line(&format!("struct {name}_s {{"));
                self.members(members);
                self.line("};");
            }
            CDecl::Extern { ret, name, params } => {
                self.line(&format!("extern {};", signature(ret, name, params)));
            }
            CDecl::Global {
                ty,
                name,
                init,
                constant,
            } => {
                let qualifier = if *constant { "const " } else { "" };
                let decl = declarator(ty, name);
                match init {
                    Some(init) => self.line(&format!("{qualifier}{decl} = {};", init_value(init))),
                    None => self.line(&format!("{qualifier}{decl};")),
                }
            }
            CDecl::InitRoutine { name, body } => {
                self.line(&format!("void {name}(void) {{"));
                self.block(body);
                self.line("}");
            }
            CDecl::Function {
                ret,
                name,
                params,
                body,
            } => {
                self.line(&format!("{} {{", signature(ret, name, params)));
                self.block(body);
                self.line("}");
            }
        }
    }

    fn members(&mut self, members: &[Member]) {
        self.indent += 1;
        for member in members {
            match member {
                Member::Field { ty, name } => self.line(&format!("{};", declarator(ty, name))),
                Member::Union(arms) => {
                    self.line("union {");
                    self.members(arms);
                    self.line("};");
                }
                Member::Struct { name, fields } => {
                    self.line("struct {");
                    self.members(fields);
                    self.line(&format!("}} {name};"));
                }
            }
        }
        self.indent -= 1;
    }

    fn block(&mut self, stmts: &[CStmt]) {
        self.indent += 1;
        for stmt in stmts {
            self.stmt(stmt);
        }
        self.indent -= 1;
    }

    fn stmt(&mut self, stmt: &CStmt) {
        match stmt {
            CStmt::Decl { ty, name, init } => match init {
                Some(init) => self.line(&format!("{} = {};", declarator(ty, name), expr(init))),
                None => self.line(&format!("{};", declarator(ty, name))),
            },
            CStmt::DeclArray { elem, name, len } => {
                self.line(&format!("{};", declarator(elem, &format!("{name}[{}]", expr(len)))));
            }
            CStmt::Assign { lhs, rhs } => self.line(&format!("{} = {};", expr(lhs), expr(rhs))),
            CStmt::Expr(value) => self.line(&format!("{};", expr(value))),
            CStmt::If { .. } => self.if_chain(stmt, "if"),
            CStmt::Switch {
                scrutinee,
                cases,
                default,
            } => {
                self.line(&format!("switch ({}) {{", expr(scrutinee)));
                self.indent += 1;
                for (label, body) in cases {
                    self.line(&format!("case {label}: {{"));
                    self.case_body(body);
                    self.line("}");
                }
                self.line("default: {");
                self.case_body(default);
                self.line("}");
                self.indent -= 1;
                self.line("}");
            }
            CStmt::For {
                var,
                width,
                bound,
                body,
            } => {
                self.line(&format!(
                    "for ({} {var} = 0; {var} < {}; {var}++) {{",
                    width.c_name(),
                    expr(bound)
                ));
                self.block(body);
                self.line("}");
            }
            CStmt::Return(None) => self.line("return;"),
            CStmt::Return(Some(value)) => self.line(&format!("return {};", expr(value))),
            CStmt::Block(stmts) => {
                self.line("{");
                self.block(stmts);
                self.line("}");
            }
            CStmt::Trap { message, exit_code } => {
                self.line(&format!("fprintf(stderr, \"%s\\n\", {});", string_literal(message)));
                self.line(&format!("exit({exit_code});"));
            }
        }
    }

    fn case_body(&mut self, body: &[CStmt]) {
        self.block(body);
        if block_falls_through(body) {
            self.indent += 1;
            self.line("break;");
            self.indent -= 1;
        }
    }

    /// `if` followed by `else if` links while the else block is a lone `if`.
    fn if_chain(&mut self, stmt: &CStmt, keyword: &str) {
        let CStmt::If {
            cond,
            then_block,
            else_block,
        } = stmt
        else {
            return;
        };
        let head = format!("{keyword} ({}) {{", expr(cond));
        if keyword == "if" {
            self.line(&head);
        } else {
            self.indent_last(&head);
        }
        self.block(then_block);
        match else_block.as_deref() {
            None => self.line("}"),
            Some([next @ CStmt::If { .. }]) => {
                self.line("}");
                self.if_chain(next, "else if");
            }
            Some(stmts) => {
                self.line("} else {");
                self.block(stmts);
                self.line("}");
            }
        }
    }

    /// Join `text` onto the closing brace just printed.
    fn indent_last(&mut self, text: &str) {
        if self.out.ends_with("}\n") {
            self.out.pop();
            self.out.push(' ');
            self.out.push_str(text);
            self.out.push('\n');
        } else {
            self.line(text);
        }
    }
}

fn is_multiline(decl: &CDecl) -> bool {
    matches!(
        decl,
        CDecl::Struct { .. } | CDecl::InitRoutine { .. } | CDecl::Function { .. }
    )
}

fn signature(ret: &CType, name: &str, params: &[CParam]) -> String {
    let params = if params.is_empty() {
        "void".to_string()
    } else {
        params
            .iter()
            .map(|param| declarator(&param.ty, &param.name))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("{} {name}({params})", type_name(ret))
}

/// `T name`, with pointer and array declarators wrapped around the name.
fn declarator(ty: &CType, name: &str) -> String {
    match ty {
        CType::Void => join_decl("void", name),
        CType::Bool => join_decl("bool", name),
        CType::Int(width) => join_decl(width.c_name(), name),
        CType::Named(named) => join_decl(named, name),
        CType::Pointer(to) => declarator(to, &format!("*{name}")),
        CType::Array(elem, len) => declarator(elem, &format!("{name}[{len}]")),
    }
}

fn join_decl(base: &str, name: &str) -> String {
    if name.is_empty() {
        base.to_string()
    } else {
        format!("{base} {name}")
    }
}

fn type_name(ty: &CType) -> String {
    declarator(ty, "")
}

fn init_value(init: &InitValue) -> String {
    match init {
        InitValue::Expr(value) => expr(value),
        InitValue::List(inits) => init_list(inits),
    }
}

fn init_list(inits: &[Init]) -> String {
    if inits.is_empty() {
        return "{ 0 }".to_string();
    }
    let items = inits
        .iter()
        .map(|init| match &init.designator {
            Some(field) => format!(".{field} = {}", init_value(&init.value)),
            None => init_value(&init.value),
        })
        .collect::<Vec<_>>();
    format!("{{ {} }}", items.join(", "))
}

fn precedence(value: &CExpr) -> u8 {
    match value {
        CExpr::Op { op, .. } => op.precedence(),
        CExpr::Int { width, .. } if !matches!(width, Width::U32 | Width::U64) => PREFIX,
        CExpr::SizeOf(_) | CExpr::Cast { .. } => PREFIX,
        _ => PRIMARY,
    }
}

fn operand(value: &CExpr, min: u8) -> String {
    let text = expr(value);
    if precedence(value) < min {
        format!("({text})")
    } else {
        text
    }
}

pub(crate) fn expr(value: &CExpr) -> String {
    match value {
        CExpr::Int { value, width } => int_literal(*value, *width),
        CExpr::Bool(value) => value.to_string(),
        CExpr::Var(name) => name.clone(),
        CExpr::Str(text) => string_literal(text),
        CExpr::Call { func, args } => {
            let args = args.iter().map(expr).collect::<Vec<_>>();
            format!("{func}({})", args.join(", "))
        }
        CExpr::Op { op, args } => match args.as_slice() {
            [arg] => {
                let inner = operand(arg, PREFIX);
                // `- -x` must not print as a decrement.
                if inner.starts_with('-') {
                    format!("{}({inner})", op.token())
                } else {
                    format!("{}{inner}", op.token())
                }
            }
            [lhs, rhs] => {
                let prec = op.precedence();
                // Left associative: equal precedence on the right needs
                // parentheses.
                format!(
                    "{} {} {}",
                    operand(lhs, prec),
                    op.token(),
                    operand(rhs, prec + 1)
                )
            }
            _ => {
                let args = args.iter().map(expr).collect::<Vec<_>>();
                format!("{}({})", op.token(), args.join(", "))
            }
        },
        CExpr::Cast { width, expr } => format!("({}){}", width.c_name(), operand(expr, PREFIX)),
        CExpr::Field { base, field } => format!("{}.{field}", operand(base, PRIMARY)),
        CExpr::Index { base, index } => format!("{}[{}]", operand(base, PRIMARY), expr(index)),
        CExpr::Compound { ty, inits } => format!("({}){}", type_name(ty), init_list(inits)),
        CExpr::SizeOf(ty) => format!("sizeof({})", type_name(ty)),
    }
}

/// Integer literal in the given width: `42U`, `42ULL`, `(uint8_t)42U`,
/// `(int32_t)-1`, `(size_t)42U`.
fn int_literal(value: u64, width: Width) -> String {
    let value = width.truncate(value);
    if width.is_signed() {
        let bits = width.bits();
        // Sign-extend from the width's top bit.
        let signed = ((value << (64 - bits)) as i64) >> (64 - bits);
        return match (width, signed) {
            (_, i64::MIN) => "(int64_t)(-9223372036854775807LL - 1)".to_string(),
            (Width::I64, _) => format!("(int64_t){signed}LL"),
            _ => format!("({}){signed}", width.c_name()),
        };
    }
    match width {
        Width::U32 => format!("{value}U"),
        Width::U64 => format!("{value}ULL"),
        Width::SizeT if value > u64::from(u32::MAX) => format!("(size_t){value}ULL"),
        _ => format!("({}){value}U", width.c_name()),
    }
}

fn string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            // Octal escapes stop after three digits, unlike hex ones.
            c if c.is_ascii_graphic() || c == ' ' => out.push(c),
            c => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("\\{byte:03o}"));
                }
            }
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Op;

    fn var(name: &str) -> CExpr {
        CExpr::var(name)
    }

    #[test]
    fn literals_carry_their_width() {
        assert_eq!(int_literal(42, Width::U32), "42U");
        assert_eq!(int_literal(42, Width::U64), "42ULL");
        assert_eq!(int_literal(42, Width::U8), "(uint8_t)42U");
        assert_eq!(int_literal(42, Width::U16), "(uint16_t)42U");
        assert_eq!(int_literal(42, Width::I32), "(int32_t)42");
        assert_eq!(int_literal(0xFFFF_FFFF, Width::I32), "(int32_t)-1");
        assert_eq!(int_literal(42, Width::SizeT), "(size_t)42U");
        assert_eq!(int_literal(300, Width::U8), "(uint8_t)44U");
    }

    #[test]
    fn parentheses_follow_precedence() {
        let sum = CExpr::binary(Op::Add, var("a"), var("b"));
        let product = CExpr::binary(Op::Mult, sum.clone(), var("c"));
        assert_eq!(expr(&product), "(a + b) * c");
        let nested = CExpr::binary(Op::Add, var("a"), CExpr::binary(Op::Mult, var("b"), var("c")));
        assert_eq!(expr(&nested), "a + b * c");
        let right = CExpr::binary(Op::Sub, var("a"), CExpr::binary(Op::Sub, var("b"), var("c")));
        assert_eq!(expr(&right), "a - (b - c)");
        assert_eq!(expr(&CExpr::not(CExpr::call("eq__T", vec![var("x"), var("y")]))), "!eq__T(x, y)");
        assert_eq!(expr(&CExpr::not(sum)), "!(a + b)");
    }

    #[test]
    fn narrow_sums_are_cast_back() {
        let sum = CExpr::arith(Op::Add, vec![var("x"), var("y")], Width::U8);
        let test = CExpr::binary(Op::Eq, sum, CExpr::Int { value: 0, width: Width::U8 });
        assert_eq!(expr(&test), "(uint8_t)(x + y) == (uint8_t)0U");
        let flipped = CExpr::arith(Op::BNot, vec![var("x")], Width::U16);
        assert_eq!(expr(&flipped), "(uint16_t)~x");
    }

    #[test]
    fn tag_tests_read_the_tag_member() {
        let test = CExpr::binary(Op::Eq, CExpr::field(var("k"), "tag"), var("M_Key_A"));
        assert_eq!(expr(&test), "k.tag == M_Key_A");
    }

    #[test]
    fn declarators_wrap_pointers_and_arrays() {
        let buf = CType::pointer(CType::Int(Width::U32));
        assert_eq!(declarator(&buf, "b"), "uint32_t *b");
        assert_eq!(type_name(&buf), "uint32_t *");
        let arr = CType::Array(Box::new(CType::Int(Width::U8)), 16);
        assert_eq!(declarator(&arr, "data"), "uint8_t data[16]");
    }

    #[test]
    fn trap_messages_are_escaped() {
        assert_eq!(string_literal("a \"b\" 100%"), "\"a \\\"b\\\" 100%\"");
        assert_eq!(string_literal("é"), "\"\\303\\251\"");
    }

    #[test]
    fn else_if_chains_and_switch_breaks() {
        let file = TargetFile {
            name: "M".into(),
            decls: vec![CDecl::Function {
                ret: CType::Void,
                name: "f".into(),
                params: vec![CParam {
                    ty: CType::Int(Width::U8),
                    name: "t".into(),
                }],
                body: vec![
                    CStmt::If {
                        cond: var("a"),
                        then_block: vec![CStmt::Expr(CExpr::call("g", vec![]))],
                        else_block: Some(vec![CStmt::If {
                            cond: var("b"),
                            then_block: vec![CStmt::Return(None)],
                            else_block: Some(vec![CStmt::Trap {
                                message: "unreachable match case at M.fst:1:2".into(),
                                exit_code: 253,
                            }]),
                        }]),
                    },
                    CStmt::Switch {
                        scrutinee: var("t"),
                        cases: vec![("T_A".into(), vec![CStmt::Expr(CExpr::call("g", vec![]))])],
                        default: vec![CStmt::Return(None)],
                    },
                ],
            }],
            depends_on: Vec::new(),
        };
        let options = Options {
            header: String::new(),
            ..Options::default()
        };
        let text = print_file(&file, &options);
        let expected = "\
#include <stdbool.h>
#include <stdint.h>
#include <stdio.h>
#include <stdlib.h>

void f(uint8_t t);

void f(uint8_t t) {
  if (a) {
    g();
  } else if (b) {
    return;
  } else {
    fprintf(stderr, \"%s\\n\", \"unreachable match case at M.fst:1:2\");
    exit(253);
  }
  switch (t) {
    case T_A: {
      g();
      break;
    }
    default: {
      return;
    }
  }
}
";
        assert_eq!(text, expected);
    }
}
