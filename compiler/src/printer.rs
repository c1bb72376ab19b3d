// printer.rs — Deterministic text emission for modules
//
// Prints a `Module` in the generic syntax read by `parser.rs`. Value names
// are assigned in print order: function arguments and nested block arguments
// share one `%argN` counter, operation results use `%N` (`%N#i` for the i-th
// of several). Attributes print in key order.
//
// Preconditions: none.
// Postconditions: output of a well-formed module re-parses to an equivalent
//                 module.
// Failure modes: none; values without a visible definition print as
//                `%<<UNKNOWN SSA VALUE>>`.
// Side effects: none.

use std::collections::HashMap;
use std::fmt::Write;

use crate::ir::{Attribute, Attributes, BlockId, Module, OpId, OpKind, ValueId, SYM_NAME_ATTR};
use crate::lexer::escape_string;
use crate::types::Type;

const UNKNOWN_VALUE: &str = "%<<UNKNOWN SSA VALUE>>";

/// Print the whole module.
pub fn print_module(module: &Module) -> String {
    let mut printer = Printer {
        module,
        out: String::new(),
    };
    printer.module_text();
    printer.out
}

/// Print one attribute value as it appears inside an attribute dictionary.
pub fn print_attribute(attr: &Attribute) -> String {
    let mut out = String::new();
    write_attr(&mut out, attr);
    out
}

// ── Names ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Namer {
    names: HashMap<ValueId, String>,
    next_arg: usize,
    next_result: usize,
}

impl Namer {
    fn name_arg(&mut self, v: ValueId) -> String {
        let name = format!("%arg{}", self.next_arg);
        self.next_arg += 1;
        self.names.insert(v, name.clone());
        name
    }

    /// Name all results of one op; returns the definition prefix.
    fn name_results(&mut self, results: &[ValueId]) -> String {
        let n = self.next_result;
        self.next_result += 1;
        if let [single] = results {
            self.names.insert(*single, format!("%{n}"));
            format!("%{n}")
        } else {
            for (i, v) in results.iter().enumerate() {
                self.names.insert(*v, format!("%{n}#{i}"));
            }
            format!("%{n}:{}", results.len())
        }
    }

    fn get(&self, v: ValueId) -> &str {
        self.names.get(&v).map(String::as_str).unwrap_or(UNKNOWN_VALUE)
    }
}

// ── Printer ──────────────────────────────────────────────────────────────

struct Printer<'a> {
    module: &'a Module,
    out: String,
}

impl<'a> Printer<'a> {
    fn pad(&mut self, indent: usize) {
        for _ in 0..indent {
            self.out.push(' ');
        }
    }

    fn module_text(&mut self) {
        let module = self.module;
        self.out.push_str("module ");
        if !module.attrs.is_empty() {
            self.out.push_str("attributes ");
            write_dict(&mut self.out, &module.attrs);
            self.out.push(' ');
        }
        self.out.push_str("{\n");

        let mut top = Namer::default();
        for op in &module.block(module.body()).ops {
            if module.op(*op).kind == OpKind::Func {
                self.func(*op, 2);
            } else {
                self.op(*op, 2, &mut top);
            }
        }
        self.out.push_str("}\n");
    }

    fn func(&mut self, func: OpId, indent: usize) {
        let module = self.module;
        let op = module.op(func);
        let mut namer = Namer::default();

        self.pad(indent);
        let name = module.symbol_name(func).unwrap_or_default();
        let _ = write!(self.out, "func @{}(", name);
        let block = op.regions.first().copied();
        if let Some(block) = block {
            self.block_arg_list(block, &mut namer);
        }
        self.out.push(')');

        let extra: Attributes = op
            .attrs
            .iter()
            .filter(|(k, _)| k.as_str() != SYM_NAME_ATTR)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !extra.is_empty() {
            self.out.push_str(" attributes ");
            write_dict(&mut self.out, &extra);
        }

        self.out.push_str(" {\n");
        if let Some(block) = block {
            for nested in &module.block(block).ops {
                self.op(*nested, indent + 2, &mut namer);
            }
        }
        self.pad(indent);
        self.out.push_str("}\n");
    }

    fn block_arg_list(&mut self, block: BlockId, namer: &mut Namer) {
        let module = self.module;
        for (i, arg) in module.block(block).args.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            let name = namer.name_arg(*arg);
            let _ = write!(self.out, "{}: {}", name, module.value_type(*arg));
        }
    }

    fn op(&mut self, id: OpId, indent: usize, namer: &mut Namer) {
        let module = self.module;
        let op = module.op(id);

        self.pad(indent);
        if !op.results.is_empty() {
            let prefix = namer.name_results(&op.results);
            let _ = write!(self.out, "{} = ", prefix);
        }
        self.out.push_str(&escape_string(op.name()));

        self.out.push('(');
        for (i, v) in op.operands.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.out.push_str(namer.get(*v));
        }
        self.out.push(')');

        if !op.regions.is_empty() {
            self.out.push_str(" (");
            for (i, region) in op.regions.iter().enumerate() {
                if i > 0 {
                    self.out.push_str(", ");
                }
                self.region(*region, indent, namer);
            }
            self.out.push(')');
        }

        if !op.attrs.is_empty() {
            self.out.push(' ');
            write_dict(&mut self.out, &op.attrs);
        }

        let operand_types: Vec<Type> = op
            .operands
            .iter()
            .map(|v| module.value_type(*v).clone())
            .collect();
        self.out.push_str(" : ");
        write_type_list(&mut self.out, &operand_types);
        self.out.push_str(" -> ");
        let result_types = module.result_types(id);
        if let [single] = result_types.as_slice() {
            let _ = write!(self.out, "{}", single);
        } else {
            write_type_list(&mut self.out, &result_types);
        }
        self.out.push('\n');
    }

    fn region(&mut self, block: BlockId, indent: usize, namer: &mut Namer) {
        let module = self.module;
        self.out.push_str("{\n");
        if !module.block(block).args.is_empty() {
            self.pad(indent);
            self.out.push_str("^bb0(");
            self.block_arg_list(block, namer);
            self.out.push_str("):\n");
        }
        for nested in &module.block(block).ops {
            self.op(*nested, indent + 2, namer);
        }
        self.pad(indent);
        self.out.push('}');
    }
}

// ── Attributes and types ─────────────────────────────────────────────────

fn write_type_list(out: &mut String, types: &[Type]) {
    out.push('(');
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}", ty);
    }
    out.push(')');
}

/// Keys that lex as a plain identifier (or an accepted keyword) print bare.
fn is_bare_key(key: &str) -> bool {
    let mut chars = key.chars();
    let head_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    head_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'))
        && !matches!(key, "true" | "false")
}

fn write_dict(out: &mut String, attrs: &Attributes) {
    out.push('{');
    for (i, (key, value)) in attrs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        if is_bare_key(key) {
            out.push_str(key);
        } else {
            out.push_str(&escape_string(key));
        }
        if *value != Attribute::Unit {
            out.push_str(" = ");
            write_attr(out, value);
        }
    }
    out.push('}');
}

fn write_attr(out: &mut String, attr: &Attribute) {
    match attr {
        Attribute::Unit => out.push_str("unit"),
        Attribute::Bool(b) => {
            let _ = write!(out, "{}", b);
        }
        Attribute::Int(v) => {
            let _ = write!(out, "{}", v);
        }
        Attribute::Str(s) => out.push_str(&escape_string(s)),
        Attribute::SymbolRef(name) => {
            let _ = write!(out, "@{}", name);
        }
        Attribute::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_attr(out, item);
            }
            out.push(']');
        }
        Attribute::Dict(entries) => write_dict(out, entries),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
