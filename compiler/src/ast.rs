// AST node types for textual IR modules.
//
// Mirrors the grammar accepted by `parser.rs`. SSA names are still strings
// here; `import.rs` resolves them into arena values.
// Every node carries a `SimpleSpan` for error reporting in downstream phases.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

use crate::ir::Attribute;
use crate::types::Type;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// `module attributes {...} { item* }`, or a bare list of items.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleAst {
    pub attrs: Vec<(String, Attribute)>,
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Func(FuncAst),
    Op(OpAst),
}

// ── func: 'func' SYMBOL '(' block_args ')' ('attributes' dict)? '{' op* '}' ──

#[derive(Debug, Clone, PartialEq)]
pub struct FuncAst {
    pub name: String,
    pub args: Vec<BlockArgAst>,
    pub attrs: Vec<(String, Attribute)>,
    pub body: Vec<OpAst>,
    pub span: Span,
}

/// `%name: type`
#[derive(Debug, Clone, PartialEq)]
pub struct BlockArgAst {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

// ── op: results? STRING '(' uses ')' regions? dict? ':' '(' types ')' '->' types ──

#[derive(Debug, Clone, PartialEq)]
pub struct OpAst {
    pub results: Option<ResultDef>,
    pub name: String,
    pub operands: Vec<ValueUse>,
    pub regions: Vec<RegionAst>,
    pub attrs: Vec<(String, Attribute)>,
    pub operand_types: Vec<Type>,
    pub result_types: Vec<Type>,
    pub span: Span,
}

/// `%name =` or `%name:count =`
#[derive(Debug, Clone, PartialEq)]
pub struct ResultDef {
    pub name: String,
    pub count: usize,
    pub span: Span,
}

/// `%name` or `%name#index`
#[derive(Debug, Clone, PartialEq)]
pub struct ValueUse {
    pub name: String,
    pub index: Option<usize>,
    pub span: Span,
}

/// `{ (^label(block_args):)? op* }`
#[derive(Debug, Clone, PartialEq)]
pub struct RegionAst {
    pub args: Vec<BlockArgAst>,
    pub ops: Vec<OpAst>,
    pub span: Span,
}
