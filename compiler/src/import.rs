// import.rs — AST → arena IR with SSA name resolution
//
// Turns a parsed `ModuleAst` into a `Module`. Functions become `func` ops
// whose single region holds the body; generic operations map onto `OpKind`
// by name. SSA names are resolved through a stack of scopes: nested regions
// see the values of enclosing regions, functions only see their own.
//
// Preconditions: `ast` came from `parser::parse` without errors.
// Postconditions: every operand refers to a value defined in scope; every
//                 value carries the type declared at its definition.
// Failure modes: undefined/duplicate names, result index out of range,
//                operand/result type list mismatches → E0101 diagnostics.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::{BlockArgAst, FuncAst, Item, ModuleAst, OpAst, Span, ValueUse};
use crate::diag::{codes, Diagnostic};
use crate::ir::{Attribute, BlockId, Module, OpKind, OperationState, ValueId, SYM_NAME_ATTR};

/// Result of importing: module plus any errors.
#[derive(Debug)]
pub struct ImportResult {
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
}

/// Import a parsed module.
pub fn import(ast: &ModuleAst) -> ImportResult {
    let mut importer = Importer {
        module: Module::new(),
        diagnostics: Vec::new(),
        scopes: vec![HashMap::new()],
    };
    importer.module.attrs = ast.attrs.iter().cloned().collect();

    let body = importer.module.body();
    for item in &ast.items {
        match item {
            Item::Func(func) => importer.import_func(func),
            Item::Op(op) => importer.import_op(op, body),
        }
    }

    ImportResult {
        module: importer.module,
        diagnostics: importer.diagnostics,
    }
}

/// Lex, parse, and import `source` in one step.
///
/// Syntax errors are reported as E0100; import errors as E0101.
pub fn parse_module(source: &str) -> Result<Module, Vec<Diagnostic>> {
    let parsed = crate::parser::parse(source);
    if !parsed.errors.is_empty() {
        return Err(parsed
            .errors
            .iter()
            .map(|e| {
                Diagnostic::error(e.to_string())
                    .with_code(codes::E0100)
                    .with_span(*e.span())
            })
            .collect());
    }
    let Some(ast) = parsed.module else {
        return Err(vec![
            Diagnostic::error("parse failed with no output").with_code(codes::E0100)
        ]);
    };
    let result = import(&ast);
    if result.diagnostics.iter().any(Diagnostic::is_error) {
        return Err(result.diagnostics);
    }
    Ok(result.module)
}

// ── Importer ─────────────────────────────────────────────────────────────

type Scope = HashMap<String, Vec<ValueId>>;

struct Importer {
    module: Module,
    diagnostics: Vec<Diagnostic>,
    scopes: Vec<Scope>,
}

impl Importer {
    fn error(&mut self, span: Span, message: String) {
        self.diagnostics.push(
            Diagnostic::error(message)
                .with_code(codes::E0101)
                .with_span(span),
        );
    }

    fn define(&mut self, name: &str, values: Vec<ValueId>, span: Span) {
        let duplicate = match self.scopes.last_mut() {
            Some(scope) => scope.insert(name.to_string(), values).is_some(),
            None => false,
        };
        if duplicate {
            self.error(span, format!("redefinition of SSA value '%{}'", name));
        }
    }

    fn lookup(&self, value: &ValueUse) -> Result<ValueId, String> {
        for scope in self.scopes.iter().rev() {
            if let Some(values) = scope.get(&value.name) {
                let index = value.index.unwrap_or(0);
                return values.get(index).copied().ok_or_else(|| {
                    format!(
                        "result index #{} out of range for '%{}' with {} result(s)",
                        index,
                        value.name,
                        values.len()
                    )
                });
            }
        }
        Err(format!("use of undefined value '%{}'", value.name))
    }

    fn bind_block_args(&mut self, block: BlockId, args: &[BlockArgAst]) {
        for arg in args {
            let v = self.module.add_block_arg(block, arg.ty.clone());
            self.define(&arg.name, vec![v], arg.span);
        }
    }

    fn import_func(&mut self, func: &FuncAst) {
        if self.module.lookup_symbol(&func.name).is_some() {
            self.error(func.span, format!("redefinition of symbol '@{}'", func.name));
        }

        let mut state = OperationState::new(OpKind::Func)
            .with_regions(1)
            .with_span(Some(func.span));
        state.attrs = func.attrs.iter().cloned().collect();
        state
            .attrs
            .insert(SYM_NAME_ATTR.to_string(), Attribute::str(&func.name));
        let op = self.module.create_op(state);
        let body = self.module.body();
        self.module.append_op(op, body);
        let block = self.module.op(op).regions[0];

        // Functions are isolated from the enclosing scope.
        let outer = std::mem::replace(&mut self.scopes, vec![HashMap::new()]);
        self.bind_block_args(block, &func.args);
        for op_ast in &func.body {
            self.import_op(op_ast, block);
        }
        self.scopes = outer;
    }

    fn import_op(&mut self, ast: &OpAst, block: BlockId) {
        let mut operands = Vec::with_capacity(ast.operands.len());
        for operand in &ast.operands {
            match self.lookup(operand) {
                Ok(v) => operands.push(v),
                Err(message) => self.error(operand.span, message),
            }
        }

        if ast.operand_types.len() != ast.operands.len() {
            self.error(
                ast.span,
                format!(
                    "'{}' has {} operand(s) but {} operand type(s)",
                    ast.name,
                    ast.operands.len(),
                    ast.operand_types.len()
                ),
            );
        } else if operands.len() == ast.operand_types.len() {
            for (i, (v, declared)) in operands.iter().zip(&ast.operand_types).enumerate() {
                let actual = self.module.value_type(*v);
                if actual != declared {
                    let message = format!(
                        "operand #{} of '{}' has type {}, but {} was declared",
                        i, ast.name, actual, declared
                    );
                    self.error(ast.operands[i].span, message);
                }
            }
        }

        if let Some(def) = &ast.results {
            if def.count != ast.result_types.len() {
                self.error(
                    def.span,
                    format!(
                        "'%{}' defines {} result(s) but '{}' declares {} result type(s)",
                        def.name,
                        def.count,
                        ast.name,
                        ast.result_types.len()
                    ),
                );
            }
        }

        let mut state = OperationState::new(OpKind::from_name(&ast.name))
            .with_operands(operands)
            .with_result_types(ast.result_types.iter().cloned())
            .with_regions(ast.regions.len())
            .with_span(Some(ast.span));
        state.attrs = ast.attrs.iter().cloned().collect();
        let op = self.module.create_op(state);
        self.module.append_op(op, block);

        let blocks = self.module.op(op).regions.clone();
        for (region, region_block) in ast.regions.iter().zip(blocks) {
            self.scopes.push(HashMap::new());
            self.bind_block_args(region_block, &region.args);
            for nested in &region.ops {
                self.import_op(nested, region_block);
            }
            self.scopes.pop();
        }

        if let Some(def) = &ast.results {
            let results = self.module.op(op).results.clone();
            self.define(&def.name, results, def.span);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueDef;

    fn import_errors(source: &str) -> Vec<String> {
        match parse_module(source) {
            Ok(_) => Vec::new(),
            Err(diags) => diags.into_iter().map(|d| d.message).collect(),
        }
    }

    #[test]
    fn resolves_args_results_and_indices() {
        let module = parse_module(
            r#"
            func @main(%arg0: tensor<i32>) {
              %0:2 = "tf.Split"(%arg0) : (tensor<i32>) -> (tensor<i32>, tensor<i32>)
              "std.return"(%0#1, %arg0) : (tensor<i32>, tensor<i32>) -> ()
            }
            "#,
        )
        .unwrap();

        let main = module.lookup_func("main").unwrap();
        let block = module.op(main).regions[0];
        let ops = &module.block(block).ops;
        let split = ops[0];
        let ret = module.op(ops[1]);
        assert_eq!(ret.kind, OpKind::Return);
        assert_eq!(ret.operands[0], module.op(split).result(1));
        assert_eq!(
            module.value_def(ret.operands[1]),
            ValueDef::BlockArg { block, index: 0 }
        );
    }

    #[test]
    fn nested_regions_see_outer_values() {
        let module = parse_module(
            r#"
            func @main(%arg0: tensor<i32>) {
              "tf_device.launch"() ({
                "tf_device.return"(%arg0) : (tensor<i32>) -> ()
              }) {device = ""} : () -> ()
              "std.return"() : () -> ()
            }
            "#,
        )
        .unwrap();
        let launch = module
            .walk()
            .into_iter()
            .find(|op| module.op(*op).kind == OpKind::Launch)
            .unwrap();
        assert_eq!(module.op(launch).attr("device"), Some(&Attribute::str("")));
    }

    #[test]
    fn functions_do_not_see_each_other() {
        let errors = import_errors(
            r#"
            func @a(%x: tensor<i32>) { "std.return"() : () -> () }
            func @b() { "std.return"(%x) : (tensor<i32>) -> () }
            "#,
        );
        assert_eq!(errors, vec!["use of undefined value '%x'".to_string()]);
    }

    #[test]
    fn reports_bad_index_and_type_mismatch() {
        let errors = import_errors(
            r#"
            func @main(%arg0: tensor<i32>) {
              %0 = "tf.Id"(%arg0) : (tensor<f32>) -> tensor<i32>
              "std.return"(%0#3) : (tensor<i32>) -> ()
            }
            "#,
        );
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("has type tensor<i32>, but tensor<f32> was declared"));
        assert!(errors[1].contains("result index #3 out of range"));
    }

    #[test]
    fn reports_duplicate_symbols_and_values() {
        let errors = import_errors(
            r#"
            func @f(%a: tensor<i32>, %a: tensor<i32>) { "std.return"() : () -> () }
            func @f() { "std.return"() : () -> () }
            "#,
        );
        assert_eq!(
            errors,
            vec![
                "redefinition of SSA value '%a'".to_string(),
                "redefinition of symbol '@f'".to_string(),
            ]
        );
    }

    #[test]
    fn syntax_errors_use_syntax_code() {
        let diags = parse_module("func @f( {").unwrap_err();
        assert!(diags.iter().all(|d| d.code == Some(codes::E0100)));
    }
}
