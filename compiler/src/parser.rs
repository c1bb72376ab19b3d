// Parser for textual IR modules.
//
// Parses a token stream (from the lexer) into an AST. Accepts a `module`
// wrapper with optional attributes, custom-syntax functions, and generic
// operations with nested regions. Uses chumsky combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::ir::Attribute;
use crate::lexer::Token;
use crate::types::Type;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub module: Option<ModuleAst>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse an IR source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = module_parser();
    let (module, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        module,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `module_parser`; attributes and
// operations are recursive (arrays/dicts nest, regions hold ops).

fn module_parser<'tokens, I>(
) -> impl Parser<'tokens, I, ModuleAst, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Names and literals ──

    let value_name = select! { Token::ValueId(name) => name };
    let symbol = select! { Token::SymbolRef(name) => name };
    let int = select! { Token::Int(v) => v };

    // ── Types ──

    let tensor_ty = select! { Token::TensorType(body) => body }.try_map(|body, span| {
        Type::parse_tensor_body(&body).map_err(|e| Rich::custom(span, e.to_string()))
    });
    let named_ty = select! {
        Token::DialectType(name) => name,
        Token::Ident(name) => name,
    }
    .map(|name| Type::from_name(&name));
    let ty = tensor_ty.or(named_ty);

    let type_list = ty
        .clone()
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    // `-> T` or `-> (T, U)` or `-> ()`
    let result_types = type_list.clone().or(ty.clone().map(|t| vec![t]));

    // ── Attributes ──
    //
    // Keys are identifiers or quoted strings. Keywords are accepted as keys
    // so that `func = @f` reads naturally.

    let attr_key = select! {
        Token::Ident(name) => name,
        Token::StringLit(name) => name,
        Token::Module => "module".to_string(),
        Token::Attributes => "attributes".to_string(),
        Token::Func => "func".to_string(),
        Token::Unit => "unit".to_string(),
    };

    let attribute = recursive(|attribute| {
        // Integer with an optional `: i64` width annotation (ignored).
        let int_attr = int
            .then_ignore(
                just(Token::Colon)
                    .then(select! { Token::Ident(_) => () })
                    .or_not(),
            )
            .map(Attribute::Int);

        let scalar = select! {
            Token::StringLit(s) => Attribute::Str(s),
            Token::SymbolRef(s) => Attribute::SymbolRef(s),
            Token::True => Attribute::Bool(true),
            Token::False => Attribute::Bool(false),
            Token::Unit => Attribute::Unit,
        };

        let array = attribute
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(Attribute::Array);

        let entry = attr_key
            .clone()
            .then(just(Token::Equals).ignore_then(attribute).or_not())
            .map(|(key, value)| (key, value.unwrap_or(Attribute::Unit)));

        let dict = entry
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(|entries| Attribute::Dict(entries.into_iter().collect()));

        choice((int_attr, scalar, array, dict))
    });

    let attr_entry = attr_key
        .then(just(Token::Equals).ignore_then(attribute).or_not())
        .map(|(key, value)| (key, value.unwrap_or(Attribute::Unit)));

    let attr_dict = attr_entry
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBrace), just(Token::RBrace));

    // ── Values ──

    let block_arg = value_name
        .then_ignore(just(Token::Colon))
        .then(ty.clone())
        .map_with(|(name, ty), e| BlockArgAst {
            name,
            ty,
            span: e.span(),
        });

    let block_args = block_arg
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    let value_use = value_name
        .then(just(Token::Hash).ignore_then(int).or_not())
        .try_map(|(name, index), span: SimpleSpan| {
            let index = match index {
                None => None,
                Some(i) => Some(
                    usize::try_from(i)
                        .map_err(|_| Rich::custom(span, "result index must not be negative"))?,
                ),
            };
            Ok(ValueUse { name, index, span })
        });

    let result_def = value_name
        .then(just(Token::Colon).ignore_then(int).or_not())
        .then_ignore(just(Token::Equals))
        .try_map(|(name, count), span: SimpleSpan| {
            let count = match count {
                None => 1,
                Some(c) if c >= 1 => c as usize,
                Some(_) => return Err(Rich::custom(span, "result count must be positive")),
            };
            Ok(ResultDef { name, count, span })
        });

    // ── Operations ──

    let op = recursive(|op| {
        let region_header = select! { Token::BlockLabel(_) => () }
            .ignore_then(block_args.clone())
            .then_ignore(just(Token::Colon));

        let region = region_header
            .or_not()
            .then(op.repeated().collect::<Vec<_>>())
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map_with(|(args, ops), e| RegionAst {
                args: args.unwrap_or_default(),
                ops,
                span: e.span(),
            });

        let regions = region
            .separated_by(just(Token::Comma))
            .at_least(1)
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let operands = value_use
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        result_def
            .clone()
            .or_not()
            .then(select! { Token::StringLit(name) => name })
            .then(operands)
            .then(regions.or_not())
            .then(attr_dict.clone().or_not())
            .then_ignore(just(Token::Colon))
            .then(type_list.clone())
            .then_ignore(just(Token::Arrow))
            .then(result_types.clone())
            .map_with(
                |((((((results, name), operands), regions), attrs), operand_types), result_types),
                 e| OpAst {
                    results,
                    name,
                    operands,
                    regions: regions.unwrap_or_default(),
                    attrs: attrs.unwrap_or_default(),
                    operand_types,
                    result_types,
                    span: e.span(),
                },
            )
    });

    // ── Functions ──

    let func = just(Token::Func)
        .ignore_then(symbol)
        .then(block_args)
        .then(
            just(Token::Attributes)
                .ignore_then(attr_dict.clone())
                .or_not(),
        )
        .then(
            op.clone()
                .repeated()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|(((name, args), attrs), body), e| FuncAst {
            name,
            args,
            attrs: attrs.unwrap_or_default(),
            body,
            span: e.span(),
        });

    // ── Module ──

    let item = func.map(Item::Func).or(op.map(Item::Op));
    let items = item.repeated().collect::<Vec<_>>();

    let wrapped = just(Token::Module)
        .ignore_then(just(Token::Attributes).ignore_then(attr_dict).or_not())
        .then(
            items
                .clone()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|(attrs, items), e| ModuleAst {
            attrs: attrs.unwrap_or_default(),
            items,
            span: e.span(),
        });

    let bare = items.map_with(|items, e| ModuleAst {
        attrs: Vec::new(),
        items,
        span: e.span(),
    });

    wrapped.or(bare)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ElementType, TensorType};

    fn parse_ok(source: &str) -> ModuleAst {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected errors: {:#?}",
            result.errors
        );
        result.module.expect("expected module")
    }

    fn only_func(module: &ModuleAst) -> &FuncAst {
        assert_eq!(module.items.len(), 1, "expected 1 item");
        match &module.items[0] {
            Item::Func(f) => f,
            other => panic!("expected func, got {:?}", other),
        }
    }

    #[test]
    fn empty_module() {
        let module = parse_ok("module {}");
        assert!(module.items.is_empty());
        assert!(module.attrs.is_empty());
    }

    #[test]
    fn bare_items_without_module_wrapper() {
        let module = parse_ok("func @main() {}");
        assert_eq!(only_func(&module).name, "main");
    }

    #[test]
    fn module_attributes() {
        let module = parse_ok(
            r#"module attributes {tf.versions = {producer = 888 : i32}, tf.devices = ["/job:w/replica:0/task:0/device:CPU:0"]} {}"#,
        );
        assert_eq!(module.attrs.len(), 2);
        assert_eq!(module.attrs[0].0, "tf.versions");
        let versions = module.attrs[0].1.as_dict().unwrap();
        assert_eq!(versions["producer"], Attribute::Int(888));
        assert_eq!(
            module.attrs[1].1,
            Attribute::str_array(&["/job:w/replica:0/task:0/device:CPU:0"])
        );
    }

    #[test]
    fn func_with_generic_ops() {
        let module = parse_ok(
            r#"
            func @main(%arg0: tensor<*xi32>) {
              %0 = "tf_device.launch_func"(%arg0) {_tpu_replicate = "cluster0", func = @tpu0_func, num_cores_per_replica = 1} : (tensor<*xi32>) -> tensor<i32>
              "std.return"(%0) : (tensor<i32>) -> ()
            }
            "#,
        );
        let f = only_func(&module);
        assert_eq!(f.args.len(), 1);
        assert_eq!(
            f.args[0].ty,
            Type::Tensor(TensorType::unranked(ElementType::I32))
        );
        assert_eq!(f.body.len(), 2);

        let launch = &f.body[0];
        assert_eq!(launch.name, "tf_device.launch_func");
        assert_eq!(launch.results.as_ref().unwrap().count, 1);
        assert_eq!(launch.operands[0].name, "arg0");
        assert!(launch
            .attrs
            .iter()
            .any(|(k, v)| k == "func" && *v == Attribute::SymbolRef("tpu0_func".into())));
        assert_eq!(launch.result_types.len(), 1);

        let ret = &f.body[1];
        assert!(ret.results.is_none());
        assert!(ret.result_types.is_empty());
    }

    #[test]
    fn multi_result_definition_and_indexed_use() {
        let module = parse_ok(
            r#"
            func @f() {
              %0:2 = "tf.Pair"() : () -> (tensor<!tf.string>, tensor<!tf.string>)
              "tf.Use"(%0#1) : (tensor<!tf.string>) -> ()
            }
            "#,
        );
        let f = only_func(&module);
        assert_eq!(f.body[0].results.as_ref().unwrap().count, 2);
        assert_eq!(f.body[0].result_types.len(), 2);
        assert_eq!(f.body[1].operands[0].index, Some(1));
    }

    #[test]
    fn regions_with_block_arguments() {
        let module = parse_ok(
            r#"
            func @main(%arg0: tensor<i1>, %arg1: tensor<i1>) {
              %0:2 = "tf_device.replicate"(%arg0, %arg1) ({
              ^bb0(%ri: tensor<i1>):
                "tf_device.return"(%ri) : (tensor<i1>) -> ()
              }) {n = 2 : i32} : (tensor<i1>, tensor<i1>) -> (tensor<i1>, tensor<i1>)
              "std.return"() : () -> ()
            }
            "#,
        );
        let replicate = &only_func(&module).body[0];
        assert_eq!(replicate.regions.len(), 1);
        assert_eq!(replicate.regions[0].args[0].name, "ri");
        assert_eq!(replicate.regions[0].ops[0].name, "tf_device.return");
        assert_eq!(replicate.attrs, vec![("n".to_string(), Attribute::Int(2))]);
    }

    #[test]
    fn multiple_regions_and_unit_attributes() {
        let module = parse_ok(
            r#"
            "tf_device.parallel_execute"() ({
              "tf_device.return"() : () -> ()
            }, {
              "tf_device.return"() : () -> ()
            }) {marker, flags = [true, unit, -3]} : () -> ()
            "#,
        );
        let Item::Op(op) = &module.items[0] else {
            panic!("expected op");
        };
        assert_eq!(op.regions.len(), 2);
        assert_eq!(op.attrs[0], ("marker".to_string(), Attribute::Unit));
        assert_eq!(
            op.attrs[1].1,
            Attribute::Array(vec![
                Attribute::Bool(true),
                Attribute::Unit,
                Attribute::Int(-3)
            ])
        );
    }

    #[test]
    fn missing_arrow_is_an_error() {
        let result = parse(r#""tf.Op"() : ()"#);
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn bad_tensor_element_is_an_error() {
        let result = parse(r#""tf.Op"() : () -> tensor<2xcomplex>"#);
        assert!(!result.errors.is_empty());
        assert!(result.errors.iter().any(|e| e.to_string().contains("complex")));
    }

    #[test]
    fn lex_errors_are_merged() {
        let result = parse("module { ~ }");
        assert!(result
            .errors
            .iter()
            .any(|e| e.to_string().contains("unexpected character")));
    }
}
