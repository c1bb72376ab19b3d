// tpurw — accelerator launch rewrite
//
// Library root. IR, text format, and the rewrite pass.

pub mod ast;
pub mod builder;
pub mod closure;
pub mod device;
pub mod diag;
pub mod import;
pub mod ir;
pub mod lexer;
pub mod metadata;
pub mod parser;
pub mod partition;
pub mod pass;
pub mod pipeline;
pub mod printer;
pub mod rewrite;
pub mod types;
