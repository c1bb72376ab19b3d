// closure.rs — Function closure extraction and serialization
//
// Collects the entry function plus every function reachable from it through
// symbol references into a fresh module, renames the entry to `main`, and
// prints the result. The fresh module carries the source module's version
// attribute and nothing else.
//
// Preconditions: `entry` is a live `func` op at the top level of `module`.
// Postconditions: each reachable function appears exactly once; references
//                 inside the closure resolve inside the closure.
// Failure modes: source module lacks `tf.versions` → `Diagnostic`.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::diag::{codes, Diagnostic};
use crate::ir::{Attribute, Module, OpId, SYM_NAME_ATTR};
use crate::printer::print_module;

/// Module attribute carrying producer/consumer version info.
pub const VERSIONS_ATTR: &str = "tf.versions";

/// Name the entry function takes inside the extracted module.
pub const ENTRY_NAME: &str = "main";

/// Build a standalone module holding `entry` and everything it references.
pub fn encapsulate_func(module: &Module, entry: OpId) -> Result<Module, Diagnostic> {
    let versions = module
        .attrs
        .get(VERSIONS_ATTR)
        .ok_or_else(|| Diagnostic::missing_attribute(VERSIONS_ATTR))?;

    let mut out = Module::new();
    out.attrs.insert(VERSIONS_ATTR.to_string(), versions.clone());

    let entry_name = module.symbol_name(entry).unwrap_or_default().to_string();
    let mut visited: HashSet<String> = HashSet::new();
    let mut cloned: Vec<(String, OpId)> = Vec::new();
    let mut worklist = vec![entry];

    while let Some(func) = worklist.pop() {
        let name = module.symbol_name(func).unwrap_or_default().to_string();
        if !visited.insert(name.clone()) {
            continue;
        }

        for callee in module.symbol_uses(func) {
            if visited.contains(&callee) {
                continue;
            }
            // Symbols that do not name a function are left alone.
            if let Some(callee_op) = module.lookup_func(&callee) {
                worklist.push(callee_op);
            }
        }

        let copy = module.clone_into(func, &mut out).map_err(|e| {
            Diagnostic::error(format!("failed to clone function '@{}': {}", name, e))
                .with_code(codes::E0005)
        })?;
        let body = out.body();
        out.append_op(copy, body);
        cloned.push((name, copy));
    }

    let mut renames: HashMap<String, String> = HashMap::new();
    if entry_name != ENTRY_NAME {
        renames.insert(entry_name.clone(), ENTRY_NAME.to_string());
        if visited.contains(ENTRY_NAME) {
            let mut n = 1;
            let fresh = loop {
                let candidate = format!("{}_{}", ENTRY_NAME, n);
                if !visited.contains(&candidate) {
                    break candidate;
                }
                n += 1;
            };
            renames.insert(ENTRY_NAME.to_string(), fresh);
        }
    }
    if !renames.is_empty() {
        for (name, copy) in &cloned {
            if let Some(new_name) = renames.get(name) {
                out.set_attr(*copy, SYM_NAME_ATTR, Attribute::str(new_name));
            }
            out.rename_symbol_uses(*copy, &renames);
        }
    }

    tracing::trace!(
        entry = %entry_name,
        functions = cloned.len(),
        "encapsulated function closure"
    );
    Ok(out)
}

/// Extract the closure of `entry` and print it as module text.
pub fn encapsulate_func_and_serialize(module: &Module, entry: OpId) -> Result<String, Diagnostic> {
    encapsulate_func(module, entry).map(|m| print_module(&m))
}
