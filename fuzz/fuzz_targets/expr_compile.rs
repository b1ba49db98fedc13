#![no_main]

use cls_table::{ColumnTable, CompiledExpr};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(src) = std::str::from_utf8(data) else {
        return;
    };
    // Bounded input keeps parser recursion shallow.
    if src.len() > 512 {
        return;
    }

    let Ok(expr) = CompiledExpr::compile(src) else {
        return;
    };
    let _ = expr.rewritten();
    let _ = CompiledExpr::compile(expr.normalized());

    let mut t = ColumnTable::new();
    for name in &expr.required_columns {
        let _ = t.add(name.clone(), vec![0.0, 1.5, -2.0]);
    }
    let _ = t.evaluate(&expr);
});
