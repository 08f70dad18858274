// This file is part of Ember.
//
// Ember is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Ember is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Ember.  If not, see <http://www.gnu.org/licenses/>.
use anyhow::Result;
use yang::{Instance, Program, Type};

fn compile(source: &str) -> Program {
    let program = Program::compile("test", source, true);
    assert!(
        program.success(),
        "compile failed: {:?}",
        program.errors()
    );
    program
}

#[test]
fn test_empty_program() -> Result<()> {
    let program = compile("");
    assert!(program.functions().is_empty());
    assert!(program.globals().is_empty());
    let instance = Instance::new(&program)?;
    drop(instance);
    Ok(())
}

#[test]
fn test_single_exported_function() -> Result<()> {
    let program = compile("export int square(int x) { return x * x; }");
    assert_eq!(program.functions().len(), 1);
    assert_eq!(
        program.functions()["square"],
        Type::function(Type::int(), vec![Type::int()])
    );

    let mut instance = Instance::new(&program)?;
    assert_eq!(instance.call::<(i32,), i32>("square", (7,))?, 49);
    Ok(())
}

#[test]
fn test_global_round_trip() -> Result<()> {
    let program = compile("global { var foo = 5; var baz = (14, 15); }");
    let mut instance = Instance::new(&program)?;

    assert_eq!(instance.get_global::<i32>("foo")?, 5);
    assert_eq!(instance.get_global::<[i32; 2]>("baz")?, [14, 15]);

    instance.set_global("foo", 9)?;
    assert_eq!(instance.get_global::<i32>("foo")?, 9);
    Ok(())
}

#[test]
fn test_instance_isolation() -> Result<()> {
    let program = compile("global { var counter = 1; }");
    let mut a = Instance::new(&program)?;
    let b = Instance::new(&program)?;

    a.set_global("counter", 100)?;
    assert_eq!(a.get_global::<i32>("counter")?, 100);
    assert_eq!(b.get_global::<i32>("counter")?, 1);
    Ok(())
}

#[test]
fn test_global_accessor_type_mismatch() -> Result<()> {
    let program = compile("global { var foo = 5; }");
    let mut instance = Instance::new(&program)?;

    let error = instance.get_global::<f64>("foo").unwrap_err().to_string();
    assert!(error.contains("`int foo`"), "got: {}", error);
    assert!(error.contains("`world`"), "got: {}", error);

    assert!(instance.get_global::<i32>("missing").is_err());
    assert!(instance.set_global("foo", 2.5).is_err());
    // Failed accessors are no-ops.
    assert_eq!(instance.get_global::<i32>("foo")?, 5);
    Ok(())
}

#[test]
fn test_call_type_mismatch() -> Result<()> {
    let program = compile("export int square(int x) { return x * x; }");
    let mut instance = Instance::new(&program)?;

    let error = instance
        .call::<(f64,), i32>("square", (2.,))
        .unwrap_err()
        .to_string();
    assert!(error.contains("int(int)"), "got: {}", error);
    assert!(instance.call::<(), i32>("nothing", ()).is_err());
    Ok(())
}

#[test]
fn test_const_global_rejects_set() -> Result<()> {
    let program = compile("global { const limit = 17; }");
    let mut instance = Instance::new(&program)?;
    assert_eq!(instance.get_global::<i32>("limit")?, 17);
    assert!(instance.set_global("limit", 3).is_err());
    Ok(())
}

#[test]
fn test_globals_shared_across_functions() -> Result<()> {
    let program = compile(
        "global { var accumulator = 0; } \
         export void add(int x) { accumulator = accumulator + x; } \
         export int total() { return accumulator; }",
    );
    let mut instance = Instance::new(&program)?;
    instance.call::<(i32,), ()>("add", (4,))?;
    instance.call::<(i32,), ()>("add", (5,))?;
    assert_eq!(instance.call::<(), i32>("total", ())?, 9);
    assert_eq!(instance.get_global::<i32>("accumulator")?, 9);
    Ok(())
}

#[test]
fn test_recursion() -> Result<()> {
    let program = compile(
        "export int factorial(int n) { return n <= 1 ? 1 : n * factorial(n - 1); }",
    );
    let mut instance = Instance::new(&program)?;
    assert_eq!(instance.call::<(i32,), i32>("factorial", (6,))?, 720);
    Ok(())
}

#[test]
fn test_loops_break_continue() -> Result<()> {
    let program = compile(
        "export int oddsum(int n) { \
           var total = 0; \
           for (var i = 0; i < n; i = i + 1) { \
             if (i % 2 == 0) { continue; } \
             if (i > 20) { break; } \
             total = total + i; \
           } \
           return total; \
         }",
    );
    let mut instance = Instance::new(&program)?;
    // 1 + 3 + 5 + 7 + 9 = 25.
    assert_eq!(instance.call::<(i32,), i32>("oddsum", (10,))?, 25);
    Ok(())
}

#[test]
fn test_do_while_runs_at_least_once() -> Result<()> {
    let program = compile(
        "export int once() { var n = 0; do { n = n + 1; } while (0); return n; }",
    );
    let mut instance = Instance::new(&program)?;
    assert_eq!(instance.call::<(), i32>("once", ())?, 1);
    Ok(())
}

#[test]
fn test_euclidean_mod_and_div() -> Result<()> {
    let program = compile(
        "export int emod(int n, int d) { return n % d; } \
         export int ediv(int n, int d) { return n / d; }",
    );
    let mut instance = Instance::new(&program)?;
    for n in [-7, -3, -1, 0, 1, 3, 7, 13] {
        for d in [-5, -2, 2, 5] {
            let r = instance.call::<(i32, i32), i32>("emod", (n, d))?;
            let q = instance.call::<(i32, i32), i32>("ediv", (n, d))?;
            assert!(0 <= r && r < d.abs(), "n={} d={} r={}", n, d, r);
            assert_eq!(d * q + r, n, "n={} d={} q={} r={}", n, d, q, r);
        }
    }
    Ok(())
}

#[test]
fn test_pow_and_casts() -> Result<()> {
    let program = compile(
        "export int ipow(int b, int e) { return b ** e; } \
         export world wpow(world b, world e) { return b ** e; } \
         export int floor_cast(world w) { return [w]; } \
         export world promote(int i) { return i.; }",
    );
    let mut instance = Instance::new(&program)?;
    assert_eq!(instance.call::<(i32, i32), i32>("ipow", (2, 10))?, 1024);
    assert_eq!(instance.call::<(f64, f64), f64>("wpow", (2., 0.5))?, 2f64.sqrt());
    // Cast floors toward negative infinity.
    assert_eq!(instance.call::<(f64,), i32>("floor_cast", (2.7,))?, 2);
    assert_eq!(instance.call::<(f64,), i32>("floor_cast", (-2.7,))?, -3);
    assert_eq!(instance.call::<(f64,), i32>("floor_cast", (-2.,))?, -2);
    assert_eq!(instance.call::<(i32,), f64>("promote", (3,))?, 3.);
    Ok(())
}

#[test]
fn test_vectors() -> Result<()> {
    let program = compile(
        "export int3 triple(int x) { return (x, x + 1, x + 2); } \
         export int sum(int3 v) { return +/v; } \
         export int at(int3 v, int i) { return v[i]; } \
         export int3 scale(int3 v, int k) { return v * k; }",
    );
    let mut instance = Instance::new(&program)?;
    assert_eq!(instance.call::<(i32,), [i32; 3]>("triple", (5,))?, [5, 6, 7]);
    assert_eq!(instance.call::<([i32; 3],), i32>("sum", ([1, 2, 3],))?, 6);
    assert_eq!(
        instance.call::<([i32; 3], i32), [i32; 3]>("scale", ([1, 2, 3], 4))?,
        [4, 8, 12]
    );
    // In-range and out-of-range indexing.
    assert_eq!(instance.call::<([i32; 3], i32), i32>("at", ([7, 8, 9], 2))?, 9);
    assert_eq!(instance.call::<([i32; 3], i32), i32>("at", ([7, 8, 9], 3))?, 0);
    assert_eq!(instance.call::<([i32; 3], i32), i32>("at", ([7, 8, 9], -1))?, 0);
    Ok(())
}

#[test]
fn test_comparison_fold_is_chained() -> Result<()> {
    let program = compile("export int ordered(int3 v) { return </v; }");
    let mut instance = Instance::new(&program)?;
    assert_eq!(instance.call::<([i32; 3],), i32>("ordered", ([1, 2, 3],))?, 1);
    assert_eq!(instance.call::<([i32; 3],), i32>("ordered", ([1, 3, 2],))?, 0);
    // Chained pairwise, not reduced pairwise-left: 3 < 2 fails even
    // though (3 < 2) < 1 would not.
    assert_eq!(instance.call::<([i32; 3],), i32>("ordered", ([3, 2, 1],))?, 0);
    Ok(())
}

#[test]
fn test_pow_fold_right_associative() -> Result<()> {
    let program = compile("export int powfold(int3 v) { return **/v; }");
    let mut instance = Instance::new(&program)?;
    // 2 ** (1 ** 3) = 2, not (2 ** 1) ** 3 = 8.
    assert_eq!(instance.call::<([i32; 3],), i32>("powfold", ([2, 1, 3],))?, 2);
    Ok(())
}

#[test]
fn test_short_circuit() -> Result<()> {
    // The right-hand side records that it ran; short-circuited calls
    // must leave the flag untouched.
    let program = compile(
        "global { var touched = 0; } \
         int probe() { touched = 1; return 1; } \
         export int guard(int x) { return x || probe(); } \
         export int guard_and(int x) { return x && probe(); } \
         export int touched_flag() { return touched; }",
    );
    let mut instance = Instance::new(&program)?;
    assert_eq!(instance.call::<(i32,), i32>("guard", (5,))?, 1);
    assert_eq!(instance.call::<(), i32>("touched_flag", ())?, 0);
    assert_eq!(instance.call::<(i32,), i32>("guard_and", (0,))?, 0);
    assert_eq!(instance.call::<(), i32>("touched_flag", ())?, 0);
    assert_eq!(instance.call::<(i32,), i32>("guard_and", (2,))?, 1);
    assert_eq!(instance.call::<(), i32>("touched_flag", ())?, 1);
    Ok(())
}

#[test]
fn test_ternary_short_circuit_and_vector_select() -> Result<()> {
    let program = compile(
        "export int pick(int c, int a, int b) { return c ? a : b; } \
         export int3 blend(int3 c, int3 a, int3 b) { return c ? a : b; }",
    );
    let mut instance = Instance::new(&program)?;
    assert_eq!(instance.call::<(i32, i32, i32), i32>("pick", (1, 10, 20))?, 10);
    assert_eq!(instance.call::<(i32, i32, i32), i32>("pick", (0, 10, 20))?, 20);
    assert_eq!(
        instance.call::<([i32; 3], [i32; 3], [i32; 3]), [i32; 3]>(
            "blend",
            ([1, 0, 1], [10, 11, 12], [20, 21, 22])
        )?,
        [10, 21, 12]
    );
    Ok(())
}

#[test]
fn test_nested_function_values() -> Result<()> {
    let program = compile(
        "export int apply_twice(int x) { \
           var inc = int(int y) { return y + 1; }; \
           return inc(inc(x)); \
         }",
    );
    let mut instance = Instance::new(&program)?;
    assert_eq!(instance.call::<(i32,), i32>("apply_twice", (5,))?, 7);
    Ok(())
}

#[test]
fn test_top_level_function_binding() -> Result<()> {
    let program = compile(
        "var helper = int(int x) { return x * 2; } ; \
         export int doubled(int x) { return helper(x); }",
    );
    let mut instance = Instance::new(&program)?;
    assert_eq!(instance.call::<(i32,), i32>("doubled", (21,))?, 42);
    // Non-exported bindings do not appear in the export map.
    assert!(!program.functions().contains_key("helper"));
    Ok(())
}

#[test]
fn test_world_arithmetic() -> Result<()> {
    let program = compile(
        "export world mix(world a, world b) { return (a + b) / 2.0 - a % b; }",
    );
    let mut instance = Instance::new(&program)?;
    let expect = (3.5 + 2.0) / 2.0 - 3.5 % 2.0;
    assert_eq!(instance.call::<(f64, f64), f64>("mix", (3.5, 2.0))?, expect);
    Ok(())
}

#[test]
fn test_unoptimised_matches_optimised() -> Result<()> {
    let source = "export int f(int n) { \
                    var total = 0; \
                    for (var i = 1; i <= n; i = i + 1) { total = total + i * i; } \
                    return total; \
                  }";
    let fast = Program::compile("fast", source, true);
    let slow = Program::compile("slow", source, false);
    assert!(fast.success() && slow.success());
    let mut fast_instance = Instance::new(&fast)?;
    let mut slow_instance = Instance::new(&slow)?;
    for n in [0, 1, 5, 10] {
        assert_eq!(
            fast_instance.call::<(i32,), i32>("f", (n,))?,
            slow_instance.call::<(i32,), i32>("f", (n,))?
        );
    }
    Ok(())
}

#[test]
fn test_print_ast_round_trip() {
    let source = "global { var foo = 5; } \
                  export int square(int x) { return x * x; } \
                  export world half(world w) { return w / 2.0; }";
    let program = compile(source);
    let printed = program.print_ast();
    let reparsed = Program::compile("test2", &printed, false);
    assert!(reparsed.success(), "reparse failed: {:?}", reparsed.errors());
    assert_eq!(printed, reparsed.print_ast());
}

#[test]
fn test_print_ir_mentions_exports() {
    let program = compile("export int square(int x) { return x * x; }");
    let ir = program.print_ir();
    assert!(ir.contains("square"), "got: {}", ir);
    assert!(ir.contains("!global_alloc"), "got: {}", ir);
}

#[test]
fn test_compile_errors_are_collected() {
    // Two independent type errors; the checker reports both.
    let program = Program::compile(
        "errs",
        "export int f() { return 1.5; } export int g() { return 2.5; }",
        true,
    );
    assert!(!program.success());
    assert_eq!(program.errors().len(), 2);
    assert!(program.errors()[0].contains("returning"));
    assert!(program.print_ast().contains("<error>"));
}

#[test]
fn test_syntax_error_fails_compile() {
    let program = Program::compile("bad", "export int f( {", true);
    assert!(!program.success());
    assert!(!program.errors().is_empty());
    assert!(Instance::new(&program).is_err());
}

#[test]
fn test_break_outside_loop_is_an_error() {
    let program = Program::compile("bad", "export int f() { break; return 1; }", true);
    assert!(!program.success());
    assert!(program.errors()[0].contains("break"));
}

#[test]
fn test_undeclared_identifier_is_an_error() {
    let program = Program::compile("bad", "export int f() { return missing; }", true);
    assert!(!program.success());
    assert!(program.errors()[0].contains("undeclared identifier"));
}

#[test]
fn test_enclosing_function_locals_are_inaccessible() {
    let program = Program::compile(
        "bad",
        "export int f(int x) { var g = int() { return x; }; return g(); }",
        true,
    );
    assert!(!program.success());
    assert!(program.errors()[0].contains("enclosing function"));
}

#[test]
fn test_all_paths_must_return() {
    let program = Program::compile(
        "bad",
        "export int f(int x) { if (x) { return 1; } }",
        true,
    );
    assert!(!program.success());
    assert!(program.errors()[0].contains("not all code paths"));
}

#[test]
fn test_check_is_idempotent() {
    let source = "export int square(int x) { return x * x; }";
    let ast = yang::parse(source).expect("parse");
    let first = yang::check(&ast);
    let second = yang::check(&ast);
    assert!(first.success() && second.success());
    assert_eq!(first.export_functions, second.export_functions);
}
