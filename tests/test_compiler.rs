use crucible::compiler::{self, CompileError};
use crucible::lexer::LexError;
use crucible::source::Source;

fn compile_source(input: &str) -> (Result<(), CompileError>, String) {
    let mut src = Source::from_bytes(input.as_bytes());
    let mut out = Vec::new();
    let result = compiler::compile(&mut src, &mut out);
    (result, String::from_utf8_lossy(&out).to_string())
}

fn compile_ok(input: &str) -> String {
    let (result, output) = compile_source(input);
    assert!(result.is_ok(), "compile failed: {:?}", result);
    output
}

fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

#[test]
fn test_return_constant() {
    let asm = compile_ok("int main(){ return 42; }");
    let expected = "\
.global _main
.align 4
_main:
  stp x29, x30, [sp, #-16]!
  mov x29, sp
  sub sp, sp, #0x00000200
  mov w0, #0x0000002a
  b .L00000000
  mov w0, #0x00000000
.L00000000:
  mov sp, x29
  ldp x29, x30, [sp], #16
  ret
";
    assert_eq!(asm, expected);
}

#[test]
fn test_deterministic_labels() {
    let src = "int f(int n){ if (n<2) return 1; return n*f(n-1); } int main(){ return f(5); }";
    assert_eq!(compile_ok(src), compile_ok(src));
}

#[test]
fn test_recursive_factorial() {
    let asm = compile_ok(
        "int fact(int n){ if (n<2) return 1; return n*fact(n-1); } \
         int main(){ return fact(5); }",
    );
    assert!(asm.contains(".global _fact"));
    assert!(asm.contains(".global _main"));
    // The parameter lands in its frame slot right after the prologue.
    assert!(asm.contains("str w0, [x29, #-8]"));
    assert!(asm.contains("cbz w0, .L00000001"));
    assert_eq!(count(&asm, "bl _fact"), 2);
    assert!(asm.contains("mul w0, w1, w0"));
}

#[test]
fn test_frame_discipline() {
    let asm = compile_ok(
        "int add(int a, int b){ return a+b; } \
         int main(){ int x; x=add(1,2); return x*add(3,4); }",
    );
    assert_eq!(count(&asm, "stp x29, x30, [sp, #-16]!"), 2);
    assert_eq!(count(&asm, "ldp x29, x30, [sp], #16"), 2);
    assert_eq!(count(&asm, "sub sp, sp, #0x00000200"), 2);
    assert_eq!(count(&asm, "mov sp, x29"), 2);
    // Every expression spill is popped again.
    let pushes = count(&asm, "str x0, [sp, #-16]!");
    let pops = asm
        .lines()
        .filter(|line| line.trim_start().starts_with("ldr") && line.contains(", [sp], #16"))
        .count();
    assert_eq!(pushes, pops);
}

#[test]
fn test_for_with_empty_update() {
    let asm = compile_ok(
        "int main(){ int s; s=0; int i; \
         for(i=0;i<5;) { s=s+i; i=i+1; } return s; }",
    );
    assert!(asm.contains(".L00000001:"));
    assert!(asm.contains("cbz w0, .L00000002"));
    assert!(asm.contains("b .L00000001"));
    assert!(asm.contains(".L00000002:"));
}

#[test]
fn test_for_update_replays_after_body() {
    let asm = compile_ok(
        "int main(){ int s; int i; s=0; \
         for(i=0;i<3;i=i+1) s=s+i; return s; }",
    );
    let branch_top = asm.find("b .L00000001").unwrap();
    let last_store = asm.rfind("str w0, [x1]").unwrap();
    assert!(last_store < branch_top);
}

#[test]
fn test_nested_for_updates() {
    // Each loop keeps its own captured update clause.
    let asm = compile_ok(
        "int main(){ int i; int j; int s; s=0; \
         for(i=0;i<3;i=i+1) for(j=0;j<3;j=j+1) s=s+1; return s; }",
    );
    // Outer: top=1 end=2; inner: top=3 end=4. Both back-branches exist.
    assert!(asm.contains("b .L00000001"));
    assert!(asm.contains("b .L00000003"));
    assert!(asm.contains("cbz w0, .L00000002"));
    assert!(asm.contains("cbz w0, .L00000004"));
}

#[test]
fn test_for_without_condition() {
    // An absent condition synthesizes true: no conditional exit branch.
    let asm = compile_ok("int main(){ int i; for(i=0;;) { return i; } return 0; }");
    assert!(!asm.contains("cbz"));
    assert!(asm.contains("b .L00000001"));
}

#[test]
fn test_pointers_and_arrays() {
    let asm = compile_ok(
        "int main(){ int a[3]; a[0]=1; a[1]=2; a[2]=3; int *p; \
         p=&a[1]; return *p + a[0]; }",
    );
    // Index scaling: sign-extend, shift by the 4-byte element size, add.
    assert!(asm.contains("sxtw x0, w0"));
    assert!(asm.contains("lsl x0, x0, #2"));
    assert!(asm.contains("add x0, x1, x0"));
    // Pointer-width store into p, pointer-width load back out.
    assert!(asm.contains("str x0, [x1]"));
    assert!(asm.contains("ldr x0, [x0]"));
    // Int-width element accesses.
    assert!(asm.contains("str w0, [x1]"));
    assert!(asm.contains("ldr w0, [x0]"));
}

#[test]
fn test_array_frame_allocation() {
    // int a[3] rounds to 16 bytes; the next local lands below it.
    let asm = compile_ok("int main(){ int a[3]; int x; a[0]=1; x=5; return x; }");
    assert!(asm.contains("sub x0, x29, #0x00000010"));
    assert!(asm.contains("sub x0, x29, #0x00000018"));
}

#[test]
fn test_deref_of_address_loads_value() {
    let asm = compile_ok("int main(){ int x; x=7; return *&x; }");
    assert!(asm.contains("ldr w0, [x0]"));
}

#[test]
fn test_while_loop() {
    let asm = compile_ok("int main(){ int i; i=0; while(i<3) i=i+1; return i; }");
    assert!(asm.contains(".L00000001:"));
    assert!(asm.contains("cbz w0, .L00000002"));
    assert!(asm.contains("b .L00000001"));
}

#[test]
fn test_if_else() {
    let asm = compile_ok("int main(){ if (1) return 2; else return 3; return 4; }");
    // else label then end label.
    assert!(asm.contains("cbz w0, .L00000001"));
    assert!(asm.contains("b .L00000002"));
    assert!(asm.contains(".L00000001:"));
    assert!(asm.contains(".L00000002:"));
}

#[test]
fn test_division_and_remainder() {
    let asm = compile_ok("int main(){ return 7 % 3 + 10 / 2; }");
    assert!(asm.contains("sdiv w2, w1, w0"));
    assert!(asm.contains("msub w0, w2, w0, w1"));
    assert!(asm.contains("sdiv w0, w1, w0"));
}

#[test]
fn test_unary_minus() {
    let asm = compile_ok("int main(){ return -5; }");
    assert!(asm.contains("mov w0, #0x00000005"));
    assert!(asm.contains("neg w0, w0"));
}

#[test]
fn test_comparisons_set_flags() {
    let asm = compile_ok("int main(){ return 1 < 2; }");
    assert!(asm.contains("cmp w1, w0"));
    assert!(asm.contains("cset w0, lt"));
    let asm = compile_ok("int main(){ return 1 == 2; }");
    assert!(asm.contains("cset w0, eq"));
    let asm = compile_ok("int main(){ return 1 != 2; }");
    assert!(asm.contains("cset w0, ne"));
}

#[test]
fn test_wide_immediate_uses_movk() {
    let asm = compile_ok("int main(){ return 100000; }");
    assert!(asm.contains("mov w0, #0x000086a0"));
    assert!(asm.contains("movk w0, #0x00000001, lsl #16"));
}

#[test]
fn test_call_arguments_load_in_reverse() {
    let asm = compile_ok("int f(int a, int b, int c); int main(){ return f(1,2,3); }");
    let x2 = asm.find("ldr x2, [sp], #16").unwrap();
    let x1 = asm.find("ldr x1, [sp], #16").unwrap();
    let x0 = asm.find("ldr x0, [sp], #16").unwrap();
    assert!(x2 < x1 && x1 < x0);
    assert!(asm.contains("bl _f"));
}

#[test]
fn test_prototype_emits_nothing() {
    let asm = compile_ok("int f(int a);");
    assert!(asm.is_empty());
}

#[test]
fn test_function_name_emitted_verbatim() {
    let asm = compile_ok("INT Main(){ RETURN 0; }");
    assert!(asm.contains(".global _Main"));
    assert!(asm.contains("_Main:"));
}

#[test]
fn test_pointer_parameter() {
    let asm = compile_ok("int get(int *p){ return *p; }");
    assert!(asm.contains("str x0, [x29, #-8]"));
    assert!(asm.contains("ldr x0, [x0]"));
    assert!(asm.contains("ldr w0, [x0]"));
}

#[test]
fn test_empty_and_nested_statements() {
    compile_ok("int main(){ ;; { ; { } } return 1; }");
}

#[test]
fn test_undefined_symbol() {
    let (result, output) = compile_source("int main(){ return x; }");
    assert!(matches!(result, Err(CompileError::UndefinedSymbol(_))));
    assert!(output.ends_with("ERR\n"));
}

#[test]
fn test_assignment_needs_lvalue() {
    let (result, output) = compile_source("int main(){ 3 = 4; return 0; }");
    assert!(matches!(result, Err(CompileError::ExpectedLvalue)));
    assert!(output.ends_with("ERR\n"));
}

#[test]
fn test_deref_needs_pointer() {
    let (result, _) = compile_source("int main(){ int x; return *x; }");
    assert!(matches!(result, Err(CompileError::ExpectedPointer)));
}

#[test]
fn test_address_of_needs_lvalue() {
    let (result, _) = compile_source("int main(){ return &3; }");
    assert!(matches!(result, Err(CompileError::ExpectedLvalue)));
}

#[test]
fn test_index_needs_pointer() {
    let (result, _) = compile_source("int main(){ int x; return x[0]; }");
    assert!(matches!(result, Err(CompileError::ExpectedPointer)));
}

#[test]
fn test_too_many_arguments() {
    let (result, output) = compile_source("int main(){ return f(1,2,3,4,5,6,7,8,9); }");
    assert!(matches!(result, Err(CompileError::TooManyArguments)));
    assert!(output.ends_with("ERR\n"));
}

#[test]
fn test_too_many_locals() {
    let mut body = String::from("int main(){ ");
    for i in 0..65 {
        body.push_str(&format!("int v{}; ", i));
    }
    body.push_str("return 0; }");
    let (result, _) = compile_source(&body);
    assert!(matches!(result, Err(CompileError::TooManySymbols)));
}

#[test]
fn test_frame_overflow() {
    let (result, _) = compile_source("int main(){ int a[200]; return 0; }");
    assert!(matches!(result, Err(CompileError::FrameOverflow)));
}

#[test]
fn test_update_clause_overflow() {
    let mut clause = String::from("i=i");
    for _ in 0..40 {
        clause.push_str("+1");
    }
    let src = format!("int main(){{ int i; for(i=0;i<3;{}) ; return 0; }}", clause);
    let (result, output) = compile_source(&src);
    assert!(matches!(
        result,
        Err(CompileError::Lex(LexError::TokenBufferOverflow))
    ));
    assert!(output.ends_with("ERR\n"));
}

#[test]
fn test_eof_inside_function() {
    let (result, output) = compile_source("int main(){ return 1;");
    assert!(result.is_err());
    assert!(output.ends_with("ERR\n"));
}

#[test]
fn test_unexpected_top_level_token() {
    let (result, _) = compile_source("42");
    assert!(matches!(result, Err(CompileError::Syntax(_))));
}
