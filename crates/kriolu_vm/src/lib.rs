pub mod ast;
pub mod chunk;
pub mod compiler;
pub mod error;
pub mod heap;
pub mod object;
pub mod opcode;
pub mod stdlib;
pub mod table;
pub mod value;
pub mod vm;

pub use compiler::Compiler;
pub use error::{InterpretResult, VmError};
pub use heap::Heap;
pub use value::Value;
pub use vm::Vm;

use object::{Gc, ObjFunction, Object};

/// Compila ed esegue sorgente Kriolu su stdout.
pub fn interpret(source: &str) -> InterpretResult {
    let mut vm = Vm::new();
    vm.interpret(source)
}

/// Stampa l'albero diagnostico (flag `-ast`). `false` su errore di
/// compilazione.
pub fn dump_ast(source: &str) -> bool {
    let mut heap = Heap::new();
    let (function, statements) = Compiler::compile(source, &mut heap);
    for statement in &statements {
        println!("{}", statement);
    }
    function.is_some()
}

/// Stampa il disassemblato della funzione radice e di ogni funzione
/// annidata (flag `-bytecode`). `false` su errore di compilazione.
pub fn dump_bytecode(source: &str) -> bool {
    let mut heap = Heap::new();
    let (function, _statements) = Compiler::compile(source, &mut heap);
    match function {
        Some(function) => {
            let mut out = String::new();
            disassemble_recursive(function, &mut out);
            print!("{}", out);
            true
        }
        None => false,
    }
}

fn disassemble_recursive(function: Gc<ObjFunction>, out: &mut String) {
    let name = match function.name {
        Some(name) => name.chars.to_string(),
        None => "<script>".to_string(),
    };
    out.push_str(&function.chunk.disassemble(&name));
    for constant in &function.chunk.constants {
        if let Value::Object(Object::Function(inner)) = constant {
            out.push('\n');
            disassemble_recursive(*inner, out);
        }
    }
}

// ── Test ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Gc, HeapSlot, Object};

    fn r(src: &str) -> Vec<String> {
        let mut vm = Vm::with_capture();
        let result = vm.interpret(src);
        assert_eq!(result, InterpretResult::Ok, "unexpected status for {:?}", src);
        vm.take_output()
    }

    fn one(src: &str) -> String {
        let lines = r(src);
        assert_eq!(lines.len(), 1, "expected a single line from {:?}", src);
        lines.into_iter().next().unwrap()
    }

    fn status(src: &str) -> InterpretResult {
        Vm::with_capture().interpret(src)
    }

    // ── Aritmetica ────────────────────────────────────────────────────────
    #[test] fn t_precedence()   { assert_eq!(one("imprimi 1 + 2 * 3;"), "7"); }
    #[test] fn t_sub()          { assert_eq!(one("imprimi 10 - 3;"), "7"); }
    #[test] fn t_div()          { assert_eq!(one("imprimi 10 / 4;"), "2.5"); }
    #[test] fn t_negate()       { assert_eq!(one("imprimi -5;"), "-5"); }
    #[test] fn t_grouping()     { assert_eq!(one("imprimi (1 + 2) * 3;"), "9"); }
    #[test] fn t_pow()          { assert_eq!(one("imprimi 2 ^ 10;"), "1024"); }
    #[test] fn t_pow_right()    { assert_eq!(one("imprimi 2 ^ 3 ^ 2;"), "512"); }
    #[test] fn t_div_by_zero()  { assert_eq!(one("imprimi 1 / 0;"), "inf"); }
    #[test] fn t_fraction()     { assert_eq!(one("imprimi 2.5;"), "2.5"); }

    // ── Confronto / logica ────────────────────────────────────────────────
    #[test] fn t_eq()        { assert_eq!(one("imprimi 1 == 1;"), "true"); }
    #[test] fn t_neq()       { assert_eq!(one("imprimi 1 =/= 2;"), "true"); }
    #[test] fn t_lt()        { assert_eq!(one("imprimi 1 < 2;"), "true"); }
    #[test] fn t_le()        { assert_eq!(one("imprimi 3 <= 3;"), "true"); }
    #[test] fn t_ge()        { assert_eq!(one("imprimi 3 >= 4;"), "false"); }
    #[test] fn t_ka()        { assert_eq!(one("imprimi ka verdadi;"), "false"); }
    #[test] fn t_cross_type(){ assert_eq!(one("imprimi 1 == \"1\";"), "false"); }
    #[test] fn t_nil_print() { assert_eq!(one("imprimi nulo;"), "nulo"); }
    #[test] fn t_and_short() { assert_eq!(one("imprimi falsu e 1;"), "false"); }
    #[test] fn t_and_value() { assert_eq!(one("imprimi verdadi e 1;"), "1"); }
    #[test] fn t_or_short()  { assert_eq!(one("imprimi 1 ou 2;"), "1"); }
    #[test] fn t_or_value()  { assert_eq!(one("imprimi falsu ou 2;"), "2"); }

    // ── Stringhe ──────────────────────────────────────────────────────────
    #[test] fn t_concat() {
        assert_eq!(one("mimoria a = \"ola\"; mimoria b = \" mundo\"; imprimi a + b;"), "ola mundo");
    }
    #[test] fn t_interned_equality() {
        assert_eq!(one("imprimi \"a\" + \"b\" == \"ab\";"), "true");
    }
    #[test] fn t_interpolation() {
        assert_eq!(one("mimoria n = \"mundo\"; imprimi \"ola {n}!\";"), "ola mundo!");
    }
    #[test] fn t_interpolation_expression() {
        assert_eq!(one("imprimi \"{1 + 2}\";"), "3");
    }
    #[test] fn t_interpolation_multiple() {
        assert_eq!(one("imprimi \"{1} i {2}\";"), "1 i 2");
    }

    // ── Variabili ─────────────────────────────────────────────────────────
    #[test] fn t_global_roundtrip() {
        assert_eq!(r("mimoria a = 1; imprimi a; a = 2; imprimi a;"), vec!["1", "2"]);
    }
    #[test] fn t_global_default_nil() { assert_eq!(one("mimoria a; imprimi a;"), "nulo"); }
    #[test] fn t_locals_shadowing() {
        assert_eq!(r("mimoria a = 1; { mimoria a = 2; imprimi a; } imprimi a;"), vec!["2", "1"]);
    }
    #[test] fn t_chained_assignment() {
        assert_eq!(one("mimoria a; mimoria b; a = b = 3; imprimi a + b;"), "6");
    }

    // ── Controllo di flusso ───────────────────────────────────────────────
    #[test] fn t_si_true()  { assert_eq!(one("si (1 < 2) { imprimi \"sim\"; }"), "sim"); }
    #[test] fn t_si_false() { assert!(r("si (1 > 2) { imprimi \"sim\"; }").is_empty()); }
    #[test] fn t_sinou()    { assert_eq!(one("si (falsu) { imprimi 1; } sinou { imprimi 2; }"), "2"); }
    #[test] fn t_timenti() {
        assert_eq!(r("mimoria i = 0; timenti (i < 3) { imprimi i; i = i + 1; }"), vec!["0", "1", "2"]);
    }
    #[test] fn t_pa() {
        assert_eq!(r("pa (mimoria i = 0; i < 3; i = i + 1) { imprimi i; }"), vec!["0", "1", "2"]);
    }
    #[test] fn t_di_same_as_pa() {
        assert_eq!(r("di (mimoria i = 0; i < 3; i = i + 1) { imprimi i; }"), vec!["0", "1", "2"]);
    }
    #[test] fn t_sai() {
        assert_eq!(
            r("mimoria i = 0; timenti (verdadi) { si (i == 2) { sai; } imprimi i; i = i + 1; }"),
            vec!["0", "1"]
        );
    }
    #[test] fn t_salta() {
        let src = "pa (mimoria i = 0; i < 4; i = i + 1) { si (i == 1) { salta; } imprimi i; }";
        assert_eq!(r(src), vec!["0", "2", "3"]);
    }
    #[test] fn t_sai_nested_loop() {
        let src = "pa (mimoria i = 0; i < 2; i = i + 1) {\
                       pa (mimoria j = 0; j < 9; j = j + 1) { si (j == 1) { sai; } }\
                       imprimi i;\
                   }";
        assert_eq!(r(src), vec!["0", "1"]);
    }

    // ── Funzioni ──────────────────────────────────────────────────────────
    #[test] fn t_call() {
        assert_eq!(one("funson soma(a, b) { divolvi a + b; } imprimi soma(3, 4);"), "7");
    }
    #[test] fn t_recursion_factorial() {
        let src = "funson f(n) { si (n <= 1) { divolvi 1; } divolvi n * f(n - 1); } imprimi f(5);";
        assert_eq!(one(src), "120");
    }
    #[test] fn t_implicit_return_nil() {
        assert_eq!(one("funson f() {} imprimi f();"), "nulo");
    }
    #[test] fn t_function_prints_name() {
        assert_eq!(one("funson f() {} imprimi f;"), "<fn f>");
    }
    #[test] fn t_native_relogiu() {
        assert_eq!(one("imprimi relogiu() > 0;"), "true");
    }
    #[test] fn t_native_absolutu() {
        assert_eq!(one("imprimi absolutu(-5);"), "5");
    }

    // ── Closure ───────────────────────────────────────────────────────────
    #[test] fn t_closure_counter() {
        let src = "funson mk() { mimoria x = 0; funson inc() { x = x + 1; divolvi x; } divolvi inc; }\
                   mimoria c = mk(); imprimi c(); imprimi c(); imprimi c();";
        assert_eq!(r(src), vec!["1", "2", "3"]);
    }
    #[test] fn t_closure_reads_current_value() {
        let src = "mimoria out;\
                   { mimoria x = 1; funson leggi() { divolvi x; } x = 2; out = leggi; }\
                   imprimi out();";
        assert_eq!(one(src), "2");
    }
    #[test] fn t_two_closures_share_cell() {
        let src = "funson mk() {\
                       mimoria x = 0;\
                       funson set(v) { x = v; }\
                       funson get() { divolvi x; }\
                       set(41);\
                       x = x + 1;\
                       divolvi get;\
                   }\
                   imprimi mk()();";
        assert_eq!(one(src), "42");
    }
    #[test] fn t_capture_through_intermediate() {
        let src = "funson a() {\
                       mimoria x = \"fundo\";\
                       funson b() { funson c() { divolvi x; } divolvi c; }\
                       divolvi b()();\
                   }\
                   imprimi a();";
        assert_eq!(one(src), "fundo");
    }

    // ── Classi ────────────────────────────────────────────────────────────
    #[test] fn t_class_prints_name() { assert_eq!(one("klasi A {} imprimi A;"), "A"); }
    #[test] fn t_instance_prints()   { assert_eq!(one("klasi A {} imprimi A{};"), "A instance"); }
    #[test] fn t_fields() {
        assert_eq!(one("klasi A {} mimoria a = A{}; a.x = 41; a.x = a.x + 1; imprimi a.x;"), "42");
    }
    #[test] fn t_method_keli() {
        let src = "klasi Ponto { soma() { divolvi keli.x + keli.y; } }\
                   mimoria p = Ponto{}; p.x = 1; p.y = 2; imprimi p.soma();";
        assert_eq!(one(src), "3");
    }
    #[test] fn t_konstrutor() {
        let src = "klasi Ponto { konstrutor(x, y) { keli.x = x; keli.y = y; } }\
                   imprimi Ponto{3, 4}.x + Ponto{3, 4}.y;";
        assert_eq!(one(src), "7");
    }
    #[test] fn t_konstrutor_returns_receiver() {
        assert_eq!(one("klasi A { konstrutor() { divolvi; } } imprimi A{};"), "A instance");
    }
    #[test] fn t_call_parens_instantiates() {
        assert_eq!(one("klasi A {} imprimi A();"), "A instance");
    }
    #[test] fn t_bound_method() {
        let src = "klasi A { saluda() { imprimi \"oi\"; } }\
                   mimoria m = A{}.saluda; m();";
        assert_eq!(one(src), "oi");
    }
    #[test] fn t_field_shadows_method() {
        let src = "klasi A { f() { divolvi 1; } }\
                   mimoria a = A{}; funson dos() { divolvi 2; } a.f = dos;\
                   imprimi a.f();";
        assert_eq!(one(src), "2");
    }
    #[test] fn t_inheritance() {
        let src = "klasi A { saluda() { imprimi \"A\"; } }\
                   klasi B < A { saluda() { riba.saluda(); imprimi \"B\"; } }\
                   B{}.saluda();";
        assert_eq!(r(src), vec!["A", "B"]);
    }
    #[test] fn t_inherited_method_without_override() {
        let src = "klasi A { f() { divolvi 7; } } klasi B < A {} imprimi B{}.f();";
        assert_eq!(one(src), "7");
    }
    #[test] fn t_riba_bound() {
        let src = "klasi A { f() { divolvi \"pai\"; } }\
                   klasi B < A { f() { divolvi riba.f; } }\
                   imprimi B{}.f()();";
        assert_eq!(one(src), "pai");
    }

    // ── Errori di compilazione ────────────────────────────────────────────
    #[test] fn t_err_self_init_global() {
        assert_eq!(status("mimoria x = x;"), InterpretResult::CompileError);
    }
    #[test] fn t_err_self_init_local() {
        assert_eq!(status("{ mimoria x = x; }"), InterpretResult::CompileError);
    }
    #[test] fn t_err_duplicate_local() {
        assert_eq!(status("{ mimoria x = 1; mimoria x = 2; }"), InterpretResult::CompileError);
    }
    #[test] fn t_err_bad_assignment_target() {
        assert_eq!(status("1 = 2;"), InterpretResult::CompileError);
    }
    #[test] fn t_err_assignment_in_grouping() {
        assert_eq!(status("mimoria a; (a) = 3;"), InterpretResult::CompileError);
    }
    #[test] fn t_err_return_top_level() {
        assert_eq!(status("divolvi 1;"), InterpretResult::CompileError);
    }
    #[test] fn t_err_return_value_from_konstrutor() {
        assert_eq!(status("klasi A { konstrutor() { divolvi 1; } }"), InterpretResult::CompileError);
    }
    #[test] fn t_err_keli_outside_class() {
        assert_eq!(status("imprimi keli;"), InterpretResult::CompileError);
    }
    #[test] fn t_err_riba_without_superclass() {
        assert_eq!(status("klasi A { f() { riba.f(); } }"), InterpretResult::CompileError);
    }
    #[test] fn t_err_inherit_self() {
        assert_eq!(status("klasi A < A {}"), InterpretResult::CompileError);
    }
    #[test] fn t_err_sai_outside_loop() {
        assert_eq!(status("sai;"), InterpretResult::CompileError);
    }
    #[test] fn t_err_salta_outside_loop() {
        assert_eq!(status("salta;"), InterpretResult::CompileError);
    }
    #[test] fn t_err_missing_semicolon() {
        assert_eq!(status("imprimi 1"), InterpretResult::CompileError);
    }
    #[test] fn t_err_recovers_and_reports_later_errors() {
        // La sincronizzazione riparte dal prossimo statement.
        assert_eq!(status("imprimi ; imprimi 2;"), InterpretResult::CompileError);
    }

    // ── Errori runtime ────────────────────────────────────────────────────
    #[test] fn t_err_add_number_string() {
        assert_eq!(status("1 + \"a\";"), InterpretResult::RuntimeError);
    }
    #[test] fn t_err_arity() {
        assert_eq!(status("funson f() {} f(1);"), InterpretResult::RuntimeError);
    }
    #[test] fn t_err_undefined_global() {
        assert_eq!(status("imprimi inexistenti;"), InterpretResult::RuntimeError);
    }
    #[test] fn t_err_assign_undefined_global() {
        assert_eq!(status("inexistenti = 1;"), InterpretResult::RuntimeError);
    }
    #[test] fn t_err_not_callable() {
        assert_eq!(status("mimoria a = 1; a();"), InterpretResult::RuntimeError);
    }
    #[test] fn t_err_class_call_on_non_class() {
        assert_eq!(status("mimoria a = 1; a{};"), InterpretResult::RuntimeError);
    }
    #[test] fn t_err_undefined_property() {
        assert_eq!(status("klasi A {} imprimi A{}.x;"), InterpretResult::RuntimeError);
    }
    #[test] fn t_err_property_on_number() {
        assert_eq!(status("imprimi 1.x;"), InterpretResult::RuntimeError);
    }
    #[test] fn t_err_frame_overflow() {
        assert_eq!(status("funson inf() { divolvi inf(); } inf();"), InterpretResult::RuntimeError);
    }
    #[test] fn t_err_native_arity() {
        assert_eq!(status("relogiu(1);"), InterpretResult::RuntimeError);
    }

    // ── Disciplina dello stack ────────────────────────────────────────────
    #[test]
    fn t_stack_empty_after_run() {
        let mut vm = Vm::with_capture();
        let src = "mimoria a = 1; si (a == 1) { imprimi a; } pa (mimoria i = 0; i < 3; i = i + 1) {}\
                   funson f(n) { divolvi n; } f(9);";
        assert_eq!(vm.interpret(src), InterpretResult::Ok);
        assert_eq!(vm.stack_depth(), 0);
    }
    #[test]
    fn t_stack_empty_after_runtime_error() {
        let mut vm = Vm::with_capture();
        assert_eq!(vm.interpret("funson f() { 1 + \"a\"; } f();"), InterpretResult::RuntimeError);
        assert_eq!(vm.stack_depth(), 0);
    }

    // ── Interner ──────────────────────────────────────────────────────────
    #[test]
    fn t_intern_idempotent() {
        let mut heap = Heap::new();
        let a = heap.intern("mesma");
        let b = heap.intern("mesma");
        assert!(Gc::ptr_eq(a, b));
    }

    // ── Garbage collector ─────────────────────────────────────────────────
    #[test]
    fn t_gc_frees_unreachable_and_keeps_roots() {
        let mut heap = Heap::new();
        let keep = heap.intern("fica");
        heap.intern("bai");
        assert_eq!(heap.object_count(), 2);
        heap.collect(&[Object::String(keep)]);
        assert_eq!(heap.object_count(), 1);
        assert!(heap.find_interned("bai").is_none());
        assert!(Gc::ptr_eq(heap.find_interned("fica").unwrap(), keep));
    }
    #[test]
    fn t_gc_clears_marks_on_survivors() {
        let mut heap = Heap::new();
        let keep = heap.intern("fica");
        heap.collect(&[Object::String(keep)]);
        assert!(!keep.header.marked.get());
    }
    #[test]
    fn t_gc_traces_closed_heap_values() {
        let mut heap = Heap::new();
        let inner = heap.intern("vivu");
        let cell = heap.alloc_heap_value(HeapSlot::Closed(Value::Object(Object::String(inner))));
        heap.collect(&[Object::HeapValue(cell)]);
        assert!(heap.find_interned("vivu").is_some());
    }
    #[test]
    fn t_gc_temp_roots_protect() {
        let mut heap = Heap::new();
        let temp = heap.intern("pendenti");
        heap.push_temp_root(Object::String(temp));
        heap.collect(&[]);
        assert!(heap.find_interned("pendenti").is_some());
        heap.pop_temp_root();
        heap.collect(&[]);
        assert!(heap.find_interned("pendenti").is_none());
    }
    #[test]
    fn t_gc_cycles_are_collected() {
        // L'istanza si riferisce da sola attraverso un campo: il conteggio
        // dei riferimenti non basterebbe, il tracing sì.
        let mut vm = Vm::with_capture();
        let src = "klasi A {} mimoria a = A{}; a.mesmu = a; a = nulo; imprimi \"ok\";";
        assert_eq!(vm.interpret(src), InterpretResult::Ok);
        let live_before = vm.heap().object_count();
        vm.collect_garbage();
        assert!(vm.heap().object_count() < live_before);
    }
}
