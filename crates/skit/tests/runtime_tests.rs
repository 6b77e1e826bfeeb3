//! End-to-end scenarios driving the public surface: hand-emitted
//! bytecode, emitter-built functions, object lifecycles and the garbage
//! collector.

use pretty_assertions::assert_eq;
use skit::{Emitter, Heap, Opcode, Operand, Program, ROOT_HANDLE, Runtime, Value, run};

const T0: Operand = Operand::U(0);
const T1: Operand = Operand::U(1);
const T2: Operand = Operand::U(2);
const NONE: Operand = Operand::U(0);

#[test]
fn counted_loop() {
    // t0 = 0; t1 = 10; do { t0 += 1 } while t0 < t1
    let mut program = Program::new(0);
    let top = program.new_label();
    program.emit(Opcode::Xor, T0, T0);
    program.emit(Opcode::MovNum, T1, Operand::F(10.0));
    program.place_label(top);
    program.emit(Opcode::Inc, T0, NONE);
    program.emit(Opcode::Cmp, T0, T1);
    program.emit(Opcode::Jl, Operand::U(top), NONE);
    program.emit(Opcode::Ret, NONE, NONE);
    program.finalize().unwrap();

    let mut rt = Runtime::new("Application");
    assert_eq!(
        run(&program, &mut rt, ROOT_HANDLE).unwrap(),
        Value::Number(10.0)
    );
    assert!(rt.stack().is_empty());
}

#[test]
fn fibonacci_through_the_stack() {
    // push 0; push 1; 10 times { pop b; pop a; push b; push a+b }
    let mut program = Program::new(0);
    let top = program.new_label();
    program.emit(Opcode::Xor, T0, T0);
    program.emit(Opcode::Push, T0, NONE);
    program.emit(Opcode::Inc, T0, NONE);
    program.emit(Opcode::Push, T0, NONE);
    program.emit(Opcode::MovNum, T2, Operand::F(10.0));
    program.place_label(top);
    program.emit(Opcode::Pop, T1, NONE);
    program.emit(Opcode::Pop, T0, NONE);
    program.emit(Opcode::Add, T0, T1);
    program.emit(Opcode::Push, T1, NONE);
    program.emit(Opcode::Push, T0, NONE);
    program.emit(Opcode::Dec, T2, NONE);
    program.emit(Opcode::Jne, Operand::U(top), NONE);
    program.emit(Opcode::Pop, T0, NONE);
    program.emit(Opcode::Ret, NONE, NONE);
    program.finalize().unwrap();

    let mut rt = Runtime::new("Application");
    assert_eq!(
        run(&program, &mut rt, ROOT_HANDLE).unwrap(),
        Value::Number(89.0)
    );
    assert!(rt.stack().is_empty());
}

#[test]
fn string_concatenation() {
    let mut rt = Runtime::new("Application");

    // "hello " + "world", through the emitter's additive protocol.
    let mut em = Emitter::new("Application");
    em.begin_function();
    em.load_string("hello ");
    em.additive_begin();
    em.load_string("world");
    em.additive_end('+');
    em.ret();
    let program = em.end_function().unwrap();
    rt.pool_mut().put("Application", "hello", program);
    assert_eq!(
        rt.call(ROOT_HANDLE, "hello", &[]).unwrap(),
        Value::String("hello world".into())
    );

    // "n=" + 3 coerces the number through its lexical form.
    let mut em = Emitter::new("Application");
    em.begin_function();
    em.load_string("n=");
    em.additive_begin();
    em.load_number(3.0);
    em.additive_end('+');
    em.ret();
    let program = em.end_function().unwrap();
    rt.pool_mut().put("Application", "label", program);
    assert_eq!(
        rt.call(ROOT_HANDLE, "label", &[]).unwrap(),
        Value::String("n=3".into())
    );
}

#[test]
fn typeof_ladder() {
    let mut rt = Runtime::new("Application");

    let cases: Vec<(&str, Box<dyn Fn(&mut Emitter)>, &str)> = vec![
        ("t_null", Box::new(|em: &mut Emitter| em.load_null()), "null"),
        (
            "t_num",
            Box::new(|em: &mut Emitter| em.load_number(1.5)),
            "number",
        ),
        (
            "t_str",
            Box::new(|em: &mut Emitter| em.load_string("x")),
            "string",
        ),
        (
            "t_bool",
            Box::new(|em: &mut Emitter| em.load_bool(true)),
            "boolean",
        ),
        ("t_obj", Box::new(|em: &mut Emitter| em.load_root()), "object"),
    ];

    for (name, load, expected) in cases {
        let mut em = Emitter::new("Application");
        em.begin_function();
        load(&mut em);
        em.unary_typeof();
        em.ret();
        let program = em.end_function().unwrap();
        rt.pool_mut().put("Application", name, program);
        assert_eq!(
            rt.call(ROOT_HANDLE, name, &[]).unwrap(),
            Value::String(expected.into()),
            "typeof probe {name}"
        );
    }
}

#[test]
fn gc_sweeps_a_detached_child() {
    let mut rt = Runtime::new("Application");
    let a = rt.spawn(ROOT_HANDLE, "A").unwrap();
    let b = rt.spawn(ROOT_HANDLE, "B").unwrap();
    let c = rt.spawn(ROOT_HANDLE, "C").unwrap();

    rt.manager_mut()
        .get_mut(ROOT_HANDLE)
        .unwrap()
        .remove_child(b);

    let before = rt.manager().count();
    while rt.manager().count() == before {
        rt.collect_garbage();
    }

    assert_eq!(rt.manager().count(), before - 1);
    assert!(rt.manager().exists(a));
    assert!(!rt.manager().exists(b));
    assert!(rt.manager().exists(c));
}

#[test]
fn recursive_factorial() {
    let mut rt = Runtime::new("Application");

    // fact(n) = if (n <= 1) return 1; return n * fact(n - 1);
    let mut em = Emitter::new("Application");
    em.begin_function();
    em.declare_argument("n", 1, 0, 1).unwrap();

    let base_case_done = em.new_label();
    em.read_identifier("n", 2).unwrap();
    em.relational_begin();
    em.load_number(1.0);
    em.relational_end("<=");
    em.if_test(base_case_done);
    em.load_number(1.0);
    em.ret();
    em.end_if(base_case_done);

    em.read_identifier("n", 3).unwrap();
    em.multiplicative_begin();
    em.call_self_begin();
    em.read_identifier("n", 3).unwrap();
    em.additive_begin();
    em.load_number(1.0);
    em.additive_end('-');
    em.push_param();
    em.call("fact", 1);
    em.pop_params(1);
    em.multiplicative_end('*');
    em.ret();

    let fact = em.end_function().unwrap();
    rt.pool_mut().put("Application", "fact", fact);

    assert_eq!(
        rt.call(ROOT_HANDLE, "fact", &[Value::Number(5.0)]).unwrap(),
        Value::Number(120.0)
    );
    assert!(rt.stack().is_empty());
}

#[test]
fn heap_grows_once_for_seventeen_cells() {
    let mut heap = Heap::new();
    let ptrs: Vec<_> = (0..17).map(|_| heap.alloc()).collect();
    assert_eq!(heap.size(), 32);
    for ptr in ptrs {
        assert_eq!(*heap.at(ptr).unwrap(), Value::Null);
    }
}

#[test]
fn handle_reuse_is_clean() {
    let mut rt = Runtime::new("Application");
    let a = rt.spawn(ROOT_HANDLE, "A").unwrap();
    assert!(rt.manager().exists(a));

    assert!(rt.delete_object(a).unwrap());
    assert!(!rt.manager().exists(a));
    assert!(!rt.delete_object(a).unwrap());

    let b = rt.spawn(ROOT_HANDLE, "B").unwrap();
    assert_eq!(b, a);
    assert!(rt.manager().exists(b));
    assert_eq!(rt.manager().get(b).unwrap().name(), "B");
}

#[test]
fn null_handle_never_exists() {
    let rt = Runtime::new("Application");
    assert!(!rt.manager().exists(0));
    assert!(rt.manager().get(0).is_err());
}

#[test]
fn object_fields_are_primed_and_readable() {
    let mut rt = Runtime::new("Application");

    let mut em = Emitter::new("Player");
    let (start, end) = em.object_header();
    em.load_number(100.0);
    em.declare_var("health");
    em.load_string("alive");
    em.declare_var("status");

    // health() accessor, compiled against the same object scope.
    em.begin_function();
    em.read_identifier("health", 4).unwrap();
    em.ret();
    let getter = em.end_function().unwrap();

    em.object_footer(start, end);
    let init = em.finish().unwrap();

    rt.pool_mut().put("Player", "__init", init);
    rt.pool_mut().put("Player", "health", getter);

    let player = rt.spawn(ROOT_HANDLE, "Player").unwrap();
    let heap = rt.manager().get(player).unwrap().heap();
    assert_eq!(heap.cells_in_use(), 2);
    assert_eq!(*heap.at(0).unwrap(), Value::Number(100.0));
    assert_eq!(*heap.at(1).unwrap(), Value::String("alive".into()));

    assert_eq!(
        rt.call(player, "health", &[]).unwrap(),
        Value::Number(100.0)
    );
}

#[test]
fn state_assignment_ends_the_iteration() {
    let mut rt = Runtime::new("Application");

    let mut em = Emitter::new("Door");
    em.begin_function();
    em.load_string("open");
    em.set_state();
    let main_state = em.end_function().unwrap();
    rt.pool_mut().put("Door", "state:main", main_state);

    let door = rt.spawn(ROOT_HANDLE, "Door").unwrap();
    assert_eq!(rt.manager().get(door).unwrap().state(), "main");

    assert!(rt.update_object(door).unwrap());
    assert_eq!(rt.manager().get(door).unwrap().state(), "open");

    // No program for the new state: updating is a no-op, not an error.
    assert!(rt.update_object(door).unwrap());
}

#[test]
fn destructor_runs_on_delete() {
    let mut rt = Runtime::new("Application");

    // Application.on_release() flips the root's state.
    let mut em = Emitter::new("Application");
    em.begin_function();
    em.load_string("notified");
    em.set_state();
    let on_release = em.end_function().unwrap();
    rt.pool_mut().put("Application", "on_release", on_release);

    // Tracked's destructor calls it on the root.
    let mut destructor = Program::new(0);
    let fn_name = destructor.add_text("on_release");
    destructor.emit(Opcode::PushN, Operand::U(0), NONE);
    destructor.emit(Opcode::MovRoot, T1, NONE);
    destructor.emit(Opcode::Push, T1, NONE);
    destructor.emit(Opcode::Call, Operand::U(fn_name), Operand::U(0));
    destructor.emit(Opcode::PopN, Operand::U(1), NONE);
    destructor.emit(Opcode::Ret, NONE, NONE);
    destructor.finalize().unwrap();
    rt.pool_mut().put("Tracked", "destructor", destructor);

    let tracked = rt.spawn(ROOT_HANDLE, "Tracked").unwrap();
    assert!(rt.delete_object(tracked).unwrap());
    assert!(!rt.manager().exists(tracked));
    assert_eq!(rt.manager().get(ROOT_HANDLE).unwrap().state(), "notified");
}

#[test]
fn ternary_picks_a_branch() {
    let mut rt = Runtime::new("Application");

    for (name, cond, expected) in [("pick_a", true, 1.0), ("pick_b", false, 2.0)] {
        let mut em = Emitter::new("Application");
        em.begin_function();
        let nope = em.new_label();
        let done = em.new_label();
        em.load_bool(cond);
        em.ternary_test(nope);
        em.load_number(1.0);
        em.ternary_else(nope, done);
        em.load_number(2.0);
        em.ternary_end(done);
        em.ret();
        let program = em.end_function().unwrap();
        rt.pool_mut().put("Application", name, program);
        assert_eq!(
            rt.call(ROOT_HANDLE, name, &[]).unwrap(),
            Value::Number(expected)
        );
    }
}

#[test]
fn logical_operators_short_circuit_by_value() {
    let mut rt = Runtime::new("Application");

    // false || "x" evaluates the right operand and yields it.
    let mut em = Emitter::new("Application");
    em.begin_function();
    let done = em.new_label();
    em.load_bool(false);
    em.logical_or(done);
    em.load_string("x");
    em.logical_end(done);
    em.ret();
    rt.pool_mut()
        .put("Application", "or_rhs", em.end_function().unwrap());
    assert_eq!(
        rt.call(ROOT_HANDLE, "or_rhs", &[]).unwrap(),
        Value::String("x".into())
    );

    // true || ... never evaluates the right operand.
    let mut em = Emitter::new("Application");
    em.begin_function();
    let done = em.new_label();
    em.load_bool(true);
    em.logical_or(done);
    em.load_string("never");
    em.logical_end(done);
    em.ret();
    rt.pool_mut()
        .put("Application", "or_lhs", em.end_function().unwrap());
    assert_eq!(
        rt.call(ROOT_HANDLE, "or_lhs", &[]).unwrap(),
        Value::Boolean(true)
    );

    // false && ... stays false.
    let mut em = Emitter::new("Application");
    em.begin_function();
    let done = em.new_label();
    em.load_bool(false);
    em.logical_and(done);
    em.load_string("never");
    em.logical_end(done);
    em.ret();
    rt.pool_mut()
        .put("Application", "and_lhs", em.end_function().unwrap());
    assert_eq!(
        rt.call(ROOT_HANDLE, "and_lhs", &[]).unwrap(),
        Value::Boolean(false)
    );
}

#[test]
fn equality_and_relational_operators() {
    let mut rt = Runtime::new("Application");

    let cases: Vec<(&str, f32, &str, f32, bool)> = vec![
        ("eq_same", 3.0, "==", 3.0, true),
        ("eq_diff", 3.0, "==", 4.0, false),
        ("ne_diff", 3.0, "!=", 4.0, true),
        ("lt", 2.0, "<", 3.0, true),
        ("ge", 2.0, ">=", 3.0, false),
        ("le_eq", 3.0, "<=", 3.0, true),
        ("gt", 5.0, ">", 3.0, true),
    ];

    for (name, left, op, right, expected) in cases {
        let mut em = Emitter::new("Application");
        em.begin_function();
        em.load_number(left);
        if op == "==" || op == "!=" {
            em.equality_begin();
            em.load_number(right);
            em.equality_end(op);
        } else {
            em.relational_begin();
            em.load_number(right);
            em.relational_end(op);
        }
        em.ret();
        rt.pool_mut()
            .put("Application", name, em.end_function().unwrap());
        assert_eq!(
            rt.call(ROOT_HANDLE, name, &[]).unwrap(),
            Value::Boolean(expected),
            "{left} {op} {right}"
        );
    }
}

#[test]
fn pre_and_post_increment() {
    let mut rt = Runtime::new("Application");

    // pre: x = 5; return ++x;  -> 6
    let mut em = Emitter::new("Application");
    em.begin_function();
    em.load_number(5.0);
    em.assign('=', "x", 1).unwrap();
    em.pre_incdec("++", "x", 2).unwrap();
    em.ret();
    rt.pool_mut()
        .put("Application", "pre", em.end_function().unwrap());
    assert_eq!(
        rt.call(ROOT_HANDLE, "pre", &[]).unwrap(),
        Value::Number(6.0)
    );

    // post: x = 5; return x--;  -> 5
    let mut em = Emitter::new("Application");
    em.begin_function();
    em.load_number(5.0);
    em.assign('=', "x", 1).unwrap();
    em.post_incdec("--", "x", 2).unwrap();
    em.ret();
    rt.pool_mut()
        .put("Application", "post", em.end_function().unwrap());
    assert_eq!(
        rt.call(ROOT_HANDLE, "post", &[]).unwrap(),
        Value::Number(5.0)
    );
}

#[test]
fn compound_assignment_dispatches_on_strings() {
    let mut rt = Runtime::new("Application");

    // s = "n="; s += 3; return s;
    let mut em = Emitter::new("Application");
    em.begin_function();
    em.load_string("n=");
    em.assign('=', "s", 1).unwrap();
    em.load_number(3.0);
    em.assign('+', "s", 2).unwrap();
    em.read_identifier("s", 3).unwrap();
    em.ret();
    rt.pool_mut()
        .put("Application", "build", em.end_function().unwrap());
    assert_eq!(
        rt.call(ROOT_HANDLE, "build", &[]).unwrap(),
        Value::String("n=3".into())
    );

    // x = 10; x /= 4; return x;
    let mut em = Emitter::new("Application");
    em.begin_function();
    em.load_number(10.0);
    em.assign('=', "x", 1).unwrap();
    em.load_number(4.0);
    em.assign('/', "x", 2).unwrap();
    em.read_identifier("x", 3).unwrap();
    em.ret();
    rt.pool_mut()
        .put("Application", "quarter", em.end_function().unwrap());
    assert_eq!(
        rt.call(ROOT_HANDLE, "quarter", &[]).unwrap(),
        Value::Number(2.5)
    );
}

#[test]
fn subscript_assignment_goes_through_member_calls() {
    let mut rt = Runtime::new("Application");

    // A one-slot container: get(k) returns the slot, set(k, v) fills it.
    let mut em = Emitter::new("Cell");
    let (start, end) = em.object_header();
    em.load_null();
    em.declare_var("data");

    em.begin_function();
    em.declare_argument("k", 1, 0, 1).unwrap();
    em.read_identifier("data", 2).unwrap();
    em.ret();
    let get = em.end_function().unwrap();

    em.begin_function();
    em.declare_argument("k", 1, 0, 2).unwrap();
    em.declare_argument("v", 1, 1, 2).unwrap();
    em.read_identifier("v", 2).unwrap();
    em.assign('=', "data", 2).unwrap();
    let set = em.end_function().unwrap();

    em.object_footer(start, end);
    let init = em.finish().unwrap();

    rt.pool_mut().put("Cell", "__init", init);
    rt.pool_mut().put("Cell", "get", get);
    rt.pool_mut().put("Cell", "set", set);
    let cell = rt.spawn(ROOT_HANDLE, "Cell").unwrap();

    // store(c): c[1] = 5, then c[1] += 2; returns the compound RHS.
    let mut em = Emitter::new("Application");
    em.begin_function();
    em.declare_argument("c", 1, 0, 1).unwrap();
    em.load_number(1.0);
    em.dict_set_begin("c", 2).unwrap();
    em.load_number(5.0);
    em.dict_set_end('=', "c", 2).unwrap();
    em.load_number(1.0);
    em.dict_set_begin("c", 3).unwrap();
    em.load_number(2.0);
    em.dict_set_end('+', "c", 3).unwrap();
    em.ret();
    rt.pool_mut()
        .put("Application", "store", em.end_function().unwrap());

    // peek(c): return c[1];
    let mut em = Emitter::new("Application");
    em.begin_function();
    em.declare_argument("c", 1, 0, 1).unwrap();
    em.load_number(1.0);
    em.dict_get("c", 2).unwrap();
    em.ret();
    rt.pool_mut()
        .put("Application", "peek", em.end_function().unwrap());

    // The compound subscript assignment yields its right-hand side.
    assert_eq!(
        rt.call(ROOT_HANDLE, "store", &[Value::ObjectHandle(cell)])
            .unwrap(),
        Value::Number(2.0)
    );
    // And the container saw get-then-set: 5 + 2.
    assert_eq!(
        rt.call(ROOT_HANDLE, "peek", &[Value::ObjectHandle(cell)])
            .unwrap(),
        Value::Number(7.0)
    );
    assert!(rt.stack().is_empty());
}

#[test]
fn repeated_runs_are_deterministic() {
    let mut rt = Runtime::new("Application");

    let mut em = Emitter::new("Application");
    em.begin_function();
    em.declare_argument("n", 1, 0, 1).unwrap();
    em.read_identifier("n", 2).unwrap();
    em.multiplicative_begin();
    em.read_identifier("n", 2).unwrap();
    em.multiplicative_end('*');
    em.ret();
    rt.pool_mut()
        .put("Application", "square", em.end_function().unwrap());

    let first = rt.call(ROOT_HANDLE, "square", &[Value::Number(9.0)]).unwrap();
    let second = rt.call(ROOT_HANDLE, "square", &[Value::Number(9.0)]).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, Value::Number(81.0));
}
