use ceval::{Code, CodeBuilder, CompareOp, Const, EvalObject, Interpreter, NoPrint, Opcode};
use criterion::{Bencher, Criterion, black_box, criterion_group, criterion_main};

/// Runs `code` once to check the result, then benchmarks repeated execution
/// on one interpreter.
fn run_code(bench: &mut Bencher, code: &Code, expected: i64) {
    let mut interp = Interpreter::with_print_writer(NoPrint);
    let result = interp.run_module(code.clone()).unwrap();
    assert_eq!(result, EvalObject::Int(expected));

    bench.iter(|| {
        let result = interp.run_module(black_box(code.clone())).unwrap();
        black_box(result);
    });
}

/// 1 + 2
fn add_two() -> Code {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Const::Int(1)).load_const(Const::Int(2)).emit(Opcode::BinaryAdd).return_value();
    b.build().unwrap()
}

/// total = 0
/// for i in range(n): total = total + i
/// total
fn loop_sum(n: i64) -> Code {
    let mut b = CodeBuilder::new("<module>");
    let top = b.new_label();
    let cleanup = b.new_label();
    let exit = b.new_label();
    b.load_const(Const::Int(0)).store_name("total");
    b.emit_jump(Opcode::SetupLoop, exit);
    b.load_name("range").load_const(Const::Int(n)).call(1, 0, false, false).emit(Opcode::GetIter);
    b.bind(top);
    b.emit_jump(Opcode::ForIter, cleanup);
    b.store_name("i");
    b.load_name("total").load_name("i").emit(Opcode::BinaryAdd).store_name("total");
    b.emit_jump(Opcode::JumpAbsolute, top);
    b.bind(cleanup);
    b.emit(Opcode::PopBlock);
    b.bind(exit);
    b.load_name("total").return_value();
    b.build().unwrap()
}

/// a = []
/// for i in range(n): a.append(i)
/// len(a)
fn list_append(n: i64) -> Code {
    let mut b = CodeBuilder::new("<module>");
    let top = b.new_label();
    let cleanup = b.new_label();
    let exit = b.new_label();
    b.emit_arg(Opcode::BuildList, 0).store_name("a");
    b.emit_jump(Opcode::SetupLoop, exit);
    b.load_name("range").load_const(Const::Int(n)).call(1, 0, false, false).emit(Opcode::GetIter);
    b.bind(top);
    b.emit_jump(Opcode::ForIter, cleanup);
    b.store_name("i");
    b.load_name("a").load_attr("append").load_name("i").call(1, 0, false, false).pop_top();
    b.emit_jump(Opcode::JumpAbsolute, top);
    b.bind(cleanup);
    b.emit(Opcode::PopBlock);
    b.bind(exit);
    b.load_name("len").load_name("a").call(1, 0, false, false).return_value();
    b.build().unwrap()
}

/// def fib(n):
///     if n <= 1: return n
///     return fib(n - 1) + fib(n - 2)
/// fib(n)
fn fib(n: i64) -> Code {
    let mut body = CodeBuilder::function("fib", &["n"]);
    let recurse = body.new_label();
    body.load_fast("n").load_const(Const::Int(1)).compare(CompareOp::Le);
    body.emit_jump(Opcode::PopJumpIfFalse, recurse);
    body.load_fast("n").return_value();
    body.bind(recurse);
    body.load_global("fib").load_fast("n").load_const(Const::Int(1)).emit(Opcode::BinarySubtract);
    body.call(1, 0, false, false);
    body.load_global("fib").load_fast("n").load_const(Const::Int(2)).emit(Opcode::BinarySubtract);
    body.call(1, 0, false, false);
    body.emit(Opcode::BinaryAdd).return_value();

    let mut b = CodeBuilder::new("<module>");
    b.load_code(body.build().unwrap()).emit_arg(Opcode::MakeFunction, 0).store_name("fib");
    b.load_name("fib").load_const(Const::Int(n)).call(1, 0, false, false).return_value();
    b.build().unwrap()
}

/// def add(a, b=2): return a + b
/// add(a=1)
fn call_kwargs() -> Code {
    let mut body = CodeBuilder::function("add", &["a", "b"]);
    body.load_fast("a").load_fast("b").emit(Opcode::BinaryAdd).return_value();
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Const::Int(2));
    b.load_code(body.build().unwrap()).emit_arg(Opcode::MakeFunction, 1).store_name("add");
    b.load_name("add").load_const(Const::Str("a".to_owned())).load_const(Const::Int(1));
    b.call(0, 1, false, false).return_value();
    b.build().unwrap()
}

/// Bytecode serialization, since hosts may cache code objects as bytes.
fn code_round_trip(bench: &mut Bencher) {
    let code = fib(20);
    bench.iter(|| {
        let bytes = black_box(&code).to_bytes().unwrap();
        black_box(Code::from_bytes(&bytes).unwrap());
    });
}

fn criterion_benchmark(c: &mut Criterion) {
    let add_two = add_two();
    c.bench_function("add_two", |b| run_code(b, &add_two, 3));

    let loop_sum = loop_sum(1_000);
    c.bench_function("loop_sum", |b| run_code(b, &loop_sum, 499_500));

    let list_append = list_append(10_000);
    c.bench_function("list_append", |b| run_code(b, &list_append, 10_000));

    let fib = fib(20);
    c.bench_function("fib", |b| run_code(b, &fib, 6765));

    let call_kwargs = call_kwargs();
    c.bench_function("call_kwargs", |b| run_code(b, &call_kwargs, 3));

    c.bench_function("code_round_trip", code_round_trip);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
