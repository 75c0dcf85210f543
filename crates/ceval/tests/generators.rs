/// Generators: iteration, `send` and `throw`.
use ceval::{CodeBuilder, CollectStringPrint, CompareOp, Const, EvalObject, ExcType, Interpreter, Opcode};

fn define(b: &mut CodeBuilder, name: &str, body: CodeBuilder) {
    b.load_code(body.build().unwrap()).emit_arg(Opcode::MakeFunction, 0).store_name(name);
}

/// `target = receiver.method(arg?)`
fn call_method(b: &mut CodeBuilder, receiver: &str, method: &str, arg: Option<Const>, target: &str) {
    b.load_name(receiver).load_attr(method);
    match arg {
        Some(arg) => b.load_const(arg).call(1, 0, false, false),
        None => b.call(0, 0, false, false),
    };
    b.store_name(target);
}

/// def acc():
///     total = 0
///     while True:
///         x = yield total
///         total = total + x
fn accumulator() -> CodeBuilder {
    let mut body = CodeBuilder::function("acc", &[]);
    body.generator();
    let top = body.new_label();
    body.load_const(Const::Int(0)).store_fast("total");
    body.bind(top);
    body.load_fast("total").emit(Opcode::YieldValue).store_fast("x");
    body.load_fast("total").load_fast("x").emit(Opcode::BinaryAdd).store_fast("total");
    body.emit_jump(Opcode::JumpAbsolute, top);
    body
}

/// def two():
///     yield 1
///     yield 2
/// total = 0
/// for v in two(): total = total + v
#[test]
fn for_loop_drains_a_generator() {
    let mut body = CodeBuilder::function("two", &[]);
    body.generator();
    body.load_const(Const::Int(1)).emit(Opcode::YieldValue).pop_top();
    body.load_const(Const::Int(2)).emit(Opcode::YieldValue).pop_top();
    body.load_const(Const::None).return_value();

    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "two", body);
    b.load_const(Const::Int(0)).store_name("total");
    let top = b.new_label();
    let cleanup = b.new_label();
    let exit = b.new_label();
    b.emit_jump(Opcode::SetupLoop, exit);
    b.load_name("two").call(0, 0, false, false).emit(Opcode::GetIter);
    b.bind(top);
    b.emit_jump(Opcode::ForIter, cleanup);
    b.store_name("v");
    b.load_name("total").load_name("v").emit(Opcode::BinaryAdd).store_name("total");
    b.emit_jump(Opcode::JumpAbsolute, top);
    b.bind(cleanup);
    b.emit(Opcode::PopBlock);
    b.bind(exit);
    b.load_name("list").load_name("two").call(0, 0, false, false).call(1, 0, false, false);
    b.load_name("total").emit_arg(Opcode::BuildTuple, 2).return_value();

    let mut interp = Interpreter::new();
    assert_eq!(
        interp.run_module(b.build().unwrap()),
        Ok(EvalObject::Tuple(vec![
            EvalObject::List(vec![EvalObject::Int(1), EvalObject::Int(2)]),
            EvalObject::Int(3),
        ]))
    );
}

/// def bad():
///     yield 1
///     raise ValueError("broken")
/// total = 0
/// for v in bad(): total = total + v
#[test]
fn for_loop_propagates_a_failing_generator() {
    let mut body = CodeBuilder::function("bad", &[]);
    body.generator();
    body.load_const(Const::Int(1)).emit(Opcode::YieldValue).pop_top();
    body.load_global("ValueError").load_const(Const::Str("broken".to_owned())).call(1, 0, false, false);
    body.emit_arg(Opcode::RaiseVarargs, 1);

    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "bad", body);
    b.load_const(Const::Int(0)).store_name("total");
    let top = b.new_label();
    let cleanup = b.new_label();
    let exit = b.new_label();
    b.emit_jump(Opcode::SetupLoop, exit);
    b.load_name("bad").call(0, 0, false, false).emit(Opcode::GetIter);
    b.bind(top);
    b.emit_jump(Opcode::ForIter, cleanup);
    b.store_name("v");
    b.load_name("total").load_name("v").emit(Opcode::BinaryAdd).store_name("total");
    b.emit_jump(Opcode::JumpAbsolute, top);
    b.bind(cleanup);
    b.emit(Opcode::PopBlock);
    b.bind(exit);
    b.load_name("total").return_value();
    let code = b.build().unwrap();

    let mut interp = Interpreter::new();
    let err = interp.run_module(code.clone()).unwrap_err();
    let exc = err.exception().expect("a ValueError");
    assert!(exc.is(ExcType::ValueError));
    assert_eq!(exc.message.as_deref(), Some("broken"));
    assert!(!interp.has_active_exception());
    assert_eq!(interp.global("total"), Some(EvalObject::Int(1)));

    let live = interp.live_objects();
    let err = interp.run_module(code).unwrap_err();
    assert!(err.exception().is_some_and(|exc| exc.is(ExcType::ValueError)));
    assert!(!interp.has_active_exception());
    assert_eq!(interp.live_objects(), live);
}

#[test]
fn send_resumes_with_a_value() {
    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "acc", accumulator());
    b.load_name("acc").call(0, 0, false, false).store_name("g");
    call_method(&mut b, "g", "next", None, "a");
    call_method(&mut b, "g", "send", Some(Const::Int(5)), "b");
    call_method(&mut b, "g", "send", Some(Const::Int(3)), "c");
    b.load_const(Const::None).return_value();

    let mut interp = Interpreter::new();
    interp.run_module(b.build().unwrap()).unwrap();
    assert_eq!(interp.global("a"), Some(EvalObject::Int(0)));
    assert_eq!(interp.global("b"), Some(EvalObject::Int(5)));
    assert_eq!(interp.global("c"), Some(EvalObject::Int(8)));
}

#[test]
fn first_send_must_be_none() {
    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "acc", accumulator());
    b.load_name("acc").call(0, 0, false, false).store_name("g");
    call_method(&mut b, "g", "send", Some(Const::Int(1)), "a");
    b.load_const(Const::None).return_value();

    let err = Interpreter::new().run_module(b.build().unwrap()).unwrap_err();
    let exc = err.exception().expect("a TypeError");
    assert!(exc.is(ExcType::TypeError));
    assert_eq!(
        exc.message.as_deref(),
        Some("can't send non-None value to a just-started generator")
    );
}

/// def guarded():
///     try:
///         yield 1
///     finally:
///         print "closing"
/// g = guarded()
/// g.next()
/// try:
///     g.throw(ValueError, "stop")
/// except ValueError:
///     print "caught"
/// g.next()
#[test]
fn throw_runs_finally_and_finishes_the_generator() {
    let mut body = CodeBuilder::function("guarded", &[]);
    body.generator();
    let finally = body.new_label();
    body.emit_jump(Opcode::SetupFinally, finally);
    body.load_const(Const::Int(1)).emit(Opcode::YieldValue).pop_top();
    body.emit(Opcode::PopBlock);
    body.load_const(Const::None);
    body.bind(finally);
    body.load_const(Const::Str("closing".to_owned())).emit(Opcode::PrintItem).emit(Opcode::PrintNewline);
    body.emit(Opcode::EndFinally);
    body.load_const(Const::None).return_value();

    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "guarded", body);
    b.load_name("guarded").call(0, 0, false, false).store_name("g");
    call_method(&mut b, "g", "next", None, "first");
    let handler = b.new_label();
    let no_match = b.new_label();
    let after = b.new_label();
    b.emit_jump(Opcode::SetupExcept, handler);
    b.load_name("g").load_attr("throw");
    b.load_name("ValueError").load_const(Const::Str("stop".to_owned()));
    b.call(2, 0, false, false).pop_top();
    b.emit(Opcode::PopBlock);
    b.emit_jump(Opcode::JumpForward, after);
    b.bind(handler);
    b.emit(Opcode::DupTop);
    b.load_name("ValueError").compare(CompareOp::ExceptionMatch);
    b.emit_jump(Opcode::PopJumpIfFalse, no_match);
    b.pop_top().pop_top().pop_top();
    b.load_const(Const::Str("caught".to_owned())).emit(Opcode::PrintItem).emit(Opcode::PrintNewline);
    b.emit_jump(Opcode::JumpForward, after);
    b.bind(no_match);
    b.emit(Opcode::EndFinally);
    b.bind(after);
    b.load_name("g").load_attr("next").call(0, 0, false, false).return_value();

    let mut interp = Interpreter::with_print_writer(CollectStringPrint::new());
    let err = interp.run_module(b.build().unwrap()).unwrap_err();
    assert_eq!(interp.print_writer().output(), "closing\ncaught\n");
    assert_eq!(interp.global("first"), Some(EvalObject::Int(1)));
    let exc = err.exception().expect("StopIteration");
    assert!(exc.is(ExcType::StopIteration));
    assert!(!interp.has_active_exception());
}

/// A `throw` into a generator that catches it resumes at the next `yield`.
///
/// def resilient():
///     while True:
///         try:
///             yield "ok"
///         except KeyError:
///             yield "recovered"
#[test]
fn throw_can_be_handled_inside_the_generator() {
    let mut body = CodeBuilder::function("resilient", &[]);
    body.generator();
    let top = body.new_label();
    let handler = body.new_label();
    let no_match = body.new_label();
    body.bind(top);
    body.emit_jump(Opcode::SetupExcept, handler);
    body.load_const(Const::Str("ok".to_owned())).emit(Opcode::YieldValue).pop_top();
    body.emit(Opcode::PopBlock);
    body.emit_jump(Opcode::JumpAbsolute, top);
    body.bind(handler);
    body.emit(Opcode::DupTop);
    body.load_global("KeyError").compare(CompareOp::ExceptionMatch);
    body.emit_jump(Opcode::PopJumpIfFalse, no_match);
    body.pop_top().pop_top().pop_top();
    body.load_const(Const::Str("recovered".to_owned())).emit(Opcode::YieldValue).pop_top();
    body.emit_jump(Opcode::JumpAbsolute, top);
    body.bind(no_match);
    body.emit(Opcode::EndFinally);
    body.load_const(Const::None).return_value();

    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "resilient", body);
    b.load_name("resilient").call(0, 0, false, false).store_name("g");
    call_method(&mut b, "g", "next", None, "a");
    b.load_name("g").load_attr("throw").load_name("KeyError").call(1, 0, false, false).store_name("b");
    call_method(&mut b, "g", "next", None, "c");
    b.load_const(Const::None).return_value();

    let mut interp = Interpreter::new();
    interp.run_module(b.build().unwrap()).unwrap();
    assert_eq!(interp.global("a"), Some(EvalObject::String("ok".to_owned())));
    assert_eq!(interp.global("b"), Some(EvalObject::String("recovered".to_owned())));
    assert_eq!(interp.global("c"), Some(EvalObject::String("ok".to_owned())));
}
