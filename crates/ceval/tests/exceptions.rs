/// Uncaught exceptions, string exceptions, interrupts, resource limits and
/// trace hooks.
use std::{cell::RefCell, rc::Rc, time::Duration};

use ceval::{
    CodeBuilder, CompareOp, Const, EvalError, EvalObject, ExcType, HookError, Interpreter, LimitedTracker, NoPrint,
    Opcode, ResourceLimits, TraceEvent, WarningPolicy,
};

fn define(b: &mut CodeBuilder, name: &str, body: CodeBuilder) {
    b.load_code(body.build().unwrap()).emit_arg(Opcode::MakeFunction, 0).store_name(name);
}

/// `try: <body> except <name>: return <caught>` around whatever `body` emits.
fn catching(name: &str, caught: Const, body: impl FnOnce(&mut CodeBuilder)) -> CodeBuilder {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    let no_match = b.new_label();
    b.emit_jump(Opcode::SetupExcept, handler);
    body(&mut b);
    b.emit(Opcode::PopBlock);
    b.load_const(Const::None).return_value();
    b.bind(handler);
    b.emit(Opcode::DupTop);
    b.load_name(name).compare(CompareOp::ExceptionMatch);
    b.emit_jump(Opcode::PopJumpIfFalse, no_match);
    b.pop_top().pop_top().pop_top();
    b.load_const(caught).return_value();
    b.bind(no_match);
    b.emit(Opcode::EndFinally);
    b.load_const(Const::None).return_value();
    b
}

/// def g(): raise ValueError("bad")
/// def f(): return g()
/// f()
#[test]
fn uncaught_exception_carries_a_traceback() {
    let mut g = CodeBuilder::function("g", &[]);
    g.load_global("ValueError").load_const(Const::Str("bad".to_owned())).call(1, 0, false, false);
    g.emit_arg(Opcode::RaiseVarargs, 1);
    let mut f = CodeBuilder::function("f", &[]);
    f.load_global("g").call(0, 0, false, false).return_value();

    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "g", g);
    define(&mut b, "f", f);
    b.load_name("f").call(0, 0, false, false).return_value();

    let mut interp = Interpreter::new();
    let before = interp.live_objects();
    let err = interp.run_module(b.build().unwrap()).unwrap_err();
    assert!(matches!(err, EvalError::Exception(_)), "expected an exception, got {err:?}");
    let exc = err.exception().expect("checked above");
    assert_eq!(exc.exc_type, "ValueError");
    assert_eq!(exc.message.as_deref(), Some("bad"));
    let names: Vec<&str> = exc.traceback.iter().map(|frame| frame.name.as_str()).collect();
    assert_eq!(names, ["<module>", "f", "g"]);
    assert!(exc.to_string().ends_with("ValueError: bad"));
    assert!(!interp.has_active_exception());
    // `f`, `g` and their keys
    assert_eq!(interp.live_objects(), before + 4);
}

#[test]
fn string_exceptions_match_by_value() {
    let b = catching("tag", Const::Int(1), |b| {
        b.load_const(Const::Str("oops".to_owned())).store_name("tag");
        b.load_const(Const::Str("oops".to_owned()));
        b.emit_arg(Opcode::RaiseVarargs, 1);
    });
    let mut interp = Interpreter::new();
    interp.set_warning_policy(WarningPolicy::Ignore);
    assert_eq!(interp.run_module(b.build().unwrap()), Ok(EvalObject::Int(1)));

    let mut b = CodeBuilder::new("<module>");
    b.load_const(Const::Str("oops".to_owned())).emit_arg(Opcode::RaiseVarargs, 1);
    let err = interp.run_module(b.build().unwrap()).unwrap_err();
    let exc = err.exception().expect("a string exception");
    assert_eq!(exc.exc_type, "oops");
    assert_eq!(exc.builtin_type(), None);
}

#[test]
fn string_exceptions_can_be_made_errors() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Const::Str("oops".to_owned())).emit_arg(Opcode::RaiseVarargs, 1);
    let mut interp = Interpreter::new();
    interp.set_warning_policy(WarningPolicy::Error);
    let err = interp.run_module(b.build().unwrap()).unwrap_err();
    let exc = err.exception().expect("a DeprecationWarning");
    assert!(exc.is(ExcType::DeprecationWarning));
    assert_eq!(exc.message.as_deref(), Some("raising a string exception is deprecated"));
}

/// class Oops: pass
/// try: raise Oops
/// except Oops: return "handled"
#[test]
fn user_class_exceptions() {
    let mut body = CodeBuilder::class_body("Oops");
    body.emit(Opcode::LoadLocals).return_value();

    let mut b = catching("Oops", Const::Str("handled".to_owned()), |b| {
        b.load_name("Oops").emit_arg(Opcode::RaiseVarargs, 1);
    });
    let mut setup = CodeBuilder::new("<module>");
    setup.load_const(Const::Str("Oops".to_owned())).emit_arg(Opcode::BuildTuple, 0);
    setup.load_code(body.build().unwrap()).emit_arg(Opcode::MakeFunction, 0);
    setup.call(0, 0, false, false).emit(Opcode::BuildClass).store_name("Oops");
    setup.load_const(Const::None).return_value();

    let mut interp = Interpreter::new();
    interp.run_module(setup.build().unwrap()).unwrap();
    assert_eq!(
        interp.run_module(b.build().unwrap()),
        Ok(EvalObject::String("handled".to_owned()))
    );

    b = CodeBuilder::new("<module>");
    b.load_name("Oops").emit_arg(Opcode::RaiseVarargs, 1);
    let err = interp.run_module(b.build().unwrap()).unwrap_err();
    assert_eq!(err.exception().map(|exc| exc.exc_type.as_str()), Some("Oops"));
}

/// class E(ValueError): pass
fn define_value_error_subclass(interp: &mut Interpreter) {
    let mut body = CodeBuilder::class_body("E");
    body.emit(Opcode::LoadLocals).return_value();
    let mut setup = CodeBuilder::new("<module>");
    setup.load_const(Const::Str("E".to_owned()));
    setup.load_name("ValueError").emit_arg(Opcode::BuildTuple, 1);
    setup.load_code(body.build().unwrap()).emit_arg(Opcode::MakeFunction, 0);
    setup.call(0, 0, false, false).emit(Opcode::BuildClass).store_name("E");
    setup.load_const(Const::None).return_value();
    interp.run_module(setup.build().unwrap()).unwrap();
}

#[test]
fn user_classes_can_derive_from_builtin_exceptions() {
    let mut interp = Interpreter::new();
    define_value_error_subclass(&mut interp);

    let b = catching("Exception", Const::Str("caught".to_owned()), |b| {
        b.load_name("E").emit_arg(Opcode::RaiseVarargs, 1);
    });
    assert_eq!(
        interp.run_module(b.build().unwrap()),
        Ok(EvalObject::String("caught".to_owned()))
    );

    let b = catching("ValueError", Const::Str("caught".to_owned()), |b| {
        b.load_name("E").load_const(Const::Str("bad".to_owned())).call(1, 0, false, false);
        b.emit_arg(Opcode::RaiseVarargs, 1);
    });
    assert_eq!(
        interp.run_module(b.build().unwrap()),
        Ok(EvalObject::String("caught".to_owned()))
    );

    // isinstance(E(), StandardError)
    let mut b = CodeBuilder::new("<module>");
    b.load_name("isinstance").load_name("E").call(0, 0, false, false).load_name("StandardError");
    b.call(2, 0, false, false).return_value();
    assert_eq!(interp.run_module(b.build().unwrap()), Ok(EvalObject::Bool(true)));
    assert!(!interp.has_active_exception());
}

#[test]
fn derived_exceptions_report_their_own_name_and_args() {
    let mut interp = Interpreter::new();
    define_value_error_subclass(&mut interp);

    // raise E, "bad" is not caught by an unrelated handler
    let b = catching("KeyError", Const::None, |b| {
        b.load_name("E").load_const(Const::Str("bad".to_owned())).emit_arg(Opcode::RaiseVarargs, 2);
    });
    let err = interp.run_module(b.build().unwrap()).unwrap_err();
    let exc = err.exception().expect("an E");
    assert_eq!(exc.exc_type, "E");
    assert_eq!(exc.message.as_deref(), Some("bad"));

    let mut b = CodeBuilder::new("<module>");
    b.load_name("E").load_const(Const::Int(1));
    b.load_const(Const::Str("code".to_owned())).load_const(Const::Int(2));
    b.call(1, 1, false, false).emit_arg(Opcode::RaiseVarargs, 1);
    let err = interp.run_module(b.build().unwrap()).unwrap_err();
    let exc = err.exception().expect("a TypeError");
    assert!(exc.is(ExcType::TypeError));
    assert_eq!(exc.message.as_deref(), Some("this constructor takes no arguments"));
}

#[test]
fn reraise_keeps_the_original_exception() {
    // try: {}[1]
    // except KeyError: raise
    let mut b = CodeBuilder::new("<module>");
    let handler = b.new_label();
    b.emit_jump(Opcode::SetupExcept, handler);
    b.emit_arg(Opcode::BuildMap, 0).load_const(Const::Int(1)).emit(Opcode::BinarySubscr);
    b.emit(Opcode::PopBlock);
    b.load_const(Const::None).return_value();
    b.bind(handler);
    b.pop_top().pop_top().pop_top();
    b.emit_arg(Opcode::RaiseVarargs, 0);

    let mut interp = Interpreter::new();
    let err = interp.run_module(b.build().unwrap()).unwrap_err();
    let exc = err.exception().expect("a KeyError");
    assert!(exc.is(ExcType::KeyError));
    assert_eq!(exc.message.as_deref(), Some("1"));
    assert!(!interp.has_active_exception());
}

#[test]
fn interrupt_raises_keyboard_interrupt() {
    let mut interp = Interpreter::new();
    let handle = interp.interrupt_handle();
    interp.set_trace_hook(move |event: &TraceEvent<'_>| {
        if matches!(event, TraceEvent::NativeCall { name: "len" }) {
            handle.interrupt();
        }
        Ok(())
    });
    let b = catching("KeyboardInterrupt", Const::Str("interrupted".to_owned()), |b| {
        b.load_name("len").emit_arg(Opcode::BuildList, 0).call(1, 0, false, false).pop_top();
        b.load_const(Const::None).pop_top();
    });
    assert_eq!(
        interp.run_module(b.build().unwrap()),
        Ok(EvalObject::String("interrupted".to_owned()))
    );
    assert!(!interp.interrupt_handle().is_pending());
}

#[test]
fn trace_hook_sees_native_calls_and_exceptions() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&events);
    let mut interp = Interpreter::new();
    interp.set_trace_hook(move |event: &TraceEvent<'_>| {
        let line = match event {
            TraceEvent::Exception { function, exc_type, .. } => format!("exception {exc_type} in {function}"),
            TraceEvent::NativeCall { name } => format!("call {name}"),
            TraceEvent::NativeReturn { name } => format!("return {name}"),
            TraceEvent::NativeException { name } => format!("raise {name}"),
        };
        seen.borrow_mut().push(line);
        Ok(())
    });

    let mut b = CodeBuilder::new("<module>");
    b.load_name("abs").load_const(Const::Int(-2)).call(1, 0, false, false).pop_top();
    b.load_name("len").load_const(Const::Int(5)).call(1, 0, false, false).return_value();
    let err = interp.run_module(b.build().unwrap()).unwrap_err();
    assert_eq!(
        err.exception().and_then(|exc| exc.message.clone()).as_deref(),
        Some("object of type 'int' has no len()")
    );
    assert_eq!(
        *events.borrow(),
        [
            "call abs",
            "return abs",
            "call len",
            "raise len",
            "exception TypeError in <module>",
        ]
    );

    interp.clear_trace_hook();
    let mut b = CodeBuilder::new("<module>");
    b.load_name("abs").load_const(Const::Int(-2)).call(1, 0, false, false).return_value();
    assert_eq!(interp.run_module(b.build().unwrap()), Ok(EvalObject::Int(2)));
    assert_eq!(events.borrow().len(), 5);
}

#[test]
fn failing_trace_hook_does_not_stop_execution() {
    let mut interp = Interpreter::new();
    interp.set_trace_hook(|_: &TraceEvent<'_>| Err(HookError("unavailable".to_owned())));
    let mut b = CodeBuilder::new("<module>");
    b.load_name("abs").load_const(Const::Int(-7)).call(1, 0, false, false).return_value();
    assert_eq!(interp.run_module(b.build().unwrap()), Ok(EvalObject::Int(7)));
}

/// def r(): return r()
#[test]
fn recursion_limit_raises_runtime_error() {
    let limits = ResourceLimits::new().max_recursion_depth(Some(50));
    let mut interp = Interpreter::with_tracker(LimitedTracker::new(limits), NoPrint).unwrap();
    let mut body = CodeBuilder::function("r", &[]);
    body.load_global("r").call(0, 0, false, false).return_value();
    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "r", body);
    b.load_name("r").call(0, 0, false, false).return_value();

    let err = interp.run_module(b.build().unwrap()).unwrap_err();
    let exc = err.exception().expect("a RuntimeError");
    assert!(exc.is(ExcType::RuntimeError));
    assert_eq!(exc.message.as_deref(), Some("maximum recursion depth exceeded"));
    assert_eq!(exc.traceback.first().map(|frame| frame.name.as_str()), Some("<module>"));
    assert_eq!(exc.traceback.last().map(|frame| frame.name.as_str()), Some("r"));
    assert!(exc.traceback.len() <= 50);

    // the interpreter is still usable afterwards
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Const::Int(1)).return_value();
    assert_eq!(interp.run_module(b.build().unwrap()), Ok(EvalObject::Int(1)));
}

#[test]
fn time_limit_stops_an_endless_loop() {
    let limits = ResourceLimits::new().max_duration(Duration::from_millis(50));
    let mut interp = Interpreter::with_tracker(LimitedTracker::new(limits), NoPrint).unwrap();
    let mut b = CodeBuilder::new("<module>");
    let top = b.new_label();
    b.bind(top);
    b.emit_jump(Opcode::JumpAbsolute, top);

    let err = interp.run_module(b.build().unwrap()).unwrap_err();
    let exc = err.exception().expect("a TimeoutError");
    assert!(exc.is(ExcType::TimeoutError));
}

#[test]
fn allocation_limit_raises_memory_error() {
    let limits = ResourceLimits::new().max_allocations(10_000);
    let mut interp = Interpreter::with_tracker(LimitedTracker::new(limits), NoPrint).unwrap();
    let mut b = CodeBuilder::new("<module>");
    let top = b.new_label();
    b.bind(top);
    b.emit_arg(Opcode::BuildList, 0).pop_top();
    b.emit_jump(Opcode::JumpAbsolute, top);

    let err = interp.run_module(b.build().unwrap()).unwrap_err();
    let exc = err.exception().expect("a MemoryError");
    assert!(exc.is(ExcType::MemoryError));
}
