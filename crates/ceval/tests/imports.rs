/// `import` against modules registered by the host.
use ceval::{CodeBuilder, Const, EvalObject, ExcType, Interpreter, Opcode};

fn interpreter() -> Interpreter {
    let mut interp = Interpreter::new();
    interp
        .register_module(
            "shapes",
            [
                ("sides", EvalObject::Int(4)),
                ("label", EvalObject::String("square".to_owned())),
                ("_hidden", EvalObject::Bool(true)),
            ],
        )
        .unwrap();
    interp
}

/// Pushes the level and fromlist operands and emits `IMPORT_NAME`.
fn import(b: &mut CodeBuilder, module: &str, fromlist: Const) {
    b.load_const(Const::Int(-1)).load_const(fromlist).import_name(module);
}

fn names(items: &[&str]) -> Const {
    Const::Tuple(items.iter().map(|item| Const::Str((*item).to_owned())).collect())
}

/// import shapes
/// return shapes.sides
#[test]
fn import_binds_the_module() {
    let mut b = CodeBuilder::new("<module>");
    import(&mut b, "shapes", Const::None);
    b.store_name("shapes");
    b.load_name("shapes").load_attr("sides").return_value();
    let mut interp = interpreter();
    assert_eq!(interp.run_module(b.build().unwrap()), Ok(EvalObject::Int(4)));
    assert_eq!(interp.global("shapes"), Some(EvalObject::Repr("<module 'shapes'>".to_owned())));
}

/// from shapes import sides as n, label
#[test]
fn from_import_binds_attributes() {
    let mut b = CodeBuilder::new("<module>");
    import(&mut b, "shapes", names(&["sides", "label"]));
    b.import_from("sides").store_name("n");
    b.import_from("label").store_name("label");
    b.pop_top();
    b.load_name("n").load_name("label").emit_arg(Opcode::BuildTuple, 2).return_value();
    assert_eq!(
        interpreter().run_module(b.build().unwrap()),
        Ok(EvalObject::Tuple(vec![
            EvalObject::Int(4),
            EvalObject::String("square".to_owned())
        ]))
    );
}

/// from shapes import *
#[test]
fn star_import_skips_private_names() {
    let mut b = CodeBuilder::new("<module>");
    import(&mut b, "shapes", names(&["*"]));
    b.emit(Opcode::ImportStar);
    b.load_const(Const::None).return_value();
    let mut interp = interpreter();
    interp.run_module(b.build().unwrap()).unwrap();
    assert_eq!(interp.global("sides"), Some(EvalObject::Int(4)));
    assert_eq!(interp.global("label"), Some(EvalObject::String("square".to_owned())));
    assert_eq!(interp.global("_hidden"), None);
}

#[test]
fn star_import_honours_all() {
    let mut interp = Interpreter::new();
    interp
        .register_module(
            "limited",
            [
                ("a", EvalObject::Int(1)),
                ("b", EvalObject::Int(2)),
                ("__all__", EvalObject::List(vec![EvalObject::String("b".to_owned())])),
            ],
        )
        .unwrap();
    let mut b = CodeBuilder::new("<module>");
    import(&mut b, "limited", names(&["*"]));
    b.emit(Opcode::ImportStar);
    b.load_const(Const::None).return_value();
    interp.run_module(b.build().unwrap()).unwrap();
    assert_eq!(interp.global("a"), None);
    assert_eq!(interp.global("b"), Some(EvalObject::Int(2)));
}

#[test]
fn missing_module_and_missing_name() {
    let mut b = CodeBuilder::new("<module>");
    import(&mut b, "nowhere", Const::None);
    b.return_value();
    let err = interpreter().run_module(b.build().unwrap()).unwrap_err();
    let exc = err.exception().expect("an ImportError");
    assert!(exc.is(ExcType::ImportError));
    assert_eq!(exc.message.as_deref(), Some("No module named nowhere"));

    let mut b = CodeBuilder::new("<module>");
    import(&mut b, "shapes", names(&["circle"]));
    b.import_from("circle").return_value();
    let err = interpreter().run_module(b.build().unwrap()).unwrap_err();
    let exc = err.exception().expect("an ImportError");
    assert!(exc.is(ExcType::ImportError));
    assert_eq!(exc.message.as_deref(), Some("cannot import name circle"));
}

#[test]
fn registering_again_replaces_the_module() {
    let mut interp = interpreter();
    let before = interp.live_objects();
    interp.register_module("shapes", [("sides", EvalObject::Int(3))]).unwrap();
    // the old module held three keys and the "square" string
    assert_eq!(interp.live_objects(), before - 3);

    let mut b = CodeBuilder::new("<module>");
    import(&mut b, "shapes", Const::None);
    b.load_attr("sides").return_value();
    assert_eq!(interp.run_module(b.build().unwrap()), Ok(EvalObject::Int(3)));
}
