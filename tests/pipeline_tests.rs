//! End-to-end pipeline tests: textual IR in, optimised IR or generated
//! code out.

use basalt::codegen;
use basalt::ir::{verify::verify_module, BinaryOp, Module, ValueKind};
use basalt::opt;
use basalt::parser::parse_module;
use basalt::{Context, Format, Target};

fn optimised(src: &str, entry: &str) -> Module {
    let mut module = parse_module(src, "test").expect("parse failed");
    verify_module(&module).expect("input module invalid");
    opt::optimise(&mut module, entry);
    module
}

fn assembly_for(src: &str, entry: &str) -> String {
    let mut module = optimised(src, entry);
    let mut out = Vec::new();
    codegen::emit(&mut module, Target::X86_64Linux, Format::Assembly, &mut out)
        .expect("emission failed");
    String::from_utf8(out).unwrap()
}

#[test]
fn constant_fold_and_dce_leave_single_return() {
    let module = optimised(
        "\
fn @main() -> i64 {
entry:
  %a = mul i64 3, 4
  %b = sub i64 5, 5
  %c = add i64 %a, %b
  return %c
}
",
        "main",
    );
    let f = module.function("main").unwrap();
    // Folding happens in place, so the literal may sit in the block ahead
    // of the return; nothing else survives.
    assert!(f.instruction_count() <= 2);
    let ret = f.terminator(f.entry()).unwrap();
    match &f.value(ret).kind {
        ValueKind::Return { value: Some(v) } => {
            assert_eq!(f.value(*v).kind.as_immediate(), Some(12));
        }
        other => panic!("expected return of 12, got {:?}", other),
    }
}

#[test]
fn mem2reg_eliminates_the_slot() {
    let module = optimised(
        "\
fn @main(i64 %x) -> i64 {
entry:
  %a = alloca i64
  store i64 %x, %a
  %y = load i64, %a
  %r = add i64 %y, 1
  return %r
}
",
        "main",
    );
    let f = module.function("main").unwrap();
    for id in f.value_ids() {
        assert!(
            !matches!(
                f.value(id).kind,
                ValueKind::Alloca { .. } | ValueKind::Load { .. } | ValueKind::Store { .. }
            ),
            "stack traffic survived mem2reg"
        );
    }
    // The add reads the parameter directly.
    let add = f
        .value_ids()
        .find(|v| matches!(f.value(*v).kind, ValueKind::Binary { op: BinaryOp::Add, .. }))
        .expect("add vanished");
    match &f.value(add).kind {
        ValueKind::Binary { lhs, .. } => assert_eq!(*lhs, f.params[0]),
        _ => unreachable!(),
    }
}

#[test]
fn division_by_power_of_two_is_a_shift() {
    let module = optimised(
        "\
fn @main(i64 %x) -> i64 {
entry:
  %q = div i64 %x, 8
  return %q
}
",
        "main",
    );
    let f = module.function("main").unwrap();
    let sar = f
        .value_ids()
        .find(|v| matches!(f.value(*v).kind, ValueKind::Binary { op: BinaryOp::Sar, .. }));
    let sar = sar.expect("no arithmetic shift produced");
    match &f.value(sar).kind {
        ValueKind::Binary { rhs, .. } => {
            assert_eq!(f.value(*rhs).kind.as_immediate(), Some(3));
        }
        _ => unreachable!(),
    }

    let asm = assembly_for(
        "\
fn @main(i64 %x) -> i64 {
entry:
  %q = div i64 %x, 8
  return %q
}
",
        "main",
    );
    assert!(asm.contains("sarq $3"), "assembly lacks sar:\n{}", asm);
}

#[test]
fn recursive_step_becomes_a_tail_call() {
    let module = optimised(
        "\
extern fn @g(i64) -> i64
fn @main(i64 %n) -> i64 {
entry:
  %z = cmp eq i64 %n, 0
  condbranch %z, base, rec
base:
  return 0
rec:
  %m = sub i64 %n, 1
  %r = call i64 @g(%m)
  return %r
}
",
        "main",
    );
    let f = module.function("main").unwrap();
    let call = f
        .value_ids()
        .find(|v| matches!(f.value(*v).kind, ValueKind::Call { .. }))
        .expect("call vanished");
    match &f.value(call).kind {
        ValueKind::Call { tail_call, .. } => assert!(*tail_call, "call not marked tail"),
        _ => unreachable!(),
    }
    // The call's block no longer falls through to a return.
    let block = f.value(call).block.unwrap();
    let term = f.terminator(block).unwrap();
    assert_eq!(f.value(term).kind, ValueKind::Unreachable);
}

#[test]
fn unreferenced_function_is_deleted() {
    let module = optimised(
        "\
fn @a(i64 %x) -> i64 {
entry:
  return %x
}
fn @b(i64 %x) -> i64 {
entry:
  return %x
}
fn @main() -> i64 {
entry:
  %r = call i64 @a(1)
  return %r
}
",
        "main",
    );
    assert!(module.function("main").is_some());
    assert!(module.function("b").is_none(), "unused function survived");
}

#[test]
fn large_return_lowering_on_linux() {
    let src = "\
fn @make(i64 %seed) -> [3 x i64] {
entry:
  %buf = alloca [3 x i64]
  store i64 %seed, %buf
  return %buf
}
";
    let mut module = parse_module(src, "test").unwrap();
    codegen::abi::lower_module(&mut module, Target::X86_64Linux).unwrap();

    let f = module.function("make").unwrap();
    // Hidden pointer first, original parameter shifted to index 1.
    assert_eq!(f.params.len(), 2);
    assert_eq!(f.value(f.params[0]).kind, ValueKind::Parameter(0));
    assert!(f.value(f.params[0]).ty.is_ptr());
    assert_eq!(f.value(f.params[1]).kind, ValueKind::Parameter(1));

    let mut saw_memcpy = false;
    for id in f.value_ids() {
        match &f.value(id).kind {
            ValueKind::Intrinsic { args, .. } => {
                saw_memcpy = true;
                assert_eq!(f.value(args[2]).kind.as_immediate(), Some(24));
            }
            ValueKind::Return { value } => assert!(value.is_none(), "return kept a value"),
            _ => {}
        }
    }
    assert!(saw_memcpy, "no memcpy inserted for the large return");
}

#[test]
fn optimiser_reaches_a_fixed_point() {
    // Re-running the function passes on optimised output changes nothing.
    let mut module = optimised(
        "\
fn @main(i64 %x) -> i64 {
entry:
  %a = alloca i64
  store i64 %x, %a
  %y = load i64, %a
  %m = mul i64 %y, 1
  %s = add i64 %m, 0
  return %s
}
",
        "main",
    );
    let f = module.functions.get_mut("main").unwrap();
    let info = opt::ProgramInfo::collect(&basalt::ir::Module::default());
    use basalt::opt::Transform;
    assert!(!opt::InstCombine.apply(f, &info));
    assert!(!opt::DeadCodeElimination.apply(f, &info));
}

#[test]
fn calls_keep_their_side_effects() {
    let asm = assembly_for(
        "\
extern fn @observe(i64) -> void
fn @main() -> i64 {
entry:
  call @observe(7)
  return 0
}
",
        "main",
    );
    assert!(asm.contains("call observe"), "call elided:\n{}", asm);
    assert!(asm.contains("movq $7, %rdi"), "argument move missing:\n{}", asm);
}

#[test]
fn loops_compile_end_to_end() {
    let asm = assembly_for(
        "\
fn @main(i64 %n) -> i64 {
entry:
  branch loop
loop:
  %i = phi i64 [0, entry], [%next, loop]
  %acc = phi i64 [0, entry], [%sum, loop]
  %sum = add i64 %acc, %i
  %next = add i64 %i, 1
  %done = cmp eq i64 %next, %n
  condbranch %done, exit, loop
exit:
  return %sum
}
",
        "main",
    );
    assert!(asm.contains("main:"));
    assert!(asm.contains("cmpq"));
    // Conditional structure survived to the branch level.
    assert!(asm.contains("je ") || asm.contains("jz "), "no conditional jump:\n{}", asm);
}

#[test]
fn object_emission_produces_elf() {
    let mut module = parse_module(
        "\
global @counter: i64 = 1
fn @main() -> i64 {
entry:
  %v = load i64, @counter
  return %v
}
",
        "test",
    )
    .unwrap();
    opt::optimise(&mut module, "main");
    let mut out = Vec::new();
    codegen::emit(&mut module, Target::X86_64Linux, Format::Object, &mut out).unwrap();
    assert_eq!(&out[..4], b"\x7fELF");
}

#[test]
fn llvm_sink_is_declared_but_unavailable() {
    let mut ctx = Context::new(Target::X86_64Linux);
    ctx.format = Format::LlvmIr;
    let mut module = parse_module(
        "\
fn @main() -> i64 {
entry:
  return 0
}
",
        "test",
    )
    .unwrap();
    let mut out = Vec::new();
    let err = basalt::compile_module(&ctx, &mut module, &mut out).unwrap_err();
    assert!(matches!(err, basalt::BasaltError::Unsupported(_)));
}
