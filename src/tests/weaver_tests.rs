use crate::class::class_file::{AccessFlags, ClassFile};
use crate::class::code::{
    CodeAttribute, CodeElement, Insn, Label, OP_ALOAD_0, OP_ALOAD_1, OP_ASTORE_3, OP_GOTO,
    OP_ICONST_0, OP_IFNE, OP_ILOAD_2, OP_INVOKESPECIAL, OP_INVOKESTATIC, OP_ISTORE_2, OP_POP,
    OP_RETURN,
};
use crate::class::constant_pool::ConstantPool;
use crate::tests::fixtures::{activity_class, find_hook, hook_code, opcode_sequence, static_call_count, Hook};
use crate::weaver::{
    weave_class, ATTACH_BASE_CONTEXT, INSTALL, INSTANT_APPS, IS_INSTANT_APP,
    NO_CLASS_DEF_FOUND_ERROR, SPLIT_COMPAT,
};
use std::collections::HashMap;

const CLASS: &str = "com/example/feature/FeatureActivity";
const SUPER: &str = "androidx/appcompat/app/AppCompatActivity";

/// The guarded install sequence as an opcode string: check, store, skip over the
/// handler, handler body, flag test, install, pop.
const INSTALL_SEQUENCE: [u8; 12] = [
    OP_ALOAD_0,
    OP_INVOKESTATIC,
    OP_ISTORE_2,
    OP_GOTO,
    OP_ASTORE_3,
    OP_ICONST_0,
    OP_ISTORE_2,
    OP_ILOAD_2,
    OP_IFNE,
    OP_ALOAD_0,
    OP_INVOKESTATIC,
    OP_POP,
];

fn woven_hook(hook: Hook) -> (ClassFile, CodeAttribute) {
    let bytes = activity_class(CLASS, SUPER, hook);
    let woven = weave_class(&bytes).unwrap();
    hook_code(&woven)
}

#[test]
fn injects_install_after_super_delegation() {
    let (class, code) = woven_hook(Hook::Delegating);

    let mut expected = vec![OP_ALOAD_0, OP_ALOAD_1, OP_INVOKESPECIAL];
    expected.extend(INSTALL_SEQUENCE);
    expected.push(OP_RETURN);
    assert_eq!(opcode_sequence(&code), expected);

    assert_eq!(static_call_count(&class.constant_pool, &code, SPLIT_COMPAT, INSTALL), 1);
    assert_eq!(static_call_count(&class.constant_pool, &code, INSTANT_APPS, IS_INSTANT_APP), 1);

    // Two slots on top of what the original body declared.
    assert_eq!(code.max_locals, 2 + 2);
}

#[test]
fn guard_handler_protects_exactly_the_availability_check() {
    let (class, code) = woven_hook(Hook::Delegating);

    assert_eq!(code.handlers.len(), 1);
    let handler = &code.handlers[0];
    assert_eq!(
        class.constant_pool.class_name_at(handler.catch_type).unwrap(),
        NO_CLASS_DEF_FOUND_ERROR
    );

    let label_at = label_positions(&code);
    let start = label_at[&handler.start];
    let end = label_at[&handler.end];
    assert!(start < end);
    let protected: Vec<u8> = code.elements[start..end]
        .iter()
        .filter_map(|element| match element {
            CodeElement::Insn(Insn::Raw(raw)) => Some(raw[0]),
            CodeElement::Insn(Insn::Invoke { opcode, .. }) => Some(*opcode),
            _ => None,
        })
        .collect();
    assert_eq!(protected, vec![OP_ALOAD_0, OP_INVOKESTATIC, OP_ISTORE_2]);
}

#[test]
fn guard_control_flow() {
    let (class, code) = woven_hook(Hook::Delegating);

    // Check type missing at runtime: exception path forces the flag false, install runs.
    let (installs, checks) = run_hook(&class.constant_pool, &code, CheckBehaviour::Throws);
    assert_eq!((installs, checks), (1, 1));

    // Instant app: flag is true, install must not run.
    let (installs, _) = run_hook(&class.constant_pool, &code, CheckBehaviour::Returns(1));
    assert_eq!(installs, 0);

    // Plain split install.
    let (installs, _) = run_hook(&class.constant_pool, &code, CheckBehaviour::Returns(0));
    assert_eq!(installs, 1);
}

#[test]
fn synthesizes_hook_when_missing() {
    let bytes = activity_class(CLASS, SUPER, Hook::Absent);
    let woven = weave_class(&bytes).unwrap();

    let original = ClassFile::from_bytes(&bytes).unwrap();
    let class = ClassFile::from_bytes(&woven).unwrap();
    assert_eq!(class.methods.len(), original.methods.len() + 1);

    let hook = find_hook(&class).expect("synthesised hook missing");
    assert_eq!(hook.access_flags, AccessFlags::PROTECTED);

    let (class, code) = hook_code(&woven);
    let mut expected = vec![OP_ALOAD_0, OP_ALOAD_1, OP_INVOKESPECIAL];
    expected.extend(INSTALL_SEQUENCE);
    expected.push(OP_RETURN);
    assert_eq!(opcode_sequence(&code), expected);
    assert_eq!(code.max_stack, 2);
    assert_eq!(code.max_locals, 4);

    // The synthesised body delegates to the right superclass method.
    let super_call = code.elements.iter().find_map(|element| match element {
        CodeElement::Insn(Insn::Invoke { opcode: OP_INVOKESPECIAL, method_idx, .. }) => {
            Some(class.constant_pool.method_ref_at(*method_idx).unwrap())
        }
        _ => None,
    });
    assert_eq!(
        super_call,
        Some((SUPER.to_string(), ATTACH_BASE_CONTEXT.to_string(), "(Landroid/content/Context;)V".to_string()))
    );
}

#[test]
fn unrelated_methods_are_untouched() {
    for hook in [Hook::Absent, Hook::Delegating] {
        let bytes = activity_class(CLASS, SUPER, hook);
        let woven = weave_class(&bytes).unwrap();
        let original = ClassFile::from_bytes(&bytes).unwrap();
        let class = ClassFile::from_bytes(&woven).unwrap();

        let find = |c: &ClassFile| {
            c.methods
                .iter()
                .position(|m| m.name(&c.constant_pool).unwrap() == "onCreate")
                .unwrap()
        };
        let before = &original.methods[find(&original)];
        let after = &class.methods[find(&class)];
        assert_eq!(before.attributes, after.attributes);
        assert_eq!(before.access_flags, after.access_flags);
    }
}

#[test]
fn manual_install_call_is_preserved_not_corrected() {
    let (class, code) = woven_hook(Hook::DelegatingWithManualInstall);
    // The author's call stays, the injected one is added: two call-sites.
    assert_eq!(static_call_count(&class.constant_pool, &code, SPLIT_COMPAT, INSTALL), 2);
    // With the flag down both run.
    let (installs, _) = run_hook(&class.constant_pool, &code, CheckBehaviour::Returns(0));
    assert_eq!(installs, 2);
}

#[test]
fn override_without_delegation_is_left_alone() {
    let bytes = activity_class(CLASS, SUPER, Hook::NonDelegating);
    let woven = weave_class(&bytes).unwrap();
    assert_eq!(woven, bytes);
}

#[test]
fn weaving_twice_is_a_no_op() {
    for hook in [Hook::Absent, Hook::Delegating, Hook::DelegatingWithManualInstall] {
        let bytes = activity_class(CLASS, SUPER, hook);
        let woven = weave_class(&bytes).unwrap();
        let rewoven = weave_class(&woven).unwrap();
        assert_eq!(rewoven, woven);
    }
}

#[test]
fn malformed_class_is_an_error() {
    assert!(weave_class(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    let mut truncated = activity_class(CLASS, SUPER, Hook::Delegating);
    truncated.truncate(truncated.len() / 2);
    assert!(weave_class(&truncated).is_err());
}

fn label_positions(code: &CodeAttribute) -> HashMap<Label, usize> {
    code.elements
        .iter()
        .enumerate()
        .filter_map(|(ix, element)| match element {
            CodeElement::Label(label) => Some((*label, ix)),
            _ => None,
        })
        .collect()
}

#[derive(Clone, Copy)]
enum CheckBehaviour {
    /// InstantApps is absent from the class loader: the call site throws.
    Throws,
    Returns(i32),
}

/// Walks the decoded hook body tracking just enough state to observe the guard:
/// slot 2 (the flag), the operand stack as plain ints, branches and the exception
/// edge of the availability check. Returns (install calls, check calls).
fn run_hook(pool: &ConstantPool, code: &CodeAttribute, check: CheckBehaviour) -> (usize, usize) {
    let label_at = label_positions(code);
    let mut stack: Vec<i32> = vec![];
    let mut locals = [0i32; 8];
    let mut installs = 0;
    let mut checks = 0;
    let mut ip = 0usize;
    let mut steps = 0;
    while ip < code.elements.len() {
        steps += 1;
        assert!(steps < 10_000, "hook walk does not terminate");
        match &code.elements[ip] {
            CodeElement::Label(_) => {}
            CodeElement::Insn(Insn::Raw(raw)) => match raw[0] {
                OP_ALOAD_0 | OP_ALOAD_1 | OP_ICONST_0 => stack.push(0),
                OP_ILOAD_2 => stack.push(locals[2]),
                OP_ISTORE_2 => locals[2] = stack.pop().unwrap(),
                OP_ASTORE_3 => locals[3] = stack.pop().unwrap(),
                OP_POP => {
                    stack.pop().unwrap();
                }
                OP_RETURN => return (installs, checks),
                other => panic!("unexpected opcode 0x{other:02x} in hook walk"),
            },
            CodeElement::Insn(Insn::Invoke { opcode, method_idx, .. }) => {
                let (owner, name, _) = pool.method_ref_at(*method_idx).unwrap();
                if *opcode == OP_INVOKESTATIC && owner == INSTANT_APPS && name == IS_INSTANT_APP {
                    checks += 1;
                    stack.pop().unwrap();
                    match check {
                        CheckBehaviour::Throws => {
                            let handler = code
                                .handlers
                                .iter()
                                .find(|h| {
                                    let start = label_at[&h.start];
                                    let end = label_at[&h.end];
                                    start <= ip && ip < end
                                })
                                .expect("availability check is not protected");
                            assert_eq!(
                                pool.class_name_at(handler.catch_type).unwrap(),
                                NO_CLASS_DEF_FOUND_ERROR
                            );
                            stack.clear();
                            stack.push(0); // the thrown error
                            ip = label_at[&handler.handler];
                            continue;
                        }
                        CheckBehaviour::Returns(v) => stack.push(v),
                    }
                } else if *opcode == OP_INVOKESTATIC && owner == SPLIT_COMPAT && name == INSTALL {
                    installs += 1;
                    stack.pop().unwrap();
                    stack.push(1);
                } else if *opcode == OP_INVOKESPECIAL {
                    stack.pop().unwrap();
                    stack.pop().unwrap();
                } else {
                    panic!("unexpected invoke of {owner}.{name} in hook walk");
                }
            }
            CodeElement::Insn(Insn::Branch { opcode, target }) => match *opcode {
                OP_GOTO => {
                    ip = label_at[target];
                    continue;
                }
                OP_IFNE => {
                    if stack.pop().unwrap() != 0 {
                        ip = label_at[target];
                        continue;
                    }
                }
                other => panic!("unexpected branch 0x{other:02x} in hook walk"),
            },
            other => panic!("unexpected element {other:?} in hook walk"),
        }
        ip += 1;
    }
    (installs, checks)
}
