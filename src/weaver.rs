//! The bytecode weaving engine.
//!
//! Takes one compiled class and guarantees that its `attachBaseContext` hook calls
//! `SplitCompat.install` exactly once, immediately after delegating to the superclass
//! implementation. If the class does not override the hook, an override is
//! synthesised. All other structure of the class is left untouched.

use crate::class::class_file::{AccessFlags, AttributeInfo, ClassFile, MethodInfo, CODE_ATTRIBUTE};
use crate::class::code::{
    CodeAttribute, CodeElement, ExceptionHandler, Insn, OP_ALOAD_0, OP_ALOAD_1, OP_ASTORE_3,
    OP_GOTO, OP_ICONST_0, OP_IFNE, OP_ILOAD_2, OP_INVOKESPECIAL, OP_INVOKESTATIC, OP_ISTORE_2,
    OP_POP, OP_RETURN,
};
use crate::class::constant_pool::ConstantPool;
use crate::class::error::ClassError;
use crate::types::{to_java_name, MethodDescriptor, MethodRef, TypeDescriptor, WeaveError};
use log::{debug, warn};
use once_cell::sync::Lazy;

pub const ATTACH_BASE_CONTEXT: &str = "attachBaseContext";
pub const ATTACH_BASE_CONTEXT_DESCRIPTOR: &str = "(Landroid/content/Context;)V";
pub const SPLIT_COMPAT: &str = "com/google/android/play/core/splitcompat/SplitCompat";
pub const INSTALL: &str = "install";
pub const INSTALL_DESCRIPTOR: &str = "(Landroid/content/Context;)Z";
pub const INSTANT_APPS: &str = "com/google/android/instantapps/InstantApps";
pub const IS_INSTANT_APP: &str = "isInstantApp";
pub const IS_INSTANT_APP_DESCRIPTOR: &str = "(Landroid/content/Context;)Z";
pub const NO_CLASS_DEF_FOUND_ERROR: &str = "java/lang/NoClassDefFoundError";

/// Local slots added for the install sequence's temporaries: the availability flag
/// in slot 2 and the caught error in slot 3.
const INSTALL_TEMPORARIES: u16 = 2;

static INSTALL_ROUTINE: Lazy<MethodRef> =
    Lazy::new(|| MethodRef::new(SPLIT_COMPAT, INSTALL, INSTALL_DESCRIPTOR));

static INSTANT_APP_CHECK: Lazy<MethodRef> =
    Lazy::new(|| MethodRef::new(INSTANT_APPS, IS_INSTANT_APP, IS_INSTANT_APP_DESCRIPTOR));

/// The hook's descriptor, checked once per process. The whole interception scheme
/// relies on slot 0 holding `this` and slot 1 the single reference parameter, which
/// leaves slots 2..3 free for temporaries once the frame is widened; that only holds
/// for a one-reference-parameter void hook, so the constant is asserted here rather
/// than assumed.
static TARGET_DESCRIPTOR: Lazy<MethodDescriptor> = Lazy::new(|| {
    let descriptor = MethodDescriptor::from_jni(ATTACH_BASE_CONTEXT_DESCRIPTOR)
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(
        descriptor.parameters.len() == 1
            && descriptor.parameters[0].is_reference()
            && descriptor.result == TypeDescriptor::Void,
        "target hook must take exactly one reference parameter and return void"
    );
    descriptor
});

/// Identity of the class being woven, captured once from the class header and
/// read-only for the rest of the invocation.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub internal_name: String,
    pub super_internal_name: Option<String>,
}

impl ClassDescriptor {
    fn of(class: &ClassFile) -> Result<ClassDescriptor, ClassError> {
        Ok(ClassDescriptor {
            internal_name: class.class_name()?.to_string(),
            super_internal_name: class.super_class_name()?.map(str::to_string),
        })
    }
}

/// Per-invocation state: set once an install call-site has been emitted, after which
/// no further interception may fire.
#[derive(Debug, Default)]
struct WeavingState {
    woven: bool,
}

/// Wraps the rebuilt instruction stream of the target method. Every element is
/// forwarded unchanged; the side effects are the diagnostic for pre-existing install
/// calls and the splice of the install sequence right after the call into the
/// superclass implementation of the hook.
struct MethodInterceptor<'a> {
    class: &'a ClassDescriptor,
    state: &'a mut WeavingState,
    pool: &'a mut ConstantPool,
    code: &'a mut CodeAttribute,
}

impl MethodInterceptor<'_> {
    fn element(&mut self, element: CodeElement) -> Result<(), ClassError> {
        let invoke = match &element {
            CodeElement::Insn(Insn::Invoke { opcode, method_idx, .. }) => {
                Some((*opcode, *method_idx))
            }
            _ => None,
        };
        self.code.elements.push(element);
        if let Some((opcode, method_idx)) = invoke {
            let (owner, name, descriptor) = self.pool.method_ref_at(method_idx)?;
            if opcode == OP_INVOKESTATIC && INSTALL_ROUTINE.matches(&owner, &name, &descriptor) {
                warn!(
                    "Unnecessary call to 'SplitCompat#{}' in {}#{}",
                    INSTALL,
                    to_java_name(&self.class.internal_name),
                    ATTACH_BASE_CONTEXT
                );
            }
            if !self.state.woven && self.is_super_delegation(opcode, &owner, &name, &descriptor) {
                emit_install_sequence(self.pool, self.code)?;
                self.state.woven = true;
            }
        }
        Ok(())
    }

    fn is_super_delegation(&self, opcode: u8, owner: &str, name: &str, descriptor: &str) -> bool {
        opcode == OP_INVOKESPECIAL
            && self.class.super_internal_name.as_deref() == Some(owner)
            && name == ATTACH_BASE_CONTEXT
            && descriptor == ATTACH_BASE_CONTEXT_DESCRIPTOR
    }
}

/// Emits the guarded install sequence:
///
/// ```text
/// try { flag = InstantApps.isInstantApp(this) }     // the check may not be on the
/// catch (NoClassDefFoundError e) { flag = false }   // class path at runtime
/// if (flag == 0) { SplitCompat.install(this); }     // result discarded
/// ```
fn emit_install_sequence(pool: &mut ConstantPool, code: &mut CodeAttribute) -> Result<(), ClassError> {
    let check_idx = pool.intern_method_ref(INSTANT_APPS, IS_INSTANT_APP, IS_INSTANT_APP_DESCRIPTOR)?;
    let install_idx = pool.intern_method_ref(SPLIT_COMPAT, INSTALL, INSTALL_DESCRIPTOR)?;
    let catch_idx = pool.intern_class(NO_CLASS_DEF_FOUND_ERROR)?;

    let start = code.new_label();
    let end = code.new_label();
    let handler = code.new_label();
    let test = code.new_label();
    let done = code.new_label();

    // This protected region is the innermost range at the splice point, so its
    // handler must precede any enclosing entries in the table.
    code.handlers.insert(0, ExceptionHandler { start, end, handler, catch_type: catch_idx });

    code.push_label(start);
    code.push_insn(Insn::Raw(vec![OP_ALOAD_0]));
    code.push_insn(Insn::Invoke { opcode: OP_INVOKESTATIC, method_idx: check_idx, count: 0 });
    code.push_insn(Insn::Raw(vec![OP_ISTORE_2]));
    code.push_label(end);
    code.push_insn(Insn::Branch { opcode: OP_GOTO, target: test });
    code.push_label(handler);
    code.push_insn(Insn::Raw(vec![OP_ASTORE_3]));
    code.push_insn(Insn::Raw(vec![OP_ICONST_0]));
    code.push_insn(Insn::Raw(vec![OP_ISTORE_2]));
    code.push_label(test);
    code.push_insn(Insn::Raw(vec![OP_ILOAD_2]));
    code.push_insn(Insn::Branch { opcode: OP_IFNE, target: done });
    code.push_insn(Insn::Raw(vec![OP_ALOAD_0]));
    code.push_insn(Insn::Invoke { opcode: OP_INVOKESTATIC, method_idx: install_idx, count: 0 });
    code.push_insn(Insn::Raw(vec![OP_POP]));
    code.push_label(done);
    Ok(())
}

fn emit_super_delegation(
    pool: &mut ConstantPool,
    code: &mut CodeAttribute,
    super_internal_name: &str,
) -> Result<(), ClassError> {
    let super_idx = pool.intern_method_ref(
        super_internal_name,
        ATTACH_BASE_CONTEXT,
        ATTACH_BASE_CONTEXT_DESCRIPTOR,
    )?;
    code.push_insn(Insn::Raw(vec![OP_ALOAD_0]));
    code.push_insn(Insn::Raw(vec![OP_ALOAD_1]));
    code.push_insn(Insn::Invoke { opcode: OP_INVOKESPECIAL, method_idx: super_idx, count: 0 });
    Ok(())
}

/// True if the method body already contains a call to the availability check. That
/// call only ever comes from a previous weave, so it marks the class as already
/// instrumented; a pre-existing call to the install routine deliberately does not
/// count (it is the author's own and is only warned about).
fn contains_instant_app_check(pool: &ConstantPool, code: &CodeAttribute) -> Result<bool, ClassError> {
    for element in &code.elements {
        if let CodeElement::Insn(Insn::Invoke { opcode, method_idx, .. }) = element {
            if *opcode == OP_INVOKESTATIC {
                let (owner, name, descriptor) = pool.method_ref_at(*method_idx)?;
                if INSTANT_APP_CHECK.matches(&owner, &name, &descriptor) {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// Weaves one class: bytes in, bytes out, no I/O. When the class needs no change
/// (already woven, or its override never delegates to super) the returned buffer
/// equals the input.
pub fn weave_class(bytes: &[u8]) -> Result<Vec<u8>, WeaveError> {
    Lazy::force(&TARGET_DESCRIPTOR);

    let mut class = ClassFile::from_bytes(bytes)?;
    let descriptor = ClassDescriptor::of(&class)?;
    let mut state = WeavingState::default();

    let mut target = None;
    for (ix, method) in class.methods.iter().enumerate() {
        if method.name(&class.constant_pool)? == ATTACH_BASE_CONTEXT
            && method.descriptor(&class.constant_pool)? == ATTACH_BASE_CONTEXT_DESCRIPTOR
        {
            target = Some(ix);
            break;
        }
    }

    match target {
        Some(method_ix) => {
            let code_ix = class.methods[method_ix]
                .attribute_index(&class.constant_pool, CODE_ATTRIBUTE)?
                .ok_or_else(|| {
                    WeaveError::new(&format!(
                        "{}#{} has no Code attribute",
                        to_java_name(&descriptor.internal_name),
                        ATTACH_BASE_CONTEXT
                    ))
                })?;
            let info = class.methods[method_ix].attributes[code_ix].info.clone();
            let mut code = CodeAttribute::decode(&class.constant_pool, &info)?;

            if contains_instant_app_check(&class.constant_pool, &code)? {
                debug!("{} is already woven", to_java_name(&descriptor.internal_name));
                return Ok(bytes.to_vec());
            }

            let original = std::mem::take(&mut code.elements);
            {
                let mut interceptor = MethodInterceptor {
                    class: &descriptor,
                    state: &mut state,
                    pool: &mut class.constant_pool,
                    code: &mut code,
                };
                for element in original {
                    interceptor.element(element)?;
                }
            }

            if !state.woven {
                warn!(
                    "{}#{} never calls the superclass implementation; class left unwoven",
                    to_java_name(&descriptor.internal_name),
                    ATTACH_BASE_CONTEXT
                );
                return Ok(bytes.to_vec());
            }

            code.max_locals += INSTALL_TEMPORARIES;
            let encoded = code.encode(&mut class.constant_pool)?;
            class.methods[method_ix].attributes[code_ix].info = encoded;
        }
        None => {
            let super_internal_name = descriptor.super_internal_name.clone().ok_or_else(|| {
                WeaveError::new(&format!(
                    "cannot weave {}: class has no superclass",
                    to_java_name(&descriptor.internal_name)
                ))
            })?;
            let mut code = CodeAttribute::new(2, 4);
            emit_super_delegation(&mut class.constant_pool, &mut code, &super_internal_name)?;
            emit_install_sequence(&mut class.constant_pool, &mut code)?;
            code.push_insn(Insn::Raw(vec![OP_RETURN]));
            state.woven = true;

            let name_idx = class.constant_pool.intern_utf8(ATTACH_BASE_CONTEXT)?;
            let descriptor_idx = class.constant_pool.intern_utf8(ATTACH_BASE_CONTEXT_DESCRIPTOR)?;
            let code_name_idx = class.constant_pool.intern_utf8(CODE_ATTRIBUTE)?;
            let encoded = code.encode(&mut class.constant_pool)?;
            class.methods.push(MethodInfo {
                access_flags: AccessFlags::PROTECTED,
                name_idx,
                descriptor_idx,
                attributes: vec![AttributeInfo { name_idx: code_name_idx, info: encoded }],
            });
            debug!(
                "synthesised {}#{}",
                to_java_name(&descriptor.internal_name),
                ATTACH_BASE_CONTEXT
            );
        }
    }

    Ok(class.to_bytes())
}
