use crate::class::class_file::ClassFile;
use crate::class::code::{
    CodeAttribute, ExceptionHandler, Insn, LineNumber, LocalVariable, OP_GOTO, OP_IFNE, OP_RETURN,
};
use crate::class::constant_pool::ConstantPool;
use crate::tests::fixtures::{activity_class, Hook};
use rand::Rng;

fn reencode(code: &CodeAttribute, pool: &mut ConstantPool) -> (Vec<u8>, Vec<u8>) {
    let first = code.encode(pool).unwrap();
    let decoded = CodeAttribute::decode(pool, &first).unwrap();
    let second = decoded.encode(pool).unwrap();
    (first, second)
}

#[test]
fn class_parse_is_byte_identical() {
    for hook in [Hook::Absent, Hook::Delegating, Hook::DelegatingWithManualInstall] {
        let bytes = activity_class("a/b/Foo", "android/app/Activity", hook);
        let reread = ClassFile::from_bytes(&bytes).unwrap().to_bytes();
        assert_eq!(reread, bytes);
    }
}

#[test]
fn branches_and_try_catch_survive_reencoding() {
    let mut pool = ConstantPool::new();
    let catch_type = pool.intern_class("java/lang/Exception").unwrap();

    let mut code = CodeAttribute::new(2, 3);
    let start = code.new_label();
    let end = code.new_label();
    let handler = code.new_label();
    let back = code.new_label();
    let out = code.new_label();

    code.handlers.push(ExceptionHandler { start, end, handler, catch_type });
    code.push_label(start);
    code.push_label(back);
    code.push_insn(Insn::Raw(vec![0x1c])); // iload_2
    code.push_insn(Insn::Branch { opcode: OP_IFNE, target: back });
    code.push_label(end);
    code.push_insn(Insn::Branch { opcode: OP_GOTO, target: out });
    code.push_label(handler);
    code.push_insn(Insn::Raw(vec![0x57])); // pop
    code.push_label(out);
    code.push_insn(Insn::Raw(vec![OP_RETURN]));

    let (first, second) = reencode(&code, &mut pool);
    assert_eq!(first, second);
}

#[test]
fn switch_padding_survives_reencoding() {
    // One leading nop so both switches land on offsets exercising non-zero padding.
    let mut pool = ConstantPool::new();
    let mut code = CodeAttribute::new(2, 2);
    let case_a = code.new_label();
    let case_b = code.new_label();
    let case_c = code.new_label();
    let fallback = code.new_label();
    let merge = code.new_label();

    code.push_insn(Insn::Raw(vec![0x00])); // nop
    code.push_insn(Insn::Raw(vec![0x03])); // iconst_0
    code.push_insn(Insn::TableSwitch {
        default: fallback,
        low: 0,
        high: 2,
        targets: vec![case_a, case_b, case_c],
    });
    code.push_label(case_a);
    code.push_insn(Insn::Raw(vec![0x03]));
    code.push_insn(Insn::LookupSwitch {
        default: fallback,
        pairs: vec![(-10, case_b), (42, case_c)],
    });
    code.push_label(case_b);
    code.push_insn(Insn::Raw(vec![0x00]));
    code.push_label(case_c);
    code.push_insn(Insn::Raw(vec![0x00]));
    code.push_label(fallback);
    code.push_insn(Insn::Branch { opcode: OP_GOTO, target: merge });
    code.push_label(merge);
    code.push_insn(Insn::Raw(vec![OP_RETURN]));

    let (first, second) = reencode(&code, &mut pool);
    assert_eq!(first, second);
}

#[test]
fn debug_tables_survive_reencoding() {
    let mut pool = ConstantPool::new();
    let name_idx = pool.intern_utf8("this").unwrap();
    let descriptor_idx = pool.intern_utf8("La/b/Foo;").unwrap();

    let mut code = CodeAttribute::new(1, 1);
    let begin = code.new_label();
    let finish = code.new_label();
    code.push_label(begin);
    code.push_insn(Insn::Raw(vec![0x00]));
    code.push_insn(Insn::Raw(vec![OP_RETURN]));
    code.push_label(finish);
    code.line_numbers.push(LineNumber { start: begin, line: 17 });
    code.local_variables.push(LocalVariable {
        start: begin,
        end: finish,
        name_idx,
        descriptor_idx,
        index: 0,
    });

    let (first, second) = reencode(&code, &mut pool);
    assert_eq!(first, second);
}

#[test]
fn random_method_bodies_survive_reencoding() {
    let mut rng = rand::thread_rng();
    for _ in 0..32 {
        let mut pool = ConstantPool::new();
        let mut code = CodeAttribute::new(4, 4);
        let block_count = rng.gen_range(2..8);
        let labels: Vec<_> = (0..block_count).map(|_| code.new_label()).collect();
        for label in &labels {
            code.push_label(*label);
            for _ in 0..rng.gen_range(1..6) {
                match rng.gen_range(0..5) {
                    0 => code.push_insn(Insn::Raw(vec![0x00])),
                    1 => code.push_insn(Insn::Raw(vec![0x10, rng.gen::<u8>()])),
                    2 => code.push_insn(Insn::Raw(vec![0x11, rng.gen::<u8>(), rng.gen::<u8>()])),
                    3 => code.push_insn(Insn::Raw(vec![0x84, 2, rng.gen::<u8>()])),
                    _ => {
                        let target = labels[rng.gen_range(0..labels.len())];
                        code.push_insn(Insn::Branch { opcode: OP_GOTO, target });
                    }
                }
            }
        }
        code.push_insn(Insn::Raw(vec![OP_RETURN]));

        let (first, second) = reencode(&code, &mut pool);
        assert_eq!(first, second);
    }
}
