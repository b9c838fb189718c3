use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rstest::rstest;

use crate::compile::{Punct, Token, Tokenizer};
use crate::dict;
use crate::format;
use crate::mem::{Memory, STACK_CELL_BASE};
use crate::ops::list::{element_count, object_span};
use crate::ops::{decode_opcode, encode_opcode};
use crate::tagged::{x1516, Tag, Word};
use crate::*;

#[derive(Clone, Default)]
struct BufferConsole(Rc<RefCell<String>>);

impl Console for BufferConsole {
    fn emit(&mut self, text: &str) {
        self.0.borrow_mut().push_str(text);
    }
}

fn vm_with_console() -> (Vm, Rc<RefCell<String>>) {
    let mut vm = Vm::new();
    let buffer = Rc::new(RefCell::new(String::new()));
    vm.set_console(Box::new(BufferConsole(buffer.clone())));
    (vm, buffer)
}

fn run_src(source: &str) -> Vm {
    let mut vm = Vm::new();
    execute_program(&mut vm, source).expect("program runs");
    vm
}

fn stack_numbers(vm: &Vm) -> Vec<f32> {
    vm.stack_data().iter().map(|w| w.to_f32()).collect()
}

fn stack_bits(vm: &Vm) -> Vec<u32> {
    vm.stack_data().iter().map(|w| w.bits()).collect()
}

// tagged codec

#[test]
fn tagged_round_trip_exhaustive() {
    for value in i16::MIN..=i16::MAX {
        let word = Word::tagged(Tag::Integer, value as i32).unwrap();
        let info = word.info();
        assert_eq!(info.tag, Tag::Integer);
        assert_eq!(info.value, value as i32);
    }
    let tags = [
        Tag::Code,
        Tag::Sentinel,
        Tag::String,
        Tag::List,
        Tag::Builtin,
        Tag::Ref,
    ];
    for tag in tags {
        for value in 0..=u16::MAX {
            let word = Word::tagged(tag, value as i32).unwrap();
            let info = word.info();
            assert_eq!(info.tag, tag, "tag {tag:?} value {value}");
            assert_eq!(info.value, value as i32);
        }
    }
}

#[test]
fn tagged_payload_range_checked() {
    assert!(Word::tagged(Tag::List, 0x1_0000).is_err());
    assert!(Word::tagged(Tag::List, -1).is_err());
    assert!(Word::tagged(Tag::Integer, 0x8000).is_err());
    assert!(Word::tagged(Tag::Integer, -0x8001).is_err());
    assert!(Word::tagged(Tag::Integer, -0x8000).is_ok());
}

#[test]
fn numbers_are_implicit() {
    for value in [0.0f32, 1.5, -2.25, 1e10, -0.0, f32::INFINITY] {
        let word = Word::number(value);
        assert_eq!(word.tag(), Tag::Number);
        assert_eq!(word.to_f32().to_bits(), value.to_bits());
    }
    // NaN results canonicalise instead of aliasing a tagged word
    let nan = Word::number(f32::NAN);
    assert_eq!(nan.tag(), Tag::Number);
    assert!(nan.to_f32().is_nan());
}

#[test]
fn nil_predicates() {
    assert!(Word::NIL.is_nil());
    assert_eq!(Word::NIL.tag(), Tag::Sentinel);
    assert!(!Word::NIL.is_truthy());
    assert!(Word::list(3).is_list());
    assert!(Word::reference(0x1234).is_ref());
    assert!(Word::code(0x100).is_code());
}

#[test]
fn opcode_two_range_round_trip() {
    for id in 0..=0x7FFFu16 {
        let (bytes, len) = encode_opcode(id).unwrap();
        assert_eq!(len, if id < 0x80 { 1 } else { 2 });
        let (decoded, consumed) = decode_opcode(bytes[0], bytes[1]);
        assert_eq!((decoded, consumed), (id, len));
    }
    assert!(encode_opcode(0x8000).is_err());
}

#[test]
fn x1516_round_trip() {
    let addrs = [0u32, 1, 0x7FFF, 0xFFFF, 0x1_0000, 0x1234_5678, 0x7FFF_FFFF];
    for addr in addrs {
        assert_eq!(x1516::decode(x1516::encode(addr).unwrap()), addr);
    }
    assert!(x1516::encode(0x8000_0000).is_err());
}

// memory image

#[test]
fn memory_round_trips_and_bounds() {
    let mut mem = Memory::new();
    mem.write8(0x10, 0xAB).unwrap();
    assert_eq!(mem.read8(0x10).unwrap(), 0xAB);
    mem.write16(0x20, 0xBEEF).unwrap();
    assert_eq!(mem.read16(0x20).unwrap(), 0xBEEF);
    mem.write_float32(0x30, 1.5).unwrap();
    assert_eq!(mem.read_float32(0x30).unwrap(), 1.5);
    mem.write_cell(STACK_CELL_BASE, Word::number(8.0)).unwrap();
    assert_eq!(mem.read_cell(STACK_CELL_BASE).unwrap().to_f32(), 8.0);
    assert!(matches!(mem.read8(0x1_0000), Err(VmError::Range(_))));
    assert!(matches!(mem.read32(0xFFFE), Err(VmError::Range(_))));
}

#[test]
fn copy_cells_has_memmove_semantics() {
    let mut mem = Memory::new();
    for i in 0..4 {
        mem.write_cell(STACK_CELL_BASE + i, Word::number(i as f32))
            .unwrap();
    }
    // overlapping forward copy
    mem.copy_cells(STACK_CELL_BASE + 1, STACK_CELL_BASE, 3).unwrap();
    let values: Vec<f32> = (0..4)
        .map(|i| mem.read_cell(STACK_CELL_BASE + i).unwrap().to_f32())
        .collect();
    assert_eq!(values, vec![0.0, 0.0, 1.0, 2.0]);
}

// vm state

#[test]
fn stack_primitives_check_bounds() {
    let mut vm = Vm::new();
    assert!(matches!(vm.pop(), Err(VmError::StackUnderflow { .. })));
    vm.push(Word::number(1.0)).unwrap();
    assert_eq!(vm.peek().unwrap().to_f32(), 1.0);
    assert_eq!(vm.pop().unwrap().to_f32(), 1.0);
    for i in 0..crate::mem::STACK_SIZE / crate::mem::CELL {
        vm.push(Word::number(i as f32)).unwrap();
    }
    assert!(matches!(
        vm.push(Word::number(0.0)),
        Err(VmError::StackOverflow { .. })
    ));
}

#[test]
fn return_stack_primitives_check_bounds() {
    let mut vm = Vm::new();
    assert!(matches!(
        vm.rpop(),
        Err(VmError::ReturnStackUnderflow { .. })
    ));
    vm.rpush(Word::int(7)).unwrap();
    assert_eq!(vm.rpop().unwrap().payload(), 7);
}

#[test]
fn invariants_hold_after_every_opcode_in_debug_mode() {
    let mut vm = Vm::new();
    vm.debug = true;
    execute_program(&mut vm, ": square dup mul ; ( 1 2 ( 3 ) ) drop 4 square")
        .unwrap();
    assert_eq!(stack_numbers(&vm), vec![16.0]);
}

// digest and dictionary

#[test]
fn intern_is_idempotent() {
    let mut vm = Vm::new();
    let a = vm.intern("hello").unwrap();
    let b = vm.intern("hello").unwrap();
    let c = vm.intern("world").unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(vm.string(a).unwrap(), "hello");
    assert_eq!(vm.string(c).unwrap(), "world");
}

#[test]
fn dictionary_shadows_by_recency() {
    let mut vm = Vm::new();
    dict::define(&mut vm, "x", Word::number(1.0)).unwrap();
    dict::define(&mut vm, "x", Word::number(2.0)).unwrap();
    assert_eq!(dict::lookup(&vm, "x").unwrap().to_f32(), 2.0);
}

#[test]
fn hidden_entries_are_skipped_but_findable() {
    let mut vm = Vm::new();
    dict::define(&mut vm, "guard", Word::NIL).unwrap();
    dict::hide_head(&mut vm).unwrap();
    assert!(dict::lookup(&vm, "guard").unwrap().is_nil());
    let entry = dict::find_entry_by_name(&vm, "guard").unwrap().unwrap();
    assert!(entry.hidden);
    dict::unhide_head(&mut vm).unwrap();
    let entry = dict::find_entry_by_name(&vm, "guard").unwrap().unwrap();
    assert!(!entry.hidden);
}

#[test]
fn forget_restores_heap_and_head() {
    let mut vm = Vm::new();
    let mark = vm.gp;
    let head = vm.head;
    dict::define(&mut vm, "tmp1", Word::number(1.0)).unwrap();
    dict::define(&mut vm, "tmp2", Word::number(2.0)).unwrap();
    dict::forget(&mut vm, mark as i64).unwrap();
    assert_eq!(vm.gp, mark);
    assert_eq!(vm.head, head);
    assert!(dict::lookup(&vm, "tmp1").unwrap().is_nil());
}

#[test]
fn forget_mark_out_of_range() {
    let mut vm = Vm::new();
    assert!(matches!(
        dict::forget(&mut vm, -1),
        Err(VmError::Domain(message)) if message == "forget mark out of range"
    ));
    let beyond = vm.gp as i64 + 10;
    assert!(matches!(
        dict::forget(&mut vm, beyond),
        Err(VmError::Domain(message))
            if message == "forget mark beyond current heap top"
    ));
}

#[test]
fn redefinition_keeps_both_entries_live() {
    let mut vm = Vm::new();
    execute_program(&mut vm, ": f 1 ;").unwrap();
    let first = resolve_symbol(&vm, "f").unwrap();
    let mark = vm.gp;
    execute_program(&mut vm, ": f 2 ;").unwrap();
    let second = resolve_symbol(&vm, "f").unwrap();
    assert_ne!(first.bits(), second.bits());
    // forgetting the newer definition exposes the older one again
    dict::forget(&mut vm, mark as i64).unwrap();
    assert_eq!(resolve_symbol(&vm, "f").unwrap().bits(), first.bits());
}

// tokenizer

#[test]
fn tokenizer_produces_the_token_stream() {
    let source =
        ": sq dup mul ; // comment to end of line\n3.5 -2 'key \"a\\nb\" &x x[ 1 ]";
    let mut tok = Tokenizer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = tok.next_token().unwrap();
        if token == Token::Eof {
            break;
        }
        tokens.push(token);
    }
    assert_eq!(
        tokens,
        vec![
            Token::Punct(Punct::Colon),
            Token::Word("sq"),
            Token::Word("dup"),
            Token::Word("mul"),
            Token::Punct(Punct::Semicolon),
            Token::Number(3.5),
            Token::Number(-2.0),
            Token::Str("key".into()),
            Token::Str("a\nb".into()),
            Token::RefSigil,
            Token::Word("x"),
            Token::Word("x"),
            Token::Punct(Punct::OpenBracket),
            Token::Number(1.0),
            Token::Punct(Punct::CloseBracket),
        ]
    );
}

#[test]
fn tokenizer_arrows_and_sugar() {
    let mut tok = Tokenizer::new("-> +> ( ) { } -5 +5 .");
    assert_eq!(tok.next_token().unwrap(), Token::Punct(Punct::Arrow));
    assert_eq!(tok.next_token().unwrap(), Token::Punct(Punct::Increment));
    assert_eq!(tok.next_token().unwrap(), Token::Punct(Punct::OpenList));
    assert_eq!(tok.next_token().unwrap(), Token::Punct(Punct::CloseList));
    assert_eq!(tok.next_token().unwrap(), Token::Punct(Punct::OpenBlock));
    assert_eq!(tok.next_token().unwrap(), Token::Punct(Punct::CloseBlock));
    assert_eq!(tok.next_token().unwrap(), Token::Number(-5.0));
    assert_eq!(tok.next_token().unwrap(), Token::Number(5.0));
    assert_eq!(tok.next_token().unwrap(), Token::Word("."));
    assert_eq!(tok.next_token().unwrap(), Token::Eof);
}

#[test]
fn tokenizer_rejects_bad_strings() {
    assert!(matches!(
        Tokenizer::new("\"abc").next_token(),
        Err(VmError::Syntax(_))
    ));
    assert!(matches!(
        Tokenizer::new("\"a\\q\"").next_token(),
        Err(VmError::Syntax(_))
    ));
}

// end-to-end scenarios

#[rstest]
#[case::arithmetic("5 3 add", &[8.0])]
#[case::list_length("( 1 2 3 ) length", &[3.0])]
#[case::definition(": square dup mul ; 3 square", &[9.0])]
#[case::composition(": double 2 mul ; : quad double double ; 5 quad", &[20.0])]
#[case::match_first("10 match dup 9 gt with drop 111 ; drop 222 ;", &[111.0])]
#[case::match_default("2 match dup 9 gt with drop 111 ; drop 222 ;", &[222.0])]
#[case::bracket_update(": f ((1 2)(3 4)) var x 5 -> x[1 1] x[1 1] ; f", &[5.0])]
#[case::recursion(
    ": fact dup 1 le if drop 1 else dup 1 sub recurse mul ; ; 5 fact",
    &[120.0]
)]
#[case::global_read("42 global g g", &[42.0])]
#[case::if_only("1 if 10 ; 0 if 20 ;", &[10.0])]
#[case::block_eval("5 { 2 mul } eval", &[10.0])]
#[case::increment(": bump 10 var n 5 +> n n ; bump", &[15.0])]
#[case::local_simple(": f 7 var a a a add ; f", &[14.0])]
#[case::comparison_chain("1 2 lt 2 2 le 3 2 ge 1 2 gt", &[1.0, 1.0, 1.0, 0.0])]
#[case::division_by_zero_is_ieee("1 0 div 0 5 div", &[f32::INFINITY, 0.0])]
fn scenarios(#[case] source: &str, #[case] expected: &[f32]) {
    let vm = run_src(source);
    assert_eq!(stack_numbers(&vm), expected, "source: {source}");
}

#[rstest]
#[case::neg_abs_sign("5 neg -5 abs -3 sign 0 sign", &[-5.0, 5.0, -1.0, 0.0])]
#[case::min_max("3 7 min 3 7 max", &[3.0, 7.0])]
#[case::modulo("7 3 mod", &[1.0])]
#[case::sqrt_pow("9 sqrt 2 10 pow", &[3.0, 1024.0])]
#[case::floor_recip("2.5 floor 4 recip", &[2.0, 0.25])]
#[case::not_truth("0 not 3 not", &[1.0, 0.0])]
#[case::exp_ln_at_identity("0 exp 1 ln", &[1.0, 0.0])]
#[case::log10_powers("1000 log10", &[3.0])]
#[case::revrot_rotation("1 2 3 revrot", &[3.0, 1.0, 2.0])]
#[case::nop_is_inert("8 nop", &[8.0])]
#[case::eq_on_floats("2 2 eq 2 3 eq", &[1.0, 0.0])]
fn arithmetic_words(#[case] source: &str, #[case] expected: &[f32]) {
    let vm = run_src(source);
    assert_eq!(stack_numbers(&vm), expected, "source: {source}");
}

#[test]
fn string_keys_in_bracket_paths() {
    let vm = run_src(": f ( 'a 1 'b 2 ) var m m[ 'b ] ; f");
    assert_eq!(stack_numbers(&vm), vec![2.0]);
    let vm = run_src(": f ( 'a ( 10 20 ) ) var m m[ 'a 1 ] ; f");
    assert_eq!(stack_numbers(&vm), vec![20.0]);
}

#[test]
fn nested_calls_wind_and_unwind_frames() {
    let mut vm = Vm::new();
    execute_program(
        &mut vm,
        ": inner 2 var k k mul ; : outer 3 var j j mul inner inner ; 5 outer",
    )
    .unwrap();
    // 5 * 3 = 15, then inner doubles twice
    assert_eq!(stack_numbers(&vm), vec![60.0]);
    assert_eq!(vm.rsp, vm.bp);
    assert_eq!(vm.rsp, crate::mem::RSTACK_CELL_BASE);
}

#[test]
fn blocks_validate_their_braces() {
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "{ 1 2"),
        Err(VmError::Syntax(_))
    ));
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "1 }"),
        Err(VmError::Syntax(_))
    ));
}

#[test]
fn arrow_rejects_non_variables() {
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "5 -> add"),
        Err(VmError::Syntax(_))
    ));
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "&nosuch"),
        Err(VmError::Domain(message)) if message == "Unknown word: nosuch"
    ));
}

#[test]
fn compile_only_words_do_not_evaluate() {
    let mut vm = Vm::new();
    push_symbol_ref(&mut vm, "if").unwrap();
    assert!(matches!(
        execute_program(&mut vm, "eval"),
        Err(VmError::Domain(_))
    ));
}

#[test]
fn gpeek_and_gpop_need_a_live_heap_object() {
    // builtin registration owns the low heap, so force an empty heap view
    let mut vm = Vm::new();
    vm.gp = 0;
    assert!(matches!(
        crate::ops::heap::gpeek(&mut vm),
        Err(VmError::Domain(message)) if message == "global heap underflow"
    ));
    assert!(matches!(
        crate::ops::heap::gpop(&mut vm),
        Err(VmError::Domain(message)) if message == "global heap underflow"
    ));
}

#[test]
fn printing_a_local_compound() {
    let (mut vm, out) = vm_with_console();
    execute_program(&mut vm, ": f2 (1 2) var x x . ; f2").unwrap();
    assert_eq!(out.borrow().trim(), "( 1 2 )");
}

#[test]
fn redefinition_shadows_but_old_code_still_runs() {
    let (mut vm, out) = vm_with_console();
    execute_program(&mut vm, ": x 123 . ; x : x x x ; x").unwrap();
    assert_eq!(out.borrow().trim(), "123 123 123");
}

#[test]
fn reverse_is_an_involution() {
    let twice = run_src("( 1 ( 2 3 ) 4 ) reverse reverse");
    let once = run_src("( 1 ( 2 3 ) 4 )");
    assert_eq!(stack_bits(&twice), stack_bits(&once));
    let reversed = run_src("( 1 2 3 ) reverse");
    let expected = run_src("( 3 2 1 )");
    assert_eq!(stack_bits(&reversed), stack_bits(&expected));
}

#[test]
fn address_of_compound_global_is_a_ref() {
    let vm = run_src("(1 2 3) global myList &myList");
    let top = vm.peek().unwrap();
    assert_eq!(top.tag(), Tag::Ref);
}

#[test]
fn global_mutation_and_increment() {
    let vm = run_src("1 global counter 41 -> counter counter");
    assert_eq!(stack_numbers(&vm), vec![41.0]);
    let vm =
        run_src("5 global counter : tick 1 +> counter ; tick tick counter");
    assert_eq!(stack_numbers(&vm), vec![7.0]);
}

#[test]
fn compound_global_reads_materialise() {
    let built = run_src("(1 2) global pair pair");
    let expected = run_src("(1 2)");
    assert_eq!(stack_bits(&built), stack_bits(&expected));
}

// lists

#[test]
fn empty_list_boundaries() {
    assert_eq!(stack_numbers(&run_src("() length")), vec![0.0]);
    let reversed = run_src("() reverse");
    assert_eq!(stack_bits(&reversed), vec![Word::list(0).bits()]);
    let vm = run_src("() 0 elem");
    assert!(vm.peek().unwrap().is_nil());
}

#[test]
fn single_and_negative_element_access() {
    assert_eq!(stack_numbers(&run_src("( 7 ) length")), vec![1.0]);
    let vm = run_src("( 1 2 ) -1 elem");
    assert!(vm.peek().unwrap().is_nil());
    let vm = run_src("( 1 2 ) 5 elem");
    assert!(vm.peek().unwrap().is_nil());
}

#[test]
fn list_literals_nest_with_span_counts() {
    let vm = run_src("( 1 ( 2 3 ) 4 )");
    // slot count includes nested headers: 1 + (2 + 1) + 1
    assert_eq!(vm.peek().unwrap(), Word::list(5));
    assert_eq!(object_span(&vm, vm.sp - 1).unwrap(), 6);
    // but the logical element count walks spans
    assert_eq!(element_count(&vm, vm.sp - 1).unwrap(), 3);
}

#[test]
fn pack_unpack_round_trips() {
    let packed = run_src("1 2 3 3 pack");
    let literal = run_src("( 1 2 3 )");
    assert_eq!(stack_bits(&packed), stack_bits(&literal));

    let spread = run_src("( 1 2 3 ) unpack");
    assert_eq!(stack_numbers(&spread), vec![1.0, 2.0, 3.0, 3.0]);

    let round = run_src("( 1 ( 2 3 ) ) unpack pack");
    let original = run_src("( 1 ( 2 3 ) )");
    assert_eq!(stack_bits(&round), stack_bits(&original));
}

#[test]
fn enlist_wraps_whole_objects() {
    let simple = run_src("5 enlist");
    assert_eq!(
        stack_bits(&simple),
        vec![Word::number(5.0).bits(), Word::list(1).bits()]
    );
    let nested = run_src("( 1 2 ) enlist");
    let expected = run_src("( ( 1 2 ) )");
    assert_eq!(stack_bits(&nested), stack_bits(&expected));
}

#[test]
fn span_aware_stack_shuffles() {
    let swapped = run_src("( 1 2 ) 9 swap");
    let expected = run_src("9 ( 1 2 )");
    assert_eq!(stack_bits(&swapped), stack_bits(&expected));

    let dupped = run_src("( 1 2 ) dup");
    let expected = run_src("( 1 2 ) ( 1 2 )");
    assert_eq!(stack_bits(&dupped), stack_bits(&expected));

    let rotated = run_src("1 ( 2 ) 3 rot");
    let expected = run_src("( 2 ) 3 1");
    assert_eq!(stack_bits(&rotated), stack_bits(&expected));

    let tucked = run_src("1 2 tuck");
    assert_eq!(stack_numbers(&tucked), vec![2.0, 1.0, 2.0]);

    let nipped = run_src("( 1 2 ) 9 nip");
    assert_eq!(stack_numbers(&nipped), vec![9.0]);

    let over = run_src("( 1 ) 2 over");
    let expected = run_src("( 1 ) 2 ( 1 )");
    assert_eq!(stack_bits(&over), stack_bits(&expected));
}

#[test]
fn drop_removes_the_entire_list() {
    let vm = run_src("7 ( 1 2 3 ) drop");
    assert_eq!(stack_numbers(&vm), vec![7.0]);
    let vm = run_src("7 ( 1 2 3 ) drop-list");
    assert_eq!(stack_numbers(&vm), vec![7.0]);
}

#[test]
fn pick_boundaries() {
    let vm = run_src("1 2 3 0 pick");
    assert_eq!(stack_numbers(&vm), vec![1.0, 2.0, 3.0, 3.0]);
    let vm = run_src("1 2 3 2 pick");
    assert_eq!(stack_numbers(&vm), vec![1.0, 2.0, 3.0, 1.0]);
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "1 2 3 5 pick"),
        Err(VmError::StackUnderflow { .. })
    ));
}

#[test]
fn find_walks_association_lists() {
    let vm = run_src(": f ( 'a 1 'b 2 ) var m &m 'b find fetch ; f");
    assert_eq!(stack_numbers(&vm), vec![2.0]);
    let vm = run_src(": f ( 'a 1 'b 2 ) var m &m 'missing find ; f");
    assert!(vm.peek().unwrap().is_nil());
}

#[test]
fn retrieve_and_update_words() {
    let vm = run_src(": f (1 2) var x &x ( 1 ) retrieve ; f");
    assert_eq!(stack_numbers(&vm), vec![2.0]);
    let vm = run_src(": f (1 2) var x 9 &x ( 0 ) update x ; f");
    let expected = run_src("( 9 2 )");
    assert_eq!(stack_bits(&vm), stack_bits(&expected));
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, ": f (1 2) var x 9 &x ( -1 ) update ; f"),
        Err(VmError::Domain(message)) if message == "update target not found"
    ));
}

#[test]
fn bracket_paths_on_globals() {
    let vm = run_src("((1 2)(3 4)) global grid grid[0 1]");
    assert_eq!(stack_numbers(&vm), vec![2.0]);
    let vm = run_src("((1 2)(3 4)) global grid 9 -> grid[1 0] grid[1 0]");
    assert_eq!(stack_numbers(&vm), vec![9.0]);
}

#[test]
fn empty_bracket_path_yields_nil() {
    let vm = run_src(": f (1 2) var x &x () select ; f");
    assert!(vm.peek().unwrap().is_nil());
}

// references and mutation

#[test]
fn fetch_materialises_compound_locals() {
    let built = run_src(": f (1 (2 3)) var x x ; f");
    let expected = run_src("(1 (2 3))");
    assert_eq!(stack_bits(&built), stack_bits(&expected));
}

#[test]
fn store_compatibility_rules() {
    let vm = run_src(": f (1 2) var x (8 9) -> x x ; f");
    let expected = run_src("(8 9)");
    assert_eq!(stack_bits(&vm), stack_bits(&expected));

    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, ": f (1 2) var x (1 2 3) -> x ; f"),
        Err(VmError::Domain(message))
            if message == "Incompatible compound assignment: slot count or type mismatch"
    ));

    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, ": f (1 2) var x 5 -> x ; f"),
        Err(VmError::Domain(message))
            if message == "Cannot assign simple to compound or compound to simple"
    ));
}

#[test]
fn store_requires_a_ref() {
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "5 5 store"),
        Err(VmError::Domain(message)) if message == "store expects REF address"
    ));
}

#[test]
fn eval_applies_code_and_builtins() {
    let vm = run_src("5 3 &add eval");
    assert_eq!(stack_numbers(&vm), vec![8.0]);
    // non-executable values are self-quoting
    let vm = run_src("5 eval");
    assert_eq!(stack_numbers(&vm), vec![5.0]);
    let vm = run_src(": inc 1 add ; 4 &inc eval");
    assert_eq!(stack_numbers(&vm), vec![5.0]);
}

#[test]
fn symbol_resolution_helpers() {
    let mut vm = Vm::new();
    execute_program(&mut vm, ": twice 2 mul ;").unwrap();
    assert_eq!(resolve_symbol(&vm, "twice").unwrap().tag(), Tag::Code);
    assert_eq!(resolve_symbol(&vm, "add").unwrap().tag(), Tag::Builtin);
    assert!(matches!(
        resolve_symbol(&vm, "nope"),
        Err(VmError::Domain(message)) if message == "Symbol not found: nope"
    ));
    vm.push(Word::number(6.0)).unwrap();
    push_symbol_ref(&mut vm, "twice").unwrap();
    execute_program(&mut vm, "eval").unwrap();
    assert_eq!(vm.pop().unwrap().to_f32(), 12.0);
}

// global heap

#[test]
fn gpush_gpop_balance() {
    let mut vm = Vm::new();
    let base = vm.gp;
    execute_program(&mut vm, "1 gpush ( 1 2 ) gpush").unwrap();
    assert_eq!(vm.gp, base + 4);
    execute_program(&mut vm, "gpop").unwrap();
    assert_eq!(vm.gp, base + 1);
    execute_program(&mut vm, "gpop").unwrap();
    assert_eq!(vm.gp, base);
}

#[test]
fn gpeek_refs_the_top_object() {
    let vm = run_src("7 gpush gpeek fetch");
    assert_eq!(stack_numbers(&vm), vec![7.0]);
    let built = run_src("( 1 2 ) gpush gpeek fetch");
    let expected = run_src("( 1 2 )");
    assert_eq!(stack_bits(&built), stack_bits(&expected));
}

#[test]
fn mark_and_sweep_scope_the_heap() {
    let mut vm = Vm::new();
    let base = vm.gp;
    execute_program(&mut vm, "gmark 5 gpush 6 gpush gsweep").unwrap();
    assert_eq!(vm.gp, base);
    execute_program(&mut vm, "mark ( 1 2 3 ) gpush forget").unwrap();
    assert_eq!(vm.gp, base);
}

#[test]
fn forget_drops_definitions_after_the_mark() {
    let mut vm = Vm::new();
    // the definition is entered at compile time, so take the mark first
    execute_program(&mut vm, "gmark").unwrap();
    execute_program(&mut vm, ": late 1 ; late drop gsweep").unwrap();
    assert!(matches!(
        execute_program(&mut vm, "late"),
        Err(VmError::Domain(message)) if message == "Unknown word: late"
    ));
}

// compiler errors

#[test]
fn unknown_word_is_reported() {
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "frobnicate"),
        Err(VmError::Domain(message)) if message == "Unknown word: frobnicate"
    ));
}

#[test]
fn unclosed_constructs_are_syntax_errors() {
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "1 if 2"),
        Err(VmError::Syntax(message)) if message == "Unclosed IF"
    ));
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "1 match 2 with 3"),
        Err(VmError::Syntax(message)) if message == "Unclosed match"
    ));
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "( 1 2"),
        Err(VmError::Syntax(message)) if message == "Unclosed list"
    ));
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, ": f 1"),
        Err(VmError::Syntax(message)) if message == "Unclosed definition"
    ));
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "1 )"),
        Err(VmError::Syntax(_))
    ));
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "else"),
        Err(VmError::Syntax(_))
    ));
    let mut vm = Vm::new();
    assert!(matches!(execute_program(&mut vm, ";"), Err(VmError::Syntax(_))));
}

#[test]
fn failed_compiles_roll_back_cleanly() {
    let mut vm = Vm::new();
    execute_program(&mut vm, "7").unwrap();
    let cp = vm.compiler.cp;
    let head = vm.head;
    assert!(execute_program(&mut vm, ": broken nosuchword ;").is_err());
    assert_eq!(vm.compiler.cp, cp);
    assert_eq!(vm.head, head);
    assert_eq!(stack_numbers(&vm), vec![7.0]);
    // and the session keeps working
    execute_program(&mut vm, "1 add").unwrap();
    assert_eq!(stack_numbers(&vm), vec![8.0]);
}

#[test]
fn underflow_leaves_existing_stack_intact() {
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "5 add"),
        Err(VmError::StackUnderflow { op: "add", .. })
    ));
    assert_eq!(stack_numbers(&vm), vec![5.0]);
}

#[test]
fn var_and_increment_need_a_definition() {
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "1 var x"),
        Err(VmError::Syntax(_))
    ));
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "1 +> x"),
        Err(VmError::Syntax(_))
    ));
}

#[test]
fn bracket_paths_take_only_literals() {
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, ": f (1 2) var x x[ dup ] ; f"),
        Err(VmError::UnexpectedToken { .. })
    ));
}

// include

struct MapHost(HashMap<String, String>);

impl IncludeHost for MapHost {
    fn resolve_include(
        &self,
        target: &str,
        _current: Option<&str>,
    ) -> Option<ResolvedInclude> {
        self.0.get(target).map(|source| ResolvedInclude {
            canonical: format!("/lib/{target}"),
            source: source.clone(),
        })
    }
}

fn vm_with_includes(files: &[(&str, &str)]) -> Vm {
    let mut vm = Vm::new();
    let map = files
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    vm.set_include_host(Box::new(MapHost(map)));
    vm
}

#[test]
fn include_compiles_the_child_in_place() {
    let mut vm = vm_with_includes(&[("lib.tac", ": triple 3 mul ;")]);
    execute_program(&mut vm, "include \"lib.tac\" 4 triple").unwrap();
    assert_eq!(stack_numbers(&vm), vec![12.0]);
}

#[test]
fn include_is_pragma_once() {
    let mut vm = vm_with_includes(&[("lib.tac", "7")]);
    execute_program(&mut vm, "include \"lib.tac\" include \"lib.tac\"")
        .unwrap();
    // the second include is a no-op, the child ran once
    assert_eq!(stack_numbers(&vm), vec![7.0]);
}

#[test]
fn include_failure_is_a_syntax_error() {
    let mut vm = vm_with_includes(&[]);
    assert!(matches!(
        execute_program(&mut vm, "include \"missing.tac\""),
        Err(VmError::Syntax(_))
    ));
    let mut vm = Vm::new();
    assert!(matches!(
        execute_program(&mut vm, "include \"lib.tac\""),
        Err(VmError::Syntax(_))
    ));
}

// formatter

#[test]
fn formats_numbers() {
    assert_eq!(format::format_value(&Vm::new(), Word::number(8.0)), "8");
    assert_eq!(format::format_value(&Vm::new(), Word::number(0.5)), "0.5");
    assert_eq!(format::format_value(&Vm::new(), Word::number(2.00001)), "2");
    assert_eq!(format::format_value(&Vm::new(), Word::number(-3.0)), "-3");
    assert_eq!(
        format::format_value(&Vm::new(), Word::number(f32::INFINITY)),
        "Inf"
    );
}

#[test]
fn formats_values_and_lists() {
    let mut vm = Vm::new();
    execute_program(&mut vm, "( 1 ( 2 3 ) \"hi\" )").unwrap();
    let (text, span) = format::format_tos(&vm).unwrap();
    insta::assert_snapshot!(text, @r#"( 1 ( 2 3 ) "hi" )"#);
    assert_eq!(span, 6);

    let mut vm = Vm::new();
    execute_program(&mut vm, "()").unwrap();
    let (text, _) = format::format_tos(&vm).unwrap();
    insta::assert_snapshot!(text, @"()");

    let vm = Vm::new();
    insta::assert_snapshot!(
        format::format_value(&vm, Word::code(0x120)),
        @"[CODE:288]"
    );
    insta::assert_snapshot!(format::format_value(&vm, Word::NIL), @"NIL");
}

#[test]
fn dot_prints_formatted_values() {
    let (mut vm, out) = vm_with_console();
    execute_program(&mut vm, "1 2 add . ( 4 5 ) .").unwrap();
    assert_eq!(out.borrow().trim(), "3 ( 4 5 )");
    assert_eq!(vm.stack_depth(), 0);
}

#[test]
fn raw_print_dumps_internal_representation() {
    let (mut vm, out) = vm_with_console();
    execute_program(&mut vm, "( 1 2 ) print").unwrap();
    insta::assert_snapshot!(out.borrow().trim(), @"2 1 LIST:2");
}
