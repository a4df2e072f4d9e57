//! End-to-end scenarios across module boundaries: disassembly rendering,
//! storage lock round trips, and interrupt slot priority.

use mainframe_core::instruction::{compose_basic, compose_extended};
use mainframe_core::{
    interpret, AbsoluteAddress, ExecutionEngine, Interrupt, InterruptClass, MainStorage,
    StorageLocks,
};
use std::sync::Arc;

#[test]
fn basic_mode_store_renders_with_index() {
    let iw = compose_basic(0o01, 0o00, 0o01, 0o01, 0, 0, 0o123);
    let (text, found) = interpret(iw, true, false);
    assert!(found);
    assert_eq!(text, "SA,W      A1,0123,X1");
}

#[test]
fn extended_mode_load_renders_partial_word_and_base() {
    let iw = compose_extended(0o10, 0o02, 0o03, 0o04, 1, 0o05, 0o6012);
    let (text, found) = interpret(iw, false, true);
    assert!(found);
    assert_eq!(text, "LA,H1     A3,06012,*X4,B5");
}

#[test]
fn storage_lock_round_trip() {
    let locks = StorageLocks::new();
    let address = 0o1234_000017;

    assert!(locks.lock(address, 1));
    assert!(!locks.lock(address, 2));
    assert!(locks.release(address, 1));
    assert!(locks.lock(address, 2));
    assert_eq!(locks.held_count(), 1);

    locks.release_all(2);
    assert_eq!(locks.held_count(), 0);
}

#[test]
fn lower_interrupt_class_displaces_and_holds_the_slot() {
    let storage = Arc::new(MainStorage::new(4));
    let locks = StorageLocks::new();
    let mut engine = ExecutionEngine::new(1, storage, locks);

    engine.post_interrupt(Interrupt::ArithmeticException { short_status: 0 });
    assert_eq!(
        engine.pending_interrupt().map(Interrupt::class),
        Some(InterruptClass::ArithmeticException)
    );

    engine.post_interrupt(Interrupt::HardwareCheck {
        address: AbsoluteAddress::new(0, 0),
    });
    assert_eq!(
        engine.pending_interrupt().map(Interrupt::class),
        Some(InterruptClass::HardwareCheck)
    );

    engine.post_interrupt(Interrupt::ArithmeticException { short_status: 0 });
    assert_eq!(
        engine.pending_interrupt().map(Interrupt::class),
        Some(InterruptClass::HardwareCheck)
    );
}
