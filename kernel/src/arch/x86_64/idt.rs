//! Interrupt Descriptor Table. The architectural entry point into
//! `exception::dispatch` (spec §4.7): every handler here constructs a
//! generic `ExceptionType` and a `ProcessorState` and hands off to the
//! platform-independent dispatcher.

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::arch::x86_64::context::ProcessorState;
use crate::exception::{self, ExceptionType};
use crate::mm::map::Map;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.overflow.set_handler_fn(overflow_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.alignment_check.set_handler_fn(alignment_check_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(crate::arch::x86_64::gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt
    };
}

pub fn init() {
    IDT.load();
}

/// There is no per-CPU task subsystem in this core (spec §1 non-goals), so
/// the "current map" is always the kernel map until one is built. A real
/// implementation would consult the running task's address space instead.
fn current_map() -> Map {
    Map::kernel_map().expect("exception taken before kernel map exists")
}

fn state_from_frame(frame: &InterruptStackFrame) -> ProcessorState {
    ProcessorState::from_frame(frame.instruction_pointer.as_u64(), frame.stack_pointer.as_u64())
}

extern "x86-interrupt" fn divide_error_handler(frame: InterruptStackFrame) {
    exception::dispatch(ExceptionType::DivideError, &current_map(), &state_from_frame(&frame), 0);
}

extern "x86-interrupt" fn overflow_handler(frame: InterruptStackFrame) {
    exception::dispatch(ExceptionType::Overflow, &current_map(), &state_from_frame(&frame), 0);
}

extern "x86-interrupt" fn invalid_opcode_handler(frame: InterruptStackFrame) {
    exception::dispatch(ExceptionType::InvalidOpcode, &current_map(), &state_from_frame(&frame), 0);
}

extern "x86-interrupt" fn general_protection_fault_handler(
    frame: InterruptStackFrame,
    error_code: u64,
) {
    exception::dispatch(
        ExceptionType::ProtectionFault,
        &current_map(),
        &state_from_frame(&frame),
        error_code,
    );
}

extern "x86-interrupt" fn page_fault_handler(
    frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;
    let fault_addr = Cr2::read().map(|a| a.as_u64()).unwrap_or(0);
    let _ = error_code;
    exception::dispatch(
        ExceptionType::PageFault,
        &current_map(),
        &state_from_frame(&frame),
        fault_addr,
    );
}

extern "x86-interrupt" fn alignment_check_handler(frame: InterruptStackFrame, error_code: u64) {
    exception::dispatch(
        ExceptionType::AlignmentCheck,
        &current_map(),
        &state_from_frame(&frame),
        error_code,
    );
}

extern "x86-interrupt" fn breakpoint_handler(frame: InterruptStackFrame) {
    exception::dispatch(ExceptionType::Breakpoint, &current_map(), &state_from_frame(&frame), 0);
}

extern "x86-interrupt" fn double_fault_handler(
    frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    let state = state_from_frame(&frame);
    exception::abort_with_exception(
        ExceptionType::ProtectionFault,
        &state,
        frame.instruction_pointer.as_u64(),
    );
}
