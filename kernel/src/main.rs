#![no_std]
#![no_main]

use aurora_kernel::boot;
use aurora_kernel::console;
use aurora_kernel::handle;
use aurora_kernel::mm::map::Map;
use aurora_kernel::mm::{phys, vm_manager};

#[cfg(target_arch = "x86_64")]
use aurora_kernel::arch::x86_64::{gdt, idt};

use stivale_boot::v2::{StivaleHeader, StivaleStruct};

/// 16 KiB boot stack, handed to the loader via the Stivale2 header below.
#[repr(align(16))]
struct Stack([u8; 16 * 1024]);
static STACK: Stack = Stack([0; 16 * 1024]);

#[used]
#[link_section = ".stivale2hdr"]
static STIVALE_HDR: StivaleHeader =
    StivaleHeader::new().stack(unsafe { STACK.0.as_ptr().add(STACK.0.len()) as *mut u8 });

fn kernel_main(stivale: &'static StivaleStruct) -> ! {
    let info = boot::extract(stivale);
    let (sink, min_level) = boot::configure_console(&info.command_line);
    console::configure(sink, min_level);
    console::install();

    log::info!("aurora kernel starting");

    #[cfg(target_arch = "x86_64")]
    {
        gdt::init();
        idt::init();
    }

    // SAFETY: called exactly once, before any other subsystem allocates.
    unsafe { aurora_kernel::mm::heap::init() };

    phys::init(aurora_kernel::mm::PAGE_SIZE, [Some(9), None, None, None]);
    let _kernel_map = Map::new(None);
    vm_manager::init(phys::allocator().default_pool());
    handle::manager::init();

    log::info!("aurora kernel initialized");

    loop {
        #[cfg(target_arch = "x86_64")]
        aurora_kernel::arch::x86_64::idle();
        #[cfg(not(target_arch = "x86_64"))]
        core::hint::spin_loop();
    }
}

#[no_mangle]
extern "C" fn _start(stivale: &'static StivaleStruct) -> ! {
    kernel_main(stivale)
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    console::panic(format_args!("{info}"))
}
