/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of eduOS.
 *
 * eduOS is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * eduOS is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * eduOS. If not, see <https://www.gnu.org/licenses/>.
 */

//! eduOS is a teaching kernel for the x86 architecture, demonstrating preemptive priority
//! scheduling, self-referencing page tables with per-task address spaces, and blocking
//! synchronization primitives built on top of the scheduler.

#![no_std]
#![no_main]
#![feature(allocator_api)]
#![feature(allow_internal_unstable)]
#![feature(custom_test_frameworks)]
#![feature(format_args_nl)]
#![feature(lang_items)]
#![feature(negative_impls)]
#![deny(missing_docs)]
#![allow(clippy::tabs_in_doc_comments)]
#![allow(dead_code)]
#![allow(internal_features)]
#![allow(unsafe_op_in_unsafe_fn)]
#![test_runner(crate::selftest::runner)]
#![reexport_test_harness_main = "kernel_selftest"]

pub mod arch;
mod boot;
pub mod debug;
pub mod device;
pub mod errno;
pub mod int;
pub mod logger;
pub mod memory;
pub mod multiboot;
pub mod panic;
pub mod power;
#[macro_use]
pub mod print;
pub mod process;
pub mod selftest;
pub mod sync;

use crate::arch::x86::{hlt, idt, sti};
use core::ffi::c_void;

/// The kernel's name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
/// Current kernel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// An inner function is required to ensure everything in scope is dropped before idling.
fn kernel_main_inner(magic: u32, multiboot_ptr: *const c_void) {
	// Architecture-specific initialization. Interrupts stay masked until tasking is ready
	idt::init();
	device::serial::init();

	println!("Boot {NAME} version {VERSION}");

	// Read multiboot information
	let boot_info = unsafe { multiboot::read(magic, multiboot_ptr) };

	// Initialize memory management
	println!("Setup memory management");
	memory::memmap::init(boot_info);
	memory::frame::init();
	memory::vmem::init(boot_info);

	// From now on, the kernel considers that memory management has been fully
	// initialized

	println!("Setup multitasking");
	process::init().expect("tasking initialization failed");

	// Perform kernel self-tests
	#[cfg(test)]
	kernel_selftest();
}

/// This is the main function of the Rust source code, responsible for the
/// initialization of the kernel, then idling.
///
/// When calling this function, the CPU must be in Protected Mode with paging enabled and
/// the GDT loaded.
///
/// Arguments:
/// - `magic` is the magic number passed by Multiboot.
/// - `multiboot_ptr` is the pointer to the Multiboot booting information structure.
#[no_mangle]
pub extern "C" fn kernel_main(magic: u32, multiboot_ptr: *const c_void) -> ! {
	kernel_main_inner(magic, multiboot_ptr);
	// The boot context doubles as the idle task: run only when nothing else is ready
	sti();
	loop {
		hlt();
	}
}
