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

//! The virtual memory engine gives every task its own address space, which is essential
//! to isolate tasks from each other.
//!
//! All operations work on the *current* address space, read and written through the
//! directory self-reference (see [`x86`]). Kernelspace paging entries are guarded by a
//! global lock ([`KSLOCK`]); userspace entries are guarded by the owning task's page
//! lock. Operations which may touch both always take the kernel lock first.

pub mod x86;

use crate::{
	arch::x86::idt::IntFrame,
	errno,
	errno::EResult,
	int,
	int::CallbackResult,
	memory::{frame, memmap, PhysAddr, VirtAddr, PAGE_BITS, PAGE_SIZE},
	multiboot::BootInfo,
	power, process,
	process::Tid,
	sync::spin::IntSpin,
};
use core::{ptr, sync::atomic::Ordering::Relaxed};
use x86::{
	Entry, ADDR_MASK, ENTRIES_PER_TABLE, FLAG_CACHE_DISABLE, FLAG_GLOBAL, FLAG_PRESENT,
	FLAG_SELF, FLAG_USER, FLAG_WRITE, FLAG_WRITE_THROUGH, OTHER_SLOT, PAGE_FAULT_INSTRUCTION,
	PAGE_FAULT_PRESENT, PAGE_FAULT_RESERVED, PAGE_FAULT_USER, PAGE_FAULT_WRITE, SELF_SLOT,
};

/// Map flag: the region is mapped, without access rights.
pub const MAP_NO_ACCESS: u32 = 1 << 0;
/// Map flag: the region cannot be written.
pub const MAP_READ_ONLY: u32 = 1 << 1;
/// Map flag: the region is accessible from userspace.
pub const MAP_USER_SPACE: u32 = 1 << 2;
/// Map flag: the region holds executable code. 32 bit paging cannot forbid instruction
/// fetches, so the flag has no effect on the entries.
pub const MAP_CODE: u32 = 1 << 3;
/// Map flag: write-through caching.
pub const MAP_WT: u32 = 1 << 4;
/// Map flag: caching is disabled on the region.
pub const MAP_NO_CACHE: u32 = 1 << 5;
/// Map flag: the region may replace existing mappings. Replacement is the default
/// behavior; the flag documents the intent at call sites.
pub const MAP_REMAP: u32 = 1 << 12;

/// Lock for kernelspace paging entries.
static KSLOCK: IntSpin<()> = IntSpin::new(());

/// Translates the portable map flags into x86 paging bits.
fn arch_flags(flags: u32) -> Entry {
	let mut bits = FLAG_PRESENT | FLAG_WRITE | FLAG_GLOBAL;
	if flags & MAP_NO_ACCESS != 0 {
		bits &= !FLAG_PRESENT;
	}
	if flags & MAP_READ_ONLY != 0 {
		bits &= !FLAG_WRITE;
	}
	if flags & MAP_USER_SPACE != 0 {
		bits &= !FLAG_GLOBAL;
		bits |= FLAG_USER;
	}
	if flags & MAP_WT != 0 {
		bits |= FLAG_WRITE_THROUGH;
	}
	if flags & MAP_NO_CACHE != 0 {
		bits |= FLAG_CACHE_DISABLE;
	}
	bits
}

/// Returns the scratch page used to copy page contents between address spaces: the page
/// right below the kernel image.
fn page_tmp() -> VirtAddr {
	VirtAddr(memmap::kernel_begin().down_align_to(PAGE_SIZE).0) - PAGE_SIZE
}

/// Maps `npages` pages of virtual memory starting at `virt` to the contiguous physical
/// memory starting at `phys`.
///
/// `flags` is a combination of the `MAP_*` constants.
///
/// Missing page tables are allocated on the fly; the pre-existing mappings are unchanged
/// for the addresses that have not been written when an allocation fails.
pub fn map_region(virt: VirtAddr, phys: PhysAddr, npages: usize, flags: u32) -> EResult<()> {
	if npages == 0 {
		return Err(errno::EINVAL);
	}
	let bits = arch_flags(flags);
	// Userspace entries belong to the current task; kernelspace entries to everyone
	let tid = process::current_tid();
	let _guard = if bits & FLAG_USER != 0 {
		process::page_lock(tid).lock()
	} else {
		KSLOCK.lock()
	};
	let vpn = x86::vpn(virt);
	// Make sure every covering page table is present
	let first = vpn >> 10;
	let last = (vpn + npages - 1) >> 10;
	for pdi in first..=last {
		let entry = unsafe { x86::read_dir(pdi) };
		if entry & FLAG_PRESENT != 0 {
			continue;
		}
		// There is no table covering the region, create a new empty one
		let Ok(table) = frame::get_page() else {
			return Err(errno::ENOMEM);
		};
		unsafe {
			x86::write_dir(pdi, table.0 as Entry | bits | FLAG_PRESENT);
			// The new table shows up in the self-mapping window, zero it there
			ptr::write_bytes(
				(x86::SELF_TABLES + (pdi << PAGE_BITS)) as *mut u8,
				0,
				PAGE_SIZE,
			);
		}
		if bits & FLAG_USER != 0 {
			process::user_usage(tid).fetch_add(1, Relaxed);
		}
	}
	// Write the leaf entries
	let mut phys = phys.0 as Entry;
	for i in 0..npages {
		unsafe {
			if x86::read_table(vpn + i) & FLAG_PRESENT != 0 {
				// There is already a page mapped at this address, flush its TLB entry
				x86::invlpg(VirtAddr((vpn + i) << PAGE_BITS));
			}
			x86::write_table(vpn + i, phys | bits);
		}
		phys += PAGE_SIZE as Entry;
	}
	Ok(())
}

/// Unmaps `npages` pages of virtual memory starting at `virt`.
///
/// Only the leaf entries are cleared; page tables remain allocated. TLB invalidation of
/// the removed pages is left to the caller, or happens wholesale on the next address
/// space switch.
pub fn unmap_region(virt: VirtAddr, npages: usize) {
	// The region may straddle the kernel/user boundary, take both locks
	let _ks = KSLOCK.lock();
	let _pg = process::page_lock(process::current_tid()).lock();
	let vpn = x86::vpn(virt);
	for i in 0..npages {
		unsafe {
			if x86::read_dir((vpn + i) >> 10) & FLAG_PRESENT == 0 {
				continue;
			}
			x86::write_table(vpn + i, 0);
		}
	}
}

/// Releases every userspace frame of the current address space.
///
/// The walk is post-order: the pages referenced by a table are released before the table
/// itself. The root directory is left to be freed by the caller.
pub fn drop_user() {
	let tid = process::current_tid();
	let _guard = process::page_lock(tid).lock();
	let usage = process::user_usage(tid);
	for pdi in 0..ENTRIES_PER_TABLE {
		let entry = unsafe { x86::read_dir(pdi) };
		if entry & FLAG_PRESENT == 0 || entry & FLAG_SELF != 0 || entry & FLAG_USER == 0 {
			continue;
		}
		for pti in 0..ENTRIES_PER_TABLE {
			let vpn = (pdi << 10) | pti;
			let leaf = unsafe { x86::read_table(vpn) };
			if leaf & FLAG_PRESENT == 0 || leaf & FLAG_SELF != 0 || leaf & FLAG_USER == 0 {
				continue;
			}
			frame::put_page(PhysAddr((leaf & ADDR_MASK) as usize));
			usage.fetch_sub(1, Relaxed);
			unsafe {
				x86::write_table(vpn, 0);
			}
		}
		frame::put_page(PhysAddr((entry & ADDR_MASK) as usize));
		usage.fetch_sub(1, Relaxed);
		unsafe {
			x86::write_dir(pdi, 0);
		}
	}
	x86::flush();
}

/// Clones the current address space into the root directory of the task `dest`.
///
/// Kernelspace tables are shared with the destination; userspace tables and pages get
/// fresh frames, with the page contents copied byte for byte. Self-references are never
/// copied: the destination receives its own, installed in its last directory slot.
pub fn copy_into(dest: Tid) -> EResult<()> {
	let src = process::current_tid();
	let dest_root = process::page_map(dest);
	let _guard = process::page_lock(src).lock();
	// Open the windows onto the destination space
	unsafe {
		x86::write_dir(
			OTHER_SLOT,
			dest_root.0 as Entry | FLAG_PRESENT | FLAG_WRITE | FLAG_SELF,
		);
	}
	let res = copy_tree(dest);
	unsafe {
		if res.is_ok() {
			// Install the destination's own self-reference
			x86::write_other_dir(
				SELF_SLOT,
				dest_root.0 as Entry | FLAG_PRESENT | FLAG_WRITE | FLAG_SELF,
			);
		}
		// Close the windows
		x86::write_dir(OTHER_SLOT, 0);
	}
	x86::flush();
	res
}

/// The pre-order traversal of [`copy_into`], writing the destination through the `other`
/// windows.
fn copy_tree(dest: Tid) -> EResult<()> {
	let usage = process::user_usage(dest);
	let tmp_vpn = x86::vpn(page_tmp());
	for pdi in 0..ENTRIES_PER_TABLE {
		let entry = unsafe { x86::read_dir(pdi) };
		if entry & FLAG_PRESENT == 0 || entry & FLAG_SELF != 0 {
			// Absent, or a self-reference which must not leak into the clone
			unsafe {
				x86::write_other_dir(pdi, 0);
			}
			continue;
		}
		if entry & FLAG_USER == 0 {
			// Kernelspace: share the table with the destination
			unsafe {
				x86::write_other_dir(pdi, entry);
			}
			continue;
		}
		// Userspace: the destination gets its own table, then its own pages
		let Ok(table) = frame::get_page() else {
			return Err(errno::ENOMEM);
		};
		unsafe {
			x86::write_other_dir(pdi, table.0 as Entry | (entry & !ADDR_MASK));
		}
		usage.fetch_add(1, Relaxed);
		for pti in 0..ENTRIES_PER_TABLE {
			let vpn = (pdi << 10) | pti;
			let leaf = unsafe { x86::read_table(vpn) };
			if leaf & FLAG_PRESENT == 0 || leaf & FLAG_SELF != 0 {
				unsafe {
					x86::write_other_table(vpn, 0);
				}
				continue;
			}
			if leaf & FLAG_USER == 0 {
				unsafe {
					x86::write_other_table(vpn, leaf);
				}
				continue;
			}
			let Ok(page) = frame::get_page() else {
				return Err(errno::ENOMEM);
			};
			unsafe {
				x86::write_other_table(vpn, page.0 as Entry | (leaf & !ADDR_MASK));
			}
			usage.fetch_add(1, Relaxed);
			// Copy the page contents through the scratch mapping
			unsafe {
				x86::write_table(tmp_vpn, page.0 as Entry | FLAG_PRESENT | FLAG_WRITE);
				x86::invlpg(page_tmp());
				ptr::copy_nonoverlapping(
					(vpn << PAGE_BITS) as *const u8,
					page_tmp().as_ptr::<u8>(),
					PAGE_SIZE,
				);
			}
		}
	}
	// Retire the scratch mapping
	unsafe {
		x86::write_table(tmp_vpn, 0);
	}
	x86::invlpg(page_tmp());
	Ok(())
}

/// Translates the virtual address `addr` into the corresponding physical address.
///
/// An unmapped address makes the lookup fault.
pub fn virt_to_phys(addr: VirtAddr) -> PhysAddr {
	let entry = unsafe { x86::read_table(x86::vpn(addr)) };
	PhysAddr((entry & ADDR_MASK) as usize | (addr.0 & !(ADDR_MASK as usize)))
}

/// The page fault handler. Recovery is not supported: the fault is logged, then the
/// machine halts.
fn page_fault_handler(_id: u32, code: u32, frame: &mut IntFrame, _ring: u8) -> CallbackResult {
	let addr = x86::fault_addr();
	crate::println!(
		"Page fault at cs:eip = {:02x}:{:08x}, task = {}, addr = {:?}, error = {:#x} [ {} {} {} {} ]",
		frame.cs,
		frame.eip,
		process::current_tid(),
		addr,
		code,
		if code & PAGE_FAULT_USER != 0 {
			"user"
		} else {
			"supervisor"
		},
		if code & PAGE_FAULT_INSTRUCTION != 0 {
			"fetch"
		} else if code & PAGE_FAULT_WRITE != 0 {
			"write"
		} else {
			"read"
		},
		if code & PAGE_FAULT_PRESENT != 0 {
			"protection"
		} else {
			"not present"
		},
		if code & PAGE_FAULT_RESERVED != 0 {
			"reserved bit"
		} else {
			""
		},
	);
	power::halt();
}

/// Initializes virtual memory management.
///
/// The bootstrap identity paging set up at entry is replaced by specific mappings: the
/// kernel image, the Multiboot structures and the boot modules. The remaining bootstrap
/// entries are then removed.
pub(crate) fn init(boot_info: &BootInfo) {
	// Replace the default page fault handler
	int::uninstall_handler(0x0e);
	int::install_handler(0x0e, page_fault_handler).expect("page fault handler installation failed");

	// Map the kernel image
	let kernel_begin = memmap::kernel_begin().down_align_to(PAGE_SIZE);
	let kernel_pages =
		(memmap::kernel_image_end().0 - kernel_begin.0).div_ceil(PAGE_SIZE);
	map_region(VirtAddr(kernel_begin.0), kernel_begin, kernel_pages, 0)
		.expect("cannot map the kernel image");

	// Map the Multiboot information and boot modules
	let tags_begin = boot_info.tags_begin.down_align_to(PAGE_SIZE);
	let tags_pages = (boot_info.tags_begin.0 + boot_info.tags_size - tags_begin.0)
		.div_ceil(PAGE_SIZE);
	map_region(
		VirtAddr(tags_begin.0),
		tags_begin,
		tags_pages,
		MAP_READ_ONLY,
	)
	.expect("cannot map the boot information");
	for module in boot_info.modules.iter().flatten() {
		let begin = module.start.down_align_to(PAGE_SIZE);
		let pages = (module.end.0 - begin.0).div_ceil(PAGE_SIZE);
		map_region(
			VirtAddr(begin.0),
			begin,
			pages,
			MAP_READ_ONLY | MAP_USER_SPACE,
		)
		.expect("cannot map a boot module");
	}

	// Remove the remaining bootstrap identity mappings
	for vpn in 0..ENTRIES_PER_TABLE {
		unsafe {
			if x86::read_table(vpn) & FLAG_SELF != 0 {
				x86::write_table(vpn, 0);
				x86::invlpg(VirtAddr(vpn << PAGE_BITS));
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::memory::KERNEL_SPACE;

	/// A userspace region no other test maps.
	const TEST_BASE: VirtAddr = VirtAddr(KERNEL_SPACE.0 + 0x400000);

	#[test_case]
	fn vmem_translate() {
		let phys = frame::get_pages(4).unwrap();
		map_region(TEST_BASE, phys, 4, MAP_USER_SPACE).unwrap();
		for i in 0..4 {
			assert_eq!(
				virt_to_phys(TEST_BASE + i * PAGE_SIZE),
				phys + i * PAGE_SIZE
			);
		}
		assert_eq!(
			virt_to_phys(TEST_BASE + PAGE_SIZE + 42),
			phys + PAGE_SIZE + 42
		);
		unmap_region(TEST_BASE, 4);
		x86::flush();
		frame::put_pages(phys, 4);
	}

	#[test_case]
	fn vmem_remap() {
		let p1 = frame::get_page().unwrap();
		let p2 = frame::get_page().unwrap();
		map_region(TEST_BASE, p1, 1, MAP_USER_SPACE).unwrap();
		assert_eq!(virt_to_phys(TEST_BASE), p1);
		// Replacing a present mapping must invalidate its TLB entry
		map_region(TEST_BASE, p2, 1, MAP_USER_SPACE | MAP_REMAP).unwrap();
		assert_eq!(virt_to_phys(TEST_BASE), p2);
		unmap_region(TEST_BASE, 1);
		x86::flush();
		frame::put_page(p1);
		frame::put_page(p2);
	}

	#[test_case]
	fn vmem_copy() {
		// Write a known pattern on a user page
		let page = frame::get_page().unwrap();
		map_region(TEST_BASE, page, 1, MAP_USER_SPACE).unwrap();
		unsafe {
			TEST_BASE.as_ptr::<u8>().write_volatile(0xab);
		}
		// Clone the address space into a scratch root directory
		let root = frame::get_page().unwrap();
		let dest = process::test_task_with_root(root);
		copy_into(dest).unwrap();
		// The clone must reference a different frame with equal contents
		let bound = x86::bound();
		unsafe {
			x86::bind(root);
			assert_ne!(virt_to_phys(TEST_BASE), page);
			assert_eq!(TEST_BASE.as_ptr::<u8>().read_volatile(), 0xab);
			TEST_BASE.as_ptr::<u8>().write_volatile(0xcd);
			x86::bind(bound);
		}
		// The original is untouched by the clone's write
		unsafe {
			assert_eq!(TEST_BASE.as_ptr::<u8>().read_volatile(), 0xab);
		}
		// Release the clone: its user frames, then its root
		unsafe {
			x86::bind(root);
		}
		drop_user();
		unsafe {
			x86::bind(bound);
		}
		process::user_usage(dest).store(0, Relaxed);
		frame::put_page(root);
		unmap_region(TEST_BASE, 1);
		x86::flush();
		frame::put_page(page);
	}
}
