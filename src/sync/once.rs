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

//! Once-initialized objects.
//!
//! Several globals (the boot information, the physical memory map) are produced during
//! the single-threaded stretch of `kernel_main`, before interrupts are unmasked and the
//! scheduler starts, and are read-only afterwards. [`OnceInit`] captures that lifecycle
//! without paying for a lock on every access: initialization is a plain write, reads
//! dereference directly.
//!
//! Debug builds additionally track the initialization state, so that an access before
//! `init` or a second `init` trips an assertion instead of reading garbage.

use core::{cell::UnsafeCell, mem::MaybeUninit, ops::Deref};
#[cfg(debug_assertions)]
use core::sync::atomic::{AtomicBool, Ordering::Relaxed};

/// A value written once during boot, then accessed in read-only.
///
/// The value **must** be initialized with [`OnceInit::init`] before being dereferenced.
pub struct OnceInit<T> {
	/// Tells whether `value` has been written.
	#[cfg(debug_assertions)]
	init: AtomicBool,
	/// The wrapped value.
	value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> OnceInit<T> {
	/// Creates a new instance waiting to be initialized.
	///
	/// # Safety
	///
	/// The value **must** be initialized before being dereferenced.
	pub const unsafe fn new() -> Self {
		Self {
			#[cfg(debug_assertions)]
			init: AtomicBool::new(false),
			value: UnsafeCell::new(MaybeUninit::uninit()),
		}
	}

	/// Initializes with the given value, returning a reference to it.
	///
	/// # Safety
	///
	/// Must be called before the scheduler starts, while the kernel is still
	/// single-threaded. Initializing twice is a bug; debug builds panic on it.
	pub unsafe fn init(this: &Self, val: T) -> &T {
		#[cfg(debug_assertions)]
		assert!(
			!this.init.swap(true, Relaxed),
			"boot-time global initialized twice"
		);
		unsafe {
			let inner = &mut *this.value.get();
			inner.write(val);
			inner.assume_init_ref()
		}
	}
}

impl<T> Deref for OnceInit<T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		#[cfg(debug_assertions)]
		assert!(
			self.init.load(Relaxed),
			"boot-time global accessed before initialization"
		);
		unsafe { (*self.value.get()).assume_init_ref() }
	}
}

// SAFETY: written once during single-threaded boot, read-only afterwards
unsafe impl<T> Sync for OnceInit<T> {}
