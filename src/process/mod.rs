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

//! Task management.
//!
//! Tasks live in a fixed table of [`MAX_TASKS`] slots; a task's id is its position in
//! that table. Slot `0` is the idle task, which runs only when no other task is ready.
//!
//! The **Process Control Block** of a task is split in three, by locking domain:
//! - [`Task`]: scheduling state, guarded by the readyqueues lock
//!   (see [`scheduler`])
//! - [`TaskContext`]: the saved stack pointer and page map root, read by the context
//!   switch with interrupts disabled
//! - the page lock and user frame counter, guarded by the task's page lock

pub mod scheduler;
pub mod semaphore;

use crate::{
	arch::x86::pit,
	errno::EResult,
	int,
	int::CallbackResult,
	memory::PhysAddr,
	sync::spin::IntSpin,
};
use core::{
	cell::UnsafeCell,
	ffi::c_void,
	ptr::null_mut,
	sync::atomic::{AtomicI32, AtomicU32, Ordering::Relaxed},
};

/// The maximum number of tasks.
pub const MAX_TASKS: usize = 16;
/// The size of a task's kernel stack in bytes.
pub const KERNEL_STACK_SIZE: usize = 8192;

/// The highest priority a task can have.
pub const MAX_PRIO: u8 = 31;
/// Priority of realtime tasks.
pub const REALTIME_PRIO: u8 = 31;
/// Priority of tasks which should run ahead of normal ones.
pub const HIGH_PRIO: u8 = 16;
/// Default priority of tasks.
pub const NORMAL_PRIO: u8 = 8;
/// Priority of background tasks.
pub const LOW_PRIO: u8 = 1;
/// Priority reserved for the idle task.
pub const IDLE_PRIO: u8 = 0;

/// Type representing a task identifier.
pub type Tid = u32;

/// The entry point of a kernel task.
pub type TaskEntry = extern "C" fn(arg: *mut c_void) -> i32;

/// An enumeration containing possible states for a task.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TaskStatus {
	/// The slot holds no task.
	#[default]
	Invalid,
	/// The task is waiting on a readyqueue to run.
	Ready,
	/// The task is currently running.
	Running,
	/// The task is waiting for an event.
	Blocked,
	/// The task has exited and waits for its slot to be reclaimed.
	Finished,
	/// The task is the idle task.
	Idle,
}

/// The scheduling half of a task's control block.
///
/// Every field is guarded by the readyqueues lock. The ready lists are intrusive:
/// `prev`/`next` are indices into the task table, avoiding aliasing pointers between
/// slots.
pub struct Task {
	/// The task's id, which is its position in the task table.
	pub id: Tid,
	/// The current status of the task.
	pub status: TaskStatus,
	/// The task's priority. `0` is reserved for the idle task.
	pub prio: u8,
	/// The base of the task's kernel stack.
	pub stack: *mut u8,
	/// The previous task in the readyqueue the task is on.
	prev: Option<Tid>,
	/// The next task in the readyqueue the task is on.
	next: Option<Tid>,
}

impl Task {
	const fn new() -> Self {
		Self {
			id: 0,
			status: TaskStatus::Invalid,
			prio: IDLE_PRIO,
			stack: null_mut(),
			prev: None,
			next: None,
		}
	}
}

/// The architecture-visible half of a task's control block.
///
/// The context switch reads the pair with interrupts disabled, after the scheduler has
/// elected the task: first the stack pointer to resume from, then the page map to load
/// into CR3. A null page map means the address space is left unchanged.
#[repr(C)]
pub(crate) struct TaskContext {
	/// Copy of the stack pointer at the last suspension.
	pub sp: usize,
	/// Physical address of the task's root page directory.
	pub cr3: usize,
}

struct Contexts(UnsafeCell<[TaskContext; MAX_TASKS]>);

// SAFETY: slots are written under the readyqueues lock or before the task first runs,
// and read with interrupts disabled during the context switch
unsafe impl Sync for Contexts {}

static CONTEXTS: Contexts = Contexts(UnsafeCell::new(
	[const { TaskContext { sp: 0, cr3: 0 } }; MAX_TASKS],
));

/// The identifier of the currently running task.
///
/// Written only by the scheduler, with interrupts disabled.
static CURRENT: AtomicU32 = AtomicU32::new(0);

/// Per-task lock guarding the task's userspace paging entries.
static PAGE_LOCKS: [IntSpin<()>; MAX_TASKS] = [const { IntSpin::new(()) }; MAX_TASKS];
/// Per-task count of user-owned frames, maintained by the virtual memory engine.
static USER_USAGE: [AtomicI32; MAX_TASKS] = [const { AtomicI32::new(0) }; MAX_TASKS];

/// A kernel stack, page aligned.
#[repr(C, align(4096))]
struct Stack([u8; KERNEL_STACK_SIZE]);

struct StackPool<const N: usize>(UnsafeCell<[Stack; N]>);

// SAFETY: each stack is handed to exactly one task slot
unsafe impl<const N: usize> Sync for StackPool<N> {}

/// The kernel stacks of every task but the idle task, which keeps the boot stack.
static KERNEL_STACKS: StackPool<{ MAX_TASKS - 1 }> =
	StackPool(UnsafeCell::new([const { Stack([0; KERNEL_STACK_SIZE]) }; MAX_TASKS - 1]));
/// The user stacks of user tasks.
static USER_STACKS: StackPool<MAX_TASKS> =
	StackPool(UnsafeCell::new([const { Stack([0; KERNEL_STACK_SIZE]) }; MAX_TASKS]));

/// Returns the identifier of the currently running task.
#[inline]
pub fn current_tid() -> Tid {
	CURRENT.load(Relaxed)
}

/// Returns the kernel stack reserved for the task slot `id`.
///
/// The idle task keeps the boot stack, so the function returns `None` for it, as well as
/// for out of range slots.
pub(crate) fn create_stack(id: Tid) -> Option<*mut u8> {
	if id == 0 || id as usize >= MAX_TASKS {
		return None;
	}
	let stacks = KERNEL_STACKS.0.get() as *mut Stack;
	Some(unsafe { (*stacks.add(id as usize - 1)).0.as_mut_ptr() })
}

/// Returns the user stack reserved for the task slot `id`.
pub(crate) fn user_stack(id: Tid) -> *mut u8 {
	let stacks = USER_STACKS.0.get() as *mut Stack;
	unsafe { (*stacks.add(id as usize)).0.as_mut_ptr() }
}

/// Returns the page lock of the task `id`.
pub fn page_lock(id: Tid) -> &'static IntSpin<()> {
	&PAGE_LOCKS[id as usize]
}

/// Returns the user frame counter of the task `id`.
pub fn user_usage(id: Tid) -> &'static AtomicI32 {
	&USER_USAGE[id as usize]
}

/// Returns the physical address of the root page directory of the task `id`.
pub fn page_map(id: Tid) -> PhysAddr {
	let contexts = CONTEXTS.0.get() as *const TaskContext;
	PhysAddr(unsafe { (*contexts.add(id as usize)).cr3 })
}

/// Sets the saved context of the task `id`.
pub(crate) fn set_task_context(id: Tid, sp: usize, cr3: usize) {
	let contexts = CONTEXTS.0.get() as *mut TaskContext;
	unsafe {
		(*contexts.add(id as usize)).sp = sp;
		(*contexts.add(id as usize)).cr3 = cr3;
	}
}

/// Returns a pointer to the saved stack pointer slot of the task `id`, for the context
/// switch to fill.
pub(crate) fn context_sp_slot(id: Tid) -> *mut *mut usize {
	let contexts = CONTEXTS.0.get() as *mut TaskContext;
	unsafe { &mut (*contexts.add(id as usize)).sp as *mut usize as *mut *mut usize }
}

/// Returns the saved context of the current task, for the context switch.
///
/// Called from assembly, with interrupts disabled.
#[no_mangle]
extern "C" fn sched_current_context() -> *mut TaskContext {
	let contexts = CONTEXTS.0.get() as *mut TaskContext;
	unsafe { contexts.add(current_tid() as usize) }
}

/// The timer tick. Preemption boils down to rescheduling on a regular interval.
fn tick_callback(
	_id: u32,
	_code: u32,
	_frame: &mut crate::arch::x86::idt::IntFrame,
	_ring: u8,
) -> CallbackResult {
	scheduler::reschedule();
	CallbackResult::Continue
}

/// The frequency of the scheduling tick, in hertz.
const TICK_FREQUENCY: u32 = 100;

/// Initializes the tasking system. This function must be called only once, at
/// kernel initialization.
pub(crate) fn init() -> EResult<()> {
	scheduler::multitasking_init()?;
	// Register the tick
	int::install_handler(pit::INTERRUPT_VECTOR, tick_callback)?;
	pit::init();
	pit::set_frequency(TICK_FREQUENCY);
	pit::set_enabled(true);
	Ok(())
}

/// Gives the test suite a task slot owning the given root page directory, without
/// scheduling it.
#[cfg(test)]
pub(crate) fn test_task_with_root(root: PhysAddr) -> Tid {
	let tid = (MAX_TASKS - 1) as Tid;
	set_task_context(tid, 0, root.0);
	user_usage(tid).store(0, Relaxed);
	tid
}
