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

//! The preemptive priority scheduler.
//!
//! Runnable tasks wait on one FIFO readyqueue per priority; a bitmap with one bit per
//! priority makes finding the highest non-empty queue a single instruction. Within a
//! priority, tasks run round-robin: a preempted task goes back to the tail of its
//! queue, a task of strictly higher priority preempts on the next reschedule.
//!
//! The running task is never kept on a queue. It is removed when elected and re-inserted
//! by [`finish_task_switch`], the first code to run on every newly resumed task, so that
//! the hand-off happens atomically with respect to the context switch.

use super::{
	context_sp_slot, create_stack, current_tid, page_map, set_task_context, user_stack,
	user_usage, Task, TaskEntry, TaskStatus, Tid, CURRENT, IDLE_PRIO, MAX_PRIO, MAX_TASKS,
	NORMAL_PRIO,
};
use crate::{
	arch::x86::{cli, is_interrupt_enabled, sti, task::{create_default_frame, switch_context}},
	errno,
	errno::EResult,
	memory::{frame, vmem},
	sync::spin::IntSpin,
};
use core::{ffi::c_void, ptr::null_mut, sync::atomic::Ordering::Relaxed};

extern "C" {
	/// The boot stack, set up at entry and kept by the idle task.
	static boot_stack: u8;
}

/// A FIFO list of tasks, linked through the `prev`/`next` indices of the task table.
struct TaskList {
	first: Option<Tid>,
	last: Option<Tid>,
}

impl TaskList {
	const fn new() -> Self {
		Self {
			first: None,
			last: None,
		}
	}
}

/// The state of the scheduler: the task table and the readyqueues.
///
/// Everything in here is guarded by a single interrupt-saving spinlock, which is the
/// innermost lock of the kernel.
pub(crate) struct ReadyQueues {
	/// The task table. A task's id is its position in this table.
	tasks: [Task; MAX_TASKS],
	/// The task preempted by the last context switch, to be re-enqueued (or reclaimed)
	/// by [`finish_task_switch`].
	old_task: Option<Tid>,
	/// The total number of runnable tasks.
	nr_tasks: u32,
	/// Bit `p` is set if and only if the queue of priority `p` is non-empty.
	prio_bitmap: u32,
	/// One FIFO queue per priority. The queue of priority `p` is at index `p - 1`: the
	/// idle task is never enqueued, so priority `0` needs no slot.
	queue: [TaskList; MAX_PRIO as usize],
}

impl ReadyQueues {
	/// Appends the task `tid` at the tail of the queue of its priority and sets the
	/// priority's bit.
	fn enqueue(&mut self, tid: Tid) {
		let prio = self.tasks[tid as usize].prio;
		debug_assert_ne!(prio, IDLE_PRIO);
		let list = &mut self.queue[prio as usize - 1];
		self.tasks[tid as usize].next = None;
		self.tasks[tid as usize].prev = list.last;
		match list.last {
			Some(last) => self.tasks[last as usize].next = Some(tid),
			None => list.first = Some(tid),
		}
		list.last = Some(tid);
		self.prio_bitmap |= 1 << prio;
	}

	/// Removes and returns the head of the queue of priority `prio`, clearing the
	/// priority's bit if the queue becomes empty.
	fn dequeue_head(&mut self, prio: u32) -> Tid {
		let list = &mut self.queue[prio as usize - 1];
		let tid = list.first.expect("empty queue with priority bit set");
		list.first = self.tasks[tid as usize].next;
		match list.first {
			Some(next) => self.tasks[next as usize].prev = None,
			None => {
				list.last = None;
				self.prio_bitmap &= !(1 << prio);
			}
		}
		self.tasks[tid as usize].next = None;
		self.tasks[tid as usize].prev = None;
		tid
	}
}

/// The scheduler's state.
static READYQUEUES: IntSpin<ReadyQueues> = IntSpin::new(ReadyQueues {
	tasks: [const { Task::new() }; MAX_TASKS],
	old_task: None,
	nr_tasks: 0,
	prio_bitmap: 0,
	queue: [const { TaskList::new() }; MAX_PRIO as usize],
});

/// Returns the index of the most significant bit set in `v`.
#[inline]
fn msb(v: u32) -> Option<u32> {
	(v != 0).then(|| u32::BITS - 1 - v.leading_zeros())
}

/// Returns the highest priority any runnable task currently has.
pub fn get_highest_priority() -> u8 {
	msb(READYQUEUES.lock().prio_bitmap).unwrap_or(0) as u8
}

/// Returns the number of runnable tasks.
pub fn nr_tasks() -> u32 {
	READYQUEUES.lock().nr_tasks
}

/// Seeds the task table with the idle task, which owns the boot stack and the bootstrap
/// address space.
///
/// This function must be called only once, before any other scheduling operation.
pub(super) fn multitasking_init() -> EResult<()> {
	let mut rq = READYQUEUES.lock();
	let idle = &mut rq.tasks[0];
	if idle.status != TaskStatus::Invalid {
		return Err(errno::ENOMEM);
	}
	idle.id = 0;
	idle.status = TaskStatus::Idle;
	idle.prio = IDLE_PRIO;
	idle.stack = unsafe { &boot_stack as *const _ as *mut u8 };
	drop(rq);
	set_task_context(0, 0, vmem::x86::bound().0);
	CURRENT.store(0, Relaxed);
	Ok(())
}

/// Creates a task with the given entry point address.
///
/// See [`create_kernel_task`] for the meaning of the arguments; `user` selects the
/// privilege level of the initial frame.
fn create_task(
	id: Option<&mut Tid>,
	ep: usize,
	arg: *mut c_void,
	prio: u8,
	user: bool,
) -> EResult<()> {
	if prio == IDLE_PRIO || prio > MAX_PRIO {
		return Err(errno::EINVAL);
	}
	// Claim a free slot
	let tid = {
		let mut rq = READYQUEUES.lock();
		let Some(tid) = rq
			.tasks
			.iter()
			.position(|t| t.status == TaskStatus::Invalid)
		else {
			return Err(errno::ENOMEM);
		};
		let task = &mut rq.tasks[tid];
		task.id = tid as Tid;
		task.status = TaskStatus::Ready;
		task.prio = prio;
		task.stack = create_stack(tid as Tid).unwrap_or(null_mut());
		tid as Tid
	};
	// Give the task its own address space, cloned from the current one. Page locks must
	// not be taken under the readyqueues lock
	let res = (|| {
		let root = frame::get_page().map_err(|_| errno::ENOMEM)?;
		set_task_context(tid, 0, root.0);
		user_usage(tid).store(0, Relaxed);
		if let Err(e) = vmem::copy_into(tid) {
			frame::put_page(root);
			return Err(e);
		}
		Ok(())
	})();
	if let Err(e) = res {
		READYQUEUES.lock().tasks[tid as usize].status = TaskStatus::Invalid;
		return Err(e);
	}
	// Craft the initial frame and publish the task
	{
		let mut rq = READYQUEUES.lock();
		let task = &mut rq.tasks[tid as usize];
		let (ustack, leave): (_, unsafe extern "C" fn() -> !) = if user {
			(Some(user_stack(tid)), leave_user_task)
		} else {
			(None, leave_kernel_task)
		};
		let sp = create_default_frame(task.stack, ustack, ep, arg, leave)?;
		let cr3 = page_map(tid).0;
		set_task_context(tid, sp as usize, cr3);
		rq.enqueue(tid);
		rq.nr_tasks += 1;
	}
	if let Some(id) = id {
		*id = tid;
	}
	Ok(())
}

/// Creates a task running in kernelspace.
///
/// Arguments:
/// - `id` optionally receives the id of the new task.
/// - `ep` is the function the task starts in.
/// - `arg` is the argument passed to `ep`.
/// - `prio` is the priority of the new task. An out of range priority falls back to
///   [`NORMAL_PRIO`].
pub fn create_kernel_task(
	id: Option<&mut Tid>,
	ep: TaskEntry,
	arg: *mut c_void,
	mut prio: u8,
) -> EResult<()> {
	if prio > MAX_PRIO {
		prio = NORMAL_PRIO;
	}
	create_task(id, ep as usize, arg, prio, false)
}

/// Creates a task entering userspace at the virtual address `ep`.
///
/// The entry point must be mapped user-accessible in the current address space, for
/// example inside a boot module; loading a program is the loader's concern, not the
/// scheduler's.
pub fn create_user_task(
	id: Option<&mut Tid>,
	ep: usize,
	arg: *mut c_void,
	prio: u8,
) -> EResult<()> {
	create_task(id, ep, arg, prio, true)
}

/// Terminates the current task with the given return value and schedules away from it,
/// never to return.
///
/// The task's userspace memory is released here; its kernel stack and root directory are
/// reclaimed by [`finish_task_switch`] once another task runs.
pub fn do_exit(code: i32) -> ! {
	let tid = current_tid();
	crate::println!("Terminate task: {tid}, return value {code}");
	vmem::drop_user();
	{
		let mut rq = READYQUEUES.lock();
		rq.tasks[tid as usize].status = TaskStatus::Finished;
		rq.nr_tasks -= 1;
	}
	reschedule();
	unreachable!("scheduler resumed a finished task");
}

/// Terminates the current task. Entry point for the system call layer.
pub fn sys_exit(code: i32) -> ! {
	do_exit(code)
}

/// The routine a kernel task returning from its entry point falls into.
pub unsafe extern "C" fn leave_kernel_task() -> ! {
	do_exit(0)
}

/// The routine a user task returning from its entry point falls into.
pub unsafe extern "C" fn leave_user_task() -> ! {
	do_exit(0)
}

/// Blocks the current task. The caller is responsible for arranging a later
/// [`wakeup_task`] from another path.
///
/// The task keeps running until the next [`reschedule`].
pub fn block_current_task() {
	let mut rq = READYQUEUES.lock();
	let tid = current_tid() as usize;
	if rq.tasks[tid].status == TaskStatus::Running {
		rq.tasks[tid].status = TaskStatus::Blocked;
		rq.nr_tasks -= 1;
	}
}

/// Wakes up the blocked task `id`, making it runnable again.
///
/// If the task is not blocked, the function returns `EINVAL`.
pub fn wakeup_task(id: Tid) -> EResult<()> {
	if id as usize >= MAX_TASKS {
		return Err(errno::EINVAL);
	}
	let mut rq = READYQUEUES.lock();
	if rq.tasks[id as usize].status != TaskStatus::Blocked {
		return Err(errno::EINVAL);
	}
	rq.tasks[id as usize].status = TaskStatus::Ready;
	rq.enqueue(id);
	rq.nr_tasks += 1;
	Ok(())
}

/// Elects the next task to run.
///
/// Must be called with interrupts disabled.
///
/// If a switch is required, the function updates the current task and returns the slot
/// where the context switch must save the suspended task's stack pointer. If the current
/// task keeps running, the function returns `None`.
pub(crate) fn scheduler() -> Option<*mut *mut usize> {
	let mut rq = READYQUEUES.lock();
	let orig = current_tid();
	// A finished task's slot can be reused; its resources are reclaimed once off this
	// stack, in `finish_task_switch`
	if rq.tasks[orig as usize].status == TaskStatus::Finished {
		rq.tasks[orig as usize].status = TaskStatus::Invalid;
		rq.old_task = Some(orig);
	} else {
		rq.old_task = None;
	}
	match msb(rq.prio_bitmap) {
		// No task is ready
		None => {
			if matches!(
				rq.tasks[orig as usize].status,
				TaskStatus::Running | TaskStatus::Idle
			) {
				return None;
			}
			CURRENT.store(0, Relaxed);
		}
		Some(prio) => {
			let curr_status = rq.tasks[orig as usize].status;
			let curr_prio = rq.tasks[orig as usize].prio;
			// A running task of strictly higher priority keeps the CPU; an equal
			// priority task is preempted, giving round-robin on the tick
			if curr_status == TaskStatus::Running && curr_prio as u32 > prio {
				return None;
			}
			if curr_status == TaskStatus::Running {
				rq.tasks[orig as usize].status = TaskStatus::Ready;
				// Not re-enqueued here: the task is held out of the queues until the
				// switch completes, see `finish_task_switch`
				rq.old_task = Some(orig);
			}
			let next = rq.dequeue_head(prio);
			rq.tasks[next as usize].status = TaskStatus::Running;
			CURRENT.store(next, Relaxed);
		}
	}
	let curr = current_tid();
	(curr != orig).then(|| context_sp_slot(orig))
}

/// Reschedules, switching context to the elected task if it differs from the current
/// one.
pub fn reschedule() {
	let int_state = is_interrupt_enabled();
	cli();
	if let Some(slot) = scheduler() {
		unsafe {
			switch_context(slot);
		}
	}
	if int_state {
		sti();
	}
}

/// Finishes a context switch: re-enqueues the preempted task, or reclaims its resources
/// if it exited.
///
/// This is the first code to run on every newly resumed task, called from the context
/// switch with interrupts disabled.
#[no_mangle]
extern "C" fn finish_task_switch() {
	let mut rq = READYQUEUES.lock();
	let Some(old) = rq.old_task.take() else {
		return;
	};
	if rq.tasks[old as usize].status == TaskStatus::Invalid {
		// The task exited: release its stack and its address space's root directory.
		// Safe to do now that another stack and address space are in use
		let root = page_map(old);
		rq.tasks[old as usize].stack = null_mut();
		set_task_context(old, 0, 0);
		if !root.is_null() {
			frame::put_page(root);
		}
	} else {
		rq.enqueue(old);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering::SeqCst};

	/// A log the test tasks append their id to.
	static LOG: [AtomicU32; 16] = [const { AtomicU32::new(u32::MAX) }; 16];
	static LOG_LEN: AtomicUsize = AtomicUsize::new(0);

	fn log_push(v: u32) {
		let i = LOG_LEN.fetch_add(1, SeqCst);
		LOG[i].store(v, SeqCst);
	}

	fn log_reset() {
		LOG_LEN.store(0, SeqCst);
		for e in &LOG {
			e.store(u32::MAX, SeqCst);
		}
	}

	fn log_snapshot() -> ([u32; 16], usize) {
		let len = LOG_LEN.load(SeqCst);
		let mut out = [u32::MAX; 16];
		for (o, e) in out.iter_mut().zip(&LOG) {
			*o = e.load(SeqCst);
		}
		(out, len)
	}

	extern "C" fn yield_once_worker(_arg: *mut c_void) -> i32 {
		log_push(current_tid());
		reschedule();
		log_push(current_tid());
		0
	}

	#[test_case]
	fn sched_fifo_round_robin() {
		log_reset();
		let mut a = 0;
		let mut b = 0;
		let mut c = 0;
		create_kernel_task(Some(&mut a), yield_once_worker, null_mut(), NORMAL_PRIO).unwrap();
		create_kernel_task(Some(&mut b), yield_once_worker, null_mut(), NORMAL_PRIO).unwrap();
		create_kernel_task(Some(&mut c), yield_once_worker, null_mut(), NORMAL_PRIO).unwrap();
		// Run the tasks to completion. Control returns here only when everything else
		// is finished, since the idle task has the lowest priority
		reschedule();
		let (log, len) = log_snapshot();
		assert_eq!(len, 6);
		// First round in creation order, second round in the same order
		assert_eq!(&log[..6], &[a, b, c, a, b, c]);
	}

	extern "C" fn high_prio_worker(_arg: *mut c_void) -> i32 {
		log_push(1000 + current_tid());
		0
	}

	extern "C" fn spawner_worker(_arg: *mut c_void) -> i32 {
		log_push(current_tid());
		let mut high = 0;
		create_kernel_task(Some(&mut high), high_prio_worker, null_mut(), super::super::HIGH_PRIO)
			.unwrap();
		// The higher priority task must run to completion before this resumes
		reschedule();
		log_push(current_tid());
		0
	}

	#[test_case]
	fn sched_priority_preemption() {
		log_reset();
		let mut low = 0;
		create_kernel_task(Some(&mut low), spawner_worker, null_mut(), super::super::LOW_PRIO)
			.unwrap();
		reschedule();
		let (log, len) = log_snapshot();
		assert_eq!(len, 3);
		assert_eq!(log[0], low);
		assert!(log[1] >= 1000);
		assert_eq!(log[2], low);
	}

	extern "C" fn block_worker(_arg: *mut c_void) -> i32 {
		log_push(current_tid());
		block_current_task();
		reschedule();
		log_push(current_tid());
		0
	}

	#[test_case]
	fn sched_block_wakeup() {
		log_reset();
		let mut t = 0;
		create_kernel_task(Some(&mut t), block_worker, null_mut(), NORMAL_PRIO).unwrap();
		reschedule();
		// The task blocked itself after its first log entry
		let (_, len) = log_snapshot();
		assert_eq!(len, 1);
		// Waking a non-blocked task is refused
		assert!(wakeup_task(0).is_err());
		wakeup_task(t).unwrap();
		reschedule();
		let (log, len) = log_snapshot();
		assert_eq!(len, 2);
		assert_eq!(&log[..2], &[t, t]);
	}

	#[test_case]
	fn sched_invalid_priority() {
		// The idle priority is reserved
		let res = create_user_task(None, 0x40000000, null_mut(), IDLE_PRIO);
		assert_eq!(res, Err(errno::EINVAL));
	}

	#[test_case]
	fn sched_queue_bitmap_invariant() {
		let rq = READYQUEUES.lock();
		for prio in 1..=MAX_PRIO as u32 {
			let bit = rq.prio_bitmap & (1 << prio) != 0;
			let non_empty = rq.queue[prio as usize - 1].first.is_some();
			assert_eq!(bit, non_empty);
		}
	}
}
