//! Routes protection faults on the logical region to the active pager.
//!
//! Only one region can own the trap at a time. Faults outside that region put
//! the previous signal disposition back and return, so the faulting access is
//! retried under whatever handler was there before.

use std::{
    io, mem, ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use libc::{c_int, c_void, siginfo_t};
use log::{error, info};

use crate::{region::Pager, RegionError};

// Linux reports protection faults as SIGSEGV, some BSDs as SIGBUS.
const TRAPPED: [c_int; 2] = [libc::SIGSEGV, libc::SIGBUS];

static ACTIVE: AtomicPtr<Pager> = AtomicPtr::new(ptr::null_mut());
static PREVIOUS: AtomicPtr<[libc::sigaction; 2]> = AtomicPtr::new(ptr::null_mut());

pub(crate) struct Trap {
    previous: Box<[libc::sigaction; 2]>,
}

impl Trap {
    pub(crate) fn install(pager: *mut Pager) -> Result<Trap, RegionError> {
        if ACTIVE
            .compare_exchange(ptr::null_mut(), pager, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RegionError::TrapBusy);
        }

        let mut previous: Box<[libc::sigaction; 2]> = Box::new(unsafe { mem::zeroed() });
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = on_fault as libc::sighandler_t;
        action.sa_flags = libc::SA_SIGINFO;
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaddset(&mut action.sa_mask, libc::SIGALRM);
            libc::sigaddset(&mut action.sa_mask, libc::SIGIO);
        }

        for (slot, signal) in TRAPPED.iter().enumerate() {
            if unsafe { libc::sigaction(*signal, &action, &mut previous[slot]) } != 0 {
                let err = io::Error::last_os_error();
                for undo in 0..slot {
                    unsafe { libc::sigaction(TRAPPED[undo], &previous[undo], ptr::null_mut()) };
                }
                ACTIVE.store(ptr::null_mut(), Ordering::Release);
                return Err(RegionError::Trap(err));
            }
        }
        PREVIOUS.store(&mut *previous as *mut [libc::sigaction; 2], Ordering::Release);
        info!("Fault trap installed");
        Ok(Trap { previous })
    }
}

impl Drop for Trap {
    fn drop(&mut self) {
        for (slot, signal) in TRAPPED.iter().enumerate() {
            unsafe { libc::sigaction(*signal, &self.previous[slot], ptr::null_mut()) };
        }
        PREVIOUS.store(ptr::null_mut(), Ordering::Release);
        ACTIVE.store(ptr::null_mut(), Ordering::Release);
        info!("Fault trap removed");
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn fault_address(info: *const siginfo_t) -> usize {
    (*info).si_addr() as usize
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn fault_address(info: *const siginfo_t) -> usize {
    (*info).si_addr as usize
}

extern "C" fn on_fault(signal: c_int, info: *mut siginfo_t, _context: *mut c_void) {
    let pager = ACTIVE.load(Ordering::Acquire);
    if !pager.is_null() && !info.is_null() {
        let addr = unsafe { fault_address(info) };
        // The owning region never holds a reference into the pager while code
        // touches the logical region, which is the only way to get here.
        let pager = unsafe { &mut *pager };
        if let Some(page) = pager.page_of(addr) {
            if let Err(e) = pager.resolve(page) {
                error!("Unrecoverable fault on page {}: {}", page, e);
                std::process::abort();
            }
            return;
        }
    }
    forward(signal);
}

fn forward(signal: c_int) {
    let slot = TRAPPED.iter().position(|s| *s == signal).unwrap_or(0);
    let previous = PREVIOUS.load(Ordering::Acquire);
    unsafe {
        if previous.is_null() {
            let mut default: libc::sigaction = mem::zeroed();
            default.sa_sigaction = libc::SIG_DFL;
            libc::sigaction(signal, &default, ptr::null_mut());
        } else {
            libc::sigaction(signal, &(*previous)[slot], ptr::null_mut());
        }
    }
}
