//! POSIX インターバルタイマー（timer_create / timer_settime / timer_gettime / timer_delete）

use crate::bridge::Association;
use crate::domain::{ClockKind, OsItimerspec, OsTimespec};
use crate::ports::outbound::{TimerFacility, TimerHandle};
use libc::{self, c_void};
use std::io;
use std::mem;
use std::ptr::{self, NonNull};

fn clock_id(clock: ClockKind) -> libc::clockid_t {
    match clock {
        ClockKind::Monotonic => libc::CLOCK_MONOTONIC,
        ClockKind::Realtime => libc::CLOCK_REALTIME,
    }
}

fn raw_timer(handle: &TimerHandle) -> libc::timer_t {
    handle.as_raw() as libc::timer_t
}

fn to_libc_timespec(ts: &OsTimespec) -> io::Result<libc::timespec> {
    let mut out: libc::timespec = unsafe { mem::zeroed() };
    out.tv_sec = libc::time_t::try_from(ts.sec)
        .map_err(|_| io::Error::from_raw_os_error(libc::EOVERFLOW))?;
    out.tv_nsec = libc::c_long::try_from(ts.nsec)
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    Ok(out)
}

fn from_libc_timespec(ts: &libc::timespec) -> OsTimespec {
    OsTimespec {
        sec: i64::from(ts.tv_sec),
        nsec: i64::from(ts.tv_nsec),
    }
}

/// timer_create 系を使う TimerFacility 実装
///
/// 満了は SIGEV_SIGNAL で通知し、通知値（sival_ptr）に関連付けのアドレスを載せる。
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixTimerFacility;

impl TimerFacility for PosixTimerFacility {
    fn create(
        &self,
        clock: ClockKind,
        signal: i32,
        association: NonNull<Association>,
    ) -> io::Result<TimerHandle> {
        unsafe {
            let mut sigev: libc::sigevent = mem::zeroed();
            sigev.sigev_notify = libc::SIGEV_SIGNAL;
            sigev.sigev_signo = signal;
            sigev.sigev_value = libc::sigval {
                sival_ptr: association.as_ptr() as *mut c_void,
            };
            let mut timer_id: libc::timer_t = mem::zeroed();
            if libc::timer_create(clock_id(clock), &mut sigev, &mut timer_id) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(TimerHandle::from_raw(timer_id as usize))
        }
    }

    fn set_interval(&self, handle: &TimerHandle, spec: &OsItimerspec) -> io::Result<()> {
        let mut value: libc::itimerspec = unsafe { mem::zeroed() };
        value.it_value = to_libc_timespec(&spec.value)?;
        value.it_interval = to_libc_timespec(&spec.interval)?;
        unsafe {
            if libc::timer_settime(raw_timer(handle), 0, &value, ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    fn remaining(&self, handle: &TimerHandle) -> io::Result<OsTimespec> {
        unsafe {
            let mut current: libc::itimerspec = mem::zeroed();
            if libc::timer_gettime(raw_timer(handle), &mut current) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(from_libc_timespec(&current.it_value))
        }
    }

    fn delete(&self, handle: TimerHandle) -> io::Result<()> {
        unsafe {
            if libc::timer_delete(raw_timer(&handle)) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}
