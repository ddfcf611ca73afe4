//! sigaction によるシグナルブリッジの登録と、プロセス全体のシグナル登録表

use crate::bridge::{self, Association};
use crate::ports::outbound::SignalRegistry;
use libc::{self, c_int, c_void};
use std::collections::BTreeMap;
use std::io;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;

/// Linux のシグナル番号は 1..=64
const SLOT_COUNT: usize = 65;

/// siginfo_t::si_code: POSIX タイマーの満了による配送
const SI_TIMER: c_int = -2;

// シグナル番号ごとの有効な関連付け。ハンドラから読むのでアトミックのみ。
static LIVE: [AtomicPtr<Association>; SLOT_COUNT] =
    [const { AtomicPtr::new(ptr::null_mut()) }; SLOT_COUNT];

// シグナル番号ごとの、ハンドラ内で関連付けを読んでから抜けるまでの実行数。
// unbind はこれが 0 になるまで戻らない。
static IN_FLIGHT: [AtomicUsize; SLOT_COUNT] = [const { AtomicUsize::new(0) }; SLOT_COUNT];

struct Registration {
    users: usize,
    previous: libc::sigaction,
}

// install / restore の管理表。通常コンテキストからのみ触る。
static REGISTRATIONS: Mutex<BTreeMap<c_int, Registration>> = Mutex::new(BTreeMap::new());

fn registrations() -> MutexGuard<'static, BTreeMap<c_int, Registration>> {
    REGISTRATIONS.lock().unwrap_or_else(|e| e.into_inner())
}

fn slot_index(signal: c_int) -> Option<usize> {
    usize::try_from(signal)
        .ok()
        .filter(|i| (1..SLOT_COUNT).contains(i))
}

fn slot(signal: c_int) -> Option<&'static AtomicPtr<Association>> {
    slot_index(signal).map(|i| &LIVE[i])
}

/// 実行中のハンドラがこの番号の関連付けを手放すまで待つ
fn wait_in_flight(index: usize) {
    while IN_FLIGHT[index].load(Ordering::SeqCst) != 0 {
        thread::yield_now();
    }
}

fn errno_location() -> *mut c_int {
    unsafe { libc::__errno_location() }
}

/// プロセス全体に登録されるシグナルブリッジ本体
///
/// タイマー以外（kill 等）から届いたシグナルは通知値を持たないので null 扱いにする。
extern "C" fn bridge_handler(signum: c_int, info: *mut libc::siginfo_t, _context: *mut c_void) {
    let saved_errno = unsafe { *errno_location() };

    let delivered: *const Association = if info.is_null() {
        ptr::null()
    } else {
        unsafe {
            if (*info).si_code == SI_TIMER {
                (*info).si_value().sival_ptr as *const Association
            } else {
                ptr::null()
            }
        }
    };
    match slot_index(signum) {
        Some(i) => {
            // 読む前に数を上げる。unbind 側は null を書いてから数を見る。
            IN_FLIGHT[i].fetch_add(1, Ordering::SeqCst);
            let live = LIVE[i].load(Ordering::SeqCst) as *const Association;
            unsafe { bridge::dispatch(signum, delivered, live) };
            IN_FLIGHT[i].fetch_sub(1, Ordering::Release);
        }
        None => unsafe {
            bridge::dispatch(signum, delivered, ptr::null());
        },
    }
    unsafe { *errno_location() = saved_errno };
}

/// 配送待ちのシグナルを読み捨てる（以前の処理へ戻した直後に既定動作で落ちないように）
unsafe fn drain_pending(signal: c_int) {
    let mut set: libc::sigset_t = mem::zeroed();
    libc::sigemptyset(&mut set);
    libc::sigaddset(&mut set, signal);
    let mut old: libc::sigset_t = mem::zeroed();
    if libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut old) != 0 {
        return;
    }
    let zero: libc::timespec = mem::zeroed();
    while libc::sigtimedwait(&set, ptr::null_mut(), &zero) == signal {}
    libc::pthread_sigmask(libc::SIG_SETMASK, &old, ptr::null_mut());
}

/// sigaction を使う SignalRegistry 実装
///
/// 状態はプロセス全体で 1 つ。この型は表への窓口にすぎないので、いくつ作っても同じ表を見る。
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixSignalRegistry;

impl PosixSignalRegistry {
    /// 現在 install しているタイマーの数
    pub fn users(&self, signal: i32) -> usize {
        registrations().get(&signal).map(|r| r.users).unwrap_or(0)
    }

    /// シグナルに結び付いた関連付けがあるか
    pub fn is_bound(&self, signal: i32) -> bool {
        slot(signal)
            .map(|s| !s.load(Ordering::Acquire).is_null())
            .unwrap_or(false)
    }
}

impl SignalRegistry for PosixSignalRegistry {
    fn install(&self, signal: i32) -> io::Result<()> {
        if slot(signal).is_none() {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let mut table = registrations();
        if let Some(reg) = table.get_mut(&signal) {
            reg.users += 1;
            return Ok(());
        }

        let previous = unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = bridge_handler
                as extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void)
                as libc::sighandler_t;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            let mut previous: libc::sigaction = mem::zeroed();
            if libc::sigaction(signal, &action, &mut previous) != 0 {
                return Err(io::Error::last_os_error());
            }
            previous
        };
        table.insert(signal, Registration { users: 1, previous });
        Ok(())
    }

    fn restore(&self, signal: i32) -> io::Result<()> {
        let mut table = registrations();
        let Some(reg) = table.get_mut(&signal) else {
            return Ok(());
        };
        if reg.users > 1 {
            reg.users -= 1;
            return Ok(());
        }

        let previous = reg.previous;
        unsafe {
            drain_pending(signal);
            if libc::sigaction(signal, &previous, ptr::null_mut()) != 0 {
                // ブリッジは残ったままなので、次の install はカウントを戻すだけでよい
                reg.users = 0;
                return Err(io::Error::last_os_error());
            }
        }
        table.remove(&signal);
        Ok(())
    }

    fn bind(&self, signal: i32, association: NonNull<Association>) {
        if let Some(s) = slot(signal) {
            s.store(association.as_ptr(), Ordering::Release);
        }
    }

    fn unbind(&self, signal: i32, association: NonNull<Association>) {
        let Some(i) = slot_index(signal) else {
            return;
        };
        let _ = LIVE[i].compare_exchange(
            association.as_ptr(),
            ptr::null_mut(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        // 押し出し済みでも、押し出される前に読んだハンドラがまだ動いているかもしれない
        wait_in_flight(i);
    }
}
