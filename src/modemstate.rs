//! Modem-state change poller.
//!
//! Grounded on `sterm_modemstate`/`termios_timeout` in
//! `examples/original_source/gensio/sergensio_termios.c`: `subscribe(mask)`
//! arms a timer that primes at ~1ms and then re-fires every ~1s, each tick
//! sampling `TIOCMGET`, computing which of the four input signals (CD, RI,
//! DSR, CTS) changed level since the last tick, and dispatching an event
//! when either an edge within the caller's mask fired or this is the first
//! tick since open. Realized here with `tokio::time::sleep` + a
//! [`tokio::sync::Notify`] rather than the gensio timer primitive, per
//! spec.md §5's "externally-provided timer" and `gawd-ai-sctl`'s ambient
//! tokio usage.

use crate::event::SerialEvent;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

const PRIME_DELAY: Duration = Duration::from_millis(1);
const RESCHEDULE_DELAY: Duration = Duration::from_secs(1);

#[derive(Default)]
struct PollerState {
    mask: u8,
    last_modemstate: u8,
    sent_first_modemstate: bool,
    handling_modemstate: bool,
}

/// Samples `TIOCMGET` on a schedule and dispatches masked modem-state
/// change events.
pub struct ModemStatePoller {
    fd: RawFd,
    state: Mutex<PollerState>,
    notify: Notify,
    events: broadcast::Sender<SerialEvent>,
    /// Mirrors spec.md §3's `timer_stopped`: true once the run loop has
    /// observed `mask == 0` and is parked on `notify`, i.e. no tick is
    /// in flight and none will fire until the next `subscribe`. Close uses
    /// this to know the fd is safe to close without racing an in-flight
    /// `TIOCMGET`.
    timer_stopped: AtomicBool,
}

impl ModemStatePoller {
    /// Spawn the poller task bound to `fd`, dispatching onto `events`.
    /// Starts with `modemstate_mask == 0` (timer stopped) until the first
    /// `subscribe` call.
    pub fn spawn(fd: RawFd, events: broadcast::Sender<SerialEvent>) -> Arc<Self> {
        let poller = Arc::new(ModemStatePoller {
            fd,
            state: Mutex::new(PollerState::default()),
            notify: Notify::new(),
            events,
            timer_stopped: AtomicBool::new(true),
        });
        let task_poller = Arc::clone(&poller);
        tokio::spawn(async move { task_poller.run().await });
        poller
    }

    /// Set the reportable-signal mask (spec.md §4.5). `mask == 0` stops the
    /// timer; any other value primes a tick in ~1ms.
    ///
    /// A `0 → nonzero` transition also resets `sent_first_modemstate`, so a
    /// consumer that unsubscribes and resubscribes gets exactly one fresh
    /// forced report rather than silence until the next real edge (spec.md
    /// §8: "subscribe(0) followed by subscribe(M≠0) produces exactly one
    /// forced initial modem-state event").
    pub fn subscribe(&self, mask: u8) {
        let mut state = self.state.lock().expect("poller mutex poisoned");
        if state.mask == 0 && mask != 0 {
            state.sent_first_modemstate = false;
        }
        state.mask = mask;
        drop(state);
        // Arming is immediate; stopping is only reported once the run loop
        // itself observes mask == 0 with no tick in flight (see `run`).
        if mask != 0 {
            self.timer_stopped.store(false, Ordering::SeqCst);
        }
        self.notify.notify_one();
    }

    /// Whether the timer has actually stopped ticking: `subscribe(0)` asks
    /// for this but the acknowledgement only lands once the run loop is
    /// parked, guaranteeing no `tick()` is mid-flight against the fd (spec.md
    /// §3 `timer_stopped`; used by the close drain to avoid a `TIOCMGET`
    /// racing `close(2)`).
    pub fn is_stopped(&self) -> bool {
        self.timer_stopped.load(Ordering::SeqCst)
    }

    /// Reset `sent_first_modemstate` so the next tick force-sends, matching
    /// the "polling re-enabled after open" transition in spec.md §4.2.
    pub fn reset_after_open(&self) {
        let mut state = self.state.lock().expect("poller mutex poisoned");
        state.sent_first_modemstate = false;
        state.last_modemstate = 0;
    }

    /// The current masked modem-state word, for diagnostics and the
    /// address formatter (spec.md §4.7).
    pub fn last_modemstate(&self) -> u8 {
        self.state.lock().expect("poller mutex poisoned").last_modemstate
    }

    async fn run(self: Arc<Self>) {
        let mut delay = PRIME_DELAY;
        loop {
            let mask = self.state.lock().expect("poller mutex poisoned").mask;
            if mask == 0 {
                self.timer_stopped.store(true, Ordering::SeqCst);
                self.notify.notified().await;
                delay = PRIME_DELAY;
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.notify.notified() => {
                    delay = PRIME_DELAY;
                    continue;
                }
            }
            self.tick();
            let mask_after = self.state.lock().expect("poller mutex poisoned").mask;
            if mask_after != 0 {
                delay = RESCHEDULE_DELAY;
            } else {
                delay = PRIME_DELAY;
            }
        }
    }

    fn tick(&self) {
        {
            let mut state = self.state.lock().expect("poller mutex poisoned");
            if state.handling_modemstate {
                return;
            }
            state.handling_modemstate = true;
        }

        let mctl = match tiocmget(self.fd) {
            Ok(m) => m,
            Err(_) => {
                self.state.lock().expect("poller mutex poisoned").handling_modemstate = false;
                return;
            }
        };
        let cur = compose_level_word(mctl);

        let (should_send, new_state) = {
            let mut state = self.state.lock().expect("poller mutex poisoned");
            let force_send = !state.sent_first_modemstate;
            let (new_state, should_send) =
                compute_modemstate(state.last_modemstate, cur, state.mask, force_send);
            state.last_modemstate = new_state;
            state.sent_first_modemstate = true;
            state.handling_modemstate = false;
            (should_send, new_state)
        };

        if should_send {
            let _ = self.events.send(SerialEvent::ModemState(new_state));
        }
    }
}

/// The edge-detection core of a tick (spec.md §4.5): given the previous
/// masked state, a freshly sampled level word, and the reportable mask,
/// decide the new masked state and whether it should be dispatched.
///
/// `cur`'s bits 7..4 are the CD/RI/DSR/CTS levels (see
/// [`compose_level_word`]); shifting their XOR with `last_modemstate` down
/// by 4 turns "level N changed" into "edge bit N-4", so a caller's mask only
/// lets an edge through when it also covers that signal's edge bit (e.g.
/// `0x11` reports CTS level and CTS edges; `0x10` alone reports the CTS
/// level but never wakes on its edge). `force_send` bypasses the edge check
/// for the first tick after open or resubscribe.
fn compute_modemstate(last_modemstate: u8, cur: u8, mask: u8, force_send: bool) -> (u8, bool) {
    let edges = (cur ^ last_modemstate) >> 4;
    let new_state = (cur | edges) & mask;
    let should_send = force_send || (new_state & 0x0F) != 0;
    (new_state, should_send)
}

/// Bits 7..4 = CD, RI, DSR, CTS levels; bits 3..0 left zero (filled in with
/// edge bits by the caller, per spec.md §4.5).
fn compose_level_word(mctl: i32) -> u8 {
    let mut word = 0u8;
    if mctl & libc::TIOCM_CAR != 0 {
        word |= 0x80;
    }
    if mctl & libc::TIOCM_RI != 0 {
        word |= 0x40;
    }
    if mctl & libc::TIOCM_DSR != 0 {
        word |= 0x20;
    }
    if mctl & libc::TIOCM_CTS != 0 {
        word |= 0x10;
    }
    word
}

fn tiocmget(fd: RawFd) -> crate::error::Result<i32> {
    let mut mctl: libc::c_int = 0;
    // SAFETY: `fd` is an open tty fd owned by the endpoint for the poller's
    // lifetime; `mctl` is a valid out-parameter for TIOCMGET.
    let rc = unsafe { libc::ioctl(fd, libc::TIOCMGET, &mut mctl as *mut libc::c_int) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(mctl)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_word_layout() {
        let mctl = libc::TIOCM_CAR | libc::TIOCM_CTS;
        let word = compose_level_word(mctl);
        assert_eq!(word, 0x80 | 0x10);
    }

    #[test]
    fn level_word_zero_when_no_signals() {
        assert_eq!(compose_level_word(0), 0);
    }

    #[tokio::test]
    async fn subscribe_forces_first_send() {
        let (master, _slave) = nix::pty::openpty(None, None).expect("openpty");
        use std::os::unix::io::AsRawFd;
        let fd = master.as_raw_fd();
        let (tx, mut rx) = broadcast::channel(8);
        let poller = ModemStatePoller::spawn(fd, tx);
        poller.subscribe(0xFF);
        std::mem::forget(master);

        let event = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("poller should force-send within the prime window")
            .unwrap();
        assert!(matches!(event, SerialEvent::ModemState(_)));
    }

    #[tokio::test]
    async fn mask_zero_stops_timer_without_send() {
        let (master, _slave) = nix::pty::openpty(None, None).expect("openpty");
        use std::os::unix::io::AsRawFd;
        let fd = master.as_raw_fd();
        let (tx, mut rx) = broadcast::channel(8);
        let poller = ModemStatePoller::spawn(fd, tx);
        poller.subscribe(0);
        std::mem::forget(master);

        let result = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err(), "no event should fire while mask is zero");
    }

    #[test]
    fn edge_detected_for_signal_covered_by_mask() {
        // CTS rises from low to high. Mask 0x11 covers both CTS's level bit
        // (0x10) and its paired edge bit (0x01) per compute_modemstate's
        // level-bit-N -> edge-bit-(N-4) convention.
        let (new_state, should_send) = compute_modemstate(0x00, 0x10, 0x11, false);
        assert_eq!(new_state, 0x11);
        assert!(should_send, "an in-mask edge must wake the subscriber");
    }

    #[test]
    fn edge_suppressed_for_signal_outside_mask() {
        // CD rises from low to high, but the mask only covers CTS (0x11):
        // neither CD's level bit (0x80) nor its edge bit (0x08) survive the
        // mask, so the change is invisible to this subscriber.
        let (new_state, should_send) = compute_modemstate(0x00, 0x80, 0x11, false);
        assert_eq!(new_state, 0x00);
        assert!(
            !should_send,
            "an edge outside the mask must not wake the subscriber"
        );
    }

    #[test]
    fn unchanged_signal_produces_no_edge() {
        let (new_state, should_send) = compute_modemstate(0x10, 0x10, 0x11, false);
        assert_eq!(new_state, 0x10);
        assert!(!should_send, "no level change means no edge bit");
    }

    #[test]
    fn force_send_overrides_a_quiet_tick() {
        let (new_state, should_send) = compute_modemstate(0x00, 0x00, 0xFF, true);
        assert_eq!(new_state, 0x00);
        assert!(should_send, "the first tick after open must force-send");
    }

    #[tokio::test]
    async fn is_stopped_tracks_subscribe_and_settles_after_unsubscribe() {
        let (master, _slave) = nix::pty::openpty(None, None).expect("openpty");
        use std::os::unix::io::AsRawFd;
        let fd = master.as_raw_fd();
        let (tx, _rx) = broadcast::channel(8);
        let poller = ModemStatePoller::spawn(fd, tx);
        assert!(poller.is_stopped(), "a fresh poller has mask 0");

        poller.subscribe(0xFF);
        assert!(
            !poller.is_stopped(),
            "subscribing with a nonzero mask arms the timer immediately"
        );

        poller.subscribe(0);
        tokio::time::timeout(Duration::from_millis(500), async {
            while !poller.is_stopped() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("poller should report stopped once the run loop parks");

        std::mem::forget(master);
    }
}
