//! Process-wide clock shared with interrupt handlers

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use dualtime_kernel::{Clock, ClockConfig, ClockError, GlobalClock};
use dualtime_timer::sim::{SimBoard, SimConfig, SimHighFrequency, SimLowPower, SimPlatform};

static CLOCK: GlobalClock<SimHighFrequency, SimLowPower, SimPlatform> = GlobalClock::new();
static FIRED_AT: AtomicI64 = AtomicI64::new(0);
static NOW_IN_CALLBACK: AtomicI64 = AtomicI64::new(0);
static CALLS: AtomicUsize = AtomicUsize::new(0);

fn on_time(at: i64) {
    FIRED_AT.store(at, Ordering::SeqCst);
    CALLS.fetch_add(1, Ordering::SeqCst);
    // The callback runs outside the clock's critical section.
    if let Ok(now) = CLOCK.now() {
        NOW_IN_CALLBACK.store(now, Ordering::SeqCst);
    }
}

fn new_clock(board: &SimBoard) -> Clock<SimHighFrequency, SimLowPower, SimPlatform> {
    let config = ClockConfig::builder()
        .frequencies(48_000_000, 32_768)
        .time_interrupt(on_time)
        .build()
        .unwrap();
    Clock::new(
        config,
        board.high_frequency(),
        board.low_power(),
        board.platform(),
    )
    .unwrap()
}

#[test]
fn test_global_clock_drives_the_time_interrupt() {
    let board = SimBoard::new(SimConfig::default());

    assert!(!CLOCK.is_installed());
    assert_eq!(CLOCK.now(), Err(ClockError::NotInitialized));

    CLOCK.install(new_clock(&board)).unwrap();
    assert!(CLOCK.is_installed());
    assert!(matches!(
        CLOCK.install(new_clock(&board)),
        Err(ClockError::InvalidConfig(_))
    ));

    let start = CLOCK.now().unwrap();
    let at = start + 700_000;
    assert_eq!(CLOCK.set_interrupt(at), Ok(true));

    while CALLS.load(Ordering::SeqCst) == 0 {
        board.advance_to_next_event();
        CLOCK.on_hf_interrupt();
        CLOCK.on_lp_interrupt();
    }

    let fired = FIRED_AT.load(Ordering::SeqCst);
    assert!(fired >= at && fired - at < 100, "fired {fired} for {at}");
    assert!(NOW_IN_CALLBACK.load(Ordering::SeqCst) >= fired);
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);

    critical_section::with(|cs| {
        let now = CLOCK.now_in(cs).unwrap();
        assert!(now >= fired);
        assert_eq!(CLOCK.with_in(cs, |clock| clock.interrupt_at()), Ok(None));
    });

    assert!(CLOCK.set_time(start - 1).is_err());
    CLOCK.sleep_until(CLOCK.now().unwrap() + 200_000).unwrap();
    assert_eq!(CALLS.load(Ordering::SeqCst), 2);

    let clock = CLOCK.uninstall().unwrap();
    assert!(clock.is_started());
    assert!(!CLOCK.is_installed());
}
