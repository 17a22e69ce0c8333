//! Counter extension against the simulated board

use dualtime_timer::sim::{SimBoard, SimConfig};
use dualtime_timer::{HighFrequencyTimer, LowPowerTimer};

#[test]
fn test_both_timers_agree_on_elapsed_time() {
    let board = SimBoard::new(SimConfig {
        lp_bits: 16,
        ..SimConfig::default()
    });
    let mut hf = HighFrequencyTimer::new(board.high_frequency()).unwrap();
    let mut lp = LowPowerTimer::new(board.low_power()).unwrap();

    // Ten seconds in 100 ms slices, servicing interrupts as an idle loop would.
    for _ in 0..100 {
        board.advance_ns(100_000_000);
        while board.interrupt_pending() {
            hf.handle_interrupt();
            lp.handle_interrupt();
            lp.acknowledge_wake();
        }
    }

    assert_eq!(lp.current_tick(), 327_680);
    assert_eq!(hf.current_time_ns(), 10_000_000_000);
    assert_eq!(lp.current_time_ns(), 10_000_000_000);
}

#[test]
fn test_reads_stay_monotonic_with_slow_register_access() {
    let board = SimBoard::new(SimConfig {
        hf_bits: 12,
        access_cost_ns: 13,
        ..SimConfig::default()
    });
    let mut hf = HighFrequencyTimer::new(board.high_frequency()).unwrap();

    let mut last = hf.current_tick();
    for _ in 0..50_000 {
        if hf.interrupt_pending() {
            hf.handle_interrupt();
        }
        let now = hf.current_tick();
        assert!(now >= last);
        last = now;
    }
    let true_ticks = board.hf_ticks();
    assert!(true_ticks - last < 4);
}

#[test]
fn test_capture_is_extended_to_full_width() {
    let board = SimBoard::new(SimConfig {
        hf_bits: 16,
        ..SimConfig::default()
    });
    let mut hf = HighFrequencyTimer::new(board.high_frequency()).unwrap();
    let mut lp = LowPowerTimer::new(board.low_power()).unwrap();

    for _ in 0..20 {
        board.advance_ns(1_000_000);
        hf.handle_interrupt();
        lp.handle_interrupt();
    }
    let edge = lp.current_tick() + 2;
    lp.schedule_interrupt(edge);
    hf.discard_capture();
    while lp.current_tick() < edge {
        board.advance_to_next_event();
        hf.handle_interrupt();
    }
    let captured = hf.take_capture().unwrap();
    assert_eq!(lp.handle_interrupt().fired, Some(edge));
    let expected = (edge as u128 * 1_000_000_000).div_ceil(32_768) as u64 * 48 / 1000;
    assert_eq!(captured, expected);
    assert_eq!(hf.take_capture(), None);
}
