//! Shared setup for clock tests on the simulated board

#![allow(dead_code)]

use dualtime_kernel::{Clock, ClockConfig};
use dualtime_timer::sim::{SimBoard, SimConfig, SimHighFrequency, SimLowPower, SimPlatform};

pub type SimClock = Clock<SimHighFrequency, SimLowPower, SimPlatform>;

pub fn board(hf_skew_ppb: i64) -> SimBoard {
    SimBoard::new(SimConfig {
        hf_skew_ppb,
        ..SimConfig::default()
    })
}

pub fn clock_on(board: &SimBoard, config: ClockConfig) -> SimClock {
    Clock::new(
        config,
        board.high_frequency(),
        board.low_power(),
        board.platform(),
    )
    .unwrap()
}

pub fn default_clock(board: &SimBoard) -> SimClock {
    clock_on(board, ClockConfig::default())
}

/// Runs the board for `ns`, servicing interrupts at every hardware event
/// the way the interrupt handlers would.
pub fn run_for(board: &SimBoard, clock: &mut SimClock, ns: u64) {
    let end = board.now_ns() + ns;
    loop {
        clock.handle_hf_interrupt();
        clock.handle_lp_interrupt();
        let now = board.now_ns();
        if now >= end {
            break;
        }
        let next = board.next_event_ns().map_or(end, |t| t.min(end));
        board.advance_to_ns(next.max(now + 1));
    }
}
