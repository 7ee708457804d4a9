//! Debug assertion macros for cursor and window invariants.
//!
//! Active only in debug builds; release builds carry no overhead. Used by
//! `BatchBuffer` on every cursor move and by `Batch` on window updates.

/// Assert the queued-batch count never exceeds usable capacity.
///
/// `0 <= head - tail <= capacity` must hold at every observation.
macro_rules! debug_assert_bounded_occupancy {
    ($occupancy:expr, $capacity:expr) => {
        debug_assert!(
            $occupancy <= $capacity,
            "occupancy {} exceeds ring capacity {}",
            $occupancy,
            $capacity
        )
    };
}

/// Assert the consumer cursor never passes the producer cursor.
macro_rules! debug_assert_tail_not_past_head {
    ($new_tail:expr, $head:expr) => {
        debug_assert!(
            $new_tail <= $head,
            "advancing tail {} beyond head {}",
            $new_tail,
            $head
        )
    };
}

/// Assert a sequence cursor only moves forward.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} cursor decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert a batch sample window stays well-formed.
///
/// `tail <= head <= capacity` within a single batch.
macro_rules! debug_assert_sample_window {
    ($tail:expr, $head:expr, $capacity:expr) => {
        debug_assert!(
            $tail <= $head && $head <= $capacity,
            "batch window broken: tail {} head {} capacity {}",
            $tail,
            $head,
            $capacity
        )
    };
}

pub(crate) use debug_assert_bounded_occupancy;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_sample_window;
pub(crate) use debug_assert_tail_not_past_head;
