//! Open/closed duration and activation accounting.
//!
//! Every observation of the lock's state feeds [`apply_transition`], which
//! advances the duration accumulators by the time elapsed since the previous
//! observation and derives the history log entry. The function is pure; the
//! caller owns persistence, the history log and characteristic pushes.
//!
//! # Accounting rules
//!
//! | Previous | Observed | Effect |
//! |----------|----------|--------|
//! | locked | locked | `closed += dt`, first activation stamped if unset |
//! | unlocked | unlocked | `open += dt` |
//! | unlocked | locked | `open += dt`, contact detected |
//! | locked | unlocked | `closed += dt`, `times_opened += 1`, activation stamped |
//!
//! An unknown previous state is not an edge: `dt` goes to the bucket of the
//! observed state. A clock that steps backwards contributes nothing, and the
//! observation timestamp never moves backwards.

use sesame_types::characteristic::contact_state_value;
use sesame_types::{Characteristic, HistoryEntry, HistoryKind, LockState};

/// Characteristic updates and the log entry produced by one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Whether the observation changed the lock state.
    pub edge: bool,
    /// Values to push, in order.
    pub pushes: Vec<(Characteristic, u32)>,
    /// Entry to append to the history log.
    pub entry: HistoryEntry,
}

/// Seconds from `initial_time` to `time`, clamped at zero.
pub(crate) fn relative_seconds(time: i64, initial_time: i64) -> u32 {
    u32::try_from((time - initial_time).max(0)).unwrap_or(u32::MAX)
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Account for observing the lock as `locked` at `now`.
///
/// `initial_time` is the start of the history log, used for the
/// `LastActivation` value. The caller updates `current_locked` afterwards.
pub fn apply_transition(
    state: &mut LockState,
    locked: bool,
    now: i64,
    kind: HistoryKind,
    initial_time: i64,
) -> Transition {
    let dt = u64::try_from(now - state.last_observation).unwrap_or(0);
    let edge = state.current_locked.is_some_and(|previous| previous != locked);
    let mut pushes = Vec::new();

    match (edge, locked) {
        (false, true) => {
            state.closed_duration += dt;
            if state.last_activation.is_none() {
                state.last_activation = Some(now);
            }
        }
        (false, false) => state.open_duration += dt,
        (true, true) => {
            state.open_duration += dt;
            pushes.push((Characteristic::ContactSensorState, contact_state_value(true)));
        }
        (true, false) => {
            state.last_activation = Some(now);
            pushes.push((
                Characteristic::LastActivation,
                relative_seconds(now, initial_time),
            ));
            state.times_opened = state.times_opened.saturating_add(1);
            pushes.push((Characteristic::TimesOpened, state.times_opened));
            state.closed_duration += dt;
            pushes.push((Characteristic::ContactSensorState, contact_state_value(false)));
        }
    }

    if edge {
        pushes.push((Characteristic::OpenDuration, saturate(state.open_duration)));
        pushes.push((Characteristic::ClosedDuration, saturate(state.closed_duration)));
    }

    state.last_observation = state.last_observation.max(now);

    Transition {
        edge,
        pushes,
        entry: HistoryEntry {
            time: now,
            status: kind.sensor_value(locked),
        },
    }
}

/// Apply a `ResetTotal` write.
///
/// Zeroes `times_opened` and stores `baseline` when it differs from the stored
/// one. Returns the `TimesOpened` value to push, or `None` if nothing changed.
pub fn reset_totals(state: &mut LockState, baseline: u32) -> Option<(Characteristic, u32)> {
    if state.reset_baseline == Some(baseline) {
        return None;
    }
    state.times_opened = 0;
    state.reset_baseline = Some(baseline);
    Some((Characteristic::TimesOpened, 0))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Durations sum to exactly the observed time span.
        #[test]
        fn durations_are_additive(
            start in 0i64..2_000_000_000,
            steps in proptest::collection::vec((0i64..10_000, any::<bool>()), 1..50),
            initial in any::<bool>(),
        ) {
            let mut state = LockState::new(start);
            state.current_locked = Some(initial);
            let mut now = start;

            for (dt, locked) in steps {
                now += dt;
                apply_transition(&mut state, locked, now, HistoryKind::Door, start);
                state.current_locked = Some(locked);
            }

            let total = state.open_duration + state.closed_duration;
            prop_assert_eq!(total, u64::try_from(now - start).unwrap());
            prop_assert_eq!(state.last_observation, now);
        }

        /// Durations never decrease, whatever the clock does.
        #[test]
        fn durations_are_monotonic(
            times in proptest::collection::vec((0i64..1_000_000, any::<bool>()), 1..50),
        ) {
            let mut state = LockState::new(0);
            state.current_locked = Some(true);
            let mut previous = (0, 0, 0);

            for (now, locked) in times {
                apply_transition(&mut state, locked, now, HistoryKind::Door, 0);
                state.current_locked = Some(locked);
                let current = (state.open_duration, state.closed_duration, state.last_observation);
                prop_assert!(current.0 >= previous.0);
                prop_assert!(current.1 >= previous.1);
                prop_assert!(current.2 >= previous.2);
                previous = current;
            }
        }
    }
}
