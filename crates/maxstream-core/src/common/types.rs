//! # Session State Shared by Both Ends
//!
//! Each `Max` call owns exactly one piece of state on each side:
//!
//! - [`RunningMax`] on the server: the largest value received so far. It only
//!   ever moves up, and each move up is reported to the caller.
//! - [`ObservedMax`] on the client: the last maximum the server reported.
//!
//! Neither type is shared across calls. Both start out unset, so the first
//! value of a call is always reported no matter how small it is.

use core::fmt;

/// The largest value received during one call.
///
/// Starts unset and is updated through [`RunningMax::observe`], which returns
/// the new maximum only when it strictly increased. This is the only way to
/// change the value, so it is non-decreasing for the lifetime of the call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunningMax {
    current: Option<i32>,
}

impl RunningMax {
    pub const fn new() -> Self {
        Self { current: None }
    }

    /// Folds `num` into the maximum.
    ///
    /// Returns `Some(new_max)` if `num` strictly increased the maximum (or is
    /// the first value), `None` if the maximum is unchanged. Callers emit an
    /// update exactly when this returns `Some`.
    pub fn observe(&mut self, num: i32) -> Option<i32> {
        match self.current {
            Some(max) if num <= max => None,
            _ => {
                self.current = Some(num);
                self.current
            }
        }
    }

    pub const fn get(&self) -> Option<i32> {
        self.current
    }
}

/// The last maximum a client received from the server.
///
/// Mirrors the most recent `MaxMessage` and is read once the call has
/// finished. Stays unset if the server never reported anything.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObservedMax(Option<i32>);

impl ObservedMax {
    pub const fn new() -> Self {
        Self(None)
    }

    pub fn record(&mut self, result: i32) {
        self.0 = Some(result);
    }

    pub const fn get(&self) -> Option<i32> {
        self.0
    }
}

impl fmt::Display for ObservedMax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(max) => write!(f, "{max}"),
            None => f.write_str("unset"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitted(values: &[i32]) -> Vec<i32> {
        let mut max = RunningMax::new();
        values.iter().filter_map(|&v| max.observe(v)).collect()
    }

    #[test]
    fn emits_only_strict_increases() {
        assert_eq!(emitted(&[3, 1, 4, 1, 5, 9, 2, 6]), vec![3, 4, 5, 9]);
    }

    #[test]
    fn first_value_is_always_reported() {
        assert_eq!(emitted(&[0]), vec![0]);
        assert_eq!(emitted(&[i32::MIN]), vec![i32::MIN]);
        assert_eq!(emitted(&[-7, -9, -3]), vec![-7, -3]);
    }

    #[test]
    fn repeated_maximum_is_not_reported_twice() {
        assert_eq!(emitted(&[5, 5, 5]), vec![5]);
    }

    #[test]
    fn never_decreases() {
        let mut max = RunningMax::new();
        let mut last = None;
        for v in [10, -4, 7, 22, 22, 3, 40, i32::MIN, 39] {
            max.observe(v);
            assert!(max.get() >= last);
            last = max.get();
        }
        assert_eq!(max.get(), Some(40));
    }

    #[test]
    fn unset_until_first_value() {
        let max = RunningMax::new();
        assert_eq!(max.get(), None);
        assert_eq!(ObservedMax::new().to_string(), "unset");
    }

    #[test]
    fn observed_max_keeps_latest() {
        let mut observed = ObservedMax::new();
        observed.record(3);
        observed.record(9);
        assert_eq!(observed.get(), Some(9));
        assert_eq!(observed.to_string(), "9");
    }
}
