//! Time related functions and types.
//!
//! It's usually a good idea to control where the time comes from in an
//! application so that it can be mocked for testing and controlled in
//! production so we get the intended behavior without relying on the specific
//! time of the underlying system.
//!
//! Clocks use the type [`DurationSinceUnixEpoch`] which is a
//! `std::time::Duration` since the Unix Epoch (timestamp).
use std::time::Duration;

/// Duration since the Unix Epoch.
pub type DurationSinceUnixEpoch = Duration;

/// A generic structure that represents a clock.
///
/// It can be either the working clock (production) or the stopped clock
/// (testing). It implements the [`Time`] trait, which gives you the current
/// time.
#[derive(Debug)]
pub struct Clock<T> {
    clock: std::marker::PhantomData<T>,
}

/// The working clock. It returns the current time.
pub type Working = Clock<WorkingClock>;
/// The stopped clock. It returns always the same fixed time.
pub type Stopped = Clock<StoppedClock>;

/// Trait for types that can be used as a timestamp clock.
pub trait Time: Sized {
    fn now() -> DurationSinceUnixEpoch;

    #[must_use]
    fn now_add(add_time: &Duration) -> Option<DurationSinceUnixEpoch> {
        Self::now().checked_add(*add_time)
    }

    #[must_use]
    fn now_sub(sub_time: &Duration) -> Option<DurationSinceUnixEpoch> {
        Self::now().checked_sub(*sub_time)
    }
}

#[derive(Debug)]
pub struct WorkingClock;

impl Time for Working {
    fn now() -> DurationSinceUnixEpoch {
        std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .expect("the system time is before the Unix Epoch")
    }
}

/// Trait for types that can be used as a timestamp clock stopped at a given
/// time. Only the local thread is affected, so parallel tests do not step on
/// each other.
pub trait StoppedTime: Time {
    /// It sets the clock to a given time.
    fn local_set(unix_time: &DurationSinceUnixEpoch);

    /// It sets the clock to the Unix Epoch.
    fn local_set_to_unix_epoch() {
        Self::local_set(&DurationSinceUnixEpoch::ZERO);
    }

    /// It adds a `Duration` to the clock.
    fn local_add(duration: &Duration);

    /// It subtracts a `Duration` from the clock.
    fn local_sub(duration: &Duration);
}

#[derive(Debug)]
pub struct StoppedClock;

impl Time for Stopped {
    fn now() -> DurationSinceUnixEpoch {
        detail::FIXED_TIME.with(|time| *time.borrow())
    }
}

impl StoppedTime for Stopped {
    fn local_set(unix_time: &DurationSinceUnixEpoch) {
        detail::FIXED_TIME.with(|time| {
            *time.borrow_mut() = *unix_time;
        });
    }

    fn local_add(duration: &Duration) {
        detail::FIXED_TIME.with(|time| {
            let current = *time.borrow();
            *time.borrow_mut() = current.checked_add(*duration).expect("fixed time overflow");
        });
    }

    fn local_sub(duration: &Duration) {
        detail::FIXED_TIME.with(|time| {
            let current = *time.borrow();
            *time.borrow_mut() = current.checked_sub(*duration).expect("fixed time underflow");
        });
    }
}

mod detail {
    use std::cell::RefCell;

    use super::DurationSinceUnixEpoch;

    thread_local!(pub static FIXED_TIME: RefCell<DurationSinceUnixEpoch> = const { RefCell::new(DurationSinceUnixEpoch::ZERO) });
}
