use chrono::{DateTime, Utc};

/// Source of "now" for stores that keep their own time.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex, PoisonError};

    /// A clock that only moves when told to. Clones share the same time.
    #[derive(Clone, Debug)]
    pub struct MockClock {
        current_time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MockClock {
        pub fn new(initial_time: DateTime<Utc>) -> Self {
            Self {
                current_time: Arc::new(Mutex::new(initial_time)),
            }
        }

        pub fn set_time(&self, time: DateTime<Utc>) {
            *self
                .current_time
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = time;
        }

        pub fn advance(&self, duration: chrono::Duration) {
            let mut time = self
                .current_time
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *time += duration;
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            MockClock::new(Utc::now())
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .current_time
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        }
    }

}
