/// Returns `Ok(Pump::Pending)` from the enclosing function if the poll is not ready.
macro_rules! pump_ready {
    ($e:expr) => {
        match $e {
            ::std::task::Poll::Ready(x) => x,
            ::std::task::Poll::Pending =>
                return ::std::result::Result::Ok($crate::transport::Pump::Pending),
        }
    }
}

/// Outcome of one step of a state machine that is driven by the connection future.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Pump {
    /// Some progress was made, the step should be repeated.
    Progress,
    /// Nothing more can be done until we are woken up.
    Pending,
}

impl Pump {
    pub fn is_progress(self) -> bool {
        matches!(self, Pump::Progress)
    }
}

impl std::ops::BitOrAssign for Pump {
    fn bitor_assign(&mut self, rhs: Pump) {
        if rhs.is_progress() {
            *self = Pump::Progress;
        }
    }
}
