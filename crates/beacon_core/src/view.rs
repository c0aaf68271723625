use crate::envelope::{JobCompleted, JobQueued, JobStarted, Status};
use crate::route::{Query, Route, RunRef};
use crate::state::ClockSkew;

/// How a `status` message reaches a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDelivery {
    /// First status on a fresh connection: perform full setup.
    Bind,
    /// Status re-delivered on an already bound connection.
    Refresh,
}

/// Requests a view makes of the navigation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEffect {
    /// Reopen the current route's channel with new list parameters.
    Requery(Query),
    /// Replace the current route with another path.
    Redirect(String),
    /// Start streaming a run's console output, replacing any current session.
    OpenLog(RunRef),
    AbortLog,
}

/// Result of offering a message to an optional view capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    Unhandled,
    Handled(Vec<ViewEffect>),
}

impl Reaction {
    pub fn handled() -> Self {
        Reaction::Handled(Vec::new())
    }
}

/// A dashboard page handler.
///
/// `status` is mandatory; every other capability defaults to
/// [`Reaction::Unhandled`], which the dispatcher treats as a silent drop.
pub trait View {
    fn status(&mut self, status: &Status, delivery: StatusDelivery) -> Vec<ViewEffect>;

    fn job_queued(&mut self, _job: &JobQueued) -> Reaction {
        Reaction::Unhandled
    }

    fn job_started(&mut self, _job: &JobStarted) -> Reaction {
        Reaction::Unhandled
    }

    fn job_completed(&mut self, _job: &JobCompleted) -> Reaction {
        Reaction::Unhandled
    }

    /// A user command aimed at the current page (pagination, sorting).
    fn input(&mut self, _command: &str) -> Reaction {
        Reaction::Unhandled
    }

    /// Appends rendered console markup.
    fn log_output(&mut self, _markup: &str) {}

    /// The console output is complete and fully appended.
    fn log_complete(&mut self) {}
}

/// Builds the view for a route on navigation-enter.
pub trait ViewFactory {
    /// `skew` is the process-wide clock skew; views keep a clone of it for
    /// progress estimates.
    fn create(&mut self, route: &Route, skew: &ClockSkew) -> Box<dyn View>;
}

impl<F> ViewFactory for F
where
    F: FnMut(&Route, &ClockSkew) -> Box<dyn View>,
{
    fn create(&mut self, route: &Route, skew: &ClockSkew) -> Box<dyn View> {
        self(route, skew)
    }
}
