use beacon_logging::{beacon_error, beacon_trace};

use crate::envelope::Envelope;
use crate::view::{Reaction, StatusDelivery, View, ViewEffect};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Delivered(Vec<ViewEffect>),
    /// Unknown type, or the view lacks the capability.
    Ignored,
    /// No view was bound; a lifecycle ordering defect upstream.
    NoView,
}

/// Routes an envelope to the matching capability of `view`.
///
/// Runs synchronously so handlers observe messages in arrival order.
pub fn dispatch(view: Option<&mut dyn View>, envelope: &Envelope) -> Dispatched {
    let Some(view) = view else {
        beacon_error!(
            "`{}` message arrived with no bound view; dropping it",
            envelope.kind()
        );
        return Dispatched::NoView;
    };

    let reaction = match envelope {
        Envelope::Status(status) => {
            Reaction::Handled(view.status(status, StatusDelivery::Refresh))
        }
        Envelope::JobQueued(job) => view.job_queued(job),
        Envelope::JobStarted(job) => view.job_started(job),
        Envelope::JobCompleted(job) => view.job_completed(job),
        Envelope::Unknown { kind, .. } => {
            beacon_trace!("ignoring message of unknown type `{}`", kind);
            Reaction::Unhandled
        }
    };

    match reaction {
        Reaction::Handled(effects) => Dispatched::Delivered(effects),
        Reaction::Unhandled => Dispatched::Ignored,
    }
}
