//! Message dispatch policy.
//!
//! The router holds no state of its own. Registration frames mutate the
//! [`Registry`]; control frames are resolved against it and handed to the
//! [`ConnectionManager`] for delivery. Nothing is buffered or retried: a
//! frame with nowhere to go is dropped.

use crate::connection::{ConnectionHandle, ConnectionManager, Delivery};
use crate::metrics;
use crate::registry::Registry;
use std::sync::Arc;
use tandem_protocol::{Frame, FrameKind, SessionId};
use tracing::{debug, trace, warn};

/// Why a frame was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The frame carried no `uuid`.
    MissingSession,
    /// `control:set` for a session with no controller.
    UnreachableController,
    /// `control:sync` for a session with no observers.
    NoObservers,
    /// The frame kind is not routable.
    Unroutable,
}

impl DropReason {
    /// Label used for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MissingSession => "missing_session",
            DropReason::UnreachableController => "unreachable_controller",
            DropReason::NoObservers => "no_observers",
            DropReason::Unroutable => "unroutable",
        }
    }
}

/// What the router did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The sender is now the controller of `session`.
    ControllerBound {
        session: SessionId,
        replaced: Option<ConnectionHandle>,
    },
    /// The sender observes `session`. `added` is false on a repeat.
    ObserverAdded { session: SessionId, added: bool },
    /// The frame was handed to `delivered` connections.
    Forwarded { kind: FrameKind, delivered: usize },
    /// The frame went nowhere.
    Dropped(DropReason),
}

/// Dispatch one inbound frame from `from`.
pub fn dispatch(
    registry: &mut Registry,
    connections: &ConnectionManager,
    from: ConnectionHandle,
    frame: Frame,
) -> Dispatch {
    let kind = frame.kind();
    if kind == FrameKind::Unknown {
        debug!(connection = %from, "Unknown frame kind dropped");
        return record(Dispatch::Dropped(DropReason::Unroutable));
    }
    let Some(session) = frame.session().map(str::to_owned) else {
        debug!(connection = %from, kind = %kind, "Frame without session dropped");
        return record(Dispatch::Dropped(DropReason::MissingSession));
    };

    let outcome = match kind {
        FrameKind::ControllerRegister => {
            let replaced = registry.set_controller(&session, from);
            debug!(connection = %from, session = %session, "Controller registered");
            Dispatch::ControllerBound { session, replaced }
        }
        FrameKind::ObserverRegister => {
            let added = registry.add_observer(&session, from);
            debug!(connection = %from, session = %session, added, "Observer registered");
            Dispatch::ObserverAdded { session, added }
        }
        FrameKind::ControlSet => match registry.controller(&session) {
            Some(controller) => {
                let frame = Arc::new(frame);
                let delivered = usize::from(deliver(connections, controller, &frame));
                trace!(
                    connection = %from,
                    session = %session,
                    controller = %controller,
                    "Control command forwarded"
                );
                Dispatch::Forwarded { kind, delivered }
            }
            None => {
                warn!(
                    connection = %from,
                    session = %session,
                    "No controller bound, control command dropped"
                );
                Dispatch::Dropped(DropReason::UnreachableController)
            }
        },
        FrameKind::ControlSync => {
            if registry.observer_count(&session) == 0 {
                return record(Dispatch::Dropped(DropReason::NoObservers));
            }
            let frame = Arc::new(frame);
            let delivered = registry
                .observers(&session)
                .filter(|observer| deliver(connections, *observer, &frame))
                .count();
            trace!(
                connection = %from,
                session = %session,
                recipients = delivered,
                "State sync broadcast"
            );
            Dispatch::Forwarded { kind, delivered }
        }
        FrameKind::Unknown => Dispatch::Dropped(DropReason::Unroutable),
    };

    record(outcome)
}

fn deliver(connections: &ConnectionManager, to: ConnectionHandle, frame: &Arc<Frame>) -> bool {
    let delivery = connections.deliver(to, frame);
    metrics::record_delivery(delivery);
    delivery == Delivery::Delivered
}

fn record(outcome: Dispatch) -> Dispatch {
    if let Dispatch::Dropped(reason) = &outcome {
        metrics::record_drop(reason.as_str());
    }
    outcome
}
