//! The alert fabric: sink abstraction, severity routing, and transports.

mod pagerduty;
mod router;
mod sink;
mod slack;

pub use pagerduty::PagerDutySink;
pub use router::{AlertRouter, RouterSettings, RoutingTable};
pub use sink::{Alert, AlertSink, CollectingAlertSink, SinkStatus};
pub use slack::SlackSink;
