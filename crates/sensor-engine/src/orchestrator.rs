//! Toggle orchestration: one user intent becomes an outbound command plus an
//! immediate optimistic merge, in that order.

use sensor_proto::protocol::{Command, CommandVerb, SensorRecord, SensorUpdate};
use tracing::debug;

use crate::error::TransportError;
use crate::registry::SensorRegistry;

/// Seam between orchestration and the channel, so toggle logic is testable
/// without a socket.  [`crate::transport::ChannelTransport`] is the real
/// implementation.
#[allow(async_fn_in_trait)]
pub trait CommandSink {
    async fn deliver(&mut self, command: &Command) -> Result<(), TransportError>;
}

/// What a toggle did: the command it sent (or tried to), the record after the
/// optimistic merge, and the delivery result.
#[derive(Debug)]
pub struct ToggleOutcome {
    pub command: Command,
    pub record: SensorRecord,
    pub delivery: Result<(), TransportError>,
}

/// Flip a sensor's connection.
///
/// The verb is derived from the *pre-toggle* state (an unknown id counts as
/// disconnected): `connect` when currently disconnected, `disconnect` when
/// connected.  The command goes out first, then `{connected: !previous}` is
/// merged locally so the view reflects intent without waiting for the server.
/// A delivery failure is returned in the outcome but never blocks the merge;
/// until an authoritative update arrives the local state may diverge from
/// server truth, and whichever update merges last wins.
pub async fn toggle<S: CommandSink>(
    registry: &SensorRegistry,
    sink: &mut S,
    id: &str,
) -> ToggleOutcome {
    let was_connected = registry
        .get(id)
        .await
        .map(|record| record.connected)
        .unwrap_or(false);

    let verb = if was_connected {
        CommandVerb::Disconnect
    } else {
        CommandVerb::Connect
    };
    let command = Command::new(verb, id);
    debug!("toggle '{}': {:?} (was connected: {})", id, verb, was_connected);

    let delivery = sink.deliver(&command).await;
    let record = registry
        .merge(&SensorUpdate::connected(id, !was_connected))
        .await;

    ToggleOutcome {
        command,
        record,
        delivery,
    }
}
