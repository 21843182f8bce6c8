use sensor_proto::protocol::SensorRecord;

/// Derive the display list from a registry snapshot: connected records only
/// when the flag is set, the full set otherwise.  Pure; input order is
/// preserved.
pub fn project(records: &[SensorRecord], connected_only: bool) -> Vec<SensorRecord> {
    records
        .iter()
        .filter(|record| !connected_only || record.connected)
        .cloned()
        .collect()
}
