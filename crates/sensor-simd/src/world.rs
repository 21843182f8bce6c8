//! Simulated sensor fleet.  Shared between the core loop (which mutates it)
//! and the socket server (which snapshots it for newly connected clients).

use sensor_proto::protocol::{CommandVerb, SensorRecord, SensorUpdate};
use std::sync::Arc;
use tokio::sync::RwLock;

struct SimSensor {
    record: SensorRecord,
    /// Current underlying reading; `record.value` is its rendered form.
    level: f64,
    /// Max random-walk step per tick.
    step: f64,
}

impl SimSensor {
    fn seed(id: &str, name: &str, unit: &str, level: f64, step: f64, connected: bool) -> Self {
        let value = if connected {
            format!("{:.1}", level)
        } else {
            String::new()
        };
        Self {
            record: SensorRecord {
                id: id.to_string(),
                name: name.to_string(),
                connected,
                unit: unit.to_string(),
                value,
            },
            level,
            step,
        }
    }
}

#[derive(Clone)]
pub struct SensorWorld {
    sensors: Arc<RwLock<Vec<SimSensor>>>,
}

impl SensorWorld {
    pub fn seeded() -> Self {
        let sensors = vec![
            SimSensor::seed("temp-green", "Greenhouse Temp", "°C", 21.0, 0.3, true),
            SimSensor::seed("temp-cellar", "Cellar Temp", "°C", 12.0, 0.2, true),
            SimSensor::seed("hum-green", "Greenhouse Humidity", "%", 64.0, 1.0, true),
            SimSensor::seed("press-roof", "Roof Pressure", "hPa", 1013.0, 0.5, false),
            SimSensor::seed("co2-lab", "Lab CO2", "ppm", 420.0, 5.0, false),
        ];
        Self {
            sensors: Arc::new(RwLock::new(sensors)),
        }
    }

    /// Full records for every sensor, pushed to each client on connect.
    pub async fn snapshot(&self) -> Vec<SensorRecord> {
        self.sensors
            .read()
            .await
            .iter()
            .map(|s| s.record.clone())
            .collect()
    }

    /// Apply a client command.  Connecting restores the rendered reading,
    /// disconnecting clears it.  Returns the update to broadcast, or None
    /// for an unknown id.
    pub async fn apply_command(&self, id: &str, verb: CommandVerb) -> Option<SensorUpdate> {
        let mut sensors = self.sensors.write().await;
        let sensor = sensors.iter_mut().find(|s| s.record.id == id)?;

        let connect = verb == CommandVerb::Connect;
        sensor.record.connected = connect;
        sensor.record.value = if connect {
            format!("{:.1}", sensor.level)
        } else {
            String::new()
        };

        Some(SensorUpdate {
            connected: Some(connect),
            value: Some(sensor.record.value.clone()),
            ..SensorUpdate::bare(id)
        })
    }

    /// One random-walk tick: every connected sensor drifts and reports a new
    /// reading.
    pub async fn walk(&self) -> Vec<SensorUpdate> {
        use rand::Rng;

        let mut sensors = self.sensors.write().await;
        let mut rng = rand::thread_rng();
        let mut updates = Vec::new();

        for sensor in sensors.iter_mut().filter(|s| s.record.connected) {
            sensor.level += rng.gen_range(-sensor.step..=sensor.step);
            sensor.record.value = format!("{:.1}", sensor.level);
            updates.push(SensorUpdate {
                value: Some(sensor.record.value.clone()),
                ..SensorUpdate::bare(sensor.record.id.clone())
            });
        }

        updates
    }
}
