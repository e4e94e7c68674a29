use std::time::Duration;

use rama::error::BoxError;

use super::EventProcessor;
use crate::event::Event;

/// Stand-in for downstream work: waits `work` per event and fails
/// a `fault_rate` fraction of the events.
#[derive(Debug, Clone)]
pub struct SimulatedProcessor {
    work: Duration,
    fault_rate: f64,
}

impl SimulatedProcessor {
    pub fn new(work: Duration, fault_rate: f64) -> Self {
        Self {
            work,
            fault_rate: if fault_rate.is_nan() {
                0.0
            } else {
                fault_rate.clamp(0.0, 1.0)
            },
        }
    }
}

impl Default for SimulatedProcessor {
    fn default() -> Self {
        Self::new(Duration::from_millis(1), 0.0)
    }
}

impl EventProcessor for SimulatedProcessor {
    async fn process(&self, event: &Event) -> Result<(), BoxError> {
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }

        if self.fault_rate > 0.0 && rand::random_bool(self.fault_rate) {
            return Err(BoxError::from(format!(
                "simulated downstream fault for event of type {:?}",
                event.event_type().unwrap_or("<unknown>"),
            )));
        }

        Ok(())
    }
}
