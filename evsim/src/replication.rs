use std::sync::Arc;

use crate::{error::SimError, time::SimTime};

/// Time bounds of one replication, validated by [`ReplicationBuilder`].
#[derive(Debug, Clone)]
pub struct Replication<T: SimTime> {
    id: Arc<str>,
    start_time: T,
    warmup_period: T::Duration,
    run_length: T::Duration,
    number_of_replications: u32,
}

impl<T: SimTime> Replication<T> {
    pub fn builder(id: impl Into<String>) -> ReplicationBuilder<T> {
        ReplicationBuilder::new(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn shared_id(&self) -> Arc<str> {
        Arc::clone(&self.id)
    }

    pub fn start_time(&self) -> T {
        self.start_time
    }

    pub fn warmup_period(&self) -> T::Duration {
        self.warmup_period
    }

    pub fn run_length(&self) -> T::Duration {
        self.run_length
    }

    pub fn number_of_replications(&self) -> u32 {
        self.number_of_replications
    }

    pub fn warmup_time(&self) -> T {
        self.start_time.add_duration(self.warmup_period)
    }

    pub fn end_time(&self) -> T {
        self.start_time.add_duration(self.run_length)
    }

    /// same bounds under another id, used for the runs of an experiment
    pub(crate) fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: Arc::from(id.into()),
            ..self.clone()
        }
    }
}

/// builder for a replication descriptor
pub struct ReplicationBuilder<T: SimTime> {
    id: String,
    start_time: T,
    warmup_period: T::Duration,
    run_length: Option<T::Duration>,
    number_of_replications: u32,
}

impl<T: SimTime> ReplicationBuilder<T> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_time: T::zero(),
            warmup_period: T::zero_duration(),
            run_length: None,
            number_of_replications: 1,
        }
    }

    pub fn start_time(mut self, start: T) -> Self {
        self.start_time = start;
        self
    }

    pub fn warmup_period(mut self, warmup: T::Duration) -> Self {
        self.warmup_period = warmup;
        self
    }

    pub fn run_length(mut self, length: T::Duration) -> Self {
        self.run_length = Some(length);
        self
    }

    pub fn number_of_replications(mut self, n: u32) -> Self {
        self.number_of_replications = n;
        self
    }

    pub fn build(self) -> Result<Replication<T>, SimError> {
        let zero = T::zero_duration();
        // written so that NaN fails every check
        if !(self.warmup_period >= zero) {
            return Err(SimError::InvalidArgument(format!(
                "warmup period must be >= 0, got {}",
                self.warmup_period
            )));
        }
        let run_length = self
            .run_length
            .ok_or_else(|| SimError::InvalidArgument("run length is required".into()))?;
        if !(run_length > zero) {
            return Err(SimError::InvalidArgument(format!(
                "run length must be > 0, got {run_length}"
            )));
        }
        if self.number_of_replications < 1 {
            return Err(SimError::InvalidArgument(
                "number of replications must be >= 1".into(),
            ));
        }
        Ok(Replication {
            id: Arc::from(self.id),
            start_time: self.start_time,
            warmup_period: self.warmup_period,
            run_length,
            number_of_replications: self.number_of_replications,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{SimTimeDouble, SimTimeLong};

    #[test]
    fn derives_bounds() {
        let rep = Replication::<SimTimeLong>::builder("base")
            .start_time(SimTimeLong(100))
            .warmup_period(10)
            .run_length(50)
            .build()
            .unwrap();
        assert_eq!(rep.id(), "base");
        assert_eq!(rep.warmup_time(), SimTimeLong(110));
        assert_eq!(rep.end_time(), SimTimeLong(150));
        assert_eq!(rep.number_of_replications(), 1);
    }

    #[test]
    fn rejects_invalid_descriptors() {
        let negative_warmup = Replication::<SimTimeLong>::builder("r")
            .warmup_period(-1)
            .run_length(10)
            .build();
        assert!(matches!(negative_warmup, Err(SimError::InvalidArgument(_))));

        let zero_length = Replication::<SimTimeLong>::builder("r").run_length(0).build();
        assert!(matches!(zero_length, Err(SimError::InvalidArgument(_))));

        let missing_length = Replication::<SimTimeLong>::builder("r").build();
        assert!(missing_length.is_err());

        let no_runs = Replication::<SimTimeLong>::builder("r")
            .run_length(10)
            .number_of_replications(0)
            .build();
        assert!(matches!(no_runs, Err(SimError::InvalidArgument(_))));

        let nan_length = Replication::<SimTimeDouble>::builder("r")
            .run_length(f64::NAN)
            .build();
        assert!(nan_length.is_err());
    }

    #[test]
    fn renamed_copy_keeps_bounds() {
        let rep = Replication::<SimTimeLong>::builder("exp")
            .run_length(7)
            .number_of_replications(3)
            .build()
            .unwrap();
        let run = rep.with_id("exp.2");
        assert_eq!(run.id(), "exp.2");
        assert_eq!(run.end_time(), rep.end_time());
    }
}
