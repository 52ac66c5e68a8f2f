use std::fmt;
use std::time::Duration;

/// A point-in-time report of a bucket, taken right after a drain.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub capacity: usize,
    pub leak_quantity: usize,
    pub leak_interval: Duration,
    /// Items currently held by the bucket.
    pub level: usize,
    /// Estimated wait until the next slot frees up, `None` if one is free now.
    pub next_slot: Option<Duration>,
}

impl Status {
    pub fn has_capacity(&self) -> bool {
        self.next_slot.is_none()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bucket capacity: {}", self.capacity)?;
        writeln!(
            f,
            "Bucket leaks {} items every {:.3} seconds",
            self.leak_quantity,
            self.leak_interval.as_secs_f64()
        )?;
        writeln!(f, "Currently holding {} items", self.level)?;
        match self.next_slot {
            None => write!(f, "Bucket has capacity now!"),
            Some(wait) => write!(
                f,
                "Next slot will be open in {:.3} seconds",
                wait.as_secs_f64()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_reports_available_capacity() {
        let status = Status {
            capacity: 5,
            leak_quantity: 1,
            leak_interval: Duration::from_millis(1500),
            level: 2,
            next_slot: None,
        };

        assert!(status.has_capacity());
        assert_eq!(
            status.to_string(),
            "Bucket capacity: 5\n\
             Bucket leaks 1 items every 1.500 seconds\n\
             Currently holding 2 items\n\
             Bucket has capacity now!"
        );
    }

    #[test]
    fn it_reports_time_to_next_slot() {
        let status = Status {
            capacity: 1,
            leak_quantity: 2,
            leak_interval: Duration::from_secs(1),
            level: 1,
            next_slot: Some(Duration::from_millis(250)),
        };

        assert!(!status.has_capacity());
        assert!(
            status
                .to_string()
                .ends_with("Next slot will be open in 0.250 seconds")
        );
    }
}
