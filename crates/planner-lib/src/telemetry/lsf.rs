//! LSF queue status via `bqueues -w`

use super::{async_trait, QueueStatusSource};
use crate::error::{PlannerError, Result};
use crate::models::{QueueOccupancy, SubReading};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Default upper bound on one `bqueues` invocation
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LsfQueueStatus {
    program: String,
    timeout: Duration,
}

impl LsfQueueStatus {
    pub fn new() -> Self {
        Self {
            program: "bqueues".to_string(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Run a different executable, e.g. a site wrapper around `bqueues`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for LsfQueueStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStatusSource for LsfQueueStatus {
    async fn queue_status(&self) -> Result<BTreeMap<String, QueueOccupancy>> {
        let output = Command::new(&self.program)
            .arg("-w")
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| {
                PlannerError::sensing(
                    SubReading::Queues,
                    format!("{} timed out after {:?}", self.program, self.timeout),
                )
            })?
            .map_err(|e| PlannerError::sensing(SubReading::Queues, e))?;

        if !output.status.success() {
            return Err(PlannerError::sensing(
                SubReading::Queues,
                format!("{} exited with {}", self.program, output.status),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let queues = parse_bqueues(&stdout);
        debug!(queues = queues.len(), "Parsed queue status");
        Ok(queues)
    }
}

// Column positions, resolved from the header when it names them
struct Columns {
    pending: usize,
    running: usize,
    suspended: usize,
    max: usize,
}

impl Columns {
    const POSITIONAL: Columns = Columns {
        pending: 1,
        running: 2,
        suspended: 3,
        max: 4,
    };

    fn from_header(header: &str) -> Self {
        let names: Vec<&str> = header.split_whitespace().collect();
        let find = |name: &str| names.iter().position(|n| n.eq_ignore_ascii_case(name));

        match (find("PEND"), find("RUN"), find("SUSP")) {
            (Some(pending), Some(running), Some(suspended)) => Columns {
                pending,
                running,
                suspended,
                max: find("MAX").unwrap_or(usize::MAX),
            },
            _ => Self::POSITIONAL,
        }
    }
}

/// Parse `bqueues -w` output into per-queue job counts
///
/// The first line is a header. Non-numeric cells such as `-` count as zero
/// (or as an unpublished limit for the MAX column). Lines too short to hold
/// the counts are skipped.
pub fn parse_bqueues(output: &str) -> BTreeMap<String, QueueOccupancy> {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return BTreeMap::new();
    };
    let columns = Columns::from_header(header);
    let needed = columns.pending.max(columns.running).max(columns.suspended);

    lines
        .filter_map(|line| {
            let cells: Vec<&str> = line.split_whitespace().collect();
            if cells.len() <= needed {
                return None;
            }
            let count = |i: usize| cells.get(i).and_then(|c| c.parse::<u32>().ok());
            Some((
                cells[0].to_string(),
                QueueOccupancy {
                    pending: count(columns.pending).unwrap_or(0),
                    running: count(columns.running).unwrap_or(0),
                    suspended: count(columns.suspended).unwrap_or(0),
                    max_jobs: count(columns.max),
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_standard_header() {
        let output = "\
QUEUE_NAME      PRIO STATUS          MAX JL/U JL/P JL/H NJOBS  PEND   RUN  SUSP
hiprio           50  Open:Active       -    -    -    -    12     4     8     0
normal           30  Open:Active     100    -    -    -    57    27    30     0
";
        let queues = parse_bqueues(output);

        assert_eq!(queues.len(), 2);
        assert_eq!(
            queues["normal"],
            QueueOccupancy {
                pending: 27,
                running: 30,
                suspended: 0,
                max_jobs: Some(100),
            }
        );
        assert_eq!(queues["hiprio"].max_jobs, None);
        assert_eq!(queues["hiprio"].running, 8);
    }

    #[test]
    fn test_parse_positional_fallback() {
        let output = "NAME A B C D E\nlong 3 7 1 20 8\nshort x 2 - - -\n";
        let queues = parse_bqueues(output);

        assert_eq!(queues["long"].pending, 3);
        assert_eq!(queues["long"].max_jobs, Some(20));
        assert_eq!(queues["short"].pending, 0);
        assert_eq!(queues["short"].suspended, 0);
    }

    #[test]
    fn test_parse_skips_short_and_empty_lines() {
        assert!(parse_bqueues("").is_empty());
        let queues = parse_bqueues("QUEUE_NAME PEND RUN SUSP\n\nbroken 1\nok 1 2 3\n");
        assert_eq!(queues.len(), 1);
        assert_eq!(queues["ok"].suspended, 3);
    }

    #[tokio::test]
    async fn test_missing_program_is_sensing_error() {
        let source = LsfQueueStatus::new().with_program("definitely-not-a-real-bqueues");
        assert!(matches!(
            source.queue_status().await,
            Err(PlannerError::Sensing {
                reading: SubReading::Queues,
                ..
            })
        ));
    }
}
