//! Log domain types

use serde::{Deserialize, Serialize};

/// A numbered fragment of one job's console output
///
/// Parts are produced by a job's log writer, buffered by a sink and posted
/// to the log aggregator as a JSON array. `number` is assigned by the writer
/// and strictly increases per job, starting at 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPart {
    pub job_id: u64,
    pub content: String,
    pub number: u64,
    #[serde(rename = "final")]
    pub is_final: bool,
}

impl LogPart {
    /// Creates a regular (non-final) part
    pub fn new(job_id: u64, number: u64, content: impl Into<String>) -> Self {
        Self {
            job_id,
            content: content.into(),
            number,
            is_final: false,
        }
    }

    /// Creates the terminal part of a job's stream
    pub fn final_part(job_id: u64, number: u64, content: impl Into<String>) -> Self {
        Self {
            job_id,
            content: content.into(),
            number,
            is_final: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_part_wire_format() {
        let part = LogPart::new(4, 3, "wat");
        let json = serde_json::to_value(&part).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "job_id": 4,
                "content": "wat",
                "number": 3,
                "final": false,
            })
        );
    }

    #[test]
    fn test_final_part_sets_flag() {
        let part = LogPart::final_part(7, 12, "");
        assert!(part.is_final);
        assert_eq!(part.number, 12);
        assert!(part.content.is_empty());
    }
}
