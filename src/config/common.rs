use super::fields;
use crate::error::{Result, SwarmError};
use crate::piece::PieceLayout;
use std::time::Duration;

/// Parameters shared by every peer in the swarm (`Common.cfg`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonConfig {
    pub preferred_neighbors: usize,
    pub unchoking_interval: Duration,
    pub optimistic_unchoking_interval: Duration,
    pub file_name: String,
    pub file_size: u64,
    pub piece_size: u64,
}

impl CommonConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let mut preferred = None;
        let mut unchoking = None;
        let mut optimistic = None;
        let mut file_name = None;
        let mut file_size = None;
        let mut piece_size = None;

        for (number, line) in text.lines().enumerate() {
            let Some(fields) = fields(line) else {
                continue;
            };
            let [key, value] = fields[..] else {
                return Err(SwarmError::ConfigError(format!(
                    "Line {}: expected `Key Value`, got {:?}",
                    number + 1,
                    line.trim()
                )));
            };

            match key {
                "NumberOfPreferredNeighbors" => preferred = Some(positive(key, value)?),
                "UnchokingInterval" => unchoking = Some(positive(key, value)?),
                "OptimisticUnchokingInterval" => optimistic = Some(positive(key, value)?),
                "FileName" => file_name = Some(value.to_string()),
                "FileSize" => file_size = Some(positive(key, value)?),
                "PieceSize" => piece_size = Some(positive(key, value)?),
                _ => {
                    return Err(SwarmError::ConfigError(format!(
                        "Line {}: unknown key {}",
                        number + 1,
                        key
                    )))
                }
            }
        }

        Ok(Self {
            preferred_neighbors: required("NumberOfPreferredNeighbors", preferred)? as usize,
            unchoking_interval: Duration::from_secs(required("UnchokingInterval", unchoking)?),
            optimistic_unchoking_interval: Duration::from_secs(required(
                "OptimisticUnchokingInterval",
                optimistic,
            )?),
            file_name: required("FileName", file_name)?,
            file_size: required("FileSize", file_size)?,
            piece_size: required("PieceSize", piece_size)?,
        })
    }

    pub fn layout(&self) -> PieceLayout {
        PieceLayout::new(self.piece_size, self.file_size)
    }
}

fn positive(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| SwarmError::ConfigError(format!("{} must be a positive integer, got {}", key, value)))
}

fn required<T>(key: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| SwarmError::ConfigError(format!("Missing {}", key)))
}
