use crate::error::TimetableError;
use crate::model::PairSlot;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Start and end of one pair, as `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairTime {
    pub pair: u8,
    pub start: String,
    pub end: String,
}

/// The bell schedule: which wall-clock times each pair occupies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairTimes(Vec<PairTime>);

impl PairTimes {
    pub fn new(times: Vec<PairTime>) -> Result<Self, TimetableError> {
        let times = Self(times);
        times.validate()?;
        Ok(times)
    }

    pub fn validate(&self) -> Result<(), TimetableError> {
        for time in &self.0 {
            PairSlot::new(time.pair)?;
            for value in [&time.start, &time.end] {
                NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| TimetableError::Config {
                    message: format!("pair {} has invalid time {:?}", time.pair, value),
                })?;
            }
        }
        Ok(())
    }

    /// Pair whose start time equals `start` to the minute.
    pub fn pair_for_start(&self, start: NaiveTime) -> Option<PairSlot> {
        let key = start.format("%H:%M").to_string();
        self.0
            .iter()
            .find(|t| t.start == key)
            .and_then(|t| PairSlot::new(t.pair).ok())
    }

    /// `(start, end)` strings of a pair. Unknown pairs yield `("00:00", "00:00")`.
    pub fn bounds(&self, pair: PairSlot) -> (String, String) {
        self.0
            .iter()
            .find(|t| t.pair == pair.get())
            .map(|t| (t.start.clone(), t.end.clone()))
            .unwrap_or_else(|| ("00:00".to_string(), "00:00".to_string()))
    }
}

impl Default for PairTimes {
    fn default() -> Self {
        let table = [
            (1, "09:00", "10:30"),
            (2, "10:40", "12:10"),
            (3, "12:40", "14:10"),
            (4, "14:20", "15:50"),
            (5, "16:20", "17:50"),
            (6, "18:00", "19:30"),
            (7, "19:40", "21:10"),
        ];
        Self(
            table
                .into_iter()
                .map(|(pair, start, end)| PairTime {
                    pair,
                    start: start.to_string(),
                    end: end.to_string(),
                })
                .collect(),
        )
    }
}
