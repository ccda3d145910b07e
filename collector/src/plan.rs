//! Resolution of the configured timeframe list into a validated schedule.

use shared::{ConfigError, Timeframe, TimeframeEntry};
use std::collections::HashMap;
use std::fmt;

/// Where the candles of a scheduled timeframe come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeframeSource {
    /// Fetched from the exchange
    Native,
    /// Aggregated from `ratio` consecutive candles of `source`
    Derived { source: Timeframe, ratio: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanEntry {
    pub timeframe: Timeframe,
    pub source: TimeframeSource,
}

impl fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            TimeframeSource::Native => write!(f, "{}", self.timeframe),
            TimeframeSource::Derived { source, ratio } => {
                write!(f, "{} (= {} x {})", self.timeframe, ratio, source)
            }
        }
    }
}

/// Ordered, validated schedule of timeframes for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPlan {
    entries: Vec<PlanEntry>,
}

impl CollectionPlan {
    /// Validates the configured order. Every derived entry must come after a
    /// native source whose duration divides its own.
    pub fn resolve(configured: &[TimeframeEntry]) -> Result<Self, ConfigError> {
        if configured.is_empty() {
            return Err(ConfigError::Empty("timeframes"));
        }

        let positions: HashMap<Timeframe, usize> = configured
            .iter()
            .enumerate()
            .map(|(i, e)| (e.timeframe, i))
            .collect();
        if positions.len() != configured.len() {
            let mut seen = Vec::new();
            for entry in configured {
                if seen.contains(&entry.timeframe) {
                    return Err(ConfigError::DuplicateTimeframe(entry.timeframe));
                }
                seen.push(entry.timeframe);
            }
        }

        let mut entries = Vec::with_capacity(configured.len());
        for (position, entry) in configured.iter().enumerate() {
            let derived = entry.timeframe;
            let source = match entry.source {
                Some(source) => source,
                None if derived.is_native() => {
                    entries.push(PlanEntry {
                        timeframe: derived,
                        source: TimeframeSource::Native,
                    });
                    continue;
                }
                None => derived
                    .default_source()
                    .ok_or(ConfigError::NoSource(derived))?,
            };

            let source_position = *positions
                .get(&source)
                .ok_or(ConfigError::SourceNotConfigured {
                    derived,
                    base: source,
                })?;
            if source_position > position {
                return Err(ConfigError::SourceScheduledAfter {
                    derived,
                    base: source,
                });
            }
            let source_entry = &configured[source_position];
            if source_entry.source.is_some() || !source.is_native() {
                return Err(ConfigError::SourceNotNative {
                    derived,
                    base: source,
                });
            }

            let (derived_ms, source_ms) = (derived.duration_ms(), source.duration_ms());
            if derived_ms % source_ms != 0 || derived_ms / source_ms < 2 {
                return Err(ConfigError::InvalidRatio {
                    derived,
                    base: source,
                });
            }
            entries.push(PlanEntry {
                timeframe: derived,
                source: TimeframeSource::Derived {
                    source,
                    ratio: (derived_ms / source_ms) as u32,
                },
            });
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn timeframes(&self) -> impl Iterator<Item = Timeframe> + '_ {
        self.entries.iter().map(|e| e.timeframe)
    }
}

impl fmt::Display for CollectionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.entries.iter().map(|e| e.to_string()).collect();
        f.write_str(&parts.join(" -> "))
    }
}
