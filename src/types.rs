use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Scheduling priority requested for the threads of a working line.
///
/// std threads expose no portable priority control, so the value is carried
/// through configuration, logs and [`WorkingLine::priority`] without being
/// applied to the OS thread.
///
/// [`WorkingLine::priority`]: crate::engine::WorkingLine::priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPriority {
    Lowest,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    Highest,
}

impl FromStr for ThreadPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "lowest" => Ok(ThreadPriority::Lowest),
            "below_normal" => Ok(ThreadPriority::BelowNormal),
            "normal" => Ok(ThreadPriority::Normal),
            "above_normal" => Ok(ThreadPriority::AboveNormal),
            "highest" => Ok(ThreadPriority::Highest),
            other => Err(format!(
                "invalid thread priority: {other} (expected lowest, below_normal, normal, above_normal or highest)"
            )),
        }
    }
}

impl fmt::Display for ThreadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadPriority::Lowest => "lowest",
            ThreadPriority::BelowNormal => "below_normal",
            ThreadPriority::Normal => "normal",
            ThreadPriority::AboveNormal => "above_normal",
            ThreadPriority::Highest => "highest",
        };
        f.write_str(name)
    }
}
