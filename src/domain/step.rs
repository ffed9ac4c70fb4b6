//! Lifecycle steps.
//!
//! Every part goes through the same fixed sequence of steps:
//! pull → build → stage → prime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A step in the parts lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Fetch the part source into its source directory
    Pull,

    /// Build the part into its install directory
    Build,

    /// Migrate installed files into the shared stage tree
    Stage,

    /// Migrate staged files into the final prime tree
    Prime,
}

impl Step {
    /// All steps in lifecycle order
    pub const ALL: [Step; 4] = [Step::Pull, Step::Build, Step::Stage, Step::Prime];

    /// Position of this step in the lifecycle
    pub fn index(self) -> usize {
        match self {
            Self::Pull => 0,
            Self::Build => 1,
            Self::Stage => 2,
            Self::Prime => 3,
        }
    }

    /// Steps that run before this one
    pub fn previous_steps(self) -> &'static [Step] {
        &Self::ALL[..self.index()]
    }

    /// Steps that run after this one
    pub fn next_steps(self) -> &'static [Step] {
        &Self::ALL[self.index() + 1..]
    }

    /// Steps from the first one up to and including this one
    pub fn up_to(self) -> &'static [Step] {
        &Self::ALL[..=self.index()]
    }

    /// The step immediately before this one
    pub fn previous(self) -> Option<Step> {
        self.previous_steps().last().copied()
    }

    /// Whether this step writes into a tree shared by all parts
    pub fn is_shared(self) -> bool {
        matches!(self, Self::Stage | Self::Prime)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Build => "build",
            Self::Stage => "stage",
            Self::Prime => "prime",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown step name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown step {0:?} (expected one of: pull, build, stage, prime)")]
pub struct ParseStepError(pub String);

impl FromStr for Step {
    type Err = ParseStepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pull" => Ok(Self::Pull),
            "build" => Ok(Self::Build),
            "stage" => Ok(Self::Stage),
            "prime" => Ok(Self::Prime),
            _ => Err(ParseStepError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order() {
        assert!(Step::Pull < Step::Build);
        assert!(Step::Build < Step::Stage);
        assert!(Step::Stage < Step::Prime);
    }

    #[test]
    fn test_previous_and_next_steps() {
        assert!(Step::Pull.previous_steps().is_empty());
        assert_eq!(Step::Stage.previous_steps(), &[Step::Pull, Step::Build]);
        assert_eq!(Step::Build.next_steps(), &[Step::Stage, Step::Prime]);
        assert!(Step::Prime.next_steps().is_empty());
        assert_eq!(Step::Build.up_to(), &[Step::Pull, Step::Build]);
        assert_eq!(Step::Prime.previous(), Some(Step::Stage));
        assert_eq!(Step::Pull.previous(), None);
    }

    #[test]
    fn test_step_parsing() {
        assert_eq!("stage".parse::<Step>().unwrap(), Step::Stage);
        assert_eq!("PRIME".parse::<Step>().unwrap(), Step::Prime);
        assert!("deploy".parse::<Step>().is_err());
    }

    #[test]
    fn test_step_serialization() {
        let json = serde_json::to_string(&Step::Build).unwrap();
        assert_eq!(json, "\"build\"");
    }
}
