//! Non-fatal assertions for scenarios.
//!
//! A failed check is recorded with the caller's location and logged, and the check returns
//! `false` (or `None`) so the scenario can skip dependent steps with an early return instead
//! of aborting.
use std::fmt::{self, Debug, Display};
use std::panic::Location;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::error;

use crate::{ErrorKind, Result};

/// One failed assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Failure {
    pub location: String,
    pub message:  String,
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Result of running one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScenarioOutcome {
    pub name:     String,
    pub failures: Vec<Failure>,
    pub elapsed:  Duration,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool { self.failures.is_empty() }
}

/// Records assertion outcomes for a single scenario.
#[derive(Debug)]
pub struct Checker {
    scenario: String,
    failures: Mutex<Vec<Failure>>,
}

impl Checker {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self { scenario: scenario.into(), failures: Mutex::new(Vec::new()) }
    }

    pub fn scenario(&self) -> &str { &self.scenario }

    /// Record a failure unconditionally.
    #[track_caller]
    pub fn fail(&self, message: impl Display) {
        let caller = Location::caller();
        let failure = Failure { location: caller.to_string(), message: message.to_string() };
        error!(
            scenario = %self.scenario,
            location = %failure.location,
            message = %failure.message,
            "assertion failed"
        );
        self.failures.lock().push(failure);
    }

    #[track_caller]
    pub fn is_true(&self, condition: bool, what: impl Display) -> bool {
        if !condition {
            self.fail(format_args!("expected {what}"));
        }
        condition
    }

    /// Deep equality of `actual` against `expected`.
    #[track_caller]
    pub fn equal<A, E>(&self, actual: A, expected: E) -> bool
    where
        A: PartialEq<E> + Debug,
        E: Debug,
    {
        let equal = actual == expected;
        if !equal {
            self.fail(format_args!("expected {expected:?}, got {actual:?}"));
        }
        equal
    }

    #[track_caller]
    pub fn no_error<T>(&self, result: &Result<T>) -> bool {
        match result {
            Ok(_) => true,
            Err(err) => {
                self.fail(format_args!("unexpected error: {err}"));
                false
            }
        }
    }

    /// Unwrap a successful result, recording the error otherwise.
    #[track_caller]
    pub fn ok<T>(&self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.fail(format_args!("unexpected error: {err}"));
                None
            }
        }
    }

    #[track_caller]
    pub fn error<T: Debug>(&self, result: &Result<T>) -> bool {
        match result {
            Ok(value) => {
                self.fail(format_args!("expected an error, got Ok({value:?})"));
                false
            }
            Err(_) => true,
        }
    }

    /// Expect an error of the given kind. Messages are not compared.
    #[track_caller]
    pub fn error_kind<T: Debug>(&self, result: &Result<T>, kind: ErrorKind) -> bool {
        match result {
            Err(err) if err.kind() == kind => true,
            Err(err) => {
                self.fail(format_args!("expected {kind} error, got {} error: {err}", err.kind()));
                false
            }
            Ok(value) => {
                self.fail(format_args!("expected {kind} error, got Ok({value:?})"));
                false
            }
        }
    }

    pub fn passed(&self) -> bool { self.failures.lock().is_empty() }

    pub fn finish(self, elapsed: Duration) -> ScenarioOutcome {
        ScenarioOutcome { name: self.scenario, failures: self.failures.into_inner(), elapsed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_failures_are_recorded_not_fatal() {
        let check = Checker::new("demo");
        assert!(check.equal(vec![1, 2], vec![1, 2]));
        assert!(!check.equal("a", "b"));
        assert!(!check.is_true(false, "a true condition"));
        assert!(!check.passed());

        let outcome = check.finish(Duration::ZERO);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures[0].location.contains("assert.rs"));
        assert!(outcome.failures[0].message.contains("expected \"b\""));
        assert!(!outcome.passed());
    }

    #[test]
    fn test_error_kind_compares_kinds() {
        let check = Checker::new("errors");
        let deadline: Result<()> = Err(Error::DeadlineExceeded);
        assert!(check.error_kind(&deadline, ErrorKind::DeadlineExceeded));
        assert!(!check.error_kind(&deadline, ErrorKind::Cancelled));
        assert!(!check.error_kind(&Ok(1), ErrorKind::NoRows));
        assert!(check.error(&deadline));
        assert!(!check.no_error(&deadline));
        assert_eq!(check.ok(Ok::<_, Error>(5)), Some(5));
        assert_eq!(check.ok(Err::<u8, _>(Error::NoRows)), None);
        assert_eq!(check.finish(Duration::ZERO).failures.len(), 4);
    }
}
