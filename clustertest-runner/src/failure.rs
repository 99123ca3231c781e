// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Failures recorded by a test.
//!
//! A single failure-reporting call (for example [`TestState::fatal`]) produces exactly one
//! [`Failure`]. The arguments of the call are rendered into a [`FailureError`], the aggregated
//! error. Arguments that are themselves errors are additionally kept, unflattened, as the
//! failure's *components*, so that failures can later be classified by walking the original cause
//! chains (see [`failures_find_error`] and [`failures_specify_owner`]).
//!
//! [`TestState::fatal`]: crate::test_state::TestState::fatal

use crate::{
    chain::{DisplayErrorChain, DynError, ErrorChain, InlineErrorChain},
    errors::BoxError,
    owner::ErrorWithOwnership,
};
use itertools::Itertools;
use std::{backtrace::Backtrace, error::Error, fmt, panic::Location, sync::Arc};
use swrite::{SWrite, swrite};

/// Rendered in place of a `{}` placeholder that has no corresponding argument.
pub const MISSING_ARG: &str = "<missing>";

/// One argument to a failure-reporting call.
#[derive(Clone, Debug)]
pub enum FailureArg {
    /// A plain value, already formatted.
    Value(String),

    /// A structured error. It is rendered into the message and also retained as a component.
    Error(DynError),
}

impl FailureArg {
    /// Creates a plain value argument from anything displayable.
    pub fn value(value: impl fmt::Display) -> Self {
        Self::Value(value.to_string())
    }

    /// Creates a structured error argument.
    pub fn error(err: impl Error + Send + Sync + 'static) -> Self {
        Self::Error(Arc::new(err))
    }

    /// Creates a structured error argument from an already type-erased error.
    pub fn from_dyn(err: DynError) -> Self {
        Self::Error(err)
    }

    /// Returns the error, if this argument is one.
    pub fn as_error(&self) -> Option<&DynError> {
        match self {
            Self::Value(_) => None,
            Self::Error(err) => Some(err),
        }
    }
}

impl fmt::Display for FailureArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.write_str(value),
            Self::Error(err) => write!(f, "{}", InlineErrorChain::new(&**err)),
        }
    }
}

impl From<&str> for FailureArg {
    fn from(value: &str) -> Self {
        Self::Value(value.to_owned())
    }
}

impl From<String> for FailureArg {
    fn from(value: String) -> Self {
        Self::Value(value)
    }
}

impl From<DynError> for FailureArg {
    fn from(err: DynError) -> Self {
        Self::Error(err)
    }
}

impl From<BoxError> for FailureArg {
    fn from(err: BoxError) -> Self {
        Self::Error(Arc::from(err))
    }
}

/// Renders `template`, replacing each `{}` with the next argument.
///
/// `{{` and `}}` render literal braces. A placeholder with no argument left renders as
/// [`MISSING_ARG`]; arguments left over after the template is exhausted are appended, separated
/// by spaces.
pub fn render_template(template: &str, args: &[FailureArg]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, chars.peek().copied()) {
            ('{', Some('{')) => {
                chars.next();
                out.push('{');
            }
            ('{', Some('}')) => {
                chars.next();
                match args.next() {
                    Some(arg) => swrite!(out, "{arg}"),
                    None => out.push_str(MISSING_ARG),
                }
            }
            ('}', Some('}')) => {
                chars.next();
                out.push('}');
            }
            (c, _) => out.push(c),
        }
    }

    for extra in args {
        swrite!(out, " {extra}");
    }
    out
}

/// The single error synthesized from all the arguments of one failure-reporting call.
///
/// The source of a `FailureError` is its first error component, if any.
#[derive(Clone, Debug)]
pub struct FailureError {
    message: String,
    location: &'static Location<'static>,
    first_cause: Option<DynError>,
    backtrace: Arc<Backtrace>,
}

impl FailureError {
    /// The rendered message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Where in test code the failure was reported.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// The backtrace captured when the failure was reported.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for FailureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for FailureError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.first_cause
            .as_deref()
            .map(|err| err as &(dyn Error + 'static))
    }
}

/// A failure recorded by one reporting call.
#[derive(Clone, Debug)]
pub struct Failure {
    error: FailureError,
    components: Vec<DynError>,
}

impl Failure {
    /// Builds a failure reported at `location`.
    ///
    /// With no template, the message is the space-joined rendering of `args`. Otherwise the
    /// message is produced by [`render_template`].
    pub fn new(
        location: &'static Location<'static>,
        template: Option<&str>,
        args: impl IntoIterator<Item = FailureArg>,
    ) -> Self {
        let args: Vec<_> = args.into_iter().collect();
        let message = match template {
            Some(template) => render_template(template, &args),
            None => args.iter().join(" "),
        };
        let components: Vec<_> = args
            .into_iter()
            .filter_map(|arg| match arg {
                FailureArg::Value(_) => None,
                FailureArg::Error(err) => Some(err),
            })
            .collect();

        Self {
            error: FailureError {
                message,
                location,
                first_cause: components.first().cloned(),
                backtrace: Arc::new(Backtrace::force_capture()),
            },
            components,
        }
    }

    /// The aggregated error.
    pub fn error(&self) -> &FailureError {
        &self.error
    }

    /// The structured errors passed to the reporting call, in argument order.
    pub fn components(&self) -> &[DynError] {
        &self.components
    }

    /// A one-line rendering: `(file:line): message`.
    pub fn summary(&self) -> String {
        let location = self.error.location;
        format!(
            "({}:{}): {}",
            location.file(),
            location.line(),
            self.error.message
        )
    }

    /// The fully detailed rendering, including every component's cause chain and the backtrace.
    pub fn detailed(&self) -> String {
        let mut out = self.summary();
        for (i, component) in self.components.iter().enumerate() {
            swrite!(
                out,
                "\n\nerror component {}: {}",
                i + 1,
                DisplayErrorChain::new(&**component)
            );
        }
        swrite!(out, "\n\nstack backtrace:\n{}", self.error.backtrace);
        out
    }
}

/// Returned by [`FailureLog::record`].
#[derive(Clone, Debug)]
pub struct RecordedFailure {
    /// The sequence number of this failure within the run, starting at 1.
    ///
    /// Unlike the failure count, this is never reset.
    pub seq: usize,

    /// The one-line summary of the failure.
    pub summary: String,

    /// Whether the failure was retained in the log, i.e. suppression was not active.
    pub retained: bool,
}

impl RecordedFailure {
    /// The name of the detail artifact for this failure.
    pub fn artifact_name(&self) -> String {
        format!("failure_{}", self.seq)
    }
}

/// The ordered, append-only log of failures for a test run.
///
/// This is plain data. Callers are responsible for synchronization.
#[derive(Debug, Default)]
pub struct FailureLog {
    failures: Vec<Failure>,
    num_failures: usize,
    seq: usize,
    suppressed: bool,
    output: String,
}

impl FailureLog {
    /// Creates an empty failure log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure. It is always counted, and retained unless suppression is active.
    pub fn record(&mut self, failure: Failure) -> RecordedFailure {
        self.num_failures += 1;
        self.seq += 1;
        let summary = failure.summary();
        let retained = !self.suppressed;
        if retained {
            self.output.push_str(&summary);
            self.output.push('\n');
            self.failures.push(failure);
        }

        RecordedFailure {
            seq: self.seq,
            summary,
            retained,
        }
    }

    /// Stops retaining new failures. They are still counted.
    pub fn suppress(&mut self) {
        self.suppressed = true;
    }

    /// Clears retained failures, resets the count and stops suppressing.
    ///
    /// The output buffer and the sequence used for artifact names are kept.
    pub fn reset(&mut self) {
        self.failures.clear();
        self.num_failures = 0;
        self.suppressed = false;
    }

    /// Returns true if suppression is active.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// The retained failures, in recording order.
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// The number of failures recorded, including suppressed ones.
    pub fn num_failures(&self) -> usize {
        self.num_failures
    }

    /// Returns true if at least one failure has been recorded.
    pub fn failed(&self) -> bool {
        self.num_failures > 0
    }

    /// The summaries of all retained failures, one per line.
    pub fn failure_message(&self) -> String {
        self.failures.iter().map(Failure::summary).join("\n")
    }

    /// The in-memory output buffer of failure summaries.
    pub fn output(&self) -> &str {
        &self.output
    }
}

/// Returns true if any failure has a component, or an aggregated error cause chain, containing an
/// error of kind `K`.
pub fn failures_matching_error<K: Error + 'static>(failures: &[Failure]) -> bool {
    failures_find_error::<K>(failures).is_some()
}

/// Finds an error of kind `K` in `failures`.
///
/// Each failure's components are searched first, then its aggregated error. Within the first chain
/// that contains a `K`, the innermost `K` is returned.
pub fn failures_find_error<K: Error + 'static>(failures: &[Failure]) -> Option<&K> {
    failure_chains(failures).find_map(|chain| chain.innermost::<K>())
}

/// Returns the first [`ErrorWithOwnership`] found in `failures`, searched in the same order as
/// [`failures_find_error`].
pub fn failures_specify_owner(failures: &[Failure]) -> Option<&ErrorWithOwnership> {
    failure_chains(failures).find_map(|chain| chain.find::<ErrorWithOwnership>())
}

fn failure_chains(failures: &[Failure]) -> impl Iterator<Item = ErrorChain<'_>> {
    failures.iter().flat_map(|failure| {
        failure
            .components
            .iter()
            .map(|component| ErrorChain::new(&**component))
            .chain(std::iter::once(ErrorChain::new(&failure.error)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::Owner;
    use pretty_assertions::assert_eq;
    use std::io;
    use test_case::test_case;
    use test_strategy::{Arbitrary, proptest};

    #[test_case("plain", &[], "plain"; "no placeholders")]
    #[test_case("{} and {}", &["a", "b"], "a and b"; "in order")]
    #[test_case("{{literal}} {}", &["x"], "{literal} x"; "escaped braces")]
    #[test_case("{} {}", &["only"], "only <missing>"; "missing argument")]
    #[test_case("got {}", &["a", "b", "c"], "got a b c"; "extra arguments")]
    #[test_case("{", &[], "{"; "lone brace")]
    fn template(template: &str, args: &[&str], expected: &str) {
        let args: Vec<FailureArg> = args.iter().map(|&a| a.into()).collect();
        assert_eq!(render_template(template, &args), expected);
    }

    fn io_error() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused")
    }

    #[test]
    fn untemplated_message_is_space_joined() {
        let failure = Failure::new(
            Location::caller(),
            None,
            ["dialing node".into(), FailureArg::value(3), FailureArg::error(io_error())],
        );
        assert_eq!(failure.error().message(), "dialing node 3 connection refused");
        assert_eq!(failure.components().len(), 1);
    }

    #[test]
    fn components_are_retained_structurally() {
        let failure = Failure::new(
            Location::caller(),
            Some("{}: {}"),
            [FailureArg::error(io_error()), FailureArg::error(io_error())],
        );
        assert_eq!(failure.components().len(), 2);

        let source = failure.error().source().expect("first component is the source");
        let io_err = source
            .downcast_ref::<io::Error>()
            .expect("source downcasts to the original type");
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn summary_points_at_the_call_site() {
        let location = Location::caller();
        let failure = Failure::new(location, None, ["boom".into()]);
        assert_eq!(
            failure.summary(),
            format!("({}:{}): boom", location.file(), location.line())
        );
    }

    #[test]
    fn detailed_includes_nested_causes() {
        let inner = ErrorWithOwnership::new(Owner::new("kv"), io_error());
        let failure = Failure::new(
            Location::caller(),
            None,
            ["replication stalled".into(), FailureArg::error(inner)],
        );
        let detailed = failure.detailed();

        assert_eq!(
            failure.error().message(),
            "replication stalled owned by kv: connection refused"
        );
        assert!(detailed.starts_with(&failure.summary()), "detailed: {detailed}");
        assert!(
            detailed.contains("error component 1: owned by kv\n  caused by: connection refused\n"),
            "detailed: {detailed}"
        );
        assert_eq!(
            detailed.matches("connection refused").count(),
            2,
            "once in the summary, once in the cause chain: {detailed}"
        );
        assert!(detailed.contains("stack backtrace:"), "detailed: {detailed}");
    }

    #[test]
    fn suppression_counts_but_does_not_retain() {
        let mut log = FailureLog::new();
        log.record(Failure::new(Location::caller(), None, ["first".into()]));
        let message = log.failure_message();

        log.suppress();
        let recorded = log.record(Failure::new(Location::caller(), None, ["second".into()]));
        assert!(!recorded.retained);
        assert_eq!(recorded.artifact_name(), "failure_2");
        assert_eq!(log.num_failures(), 2);
        assert_eq!(log.failures().len(), 1);
        assert_eq!(log.failure_message(), message);
        assert_eq!(log.output().lines().count(), 1);

        log.reset();
        assert!(!log.failed());
        assert!(log.failures().is_empty());
        assert!(!log.is_suppressed());
        let recorded = log.record(Failure::new(Location::caller(), None, ["third".into()]));
        assert_eq!(recorded.seq, 3, "artifact sequence survives reset");
        assert_eq!(log.num_failures(), 1);
    }

    #[derive(Clone, Copy, Debug, Arbitrary)]
    enum LogOp {
        Record,
        Suppress,
        Reset,
    }

    #[proptest(cases = 64)]
    fn counter_and_retained_failures_agree(ops: Vec<LogOp>) {
        let mut log = FailureLog::new();
        let (mut counted, mut retained) = (0, 0);
        for op in ops {
            match op {
                LogOp::Record => {
                    let recorded =
                        log.record(Failure::new(Location::caller(), None, ["x".into()]));
                    counted += 1;
                    if recorded.retained {
                        retained += 1;
                    }
                }
                LogOp::Suppress => log.suppress(),
                LogOp::Reset => {
                    log.reset();
                    (counted, retained) = (0, 0);
                }
            }
        }

        assert_eq!(log.num_failures(), counted);
        assert_eq!(log.failures().len(), retained);
        assert!(log.failures().len() <= log.num_failures());
        assert_eq!(log.failed(), counted > 0);
    }

    #[derive(Debug)]
    struct Wrapped(io::Error);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "wrapped: {}", self.0)
        }
    }

    impl Error for Wrapped {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn classification() {
        assert!(!failures_matching_error::<io::Error>(&[]));

        let plain = Failure::new(Location::caller(), None, ["no errors here".into()]);
        assert!(!failures_matching_error::<io::Error>(std::slice::from_ref(&plain)));

        let wrapped = Failure::new(
            Location::caller(),
            None,
            [FailureArg::error(Wrapped(io_error()))],
        );
        let failures = [plain, wrapped];
        assert!(failures_matching_error::<io::Error>(&failures));
        assert!(failures_matching_error::<Wrapped>(&failures));
        assert!(failures_matching_error::<FailureError>(&failures));
        assert!(failures_specify_owner(&failures).is_none());
    }

    #[test]
    fn find_error_returns_innermost_match() {
        let nested = ErrorWithOwnership::new(
            Owner::new("outer"),
            ErrorWithOwnership::new(Owner::new("inner"), io_error()),
        );
        let failures = [Failure::new(
            Location::caller(),
            None,
            [FailureArg::error(nested)],
        )];

        let innermost = failures_find_error::<ErrorWithOwnership>(&failures).expect("found");
        assert_eq!(innermost.owner().as_str(), "inner");

        let owner = failures_specify_owner(&failures).expect("found");
        assert_eq!(owner.owner().as_str(), "outer", "ownership uses the first match");
    }

    #[test]
    fn owner_search_follows_failure_order() {
        let failures = [
            Failure::new(Location::caller(), None, ["unowned".into()]),
            Failure::new(
                Location::caller(),
                None,
                [FailureArg::error(ErrorWithOwnership::new(Owner::new("sql"), io_error()))],
            ),
            Failure::new(
                Location::caller(),
                None,
                [FailureArg::error(ErrorWithOwnership::new(Owner::new("kv"), io_error()))],
            ),
        ];
        let owner = failures_specify_owner(&failures).expect("found");
        assert_eq!(owner.owner().as_str(), "sql");
    }
}
