// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt, time::Duration};
use swrite::{SWrite, swrite};

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "failure" if `count` is 1, otherwise "failures".
    pub fn failures_str(count: usize) -> &'static str {
        if count == 1 { "failure" } else { "failures" }
    }

    /// Returns "task" if `count` is 1, otherwise "tasks".
    pub fn tasks_str(count: usize) -> &'static str {
        if count == 1 { "task" } else { "tasks" }
    }

    /// Returns "line" if `count` is 1, otherwise "lines".
    pub fn lines_str(count: usize) -> &'static str {
        if count == 1 { "line" } else { "lines" }
    }
}

/// Displays a duration rounded to the nearest second, in humantime format (e.g. `1m 5s`).
#[derive(Clone, Copy, Debug)]
pub(crate) struct DisplayRoundedSecs(pub(crate) Duration);

impl fmt::Display for DisplayRoundedSecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = (self.0.as_millis() + 500) / 1000;
        let rounded = Duration::from_secs(secs as u64);
        write!(f, "{}", humantime::format_duration(rounded))
    }
}

/// Escapes a string for use as `<value>` in a `key='<value>'` attribute of a TeamCity service
/// message.
pub fn teamcity_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("|n"),
            '\r' => out.push_str("|r"),
            '|' => out.push_str("||"),
            '[' => out.push_str("|["),
            ']' => out.push_str("|]"),
            '\'' => out.push_str("|'"),
            c if (c as u32) > 127 => {
                swrite!(out, "|0x{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// TeamCity treats commas in test names as separators, so they're replaced.
pub fn teamcity_name_escape(name: &str) -> String {
    name.replace(',', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("plain", "plain"; "no escaping")]
    #[test_case("a\nb\rc", "a|nb|rc"; "newlines")]
    #[test_case("x|y", "x||y"; "pipe")]
    #[test_case("[ok]", "|[ok|]"; "brackets")]
    #[test_case("it's", "it|'s"; "quote")]
    #[test_case("caf\u{e9}", "caf|0x00e9"; "non-ascii")]
    fn escape(input: &str, expected: &str) {
        assert_eq!(teamcity_escape(input), expected);
    }

    #[test]
    fn name_escape_replaces_commas() {
        assert_eq!(teamcity_name_escape("a,b,c"), "a_b_c");
    }

    #[test_case(Duration::from_millis(400), "0s"; "rounds down to zero")]
    #[test_case(Duration::from_millis(1500), "2s"; "rounds half up")]
    #[test_case(Duration::from_secs(65), "1m 5s"; "minutes")]
    fn rounded_secs(duration: Duration, expected: &str) {
        assert_eq!(DisplayRoundedSecs(duration).to_string(), expected);
    }
}
