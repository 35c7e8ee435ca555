//! Timing command output parsers.
//!
//! The device shell and the host's `/usr/bin/time` print genuinely different
//! layouts, so each gets its own parser. Both read fixed token positions and
//! ignore trailing tokens such as `99%CPU`.
//!
//! ```text
//! device:  0m00.22s real     0m00.10s user     0m00.05s system
//!          real 0m0.22s user 0m0.10s sys 0m0.05s
//! host:    0.46user 0.01system 0:00.47elapsed 99%CPU (0avgtext+0avgdata 3456maxresident)k
//!          0inputs+0outputs (0major+150minor)pagefaults 0swaps
//! ```

use crate::error::{ParseError, ParseResult};
use crate::types::{Environment, TimingRecord};

/// Parse raw timing output captured in `env`.
pub fn parse_timing(env: Environment, raw: &str) -> ParseResult<TimingRecord> {
    match env {
        Environment::Device => parse_device_timing(raw),
        Environment::Host => parse_host_timing(raw),
    }
}

/// Parse the device shell's one-line `time` report.
///
/// Tokens come in (value, label) pairs as printed by the device shell, or in
/// (label, value) pairs. Token 0 decides the orientation; after that the
/// real/user/system durations are read from fixed positions.
pub fn parse_device_timing(raw: &str) -> ParseResult<TimingRecord> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let err = || ParseError::DeviceTiming(raw.to_string());

    let first = tokens.first().ok_or_else(err)?;
    let positions = if parse_duration(first).is_ok() {
        [0, 2, 4]
    } else {
        [1, 3, 5]
    };

    let mut values = [0.0; 3];
    for (slot, pos) in values.iter_mut().zip(positions) {
        let token = tokens.get(pos).ok_or_else(err)?;
        *slot = parse_duration(token).map_err(|_| err())?;
    }

    let [real, user, system] = values;
    Ok(TimingRecord::new(real, user, system))
}

/// Parse a `<minutes>m<seconds>s` duration into seconds.
///
/// A bare `<seconds>s` is accepted as well.
pub fn parse_duration(token: &str) -> ParseResult<f64> {
    let err = || ParseError::Duration(token.to_string());
    let body = token.strip_suffix('s').unwrap_or(token);
    let (minutes, seconds) = match body.split_once('m') {
        Some((m, s)) => (parse_seconds(m).ok_or_else(err)?, parse_seconds(s).ok_or_else(err)?),
        None => (0.0, parse_seconds(body).ok_or_else(err)?),
    };
    Ok(minutes * 60.0 + seconds)
}

/// Parse the first line of GNU time's default report.
pub fn parse_host_timing(raw: &str) -> ParseResult<TimingRecord> {
    let err = || ParseError::HostTiming(raw.to_string());

    let line = raw
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(err)?;
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(err());
    }

    let user = tokens[0]
        .strip_suffix("user")
        .and_then(parse_seconds)
        .ok_or_else(err)?;
    let system = tokens[1]
        .strip_suffix("system")
        .and_then(parse_seconds)
        .ok_or_else(err)?;
    let real = tokens[2]
        .strip_suffix("elapsed")
        .and_then(parse_clock)
        .ok_or_else(err)?;

    Ok(TimingRecord::new(real, user, system))
}

/// Parse `m:ss.cc` or `h:mm:ss` into seconds.
///
/// Every colon-separated component is honoured, so elapsed times of a
/// minute or more are not truncated to their seconds field.
fn parse_clock(s: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut parts = 0;
    for part in s.split(':') {
        total = total * 60.0 + parse_seconds(part)?;
        parts += 1;
    }
    (parts >= 2).then_some(total)
}

fn parse_seconds(s: &str) -> Option<f64> {
    let v = s.parse::<f64>().ok()?;
    (v.is_finite() && v >= 0.0).then_some(v)
}
