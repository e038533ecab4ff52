//! Cron expressions.
//!
//! Accepts the classic five-field form (`min hour dom month dow`) as well as
//! the six/seven-field forms with seconds (and year). Five-field expressions
//! fire at second zero and use the classic day-of-week numbering (0-7, with
//! both 0 and 7 meaning Sunday); the six/seven-field forms are passed to the
//! `cron` crate as written, which numbers days 1-7 from Sunday.

use chrono::{DateTime, Utc};
use ::cron::Schedule;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid cron expression '{expression}': {reason}")]
pub struct CronError {
    pub expression: String,
    pub reason: String,
}

/// A parsed cron expression
#[derive(Debug, Clone)]
pub struct CronExpression {
    expression: String,
    schedule: Schedule,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let invalid = |reason: String| CronError {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        let normalized = match fields.as_slice() {
            [minute, hour, day, month, day_of_week] => {
                let day_of_week = translate_day_of_week(day_of_week).map_err(invalid)?;
                format!("0 {minute} {hour} {day} {month} {day_of_week}")
            }
            fields if fields.len() == 6 || fields.len() == 7 => fields.join(" "),
            fields => {
                return Err(invalid(format!(
                    "expected 5, 6 or 7 fields, got {}",
                    fields.len()
                )))
            }
        };
        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    /// The expression as written by the caller
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// Next fire time strictly after now
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.schedule.upcoming(Utc).next()
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// The next `count` fire times
    pub fn upcoming(&self, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.upcoming(Utc).take(count).collect()
    }
}

const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

fn parse_day(text: &str) -> Result<u32, String> {
    if let Some(index) = DAY_NAMES.iter().position(|name| text.eq_ignore_ascii_case(name)) {
        return Ok(index as u32);
    }
    match text.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("invalid day of week '{text}'")),
    }
}

/// Rewrite a classic day-of-week field (0-7, Sunday = 0 or 7) as an explicit
/// list in the `cron` crate's numbering (1-7, Sunday = 1).
fn translate_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => match step.parse::<usize>() {
                Ok(step) if step > 0 => (range, Some(step)),
                _ => return Err(format!("invalid step in '{part}'")),
            },
            None => (part, None),
        };

        let (first, last) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((start, end)) => (parse_day(start)?, parse_day(end)?),
            // `n/step` runs from n to the end of the week
            None if step.is_some() => (parse_day(range)?, 6),
            None => {
                let day = parse_day(range)?;
                (day, day)
            }
        };
        if first > last {
            return Err(format!("day of week range '{range}' runs backwards"));
        }

        for day in (first..=last).step_by(step.unwrap_or(1)) {
            days.insert(day % 7);
        }
    }

    Ok(days
        .into_iter()
        .map(|day| (day + 1).to_string())
        .collect::<Vec<_>>()
        .join(","))
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
