//! Recurrence expressions for scheduled triggers
//!
//! A [`Schedule`] is a five-field cron expression
//! (`minute hour day-of-month month day-of-week`) parsed once and evaluated
//! as a pure function of a timestamp, at minute granularity in UTC.
//!
//! Supported syntax per field: `*`, single values, ranges (`1-5`), steps
//! (`*/15`, `10-40/10`, `5/20`), comma lists, month names (`JAN`..`DEC`) and
//! weekday names (`SUN`..`SAT`). Weekday `7` is Sunday. The macros `@yearly`,
//! `@annually`, `@monthly`, `@weekly`, `@daily`, `@midnight` and `@hourly`
//! expand to their usual expressions.
//!
//! When both day-of-month and day-of-week are restricted, a timestamp matches
//! if either of them does, as in classic cron.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing a recurrence expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("unknown schedule macro '{0}'")]
    UnknownMacro(String),

    #[error("invalid {field} value '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("{field} value {value} is out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("invalid step '{value}' in {field} field")]
    InvalidStep { field: &'static str, value: String },
}

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    name_offset: u32,
}

const MINUTE: Field = Field {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    name_offset: 0,
};

const HOUR: Field = Field {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    name_offset: 0,
};

const DAY_OF_MONTH: Field = Field {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    name_offset: 0,
};

const MONTH: Field = Field {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ],
    name_offset: 1,
};

const DAY_OF_WEEK: Field = Field {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
    name_offset: 0,
};

/// A parsed recurrence expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    day_of_month_restricted: bool,
    day_of_week_restricted: bool,
}

impl Schedule {
    /// Parses a cron expression or macro
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let source = expression.trim();
        let expanded = if source.starts_with('@') {
            expand_macro(source)?
        } else {
            source
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let [minute, hour, day_of_month, month, day_of_week] = fields[..] else {
            return Err(ScheduleError::FieldCount(fields.len()));
        };

        let mut days_of_week = parse_field(day_of_week, &DAY_OF_WEEK)?;
        // 7 is an alias for Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: source.to_string(),
            minutes: parse_field(minute, &MINUTE)?,
            hours: parse_field(hour, &HOUR)?,
            days_of_month: parse_field(day_of_month, &DAY_OF_MONTH)?,
            months: parse_field(month, &MONTH)?,
            days_of_week,
            day_of_month_restricted: !day_of_month.starts_with('*'),
            day_of_week_restricted: !day_of_week.starts_with('*'),
        })
    }

    /// The expression as written in the definition
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the minute containing `at` is selected by this schedule
    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        if !has_bit(self.minutes, at.minute())
            || !has_bit(self.hours, at.hour())
            || !has_bit(self.months, at.month())
        {
            return false;
        }

        let day_of_month = has_bit(self.days_of_month, at.day());
        let day_of_week = has_bit(self.days_of_week, at.weekday().num_days_from_sunday());

        match (self.day_of_month_restricted, self.day_of_week_restricted) {
            (true, true) => day_of_month || day_of_week,
            (true, false) => day_of_month,
            (false, true) => day_of_week,
            (false, false) => true,
        }
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schedule::parse(s)
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn expand_macro(name: &str) -> Result<&'static str, ScheduleError> {
    match name.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        _ => Err(ScheduleError::UnknownMacro(name.to_string())),
    }
}

fn has_bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn parse_field(text: &str, field: &Field) -> Result<u64, ScheduleError> {
    let mut mask = 0u64;

    for part in text.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(parse_step(step, field)?)),
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (field.min, field.max)
        } else if let Some((start, end)) = range.split_once('-') {
            (parse_value(start, field)?, parse_value(end, field)?)
        } else {
            let value = parse_value(range, field)?;
            // `5/20` means "from 5 to the end of the range, every 20"
            match step {
                Some(_) => (value, field.max),
                None => (value, value),
            }
        };

        if start > end {
            return Err(ScheduleError::InvalidValue {
                field: field.name,
                value: part.to_string(),
            });
        }

        for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
            mask |= 1u64 << value;
        }
    }

    Ok(mask)
}

fn parse_step(text: &str, field: &Field) -> Result<u32, ScheduleError> {
    match text.parse::<u32>() {
        Ok(step) if step > 0 => Ok(step),
        _ => Err(ScheduleError::InvalidStep {
            field: field.name,
            value: text.to_string(),
        }),
    }
}

fn parse_value(text: &str, field: &Field) -> Result<u32, ScheduleError> {
    let value = match text.parse::<u32>() {
        Ok(value) => value,
        Err(_) => field
            .names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(text))
            .map(|idx| idx as u32 + field.name_offset)
            .ok_or_else(|| ScheduleError::InvalidValue {
                field: field.name,
                value: text.to_string(),
            })?,
    };

    if value < field.min || value > field.max {
        return Err(ScheduleError::OutOfRange {
            field: field.name,
            value,
            min: field.min,
            max: field.max,
        });
    }

    Ok(value)
}
