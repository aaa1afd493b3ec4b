use std::fmt;

use snafu::{OptionExt, ResultExt, Snafu, ensure};

const MACROS: &[&str] = &[
    "@reboot",
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

const WEEKDAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
    /// Symbolic names, the first of which maps to `names_base`.
    names: &'static [&'static str],
    names_base: u32,
}

static FIELDS: [Field; 5] = [
    Field {
        name: "minute",
        min: 0,
        max: 59,
        names: &[],
        names_base: 0,
    },
    Field {
        name: "hour",
        min: 0,
        max: 23,
        names: &[],
        names_base: 0,
    },
    Field {
        name: "day of month",
        min: 1,
        max: 31,
        names: &[],
        names_base: 0,
    },
    Field {
        name: "month",
        min: 1,
        max: 12,
        names: MONTH_NAMES,
        names_base: 1,
    },
    Field {
        name: "day of week",
        min: 0,
        max: 7,
        names: WEEKDAY_NAMES,
        names_base: 0,
    },
];

/// A validated cron timing expression: five fields or an `@` macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let trimmed = expression.trim();
        ensure!(!trimmed.is_empty(), EmptySnafu);

        if trimmed.starts_with('@') {
            let lowered = trimmed.to_ascii_lowercase();
            ensure!(
                MACROS.contains(&lowered.as_str()),
                UnknownMacroSnafu { name: trimmed }
            );
            return Ok(Self {
                expression: lowered,
            });
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        ensure!(
            fields.len() == FIELDS.len(),
            FieldCountSnafu {
                found: fields.len()
            }
        );

        for (value, field) in fields.iter().zip(FIELDS.iter()) {
            validate_field(value, field)?;
        }

        Ok(Self {
            expression: fields.join(" "),
        })
    }

}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn validate_field(value: &str, field: &Field) -> Result<(), CronError> {
    for item in value.split(',') {
        validate_item(item, field).context(FieldSnafu {
            field: field.name,
            value,
        })?;
    }
    Ok(())
}

fn validate_item(item: &str, field: &Field) -> Result<(), ItemError> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };

    if let Some(step) = step {
        let step: u32 = step.parse().ok().context(BadStepSnafu { step })?;
        ensure!(step >= 1, BadStepSnafu { step: "0" });
    }

    if range == "*" {
        return Ok(());
    }

    match range.split_once('-') {
        Some((start, end)) => {
            let start = parse_value(start, field)?;
            let end = parse_value(end, field)?;
            ensure!(start <= end, ReversedRangeSnafu { start, end });
        }
        None => {
            parse_value(range, field)?;
        }
    }
    Ok(())
}

fn parse_value(token: &str, field: &Field) -> Result<u32, ItemError> {
    let value = match token.parse::<u32>() {
        Ok(number) => number,
        Err(_) => field
            .names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(token))
            .map(|index| index as u32 + field.names_base)
            .context(UnknownValueSnafu { token })?,
    };

    ensure!(
        (field.min..=field.max).contains(&value),
        OutOfRangeSnafu {
            value,
            min: field.min,
            max: field.max,
        }
    );
    Ok(value)
}

#[derive(Debug, Snafu)]
pub enum CronError {
    #[snafu(display("Empty cron expression"))]
    EmptyError,
    #[snafu(display("Unknown cron macro '{}'", name))]
    UnknownMacroError { name: String },
    #[snafu(display("Expected 5 cron fields, found {}", found))]
    FieldCountError { found: usize },
    #[snafu(display("Invalid {} field '{}'", field, value))]
    FieldError {
        field: &'static str,
        value: String,
        source: ItemError,
    },
}

#[derive(Debug, Snafu)]
pub enum ItemError {
    #[snafu(display("'{}' is not a valid step", step))]
    BadStepError { step: String },
    #[snafu(display("'{}' is neither a number nor a known name", token))]
    UnknownValueError { token: String },
    #[snafu(display("{} is outside {}-{}", value, min, max))]
    OutOfRangeError { value: u32, min: u32, max: u32 },
    #[snafu(display("range {}-{} runs backwards", start, end))]
    ReversedRangeError { start: u32, end: u32 },
}
