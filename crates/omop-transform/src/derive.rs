//! Named pure functions available to `derived` rules.
//!
//! Missing inputs yield `Null`, so an optional derived column stays empty
//! instead of rejecting the record. Present but unparseable inputs are errors.

use chrono::{Datelike, Duration, NaiveDate};
use omop_model::value::{parse_date, parse_datetime};
use omop_model::{Derivation, Value};

/// Evaluates `derivation` over the record's input values, in rule order.
pub fn evaluate(derivation: Derivation, inputs: &[Option<&str>]) -> Result<Value, String> {
    match derivation {
        Derivation::YearOf => unary(inputs, |raw| {
            partial_date(raw).map(|(year, _, _)| Value::Integer(i64::from(year)))
        }),
        Derivation::MonthOf => unary(inputs, |raw| match partial_date(raw)? {
            (_, Some(month), _) => Ok(Value::Integer(i64::from(month))),
            (_, None, _) => Ok(Value::Null),
        }),
        Derivation::DayOf => unary(inputs, |raw| match partial_date(raw)? {
            (_, _, Some(day)) => Ok(Value::Integer(i64::from(day))),
            _ => Ok(Value::Null),
        }),
        Derivation::DateOf => unary(inputs, |raw| date(raw).map(Value::Date)),
        Derivation::DateTimeOf => unary(inputs, |raw| {
            parse_datetime(raw)
                .map(Value::DateTime)
                .ok_or_else(|| format!("{raw:?} is not a date or datetime"))
        }),
        Derivation::DaysBetween => binary(inputs, |start, end| {
            let days = (date(end)? - date(start)?).num_days();
            Ok(Value::Integer(days))
        }),
        Derivation::AddDays => binary(inputs, |start, offset| {
            let days = offset
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("{offset:?} is not a whole number of days"))?;
            let start_date = date(start)?;
            Duration::try_days(days)
                .and_then(|delta| start_date.checked_add_signed(delta))
                .map(Value::Date)
                .ok_or_else(|| format!("{start:?} plus {days} days is out of range"))
        }),
        Derivation::Coalesce => Ok(inputs
            .iter()
            .flatten()
            .next()
            .map_or(Value::Null, |raw| Value::Text((*raw).to_string()))),
    }
}

fn unary(
    inputs: &[Option<&str>],
    apply: impl FnOnce(&str) -> Result<Value, String>,
) -> Result<Value, String> {
    match inputs {
        [Some(raw)] => apply(raw),
        [None] => Ok(Value::Null),
        _ => Err(format!("expected 1 input, got {}", inputs.len())),
    }
}

fn binary(
    inputs: &[Option<&str>],
    apply: impl FnOnce(&str, &str) -> Result<Value, String>,
) -> Result<Value, String> {
    match inputs {
        [Some(a), Some(b)] => apply(a, b),
        [_, _] => Ok(Value::Null),
        _ => Err(format!("expected 2 inputs, got {}", inputs.len())),
    }
}

fn date(raw: &str) -> Result<NaiveDate, String> {
    parse_date(raw).ok_or_else(|| format!("{raw:?} is not a date"))
}

/// Year, month and day of a full or partial date (`YYYY`, `YYYY-MM`).
/// eCRF birth dates are often recorded with reduced precision.
fn partial_date(raw: &str) -> Result<(i32, Option<u32>, Option<u32>), String> {
    if let Some(full) = parse_date(raw) {
        return Ok((full.year(), Some(full.month()), Some(full.day())));
    }
    let invalid = || format!("{raw:?} is not a date");
    let mut parts = raw.trim().splitn(2, ['-', '/']);
    let year = parts
        .next()
        .filter(|year| year.len() == 4)
        .and_then(|year| year.parse::<i32>().ok())
        .ok_or_else(invalid)?;
    let month = match parts.next() {
        None => None,
        Some(month) => Some(
            month
                .parse::<u32>()
                .ok()
                .filter(|month| (1..=12).contains(month))
                .ok_or_else(invalid)?,
        ),
    };
    Ok((year, month, None))
}
