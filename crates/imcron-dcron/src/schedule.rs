//! Cron expression dialect.
//!
//! Accepted forms:
//!
//! - 5 fields, `min hour dom month dow`; `dow` is 0-7 with 0 and 7 = Sunday
//! - 6 fields with a leading seconds field
//! - `@hourly`, `@daily` (`@midnight`), `@weekly`, `@monthly`, `@yearly` (`@annually`)
//!
//! The trigger engine runs on the `cron` crate, which wants seconds first and
//! numbers weekdays from 1. Expressions are rewritten into that form with
//! weekday names so there is no numbering to get wrong.

use std::str::FromStr;

use cron::Schedule;

use crate::error::{DcronError, Result};

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Parse `expr` into a schedule, rejecting anything the dialect does not cover.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let normalized = normalize(expr).map_err(|message| invalid(expr, message))?;
    Schedule::from_str(&normalized).map_err(|e| invalid(expr, e.to_string()))
}

fn invalid(expr: &str, message: impl Into<String>) -> DcronError {
    DcronError::InvalidCron {
        expr: expr.to_string(),
        message: message.into(),
    }
}

fn normalize(expr: &str) -> std::result::Result<String, String> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err("empty expression".to_string());
    }

    if let Some(descriptor) = expr.strip_prefix('@') {
        let canonical = match descriptor.to_ascii_lowercase().as_str() {
            "yearly" | "annually" => "@yearly",
            "monthly" => "@monthly",
            "weekly" => "@weekly",
            "daily" | "midnight" => "@daily",
            "hourly" => "@hourly",
            d if d.starts_with("every") => return Err("@every is not supported".to_string()),
            _ => return Err(format!("unknown descriptor '@{}'", descriptor)),
        };
        return Ok(canonical.to_string());
    }

    let mut fields: Vec<String> = expr.split_whitespace().map(str::to_string).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 => {}
        n => return Err(format!("expected 5 or 6 fields, got {}", n)),
    }
    fields[5] = weekday_names(&fields[5])?;
    Ok(fields.join(" "))
}

/// Rewrite numeric weekdays (0-7, Sunday = 0 and 7) to names.
fn weekday_names(field: &str) -> std::result::Result<String, String> {
    let mut items = Vec::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };

        let rewritten = match base.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi) = (weekday(lo)?, weekday(hi)?);
                // A range running into 7 would wrap SAT->SUN; split it.
                if hi.1 == 7 && lo.1 != 0 && lo.1 != 7 && step.is_none() {
                    items.push(format!("{}-SAT", lo.0));
                    items.push("SUN".to_string());
                    continue;
                }
                format!("{}-{}", lo.0, hi.0)
            }
            None if base == "*" || base == "?" => base.to_string(),
            None => weekday(base)?.0,
        };

        items.push(match step {
            Some(step) => format!("{}/{}", rewritten, step),
            None => rewritten,
        });
    }
    Ok(items.join(","))
}

/// Name for a weekday token plus its number (8 for tokens that were already names).
fn weekday(token: &str) -> std::result::Result<(String, u8), String> {
    match token.parse::<u8>() {
        Ok(n) if (n as usize) < WEEKDAYS.len() => Ok((WEEKDAYS[n as usize].to_string(), n)),
        Ok(n) => Err(format!("day of week {} out of range 0-7", n)),
        Err(_) => Ok((token.to_ascii_uppercase(), 8)),
    }
}
