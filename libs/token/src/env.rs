//! Helpers for reading typed settings out of the process environment.

use std::{env::var, fmt::Display, str::FromStr};

use anyhow::{Error, Result};

/// Read `name`, treating unset and blank values as `default`.
pub fn var_or(name: &str, default: &str) -> String {
    match var(name) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

/// Read `name` as an optional, non-blank value.
pub fn var_opt(name: &str) -> Option<String> {
    var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn var_bool(name: &str, default: bool) -> Result<bool> {
    match var_opt(name) {
        None => Ok(default),
        Some(value) => parse_bool(&value)
            .ok_or_else(|| Error::msg(format!("{name} must be a boolean, got '{value}'"))),
    }
}

pub fn var_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match var_opt(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|e| Error::msg(format!("{name} is invalid ('{value}'): {e}"))),
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "y" => Some(true),
        "false" | "0" | "no" | "off" | "n" => Some(false),
        _ => None,
    }
}
