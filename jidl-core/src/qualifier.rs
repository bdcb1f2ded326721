//! Configuration qualifiers.
//!
//! Section names in the stored configuration come in three forms:
//!
//! | form | meaning |
//! |------|---------|
//! | `name` | a connection |
//! | `var::connection` | a tag reader |
//! | `var::connection<-srcVar::srcConnection` | a tag writer bound to a reader |
//!
//! Parsing is strict: every segment must be a valid name and the
//! separators must appear exactly as above. Ambiguous identifiers are
//! rejected rather than guessed at.

use crate::error::ConfigError;

/// A parsed configuration qualifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Qualifier {
    Connection {
        name: String,
    },
    Reader {
        var: String,
        connection: String,
    },
    Writer {
        var: String,
        connection: String,
        source_var: String,
        source_connection: String,
    },
}

/// Checks a tag or connection name: `^[A-Za-z_][A-Za-z0-9_]*$`.
pub fn validate_name(name: &str) -> Result<&str, ConfigError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(name)
    } else {
        Err(ConfigError::BadName(name.to_string()))
    }
}

impl Qualifier {
    /// Parses a qualifier string.
    pub fn parse(input: &str) -> Result<Qualifier, ConfigError> {
        let bad = || ConfigError::BadQualifier(input.to_string());

        let (target, source) = match input.split_once("<-") {
            Some((target, source)) => {
                if source.contains("<-") {
                    return Err(bad());
                }
                (target, Some(source))
            }
            None => (input, None),
        };

        let target = split_tag(target).map_err(|_| bad())?;
        match (target, source) {
            ((name, None), None) => {
                validate_name(name).map_err(|_| bad())?;
                Ok(Qualifier::Connection {
                    name: name.to_string(),
                })
            }
            ((var, Some(connection)), None) => Ok(Qualifier::Reader {
                var: var.to_string(),
                connection: connection.to_string(),
            }),
            ((var, Some(connection)), Some(source)) => {
                let (source_var, source_connection) = match split_tag(source).map_err(|_| bad())? {
                    (var, Some(connection)) => (var, connection),
                    // A writer source must itself be a reader qualifier.
                    (_, None) => return Err(bad()),
                };
                Ok(Qualifier::Writer {
                    var: var.to_string(),
                    connection: connection.to_string(),
                    source_var: source_var.to_string(),
                    source_connection: source_connection.to_string(),
                })
            }
            // `name<-...` without a variable part is not a valid writer.
            ((_, None), Some(_)) => Err(bad()),
        }
    }
}

impl core::fmt::Display for Qualifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Qualifier::Connection { name } => f.write_str(name),
            Qualifier::Reader { var, connection } => write!(f, "{var}::{connection}"),
            Qualifier::Writer {
                var,
                connection,
                source_var,
                source_connection,
            } => write!(f, "{var}::{connection}<-{source_var}::{source_connection}"),
        }
    }
}

/// Splits `var::connection` (or a bare name), validating each segment.
fn split_tag(input: &str) -> Result<(&str, Option<&str>), ConfigError> {
    match input.split_once("::") {
        Some((var, connection)) => {
            if connection.contains("::") {
                return Err(ConfigError::BadQualifier(input.to_string()));
            }
            validate_name(var)?;
            validate_name(connection)?;
            Ok((var, Some(connection)))
        }
        None => {
            validate_name(input)?;
            Ok((input, None))
        }
    }
}
