//! Monitoring target identity.
//!
//! A target is one SQL Server instance, addressed by an ADO.NET-style
//! connection string. Its identity is the server display name parsed from
//! the `Server` / `Data Source` key; the connection string itself carries
//! credentials and is never logged or serialized.

use std::fmt;

use crate::errors::{AppError, AppResult};

/// Connection string keys that name the server, matched case-insensitively.
const SERVER_KEYS: [&str; 5] = ["server", "data source", "address", "addr", "network address"];

/// One SQL Server instance to monitor.
#[derive(Clone, PartialEq, Eq)]
pub struct Target {
    connection_string: String,
    display_name: String,
    key: String,
}

impl Target {
    /// Parses a connection string into a target.
    ///
    /// # Errors
    /// Returns `AppError::InvalidConnectionString` if the string is blank or
    /// names no server.
    pub fn parse(connection_string: &str) -> AppResult<Self> {
        let connection_string = connection_string.trim();
        if connection_string.is_empty() {
            return Err(AppError::InvalidConnectionString(
                "connection string is required".into(),
            ));
        }

        let server = split_pairs(connection_string)
            .into_iter()
            .find(|(k, _)| SERVER_KEYS.contains(&k.to_lowercase().as_str()))
            .map(|(_, v)| v)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::InvalidConnectionString("missing Server or Data Source".into())
            })?;

        let display_name = display_name(&server);
        Ok(Self {
            connection_string: connection_string.to_string(),
            key: display_name.to_lowercase(),
            display_name,
        })
    }

    /// The raw connection string, for the SQL driver only.
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Human-readable server name, e.g. `host\instance`.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Normalized identity used for loops, history and broadcast groups.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("display_name", &self.display_name)
            .field("connection_string", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// Normalizes a server group name the same way a target key is derived.
pub fn server_key(server_name: &str) -> String {
    display_name(server_name).to_lowercase()
}

fn display_name(server: &str) -> String {
    let server = server.trim();
    let server = server
        .strip_prefix("tcp:")
        .or_else(|| server.strip_prefix("TCP:"))
        .unwrap_or(server);
    let (host, rest) = match server.find(['\\', ',']) {
        Some(idx) => server.split_at(idx),
        None => (server, ""),
    };
    let host = match host {
        "." | "(local)" | "(localdb)" => "localhost",
        other => other,
    };
    // Drop an explicit port; keep a named instance.
    let instance = rest
        .strip_prefix('\\')
        .map(|r| r.split(',').next().unwrap_or(""))
        .filter(|i| !i.is_empty());
    match instance {
        Some(instance) => format!("{}\\{}", host, instance),
        None => host.to_string(),
    }
}

/// Splits `key=value;key=value` honoring single and double quoted values.
fn split_pairs(input: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        let key = key.trim().to_string();

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let mut value = String::new();
        match chars.peek().copied() {
            Some(quote @ ('"' | '\'')) => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == quote {
                        // Doubled quote is an escaped quote.
                        if chars.peek() == Some(&quote) {
                            chars.next();
                            value.push(quote);
                            continue;
                        }
                        break;
                    }
                    value.push(c);
                }
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                }
            }
            _ => {
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    value.push(c);
                }
            }
        }

        if !key.is_empty() {
            pairs.push((key, value.trim().to_string()));
        }
        if chars.peek().is_none() {
            break;
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_instance() {
        let target =
            Target::parse("Server=tcp:db01\\SQL2019,1433;User Id=sa;Password=p@ss;").unwrap();
        assert_eq!(target.display_name(), "db01\\SQL2019");
        assert_eq!(target.key(), "db01\\sql2019");
    }

    #[test]
    fn test_parse_data_source_and_local() {
        let target = Target::parse("Data Source=.;Integrated Security=true").unwrap();
        assert_eq!(target.display_name(), "localhost");

        let target = Target::parse("data source=Prod-Sql,14330;Initial Catalog=app").unwrap();
        assert_eq!(target.display_name(), "Prod-Sql");
    }

    #[test]
    fn test_quoted_password_does_not_confuse_parser() {
        let target =
            Target::parse("Password=\"a;Server=evil\";Server=real-host;User Id=sa").unwrap();
        assert_eq!(target.display_name(), "real-host");
    }

    #[test]
    fn test_rejects_missing_server() {
        assert!(matches!(
            Target::parse("User Id=sa;Password=x"),
            Err(AppError::InvalidConnectionString(_))
        ));
        assert!(Target::parse("   ").is_err());
        assert!(Target::parse("Server=;User Id=sa").is_err());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let target = Target::parse("Server=h;Password=secret").unwrap();
        let debug = format!("{:?}", target);
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_server_key_matches_target_key() {
        let target = Target::parse("Server=DB01\\Inst,1433").unwrap();
        assert_eq!(server_key("DB01\\Inst"), target.key());
    }
}
