//! Configuration loading and validation.
//!
//! Connection settings come from the conventional client environment
//! variables (`MYSQL_*` for the source, libpq's `PG*` for the target), an
//! optional YAML file, and command-line overrides applied by the binary.

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// A missing variable leaves the field unset; a malformed port is an error.
    /// Like libpq, the PostgreSQL user falls back to the operating system
    /// account name (`USER`, or `USERNAME` on Windows).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = SourceConfig {
            host: lookup("MYSQL_HOST"),
            port: parse_port(&lookup, "MYSQL_TCP_PORT")?,
            database: lookup("MYSQL_DATABASE"),
            user: lookup("MYSQL_USER"),
            password: lookup("MYSQL_PWD"),
        };
        let target = TargetConfig {
            host: lookup("PGHOST"),
            port: parse_port(&lookup, "PGPORT")?,
            database: lookup("PGDATABASE"),
            user: lookup("PGUSER")
                .or_else(|| lookup("USER"))
                .or_else(|| lookup("USERNAME")),
            password: lookup("PGPASSWORD"),
            ..TargetConfig::default()
        };
        Ok(Self {
            source,
            target,
            migration: MigrationConfig::default(),
        })
    }

    /// Fill connection fields the file left unset from the environment.
    pub fn with_env_defaults(self) -> Result<Self> {
        let env = Self::from_env()?;
        Ok(self.merged_with(env))
    }

    fn merged_with(mut self, fallback: Config) -> Self {
        let s = &mut self.source;
        s.host = s.host.take().or(fallback.source.host);
        s.port = s.port.or(fallback.source.port);
        s.database = s.database.take().or(fallback.source.database);
        s.user = s.user.take().or(fallback.source.user);
        s.password = s.password.take().or(fallback.source.password);

        let t = &mut self.target;
        t.host = t.host.take().or(fallback.target.host);
        t.port = t.port.or(fallback.target.port);
        t.database = t.database.take().or(fallback.target.database);
        t.user = t.user.take().or(fallback.target.user);
        t.password = t.password.take().or(fallback.target.password);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

fn parse_port<F>(lookup: &F, key: &str) -> Result<Option<u16>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|e| MigrateError::Config(format!("{} is not a valid port ({}): {}", key, raw, e))),
    }
}

impl SourceConfig {
    /// Build connection options for the `mysql` driver.
    pub fn opts(&self) -> mysql::Opts {
        let mut builder = mysql::OptsBuilder::new()
            .ip_or_hostname(self.host.clone())
            .user(self.user.clone())
            .pass(self.password.clone())
            .db_name(self.database.clone());
        if let Some(port) = self.port {
            builder = builder.tcp_port(port);
        }
        mysql::Opts::from(builder)
    }
}

impl TargetConfig {
    /// Build a tokio-postgres config, including the session settings every
    /// migration connection runs with.
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(self.host.as_deref().unwrap_or("localhost"));
        pg_config.port(self.port.unwrap_or(5432));
        pg_config.user(self.user.as_deref().unwrap_or("postgres"));
        if let Some(database) = &self.database {
            pg_config.dbname(database);
        }
        if let Some(password) = &self.password {
            pg_config.password(password);
        }
        pg_config.application_name(&self.application_name);
        pg_config.options(&self.session_options());
        pg_config
    }

    /// Server options string: replica role suppresses triggers and FK checks
    /// during the bulk load.
    pub fn session_options(&self) -> String {
        let mut options = String::from("-c session_replication_role=replica");
        if let Some(path) = &self.search_path {
            options.push_str(" -c search_path=");
            options.push_str(&path.replace('\\', "\\\\").replace(' ', "\\ "));
        }
        options
    }
}
