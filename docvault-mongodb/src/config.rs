//! Connection parameters for the source or destination server.

use std::fmt;
use std::time::Duration;

use mongodb::options::{ClientOptions, Credential};

use crate::error::{BackupError, BackupResult};

/// Default MongoDB port.
pub const DEFAULT_PORT: u16 = 27017;

/// Default authentication database.
pub const DEFAULT_AUTH_DATABASE: &str = "admin";

/// Username and password for SCRAM authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Deadlines applied to connection setup and to every batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect and initial ping deadline.
    pub connect: Duration,
    /// How long the driver may search for a suitable server.
    pub server_selection: Duration,
    /// Deadline for a single batch fetch or batch insert.
    pub operation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            server_selection: Duration::from_secs(30),
            operation: Duration::from_secs(30),
        }
    }
}

/// Everything needed to open a session against one database.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database to back up from or restore into.
    pub database: String,
    /// Optional credentials.
    pub credentials: Option<Credentials>,
    /// Database the credentials are defined in.
    pub auth_database: String,
    /// Connection and operation deadlines.
    pub timeouts: Timeouts,
    /// Application name (shown in server logs).
    pub app_name: Option<String>,
    /// Direct connection (bypass replica set discovery).
    pub direct_connection: Option<bool>,
}

impl ConnectionParams {
    /// Create parameters for `host:port/database` with default timeouts.
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            credentials: None,
            auth_database: DEFAULT_AUTH_DATABASE.to_string(),
            timeouts: Timeouts::default(),
            app_name: Some("docvault".to_string()),
            direct_connection: None,
        }
    }

    /// Create a builder for connection parameters.
    pub fn builder() -> ConnectionParamsBuilder {
        ConnectionParamsBuilder::new()
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Connection URI without credentials, safe to log.
    pub fn redacted_uri(&self) -> String {
        format!("mongodb://{}/", self.address())
    }

    /// Convert to MongoDB ClientOptions.
    pub async fn to_client_options(&self) -> BackupResult<ClientOptions> {
        let mut options = ClientOptions::parse(self.redacted_uri())
            .await
            .map_err(|e| BackupError::config(format!("failed to parse address: {}", e)))?;

        if let Some(ref app_name) = self.app_name {
            options.app_name = Some(app_name.clone());
        }

        options.connect_timeout = Some(self.timeouts.connect);
        // Server selection must give up before the ping bound so an
        // unreachable server is reported as such rather than as a timeout.
        options.server_selection_timeout =
            Some(self.timeouts.server_selection.min(self.timeouts.connect));

        if let Some(ref creds) = self.credentials {
            options.credential = Some(
                Credential::builder()
                    .username(creds.username.clone())
                    .password(creds.password.clone())
                    .source(self.auth_database.clone())
                    .build(),
            );
        }

        if let Some(direct) = self.direct_connection {
            options.direct_connection = Some(direct);
        }

        Ok(options)
    }
}

/// Builder for connection parameters.
#[derive(Debug, Default)]
pub struct ConnectionParamsBuilder {
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    auth_database: Option<String>,
    timeouts: Option<Timeouts>,
    app_name: Option<String>,
    direct_connection: Option<bool>,
}

impl ConnectionParamsBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the user name.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the authentication database.
    pub fn auth_database(mut self, database: impl Into<String>) -> Self {
        self.auth_database = Some(database.into());
        self
    }

    /// Set all timeouts.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Enable direct connection (bypass replica set discovery).
    pub fn direct_connection(mut self, enabled: bool) -> Self {
        self.direct_connection = Some(enabled);
        self
    }

    /// Build the parameters.
    ///
    /// Credentials are only attached when both a user name and a password
    /// are present; supplying just one of them is a configuration error.
    pub fn build(self) -> BackupResult<ConnectionParams> {
        let database = self
            .database
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| BackupError::config("database name is required"))?;

        let host = self.host.unwrap_or_else(|| "localhost".to_string());
        if host.trim().is_empty() {
            return Err(BackupError::config("host must not be empty"));
        }

        let credentials = match (self.username, self.password) {
            (Some(u), Some(p)) => Some(Credentials::new(u, p)),
            (None, None) => None,
            (Some(_), None) => {
                return Err(BackupError::config("username given without a password"));
            }
            (None, Some(_)) => {
                return Err(BackupError::config("password given without a username"));
            }
        };

        Ok(ConnectionParams {
            host,
            port: self.port.unwrap_or(DEFAULT_PORT),
            database,
            credentials,
            auth_database: self
                .auth_database
                .unwrap_or_else(|| DEFAULT_AUTH_DATABASE.to_string()),
            timeouts: self.timeouts.unwrap_or_default(),
            app_name: self.app_name.or(Some("docvault".to_string())),
            direct_connection: self.direct_connection,
        })
    }
}
