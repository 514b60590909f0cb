use serde::Deserialize;

/// Server default port, used for rendering when none was requested.
pub const DEFAULT_PORT: u16 = 5432;

/// Servers only ever listen on loopback.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

const DEFAULT_USER: &str = "postgres";
const DEFAULT_ENCODING: &str = "UTF8";
const DEFAULT_LOCALE: &str = "C";

/// Options for `initdb`. Empty fields fall back to the PostgreSQL defaults
/// this crate uses for fixtures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InitOptions {
    pub user: String,
    pub encoding: String,
    pub locale: String,
}

impl InitOptions {
    pub fn user(&self) -> &str {
        non_empty_or(&self.user, DEFAULT_USER)
    }

    pub fn encoding(&self) -> &str {
        non_empty_or(&self.encoding, DEFAULT_ENCODING)
    }

    pub fn locale(&self) -> &str {
        non_empty_or(&self.locale, DEFAULT_LOCALE)
    }

    /// Render the value passed to `pg_ctl initdb -o`.
    ///
    /// Trust authentication and no-sync are always on: the cluster is a
    /// throwaway fixture.
    pub fn options(&self) -> String {
        [
            "-U",
            self.user(),
            "-A",
            "trust",
            "-N",
            format!("--encoding={}", self.encoding()).as_str(),
            format!("--locale={}", self.locale()).as_str(),
        ]
        .join(" ")
    }
}

/// Options for a single `pg_ctl start`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StartOptions {
    /// Port to listen on. `0` leaves the choice to the server default.
    pub port: u16,
    /// Unix socket directory. Empty disables the Unix socket.
    pub socket_dir: String,
    /// Database name used in the connection descriptor.
    pub db_name: String,
}

impl StartOptions {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Effective port, substituting the server default for `0`.
    pub fn port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_PORT
        } else {
            self.port
        }
    }

    pub fn host(&self) -> &'static str {
        LOOPBACK_HOST
    }

    fn socket_dir(&self) -> &str {
        non_empty_or(&self.socket_dir, "''")
    }

    /// Render the value passed to `pg_ctl start -o`.
    pub fn options(&self) -> String {
        let mut args: Vec<String> = [
            "-h",
            self.host(),
            "-F",
            "--fsync=off",
            "--full_page_writes=off",
            "--synchronous_commit=off",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        if self.port != 0 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }
        if cfg!(unix) {
            args.push("-k".to_string());
            args.push(self.socket_dir().to_string());
        }
        if !self.db_name.is_empty() {
            args.push(self.db_name.clone());
        }
        args.join(" ")
    }
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

/// Connection descriptor for a server started with these options.
///
/// The database name defaults to the user name.
pub fn data_source_name(init: &InitOptions, start: &StartOptions) -> String {
    let user = init.user();
    let db_name = if start.db_name.is_empty() {
        user
    } else {
        start.db_name.as_str()
    };
    format!(
        "postgres://{}@{}:{}/{}?sslmode=disable",
        user,
        start.host(),
        start.port(),
        db_name
    )
}
