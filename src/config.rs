//! Environment-driven configuration, generalized from the teacher's ad hoc
//! `std::env::var("PORT")` read in `main` into a single typed struct read
//! once at boot.

#[derive(Clone, Debug)]
pub struct Config {
    pub db_path: String,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: u8,
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Reads configuration from the environment, falling back to
    /// development-friendly defaults for every field. `REDIS_*` are read and
    /// logged for operational parity with the external queue transport this
    /// crate's `Queue` port could be backed by, but are unused by the
    /// shipped in-process implementation (see `src/queue.rs`).
    pub fn from_env() -> Self {
        Self {
            db_path: env_or("DB_PATH", "transit_incidents.db"),
            redis_host: env_or("REDIS_HOST", "localhost"),
            redis_port: env_parse_or("REDIS_PORT", 6379),
            redis_db: env_parse_or("REDIS_DB", 0),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8080),
        }
    }

    pub fn socket_addr(&self) -> std::net::SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .unwrap_or_else(|_| std::net::SocketAddr::from(([0, 0, 0, 0], self.port)))
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        for k in ["DB_PATH", "REDIS_HOST", "REDIS_PORT", "REDIS_DB", "HOST", "PORT"] {
            std::env::remove_var(k);
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.redis_port, 6379);
    }
}
