use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Startup attempts (one second apart) before giving up on the database.
    pub connect_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub reset_secret: String,
    pub issuer: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub reset_ttl_minutes: i64,
}

/// argon2id cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        // argon2 crate defaults
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub server: ServerConfig,
}

/// Loads `.env.{ENVIRONMENT}` first so its values win over the shared `.env`.
pub fn load_env_files() {
    let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "local".into());
    dotenvy::from_filename(format!(".env.{environment}")).ok();
    dotenvy::dotenv().ok();
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{key} must be set"))
}

/// Builds a Postgres URL from its parts.
pub fn compose_database_url(user: &str, password: &str, host: &str, port: u16, db: &str) -> String {
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => compose_database_url(
                &var_or("POSTGRES_USER", "postgres"),
                &var_or("POSTGRES_PASSWORD", "postgres"),
                &var_or("POSTGRES_SERVER", "localhost"),
                parsed_or("POSTGRES_PORT", 5432),
                &var_or("POSTGRES_DB", "accounts"),
            ),
        };
        let database = DatabaseConfig {
            url,
            max_connections: parsed_or("DB_MAX_CONNECTIONS", 10),
            acquire_timeout_secs: parsed_or("DB_ACQUIRE_TIMEOUT_SECS", 5),
            connect_retries: parsed_or("DB_CONNECT_RETRIES", 300),
        };

        let jwt = JwtConfig {
            access_secret: required("ACCESS_SECRET_KEY")?,
            refresh_secret: required("REFRESH_SECRET_KEY")?,
            reset_secret: required("RESET_SECRET_KEY")?,
            issuer: var_or("JWT_ISSUER", "accounts"),
            access_ttl_minutes: parsed_or("ACCESS_TOKEN_EXPIRE_MINUTES", 60),
            refresh_ttl_days: parsed_or("REFRESH_TOKEN_EXPIRE_DAYS", 7),
            reset_ttl_minutes: parsed_or("RESET_TOKEN_EXPIRE_MINUTES", 15),
        };

        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            memory_kib: parsed_or("ARGON2_MEMORY_KIB", defaults.memory_kib),
            iterations: parsed_or("ARGON2_ITERATIONS", defaults.iterations),
            parallelism: parsed_or("ARGON2_PARALLELISM", defaults.parallelism),
        };

        let server = ServerConfig {
            host: var_or("APP_HOST", "0.0.0.0"),
            port: parsed_or("APP_PORT", 8080),
        };

        Ok(Self {
            environment: var_or("ENVIRONMENT", "local"),
            database,
            jwt,
            password,
            server,
        })
    }
}
