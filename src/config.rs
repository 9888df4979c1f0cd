use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    /// Server-held key for access-pass signatures.
    pub pass_secret: String,
    /// Shared secret for the reservation-flow intake webhook; empty skips
    /// verification (dev mode).
    pub intake_secret: String,
    pub mailer_api_url: String,
    pub mailer_api_key: String,
    pub mailer_from: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "amenipass.db".to_string()),
            pass_secret: env::var("PASS_SECRET").unwrap_or_else(|_| "changeme".to_string()),
            intake_secret: env::var("INTAKE_SECRET").unwrap_or_default(),
            mailer_api_url: env::var("MAILER_API_URL").unwrap_or_default(),
            mailer_api_key: env::var("MAILER_API_KEY").unwrap_or_default(),
            mailer_from: env::var("MAILER_FROM")
                .unwrap_or_else(|_| "bookings@amenipass.local".to_string()),
        }
    }
}
