use crate::error::AppError;
use crate::market::coingecko::COINGECKO_REST_BASE_URL;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_DB_FILENAME: &str = "app.db";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub db_filename: String,
    pub market_api_base_url: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr_raw =
            non_blank(lookup("APP_BIND_ADDR")).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr_raw.parse::<SocketAddr>().map_err(|_| {
            AppError::InvalidArgument(format!(
                "APP_BIND_ADDR must be a socket address, got '{bind_addr_raw}'"
            ))
        })?;

        let data_dir = non_blank(lookup("APP_DATA_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let db_filename = non_blank(lookup("APP_DB_FILENAME"))
            .unwrap_or_else(|| DEFAULT_DB_FILENAME.to_string());

        let market_api_base_url = non_blank(lookup("MARKET_API_BASE_URL"))
            .unwrap_or_else(|| COINGECKO_REST_BASE_URL.to_string());
        if !(market_api_base_url.starts_with("http://")
            || market_api_base_url.starts_with("https://"))
        {
            return Err(AppError::InvalidArgument(format!(
                "MARKET_API_BASE_URL must be an http(s) URL, got '{market_api_base_url}'"
            )));
        }

        Ok(Self {
            bind_addr,
            data_dir,
            db_filename,
            market_api_base_url,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_filename)
    }
}
