// src/config.rs
use crate::domain::errors::{AppError, AppResult};
use crate::domain::models::{Pool, TokenInfo, NATIVE_TOKEN};
use crate::protocol::{dedust, stonfi};
use dotenv::dotenv;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Order engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Polling loop and pricing parameters
    pub engine: EngineConfig,

    /// Venue contracts and gas budgets
    pub venues: VenueConfig,

    /// Pair -> pools, first pool is the pair's price source
    pub pools: HashMap<String, Vec<Pool>>,

    /// Dry-run collaborators
    pub paper: PaperConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Polling loop and pricing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay between polling cycles
    pub tick_interval_ms: u64,

    /// First delay after a failed cycle
    pub error_backoff_ms: u64,

    /// Upper bound for repeated-failure backoff
    pub max_backoff_ms: u64,

    /// Deadline for any single external call
    pub call_timeout_ms: u64,

    /// Slippage (percent) used when an order carries none
    pub default_slippage: Decimal,

    /// Pool trading fee (percent)
    pub pool_fee_percent: Decimal,

    /// Platform service fee (percent), added to the pool fee
    pub service_fee_percent: Decimal,

    /// Native units kept aside per order when checking funding
    pub funding_gas_reserve: Decimal,

    /// Swap message validity window
    pub deadline_secs: u32,
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Delay after `failures` consecutive failed cycles
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        let delay = self.error_backoff_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_backoff_ms.max(self.error_backoff_ms)))
    }
}

/// DEX contract addresses and gas constants (native units)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub dedust_native_vault: String,
    pub dedust_router: String,
    pub dedust_swap_gas: Decimal,
    pub stonfi_router: String,
    pub stonfi_proxy_ton: String,
    pub stonfi_swap_gas: Decimal,

    /// Attached to jetton transfers
    pub jetton_transfer_gas: Decimal,

    /// Forwarded with the jetton transfer notification
    pub forward_gas: Decimal,

    /// Native balance required before sending a jetton
    pub native_gas_floor: Decimal,
}

/// Seed state for the dry-run chain and wallet table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    /// JSON file the in-memory order store is loaded from and written back to
    pub orders_file: Option<String>,

    pub wallets: Vec<PaperWallet>,

    /// Pool address -> reserves in display units
    pub reserves: HashMap<String, PaperReserves>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperWallet {
    pub address: String,
    pub secret: Option<String>,
    pub native_balance: Decimal,
    /// Jetton master -> balance
    pub jetton_balances: HashMap<String, Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperReserves {
    pub from: Decimal,
    pub to: Decimal,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub level: String,

    /// Log to file
    pub to_file: bool,

    /// Log file path
    pub file_path: Option<String>,
}

/// Flat pool entry as kept in a pools file
#[derive(Debug, Clone, Deserialize)]
struct PoolFileEntry {
    address: String,
    dex: String,
    from_token: String,
    to_token: String,
    #[serde(default = "default_from_decimals")]
    from_decimals: u32,
    #[serde(default = "default_to_decimals")]
    to_decimals: u32,
    #[serde(default)]
    from_token_address: Option<String>,
    #[serde(default)]
    to_token_address: Option<String>,
}

fn default_from_decimals() -> u32 {
    9
}

fn default_to_decimals() -> u32 {
    6
}

impl From<PoolFileEntry> for Pool {
    fn from(entry: PoolFileEntry) -> Self {
        let token = |symbol: String, address: Option<String>, decimals: u32| TokenInfo {
            address: address.unwrap_or_else(|| NATIVE_TOKEN.to_string()),
            symbol,
            decimals,
        };
        Pool {
            address: entry.address,
            dex: entry.dex,
            from_token: token(entry.from_token, entry.from_token_address, entry.from_decimals),
            to_token: token(entry.to_token, entry.to_token_address, entry.to_decimals),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PoolFile {
    pools: HashMap<String, Vec<PoolFileEntry>>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();
        let defaults = Config::default();

        let tick_interval_ms = env_or("ORDER_CHECK_INTERVAL_MS", defaults.engine.tick_interval_ms);
        let engine_config = EngineConfig {
            tick_interval_ms,
            error_backoff_ms: env_or("ERROR_BACKOFF_MS", (tick_interval_ms * 2).max(5_000)),
            max_backoff_ms: env_or("MAX_BACKOFF_MS", defaults.engine.max_backoff_ms),
            call_timeout_ms: env_or("CALL_TIMEOUT_MS", defaults.engine.call_timeout_ms),
            default_slippage: env_or("DEFAULT_SLIPPAGE", defaults.engine.default_slippage),
            pool_fee_percent: env_or("POOL_FEE_PERCENT", defaults.engine.pool_fee_percent),
            service_fee_percent: env_or("SERVICE_FEE_PERCENT", defaults.engine.service_fee_percent),
            funding_gas_reserve: env_or("FUNDING_GAS_RESERVE", defaults.engine.funding_gas_reserve),
            deadline_secs: env_or("SWAP_DEADLINE_SECS", defaults.engine.deadline_secs),
        };

        let venue_config = VenueConfig {
            dedust_native_vault: env::var("DEDUST_NATIVE_VAULT")
                .unwrap_or(defaults.venues.dedust_native_vault),
            dedust_router: env::var("DEDUST_ROUTER").unwrap_or(defaults.venues.dedust_router),
            dedust_swap_gas: env_or("DEDUST_SWAP_GAS", defaults.venues.dedust_swap_gas),
            stonfi_router: env::var("STONFI_ROUTER").unwrap_or(defaults.venues.stonfi_router),
            stonfi_proxy_ton: env::var("STONFI_PROXY_TON").unwrap_or(defaults.venues.stonfi_proxy_ton),
            stonfi_swap_gas: env_or("STONFI_SWAP_GAS", defaults.venues.stonfi_swap_gas),
            jetton_transfer_gas: env_or("JETTON_TRANSFER_GAS", defaults.venues.jetton_transfer_gas),
            forward_gas: env_or("FORWARD_GAS", defaults.venues.forward_gas),
            native_gas_floor: env_or("NATIVE_GAS_FLOOR", defaults.venues.native_gas_floor),
        };

        let pools = match env::var("POOLS_FILE") {
            Ok(path) => load_pools(path)?,
            Err(_) => defaults.pools,
        };

        let paper = match env::var("PAPER_STATE_FILE") {
            Ok(path) => {
                let contents = read_file(&path)?;
                serde_json::from_str(&contents).map_err(|e| {
                    AppError::Config(format!("Failed to parse paper state file: {}", e))
                })?
            }
            Err(_) => PaperConfig::default(),
        };
        let paper = PaperConfig {
            orders_file: env::var("ORDERS_FILE").ok().or(paper.orders_file),
            ..paper
        };

        // Create Logging config
        let logging_config = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            to_file: env_or("LOG_TO_FILE", false),
            file_path: env::var("LOG_FILE_PATH").ok(),
        };

        Ok(Config {
            engine: engine_config,
            venues: venue_config,
            pools,
            paper,
            logging: logging_config,
        })
    }

    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let contents = read_file(path)?;
        let config: Config = serde_json::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file: {}", e))
        })?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            AppError::Config(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, contents).map_err(|e| {
            AppError::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> AppResult<()> {
        let mut builder = env_logger::Builder::new();

        // Set log level
        let log_level = match self.logging.level.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        };

        builder.filter_level(log_level);

        // Configure output
        if self.logging.to_file {
            if let Some(file_path) = &self.logging.file_path {
                let file = File::create(file_path).map_err(|e| {
                    AppError::Config(format!("Failed to create log file: {}", e))
                })?;

                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }

        builder.try_init().map_err(|e| {
            AppError::Config(format!("Failed to initialize logger: {}", e))
        })?;

        Ok(())
    }
}

/// Load a `{"pools": {"PAIR": [...]}}` file
pub fn load_pools<P: AsRef<Path>>(path: P) -> AppResult<HashMap<String, Vec<Pool>>> {
    let contents = read_file(path)?;
    let file: PoolFile = serde_json::from_str(&contents).map_err(|e| {
        AppError::Config(format!("Failed to parse pools file: {}", e))
    })?;

    Ok(file
        .pools
        .into_iter()
        .map(|(pair, entries)| (pair, entries.into_iter().map(Pool::from).collect()))
        .collect())
}

fn read_file<P: AsRef<Path>>(path: P) -> AppResult<String> {
    let mut file = File::open(path).map_err(|e| {
        AppError::Config(format!("Failed to open config file: {}", e))
    })?;

    let mut contents = String::new();
    file.read_to_string(&mut contents).map_err(|e| {
        AppError::Config(format!("Failed to read config file: {}", e))
    })?;
    Ok(contents)
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => value.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2_000,
            error_backoff_ms: 5_000,
            max_backoff_ms: 60_000,
            call_timeout_ms: 30_000,
            default_slippage: Decimal::new(1, 0),
            pool_fee_percent: Decimal::new(3, 1),
            service_fee_percent: Decimal::new(25, 2),
            funding_gas_reserve: Decimal::new(1, 1),
            deadline_secs: 300,
        }
    }
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            dedust_native_vault: dedust::DEFAULT_NATIVE_VAULT.to_string(),
            dedust_router: dedust::DEFAULT_ROUTER.to_string(),
            dedust_swap_gas: Decimal::new(3, 1),
            stonfi_router: stonfi::DEFAULT_ROUTER.to_string(),
            stonfi_proxy_ton: stonfi::DEFAULT_PROXY_TON.to_string(),
            stonfi_swap_gas: Decimal::new(25, 2),
            jetton_transfer_gas: Decimal::new(2, 1),
            forward_gas: Decimal::new(15, 2),
            native_gas_floor: Decimal::new(2, 1),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            to_file: false,
            file_path: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut pools = HashMap::new();
        pools.insert(
            "TON-USDT".to_string(),
            vec![Pool {
                address: "EQCsgKK0mn7qY30BE8ACZAlfXJ7w5DJq0r9IX49sWg-z-opY".to_string(),
                dex: "DeDust".to_string(),
                from_token: TokenInfo {
                    symbol: "TON".to_string(),
                    address: NATIVE_TOKEN.to_string(),
                    decimals: 9,
                },
                to_token: TokenInfo {
                    symbol: "USDT".to_string(),
                    address: "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs".to_string(),
                    decimals: 6,
                },
            }],
        );

        Self {
            engine: EngineConfig::default(),
            venues: VenueConfig::default(),
            pools,
            paper: PaperConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
