//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: AUSSIE_)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/aussie-gateway/{service_name}/config.toml
//! 4. System directory: /etc/aussie-gateway/{service_name}/config.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Main configuration structure
///
/// Generic over `T`, a caller-supplied extension type for settings specific
/// to one deployment that don't belong in the shared gateway schema. Use
/// `Config<()>` (the default) when there is nothing to extend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config<T = ()>
where
    T: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static,
{
    /// Service configuration
    pub service: ServiceConfig,

    /// JWT configuration
    pub jwt: JwtConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,

    /// Middleware configuration
    #[serde(default)]
    pub middleware: MiddlewareConfig,

    /// Redis configuration (optional; backs the redis-backed storage ports)
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// Gateway-level configuration (reserved paths, admin surface)
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Authentication rate limiting / lockout configuration
    #[serde(default)]
    pub auth_rate_limit: AuthRateLimitConfig,

    /// Revocation engine configuration
    #[serde(default)]
    pub revocation: RevocationConfig,

    /// JWKS cache configuration
    #[serde(default)]
    pub jwks: JwksCacheConfig,

    /// Translation cache configuration
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Storage provider selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Resiliency configuration (timeouts on backing stores)
    #[serde(default)]
    pub resiliency: ResiliencyConfig,

    /// Signing key rotation configuration
    #[serde(default)]
    pub keyrotation: KeyRotationConfig,

    /// Proxy transport configuration
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// WebSocket rate limiting configuration
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// API key hashing configuration
    #[serde(default)]
    pub api_keys: ApiKeyConfig,

    /// Trusted external OIDC issuers the identity resolver validates
    /// bearer tokens against
    #[serde(default)]
    pub token_providers: Vec<crate::gateway::TokenProviderConfig>,

    /// Deployment-specific extension settings, opaque to the gateway itself
    #[serde(default)]
    pub extra: T,
}

/// API key hashing configuration. The pepper is server-wide secret material
/// mixed into the deterministic hash used for API key lookup; it must be set
/// from the environment in production (the empty default only works because
/// every deployment is expected to override it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    #[serde(default)]
    pub pepper: String,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self { pepper: String::new() }
    }
}

/// Gateway-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Path segments reserved for the gateway itself; a registered service
    /// cannot claim a route whose first segment matches one of these.
    #[serde(default = "default_reserved_paths")]
    pub reserved_paths: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            reserved_paths: default_reserved_paths(),
        }
    }
}

/// Authentication failure rate limiting / progressive lockout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRateLimitConfig {
    /// Number of failed attempts within the window before lockout engages
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,

    /// Sliding window in seconds over which failures are counted
    #[serde(default = "default_auth_window_secs")]
    pub window_secs: u64,

    /// Base lockout delay in milliseconds applied after the threshold is hit
    #[serde(default = "default_base_lockout_ms")]
    pub base_lockout_ms: u64,

    /// Multiplier applied per additional lockout cycle (progressive backoff)
    #[serde(default = "default_lockout_multiplier")]
    pub multiplier: f64,

    /// Upper bound on the computed lockout delay in milliseconds
    #[serde(default = "default_max_lockout_ms")]
    pub max_lockout_ms: u64,
}

impl Default for AuthRateLimitConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            window_secs: default_auth_window_secs(),
            base_lockout_ms: default_base_lockout_ms(),
            multiplier: default_lockout_multiplier(),
            max_lockout_ms: default_max_lockout_ms(),
        }
    }
}

/// Token revocation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationConfig {
    /// Remaining token lifetime, in seconds, under which a revocation check
    /// is skipped entirely (bloom and repository both) — a token this close
    /// to its own expiry can't be abused for long even if revoked.
    #[serde(default = "default_revocation_check_threshold")]
    pub check_threshold: u64,

    /// Expected number of items the bloom filter is sized for
    #[serde(default = "default_bloom_size")]
    pub bloom_size: usize,

    /// Number of hash functions used by the bloom filter
    #[serde(default = "default_bloom_hashes")]
    pub bloom_hashes: u32,

    /// Interval in seconds between full bloom filter rebuilds
    #[serde(default = "default_bloom_rebuild_interval_secs")]
    pub rebuild_interval_secs: u64,

    /// TTL in seconds for the short-lived positive/negative revocation cache
    #[serde(default = "default_revocation_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            check_threshold: default_revocation_check_threshold(),
            bloom_size: default_bloom_size(),
            bloom_hashes: default_bloom_hashes(),
            rebuild_interval_secs: default_bloom_rebuild_interval_secs(),
            cache_ttl_secs: default_revocation_cache_ttl_secs(),
        }
    }
}

/// JWKS cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwksCacheConfig {
    /// Default TTL in seconds for a cached provider's key set
    #[serde(default = "default_jwks_ttl_secs")]
    pub ttl_secs: u64,

    /// Minimum TTL honored even if a provider asks for a shorter one
    #[serde(default = "default_jwks_min_ttl_secs")]
    pub min_ttl_secs: u64,

    /// Maximum TTL honored even if a provider asks for a longer one
    #[serde(default = "default_jwks_max_ttl_secs")]
    pub max_ttl_secs: u64,

    /// Timeout in seconds for the JWKS HTTP fetch itself
    #[serde(default = "default_jwks_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_jwks_ttl_secs(),
            min_ttl_secs: default_jwks_min_ttl_secs(),
            max_ttl_secs: default_jwks_max_ttl_secs(),
            request_timeout_secs: default_jwks_request_timeout_secs(),
        }
    }
}

/// Route translation cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// TTL in seconds for a cached active translation config version
    #[serde(default = "default_translation_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Maximum number of translation config versions held in cache
    #[serde(default = "default_translation_cache_max_size")]
    pub cache_max_size: usize,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_translation_cache_ttl_secs(),
            cache_max_size: default_translation_cache_max_size(),
        }
    }
}

/// Storage provider selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Explicit provider override ("memory", "redis", "cassandra").
    /// When unset, the highest-priority configured backend is used.
    #[serde(default)]
    pub provider: Option<String>,

    /// Explicit cache-layer provider override, independent of the
    /// system-of-record provider above
    #[serde(default)]
    pub cache_provider: Option<String>,

    /// TTL in seconds applied to cache-layer entries
    #[serde(default = "default_storage_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: None,
            cache_provider: None,
            cache_ttl_secs: default_storage_cache_ttl_secs(),
        }
    }
}

/// Resiliency / timeout configuration for backing stores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResiliencyConfig {
    /// Timeout in milliseconds for a single Redis operation before the
    /// fail-open/fail-closed wrapper engages
    #[serde(default = "default_redis_operation_timeout_ms")]
    pub redis_operation_timeout_ms: u64,
}

impl Default for ResiliencyConfig {
    fn default() -> Self {
        Self {
            redis_operation_timeout_ms: default_redis_operation_timeout_ms(),
        }
    }
}

/// Signing key rotation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRotationConfig {
    /// Whether automatic rotation is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval in seconds between automatic rotations
    #[serde(default = "default_keyrotation_interval_secs")]
    pub interval_secs: u64,

    /// Grace period in seconds a deprecated key remains valid for
    /// verification after a new key becomes active
    #[serde(default = "default_keyrotation_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl Default for KeyRotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_keyrotation_interval_secs(),
            grace_period_secs: default_keyrotation_grace_period_secs(),
        }
    }
}

/// Reverse proxy transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_proxy_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Read timeout in milliseconds for a single upstream response
    #[serde(default = "default_proxy_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Overall deadline in milliseconds for a proxied request, including
    /// retries and streaming
    #[serde(default = "default_proxy_deadline_ms")]
    pub deadline_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_proxy_connect_timeout_ms(),
            read_timeout_ms: default_proxy_read_timeout_ms(),
            deadline_ms: default_proxy_deadline_ms(),
        }
    }
}

impl ProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// WebSocket rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Maximum sustained messages per second per connection
    #[serde(default = "default_ws_message_rate")]
    pub message_rate: u32,

    /// Burst allowance above the sustained message rate
    #[serde(default = "default_ws_burst")]
    pub burst: u32,

    /// Maximum new connections per minute per origin
    #[serde(default = "default_ws_connection_rate")]
    pub connection_rate: u32,

    /// Burst allowance above the sustained connection rate
    #[serde(default = "default_ws_connection_burst")]
    pub connection_burst: u32,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            message_rate: default_ws_message_rate(),
            burst: default_ws_burst(),
            connection_rate: default_ws_connection_rate(),
            connection_burst: default_ws_connection_burst(),
        }
    }
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Path to public key for JWT verification
    pub public_key_path: PathBuf,

    /// JWT algorithm (RS256, ES256, HS256)
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,

    /// JWT issuer to validate
    #[serde(default)]
    pub issuer: Option<String>,

    /// JWT audience to validate
    #[serde(default)]
    pub audience: Option<String>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute per user
    #[serde(default = "default_per_user_rpm")]
    pub per_user_rpm: u32,

    /// Requests per minute per client
    #[serde(default = "default_per_client_rpm")]
    pub per_client_rpm: u32,

    /// Rate limit window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (redis://host:port or cluster URLs)
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: usize,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Maximum retry attempts for establishing Redis connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Whether Redis is optional (service can start without it)
    #[serde(default = "default_false")]
    pub optional: bool,

    /// Whether to initialize connection lazily (in background)
    #[serde(default = "default_lazy_init")]
    pub lazy_init: bool,
}

/// Middleware configuration (all optional, feature-gated)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    /// Request tracking configuration (request IDs, header propagation)
    #[serde(default)]
    pub request_tracking: RequestTrackingConfig,

    /// HTTP metrics configuration (per-`GatewayResult`-variant counters)
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,

    /// Request body size limit in MB
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,

    /// Enable panic recovery middleware
    #[serde(default = "default_true")]
    pub catch_panic: bool,

    /// Enable compression
    #[serde(default = "default_true")]
    pub compression: bool,

    /// CORS configuration
    #[serde(default = "default_cors_mode")]
    pub cors_mode: String,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            request_tracking: RequestTrackingConfig::default(),
            metrics: None,
            body_limit_mb: default_body_limit_mb(),
            catch_panic: true,
            compression: true,
            cors_mode: default_cors_mode(),
        }
    }
}

/// Request tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTrackingConfig {
    /// Enable request ID generation
    #[serde(default = "default_true")]
    pub request_id_enabled: bool,

    /// Request ID header name
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,

    /// Enable header propagation
    #[serde(default = "default_true")]
    pub propagate_headers: bool,

    /// Enable sensitive header masking in logs
    #[serde(default = "default_true")]
    pub mask_sensitive_headers: bool,
}

impl Default for RequestTrackingConfig {
    fn default() -> Self {
        Self {
            request_id_enabled: true,
            request_id_header: default_request_id_header(),
            propagate_headers: true,
            mask_sensitive_headers: true,
        }
    }
}

/// HTTP metrics configuration (OpenTelemetry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics collection
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Include request path in metrics
    #[serde(default = "default_true")]
    pub include_path: bool,

    /// Include request method in metrics
    #[serde(default = "default_true")]
    pub include_method: bool,

    /// Include status code in metrics
    #[serde(default = "default_true")]
    pub include_status: bool,

    /// Histogram buckets for latency (in milliseconds)
    #[serde(default = "default_latency_buckets")]
    pub latency_buckets_ms: Vec<f64>,
}

impl MetricsConfig {
    pub fn latency_buckets_as_duration(&self) -> Vec<Duration> {
        self.latency_buckets_ms
            .iter()
            .map(|&ms| Duration::from_millis(ms as u64))
            .collect()
    }
}

// Default value functions
fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_jwt_algorithm() -> String {
    "RS256".to_string()
}

fn default_per_user_rpm() -> u32 {
    200
}

fn default_per_client_rpm() -> u32 {
    1000
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_connections() -> u32 {
    50
}

fn default_min_connections() -> u32 {
    5
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_redis_max_connections() -> usize {
    20
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

fn default_lazy_init() -> bool {
    true
}

// Middleware default functions
fn default_body_limit_mb() -> usize {
    10 // 10 MB
}

fn default_cors_mode() -> String {
    "permissive".to_string()
}

fn default_request_id_header() -> String {
    "x-request-id".to_string()
}

// Metrics default functions
fn default_latency_buckets() -> Vec<f64> {
    vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
}

// Gateway default functions
fn default_reserved_paths() -> Vec<String> {
    vec!["admin".to_string(), "gateway".to_string(), "q".to_string()]
}

// Auth rate limit / lockout default functions
fn default_max_failed_attempts() -> u32 {
    5
}

fn default_auth_window_secs() -> u64 {
    300
}

fn default_base_lockout_ms() -> u64 {
    1000
}

fn default_lockout_multiplier() -> f64 {
    1.5
}

fn default_max_lockout_ms() -> u64 {
    300_000 // 5 minutes
}

// Revocation default functions
fn default_revocation_check_threshold() -> u64 {
    30
}

fn default_bloom_size() -> usize {
    1_000_000
}

fn default_bloom_hashes() -> u32 {
    7
}

fn default_bloom_rebuild_interval_secs() -> u64 {
    3600
}

fn default_revocation_cache_ttl_secs() -> u64 {
    30
}

// JWKS cache default functions
fn default_jwks_ttl_secs() -> u64 {
    600
}

fn default_jwks_min_ttl_secs() -> u64 {
    60
}

fn default_jwks_max_ttl_secs() -> u64 {
    86_400
}

fn default_jwks_request_timeout_secs() -> u64 {
    5
}

// Translation cache default functions
fn default_translation_cache_ttl_secs() -> u64 {
    60
}

fn default_translation_cache_max_size() -> usize {
    1000
}

// Storage default functions
fn default_storage_cache_ttl_secs() -> u64 {
    30
}

// Resiliency default functions
fn default_redis_operation_timeout_ms() -> u64 {
    250
}

// Key rotation default functions
fn default_keyrotation_interval_secs() -> u64 {
    86_400 * 30 // 30 days
}

fn default_keyrotation_grace_period_secs() -> u64 {
    86_400 * 7 // 7 days
}

// Proxy default functions
fn default_proxy_connect_timeout_ms() -> u64 {
    2000
}

fn default_proxy_read_timeout_ms() -> u64 {
    30_000
}

fn default_proxy_deadline_ms() -> u64 {
    60_000
}

// WebSocket default functions
fn default_ws_message_rate() -> u32 {
    100
}

fn default_ws_burst() -> u32 {
    50
}

fn default_ws_connection_rate() -> u32 {
    10
}

fn default_ws_connection_burst() -> u32 {
    5
}

impl<T> Config<T>
where
    T: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static,
{
    /// Load configuration from all sources
    ///
    /// Searches for config files in this order (first found is used):
    /// 1. Current working directory: ./config.toml
    /// 2. XDG config directory: ~/.config/aussie-gateway/{service_name}/config.toml
    /// 3. System directory: /etc/aussie-gateway/{service_name}/config.toml
    ///
    /// Environment variables (AUSSIE_ prefix) override all file-based configs.
    pub fn load() -> Result<Self> {
        // Try to infer service name from binary name or use default
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "aussie-gateway".to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    ///
    /// This is the recommended way to load config in production.
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        // Log which config paths we're checking
        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::<T>::default()));

        // Merge config files in reverse order (lowest priority first)
        // so that higher priority files override lower ones
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        // Environment variables have highest priority
        figment = figment.merge(Env::prefixed("AUSSIE_").split("_"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// This bypasses XDG directories and loads directly from the given path.
    /// Useful for testing or non-standard deployments.
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::<T>::default()))
            // Load from config file (if exists)
            .merge(Toml::file(path))
            // Override with environment variables
            .merge(Env::prefixed("AUSSIE_").split("_"))
            .extract()?;

        Ok(config)
    }

    /// Find all possible config file paths for a service
    ///
    /// Returns paths in priority order (highest first):
    /// 1. Current working directory
    /// 2. XDG config directory
    /// 3. System directory
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Current working directory (highest priority for dev/testing)
        paths.push(PathBuf::from("config.toml"));

        // 2. XDG config directory (~/.config/aussie-gateway/{service_name}/config.toml)
        let xdg_dirs = xdg::BaseDirectories::with_prefix("aussie-gateway");
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Ok(path) = xdg_dirs.place_config_file(&config_file_path) {
            paths.push(path);
        }

        // 3. System-wide directory (/etc/aussie-gateway/{service_name}/config.toml)
        paths.push(PathBuf::from("/etc/aussie-gateway").join(service_name).join("config.toml"));

        paths
    }

    /// Get the recommended config path for a service
    ///
    /// This is where the config file should be placed in production.
    /// Returns: ~/.config/aussie-gateway/{service_name}/config.toml
    pub fn recommended_path(service_name: &str) -> PathBuf {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("aussie-gateway");
        let config_file_path = Path::new(service_name).join("config.toml");

        // place_config_file creates parent directories if needed
        xdg_dirs.place_config_file(&config_file_path)
            .unwrap_or_else(|_| {
                // Fallback to manual path construction if place_config_file fails
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| String::from("~")))
                    .join(".config/aussie-gateway")
                    .join(service_name)
                    .join("config.toml")
            })
    }

    /// Create the config directory structure for a service
    ///
    /// Creates ~/.config/aussie-gateway/{service_name}/ if it doesn't exist
    pub fn create_config_dir(service_name: &str) -> Result<PathBuf> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("aussie-gateway");
        let config_file_path = Path::new(service_name).join("config.toml");

        // place_config_file creates all necessary parent directories
        let config_path = xdg_dirs.place_config_file(&config_file_path)
            .map_err(|e| crate::error::Error::Internal(format!("Failed to create config directory: {}", e)))?;

        // Return the directory path, not the file path
        Ok(config_path.parent()
            .ok_or_else(|| crate::error::Error::Internal("Invalid config path".to_string()))?
            .to_path_buf())
    }

    /// Get Redis URL
    pub fn redis_url(&self) -> Option<&str> {
        self.redis.as_ref().map(|r| r.url.as_str())
    }
}

impl<T> Default for Config<T>
where
    T: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "aussie-gateway".to_string(),
                port: default_port(),
                log_level: default_log_level(),
                timeout_secs: default_timeout(),
                environment: default_environment(),
            },
            jwt: JwtConfig {
                public_key_path: PathBuf::from("./keys/jwt-public.pem"),
                algorithm: default_jwt_algorithm(),
                issuer: None,
                audience: None,
            },
            rate_limit: RateLimitConfig {
                per_user_rpm: default_per_user_rpm(),
                per_client_rpm: default_per_client_rpm(),
                window_secs: default_window_secs(),
            },
            middleware: MiddlewareConfig::default(),
            redis: None,
            gateway: GatewayConfig::default(),
            auth_rate_limit: AuthRateLimitConfig::default(),
            revocation: RevocationConfig::default(),
            jwks: JwksCacheConfig::default(),
            translation: TranslationConfig::default(),
            storage: StorageConfig::default(),
            resiliency: ResiliencyConfig::default(),
            keyrotation: KeyRotationConfig::default(),
            proxy: ProxyConfig::default(),
            websocket: WebSocketConfig::default(),
            api_keys: ApiKeyConfig::default(),
            token_providers: Vec::new(),
            extra: T::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::<()>::default();
        assert_eq!(config.service.port, 8080);
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.rate_limit.per_user_rpm, 200);
    }

    #[test]
    fn test_gateway_defaults() {
        let config = Config::<()>::default();
        assert_eq!(config.gateway.reserved_paths, vec!["admin", "gateway", "q"]);
        assert_eq!(config.auth_rate_limit.max_failed_attempts, 5);
        assert!((config.auth_rate_limit.multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.revocation.check_threshold, 30);
        assert_eq!(config.jwks.ttl_secs, 600);
        assert_eq!(config.storage.provider, None);
        assert_eq!(config.keyrotation.interval_secs, 86_400 * 30);
    }
}
