// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "tracker";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "tracker.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "TRACKER_CONFIG";

// =============================================================================
// Environment Variables
// =============================================================================

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "TRACKER_LOG";

/// Environment variable for the SQL dialect (sqlite or postgres)
pub const ENV_DIALECT: &str = "TRACKER_DIALECT";

/// Environment variable for the client timezone offset in minutes
pub const ENV_TZ_OFFSET: &str = "TRACKER_TZ_OFFSET";

/// Environment variable for the database connection URL
pub const ENV_DATABASE_URL: &str = "TRACKER_DATABASE_URL";

// =============================================================================
// Query Defaults
// =============================================================================

/// Scope applied to every search unless the filter already mentions it
pub const DEFAULT_EXPRESSION: &str = "not run.archived";

/// Substring whose presence disables the default scope
pub const DEFAULT_MARKER: &str = "run.archived";

/// Default runs table
pub const DEFAULT_RUNS_TABLE: &str = "runs";

/// Default experiments table
pub const DEFAULT_EXPERIMENTS_TABLE: &str = "experiments";

/// Default metrics table (latest value per run and key)
pub const DEFAULT_METRICS_TABLE: &str = "latest_metrics";

/// Default number of rows returned by `search`
pub const DEFAULT_SEARCH_LIMIT: u64 = 100;

// =============================================================================
// Schema Values
// =============================================================================

/// `lifecycle_stage` of an archived run
pub const LIFECYCLE_STAGE_DELETED: &str = "deleted";

/// `status` of an active run
pub const STATUS_RUNNING: &str = "RUNNING";

/// Tables joined by the filter compiler
pub const LATEST_METRICS_TABLE: &str = "latest_metrics";
pub const TAGS_TABLE: &str = "tags";
pub const PARAMS_TABLE: &str = "params";
pub const CONTEXTS_TABLE: &str = "contexts";
