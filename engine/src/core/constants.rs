// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "GeoFilter";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "geofilter";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".geofilter";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "geofilter.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "GEOFILTER_CONFIG";

// =============================================================================
// Environment Variables - Logging / Debug
// =============================================================================

/// Environment variable for debug mode
pub const ENV_DEBUG: &str = "GEOFILTER_DEBUG";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "GEOFILTER_LOG";

// =============================================================================
// Environment Variables - Database
// =============================================================================

/// Environment variable selecting the connection backend (postgres or sqlite)
pub const ENV_DATABASE_BACKEND: &str = "GEOFILTER_DATABASE_BACKEND";

/// Environment variable for the PostgreSQL connection URL
pub const ENV_POSTGRES_URL: &str = "GEOFILTER_POSTGRES_URL";

/// Environment variable for the SQLite database path
pub const ENV_SQLITE_PATH: &str = "GEOFILTER_SQLITE_PATH";

/// Environment variable for the SpatiaLite extension name or path
pub const ENV_SPATIALITE_EXTENSION: &str = "GEOFILTER_SPATIALITE_EXTENSION";

// =============================================================================
// SQLite Defaults
// =============================================================================

/// Default SQLite database path (relative to the working directory)
pub const SQLITE_DEFAULT_PATH: &str = "geofilter.sqlite";

/// Default SpatiaLite loadable extension name
pub const SQLITE_DEFAULT_SPATIALITE_EXTENSION: &str = "mod_spatialite";

/// Maximum SQLite connections (filtering is read-mostly)
pub const SQLITE_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in seconds
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 30;

/// SQLite page cache size (negative = KiB)
pub const SQLITE_CACHE_SIZE: &str = "-64000";

// =============================================================================
// PostgreSQL Defaults
// =============================================================================

/// Default maximum pool connections
pub const POSTGRES_DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default minimum pool connections kept warm
pub const POSTGRES_DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// Default connection acquire timeout in seconds
pub const POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Default idle connection timeout in seconds
pub const POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default statement timeout in seconds
pub const POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// Query Optimizer Defaults
// =============================================================================

/// Below this row count a single direct query is always used
pub const OPTIMIZER_SMALL_DATASET_THRESHOLD: u64 = 10_000;

/// Attribute predicates below this selectivity run first
pub const OPTIMIZER_HIGH_SELECTIVITY_THRESHOLD: f64 = 0.1;

/// Attribute predicates above this selectivity run after the bbox prefilter
pub const OPTIMIZER_MEDIUM_SELECTIVITY_THRESHOLD: f64 = 0.3;

/// Minimum projected candidates for a further bbox/spatial step to pay off
pub const OPTIMIZER_MIN_CANDIDATES_FOR_STEP: u64 = 1_000;

/// Ids per chunk when a candidate set has to be split
pub const OPTIMIZER_DEFAULT_CHUNK_SIZE: usize = 5_000;

/// Largest candidate set sent in a single `IN (...)` clause
pub const OPTIMIZER_MAX_IN_CLAUSE_SIZE: usize = 10_000;

// =============================================================================
// Expression Defaults
// =============================================================================

/// Default number of segments per quarter circle for buffers
pub const DEFAULT_BUFFER_SEGMENTS: u32 = 5;

/// Default geometry column when the caller does not name one
pub const DEFAULT_GEOMETRY_COLUMN: &str = "geom";

/// Expressions longer than this count as complex
pub const EXPRESSION_LONG_LENGTH: usize = 200;

/// Highest complexity score reported by the parser
pub const EXPRESSION_MAX_COMPLEXITY: u8 = 10;

// =============================================================================
// Raster Defaults
// =============================================================================

/// Pixels evaluated between cancellation checks
pub const RASTER_CHUNK_PIXELS: usize = 65_536;
