//! # Database Configuration
//!
//! Connection and engine configuration for the caderneta database.

use std::path::PathBuf;
use std::time::Duration;

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/data/caderneta.db")
///     .open_timeout(Duration::from_secs(8))
///     .conservative_durability(true);
/// let db = Database::connect(config).await?;
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    ///
    /// Must be the engine's own default-storage location on device, NOT a
    /// sandboxed documents directory: the file has to survive the mobile
    /// OS's app-storage rules bit for bit.
    pub database_path: PathBuf,

    /// Upper bound on how long an open attempt may take.
    /// Default: 8 seconds.
    pub open_timeout: Duration,

    /// Default per-transaction timeout.
    /// Default: 5 seconds.
    pub transaction_timeout: Duration,

    /// How long a writer waits on SQLite's internal lock before failing.
    /// Default: 30 seconds.
    pub busy_timeout: Duration,

    /// Consecutive health-probe failures tolerated before the connection
    /// state is wiped and rebuilt from scratch.
    /// Default: 3.
    pub max_retries: u32,

    /// Use the conservative durability profile (synchronous=FULL).
    ///
    /// Old/low-end devices lose power mid-write often enough that the
    /// faster NORMAL setting is not worth it there.
    /// Default: false (synchronous=NORMAL under WAL).
    pub conservative_durability: bool,

    /// Row cap appended to unbounded `get_all` statements.
    /// Default: 10,000.
    pub max_rows: i64,

    /// Whether `connect()` runs schema initialization (migrations,
    /// indexes, FTS probe). Tests that need to seed legacy data before
    /// the migration engine runs turn this off.
    /// Default: true.
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a configuration with the given database file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            open_timeout: Duration::from_secs(8),
            transaction_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(30),
            max_retries: 3,
            conservative_durability: false,
            max_rows: 10_000,
            run_migrations: true,
        }
    }

    /// Sets the open timeout.
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Sets the default transaction timeout.
    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Sets the busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the health-probe retry ceiling.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Selects the conservative durability profile.
    pub fn conservative_durability(mut self, conservative: bool) -> Self {
        self.conservative_durability = conservative;
        self
    }

    /// Sets the unbounded-query row cap.
    pub fn max_rows(mut self, max_rows: i64) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Sets whether `connect()` initializes the schema.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// In-memory database configuration (for testing).
    ///
    /// ## Usage
    /// ```rust,ignore
    /// let db = Database::connect(DbConfig::in_memory()).await?;
    /// // Isolated, disappears on close - perfect for tests
    /// ```
    pub fn in_memory() -> Self {
        DbConfig::new(":memory:").open_timeout(Duration::from_secs(5))
    }

    /// Whether this config points at an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == ":memory:"
    }
}
