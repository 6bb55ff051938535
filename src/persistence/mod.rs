// =============================================================================
// Persistence Layer (C15)
// =============================================================================
//
// Single SQLite store (async pool via `sqlx`) backing candles, paper
// positions/account, settings, and signals. Grounded on Zuytan-rustrade's
// `infrastructure/persistence/database.rs` (WAL journal mode, schema created
// if absent, permissive `ALTER TABLE ... ADD COLUMN` migration) and
// `strategy_repository.rs`'s flat repository-per-entity shape, collapsed
// here into fewer files proportionate to this crate's size.

pub mod account;
pub mod candles;
pub mod db;
pub mod positions;
pub mod settings_repo;
pub mod signals_repo;

pub use account::AccountRepository;
pub use candles::CandleRepository;
pub use db::Database;
pub use positions::PositionRepository;
pub use settings_repo::SettingsRepository;
pub use signals_repo::SignalRepository;
