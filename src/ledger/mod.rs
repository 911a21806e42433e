/// Fjall-backed ledger of crawl job records
///
/// The job manager writes every job through to the ledger after each state
/// change when one is configured. On startup `CrawlJobManager::restore` reads
/// the records back so jobs survive a restart.
///
/// ## Layout
///
/// A single `jobs` partition holds `job:{job_id}` -> `JobRecord` (JSON).
///
/// ## Usage
///
/// ```rust,ignore
/// use crawlbox::ledger::FjallLedger;
///
/// let ledger = FjallLedger::open("data/ledger")?;
/// ledger.upsert(&record)?;
/// let record = ledger.get(&record.id)?;
/// ```

pub mod error;
pub mod partitions;
pub mod store;

pub use error::{LedgerError, Result};
pub use store::FjallLedger;
