pub mod error;
pub mod fetcher;
pub mod plan;
pub mod reporter;
pub mod scheduler;
pub mod synthesizer;
pub mod writer;

pub use error::{EntryError, FetchError, WriteError};
pub use fetcher::{BinanceFetcher, FetcherSettings, KlineSource};
pub use plan::{CollectionPlan, PlanEntry, TimeframeSource};
pub use reporter::Reporter;
pub use scheduler::{EntryOutcome, EntryWrite, RoundReport, RoundScheduler};
pub use synthesizer::{SkipReason, SynthesisOutcome, Synthesizer};
pub use writer::{DedupWriter, WriteSummary};
