pub mod accumulator;
pub mod broadcast;
pub mod criteria;
pub mod error;
pub mod instance;
pub mod progress;
pub mod registry;
pub mod throttle;

pub use accumulator::{MessageLog, ResultAccumulator, ResultExport};
pub use broadcast::{ProgressBroadcaster, SearchSubscription};
pub use criteria::{Deck, SearchCriteria, Stake};
pub use error::{RegistryError, StartError};
pub use instance::{SearchInstance, SearchSummary};
pub use progress::{JobId, Outcome, SearchEvent, SearchProgress, SearchResult, SearchState};
pub use registry::{SearchId, SearchRegistry};
pub use throttle::{ProgressThrottle, ThrottleConfig};
