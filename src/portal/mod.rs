pub mod browser;
pub mod countdown;
pub mod discovery;
pub mod form;
pub mod session;
pub mod submitter;
pub mod traits;
pub mod types;
pub mod waiter;

pub use browser::ChromeAuthenticator;
pub use countdown::CountdownResolver;
pub use discovery::{parse_price, ListingDiscovery};
pub use session::{Session, SessionManager};
pub use submitter::ApplicationSubmitter;
pub use traits::{Authenticator, FixedClock, SystemClock, WallClock};
pub use types::{LoginArtifacts, SearchMode, SearchParams};
pub use waiter::{ScheduledWaiter, WaitOutcome};
