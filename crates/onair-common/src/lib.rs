pub mod clock;
pub mod errors;
pub mod events;
pub mod id;
pub mod notifications;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{ConfigError, LiveError, StoreError};
pub use events::{EventBus, LiveEvent};
pub use id::{new_id, new_negotiation_id};
pub use notifications::{
    ChannelSink, Notification, NotificationKind, NotificationSink, TracingSink,
};

pub type Result<T> = std::result::Result<T, LiveError>;
