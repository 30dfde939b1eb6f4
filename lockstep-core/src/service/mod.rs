pub mod chat;
pub mod hub;
pub mod password;
pub mod presence;
pub mod registry;
pub mod session;

pub use chat::{chat_backlog, ChatSequencer};
pub use hub::{ConnectionId, EventHub, EventSender, Subscriber};
pub use password::{hash_password, verify_password};
pub use presence::PresenceLedger;
pub use registry::{RoomCreated, RoomRegistry};
pub use session::{JoinResult, LeaveOutcome, RoomSession};
