/// 核心业务服务 / Core services: access control, fanout, lifecycle, messages, history, talk list

pub mod authorize;
pub mod clock;
pub mod history;
pub mod lifecycle;
pub mod notify;
pub mod pipeline;
pub mod talks;
pub mod text;

pub use clock::{Clock, ManualClock, SystemClock};
pub use history::{HistoryService, SearchParams};
pub use lifecycle::{ConnectionManager, ConnectionState};
pub use notify::Notifier;
pub use pipeline::{MessagePipeline, PipelineSettings};
pub use talks::TalkListService;
