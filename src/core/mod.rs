//! 核心编排层：错误与恢复、单轮状态机、会话注册表、工具并发调度

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod recovery;
pub mod session;
pub mod state;
pub mod task_scheduler;

pub use error::{AgentError, RecoveryAction};
pub use events::TurnEvent;
pub use orchestrator::ConversationOrchestrator;
pub use recovery::{RecoveryEngine, STORAGE_APOLOGY};
pub use session::{ConversationSession, SessionRegistry};
pub use state::{TurnReply, TurnState, TurnStatus};
pub use task_scheduler::TaskScheduler;
