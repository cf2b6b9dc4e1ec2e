//! Service 模块
//!
//! 密钥库管理、会话守卫、重试策略、托管门面、链客户端与批量构建

pub mod batch_builder;
pub mod chain_client;
pub mod custody;
pub mod keystore_manager;
pub mod retry_policy;
pub mod session_guard;

pub use batch_builder::{BatchBuilder, BatchJob, BatchOutcome, BatchSplit, DispatchReport, NonceSpec};
pub use chain_client::{AccountStateClient, BroadcastClient, BroadcastReceipt, RpcClient};
pub use custody::Custody;
pub use keystore_manager::{KeystoreManager, UnlockedKey};
pub use retry_policy::RetryPolicy;
pub use session_guard::{ReaperHandle, SessionGuard, SessionState};
