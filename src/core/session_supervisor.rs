//! 会话监管：中断管理
//!
//! 每个会话持有一个 SessionSupervisor。每次处理消息前 begin_exchange 取得新的 CancellationToken，
//! cancel 只取消当前这一轮；会话结束时 shutdown 取消根 token，之后的轮次立即被取消。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// 会话级取消管理：根 token + 当前轮次的子 token
#[derive(Debug)]
pub struct SessionSupervisor {
    /// 会话结束时触发
    root: CancellationToken,
    current: Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let current = Mutex::new(root.child_token());
        Self { root, current }
    }

    /// 开始新一轮，返回该轮的取消令牌
    pub fn begin_exchange(&self) -> CancellationToken {
        let token = self.root.child_token();
        match self.current.lock() {
            Ok(mut current) => *current = token.clone(),
            Err(poisoned) => *poisoned.into_inner() = token.clone(),
        }
        token
    }

    /// 取消当前轮次（排队中的下一轮不受影响）
    pub fn cancel(&self) {
        match self.current.lock() {
            Ok(current) => current.cancel(),
            Err(poisoned) => poisoned.into_inner().cancel(),
        }
    }

    /// 结束会话：取消所有轮次
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
