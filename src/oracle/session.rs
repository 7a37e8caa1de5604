//! 建议请求会话
//!
//! 每次请求领取一个代际号。新请求、显式取消或本地结构编辑都会推进代际，
//! 之前的请求随即被视为取消；结果只有在代际仍然是当前值时才允许提交。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::parse::{parse_bone_suggestions, parse_keyframes, SuggestedKeyframe};
use super::{OracleError, OracleRequest, SuggestionOracle};
use crate::skeleton::Skeleton;
use crate::suggestion::BoneSuggestion;

/// 请求凭据
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestTicket {
    generation: u64,
}

impl RequestTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// 请求会话（可克隆，克隆体共享代际计数）
#[derive(Clone, Debug)]
pub struct OracleSession {
    generation: Arc<watch::Sender<u64>>,
    timeout: Duration,
}

impl OracleSession {
    pub fn new(timeout: Duration) -> Self {
        let (sender, _) = watch::channel(0);
        Self {
            generation: Arc::new(sender),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 开始新请求，之前的请求全部失效
    pub fn begin(&self) -> RequestTicket {
        let mut generation = 0;
        self.generation.send_modify(|g| {
            *g += 1;
            generation = *g;
        });
        RequestTicket { generation }
    }

    /// 取消进行中的请求
    pub fn cancel(&self) {
        self.generation.send_modify(|g| *g += 1);
        log::debug!("取消建议请求，代际 {}", *self.generation.borrow());
    }

    pub fn is_current(&self, ticket: &RequestTicket) -> bool {
        *self.generation.borrow() == ticket.generation
    }

    /// 发送请求并等待原始文本，带超时与取消
    pub async fn request_raw<O: SuggestionOracle>(
        &self,
        oracle: &O,
        request: &OracleRequest,
    ) -> Result<(RequestTicket, String), OracleError> {
        let ticket = self.begin();
        let superseded = wait_superseded(self.generation.subscribe(), ticket.generation);

        let text = tokio::select! {
            result = tokio::time::timeout(self.timeout, oracle.request(request)) => match result {
                Ok(response) => response?,
                Err(_) => {
                    log::warn!("建议请求超时 ({:?})", self.timeout);
                    return Err(OracleError::Timeout(self.timeout));
                }
            },
            _ = superseded => return Err(OracleError::Cancelled),
        };

        if !self.is_current(&ticket) {
            return Err(OracleError::Cancelled);
        }
        Ok((ticket, text))
    }

    /// 请求骨骼建议
    pub async fn request_bones<O: SuggestionOracle>(
        &self,
        oracle: &O,
        request: &OracleRequest,
    ) -> Result<(RequestTicket, Vec<BoneSuggestion>), OracleError> {
        let (ticket, text) = self.request_raw(oracle, request).await?;
        let bones = parse_bone_suggestions(&text)?;
        log::info!("建议服务返回 {} 个有效骨骼", bones.len());
        Ok((ticket, bones))
    }

    /// 请求动画关键帧（骨骼名按传入骨架校验）
    pub async fn request_animation<O: SuggestionOracle>(
        &self,
        oracle: &O,
        request: &OracleRequest,
        skeleton: &Skeleton,
    ) -> Result<(RequestTicket, Vec<SuggestedKeyframe>), OracleError> {
        let (ticket, text) = self.request_raw(oracle, request).await?;
        let keys = parse_keyframes(&text, skeleton)?;
        log::info!("建议服务返回 {} 个有效关键帧", keys.len());
        Ok((ticket, keys))
    }
}

impl Default for OracleSession {
    /// 默认超时 5 分钟
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

/// 代际离开 `generation` 时完成
async fn wait_superseded(mut receiver: watch::Receiver<u64>, generation: u64) {
    loop {
        if *receiver.borrow_and_update() != generation {
            return;
        }
        if receiver.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::NoopOracle;

    struct FixedOracle(&'static str);

    impl SuggestionOracle for FixedOracle {
        async fn request(&self, _request: &OracleRequest) -> Result<String, OracleError> {
            Ok(self.0.to_string())
        }
    }

    struct SlowOracle(Duration);

    impl SuggestionOracle for SlowOracle {
        async fn request(&self, _request: &OracleRequest) -> Result<String, OracleError> {
            tokio::time::sleep(self.0).await;
            Ok(r#"{"bones": [{"name": "root", "position": [0, 0, 0]}]}"#.to_string())
        }
    }

    fn request() -> OracleRequest {
        OracleRequest::Animation {
            skeleton_description: String::new(),
            free_text_prompt: "wave".to_string(),
        }
    }

    #[tokio::test]
    async fn test_successful_request_is_current() {
        let session = OracleSession::default();
        let oracle = FixedOracle(r#"ok: {"bones": [{"name": "root", "position": [0, 0, 0]}]}"#);
        let (ticket, bones) = session.request_bones(&oracle, &request()).await.unwrap();
        assert_eq!(bones.len(), 1);
        assert!(session.is_current(&ticket));

        session.cancel();
        assert!(!session.is_current(&ticket));
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let session = OracleSession::new(Duration::from_millis(20));
        let err = session
            .request_bones(&SlowOracle(Duration::from_secs(5)), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let session = OracleSession::new(Duration::from_secs(10));
        let canceller = session.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = session
            .request_bones(&SlowOracle(Duration::from_secs(5)), &request())
            .await
            .unwrap_err();
        assert_eq!(err, OracleError::Cancelled);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_noop_and_validation_errors() {
        let session = OracleSession::default();
        assert_eq!(
            session.request_bones(&NoopOracle, &request()).await.unwrap_err(),
            OracleError::Unavailable
        );
        let err = session
            .request_bones(&FixedOracle("not json"), &request())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }
}
