use std::time::Duration;

use thiserror::Error;

/// 外部建议服务错误
///
/// 超时与传输失败可重试；格式错误与无有效建议属于校验失败。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("oracle request timed out after {0:?}")]
    Timeout(Duration),

    #[error("oracle transport failure: {0}")]
    Transport(String),

    #[error("oracle request was cancelled or superseded")]
    Cancelled,

    #[error("malformed oracle response: {0}")]
    Malformed(String),

    #[error("oracle response contained no valid suggestions")]
    NoValidSuggestions,

    #[error("no suggestion oracle configured")]
    Unavailable,
}

impl OracleError {
    /// 是否为可直接重试的失败（超时 / 网络）
    pub fn is_retryable(&self) -> bool {
        matches!(self, OracleError::Timeout(_) | OracleError::Transport(_))
    }

    /// 是否为响应内容校验失败
    pub fn is_validation(&self) -> bool {
        matches!(self, OracleError::Malformed(_) | OracleError::NoValidSuggestions)
    }
}
