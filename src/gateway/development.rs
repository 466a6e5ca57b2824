use std::time::Duration;

use async_trait::async_trait;

use super::prompt::{detect_language, Language};
use super::{AgentGateway, GatewayError, ReplyRequest, ReplyStream};

const REPLY_AR: &str = "مرحباً! هذا رد تجريبي من منصة جولة. النظام يعمل في وضع التطوير.";
const REPLY_EN: &str =
    "Hello! This is a mock response from Joulaa Platform. System is running in development mode.";

/// Canned bilingual reply streamed word by word, used when no provider key
/// is configured.
#[derive(Debug, Clone)]
pub struct DevelopmentGateway {
    word_delay: Duration,
}

impl Default for DevelopmentGateway {
    fn default() -> Self {
        Self::new(Duration::from_millis(40))
    }
}

impl DevelopmentGateway {
    pub fn new(word_delay: Duration) -> Self {
        Self { word_delay }
    }

    pub fn reply_for(message: &str) -> &'static str {
        match detect_language(message) {
            Language::Arabic => REPLY_AR,
            Language::English => REPLY_EN,
        }
    }
}

#[async_trait]
impl AgentGateway for DevelopmentGateway {
    fn name(&self) -> &'static str {
        "development"
    }

    async fn stream_reply(&self, request: ReplyRequest) -> Result<ReplyStream, GatewayError> {
        let reply = Self::reply_for(&request.message);
        let delay = self.word_delay;
        Ok(Box::pin(async_stream::stream! {
            for word in reply.split_inclusive(' ') {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok::<_, GatewayError>(word.to_string());
            }
        }))
    }
}
