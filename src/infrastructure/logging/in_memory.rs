use crate::core::errors::LedgerError;
use crate::core::models::audit::AppLog;
use crate::infrastructure::logging::LoggingService;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct InMemoryLogging {
    logs: Arc<RwLock<Vec<AppLog>>>,
}

impl InMemoryLogging {
    pub fn new() -> Self {
        InMemoryLogging {
            logs: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

#[async_trait]
impl LoggingService for InMemoryLogging {
    async fn log_action(
        &self,
        action: &str,
        details: serde_json::Value,
        user_id: Option<&str>,
    ) -> Result<(), LedgerError> {
        let mut logs = self.logs.write().await;
        logs.push(AppLog {
            id: Uuid::new_v4().to_string(),
            action: action.to_string(),
            user_id: user_id.map(String::from),
            details: serde_json::from_value(details)
                .map_err(|e| LedgerError::LoggingError(format!("Failed to serialize log details: {}", e)))?,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    async fn get_logs(&self) -> Result<Vec<AppLog>, LedgerError> {
        let logs = self.logs.read().await;
        Ok(logs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn records_actions_in_order() {
        let logging = InMemoryLogging::new();
        logging.log_action("first", json!({ "n": 1 }), Some("u1")).await.unwrap();
        logging.log_action("second", json!({ "n": 2 }), None).await.unwrap();

        let logs = logging.get_logs().await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].action, "first");
        assert_eq!(logs[0].user_id.as_deref(), Some("u1"));
        assert_eq!(logs[1].details.get("n"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn rejects_non_object_details() {
        let logging = InMemoryLogging::new();
        let result = logging.log_action("bad", json!([1, 2, 3]), None).await;
        assert!(matches!(result, Err(LedgerError::LoggingError(_))));
    }
}
