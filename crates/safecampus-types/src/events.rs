use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageResponse;
use crate::models::{Alert, AlertStatus, Department};

/// Events pushed over the real-time gateway. Delivery is best-effort and
/// at-most-once; clients re-fetch on reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Sent once after the upgrade so the client knows the push channel is live
    Ready { user_id: Uuid },

    /// A student raised an alert for the recipient's department
    NewAlert {
        alert_id: Uuid,
        department: Department,
        alert: Alert,
    },

    /// One of the recipient's alerts changed status
    AlertUpdated { alert_id: Uuid, status: AlertStatus },

    /// A message was posted to a chat session the recipient takes part in
    ChatMessage {
        session_id: Uuid,
        message: MessageResponse,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SenderRole;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn alert_updated_wire_shape() {
        let id = Uuid::new_v4();
        let event = GatewayEvent::AlertUpdated {
            alert_id: id,
            status: AlertStatus::Dispatched,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "alert_updated", "alertId": id, "status": "dispatched" })
        );
    }

    #[test]
    fn chat_message_omits_hidden_sender() {
        let session_id = Uuid::new_v4();
        let event = GatewayEvent::ChatMessage {
            session_id,
            message: MessageResponse {
                id: Uuid::new_v4(),
                session_id,
                sender_id: None,
                sender_role: SenderRole::Student,
                content: "hello".into(),
                attachment_url: None,
                is_read: false,
                created_at: Utc::now(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "chat_message");
        assert_eq!(value["sessionId"], json!(session_id));
        assert!(value["message"].get("senderId").is_none());
        assert_eq!(value["message"]["senderRole"], "student");
    }
}
