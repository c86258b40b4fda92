//! Payment Webhook Handler
//!
//! 验签 → 去重 → 落账 → 尝试启动默认序列。
//! 机器离线或占用时序列就是不启动（没有补跑队列），支付照记 ——
//! 这是规约行为，不是缺陷。处理失败也回 200，防止通知方无限重试。

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::core::ServerState;
use crate::db::models::{Transaction, TransactionStatus};
use crate::utils::{AppError, AppResult};
use shared::util::now_millis;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug, serde::Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    payload: Option<WebhookPayload>,
}

#[derive(Debug, serde::Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    payment: Option<PaymentWrapper>,
}

#[derive(Debug, serde::Deserialize)]
struct PaymentWrapper {
    #[serde(default)]
    entity: Option<PaymentEntity>,
}

#[derive(Debug, serde::Deserialize)]
struct PaymentEntity {
    id: String,
    /// Minor currency units (notifier convention)
    amount: i64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    vpa: Option<String>,
    #[serde(default)]
    notes: Option<serde_json::Value>,
}

impl PaymentEntity {
    /// machine id 藏在 description 或 notes.machine_id 里
    fn machine_id(&self) -> Option<String> {
        if let Some(desc) = &self.description
            && !desc.trim().is_empty()
        {
            return Some(desc.trim().to_string());
        }
        self.notes
            .as_ref()
            .and_then(|n| n.get("machine_id").or_else(|| n.get("machineId")))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    match hex::decode(signature_hex) {
        Ok(signature) => mac.verify_slice(&signature).is_ok(),
        Err(_) => false,
    }
}

/// POST /api/payments/webhook - 支付通知回调
pub async fn webhook(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    if state.config.webhook_secret.is_empty() {
        tracing::error!("WEBHOOK_SECRET not configured, rejecting webhook");
        return Err(AppError::internal("Webhook secret not configured"));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::invalid("Missing signature"))?;

    if !verify_signature(&state.config.webhook_secret, &body, signature) {
        tracing::warn!("Webhook signature verification failed");
        return Err(AppError::invalid("Invalid signature"));
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body)
        .map_err(|e| AppError::invalid(format!("Invalid payload: {}", e)))?;

    let entity = envelope
        .payload
        .and_then(|p| p.payment)
        .and_then(|p| p.entity);
    let Some(entity) = entity else {
        return Err(AppError::invalid("Invalid payload structure"));
    };

    let result = match envelope.event.as_str() {
        "payment.captured" => handle_payment_captured(&state, entity).await,
        "payment.failed" => handle_payment_failed(&state, entity).await,
        other => {
            tracing::debug!(event = %other, "Unhandled webhook event");
            Ok(())
        }
    };

    // 通知方只需要知道"收到了"；处理失败走事件日志，不走重试
    match result {
        Ok(()) => Ok(Json(serde_json::json!({
            "success": true,
            "message": "Webhook processed",
            "event": envelope.event,
        }))),
        Err(e) => {
            tracing::error!(event = %envelope.event, error = %e, "Webhook processing failed");
            Ok(Json(serde_json::json!({
                "success": false,
                "message": e.to_string(),
                "event": envelope.event,
            })))
        }
    }
}

async fn handle_payment_captured(state: &ServerState, entity: PaymentEntity) -> AppResult<()> {
    let machine_id = entity
        .machine_id()
        .ok_or_else(|| AppError::invalid("Machine ID not found in payment"))?;

    let machine = state
        .machines
        .find_by_machine_id(&machine_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Machine '{}' not registered", machine_id)))?;

    // webhook 重放去重：同一 payment id 只处理一次，绝不二次启动序列
    if state
        .transactions
        .find_by_payment_id(&entity.id)
        .await?
        .is_some()
    {
        tracing::info!(payment = %entity.id, "Duplicate payment notification, skipping");
        return Ok(());
    }

    let machine_record_id = machine
        .id
        .clone()
        .ok_or_else(|| AppError::internal("Machine record has no id"))?;
    let amount = entity.amount as f64 / 100.0;
    let now = now_millis();

    let txn = state
        .transactions
        .create(Transaction {
            id: None,
            machine: machine_record_id,
            payment_id: entity.id.clone(),
            order_id: entity.order_id.clone(),
            amount,
            currency: entity.currency.clone().unwrap_or_else(|| "INR".to_string()),
            payer_ref: entity.vpa.clone(),
            status: TransactionStatus::Completed,
            sequence: None,
            sequence_started: false,
            sequence_completed: false,
            sequence_start_time: None,
            sequence_end_time: None,
            created_at: now,
            updated_at: now,
        })
        .await?;

    state.events.payment_received(&machine, &entity.id, amount).await;
    tracing::info!(
        machine = %machine.machine_id,
        payment = %entity.id,
        amount = amount,
        "Payment recorded"
    );

    let sequence = state
        .sequences
        .find_default()
        .await?
        .ok_or_else(|| AppError::not_found("No default sequence configured"))?;

    // 设备不在线就不启动，也不排队补跑 —— 支付已入账，仅此而已
    if !machine.is_online(now, state.config.heartbeat_timeout_ms) {
        tracing::warn!(
            machine = %machine.machine_id,
            "Machine offline, payment recorded without starting sequence"
        );
        return Ok(());
    }
    if machine.process_locked {
        tracing::warn!(
            machine = %machine.machine_id,
            "Machine busy, payment recorded without starting sequence"
        );
        return Ok(());
    }

    state
        .engine
        .start_sequence(&machine.key(), &sequence.key(), Some(txn.key()))
        .await?;

    Ok(())
}

async fn handle_payment_failed(state: &ServerState, entity: PaymentEntity) -> AppResult<()> {
    let machine = match entity.machine_id() {
        Some(machine_id) => state.machines.find_by_machine_id(&machine_id).await?,
        None => None,
    };

    state
        .events
        .payment_failed(machine.as_ref(), &entity.id, "payment.failed notification")
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_roundtrip() {
        let secret = "test-secret";
        let body = br#"{"event":"payment.captured"}"#;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(secret, body, &signature));
        assert!(!verify_signature(secret, body, "deadbeef"));
        assert!(!verify_signature(secret, body, "not-hex"));
        assert!(!verify_signature("other-secret", body, &signature));
    }

    #[test]
    fn machine_id_prefers_description_over_notes() {
        let entity = PaymentEntity {
            id: "pay_1".into(),
            amount: 1000,
            currency: None,
            order_id: None,
            description: Some("VND-001".into()),
            vpa: None,
            notes: Some(serde_json::json!({ "machine_id": "VND-002" })),
        };
        assert_eq!(entity.machine_id().as_deref(), Some("VND-001"));

        let entity = PaymentEntity {
            description: None,
            ..entity
        };
        assert_eq!(entity.machine_id().as_deref(), Some("VND-002"));
    }
}
