use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::evidence::{Evidence, EvidenceStore};
use crate::error::AppError;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::fields::{optional_text, MAX_TEXT_LEN};
use crate::observability::metrics::Metrics;
use crate::store::Store;

/// Raw status-change payload as received from a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusChange {
    #[serde(default)]
    pub status: String,
    pub recipient_name: Option<String>,
    pub reason: Option<String>,
    pub photo_proof: Option<String>,
}

/// A validated status change. Each variant carries exactly the fields its
/// target status accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Pending,
    InTransit,
    Delivered {
        recipient_name: String,
        evidence: Evidence,
    },
    NotDelivered {
        reason: String,
        evidence: Option<Evidence>,
    },
    Cancelled {
        reason: Option<String>,
    },
}

impl Transition {
    pub fn target(&self) -> DeliveryStatus {
        match self {
            Transition::Pending => DeliveryStatus::Pending,
            Transition::InTransit => DeliveryStatus::InTransit,
            Transition::Delivered { .. } => DeliveryStatus::Delivered,
            Transition::NotDelivered { .. } => DeliveryStatus::NotDelivered,
            Transition::Cancelled { .. } => DeliveryStatus::Cancelled,
        }
    }

    pub fn evidence(&self) -> Option<&Evidence> {
        match self {
            Transition::Delivered { evidence, .. } => Some(evidence),
            Transition::NotDelivered { evidence, .. } => evidence.as_ref(),
            _ => None,
        }
    }

    pub fn from_request(target: DeliveryStatus, request: &StatusChange) -> Result<Self, AppError> {
        let recipient_name =
            optional_text("recipient_name", request.recipient_name.as_deref(), MAX_TEXT_LEN)?;
        let reason = optional_text("reason", request.reason.as_deref(), MAX_TEXT_LEN)?;
        let evidence = match request.photo_proof.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(Evidence::parse(raw)?),
        };

        let transition = match target {
            DeliveryStatus::Pending => {
                reject(target, "recipient_name", recipient_name.is_some())?;
                reject(target, "reason", reason.is_some())?;
                reject(target, "photo_proof", evidence.is_some())?;
                Transition::Pending
            }
            DeliveryStatus::InTransit => {
                reject(target, "recipient_name", recipient_name.is_some())?;
                reject(target, "reason", reason.is_some())?;
                reject(target, "photo_proof", evidence.is_some())?;
                Transition::InTransit
            }
            DeliveryStatus::Delivered => {
                reject(target, "reason", reason.is_some())?;
                Transition::Delivered {
                    recipient_name: recipient_name.ok_or_else(|| missing(target, "recipient_name"))?,
                    evidence: evidence.ok_or_else(|| missing(target, "photo_proof"))?,
                }
            }
            DeliveryStatus::NotDelivered => {
                reject(target, "recipient_name", recipient_name.is_some())?;
                Transition::NotDelivered {
                    reason: reason.ok_or_else(|| missing(target, "reason"))?,
                    evidence,
                }
            }
            DeliveryStatus::Cancelled => {
                reject(target, "recipient_name", recipient_name.is_some())?;
                reject(target, "photo_proof", evidence.is_some())?;
                Transition::Cancelled { reason }
            }
        };

        Ok(transition)
    }
}

fn missing(target: DeliveryStatus, field: &'static str) -> AppError {
    AppError::validation(field, format!("{field} is required for status {target}"))
}

fn reject(target: DeliveryStatus, field: &'static str, present: bool) -> Result<(), AppError> {
    if present {
        return Err(AppError::validation(
            field,
            format!("{field} is not accepted for status {target}"),
        ));
    }

    Ok(())
}

/// `Delivered` and `Cancelled` are final; everything else may move anywhere.
pub fn check_policy(from: DeliveryStatus, to: DeliveryStatus) -> Result<(), AppError> {
    if from.is_final() {
        return Err(AppError::InvalidTransition { from, to });
    }

    Ok(())
}

/// Applies a status change requested by `actor` in a single transaction.
/// Evidence is stored before the status write; any failure rolls back.
pub fn transition(
    store: &Store,
    evidence_store: &EvidenceStore,
    metrics: &Metrics,
    actor: Uuid,
    delivery_id: Uuid,
    request: &StatusChange,
) -> Result<Delivery, AppError> {
    let target: DeliveryStatus = request.status.parse()?;

    let result = apply(store, evidence_store, metrics, actor, delivery_id, target, request);
    let outcome = match &result {
        Ok(_) => "success",
        Err(_) => "rejected",
    };
    metrics
        .status_transitions_total
        .with_label_values(&[target.as_str(), outcome])
        .inc();

    result
}

fn apply(
    store: &Store,
    evidence_store: &EvidenceStore,
    metrics: &Metrics,
    actor: Uuid,
    delivery_id: Uuid,
    target: DeliveryStatus,
    request: &StatusChange,
) -> Result<Delivery, AppError> {
    // Decoding runs before the store lock is taken; its errors surface in
    // check order below.
    let transition = Transition::from_request(target, request);
    let prepared = match &transition {
        Ok(transition) => transition
            .evidence()
            .map(|evidence| evidence_store.prepare(evidence))
            .transpose(),
        Err(_) => Ok(None),
    };

    let mut tx = store.begin()?;

    let current = tx
        .delivery(delivery_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    if current.driver_id != actor {
        warn!(%delivery_id, %actor, "status change attempted by a driver not assigned to the delivery");
        return Err(AppError::Unauthorized(
            "only the assigned driver may change this delivery's status".to_string(),
        ));
    }

    let transition = transition?;
    check_policy(current.status, target)?;

    let proof = match prepared? {
        Some(prepared) => {
            let processed = evidence_store.persist(prepared, delivery_id)?;
            metrics
                .evidence_bytes_written_total
                .inc_by(processed.bytes_written() as u64);
            Some(processed.into_file_name())
        }
        None => None,
    };

    let mut updated = current.clone();
    match transition {
        Transition::Pending | Transition::InTransit => {}
        Transition::Delivered { recipient_name, .. } => {
            updated.recipient_name = Some(recipient_name);
            updated.proof_photo = proof;
        }
        Transition::NotDelivered { reason, .. } => {
            updated.reason = Some(reason);
            updated.proof_photo = Some(proof.unwrap_or_default());
        }
        Transition::Cancelled { reason } => {
            if reason.is_some() {
                updated.reason = reason;
            }
        }
    }

    updated.status = target;
    let updated = tx.update_delivery(updated)?;
    tx.commit();

    info!(
        %delivery_id,
        from = %current.status,
        to = %target,
        "delivery status updated"
    );

    Ok(updated)
}
