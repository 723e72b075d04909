use gridsync_core::{EntityType, Operation, SyncQueueItem, SyncStore};
use serde_json::Value;

use crate::commands::common::{parse_payload, queue_item_to_view};
use crate::error::CliError;

pub async fn run_enqueue(
    store: &SyncStore,
    entity_type: EntityType,
    entity_id: &str,
    operation: Operation,
    payload: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    let item = enqueue_mutation(store, entity_type, entity_id, operation, payload).await?;

    if as_json {
        let view = queue_item_to_view(&item, item.created_at);
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        println!("{}", item.id);
    }
    Ok(())
}

/// Build and queue a mutation. Deletes may omit the payload.
pub async fn enqueue_mutation(
    store: &SyncStore,
    entity_type: EntityType,
    entity_id: &str,
    operation: Operation,
    payload: Option<&str>,
) -> Result<SyncQueueItem, CliError> {
    let payload = match (parse_payload(payload)?, operation) {
        (Some(payload), _) => payload,
        (None, Operation::Delete) => Value::Null,
        (None, _) => return Err(CliError::MissingPayload(operation.to_string())),
    };

    let item = SyncQueueItem::new(entity_type, entity_id, operation, payload)?;
    Ok(store.enqueue(item).await?)
}
