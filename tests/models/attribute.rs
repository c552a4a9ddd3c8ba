//! Attribute Store Tests

use crate::common::*;
use colonies_core::models::{Attribute, NewAttribute};
use colonies_core::{AttributeType, ColoniesError, ColoniesResult, ProcessState};
use sqlx::PgPool;

fn attribute(target_id: &str, attribute_type: AttributeType, key: &str, value: &str) -> NewAttribute {
    NewAttribute::new(target_id, COLONY, "", attribute_type, key, value)
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_attribute_crud(pool: PgPool) -> ColoniesResult<()> {
    let process = submit_default(&pool).await?;
    let id = &process.process_id;

    let mut created = Attribute::create(&pool, attribute(id, AttributeType::Out, "result", "41")).await?;
    assert_eq!(created.attribute_id.len(), 64);
    assert_eq!(created.state, ProcessState::Waiting);

    let found = Attribute::find_by_id(&pool, &created.attribute_id).await?.expect("Attribute not found");
    assert_eq!(found, created);

    let by_key = Attribute::find_by_key(&pool, id, "result", AttributeType::Out)
        .await?
        .expect("Attribute not found");
    assert_eq!(by_key.attribute_id, created.attribute_id);

    // Same key, different type
    assert!(Attribute::find_by_key(&pool, id, "result", AttributeType::In).await?.is_none());

    created.update_value(&pool, "42").await?;
    let updated = Attribute::find_by_id(&pool, &created.attribute_id).await?.expect("Attribute not found");
    assert_eq!(updated.value, "42");

    assert!(Attribute::delete_by_id(&pool, &created.attribute_id).await?);
    assert!(Attribute::find_by_id(&pool, &created.attribute_id).await?.is_none());

    let err = created.update_value(&pool, "43").await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_duplicate_key_is_an_integrity_error(pool: PgPool) -> ColoniesResult<()> {
    let process = submit_default(&pool).await?;
    let id = &process.process_id;

    Attribute::create(&pool, attribute(id, AttributeType::In, "dup", "a")).await?;
    Attribute::create(&pool, attribute(id, AttributeType::In, "dup", "b")).await?;

    let err = Attribute::find_by_key(&pool, id, "dup", AttributeType::In).await.unwrap_err();
    assert!(err.is_integrity());
    assert!(matches!(err, ColoniesError::Integrity { count: 2, .. }));
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_batch_and_lookups(pool: PgPool) -> ColoniesResult<()> {
    let first = submit_default(&pool).await?;
    let second = submit_default(&pool).await?;

    let created = Attribute::create_batch(
        &pool,
        vec![
            attribute(&first.process_id, AttributeType::In, "a", "1"),
            attribute(&first.process_id, AttributeType::Out, "b", "2"),
            attribute(&first.process_id, AttributeType::Err, "c", "3"),
            attribute(&second.process_id, AttributeType::In, "d", "4"),
        ],
    )
    .await?;
    assert_eq!(created.len(), 4);

    assert_eq!(Attribute::find_by_target(&pool, &first.process_id).await?.len(), 3);
    let inputs = Attribute::find_by_target_and_type(&pool, &first.process_id, AttributeType::In).await?;
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].key, "a");

    let targets = vec![first.process_id.clone(), second.process_id.clone()];
    let all_inputs = Attribute::find_by_targets_and_type(&pool, &targets, AttributeType::In).await?;
    assert_eq!(all_inputs.len(), 2);

    assert_eq!(Attribute::find_by_colony(&pool, COLONY).await?.len(), 4);
    assert!(Attribute::find_by_colony(&pool, "other").await?.is_empty());

    assert_eq!(
        Attribute::delete_by_target_and_type(&pool, &first.process_id, AttributeType::Err).await?,
        1
    );
    assert_eq!(Attribute::delete_by_target(&pool, &first.process_id).await?, 2);
    assert_eq!(Attribute::count(&pool).await?, 1);
    Ok(())
}

#[sqlx::test(migrator = "colonies_core::database::migrator::MIGRATOR")]
async fn test_set_state_and_colony_deletion(pool: PgPool) -> ColoniesResult<()> {
    let running = submit_default(&pool).await?;
    let waiting = submit_default(&pool).await?;
    Attribute::create(&pool, attribute(&running.process_id, AttributeType::In, "a", "1")).await?;
    Attribute::create(&pool, attribute(&waiting.process_id, AttributeType::In, "b", "2")).await?;

    let updated = Attribute::set_state(&pool, &running.process_id, ProcessState::Running).await?;
    assert_eq!(updated, 1);

    let deleted = Attribute::delete_all_by_colony_with_state(&pool, COLONY, ProcessState::Running).await?;
    assert_eq!(deleted, 1);
    assert!(Attribute::find_by_target(&pool, &running.process_id).await?.is_empty());
    assert_eq!(Attribute::find_by_target(&pool, &waiting.process_id).await?.len(), 1);

    assert_eq!(Attribute::delete_all_by_colony(&pool, COLONY).await?, 1);
    assert_eq!(Attribute::delete_all(&pool).await?, 0);
    Ok(())
}
