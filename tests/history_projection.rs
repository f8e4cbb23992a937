//! History and timeline read-model checks.

mod common;

use edda::projection::{order_number, project_timeline};
use edda::storage::SagaStore;

use common::{saga_world, submission};

#[tokio::test]
async fn test_order_number_matches_contract_format() {
    let world = saga_world();
    let execution = world.engine.submit_order(submission()).await.unwrap();

    let history = world.history.history(execution.order_id).await.unwrap();

    // ORD-YYYY-XXXXXXXX: the UTC year of creation and the first 8 hex
    // characters of the order id.
    let parts: Vec<&str> = history.order_number.splitn(3, '-').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "ORD");
    assert_eq!(parts[1], "2024");
    assert_eq!(parts[2].len(), 8);
    assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    assert!(execution
        .order_id
        .simple()
        .to_string()
        .starts_with(parts[2]));

    // Pure function agrees with the aggregate.
    assert_eq!(
        history.order_number,
        order_number(execution.order_id, history.created_at)
    );
}

#[tokio::test]
async fn test_timeline_projection_is_deterministic() {
    let world = saga_world();
    world.shipping.fail_unavailable();

    let execution = world.engine.submit_order(submission()).await.unwrap();
    let events = world
        .store
        .events_for_order(execution.order_id)
        .await
        .unwrap();

    let first = project_timeline(execution.order_id, &events);
    let second = project_timeline(execution.order_id, &events);

    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );

    // Shuffled input projects to the same timeline.
    let mut reversed = events.clone();
    reversed.reverse();
    let third = project_timeline(execution.order_id, &reversed);
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&third).unwrap()
    );
}

#[tokio::test]
async fn test_history_reports_completion_time_for_terminal_orders() {
    let world = saga_world();
    let execution = world.engine.submit_order(submission()).await.unwrap();

    let history = world.history.history(execution.order_id).await.unwrap();

    assert!(history.completed_at.is_some());
    assert_eq!(history.completed_at, execution.completed_at);
    assert_eq!(history.total_attempts(), 1);
    assert_eq!(history.retry_count(), 0);
}

#[tokio::test]
async fn test_timeline_describes_the_full_happy_path() {
    let world = saga_world();
    let execution = world.engine.submit_order(submission()).await.unwrap();

    let history = world.history.history(execution.order_id).await.unwrap();
    let titles: Vec<&str> = history
        .timeline
        .entries
        .iter()
        .map(|e| e.title.as_str())
        .collect();

    assert_eq!(
        titles,
        vec![
            "Order Placed",
            "Processing Started",
            "Reserving Inventory",
            "Inventory Reserved",
            "Processing Payment",
            "Payment Processed",
            "Arranging Shipping",
            "Shipping Arranged",
            "Processing Finished",
            "Order Completed",
        ]
    );

    // The payment entry embeds the charged amount parsed from details.
    let payment = history
        .timeline
        .entries
        .iter()
        .find(|e| e.title == "Payment Processed")
        .unwrap();
    assert_eq!(payment.description, "Charged $50.00");
}
