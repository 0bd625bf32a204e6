//! The async front door on a tokio runtime

use std::sync::Arc;
use unitary::cli::{ledger_registry, Balances, Deposit, OpenAccount};
use unitary::config::UnitaryConfig;
use unitary::repository::InMemoryAggregateStore;
use unitary::MessageProcessor;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_messages_each_get_their_own_unit_of_work() {
    let store = InMemoryAggregateStore::shared();
    let processor = Arc::new(MessageProcessor::from_config(
        ledger_registry(&store),
        &UnitaryConfig::default(),
    ));

    let opens: Vec<_> = (0..8)
        .map(|i| {
            let processor = processor.clone();
            tokio::spawn(async move {
                processor
                    .handle_async(OpenAccount {
                        id: format!("acct-{i}"),
                        owner: format!("Owner {i}"),
                    })
                    .await
            })
        })
        .collect();
    for open in opens {
        open.await.unwrap().unwrap();
    }

    let outcome = processor
        .handle_async(Deposit {
            id: "acct-3".to_string(),
            amount: 12,
        })
        .await
        .unwrap();
    assert_eq!(outcome.events.len(), 1);

    let balances = processor.execute(Balances).unwrap();
    assert_eq!(balances.len(), 8);
    assert!(balances.contains(&("acct-3".to_string(), 12)));
}
