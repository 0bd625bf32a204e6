//! Message processor end to end: ledger commands, cascading events, middleware

use parking_lot::Mutex;
use std::sync::Arc;
use unitary::cli::{ledger_registry, Balances, Deposit, OpenAccount, Transfer};
use unitary::config::UnitaryConfig;
use unitary::events::InMemoryEventBus;
use unitary::pipeline::{CancellationToken, Invocation, Middleware, MessageKind, Next};
use unitary::repository::InMemoryAggregateStore;
use unitary::{HandlerError, MessageProcessor};

struct KindLog(Arc<Mutex<Vec<(MessageKind, String)>>>);

impl Middleware for KindLog {
    fn name(&self) -> &str {
        "kind-log"
    }

    fn invoke(&self, invocation: &Invocation<'_>, next: Next<'_>) -> Result<(), HandlerError> {
        self.0
            .lock()
            .push((invocation.kind(), invocation.message_type().to_string()));
        next.run(invocation)
    }
}

fn open(processor: &MessageProcessor, id: &str) {
    processor
        .handle(OpenAccount {
            id: id.to_string(),
            owner: id.to_uppercase(),
        })
        .unwrap();
}

#[test]
fn transfer_credits_in_the_same_unit_of_work() {
    let store = InMemoryAggregateStore::shared();
    let committed = InMemoryEventBus::shared();
    let log = Arc::new(Mutex::new(Vec::new()));
    let processor = MessageProcessor::from_config(ledger_registry(&store), &UnitaryConfig::default())
        .with_middleware(KindLog(log.clone()))
        .with_event_bus(committed.clone());

    open(&processor, "alice");
    open(&processor, "bob");
    processor
        .handle(Deposit {
            id: "alice".to_string(),
            amount: 50,
        })
        .unwrap();
    log.lock().clear();

    let outcome = processor
        .handle(Transfer {
            from: "alice".to_string(),
            to: "bob".to_string(),
            amount: 20,
        })
        .unwrap();
    assert_eq!(outcome.report.rounds, 2);
    let kinds: Vec<_> = log.lock().iter().map(|(kind, _)| *kind).collect();
    assert_eq!(kinds, vec![MessageKind::Command, MessageKind::Event]);
    assert_eq!(log.lock()[1].1, "funds_withdrawn");

    assert_eq!(
        processor.execute(Balances).unwrap(),
        vec![("alice".to_string(), 30), ("bob".to_string(), 20)]
    );
    assert_eq!(committed.published().len(), 5);
}

#[test]
fn rejected_transfer_changes_nothing() {
    let store = InMemoryAggregateStore::shared();
    let committed = InMemoryEventBus::shared();
    let processor = MessageProcessor::from_config(ledger_registry(&store), &UnitaryConfig::default())
        .with_event_bus(committed.clone());
    open(&processor, "alice");
    open(&processor, "bob");
    let before = committed.published().len();

    let err = processor
        .handle(Transfer {
            from: "alice".to_string(),
            to: "bob".to_string(),
            amount: 1,
        })
        .unwrap_err();
    assert!(matches!(err, HandlerError::Rejected(_)));
    assert_eq!(committed.published().len(), before);
    assert_eq!(
        processor.execute(Balances).unwrap(),
        vec![("alice".to_string(), 0), ("bob".to_string(), 0)]
    );
}

#[test]
fn cancellation_before_flush_keeps_store_clean() {
    let store = InMemoryAggregateStore::shared();
    let processor =
        MessageProcessor::from_config(ledger_registry(&store), &UnitaryConfig::default());
    let token = CancellationToken::new();
    token.cancel();
    let err = processor
        .handle_with_token(
            OpenAccount {
                id: "carol".to_string(),
                owner: "Carol".to_string(),
            },
            &token,
        )
        .unwrap_err();
    assert!(matches!(err, HandlerError::Cancelled(_)));
    assert!(store.is_empty());
}

#[test]
fn sequential_and_parallel_settings_agree() {
    for parallel in [true, false] {
        let mut config = UnitaryConfig::default();
        config.flush.parallel = parallel;
        config.pipeline.transactional = parallel;
        let store = InMemoryAggregateStore::shared();
        let processor = MessageProcessor::from_config(ledger_registry(&store), &config);
        open(&processor, "alice");
        open(&processor, "bob");
        processor
            .handle(Deposit {
                id: "bob".to_string(),
                amount: 9,
            })
            .unwrap();
        processor
            .handle(Transfer {
                from: "bob".to_string(),
                to: "alice".to_string(),
                amount: 4,
            })
            .unwrap();
        assert_eq!(
            processor.execute(Balances).unwrap(),
            vec![("alice".to_string(), 4), ("bob".to_string(), 5)]
        );
    }
}
