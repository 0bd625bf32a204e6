//! Ledger demo: a few accounts driven through the message processor.

use crate::config::UnitaryConfig;
use crate::error::{ApiError, HandlerError};
use crate::events::{EventEnvelope, InMemoryEventBus};
use crate::pipeline::{HandlerRegistry, Message, MessageProcessor, Query};
use crate::repository::{
    Aggregate, InMemoryAggregateStore, Repository, RepositoryOptions,
};
use crate::uow::UnitOfWorkContext;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: String,
    pub owner: String,
    pub balance: i64,
    pub version: u64,
    #[serde(skip)]
    events: Vec<EventEnvelope>,
}

impl Account {
    fn open(id: &str, owner: &str) -> Self {
        let mut account = Self {
            id: id.to_string(),
            owner: owner.to_string(),
            balance: 0,
            version: 0,
            events: Vec::new(),
        };
        account.raise("account_opened", json!({ "owner": owner }));
        account
    }

    fn deposit(&mut self, amount: i64) -> Result<(), HandlerError> {
        if amount <= 0 {
            return Err(HandlerError::Rejected(format!(
                "deposit of {amount} into {} must be positive",
                self.id
            )));
        }
        self.balance += amount;
        self.raise("funds_deposited", json!({ "amount": amount }));
        Ok(())
    }

    fn withdraw(&mut self, amount: i64, to: &str) -> Result<(), HandlerError> {
        if amount > self.balance {
            return Err(HandlerError::Rejected(format!(
                "{} has {} available, cannot withdraw {amount}",
                self.id, self.balance
            )));
        }
        self.balance -= amount;
        self.raise("funds_withdrawn", json!({ "amount": amount, "to": to }));
        Ok(())
    }

    fn raise(&mut self, event_type: &str, data: serde_json::Value) {
        self.events
            .push(EventEnvelope::for_aggregate(self.id.clone(), event_type, data));
    }
}

impl Aggregate for Account {
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn take_events(&mut self) -> Vec<EventEnvelope> {
        std::mem::take(&mut self.events)
    }
}

pub struct OpenAccount {
    pub id: String,
    pub owner: String,
}

pub struct Deposit {
    pub id: String,
    pub amount: i64,
}

pub struct Transfer {
    pub from: String,
    pub to: String,
    pub amount: i64,
}

impl Message for OpenAccount {}
impl Message for Deposit {}
impl Message for Transfer {}

pub struct Balances;

impl Query for Balances {
    type Response = Vec<(String, i64)>;
}

type AccountStore = Arc<InMemoryAggregateStore<Account>>;

fn accounts(context: &UnitOfWorkContext, store: &AccountStore) -> Arc<Repository<Account>> {
    Repository::scoped(
        context,
        "accounts",
        store.clone(),
        RepositoryOptions {
            flush_group: "ledger".to_string(),
            asynchronous: true,
        },
    )
}

fn load(
    repository: &Arc<Repository<Account>>,
    context: &UnitOfWorkContext,
    id: &str,
) -> Result<Account, HandlerError> {
    repository
        .get(context, &id.to_string())?
        .ok_or_else(|| HandlerError::Rejected(format!("account {id} does not exist")))
}

/// Handlers for the ledger commands, events and queries.
pub fn ledger_registry(store: &AccountStore) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    let s = store.clone();
    registry.register_command::<OpenAccount, _>(move |command, context| {
        accounts(context, &s).add(context, Account::open(&command.id, &command.owner))?;
        Ok(())
    });

    let s = store.clone();
    registry.register_command::<Deposit, _>(move |command, context| {
        let repository = accounts(context, &s);
        let mut account = load(&repository, context, &command.id)?;
        account.deposit(command.amount)?;
        repository.update(context, account)?;
        Ok(())
    });

    let s = store.clone();
    registry.register_command::<Transfer, _>(move |command, context| {
        let repository = accounts(context, &s);
        load(&repository, context, &command.to)?;
        let mut from = load(&repository, context, &command.from)?;
        from.withdraw(command.amount, &command.to)?;
        repository.update(context, from)?;
        Ok(())
    });

    // The credit side of a transfer runs in the same unit of work as the debit.
    let s = store.clone();
    registry.subscribe("funds_withdrawn", "credit", move |event, context| {
        let to = event.data["to"].as_str().unwrap_or_default();
        let amount = event.data["amount"].as_i64().unwrap_or_default();
        let repository = accounts(context, &s);
        let mut account = load(&repository, context, to)?;
        account.deposit(amount)?;
        repository.update(context, account)?;
        Ok(())
    });

    let s = store.clone();
    registry.register_query::<Balances, _>(move |_| {
        let mut balances: Vec<_> = s
            .all()
            .into_iter()
            .map(|account| (account.id, account.balance))
            .collect();
        balances.sort();
        Ok(balances)
    });

    registry
}

#[derive(Debug, Clone, Serialize)]
pub struct DemoStep {
    pub command: String,
    pub succeeded: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub steps: Vec<DemoStep>,
    pub events: Vec<EventEnvelope>,
    pub balances: Vec<(String, i64)>,
}

impl DemoReport {
    pub fn to_text(&self) -> String {
        let mut out = String::from("Steps:\n");
        for step in &self.steps {
            let status = if step.succeeded { "ok" } else { "rejected" };
            out.push_str(&format!("  {:<28} {:<9} {}\n", step.command, status, step.detail));
        }
        out.push_str("Committed events:\n");
        for event in &self.events {
            out.push_str(&format!(
                "  {} {:<16} {:<8} {}\n",
                event.ts,
                event.event_type,
                event.aggregate_id.as_deref().unwrap_or("-"),
                event.data
            ));
        }
        out.push_str("Balances:\n");
        for (id, balance) in &self.balances {
            out.push_str(&format!("  {:<8} {:>6}\n", id, balance));
        }
        out
    }
}

fn record<M: Message>(
    processor: &MessageProcessor,
    steps: &mut Vec<DemoStep>,
    label: String,
    message: M,
) {
    let step = match processor.handle(message) {
        Ok(outcome) => DemoStep {
            command: label,
            succeeded: true,
            detail: format!(
                "{} round(s), {} event(s)",
                outcome.report.rounds,
                outcome.events.len()
            ),
        },
        Err(err) => DemoStep {
            command: label,
            succeeded: false,
            detail: err.to_string(),
        },
    };
    steps.push(step);
}

/// Run the ledger scenario with `config`.
pub fn run_demo(config: &UnitaryConfig) -> Result<DemoReport, ApiError> {
    let store: AccountStore = InMemoryAggregateStore::shared();
    let committed = InMemoryEventBus::shared();
    let processor = MessageProcessor::from_config(ledger_registry(&store), config)
        .with_event_bus(committed.clone());

    let mut steps = Vec::new();
    for (id, owner) in [("alice", "Alice"), ("bob", "Bob")] {
        record(
            &processor,
            &mut steps,
            format!("open {id}"),
            OpenAccount {
                id: id.to_string(),
                owner: owner.to_string(),
            },
        );
    }
    record(
        &processor,
        &mut steps,
        "deposit alice 100".to_string(),
        Deposit {
            id: "alice".to_string(),
            amount: 100,
        },
    );
    record(
        &processor,
        &mut steps,
        "transfer alice->bob 30".to_string(),
        Transfer {
            from: "alice".to_string(),
            to: "bob".to_string(),
            amount: 30,
        },
    );
    record(
        &processor,
        &mut steps,
        "transfer bob->alice 500".to_string(),
        Transfer {
            from: "bob".to_string(),
            to: "alice".to_string(),
            amount: 500,
        },
    );

    let balances = processor.execute(Balances)?;
    Ok(DemoReport {
        steps,
        events: committed.published(),
        balances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_moves_money_and_rejects_overdraft() {
        let report = run_demo(&UnitaryConfig::default()).unwrap();
        assert_eq!(
            report.balances,
            vec![("alice".to_string(), 70), ("bob".to_string(), 30)]
        );
        let rejected: Vec<_> = report
            .steps
            .iter()
            .filter(|step| !step.succeeded)
            .map(|step| step.command.as_str())
            .collect();
        assert_eq!(rejected, vec!["transfer bob->alice 500"]);

        let types: Vec<_> = report.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "account_opened",
                "account_opened",
                "funds_deposited",
                "funds_withdrawn",
                "funds_deposited"
            ]
        );
        assert!(report.to_text().contains("Balances:"));
    }

    #[test]
    fn transfer_to_unknown_account_is_rejected() {
        let store = InMemoryAggregateStore::shared();
        let processor = MessageProcessor::from_config(
            ledger_registry(&store),
            &UnitaryConfig::default(),
        );
        processor
            .handle(OpenAccount {
                id: "alice".to_string(),
                owner: "Alice".to_string(),
            })
            .unwrap();
        let err = processor
            .handle(Transfer {
                from: "alice".to_string(),
                to: "nobody".to_string(),
                amount: 1,
            })
            .unwrap_err();
        assert!(matches!(err, HandlerError::Rejected(_)));
    }
}
