//! Enlisted unit wrappers: single items and merged flush groups.

use super::{same_unit, FlushContext, UnitOfWorkRef};
use crate::error::UnitOfWorkError;

/// A single enlisted unit of work.
#[derive(Clone)]
pub struct UnitOfWorkItem {
    unit: UnitOfWorkRef,
}

impl UnitOfWorkItem {
    pub fn new(unit: UnitOfWorkRef) -> Self {
        Self { unit }
    }

    pub fn unit(&self) -> &UnitOfWorkRef {
        &self.unit
    }

    pub fn flush_group_id(&self) -> &str {
        self.unit.flush_group_id()
    }

    pub fn requires_flush(&self) -> bool {
        self.unit.requires_flush()
    }

    fn flush(&self, context: &FlushContext) -> Result<(), UnitOfWorkError> {
        self.unit
            .flush(context)
            .map_err(|source| UnitOfWorkError::FlushFailed {
                unit: self.unit.name().to_string(),
                source,
            })
    }
}

/// Units sharing one non-empty flush-group id, flushed in enlistment order.
#[derive(Clone)]
pub struct UnitOfWorkGroup {
    group_id: String,
    items: Vec<UnitOfWorkItem>,
}

impl UnitOfWorkGroup {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn items(&self) -> &[UnitOfWorkItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// An entry in the controller's enlistment list.
#[derive(Clone)]
pub enum EnlistedUnit {
    Item(UnitOfWorkItem),
    Group(UnitOfWorkGroup),
}

impl EnlistedUnit {
    pub fn new(unit: UnitOfWorkRef) -> Self {
        EnlistedUnit::Item(UnitOfWorkItem::new(unit))
    }

    pub fn flush_group_id(&self) -> &str {
        match self {
            EnlistedUnit::Item(item) => item.flush_group_id(),
            EnlistedUnit::Group(group) => &group.group_id,
        }
    }

    /// Name used in logs; groups report their group id.
    pub fn name(&self) -> &str {
        match self {
            EnlistedUnit::Item(item) => item.unit.name(),
            EnlistedUnit::Group(group) => &group.group_id,
        }
    }

    pub fn wraps(&self, unit: &UnitOfWorkRef) -> bool {
        match self {
            EnlistedUnit::Item(item) => same_unit(&item.unit, unit),
            EnlistedUnit::Group(group) => {
                group.items.iter().any(|item| same_unit(&item.unit, unit))
            }
        }
    }

    /// Whether `unit` should be merged into this entry.
    pub fn can_merge_with(&self, unit: &UnitOfWorkRef) -> bool {
        let group_id = unit.flush_group_id();
        !group_id.is_empty() && group_id == self.flush_group_id() && !self.wraps(unit)
    }

    /// Merge `unit` into this entry, turning a single item into a group.
    pub fn merge(self, unit: UnitOfWorkRef) -> EnlistedUnit {
        let added = UnitOfWorkItem::new(unit);
        match self {
            EnlistedUnit::Item(item) => EnlistedUnit::Group(UnitOfWorkGroup {
                group_id: item.flush_group_id().to_string(),
                items: vec![item, added],
            }),
            EnlistedUnit::Group(mut group) => {
                group.items.push(added);
                EnlistedUnit::Group(group)
            }
        }
    }

    pub fn requires_flush(&self) -> bool {
        match self {
            EnlistedUnit::Item(item) => item.requires_flush(),
            EnlistedUnit::Group(group) => group.items.iter().any(UnitOfWorkItem::requires_flush),
        }
    }

    /// A group may only leave the calling thread if every member allows it.
    pub fn can_be_flushed_asynchronously(&self) -> bool {
        match self {
            EnlistedUnit::Item(item) => item.unit.can_be_flushed_asynchronously(),
            EnlistedUnit::Group(group) => group
                .items
                .iter()
                .all(|item| item.unit.can_be_flushed_asynchronously()),
        }
    }

    /// Flush the entry on the current thread. Group members that no longer
    /// require a flush are skipped.
    pub fn flush(&self, context: &FlushContext) -> Result<(), UnitOfWorkError> {
        match self {
            EnlistedUnit::Item(item) => item.flush(context),
            EnlistedUnit::Group(group) => {
                for item in group.items.iter().filter(|item| item.requires_flush()) {
                    item.flush(context)?;
                }
                Ok(())
            }
        }
    }
}
