use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::TaskRecord;

// ---------------------------------------------------------------------------
// InventorySnapshot
// ---------------------------------------------------------------------------

/// One occupied inventory slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySlot {
    pub name: String,
    pub count: u32,
}

impl InventorySlot {
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// Point-in-time view of an agent's inventory. The same item may occupy
/// several slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventorySnapshot {
    pub slots: Vec<InventorySlot>,
}

impl InventorySnapshot {
    pub fn new(slots: Vec<InventorySlot>) -> Self {
        Self { slots }
    }

    /// Build a snapshot from loosely-typed JSON.
    ///
    /// Accepts an array of slots, where `null` marks an empty slot; anything
    /// that is not a `{name, count}` object is skipped. A non-array value
    /// yields an empty snapshot.
    pub fn from_value(value: &Value) -> Self {
        let slots = value
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let name = entry.get("name")?.as_str()?;
                        let count = entry.get("count")?.as_u64()?;
                        Some(InventorySlot::new(name, u32::try_from(count).ok()?))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { slots }
    }

    /// Total quantity of `item`, matched case-insensitively.
    pub fn count_of(&self, item: &str) -> u64 {
        self.slots
            .iter()
            .filter(|slot| slot.name.eq_ignore_ascii_case(item))
            .map(|slot| u64::from(slot.count))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.count == 0)
    }
}

// ---------------------------------------------------------------------------
// TaskValidator
// ---------------------------------------------------------------------------

/// Checks a task's completion criterion against an inventory snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskValidator {
    target_item: String,
    target_count: u32,
}

impl TaskValidator {
    pub fn new(target_item: impl Into<String>, target_count: u32) -> Self {
        Self {
            target_item: target_item.into(),
            target_count,
        }
    }

    /// Returns `None` when the record carries no completion criterion.
    pub fn for_task(record: &TaskRecord) -> Option<Self> {
        let item = record.target_item.as_deref()?;
        let count = record.target_count?;
        Some(Self::new(item, count))
    }

    pub fn target_item(&self) -> &str {
        &self.target_item
    }

    pub fn target_count(&self) -> u32 {
        self.target_count
    }

    /// `true` iff the summed quantity of the target item reaches the target
    /// count.
    pub fn validate(&self, snapshot: &InventorySnapshot) -> bool {
        let total = snapshot.count_of(&self.target_item);
        let done = total >= u64::from(self.target_count);
        if done {
            tracing::debug!(
                item = %self.target_item,
                total,
                required = self.target_count,
                "completion criterion met"
            );
        }
        done
    }

    /// Same as [`validate`](Self::validate) for a raw JSON snapshot.
    pub fn validate_value(&self, raw: &Value) -> bool {
        self.validate(&InventorySnapshot::from_value(raw))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
