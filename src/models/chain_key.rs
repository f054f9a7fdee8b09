//! Chain keys identify the scope over which a running balance is kept.
//!
//! Parts are tracked per (warehouse, part); bulk fuel per warehouse. Both are
//! served by the same generic ledger through the [`ChainKey`] trait.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use uuid::Uuid;

use crate::entities::tracked_entity::EntityType;

/// Which ledger a chain key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainKind {
    PartStock,
    FuelStock,
}

impl ChainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::PartStock => "part_stock",
            ChainKind::FuelStock => "fuel_stock",
        }
    }
}

impl Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked entity scope (scope id plus optional sub id).
pub trait ChainKey:
    Clone + Debug + Display + Eq + Hash + Ord + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: ChainKind;

    fn scope_id(&self) -> Uuid;

    fn sub_id(&self) -> Option<Uuid>;

    /// Rebuilds a key from its stored parts. Returns `None` when the parts do
    /// not describe a key of this kind.
    fn from_parts(scope_id: Uuid, sub_id: Option<Uuid>) -> Option<Self>;

    /// Entities that must exist (and be active) for this key to be valid.
    fn required_entities(&self) -> Vec<(EntityType, Uuid)>;

    /// Stable textual form used as the unique column and in logs.
    fn storage_key(&self) -> String {
        match self.sub_id() {
            Some(sub) => format!("{}:{}", self.scope_id(), sub),
            None => self.scope_id().to_string(),
        }
    }

    /// Identity used by the lock manager. Sorting by this string gives the
    /// global lock acquisition order.
    fn lock_id(&self) -> String {
        format!("{}/{}", Self::KIND.as_str(), self.storage_key())
    }
}

/// One part held at one warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartStockKey {
    pub warehouse_id: Uuid,
    pub part_id: Uuid,
}

impl PartStockKey {
    pub fn new(warehouse_id: Uuid, part_id: Uuid) -> Self {
        Self {
            warehouse_id,
            part_id,
        }
    }
}

impl Display for PartStockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "part {} @ warehouse {}", self.part_id, self.warehouse_id)
    }
}

impl ChainKey for PartStockKey {
    const KIND: ChainKind = ChainKind::PartStock;

    fn scope_id(&self) -> Uuid {
        self.warehouse_id
    }

    fn sub_id(&self) -> Option<Uuid> {
        Some(self.part_id)
    }

    fn from_parts(scope_id: Uuid, sub_id: Option<Uuid>) -> Option<Self> {
        sub_id.map(|part_id| Self::new(scope_id, part_id))
    }

    fn required_entities(&self) -> Vec<(EntityType, Uuid)> {
        vec![
            (EntityType::Warehouse, self.warehouse_id),
            (EntityType::Part, self.part_id),
        ]
    }
}

/// A bulk fuel tank/warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FuelStockKey {
    pub warehouse_id: Uuid,
}

impl FuelStockKey {
    pub fn new(warehouse_id: Uuid) -> Self {
        Self { warehouse_id }
    }
}

impl Display for FuelStockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fuel @ warehouse {}", self.warehouse_id)
    }
}

impl ChainKey for FuelStockKey {
    const KIND: ChainKind = ChainKind::FuelStock;

    fn scope_id(&self) -> Uuid {
        self.warehouse_id
    }

    fn sub_id(&self) -> Option<Uuid> {
        None
    }

    fn from_parts(scope_id: Uuid, sub_id: Option<Uuid>) -> Option<Self> {
        match sub_id {
            None => Some(Self::new(scope_id)),
            Some(_) => None,
        }
    }

    fn required_entities(&self) -> Vec<(EntityType, Uuid)> {
        vec![(EntityType::Warehouse, self.warehouse_id)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_includes_sub_id_only_when_present() {
        let wh = Uuid::new_v4();
        let part = Uuid::new_v4();

        assert_eq!(
            PartStockKey::new(wh, part).storage_key(),
            format!("{}:{}", wh, part)
        );
        assert_eq!(FuelStockKey::new(wh).storage_key(), wh.to_string());
    }

    #[test]
    fn from_parts_rejects_mismatched_shapes() {
        let wh = Uuid::new_v4();
        assert!(PartStockKey::from_parts(wh, None).is_none());
        assert!(FuelStockKey::from_parts(wh, Some(Uuid::new_v4())).is_none());
        assert_eq!(
            FuelStockKey::from_parts(wh, None),
            Some(FuelStockKey::new(wh))
        );
    }

    #[test]
    fn lock_ids_are_namespaced_by_kind() {
        let wh = Uuid::new_v4();
        let fuel = FuelStockKey::new(wh).lock_id();
        assert!(fuel.starts_with("fuel_stock/"));

        let part = PartStockKey::new(wh, Uuid::new_v4()).lock_id();
        assert!(part.starts_with("part_stock/"));
        assert_ne!(fuel, part);
    }
}
