pub mod stock_aggregate;
pub mod stock_movement;
pub mod tracked_entity;

pub use stock_aggregate::Entity as StockAggregate;
pub use stock_movement::Entity as StockMovement;
pub use tracked_entity::Entity as TrackedEntity;
