pub mod order_repository;

pub use order_repository::{
    NewOrder, NewOrderItem, OrderStore, OrderWithItems, PaymentFields, SeaOrmOrderStore,
    StatusChange,
};
