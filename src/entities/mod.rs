pub mod order;
pub mod order_item;

pub use order::{ActiveModel as OrderActiveModel, Entity as Order, Model as OrderModel};
pub use order_item::{
    ActiveModel as OrderItemActiveModel, Entity as OrderItem, Model as OrderItemModel,
};
