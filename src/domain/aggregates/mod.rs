//! Aggregates module
pub mod identity;
pub mod order;
pub mod product;

pub use identity::{Operator, RevokedToken, Shop, TempToken, User, UserRole, UserType};
pub use order::{
    DraftItem, DraftOption, Order, OrderDraft, OrderError, OrderItem, OrderItemOption, OrderStatusLog,
};
pub use product::{
    CategorySpec, OptionCategory, OptionSpec, Product, ProductDetail, ProductError, ProductOption,
    ProductSpec, ProductStatus, Tag,
};
