//! Data models
//!
//! Database entities, their create/update inputs and list filters:
//! - User, Post, Tag, Category, Product, AuditLog
//! - Pagination parameters and page envelopes shared by every list

mod audit_log;
mod category;
pub mod pagination;
mod post;
mod product;
mod tag;
mod user;

pub use audit_log::{AuditAction, AuditLog, AuditLogFilter, CreateAuditLogInput};
pub use category::{Category, CreateCategoryInput, UpdateCategoryInput, CATEGORY_NAME_MAX_LEN};
pub use pagination::{Page, PageMeta, PaginationError, QueryParams, SortOrder};
pub use post::{
    CreatePostInput, Post, PostFilter, PostWithTags, UpdatePostInput, CONTENT_MAX_LEN, SLUG_MAX_LEN,
    SUMMARY_MAX_LEN, TITLE_MAX_LEN,
};
pub use product::{
    CreateProductInput, Product, ProductFilter, UpdateProductInput, PRODUCT_NAME_MAX_LEN,
    SKU_MAX_LEN,
};
pub use tag::{CreateTagInput, Tag, TagWithCount, UpdateTagInput, TAG_NAME_MAX_LEN};
pub use user::{CreateUserInput, UpdateUserInput, User, UserFilter};

#[cfg(test)]
pub(crate) use user::sample_user;
